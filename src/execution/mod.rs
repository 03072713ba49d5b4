//! Execution results: the structured, ordered outcome of one code submission.

use serde::{Deserialize, Serialize};

pub mod multiplexer;
pub mod protocol;

pub use multiplexer::{DisplayMode, DisplayRule, Multiplexer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Text,
    Table,
    Plot,
    Value,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextOutput {
    pub stream: StreamName,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotPayload {
    pub png_base64: String,
    pub width_px: u32,
    pub height_px: u32,
    pub width_in: f64,
    pub height_in: f64,
    pub dpi: f64,
    pub default_size: bool,
}

impl PlotPayload {
    pub fn data_uri(&self) -> String {
        format!("data:image/png;base64,{}", self.png_base64)
    }
}

/// An interpreter-native error, surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorInfo {
    /// `Name: message`, the way the interpreter prints the last traceback line.
    pub fn headline(&self) -> String {
        if self.message.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArtifactPayload {
    Text(TextOutput),
    Table(TablePayload),
    Plot(PlotPayload),
    Value(String),
    Error(ErrorInfo),
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Text(_) => ArtifactKind::Text,
            Self::Table(_) => ArtifactKind::Table,
            Self::Plot(_) => ArtifactKind::Plot,
            Self::Value(_) => ArtifactKind::Value,
            Self::Error(_) => ArtifactKind::Error,
        }
    }
}

/// One unit of captured output. `order` is the emission index within its result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    kind: ArtifactKind,
    payload: ArtifactPayload,
    order: usize,
}

impl Artifact {
    pub(crate) fn new(payload: ArtifactPayload, order: usize) -> Self {
        Self {
            kind: payload.kind(),
            payload,
            order,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn payload(&self) -> &ArtifactPayload {
        &self.payload
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub(crate) fn payload_mut(&mut self) -> &mut ArtifactPayload {
        &mut self.payload
    }
}

/// The full outcome of one `execute`. Only the multiplexer builds these, and
/// nothing mutates them afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    stdout: String,
    stderr: String,
    artifacts: Vec<Artifact>,
    error: Option<ErrorInfo>,
}

impl ExecutionResult {
    pub(crate) fn from_parts(
        stdout: String,
        stderr: String,
        artifacts: Vec<Artifact>,
        error: Option<ErrorInfo>,
    ) -> Self {
        Self {
            stdout,
            stderr,
            artifacts,
            error,
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The auto-displayed value of the trailing expression, if any. Tables
    /// have no scalar rendering and are skipped.
    pub fn value(&self) -> Option<&str> {
        self.artifacts.iter().rev().find_map(|a| match a.payload() {
            ArtifactPayload::Value(repr) => Some(repr.as_str()),
            _ => None,
        })
    }

    pub fn kinds(&self) -> Vec<ArtifactKind> {
        self.artifacts.iter().map(Artifact::kind).collect()
    }

    pub fn plots(&self) -> impl Iterator<Item = &PlotPayload> {
        self.artifacts.iter().filter_map(|a| match a.payload() {
            ArtifactPayload::Plot(plot) => Some(plot),
            _ => None,
        })
    }
}
