//! NDJSON messages exchanged with the interpreter driver.

use serde::{Deserialize, Serialize};

use super::{StreamName, TablePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    Execute { id: u64, code: &'a str },
    Analyze { id: u64, code: &'a str },
}

impl Request<'_> {
    pub fn id(&self) -> u64 {
        match self {
            Self::Execute { id, .. } | Self::Analyze { id, .. } => *id,
        }
    }

    /// One protocol line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Ready {
        pid: u32,
        version: String,
        #[serde(default)]
        builtins: Vec<String>,
    },
    Stream {
        id: u64,
        name: StreamName,
        text: String,
    },
    Result {
        id: u64,
        target: Option<String>,
        none: bool,
        repr: Option<String>,
        table: Option<TablePayload>,
    },
    Plot {
        id: u64,
        png: String,
        width_px: u32,
        height_px: u32,
        width_in: f64,
        height_in: f64,
        dpi: f64,
        default_size: bool,
    },
    Error {
        id: Option<u64>,
        ename: String,
        message: String,
        traceback: Option<String>,
    },
    Analysis {
        id: u64,
        loads: Vec<String>,
        stores: Vec<String>,
        #[serde(default)]
        sources: Vec<String>,
        #[serde(default)]
        star_imports: Vec<String>,
    },
    Done {
        id: u64,
        #[serde(default)]
        names: Vec<String>,
    },
}

impl Event {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// The request this event belongs to; `None` for the handshake and for
    /// errors the driver could not attribute.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Ready { .. } => None,
            Self::Error { id, .. } => *id,
            Self::Stream { id, .. }
            | Self::Result { id, .. }
            | Self::Plot { id, .. }
            | Self::Analysis { id, .. }
            | Self::Done { id, .. } => Some(*id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Stream { .. } => "stream",
            Self::Result { .. } => "result",
            Self::Plot { .. } => "plot",
            Self::Error { .. } => "error",
            Self::Analysis { .. } => "analysis",
            Self::Done { .. } => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("event for request {got:?} arrived while request {expected} is in flight")]
    MismatchedRequest { expected: u64, got: Option<u64> },
    #[error("unexpected {0} event")]
    Unexpected(&'static str),
}

/// Where a request stands after an event has been observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Pending,
    /// `done` arrived, carrying the interpreter's global names.
    Done(Vec<String>),
}

/// Consumer of the events belonging to one request.
pub trait EventSink {
    fn request(&self) -> u64;

    fn observe(&mut self, event: Event) -> Result<Progress, ProtocolViolation>;

    fn check_request(&self, event: &Event) -> Result<(), ProtocolViolation> {
        let got = event.request_id();
        if got == Some(self.request()) {
            Ok(())
        } else {
            Err(ProtocolViolation::MismatchedRequest {
                expected: self.request(),
                got,
            })
        }
    }
}
