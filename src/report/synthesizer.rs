//! Validation of report documents against a fresh, disposable session.
//!
//! A document passes when every chunk parses, every name a chunk reads is
//! bound earlier in the document (or is a builtin), and the whole document
//! then runs top to bottom without an error, inline expressions included.
//! Only a passing validation yields a [`VerifiedSource`].

use serde::Serialize;
use tracing::{info, warn};

use super::{
    references::{first_unresolved, Fragment},
    ReportDocument, ValidationError,
};
use crate::{
    config::Config,
    execution::ExecutionResult,
    session::{Analysis, AnalysisOutcome, Session, SessionManager},
};

#[derive(Debug, Clone, Serialize)]
pub struct ChunkTrace {
    pub chunk: String,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedInline {
    /// The chunk whose state the expression was evaluated against.
    pub chunk: String,
    pub expression: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub kind: &'static str,
    pub chunk: Option<String>,
    pub message: String,
}

impl From<&ValidationError> for FailureSummary {
    fn from(e: &ValidationError) -> Self {
        Self {
            kind: e.kind(),
            chunk: e.chunk().map(str::to_string),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub failure: Option<FailureSummary>,
    /// Results of the chunks that ran, in document order.
    pub chunks: Vec<ChunkTrace>,
    pub inline: Vec<ResolvedInline>,
    /// Data files the document loads itself.
    pub data_sources: Vec<String>,
    /// md5 of the validated source.
    pub fingerprint: String,
}

/// Document source that has passed validation. There is no other way to
/// obtain one, so holding one proves the source is reproducible.
#[derive(Debug, Clone)]
pub struct VerifiedSource {
    text: String,
    fingerprint: String,
    preview: String,
}

impl VerifiedSource {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The source with inline expressions replaced by their validated values.
    pub fn preview(&self) -> &str {
        &self.preview
    }

    pub fn into_string(self) -> String {
        self.text
    }

    #[cfg(test)]
    pub(crate) fn unchecked(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fingerprint: fingerprint(text),
            preview: text.to_string(),
        }
    }
}

pub struct Synthesis {
    report: ValidationReport,
    outcome: Result<VerifiedSource, ValidationError>,
}

impl Synthesis {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn error(&self) -> Option<&ValidationError> {
        self.outcome.as_ref().err()
    }

    pub fn verified(&self) -> Option<&VerifiedSource> {
        self.outcome.as_ref().ok()
    }

    pub fn into_parts(self) -> (ValidationReport, Result<VerifiedSource, ValidationError>) {
        (self.report, self.outcome)
    }
}

#[derive(Default)]
struct Trace {
    chunks: Vec<ChunkTrace>,
    inline: Vec<ResolvedInline>,
    data_sources: Vec<String>,
}

pub struct ReportSynthesizer {
    sessions: SessionManager,
}

impl ReportSynthesizer {
    /// Every validation starts its own interpreter from `sessions` and
    /// terminates it afterwards.
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(SessionManager::from_config(cfg))
    }

    pub async fn validate(&self, document: &ReportDocument) -> Synthesis {
        let source = document.render();
        let fingerprint = fingerprint(&source);
        let mut trace = Trace::default();

        let outcome = match self.sessions.start().await {
            Ok(session) => {
                info!(session = %session.id(), chunks = document.chunks().count(), "validating report");
                let outcome = check(&session, document, &mut trace).await;
                self.sessions.terminate(&session).await;
                outcome
            }
            Err(e) => Err(ValidationError::Session(e)),
        };

        let failure = outcome.as_ref().err().map(FailureSummary::from);
        match &failure {
            Some(f) => warn!(kind = f.kind, chunk = ?f.chunk, "report validation failed"),
            None => info!(fingerprint = %fingerprint, "report validated"),
        }

        let report = ValidationReport {
            passed: failure.is_none(),
            failure,
            chunks: trace.chunks,
            inline: trace.inline,
            data_sources: trace.data_sources,
            fingerprint: fingerprint.clone(),
        };
        let outcome = outcome.map(|()| VerifiedSource {
            preview: document.resolve_inline(&report.inline),
            text: source,
            fingerprint,
        });
        Synthesis { report, outcome }
    }
}

async fn check(session: &Session, document: &ReportDocument, trace: &mut Trace) -> Result<(), ValidationError> {
    // Static: parse everything and resolve names before running anything.
    let mut analyses: Vec<(&str, Analysis)> = Vec::new();
    for chunk in document.chunks() {
        let parts = std::iter::once(chunk.source()).chain(chunk.inline().iter().map(|e| e.source()));
        for fragment in parts {
            match session.analyze(fragment).await? {
                AnalysisOutcome::Parsed(analysis) => analyses.push((chunk.label(), analysis)),
                AnalysisOutcome::Syntax(error) => {
                    return Err(ValidationError::Syntax {
                        chunk: chunk.label().to_string(),
                        fragment: fragment.to_string(),
                        error,
                    })
                }
            }
        }
    }
    for (_, analysis) in &analyses {
        for source in &analysis.sources {
            if !trace.data_sources.contains(source) {
                trace.data_sources.push(source.clone());
            }
        }
    }
    let fragments: Vec<Fragment<'_>> = analyses
        .iter()
        .map(|(chunk, analysis)| Fragment { chunk: *chunk, analysis })
        .collect();
    if let Some((chunk, names)) = first_unresolved(&fragments, session.builtins()) {
        return Err(ValidationError::UnresolvedReference {
            chunk: chunk.to_string(),
            names,
        });
    }
    info!(sources = trace.data_sources.len(), "static check passed");

    // Dynamic: run the document top to bottom.
    for chunk in document.chunks() {
        let result = session.execute(chunk.source()).await?;
        trace.chunks.push(ChunkTrace {
            chunk: chunk.label().to_string(),
            result: result.clone(),
        });
        if !result.is_success() {
            return Err(ValidationError::Runtime {
                chunk: chunk.label().to_string(),
                fragment: chunk.source().to_string(),
                result: Box::new(result),
            });
        }

        for expr in chunk.inline() {
            let result = session.execute(expr.source()).await?;
            if !result.is_success() {
                return Err(ValidationError::Runtime {
                    chunk: chunk.label().to_string(),
                    fragment: expr.source().to_string(),
                    result: Box::new(result),
                });
            }
            let Some(value) = result.value() else {
                return Err(ValidationError::InlineWithoutValue {
                    chunk: chunk.label().to_string(),
                    expression: expr.source().to_string(),
                });
            };
            trace.inline.push(ResolvedInline {
                chunk: chunk.label().to_string(),
                expression: expr.source().to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

fn fingerprint(source: &str) -> String {
    format!("{:x}", md5::compute(source.as_bytes()))
}
