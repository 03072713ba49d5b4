//! Static name analysis of a fragment, computed by the interpreter's own parser
//! without executing anything.

use serde::Serialize;

use crate::execution::{
    protocol::{Event, EventSink, Progress, ProtocolViolation},
    ErrorInfo,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Analysis {
    /// Names read anywhere in the fragment.
    pub loads: Vec<String>,
    /// Names bound anywhere in the fragment (assignments, imports, defs, parameters).
    pub stores: Vec<String>,
    /// String literals passed as the first argument to data-loading calls.
    pub sources: Vec<String>,
    /// Modules imported with `from m import *`. What they bind is unknown
    /// until they run.
    pub star_imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Parsed(Analysis),
    /// The fragment does not parse.
    Syntax(ErrorInfo),
}

pub(crate) struct AnalysisSink {
    request: u64,
    outcome: Option<AnalysisOutcome>,
}

impl AnalysisSink {
    pub(crate) fn new(request: u64) -> Self {
        Self { request, outcome: None }
    }

    pub(crate) fn finish(self) -> Result<AnalysisOutcome, ProtocolViolation> {
        self.outcome.ok_or(ProtocolViolation::Unexpected("done"))
    }
}

impl EventSink for AnalysisSink {
    fn request(&self) -> u64 {
        self.request
    }

    fn observe(&mut self, event: Event) -> Result<Progress, ProtocolViolation> {
        self.check_request(&event)?;
        match event {
            Event::Analysis {
                loads,
                stores,
                sources,
                star_imports,
                ..
            } => {
                self.outcome = Some(AnalysisOutcome::Parsed(Analysis {
                    loads,
                    stores,
                    sources,
                    star_imports,
                }));
            }
            Event::Error {
                ename,
                message,
                traceback,
                ..
            } => {
                self.outcome = Some(AnalysisOutcome::Syntax(ErrorInfo {
                    name: ename,
                    message,
                    trace: traceback,
                }));
            }
            Event::Done { names, .. } => return Ok(Progress::Done(names)),
            other => return Err(ProtocolViolation::Unexpected(other.kind())),
        }
        Ok(Progress::Pending)
    }
}
