//! Persistent interpreter sessions for a conversational data-analysis
//! controller, and validation of reproducible reports built from them.
//!
//! - [`session`] owns interpreter processes and serializes requests against them.
//! - [`execution`] turns the interpreter's events into ordered results.
//! - [`controller`] enforces one code fragment per conversational turn.
//! - [`report`] parses, validates and hands off report documents.

pub mod config;
pub mod controller;
pub mod execution;
pub mod logging;
pub mod printer;
pub mod process;
pub mod report;
pub mod session;
pub mod utils;

pub use config::Config;
pub use controller::{Controller, ControllerError, ExecutionRequest, PolicyError, Submission, TurnId};
pub use execution::{Artifact, ArtifactKind, ArtifactPayload, ErrorInfo, ExecutionResult};
pub use report::{ReportBuilder, ReportDocument, ReportSynthesizer, ValidationError, VerifiedSource};
pub use session::{Lifecycle, Session, SessionError, SessionManager};
