use std::{io, time::Duration};

use super::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The interpreter could not be spawned or never completed its handshake.
    /// Retryable: a later `start` may succeed.
    #[error("failed to start interpreter: {reason}")]
    Start { reason: String },

    /// The interpreter died while a fragment was in flight. Its bindings are lost.
    #[error("{session} crashed ({status}) while executing a fragment: {reason}")]
    Crashed {
        session: SessionId,
        status: String,
        reason: String,
        fragment: String,
    },

    #[error("{0} is terminated; start a new session")]
    Terminated(SessionId),

    /// The fragment outlived the execution timeout and ignored the interrupt.
    #[error("{session} did not finish within {elapsed:?} and was killed")]
    Timeout {
        session: SessionId,
        elapsed: Duration,
        fragment: String,
    },

    #[error("protocol failure on {session}: {reason}")]
    Protocol { session: SessionId, reason: String },

    #[error("interpreter i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Stable identifier used on the controller boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "session_start",
            Self::Crashed { .. } => "session_crash",
            Self::Terminated(_) => "session_terminated",
            Self::Timeout { .. } => "timeout",
            Self::Protocol { .. } => "protocol",
            Self::Io(_) => "io",
        }
    }

    /// The fragment that was in flight when the session was lost, if any.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            Self::Crashed { fragment, .. } | Self::Timeout { fragment, .. } => Some(fragment),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Start { .. })
    }
}
