//! Controller adapter: one code fragment per conversational turn.
//!
//! The policy is enforced here, before anything reaches a session. Each
//! turn may execute exactly one fragment; the submitted code is echoed back
//! next to the unmodified result.

use std::{
    fmt,
    sync::{Arc, Mutex as StdMutex},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    execution::ExecutionResult,
    session::{Lifecycle, Session, SessionError, SessionId, SessionManager, SessionState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutionRequest {
    pub turn: TurnId,
    pub code: String,
}

/// What the controller gets back for a turn: the result verbatim plus an
/// audit echo of the code that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub turn: TurnId,
    pub echo: String,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("turn {turn} submitted {count} code fragments; exactly one may be executed per turn")]
    MultipleFragments { turn: TurnId, count: usize },
    #[error("turn {turn} has already executed its fragment")]
    TurnAlreadyExecuted { turn: TurnId },
    #[error("turn {turn} was submitted while the fragment of turn {in_flight} is still running")]
    TurnInProgress { turn: TurnId, in_flight: TurnId },
    #[error("turn {turn} submitted an empty code fragment")]
    EmptyFragment { turn: TurnId },
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ControllerError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Policy(_) => "policy",
            Self::Session(e) => e.kind(),
        }
    }
}

/// Which turns have run and which one is running.
#[derive(Debug, Default)]
struct Ledger {
    last_executed: Option<TurnId>,
    in_flight: Option<TurnId>,
}

impl Ledger {
    fn admit(&mut self, turn: TurnId, fragments: &[&str]) -> Result<(), PolicyError> {
        if let Some(in_flight) = self.in_flight {
            return Err(PolicyError::TurnInProgress { turn, in_flight });
        }
        if self.last_executed.is_some_and(|last| turn <= last) {
            return Err(PolicyError::TurnAlreadyExecuted { turn });
        }
        match fragments {
            [] => return Err(PolicyError::EmptyFragment { turn }),
            [code] if code.trim().is_empty() => return Err(PolicyError::EmptyFragment { turn }),
            [_] => {}
            many => {
                return Err(PolicyError::MultipleFragments {
                    turn,
                    count: many.len(),
                })
            }
        }
        self.in_flight = Some(turn);
        Ok(())
    }

    /// The fragment reached the interpreter; the turn is spent.
    fn executed(&mut self, turn: TurnId) {
        self.in_flight = None;
        self.last_executed = Some(turn);
    }

    /// Nothing ran (no session could be started); the turn may be retried.
    fn release(&mut self) {
        self.in_flight = None;
    }
}

/// Holds the in-flight mark for one admitted turn. A dropped submission counts
/// as executed: the fragment may already have run.
struct TurnGuard<'a> {
    ledger: &'a StdMutex<Ledger>,
    turn: TurnId,
    settled: bool,
}

impl TurnGuard<'_> {
    fn executed(mut self) {
        self.settled = true;
        with_ledger(self.ledger, |l| l.executed(self.turn));
    }

    fn release(mut self) {
        self.settled = true;
        with_ledger(self.ledger, Ledger::release);
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            with_ledger(self.ledger, |l| l.executed(self.turn));
        }
    }
}

fn with_ledger<T>(ledger: &StdMutex<Ledger>, f: impl FnOnce(&mut Ledger) -> T) -> T {
    match ledger.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub session: Option<SessionId>,
    pub lifecycle: Option<Lifecycle>,
    pub state: Option<SessionState>,
    pub last_turn: Option<TurnId>,
}

/// Entry point for the conversational controller. Owns the interactive
/// session, creating it on first use and replacing it after it is lost.
pub struct Controller {
    manager: SessionManager,
    session: Mutex<Option<Arc<Session>>>,
    ledger: StdMutex<Ledger>,
}

impl Controller {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            session: Mutex::new(None),
            ledger: StdMutex::new(Ledger::default()),
        }
    }

    pub async fn submit(&self, request: ExecutionRequest) -> Result<Submission, ControllerError> {
        self.submit_turn(request.turn, &[request.code]).await
    }

    /// Execute the single fragment of `turn`. More than one fragment is a
    /// policy violation and none of them runs.
    pub async fn submit_turn<S: AsRef<str>>(
        &self,
        turn: TurnId,
        fragments: &[S],
    ) -> Result<Submission, ControllerError> {
        let borrowed: Vec<&str> = fragments.iter().map(AsRef::as_ref).collect();
        if let Err(e) = with_ledger(&self.ledger, |l| l.admit(turn, &borrowed)) {
            warn!(turn = %turn, error = %e, "submission rejected");
            return Err(e.into());
        }
        let guard = TurnGuard {
            ledger: &self.ledger,
            turn,
            settled: false,
        };
        let code = borrowed[0];

        let session = match self.live_session().await {
            Ok(session) => session,
            Err(e) => {
                guard.release();
                return Err(e.into());
            }
        };

        info!(turn = %turn, session = %session.id(), "executing turn");
        let outcome = session.execute(code).await;
        guard.executed();
        let result = outcome?;

        Ok(Submission {
            turn,
            echo: code.to_string(),
            result,
        })
    }

    /// Interrupt the fragment that is currently running, if any.
    pub async fn interrupt(&self) -> Result<(), ControllerError> {
        let session = self.session.lock().await.clone();
        match session {
            Some(session) => Ok(session.interrupt()?),
            None => Ok(()),
        }
    }

    /// Replace the interactive session with a fresh one. All bindings are lost.
    pub async fn restart(&self) -> Result<SessionId, ControllerError> {
        let mut slot = self.session.lock().await;
        if let Some(old) = slot.take() {
            old.terminate().await;
        }
        let session = Arc::new(self.manager.start().await?);
        let id = session.id();
        *slot = Some(session);
        info!(session = %id, "session restarted");
        Ok(id)
    }

    pub async fn status(&self) -> ControllerStatus {
        let session = self.session.lock().await.clone();
        let last_turn = with_ledger(&self.ledger, |l| l.last_executed);
        match session {
            Some(session) => ControllerStatus {
                session: Some(session.id()),
                lifecycle: Some(session.lifecycle()),
                state: Some(session.state()),
                last_turn,
            },
            None => ControllerStatus {
                session: None,
                lifecycle: None,
                state: None,
                last_turn,
            },
        }
    }

    pub async fn shutdown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.terminate().await;
        }
    }

    async fn live_session(&self) -> Result<Arc<Session>, SessionError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.lifecycle() != Lifecycle::Terminated {
                return Ok(session.clone());
            }
            info!(session = %session.id(), "previous session is terminated; starting a new one");
        }
        let session = Arc::new(self.manager.start().await?);
        *slot = Some(session.clone());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_fragment_per_turn() {
        let mut ledger = Ledger::default();
        let err = ledger.admit(TurnId(1), &["x = 1", "x + 1"]).unwrap_err();
        assert_eq!(err, PolicyError::MultipleFragments { turn: TurnId(1), count: 2 });
        assert_eq!(ledger.in_flight, None);

        ledger.admit(TurnId(1), &["x = 1"]).unwrap();
        ledger.executed(TurnId(1));
        assert_eq!(
            ledger.admit(TurnId(1), &["x + 1"]).unwrap_err(),
            PolicyError::TurnAlreadyExecuted { turn: TurnId(1) }
        );
        ledger.admit(TurnId(2), &["x + 1"]).unwrap();
    }

    #[test]
    fn second_submission_while_running_is_rejected() {
        let mut ledger = Ledger::default();
        ledger.admit(TurnId(3), &["import time; time.sleep(1)"]).unwrap();
        assert_eq!(
            ledger.admit(TurnId(4), &["1"]).unwrap_err(),
            PolicyError::TurnInProgress {
                turn: TurnId(4),
                in_flight: TurnId(3)
            }
        );
    }

    #[test]
    fn empty_fragments_are_rejected() {
        let mut ledger = Ledger::default();
        let none: [&str; 0] = [];
        assert!(matches!(ledger.admit(TurnId(1), &none), Err(PolicyError::EmptyFragment { .. })));
        assert!(matches!(ledger.admit(TurnId(1), &["  \n"]), Err(PolicyError::EmptyFragment { .. })));
    }

    #[test]
    fn released_turn_can_be_retried() {
        let mut ledger = Ledger::default();
        ledger.admit(TurnId(1), &["1"]).unwrap();
        ledger.release();
        ledger.admit(TurnId(1), &["1"]).unwrap();
    }

    #[test]
    fn dropped_guard_spends_the_turn() {
        let ledger = StdMutex::new(Ledger::default());
        with_ledger(&ledger, |l| l.admit(TurnId(5), &["1"])).unwrap();
        drop(TurnGuard {
            ledger: &ledger,
            turn: TurnId(5),
            settled: false,
        });
        let l = ledger.lock().unwrap();
        assert_eq!(l.in_flight, None);
        assert_eq!(l.last_executed, Some(TurnId(5)));
    }

    #[test]
    fn error_kinds_are_stable() {
        let policy: ControllerError = PolicyError::EmptyFragment { turn: TurnId(1) }.into();
        assert_eq!(policy.kind(), "policy");
        let crash: ControllerError = SessionError::Start { reason: "x".into() }.into();
        assert_eq!(crash.kind(), "session_start");
    }
}
