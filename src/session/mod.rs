//! Session manager: owns persistent interpreter processes and serializes
//! execution requests against each of them.
//!
//! Concurrent `execute` calls on one [`Session`] are queued FIFO behind a fair
//! lock; none is rejected. A session is `Busy` strictly while a request is in
//! flight and returns to `Ready`, or `Terminated` when the interpreter is lost.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdin, ChildStdout},
    sync::{watch, Mutex},
    time::{timeout, timeout_at, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    execution::{
        protocol::{Event, EventSink, Progress, ProtocolViolation, Request},
        DisplayMode, DisplayRule, ExecutionResult, Multiplexer,
    },
    process::{self, DriverSettings, InterpreterType, Launch},
};

mod analysis;
mod error;

pub use analysis::{Analysis, AnalysisOutcome};
pub use error::SessionError;

use analysis::AnalysisSink;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Starting,
    Ready,
    Busy,
    Terminated,
}

/// The interpreter's accumulated bindings, as seen from outside. Only a
/// completed `execute` changes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    execution_count: u64,
    names: Vec<String>,
}

impl SessionState {
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Global names bound in the interpreter, sorted.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    fn record(&mut self, names: Vec<String>) {
        self.execution_count += 1;
        self.names = names;
        self.names.sort();
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub launch: Launch,
    pub startup_timeout: Duration,
    /// `None` lets a fragment run forever.
    pub execution_timeout: Option<Duration>,
    /// How long an interrupted fragment gets to unwind before the process is killed.
    pub interrupt_grace: Duration,
    pub display: DisplayRule,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            launch: Launch {
                interpreter: InterpreterType::Python,
                program: "python3".to_string(),
                working_dir: None,
                settings: DriverSettings::default(),
            },
            startup_timeout: Duration::from_secs(30),
            execution_timeout: None,
            interrupt_grace: Duration::from_secs(5),
            display: DisplayRule::default(),
        }
    }
}

impl SessionConfig {
    /// Invalid values fall back to their defaults with a warning.
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        let settings = DriverSettings::default();

        let interpreter = match cfg.get("INTERPRETER") {
            Some(raw) => raw.parse::<InterpreterType>().unwrap_or_else(|e| {
                warn!(error = %e, "falling back to python");
                InterpreterType::Python
            }),
            None => InterpreterType::Python,
        };
        let mode = match cfg.get("DISPLAY_MODE") {
            Some(raw) => raw.parse::<DisplayMode>().unwrap_or_else(|e| {
                warn!(error = %e, "falling back to the default display mode");
                DisplayMode::default()
            }),
            None => DisplayMode::default(),
        };

        Self {
            launch: Launch {
                interpreter,
                program: cfg
                    .get("PYTHON_BIN")
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or(defaults.launch.program),
                working_dir: cfg.get_path("WORKING_DIR"),
                settings: DriverSettings {
                    plot_width: cfg.get_f64("PLOT_WIDTH").unwrap_or(settings.plot_width),
                    plot_height: cfg.get_f64("PLOT_HEIGHT").unwrap_or(settings.plot_height),
                    plot_dpi: cfg.get_f64("PLOT_DPI").unwrap_or(settings.plot_dpi),
                    table_max_rows: cfg.get_usize("TABLE_MAX_ROWS").unwrap_or(settings.table_max_rows),
                },
            },
            startup_timeout: cfg
                .get_duration_secs("STARTUP_TIMEOUT")
                .unwrap_or(defaults.startup_timeout),
            execution_timeout: cfg.get_duration_secs("EXECUTION_TIMEOUT"),
            interrupt_grace: cfg
                .get_duration_secs("INTERRUPT_GRACE")
                .unwrap_or(defaults.interrupt_grace),
            display: DisplayRule {
                mode,
                ignore_target: cfg.get("IGNORE_TARGET").unwrap_or(defaults.display.ignore_target),
            },
        }
    }
}

/// Factory for sessions. Cloning is cheap; every clone starts independent
/// sessions that share nothing but configuration.
#[derive(Debug, Clone)]
pub struct SessionManager {
    config: Arc<SessionConfig>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(SessionConfig::from_config(cfg))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawn an interpreter and wait for its handshake.
    pub async fn start(&self) -> Result<Session, SessionError> {
        Session::start(self.config.clone()).await
    }

    pub async fn execute(&self, session: &Session, code: &str) -> Result<ExecutionResult, SessionError> {
        session.execute(code).await
    }

    pub async fn terminate(&self, session: &Session) {
        session.terminate().await
    }
}

struct Process {
    stdin: ChildStdin,
    events: Lines<BufReader<ChildStdout>>,
}

/// Everything guarded by the request lock.
struct Channel {
    process: Option<Process>,
    next_request: u64,
}

impl Channel {
    fn next_request(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }
}

/// Why an exchange with the interpreter broke off.
enum Failure {
    Io(std::io::Error),
    Eof,
    Decode { line: String, error: serde_json::Error },
    Violation(ProtocolViolation),
    Timeout(Duration),
}

impl From<ProtocolViolation> for Failure {
    fn from(v: ProtocolViolation) -> Self {
        Self::Violation(v)
    }
}

/// A live interpreter process plus its lifecycle. Only the session touches
/// the process; callers see structured results.
pub struct Session {
    id: SessionId,
    pid: Option<u32>,
    version: String,
    builtins: Vec<String>,
    config: Arc<SessionConfig>,
    channel: Mutex<Channel>,
    child: StdMutex<Option<Child>>,
    state: StdMutex<SessionState>,
    lifecycle: watch::Sender<Lifecycle>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl Session {
    async fn start(config: Arc<SessionConfig>) -> Result<Self, SessionError> {
        let id = SessionId::next();
        let (lifecycle, _) = watch::channel(Lifecycle::Starting);

        let handle = process::start(&config.launch).await.map_err(|e| SessionError::Start {
            reason: format!("could not spawn {}: {e}", config.launch.program),
        })?;
        if let Some(stderr) = handle.stderr {
            forward_stderr(id, stderr);
        }
        let mut child = handle.child;
        let mut events = BufReader::new(handle.stdout).lines();

        let (version, builtins, reported_pid) = match timeout(config.startup_timeout, events.next_line()).await {
            Ok(Ok(Some(line))) => match Event::parse(&line) {
                Ok(Event::Ready { pid, version, builtins }) => (version, builtins, pid),
                Ok(other) => {
                    return Err(SessionError::Start {
                        reason: format!("expected handshake, got {} event", other.kind()),
                    })
                }
                Err(e) => {
                    return Err(SessionError::Start {
                        reason: format!("undecodable handshake {line:?}: {e}"),
                    })
                }
            },
            Ok(Ok(None)) => {
                let status = exit_status(&mut child).await;
                return Err(SessionError::Start {
                    reason: format!("interpreter exited before the handshake ({status})"),
                });
            }
            Ok(Err(e)) => return Err(SessionError::Start { reason: e.to_string() }),
            Err(_) => {
                let _ = child.start_kill();
                return Err(SessionError::Start {
                    reason: format!("no handshake within {:?}", config.startup_timeout),
                });
            }
        };

        let pid = handle.pid.or(Some(reported_pid));
        info!(
            session = %id,
            pid = ?pid,
            interpreter = %config.launch.interpreter,
            version = %version,
            "session started"
        );
        lifecycle.send_replace(Lifecycle::Ready);

        Ok(Self {
            id,
            pid,
            version,
            builtins,
            config,
            channel: Mutex::new(Channel {
                process: Some(Process {
                    stdin: handle.stdin,
                    events,
                }),
                next_request: 0,
            }),
            child: StdMutex::new(Some(child)),
            state: StdMutex::new(SessionState::default()),
            lifecycle,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn interpreter_version(&self) -> &str {
        &self.version
    }

    /// Names the interpreter resolves without any binding of its own.
    pub fn builtins(&self) -> &[String] {
        &self.builtins
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// A snapshot of the bindings as of the last completed request. Does not
    /// wait for a running one.
    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Run one fragment and return its complete result. Waits for earlier
    /// requests on this session first.
    ///
    /// Errors raised by the fragment are part of the `Ok` result; `Err` means
    /// the session itself failed and is now `Terminated`.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult, SessionError> {
        let mut channel = self.channel.lock().await;
        self.ensure_live(&channel)?;
        let request = channel.next_request();
        let started = Instant::now();
        let mut mux = Multiplexer::new(request, self.config.display.clone());

        let exchanged = self
            .exchange(&mut channel, Request::Execute { id: request, code }, &mut mux, true)
            .await;
        match exchanged {
            Ok(names) => {
                match self.state.lock() {
                    Ok(mut state) => state.record(names),
                    Err(poisoned) => poisoned.into_inner().record(names),
                }
                let result = mux.finish();
                info!(
                    session = %self.id,
                    request,
                    artifacts = result.artifacts().len(),
                    success = result.is_success(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fragment executed"
                );
                Ok(result)
            }
            Err(failure) => Err(self.fail(&mut channel, failure, code).await),
        }
    }

    /// Parse a fragment with the interpreter's own grammar and report the names
    /// it reads and binds. Nothing is executed.
    pub async fn analyze(&self, code: &str) -> Result<AnalysisOutcome, SessionError> {
        let mut channel = self.channel.lock().await;
        self.ensure_live(&channel)?;
        let request = channel.next_request();
        let mut sink = AnalysisSink::new(request);

        let exchanged = self
            .exchange(&mut channel, Request::Analyze { id: request, code }, &mut sink, false)
            .await;
        match exchanged.and_then(|_| sink.finish().map_err(Failure::from)) {
            Ok(outcome) => Ok(outcome),
            Err(failure) => Err(self.fail(&mut channel, failure, code).await),
        }
    }

    /// Ask the running fragment to abort. The fragment ends with the
    /// interpreter's native interrupt error and the session stays usable.
    pub fn interrupt(&self) -> Result<(), SessionError> {
        match self.lifecycle() {
            Lifecycle::Terminated => return Err(SessionError::Terminated(self.id)),
            Lifecycle::Busy => {}
            Lifecycle::Starting | Lifecycle::Ready => {
                debug!(session = %self.id, "nothing to interrupt");
                return Ok(());
            }
        }
        let pid = self.pid.ok_or(SessionError::Terminated(self.id))?;
        process::interrupt(pid)?;
        info!(session = %self.id, pid, "interrupt delivered");
        Ok(())
    }

    /// Kill the interpreter. Idempotent; an in-flight request fails with
    /// [`SessionError::Terminated`].
    pub async fn terminate(&self) {
        let previous = self.lifecycle.send_replace(Lifecycle::Terminated);
        let child = self.take_child();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        if previous != Lifecycle::Terminated {
            info!(session = %self.id, "session terminated");
        }
    }

    /// Write one request and feed its events to `sink` until `done`. The
    /// session is Busy for exactly this long.
    async fn exchange<S: EventSink>(
        &self,
        channel: &mut Channel,
        request: Request<'_>,
        sink: &mut S,
        interruptible: bool,
    ) -> Result<Vec<String>, Failure> {
        let Some(process) = channel.process.as_mut() else {
            return Err(Failure::Eof);
        };
        let mut in_flight = InFlight::arm(self);
        let outcome = self.round_trip(process, request, sink, interruptible).await;
        in_flight.settle(outcome.is_ok());
        outcome
    }

    async fn round_trip<S: EventSink>(
        &self,
        process: &mut Process,
        request: Request<'_>,
        sink: &mut S,
        interruptible: bool,
    ) -> Result<Vec<String>, Failure> {
        let line = request
            .to_line()
            .map_err(|e| Failure::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        process.stdin.write_all(line.as_bytes()).await.map_err(Failure::Io)?;
        process.stdin.flush().await.map_err(Failure::Io)?;

        let started = Instant::now();
        let mut deadline = self
            .config
            .execution_timeout
            .filter(|_| interruptible)
            .map(|limit| (started + limit, false));

        loop {
            let next = match deadline {
                None => process.events.next_line().await,
                Some((at, interrupted)) => match timeout_at(at, process.events.next_line()).await {
                    Ok(next) => next,
                    Err(_) if interrupted => return Err(Failure::Timeout(started.elapsed())),
                    Err(_) => {
                        warn!(session = %self.id, request = request.id(), "execution timed out; interrupting");
                        if let Some(pid) = self.pid {
                            if let Err(e) = process::interrupt(pid) {
                                warn!(session = %self.id, error = %e, "could not deliver interrupt");
                            }
                        }
                        deadline = Some((Instant::now() + self.config.interrupt_grace, true));
                        continue;
                    }
                },
            };
            let line = next.map_err(Failure::Io)?.ok_or(Failure::Eof)?;
            if line.trim().is_empty() {
                continue;
            }
            let event = Event::parse(&line).map_err(|error| Failure::Decode { line, error })?;
            if let Progress::Done(names) = sink.observe(event)? {
                return Ok(names);
            }
        }
    }

    /// The session is unusable after any failed exchange: drop the pipes, kill
    /// the process and describe what happened.
    async fn fail(&self, channel: &mut Channel, failure: Failure, fragment: &str) -> SessionError {
        let previous = self.lifecycle.send_replace(Lifecycle::Terminated);
        channel.process = None;
        if previous == Lifecycle::Terminated {
            return SessionError::Terminated(self.id);
        }

        let status = match self.take_child() {
            Some(mut child) => {
                if matches!(failure, Failure::Eof | Failure::Io(_)) {
                    exit_status(&mut child).await
                } else {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    "killed".to_string()
                }
            }
            None => "unknown".to_string(),
        };

        let error = match failure {
            Failure::Eof => SessionError::Crashed {
                session: self.id,
                status,
                reason: "interpreter closed its output".to_string(),
                fragment: fragment.to_string(),
            },
            Failure::Io(e) => SessionError::Crashed {
                session: self.id,
                status,
                reason: e.to_string(),
                fragment: fragment.to_string(),
            },
            Failure::Decode { line, error } => SessionError::Protocol {
                session: self.id,
                reason: format!("undecodable event {line:?}: {error}"),
            },
            Failure::Violation(v) => SessionError::Protocol {
                session: self.id,
                reason: v.to_string(),
            },
            Failure::Timeout(elapsed) => SessionError::Timeout {
                session: self.id,
                elapsed,
                fragment: fragment.to_string(),
            },
        };
        warn!(session = %self.id, error = %error, "session lost");
        error
    }

    fn ensure_live(&self, channel: &Channel) -> Result<(), SessionError> {
        if channel.process.is_none() || self.lifecycle() == Lifecycle::Terminated {
            return Err(SessionError::Terminated(self.id));
        }
        Ok(())
    }

    fn take_child(&self) -> Option<Child> {
        match self.child.lock() {
            Ok(mut child) => child.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Called when an in-flight request is abandoned: the event stream is out
    /// of step with the request ids, so the process cannot be reused.
    fn abandon(&self) {
        self.lifecycle.send_replace(Lifecycle::Terminated);
        if let Some(mut child) = self.take_child() {
            let _ = child.start_kill();
        }
        warn!(session = %self.id, "request abandoned mid-flight; session terminated");
    }
}

/// Marks the session Busy for the duration of one request. Dropped without
/// being settled means the request future was abandoned mid-flight.
struct InFlight<'a> {
    session: &'a Session,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn arm(session: &'a Session) -> Self {
        session.lifecycle.send_replace(Lifecycle::Busy);
        Self { session, armed: true }
    }

    /// On success the session is Ready again; on failure it stays Busy until
    /// the caller has recorded the failure.
    fn settle(&mut self, success: bool) {
        self.armed = false;
        if success {
            self.session.lifecycle.send_if_modified(|state| {
                if *state == Lifecycle::Busy {
                    *state = Lifecycle::Ready;
                    true
                } else {
                    false
                }
            });
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.abandon();
        }
    }
}

fn forward_stderr(id: SessionId, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "datachat::interpreter", session = %id, "{line}");
        }
    });
}

/// Exit status of a child that is expected to be exiting; kills it if it
/// lingers.
async fn exit_status(child: &mut Child) -> String {
    match timeout(Duration::from_secs(2), child.wait()).await {
        Ok(Ok(status)) => status.to_string(),
        Ok(Err(e)) => format!("unknown: {e}"),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            "killed".to_string()
        }
    }
}
