//! Interpreter process management (startup/IO/signals).

use std::{fmt, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};

pub mod python;

pub use python::DriverSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterType {
    Python,
}

impl fmt::Display for InterpreterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => f.write_str("python"),
        }
    }
}

impl FromStr for InterpreterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Self::Python),
            other => Err(format!("unsupported interpreter: {other}")),
        }
    }
}

/// Everything needed to spawn one interpreter process.
#[derive(Debug, Clone)]
pub struct Launch {
    pub interpreter: InterpreterType,
    pub program: String,
    pub working_dir: Option<PathBuf>,
    pub settings: DriverSettings,
}

/// The pipes of a spawned interpreter. Only the session that spawned it holds one.
pub struct ProcessHandle {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
    pub pid: Option<u32>,
}

pub async fn start(launch: &Launch) -> io::Result<ProcessHandle> {
    match launch.interpreter {
        InterpreterType::Python => python::start_python(launch).await,
    }
}

/// Deliver an interrupt (SIGINT) to the interpreter so the running fragment
/// raises its native interrupt error.
#[cfg(unix)]
pub fn interrupt(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(raw), Signal::SIGINT).map_err(io::Error::from)
}

#[cfg(not(unix))]
pub fn interrupt(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interrupting the interpreter is only supported on unix",
    ))
}
