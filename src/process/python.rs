//! Python interpreter process bootstrap and I/O glue.

use std::io;

use serde::Serialize;
use tokio::process::{Child, Command};

use super::{Launch, ProcessHandle};

/// The driver speaks NDJSON on the process's original stdout and reads
/// requests from stdin; user output is captured inside the interpreter.
const DRIVER: &str = include_str!("driver.py");

/// Settings passed to the driver as its single argument (JSON).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverSettings {
    pub plot_width: f64,
    pub plot_height: f64,
    pub plot_dpi: f64,
    pub table_max_rows: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            plot_width: 6.4,
            plot_height: 4.8,
            plot_dpi: 100.0,
            table_max_rows: 50,
        }
    }
}

pub async fn start_python(launch: &Launch) -> io::Result<ProcessHandle> {
    let settings = serde_json::to_string(&launch.settings)?;

    let mut cmd = Command::new(&launch.program);
    cmd.arg("-u") // unbuffered
        .arg("-c")
        .arg(DRIVER)
        .arg(settings)
        .env("PYTHONUNBUFFERED", "1")
        .env("PYTHONIOENCODING", "utf-8")
        .env("MPLBACKEND", "Agg")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &launch.working_dir {
        cmd.current_dir(dir);
    }
    // Own process group: a terminal Ctrl-C reaches us, and we decide what
    // the interpreter gets.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child: Child = cmd.spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdout"))?;
    let stderr = child.stderr.take();
    let pid = child.id();

    Ok(ProcessHandle {
        child,
        stdin,
        stdout,
        stderr,
        pid,
    })
}
