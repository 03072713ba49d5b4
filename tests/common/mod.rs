#![allow(dead_code)]

use std::{
    process::{Command, Stdio},
    time::Duration,
};

use datachat::session::{SessionConfig, SessionManager};

/// These tests drive a real interpreter. Without `python3` on PATH they print
/// a note and pass.
pub fn skip_without_python() -> bool {
    let found = Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !found {
        println!("python3 not found on PATH; skipping");
    }
    !found
}

/// Like `skip_without_python`, for tests that also need a third-party module.
pub fn skip_without_module(module: &str) -> bool {
    if skip_without_python() {
        return true;
    }
    let found = Command::new("python3")
        .args(["-c", &format!("import {module}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !found {
        println!("python3 cannot import {module}; skipping");
    }
    !found
}

pub fn manager() -> SessionManager {
    SessionManager::new(SessionConfig::default())
}

/// Sessions that interrupt a fragment after `limit` and kill the interpreter
/// `grace` later.
pub fn manager_with_timeout(limit: Duration, grace: Duration) -> SessionManager {
    let mut config = SessionConfig::default();
    config.execution_timeout = Some(limit);
    config.interrupt_grace = grace;
    SessionManager::new(config)
}

pub fn manager_with(adjust: impl FnOnce(&mut SessionConfig)) -> SessionManager {
    let mut config = SessionConfig::default();
    adjust(&mut config);
    SessionManager::new(config)
}
