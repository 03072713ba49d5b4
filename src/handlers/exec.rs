//! One-shot execution of a fragment in a fresh session.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::debug;

use datachat::{config::Config, printer::print_markdown, session::SessionManager};

use super::PlotSink;

/// Returns whether the fragment ran without an error.
pub async fn run(
    cfg: &Config,
    code: &str,
    json: bool,
    plots_dir: Option<PathBuf>,
    markdown: bool,
) -> Result<bool> {
    if code.trim().is_empty() {
        bail!("Provide code as an argument or via stdin");
    }

    let manager = SessionManager::from_config(cfg);
    let session = manager.start().await.context("could not start the interpreter")?;
    debug!(session = %session.id(), version = session.interpreter_version(), "exec session ready");
    let outcome = manager.execute(&session, code).await;
    manager.terminate(&session).await;
    let result = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let mut plots = PlotSink::new(plots_dir)?;
        print_markdown(&plots.transcript(Some(code), &result)?, markdown);
    }
    Ok(result.is_success())
}
