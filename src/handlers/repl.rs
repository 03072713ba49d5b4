//! Line-oriented REPL: one fragment per turn against a persistent session.

use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::warn;

use datachat::{
    config::Config,
    controller::{Controller, TurnId},
    printer::{print_markdown, TextPrinter},
    session::SessionManager,
};

use super::PlotSink;

const BANNER: &str = "datachat repl: end a fragment with an empty line. \
Ctrl-C interrupts a running fragment; .restart, .state and .exit are commands.";

pub async fn run(cfg: &Config, plots_dir: Option<PathBuf>, markdown: bool) -> Result<()> {
    let controller = Controller::new(SessionManager::from_config(cfg));
    let mut plots = PlotSink::new(plots_dir)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let notice = TextPrinter { color: Some("cyan") };
    let failure = TextPrinter { color: Some("red") };
    let mut turn = 0u64;

    notice.eprint(BANNER);
    loop {
        let fragment = tokio::select! {
            fragment = read_fragment(&mut lines) => fragment?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(fragment) = fragment else { break };

        match fragment.trim() {
            "" => continue,
            ".exit" | ".quit" => break,
            ".restart" => {
                match controller.restart().await {
                    Ok(id) => notice.eprint(&format!("restarted: {id}")),
                    Err(e) => failure.eprint(&format!("{}: {e}", e.kind())),
                }
                continue;
            }
            ".state" => {
                let status = controller.status().await;
                println!("{}", serde_json::to_string_pretty(&status)?);
                continue;
            }
            _ => {}
        }

        turn += 1;
        let fragments = [fragment.as_str()];
        let submission = controller.submit_turn(TurnId(turn), &fragments);
        tokio::pin!(submission);
        let outcome = loop {
            tokio::select! {
                outcome = &mut submission => break outcome,
                _ = tokio::signal::ctrl_c() => {
                    if let Err(e) = controller.interrupt().await {
                        warn!(error = %e, "interrupt failed");
                    }
                }
            }
        };

        match outcome {
            Ok(submission) => print_markdown(&plots.transcript(None, &submission.result)?, markdown),
            Err(e) => failure.eprint(&format!("{}: {e}", e.kind())),
        }
    }

    controller.shutdown().await;
    Ok(())
}

/// Lines up to the first empty one. `None` at end of input with nothing read.
async fn read_fragment<R>(lines: &mut Lines<R>) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut fragment = String::new();
    prompt(">>> ")?;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            if fragment.is_empty() {
                prompt(">>> ")?;
                continue;
            }
            return Ok(Some(fragment));
        }
        // Commands are single lines.
        if fragment.is_empty() && line.starts_with('.') {
            return Ok(Some(line));
        }
        fragment.push_str(&line);
        fragment.push('\n');
        prompt("... ")?;
    }
    Ok((!fragment.is_empty()).then_some(fragment))
}

fn prompt(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{text}")?;
    stdout.flush()
}
