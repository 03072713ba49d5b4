//! The controller boundary as NDJSON on stdio.
//!
//! Each input line is a turn (`{"turn":T,"code":"..."}` or
//! `{"turn":T,"fragments":[...]}`) or a command (`{"command":"interrupt"}`,
//! `"restart"`, `"state"`). Every line gets exactly one response line. Turns
//! queue for a single worker and run strictly in arrival order. Commands are
//! answered as soon as they are read, so an interrupt reaches the running
//! fragment.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use datachat::{
    config::Config,
    controller::{Controller, ControllerError, Submission, TurnId},
    session::SessionManager,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ControlCommand {
    Interrupt,
    Restart,
    State,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Command { command: ControlCommand },
    Fragments { turn: TurnId, fragments: Vec<String> },
    Code { turn: TurnId, code: String },
}

fn parse_line(line: &str) -> Result<Incoming, Value> {
    serde_json::from_str(line).map_err(|e| {
        failure(
            None,
            "bad_request",
            &format!("expected a turn or a command: {e}"),
        )
    })
}

fn failure(turn: Option<TurnId>, kind: &str, message: &str) -> Value {
    json!({
        "ok": false,
        "turn": turn,
        "error": { "kind": kind, "message": message },
    })
}

fn respond(turn: TurnId, outcome: Result<Submission, ControllerError>) -> Value {
    match outcome {
        Ok(submission) => json!({
            "ok": true,
            "turn": submission.turn,
            "echo": submission.echo,
            "result": submission.result,
        }),
        Err(e) => failure(Some(turn), e.kind(), &e.to_string()),
    }
}

async fn command(controller: &Controller, command: ControlCommand) -> Value {
    match command {
        ControlCommand::Interrupt => match controller.interrupt().await {
            Ok(()) => json!({ "ok": true, "command": "interrupt" }),
            Err(e) => failure(None, e.kind(), &e.to_string()),
        },
        ControlCommand::Restart => match controller.restart().await {
            Ok(session) => json!({ "ok": true, "command": "restart", "session": session }),
            Err(e) => failure(None, e.kind(), &e.to_string()),
        },
        ControlCommand::State => json!({
            "ok": true,
            "command": "state",
            "status": controller.status().await,
        }),
    }
}

pub async fn run(cfg: &Config) -> Result<()> {
    let controller = Arc::new(Controller::new(SessionManager::from_config(cfg)));
    info!("serving controller protocol on stdio");
    serve(controller, tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

/// Answers every line of `input` on `output` and hands the writer back once
/// input ends and every queued turn has been answered.
async fn serve<R, W>(controller: Arc<Controller>, input: R, output: W) -> Result<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(response) = rx.recv().await {
            let mut line = response.to_string();
            line.push('\n');
            output.write_all(line.as_bytes()).await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(output)
    });

    // Turns run one at a time, in the order they were read.
    let (turn_tx, mut turn_rx) = mpsc::unbounded_channel::<(TurnId, Vec<String>)>();
    let worker = {
        let controller = controller.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some((turn, fragments)) = turn_rx.recv().await {
                let outcome = controller.submit_turn(turn, &fragments).await;
                let _ = tx.send(respond(turn, outcome));
            }
        })
    };

    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!(len = line.len(), "request line");
        let queued = match parse_line(&line) {
            Err(response) => tx.send(response).is_ok(),
            Ok(Incoming::Command { command: cmd }) => tx.send(command(&controller, cmd).await).is_ok(),
            Ok(Incoming::Code { turn, code }) => turn_tx.send((turn, vec![code])).is_ok(),
            Ok(Incoming::Fragments { turn, fragments }) => turn_tx.send((turn, fragments)).is_ok(),
        };
        if !queued {
            warn!("response channel closed; stopping");
            break;
        }
    }

    drop(turn_tx);
    if let Err(e) = worker.await {
        warn!(error = %e, "turn worker stopped");
    }
    controller.shutdown().await;
    drop(tx);
    Ok(writer.await??)
}
