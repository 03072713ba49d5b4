mod common;

use anyhow::Result;
use datachat::{
    controller::{Controller, ControllerError, ExecutionRequest, PolicyError, TurnId},
    session::{Lifecycle, SessionError},
};

#[tokio::test]
async fn one_fragment_per_turn() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let controller = Controller::new(common::manager());

    let submission = controller
        .submit(ExecutionRequest {
            turn: TurnId(1),
            code: "1 + 1".into(),
        })
        .await?;
    assert_eq!(submission.turn, TurnId(1));
    assert_eq!(submission.echo, "1 + 1");
    assert_eq!(submission.result.value(), Some("2"));

    let err = controller.submit_turn(TurnId(1), &["2 + 2"]).await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Policy(PolicyError::TurnAlreadyExecuted { turn: TurnId(1) })
    ));
    assert_eq!(err.kind(), "policy");

    // Two fragments in one turn: nothing runs, and the turn is still unused.
    let err = controller.submit_turn(TurnId(2), &["a = 1", "b = 2"]).await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Policy(PolicyError::MultipleFragments { count: 2, .. })
    ));
    let submission = controller.submit_turn(TurnId(2), &["'a' in globals()"]).await?;
    assert_eq!(submission.result.value(), Some("False"));

    let err = controller.submit_turn(TurnId(3), &["   "]).await.unwrap_err();
    assert!(matches!(err, ControllerError::Policy(PolicyError::EmptyFragment { .. })));

    assert_eq!(controller.status().await.last_turn, Some(TurnId(2)));
    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_second_turn_is_rejected_while_one_runs() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let controller = Controller::new(common::manager());

    let (first, second) = tokio::join!(
        controller.submit_turn(TurnId(5), &["import time\ntime.sleep(0.3)\n'slow'"]),
        controller.submit_turn(TurnId(6), &["'fast'"]),
    );
    assert_eq!(first?.result.value(), Some("'slow'"));
    assert!(matches!(
        second,
        Err(ControllerError::Policy(PolicyError::TurnInProgress {
            turn: TurnId(6),
            in_flight: TurnId(5)
        }))
    ));

    // The rejected turn never ran and may be submitted now.
    let submission = controller.submit_turn(TurnId(6), &["'fast'"]).await?;
    assert_eq!(submission.result.value(), Some("'fast'"));

    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_crashed_session_is_replaced_on_the_next_turn() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let controller = Controller::new(common::manager());

    controller.submit_turn(TurnId(1), &["kept = 1"]).await?;
    let before = controller.status().await.session;

    let err = controller
        .submit_turn(TurnId(2), &["import os\nos._exit(3)"])
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Session(SessionError::Crashed { .. })));
    assert_eq!(err.kind(), "session_crash");
    assert_eq!(controller.status().await.lifecycle, Some(Lifecycle::Terminated));

    // The crashed fragment is not retried; the next turn gets a fresh session.
    let submission = controller.submit_turn(TurnId(3), &["'kept' in globals()"]).await?;
    assert_eq!(submission.result.value(), Some("False"));
    let status = controller.status().await;
    assert_ne!(status.session, before);
    assert_eq!(status.lifecycle, Some(Lifecycle::Ready));

    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn restart_drops_all_bindings() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let controller = Controller::new(common::manager());

    controller.submit_turn(TurnId(1), &["x = 1"]).await?;
    let state = controller.status().await.state.expect("state");
    assert!(state.is_bound("x"));

    let id = controller.restart().await?;
    let status = controller.status().await;
    assert_eq!(status.session, Some(id));
    assert!(!status.state.expect("state").is_bound("x"));

    // Interrupting an idle session is a no-op.
    controller.interrupt().await?;
    controller.shutdown().await;
    Ok(())
}
