mod common;

use anyhow::Result;
use datachat::{
    report::{ReportBuilder, ReportDocument, ReportSynthesizer, ValidationError, DISCLAIMER},
};

fn synthesizer() -> ReportSynthesizer {
    ReportSynthesizer::new(common::manager())
}

#[tokio::test]
async fn undeclared_data_fails_and_names_the_chunk() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let document = ReportBuilder::new()
        .narrative("# Sales")
        .labelled_code("setup", "import math")
        .labelled_code("summary", "df.describe()")
        .build()?;

    let synthesis = synthesizer().validate(&document).await;
    assert!(!synthesis.passed());
    assert!(synthesis.verified().is_none());
    match synthesis.error() {
        Some(ValidationError::UnresolvedReference { chunk, names }) => {
            assert_eq!(chunk, "summary");
            assert_eq!(names, &vec!["df".to_string()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let report = synthesis.report();
    assert_eq!(report.failure.as_ref().and_then(|f| f.chunk.as_deref()), Some("summary"));
    // The static check fails before anything runs.
    assert!(report.chunks.is_empty());
    Ok(())
}

#[tokio::test]
async fn interactive_state_does_not_leak_into_validation() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let interactive = common::manager().start().await?;
    interactive.execute("leftover = [1, 2, 3]").await?;

    let document = ReportBuilder::new().labelled_code("total", "sum(leftover)").build()?;
    let synthesis = synthesizer().validate(&document).await;
    assert!(matches!(
        synthesis.error(),
        Some(ValidationError::UnresolvedReference { chunk, .. }) if chunk == "total"
    ));

    interactive.terminate().await;
    Ok(())
}

#[tokio::test]
async fn passing_document_keeps_inline_expressions_as_source() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let document = ReportBuilder::new()
        .front_matter("title: Totals")
        .labelled_code("load", "rows = [3, 4, 5]\ntotal = sum(rows)")
        .narrative("The total is `{python} total` over `{python} len(rows)` rows.")
        .build()?;

    let synthesis = synthesizer().validate(&document).await;
    assert!(synthesis.passed(), "{:?}", synthesis.error());
    let report = synthesis.report();
    assert_eq!(report.chunks.len(), 1);
    let values: Vec<(&str, &str, &str)> = report
        .inline
        .iter()
        .map(|r| (r.chunk.as_str(), r.expression.as_str(), r.value.as_str()))
        .collect();
    assert_eq!(values, vec![("load", "total", "12"), ("load", "len(rows)", "3")]);

    let verified = synthesis.verified().expect("verified source");
    assert!(verified.as_str().contains("`{python} total`"));
    assert!(!verified.as_str().contains("The total is 12"));
    assert!(verified.preview().contains("The total is 12 over 3 rows."));
    assert_eq!(verified.fingerprint(), report.fingerprint);

    // The disclaimer appears once, and the source reads back unchanged.
    assert_eq!(verified.as_str().matches(DISCLAIMER).count(), 1);
    assert_eq!(ReportDocument::parse(verified.as_str())?.render(), verified.as_str());
    Ok(())
}

#[tokio::test]
async fn validation_is_repeatable() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let document = ReportBuilder::new()
        .labelled_code("squares", "squares = [n * n for n in range(5)]")
        .narrative("The largest square is `{python} max(squares)`.")
        .build()?;

    let first = synthesizer().validate(&document).await;
    let second = synthesizer().validate(&document).await;
    assert!(first.passed() && second.passed());
    assert_eq!(first.report().fingerprint, second.report().fingerprint);
    assert_eq!(first.report().inline, second.report().inline);
    assert_eq!(first.report().inline[0].value, "16");
    Ok(())
}

#[tokio::test]
async fn runtime_errors_carry_the_chunk_result() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let document = ReportBuilder::new()
        .labelled_code("ok", "x = 1")
        .labelled_code("boom", "print('dividing')\nx / 0")
        .labelled_code("never", "y = 2")
        .build()?;

    let synthesis = synthesizer().validate(&document).await;
    match synthesis.error() {
        Some(ValidationError::Runtime { chunk, result, .. }) => {
            assert_eq!(chunk, "boom");
            assert_eq!(result.stdout(), "dividing\n");
            assert_eq!(result.error().map(|e| e.name.as_str()), Some("ZeroDivisionError"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let chunks: Vec<&str> = synthesis.report().chunks.iter().map(|c| c.chunk.as_str()).collect();
    assert_eq!(chunks, vec!["ok", "boom"]);
    Ok(())
}

#[tokio::test]
async fn syntax_and_valueless_inline_failures() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let document = ReportBuilder::new().labelled_code("broken", "def (").build()?;
    let synthesis = synthesizer().validate(&document).await;
    assert!(matches!(
        synthesis.error(),
        Some(ValidationError::Syntax { chunk, error, .. }) if chunk == "broken" && error.name == "SyntaxError"
    ));

    let document = ReportBuilder::new()
        .labelled_code("setup", "x = 1")
        .narrative("Nothing to show: `{python} None`.")
        .build()?;
    let synthesis = synthesizer().validate(&document).await;
    assert!(matches!(
        synthesis.error(),
        Some(ValidationError::InlineWithoutValue { chunk, expression }) if chunk == "setup" && expression == "None"
    ));
    Ok(())
}

#[tokio::test]
async fn star_imports_defer_name_checks_to_the_run() -> Result<()> {
    if common::skip_without_python() {
        return Ok(());
    }
    let document = ReportBuilder::new()
        .labelled_code("setup", "from math import *")
        .labelled_code("use", "sqrt(16)")
        .build()?;
    let synthesis = synthesizer().validate(&document).await;
    assert!(synthesis.passed(), "{:?}", synthesis.error());
    assert_eq!(synthesis.report().chunks[1].result.value(), Some("4.0"));

    // A name the star import does not provide still fails, at run time.
    let document = ReportBuilder::new()
        .labelled_code("setup", "from math import *")
        .labelled_code("use", "undefined_total + 1")
        .build()?;
    let synthesis = synthesizer().validate(&document).await;
    match synthesis.error() {
        Some(ValidationError::Runtime { chunk, result, .. }) => {
            assert_eq!(chunk, "use");
            assert_eq!(result.error().map(|e| e.name.as_str()), Some("NameError"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    Ok(())
}
