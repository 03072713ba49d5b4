//! Report validation and hand-off to the document compiler.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use datachat::{
    config::Config,
    printer::{print_markdown, TextPrinter},
    report::{
        DocumentCompiler, ExternalCompiler, ReportDocument, ReportSynthesizer, ValidationError,
        ValidationReport,
    },
    utils::read_report_source,
};

use super::PlotSink;

/// Returns whether the report passed validation (and compiled, if asked to).
pub async fn run(
    cfg: &Config,
    file: &Path,
    compile: bool,
    out_dir: Option<PathBuf>,
    json: bool,
    markdown: bool,
) -> Result<bool> {
    let text = read_report_source(file)?;
    let document = ReportDocument::parse(&text)
        .with_context(|| format!("cannot parse report '{}'", file.display()))?;

    let synthesis = ReportSynthesizer::from_config(cfg).validate(&document).await;
    if json {
        println!("{}", serde_json::to_string_pretty(synthesis.report())?);
    } else {
        print_markdown(&summary(synthesis.report(), synthesis.error())?, markdown);
    }

    let (_, outcome) = synthesis.into_parts();
    let Ok(verified) = outcome else {
        return Ok(false);
    };
    if !compile {
        return Ok(true);
    }

    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("report")
        .to_string();
    // Never next to the input: the verified source would overwrite it.
    let out_dir = out_dir.unwrap_or_else(|| {
        file.parent()
            .unwrap_or_else(|| Path::new("."))
            .join("_datachat")
    });
    let compiler = ExternalCompiler::from_config(cfg, &out_dir, &stem);
    let compiled = compiler
        .compile(&verified)
        .await
        .context("document compilation failed")?;
    info!(input = %compiled.input.display(), "report compiled");
    TextPrinter { color: Some("green") }.eprint(&format!("compiled {}", compiled.input.display()));
    Ok(true)
}

fn summary(report: &ValidationReport, error: Option<&ValidationError>) -> Result<String> {
    let mut out = String::new();
    out.push_str(if report.passed {
        "## Validation passed\n\n"
    } else {
        "## Validation failed\n\n"
    });
    out.push_str(&format!("- fingerprint: `{}`\n", report.fingerprint));
    out.push_str(&format!("- chunks run: {}\n", report.chunks.len()));
    if !report.data_sources.is_empty() {
        out.push_str(&format!("- data sources: {}\n", report.data_sources.join(", ")));
    }
    if let Some(failure) = &report.failure {
        out.push_str(&format!("- failure ({}): {}\n", failure.kind, failure.message));
    }

    if !report.inline.is_empty() {
        out.push_str("\n### Inline values\n\n");
        for resolved in &report.inline {
            out.push_str(&format!(
                "- `{}` after `{}` = `{}`\n",
                resolved.expression, resolved.chunk, resolved.value
            ));
        }
    }

    if let Some(ValidationError::Runtime { chunk, fragment, result }) = error {
        out.push_str(&format!("\n### Failing chunk `{chunk}`\n\n"));
        out.push_str(&PlotSink::new(None)?.transcript(Some(fragment.as_str()), result)?);
    }
    Ok(out)
}
