//! Utilities (input files, piped stdin, display widths).

pub mod unicode;

use std::{
    fs,
    io::{self, Read},
    path::Path,
};

use anyhow::{bail, Context, Result};
use is_terminal::IsTerminal;

/// Read a report source file. Accepts Quarto and plain Markdown sources.
pub fn read_report_source(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("report file '{}' does not exist", path.display());
    }
    if !path.is_file() {
        bail!("'{}' is not a file", path.display());
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();
    match extension.as_str() {
        "qmd" | "md" | "markdown" | "txt" | "" => fs::read_to_string(path)
            .with_context(|| format!("failed to read report file '{}'", path.display())),
        _ => bail!(
            "unsupported report file type: .{extension}\nCurrently supported: .qmd, .md, .markdown, .txt"
        ),
    }
}

/// Everything piped to stdin, or `None` when stdin is a terminal.
pub fn read_piped_stdin() -> Result<Option<String>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    stdin.lock().read_to_string(&mut buf).context("failed to read stdin")?;
    Ok(Some(buf))
}

/// Positional code wins; piped stdin is used when there is none. Both at
/// once are joined with a blank line, piped text first.
pub fn combine_code(piped: Option<String>, arg: Option<String>) -> String {
    match (piped.filter(|p| !p.trim().is_empty()), arg) {
        (Some(piped), Some(arg)) => format!("{piped}\n\n{arg}"),
        (Some(piped), None) => piped,
        (None, Some(arg)) => arg,
        (None, None) => String::new(),
    }
}
