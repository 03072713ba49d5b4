//! Command handlers for the `datachat` binary.

pub mod exec;
pub mod repl;
pub mod report;
pub mod serve;

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use datachat::{
    execution::{ExecutionResult, PlotPayload},
    printer::render_transcript,
};

/// Where transcript images point: PNG files under a directory, or inline
/// `data:` URIs when no directory was given.
pub struct PlotSink {
    dir: Option<PathBuf>,
    written: usize,
}

impl PlotSink {
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create plots directory '{}'", dir.display()))?;
        }
        Ok(Self { dir, written: 0 })
    }

    /// Markdown transcript of `result`, writing its plots out first.
    pub fn transcript(&mut self, echo: Option<&str>, result: &ExecutionResult) -> Result<String> {
        let targets = result
            .plots()
            .map(|plot| self.target(plot))
            .collect::<Result<Vec<_>>>()?;
        Ok(render_transcript(echo, result, |n, plot| {
            targets.get(n - 1).cloned().unwrap_or_else(|| plot.data_uri())
        }))
    }

    fn target(&mut self, plot: &PlotPayload) -> Result<String> {
        let Some(dir) = &self.dir else {
            return Ok(plot.data_uri());
        };
        self.written += 1;
        let path = dir.join(format!("plot-{}.png", self.written));
        let png = STANDARD
            .decode(plot.png_base64.as_bytes())
            .context("plot payload is not valid base64")?;
        fs::write(&path, png).with_context(|| format!("cannot write '{}'", path.display()))?;
        Ok(path.display().to_string())
    }
}
