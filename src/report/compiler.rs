//! Hand-off of verified sources to an external document compiler.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::VerifiedSource;
use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("could not prepare or run the document compiler: {0}")]
    Io(#[from] std::io::Error),
    #[error("document compiler did not finish within {0:?}")]
    Timeout(Duration),
    #[error("document compiler exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

#[derive(Debug, Clone)]
pub struct CompiledDocument {
    /// The source file handed to the compiler.
    pub input: PathBuf,
    pub stdout: String,
    pub stderr: String,
}

/// Turns a verified source into a rendered artifact. Only verified sources
/// are accepted.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    async fn compile(&self, source: &VerifiedSource) -> Result<CompiledDocument, CompileError>;
}

/// Runs `<program> render <file>` after writing the source to `<dir>/<stem>.qmd`.
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    program: String,
    output_dir: PathBuf,
    stem: String,
    timeout: Option<Duration>,
}

impl ExternalCompiler {
    pub fn new(program: impl Into<String>, output_dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            output_dir: output_dir.into(),
            stem: stem.into(),
            timeout: None,
        }
    }

    pub fn from_config(cfg: &Config, output_dir: &Path, stem: &str) -> Self {
        let program = cfg
            .get("DOCUMENT_COMPILER")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "quarto".to_string());
        Self::new(program, output_dir, stem).with_timeout(cfg.get_duration_secs("COMPILE_TIMEOUT"))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn input_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.qmd", self.stem))
    }
}

#[async_trait]
impl DocumentCompiler for ExternalCompiler {
    async fn compile(&self, source: &VerifiedSource) -> Result<CompiledDocument, CompileError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let input = self.input_path();
        tokio::fs::write(&input, source.as_str()).await?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("render")
            .arg(&input)
            .current_dir(&self.output_dir)
            .kill_on_drop(true);

        info!(program = %self.program, input = %input.display(), fingerprint = source.fingerprint(), "compiling report");
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| CompileError::Timeout(limit))??,
            None => cmd.output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(CompileError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(CompiledDocument { input, stdout, stderr })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_source_then_runs_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ExternalCompiler::new("true", dir.path(), "report");
        let source = VerifiedSource::unchecked("# Report\n");

        let compiled = compiler.compile(&source).await.unwrap();
        assert_eq!(compiled.input, dir.path().join("report.qmd"));
        assert_eq!(std::fs::read_to_string(&compiled.input).unwrap(), "# Report\n");
    }

    #[tokio::test]
    async fn failing_compiler_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ExternalCompiler::new("false", dir.path(), "report");
        let err = compiler.compile(&VerifiedSource::unchecked("x")).await.unwrap_err();
        assert!(matches!(err, CompileError::Failed { .. }));
    }

    #[tokio::test]
    async fn missing_compiler_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ExternalCompiler::new("/nonexistent/quarto", dir.path(), "report");
        let err = compiler.compile(&VerifiedSource::unchecked("x")).await.unwrap_err();
        assert!(matches!(err, CompileError::Io(_)));
    }

    #[test]
    fn reads_program_and_timeout_from_config() {
        let mut cfg = Config::defaults();
        cfg.set("DOCUMENT_COMPILER", "/opt/quarto/bin/quarto");
        let compiler = ExternalCompiler::from_config(&cfg, Path::new("/tmp/out"), "sales");
        assert_eq!(compiler.program, "/opt/quarto/bin/quarto");
        assert_eq!(compiler.timeout, Some(Duration::from_secs(300)));
        assert_eq!(compiler.input_path(), PathBuf::from("/tmp/out/sales.qmd"));
    }
}
