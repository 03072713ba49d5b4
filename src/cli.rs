use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "datachat", about = "Persistent interpreter sessions and reproducible reports", version)]
pub struct Cli {
    /// Verbose logging to stderr (overrides DATACHAT_LOG / RUST_LOG).
    #[arg(long, global = true)]
    pub debug: bool,

    /// Interpreter executable (overrides PYTHON_BIN).
    #[arg(long, global = true, value_name = "PATH")]
    pub python: Option<PathBuf>,

    /// Seconds a fragment may run before it is interrupted; 0 disables the limit.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one code fragment in a fresh session.
    #[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
    Exec {
        /// Code to run. Piped stdin is used as well (or instead).
        #[arg(value_name = "CODE")]
        code: Option<String>,

        /// Print the result as JSON instead of a Markdown transcript.
        #[arg(long)]
        json: bool,

        /// Write plots as PNG files into this directory instead of inlining them.
        #[arg(long = "plots-dir", value_name = "DIR")]
        plots_dir: Option<PathBuf>,

        /// Prettify Markdown output.
        #[arg(long)]
        md: bool,
        /// Print raw Markdown.
        #[arg(long = "no-md")]
        no_md: bool,
    },

    /// Read fragments interactively, one per turn. A fragment ends at an empty line.
    #[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
    Repl {
        /// Write plots as PNG files into this directory instead of inlining them.
        #[arg(long = "plots-dir", value_name = "DIR")]
        plots_dir: Option<PathBuf>,

        /// Prettify Markdown output.
        #[arg(long)]
        md: bool,
        /// Print raw Markdown.
        #[arg(long = "no-md")]
        no_md: bool,
    },

    /// Serve the controller protocol as NDJSON on stdin/stdout.
    Serve,

    /// Validate a report document in a fresh session.
    Report {
        /// Report source (Quarto markdown).
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Hand the verified source to the document compiler.
        #[arg(long)]
        compile: bool,

        /// Where the compiler input and output go (defaults to the report's directory).
        #[arg(long = "out-dir", value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Print the validation report as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// `--md` / `--no-md` override `PRETTIFY_MARKDOWN`.
pub fn markdown_preference(md: bool, no_md: bool, configured: bool) -> bool {
    if no_md {
        false
    } else if md {
        true
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = <Cli as Parser>::try_parse_from(["datachat", "exec", "1 + 1", "--json", "--timeout", "5"]).unwrap();
        assert_eq!(cli.timeout, Some(5));
        match cli.command {
            Command::Exec { code, json, .. } => {
                assert_eq!(code.as_deref(), Some("1 + 1"));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn md_switches_conflict() {
        assert!(<Cli as Parser>::try_parse_from(["datachat", "repl", "--md", "--no-md"]).is_err());
    }

    #[test]
    fn report_takes_a_file() {
        let cli = <Cli as Parser>::try_parse_from(["datachat", "--debug", "report", "sales.qmd", "--compile"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Report { compile: true, json: false, .. }));
    }

    #[test]
    fn markdown_flags_override_config() {
        assert!(!markdown_preference(false, true, true));
        assert!(markdown_preference(true, false, false));
        assert!(markdown_preference(false, false, true));
    }
}
