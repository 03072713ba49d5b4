mod cli;
mod handlers;

use anyhow::Result;
use cli::{markdown_preference, Command};
use datachat::{config::Config, logging, utils};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init(args.debug);

    // Load config; CLI flags override it
    let mut cfg = Config::load();
    if let Some(python) = &args.python {
        cfg.set("PYTHON_BIN", python.display().to_string());
    }
    if let Some(secs) = args.timeout {
        cfg.set("EXECUTION_TIMEOUT", secs.to_string());
    }
    let prettify = cfg.get_bool("PRETTIFY_MARKDOWN");

    let ok = match args.command {
        Command::Exec {
            code,
            json,
            plots_dir,
            md,
            no_md,
        } => {
            // stdin handling (pipe support)
            let piped = utils::read_piped_stdin()?;
            let code = utils::combine_code(piped, code);
            handlers::exec::run(&cfg, &code, json, plots_dir, markdown_preference(md, no_md, prettify)).await?
        }
        Command::Repl { plots_dir, md, no_md } => {
            handlers::repl::run(&cfg, plots_dir, markdown_preference(md, no_md, prettify)).await?;
            true
        }
        Command::Serve => {
            handlers::serve::run(&cfg).await?;
            true
        }
        Command::Report {
            file,
            compile,
            out_dir,
            json,
        } => handlers::report::run(&cfg, &file, compile, out_dir, json, prettify).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
