//! Tracing subscriber setup for the binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "DATACHAT_LOG";

/// Directive used when neither `DATACHAT_LOG` nor `RUST_LOG` is set.
fn default_directive(debug: bool) -> &'static str {
    if debug {
        "datachat=debug"
    } else {
        "datachat=warn"
    }
}

/// `--debug` wins over the environment; otherwise `DATACHAT_LOG`, then
/// `RUST_LOG`, then the default.
pub fn filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new(default_directive(true));
    }
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(false)))
}

/// Logs go to stderr; stdout carries results and, in `serve` mode, protocol.
pub fn init(debug: bool) {
    let _ = tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_environment() {
        assert_eq!(filter(true).to_string(), "datachat=debug");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
