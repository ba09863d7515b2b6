//! Log subscriber set-up for the runner.

use std::io::IsTerminal;
use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

static TESTBED_LOG_ENV_VAR: &str = "TESTBED_LOG";

const CRATES: &[&str] = &["testbed", "testbed_cli", "testbed_core", "testbed_sql"];

/// Install a stderr fmt subscriber once per process.
///
/// `TESTBED_LOG` sets the level for the workspace crates (default `info`,
/// `warn` when `quiet`); `RUST_LOG` directives take precedence.
pub fn init(quiet: bool) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, level) = env_filter_and_log_level(quiet);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();

        tracing::debug!("log level: {}", level);
    });
}

fn env_filter_and_log_level(quiet: bool) -> (EnvFilter, String) {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(&directives);

    let default_level = if quiet { "warn" } else { "info" };
    let level =
        std::env::var(TESTBED_LOG_ENV_VAR).unwrap_or_else(|_| default_level.to_string());

    for crate_name in CRATES {
        if directives.contains(&format!("{crate_name}=")) {
            continue;
        }
        match format!("{crate_name}={level}").parse() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(e) => eprintln!("ignoring {TESTBED_LOG_ENV_VAR}={level}: {e}"),
        }
    }

    (env_filter, level)
}
