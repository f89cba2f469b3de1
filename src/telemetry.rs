//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub fn is_test_env() -> bool {
    std::env::var_os("FERRY_TESTING").is_some() || std::env::var_os("RUST_TEST_THREADS").is_some()
}

/// Default level directive for a `-v` count, used when `RUST_LOG` is not
/// set.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)))
}

/// Install the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(verbosity))
        .with(fmt::layer().with_target(true))
        .try_init();
}
