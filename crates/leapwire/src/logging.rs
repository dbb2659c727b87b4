//! Log setup for LEAP scripts.
//!
//! Under a host, stdout carries LEAP frames, so logs always go to stderr.

pub use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding `tracing` filter directives, e.g.
/// `LEAPWIRE_LOG=leapwire_client=trace,warn`.
pub const LOG_ENV_VAR: &str = "LEAPWIRE_LOG";

/// Install a plain-text `tracing` subscriber on stderr.
///
/// Directives in [`LOG_ENV_VAR`] win; anything they don't cover logs at
/// `default`. Does nothing if a global subscriber is already set.
pub fn init_stderr_logging(default: LevelFilter) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(default))
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

/// The filter [`init_stderr_logging`] installs. Unparsable directives are
/// skipped.
pub fn env_filter(default: LevelFilter) -> EnvFilter {
    filter_from_var(default, LOG_ENV_VAR)
}

fn filter_from_var(default: LevelFilter, var: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var(var)
        .from_env_lossy()
}
