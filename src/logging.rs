//! Ambient structured-logging init. Not part of the spec's core surface;
//! carried per SPEC_FULL.md §2 regardless of the Non-goal excluding
//! telemetry uploads (local structured logging is not a telemetry upload).

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber, reading the `ACP_PROXY_LOG`
/// filter string (defaults to `info` when unset or invalid). Safe to call
/// once at process start; a second call is a no-op logged at `warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("ACP_PROXY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("global tracing subscriber already installed");
    }
}
