//! Tracing subscriber setup for processes embedding the ledger.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Installs a global `fmt` subscriber filtered by `RUST_LOG` (default
/// `info`).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}
