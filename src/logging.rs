//! Console logging setup.

use chrono::Local;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{RelayError, Result};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "streamrelay=info";
pub const VERBOSE_LOG_FILTER: &str = "streamrelay=debug,tower_http=debug";

/// Timestamps in the host's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Filter directive: `RUST_LOG` wins, then `--verbose`, then the default.
fn filter(verbose: bool, from_env: Option<String>) -> EnvFilter {
    let directive = from_env
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            if verbose {
                VERBOSE_LOG_FILTER.to_string()
            } else {
                DEFAULT_LOG_FILTER.to_string()
            }
        });
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
pub fn init(verbose: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimer)
                .with_target(verbose),
        )
        .try_init()
        .map_err(|e| RelayError::Internal(format!("Failed to set global default subscriber: {e}")))
}
