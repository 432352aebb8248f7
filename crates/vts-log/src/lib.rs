//! Tracing setup for the plugin binary.
//!
//! Stdout belongs to the Munin protocol, so console output goes to stderr,
//! which munin-node collects in its own log.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

pub const ENV_LOG_DIR: &str = "VTS_LOG_DIR";
pub const ENV_LOG_ROTATION: &str = "VTS_LOG_ROTATION";
const LOG_PREFIX: &str = "nginx-vts";
const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
///
/// When file logging is enabled the returned guard must be held until exit,
/// dropping it flushes the file writer.
#[must_use = "dropping the guard stops file logging"]
pub fn init() -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(console);

    let Some(dir) = std::env::var(ENV_LOG_DIR)
        .ok()
        .filter(|d| !d.trim().is_empty())
    else {
        let _ = registry.try_init();
        return None;
    };

    if let Err(err) = std::fs::create_dir_all(&dir) {
        let _ = registry.try_init();
        tracing::warn!(directory = %dir, %err, "failed to create log directory");
        return None;
    }
    let rotation = std::env::var(ENV_LOG_ROTATION).unwrap_or_else(|_| "daily".into());
    let writer = match rotation.to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::hourly(&dir, LOG_PREFIX),
        "never" => tracing_appender::rolling::never(&dir, LOG_PREFIX),
        _ => tracing_appender::rolling::daily(&dir, LOG_PREFIX),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(nb)
        .with_filter(file_filter);
    let _ = registry.with(file_layer).try_init();
    Some(guard)
}
