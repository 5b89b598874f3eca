use std::sync::Arc;

use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

/// Type alias for the reload handle returned by tracing initialization.
pub type ReloadHandle = Arc<dyn Fn(EnvFilter) -> Result<(), String> + Send + Sync>;

/// Filter for `level`, unless `RUST_LOG` is set.
pub fn env_filter(level: &str) -> EnvFilter {
    std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize tracing from configuration.
///
/// Returns a reload handle that can be used to update the log level at runtime.
pub fn install_tracing_from_config(cfg: &jobservice_config::LoggingConfig) -> ReloadHandle {
    let (filter_layer, handle) = reload::Layer::new(env_filter(&cfg.level));
    let registry = tracing_subscriber::registry().with(filter_layer);

    if cfg.json {
        registry
            .with(fmt::layer().json().with_timer(ChronoUtc::rfc_3339()))
            .init();
    } else {
        registry
            .with(fmt::layer().with_timer(ChronoUtc::rfc_3339()))
            .init();
    }

    Arc::new(move |filter| {
        handle
            .reload(filter)
            .map_err(|e| format!("reload failed: {e}"))
    })
}
