use std::path::PathBuf;

use tokio::signal::unix::{signal, SignalKind};

use crate::tracing_setup::ReloadHandle;

/// Re-read the configuration on SIGHUP and apply a changed log level.
///
/// Worker pool and retry settings only take effect on restart.
pub fn spawn_log_level_reloader(
    config_path: Option<PathBuf>,
    level: String,
    reload_handle: ReloadHandle,
) -> std::io::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        let mut current = level;
        while hangup.recv().await.is_some() {
            let cfg = match jobservice_config::load_config(config_path.as_deref()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!(%e, "failed to reload config file");
                    continue;
                }
            };
            if let Err(e) = jobservice_config::validate_config(&cfg) {
                tracing::error!(%e, "loaded config failed validation, ignoring");
                continue;
            }
            if cfg.logging.level == current {
                tracing::debug!("log level unchanged");
                continue;
            }

            match reload_handle(tracing_subscriber::EnvFilter::new(&cfg.logging.level)) {
                Ok(()) => {
                    tracing::info!(old = %current, new = %cfg.logging.level, "log level reloaded");
                    current = cfg.logging.level;
                }
                Err(e) => tracing::error!(%e, "failed to apply new log level"),
            }
        }
    });
    Ok(())
}
