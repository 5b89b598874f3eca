//! Job service worker
//!
//! Entry point that loads configuration, installs tracing, registers the
//! registry maintenance jobs and runs the worker pool and periodic scheduler
//! until interrupted.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use jobservice_config::Config;
use jobservice_jobs::{register_all_jobs, InMemoryArtifactStore};
use jobservice_queue::{
    InMemoryQueue, InMemoryStatusTracker, JobQueueClient, JobRegistry, PeriodicScheduler,
    WorkerPool, WorkerPoolConfig,
};

mod cli;
#[cfg(unix)]
mod config_reloader;
mod tracing_setup;

use cli::CliArgs;
use tracing_setup::{install_tracing_from_config, ReloadHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = jobservice_config::load_config(args.config_path.as_deref())
        .context("failed to load configuration")?;
    jobservice_config::validate_config(&config).context("invalid configuration")?;

    let reload_handle = install_tracing_from_config(&config.logging);
    tracing::info!(
        config_path = ?args.config_path,
        workers = config.worker_pool.workers,
        default_max_fails = config.retry.default_max_fails,
        job_log_dir = ?config.logging.job_log_dir,
        "configuration loaded"
    );

    watch_log_level(&args, &config, reload_handle);

    let store = Arc::new(InMemoryArtifactStore::new());
    let mut registry = JobRegistry::new();
    register_all_jobs(&mut registry, store)?;
    let registry = Arc::new(registry);

    let queue = Arc::new(InMemoryQueue::new());
    let tracker = Arc::new(InMemoryStatusTracker::new());

    let mut pool = WorkerPool::new(
        pool_config(&config),
        Arc::clone(&registry),
        queue.clone(),
        tracker.clone(),
    );
    pool.start().await.context("failed to start worker pool")?;
    let mut client = JobQueueClient::new(registry, queue, tracker);
    if let Some(dir) = &config.logging.job_log_dir {
        client = client.with_log_dir(dir);
    }

    let periodic = PeriodicScheduler::new(client.clone())
        .await
        .context("failed to create periodic scheduler")?;
    for schedule in args.schedule {
        let job_type = schedule.submission.job_type.clone();
        periodic
            .schedule(&job_type, &schedule.cron, schedule.submission.parameters)
            .await
            .with_context(|| format!("failed to schedule {job_type} at '{}'", schedule.cron))?;
    }
    periodic.start().await.context("failed to start periodic scheduler")?;

    for submission in args.submit {
        let job_type = submission.job_type.clone();
        match client.enqueue(submission.into_request()).await {
            Ok(result) => tracing::info!(job_id = %result.job_id, %job_type, "submitted job"),
            Err(e) => tracing::error!(%e, %job_type, "failed to submit job"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(%e, "failed to listen for shutdown signal");
    }
    if let Err(e) = periodic.shutdown().await {
        tracing::warn!(%e, "periodic scheduler did not stop cleanly");
    }
    match pool.status().await {
        Ok(status) => tracing::info!(?status, "worker pool status at shutdown"),
        Err(e) => tracing::warn!(%e, "failed to read worker pool status"),
    }
    pool.shutdown().await;

    Ok(())
}

#[cfg(unix)]
fn watch_log_level(args: &CliArgs, config: &Config, reload_handle: ReloadHandle) {
    if let Err(e) = config_reloader::spawn_log_level_reloader(
        args.config_path.clone(),
        config.logging.level.clone(),
        reload_handle,
    ) {
        tracing::warn!(%e, "log level reload on SIGHUP unavailable");
    }
}

#[cfg(not(unix))]
fn watch_log_level(_args: &CliArgs, _config: &Config, _reload_handle: ReloadHandle) {}

/// Worker pool settings from the resolved configuration.
fn pool_config(config: &Config) -> WorkerPoolConfig {
    WorkerPoolConfig {
        workers: config.worker_pool.workers,
        default_max_fails: config.retry.default_max_fails,
        dead_letter_grace: config.retry.dead_letter_grace(),
        drain_dead_letters_on_shutdown: config.worker_pool.shutdown_drain_dead_letters,
        job_log_dir: config.logging.job_log_dir.clone(),
    }
}
