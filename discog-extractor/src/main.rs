mod config;
mod health;
mod scheduler;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use miette::IntoDiagnostic;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::config::ExtractorConfig;
use crate::health::HealthHandle;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match ExtractorConfig::load() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("event=config_load_failed error={err}");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=extractor_failed error={err:?}");
            ExitCode::from(2)
        }
    }
}

async fn run(config: Arc<ExtractorConfig>) -> miette::Result<()> {
    let shutdown = CancellationToken::new();
    let health = HealthHandle::new();

    let bind_addr = config.health_bind_addr.parse().into_diagnostic()?;
    let health_handle = tokio::spawn(health::serve(bind_addr, health.clone(), shutdown.clone()));

    let scheduler = Scheduler::new(config.clone(), health.clone()).await.into_diagnostic()?;
    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    wait_for_signal().await;
    info!("event=shutdown_signal_received grace_seconds={}", config.shutdown_grace_seconds);
    shutdown.cancel();

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    match tokio::time::timeout(grace, scheduler_handle).await {
        Ok(join_result) => join_result.into_diagnostic()??,
        Err(_) => warn!("event=shutdown_grace_expired. Abandoning outstanding confirms."),
    }

    let _ = tokio::time::timeout(grace, health_handle).await;

    Ok(())
}

async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            error!("event=sigterm_handler_failed error={err}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            error!("event=sigint_handler_failed error={err}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
