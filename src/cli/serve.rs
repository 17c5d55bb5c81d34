// src/cli/serve.rs — Long-running monitor plus local API

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{self, webhooks::WebhookNotifier, ApiState};
use crate::infra::config::Config;
use crate::monitor::Monitor;
use crate::portal::{EnergyFlowReader, SessionManager};

/// Run until Ctrl+C, or until the local API server dies.
pub async fn run_serve(config: Config) -> anyhow::Result<()> {
    let credentials = config.validate_for_serve()?;
    let notifier = WebhookNotifier::from_config(&config.webhook)
        .context("webhook.url is required for serve")?;

    let session = Arc::new(SessionManager::new(credentials)?);
    let reader = Arc::new(EnergyFlowReader::new(
        session.clone(),
        config.flow_mapping.clone(),
    ));
    let monitor = Monitor::new(
        reader,
        Arc::new(notifier),
        config.webhook.devices.clone(),
        Duration::from_secs(config.poll.interval_secs),
    );
    let status = monitor.subscribe();

    let (stop_tx, stop_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(monitor.run(stopped(stop_rx.clone())));

    let mut api_task = if config.api.enabled {
        let state = ApiState {
            session,
            status,
            devices: config.webhook.devices.clone(),
            token: config.api.token.clone(),
        };
        let api_config = config.api.clone();
        let stop = stopped(stop_rx);
        Some(tokio::spawn(async move {
            api::start_server(&api_config, state, stop).await
        }))
    } else {
        tracing::info!("Local API disabled");
        None
    };

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            signal.context("waiting for shutdown signal")
        }
        failed = api_exit(&mut api_task) => {
            if let Err(e) = &failed {
                tracing::error!("API server stopped: {e:#}");
            }
            failed
        }
    };
    stop_tx.send_replace(true);

    monitor_task.await?;
    if let Some(task) = api_task {
        task.await??;
    }
    result
}

/// Resolves once the API task has ended; never while it is still serving.
///
/// Before shutdown is requested any exit is a failure, including a clean one.
async fn api_exit(task: &mut Option<JoinHandle<anyhow::Result<()>>>) -> anyhow::Result<()> {
    let Some(handle) = task.as_mut() else {
        return std::future::pending().await;
    };
    let joined = handle.await;
    *task = None;
    match joined {
        Ok(Ok(())) => Err(anyhow::anyhow!("API server stopped unexpectedly")),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(e).context("API server task panicked"),
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
