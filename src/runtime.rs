use crate::adapters::{HttpGateway, TokioTimeProvider};
use crate::alerts::AlertMonitor;
use crate::app;
use crate::commands::CommandService;
use crate::config::AppConfig;
use crate::delivery::DeliveryScheduler;
use crate::state::AppState;
use crate::store::{StoreError, SubscriptionStore};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to build gateway client: {0}")]
    Gateway(#[from] reqwest::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Runs the delivery scheduler, the alert monitor and the command API until
/// SIGINT or SIGTERM.
pub async fn serve(config: AppConfig) -> Result<(), ServeError> {
    let store = Arc::new(SubscriptionStore::open(&config.data_file)?);
    let quarantined = store.quarantined()?;
    if !quarantined.is_empty() {
        tracing::warn!(
            count = quarantined.len(),
            "store contains rows that failed to decode; they are kept but ignored"
        );
    }

    let gateway = HttpGateway::new(
        &config.gateway_url,
        config.gateway_token.clone(),
        config.retry.timeout,
    )?;
    let time = TokioTimeProvider;

    let scheduler = Arc::new(DeliveryScheduler::new(
        time,
        gateway.clone(),
        gateway.clone(),
        Arc::clone(&store),
        config.zone,
        config.retry,
        config.parallelism,
    ));
    let monitor = Arc::new(AlertMonitor::new(
        time,
        gateway.clone(),
        gateway.clone(),
        Arc::clone(&store),
        config.retry,
        config.parallelism,
    ));
    let commands = CommandService::new(time, gateway, store, config.zone, config.retry);
    let state = AppState {
        commands,
        delivery_status: scheduler.status(),
        alert_status: monitor.status(),
    };

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.listen,
            source,
        })?;
    tracing::info!(addr = %config.listen, "listening");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let delivery_loop = tokio::spawn(run_every(
        config.delivery_interval,
        cancel_rx.clone(),
        move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                let report = scheduler.tick().await;
                if report.due > 0 {
                    tracing::info!(?report, "delivery tick finished");
                }
            }
        },
    ));
    let alert_loop = tokio::spawn(run_every(config.alert_interval, cancel_rx, move || {
        let monitor = Arc::clone(&monitor);
        async move {
            let report = monitor.tick().await;
            tracing::debug!(?report, "alert tick finished");
        }
    }));

    let result = axum::serve(listener, app::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServeError::Server);

    let _ = cancel_tx.send(true);
    for handle in [delivery_loop, alert_loop] {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "background loop panicked");
        }
    }
    tracing::info!("stopped");
    result
}

/// Calls `tick` immediately and then once per `interval` until `cancel` flips
/// to true. A tick is never interrupted; cancellation takes effect between
/// ticks. Missed intervals are skipped rather than replayed.
pub async fn run_every<F, Fut>(interval: Duration, mut cancel: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        if *cancel.borrow() {
            return;
        }
        tokio::select! {
            _ = ticker.tick() => tick().await,
            changed = cancel.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl_c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to register SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
}
