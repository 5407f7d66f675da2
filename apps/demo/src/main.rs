//! Busline demo entry point.
//!
//! Wires the full connection lifecycle against the in-memory broker: a
//! status worker reacts to every transition, retry brings the
//! connection up and back after loss, and a durable subscription
//! resumes where it left off. A traffic task publishes a little data
//! and severs the subscriber's connection once so the recovery path
//! shows up in the logs. Ctrl-c shuts everything down in order.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use busline_broker::{BrokerIdentity, Connection, Connector, KeepaliveConfig, MemoryBroker};
use busline_connection::{
    ConnectionManager, ConnectionStatus, RetryConfig, SubscriptionManager, retry_open,
};

use crate::config::DemoConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = match DemoConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to load config, using defaults");
            DemoConfig::default()
        }
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cluster = %cfg.cluster_id,
        client = %cfg.client_id,
        "starting busline demo"
    );

    let broker = MemoryBroker::new(cfg.cluster_id.clone());
    let manager = Arc::new(ConnectionManager::new(
        broker.clone(),
        BrokerIdentity::new(cfg.cluster_id.clone(), cfg.client_id.clone()),
    ));

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(status_worker(
        manager.clone(),
        cfg.clone(),
        shutdown.clone(),
    ));
    let traffic = tokio::spawn(run_traffic(broker.clone(), cfg.clone()));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    shutdown.cancel();
    traffic.abort();
    if let Err(e) = manager.close().await {
        warn!(error = %e, "close failed");
    }
    let _ = worker.await;
    Ok(())
}

/// Reacts to every status transition: spawns retry while disconnected,
/// builds the durable subscription once connected.
async fn status_worker(
    manager: Arc<ConnectionManager<MemoryBroker>>,
    cfg: DemoConfig,
    shutdown: CancellationToken,
) {
    let mut status = manager.subscribe_to_status_changes().await;
    let mut retry: Option<CancellationToken> = None;
    let mut subscription = None;

    loop {
        let value = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            v = status.recv() => match v {
                Some(v) => v,
                None => break,
            },
        };
        match value {
            ConnectionStatus::NotConnected | ConnectionStatus::Lost => {
                info!(status = ?value, "no connection, starting retry");
                let cancel = shutdown.child_token();
                retry = Some(cancel.clone());
                let manager = manager.clone();
                tokio::spawn(async move {
                    retry_open(&manager, RetryConfig::default(), cancel).await;
                });
            }
            ConnectionStatus::Connected => {
                if let Some(cancel) = retry.take() {
                    cancel.cancel();
                }
                match manager.get_conn().await {
                    Ok(conn) => {
                        let mut sub = SubscriptionManager::with_default_handler(
                            conn,
                            cfg.durable_name.as_str(),
                            cfg.channel.as_str(),
                        );
                        match sub.subscribe().await {
                            Ok(()) => subscription = Some(sub),
                            Err(e) => error!(error = %e, "subscribe failed"),
                        }
                    }
                    Err(e) => error!(error = %e, "no connection handle after connect"),
                }
            }
        }
    }

    if let Some(mut sub) = subscription.take() {
        let _ = sub.close().await;
    }
    info!("status worker finished");
}

/// Publishes a little traffic on its own connection and severs the
/// subscriber's connection once, so loss, retry, reconnect, and durable
/// resumption all show up.
async fn run_traffic(broker: MemoryBroker, cfg: DemoConfig) {
    let identity = BrokerIdentity::new(
        cfg.cluster_id.clone(),
        format!("{}-publisher", cfg.client_id),
    );

    let conn = loop {
        match broker
            .connect(&identity, KeepaliveConfig::default(), Box::new(|| {}))
            .await
        {
            Ok(conn) => break conn,
            Err(e) => {
                warn!(error = %e, "publisher connect failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    };

    for n in 1u32..=10 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let payload = serde_json::json!({ "n": n }).to_string();
        match conn.publish(&cfg.channel, payload.as_bytes()).await {
            Ok(()) => info!(n, "published"),
            Err(e) => warn!(error = %e, "publish failed"),
        }
        if n == 3 {
            warn!("severing the subscriber's connection");
            broker.disconnect_client(&cfg.client_id).await;
        }
    }
    info!("traffic finished");
}
