//! Retry orchestration: repeated open attempts until success or
//! cancellation.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use busline_broker::Connector;

use crate::manager::ConnectionManager;
use crate::types::RetryConfig;

/// Drives [`ConnectionManager::open`] until it succeeds or `cancel`
/// fires, waiting `config.interval` between attempts. Cancellation is
/// checked at each iteration boundary, including mid-wait.
///
/// Fire-and-forget: attempt failures are logged, never returned. The
/// caller learns the outcome by observing the manager's status.
pub async fn retry_open<C: Connector>(
    manager: &ConnectionManager<C>,
    config: RetryConfig,
    cancel: CancellationToken,
) {
    match manager.open().await {
        Ok(()) => return,
        Err(e) => warn!(error = %e, "connect attempt failed"),
    }

    let mut interval = tokio::time::interval(config.interval);
    interval.tick().await; // The first tick completes immediately; skip it.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("retry cancelled");
                return;
            }
            _ = interval.tick() => match manager.open().await {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "connect attempt failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionStatus;
    use busline_broker::{BrokerIdentity, MemoryBroker};
    use std::sync::Arc;
    use std::time::Duration;

    fn manager(broker: &MemoryBroker) -> Arc<ConnectionManager<MemoryBroker>> {
        Arc::new(ConnectionManager::new(
            broker.clone(),
            BrokerIdentity::new("test-cluster", "retry-client"),
        ))
    }

    #[tokio::test]
    async fn immediate_success_skips_the_interval() {
        let broker = MemoryBroker::new("test-cluster");
        let mgr = manager(&broker);
        retry_open(&mgr, RetryConfig::default(), CancellationToken::new()).await;
        assert_eq!(mgr.status().await, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_once_the_broker_comes_back() {
        let broker = MemoryBroker::new("test-cluster");
        broker.refuse_connects(true).await;
        let mgr = manager(&broker);

        let task = {
            let mgr = mgr.clone();
            tokio::spawn(async move {
                retry_open(&mgr, RetryConfig::default(), CancellationToken::new()).await;
            })
        };

        // Two failed attempts in, still not connected.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(mgr.status().await, ConnectionStatus::NotConnected);

        broker.refuse_connects(false).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(mgr.status().await, ConnectionStatus::Connected);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("retry task should have finished")
            .expect("no panic");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_mid_wait() {
        let broker = MemoryBroker::new("test-cluster");
        broker.refuse_connects(true).await;
        let mgr = manager(&broker);
        let cancel = CancellationToken::new();

        let task = {
            let mgr = mgr.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                retry_open(&mgr, RetryConfig::default(), cancel).await;
            })
        };

        // Inside the wait between attempts.
        tokio::time::sleep(Duration::from_secs(7)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("retry task should exit on cancellation")
            .expect("no panic");
        assert_eq!(mgr.status().await, ConnectionStatus::NotConnected);
    }
}
