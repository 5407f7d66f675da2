fn main() {
    println!("Run `cargo test -p lifecycle-tests` to execute the end-to-end lifecycle tests.");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use busline_broker::{
        BrokerIdentity, Connection, Connector, KeepaliveConfig, MemoryBroker, Message,
        MessageHandler,
    };
    use busline_connection::{
        ConnectionError, ConnectionManager, ConnectionStatus, RetryConfig, StatusObserver,
        SubscriptionManager, retry_open,
    };

    fn collect_handler() -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |msg| {
            let _ = tx.send(msg);
        });
        (handler, rx)
    }

    async fn next_status(obs: &mut StatusObserver) -> Option<ConnectionStatus> {
        tokio::time::timeout(Duration::from_secs(2), obs.recv())
            .await
            .expect("timed out waiting for status")
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("delivery channel closed")
    }

    #[tokio::test]
    async fn full_lifecycle_with_loss_and_recovery() {
        let broker = MemoryBroker::new("prod-cluster");
        let manager = Arc::new(ConnectionManager::new(
            broker.clone(),
            BrokerIdentity::new("prod-cluster", "worker-1"),
        ));

        let mut status = manager.subscribe_to_status_changes().await;
        assert_eq!(next_status(&mut status).await, Some(ConnectionStatus::NotConnected));

        // Bring the connection up.
        retry_open(&manager, RetryConfig::default(), CancellationToken::new()).await;
        assert_eq!(next_status(&mut status).await, Some(ConnectionStatus::Connected));

        // Durable subscription over the managed handle.
        let (handler, mut inbox) = collect_handler();
        let conn = manager.get_conn().await.unwrap();
        let mut sub = SubscriptionManager::new(conn, "audit", "orders", handler);
        sub.subscribe().await.unwrap();

        // An independent publisher connection.
        let publisher = broker
            .connect(
                &BrokerIdentity::new("prod-cluster", "publisher"),
                KeepaliveConfig::default(),
                Box::new(|| {}),
            )
            .await
            .unwrap();

        publisher.publish("orders", b"first").await.unwrap();
        assert_eq!(next_message(&mut inbox).await.payload, b"first");

        // Transport failure: the manager reports it, and a message goes
        // by while we are down.
        broker.disconnect_client("worker-1").await;
        assert_eq!(next_status(&mut status).await, Some(ConnectionStatus::Lost));
        publisher.publish("orders", b"second").await.unwrap();

        // Recover, and the durable picks up where it left off.
        retry_open(&manager, RetryConfig::default(), CancellationToken::new()).await;
        assert_eq!(next_status(&mut status).await, Some(ConnectionStatus::Connected));

        let (handler, mut inbox) = collect_handler();
        let conn = manager.get_conn().await.unwrap();
        let mut sub = SubscriptionManager::new(conn, "audit", "orders", handler);
        sub.subscribe().await.unwrap();

        let resumed = next_message(&mut inbox).await;
        assert_eq!(resumed.payload, b"second");
        assert_eq!(resumed.sequence, 2);

        // Orderly shutdown: observers are terminated after the final
        // status value.
        sub.close().await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(next_status(&mut status).await, Some(ConnectionStatus::NotConnected));
        assert_eq!(next_status(&mut status).await, None);
    }

    #[tokio::test]
    async fn failed_open_leaves_a_clean_manager() {
        let broker = MemoryBroker::new("C");

        // "X" is taken, so the manager's open is rejected.
        let occupant = ConnectionManager::new(broker.clone(), BrokerIdentity::new("C", "X"));
        occupant.open().await.unwrap();

        let manager = ConnectionManager::new(broker.clone(), BrokerIdentity::new("C", "X"));
        let mut status = manager.subscribe_to_status_changes().await;

        assert!(manager.open().await.is_err());

        assert_eq!(manager.status().await, ConnectionStatus::NotConnected);
        assert!(matches!(
            manager.get_conn().await,
            Err(ConnectionError::NotConnected)
        ));
        assert_eq!(next_status(&mut status).await, Some(ConnectionStatus::NotConnected));

        // Nothing else was broadcast.
        occupant.close().await.unwrap();
        manager.open().await.unwrap();
        assert_eq!(next_status(&mut status).await, Some(ConnectionStatus::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_keeps_attempting_until_the_broker_returns() {
        let broker = MemoryBroker::new("prod-cluster");
        broker.refuse_connects(true).await;

        let manager = Arc::new(ConnectionManager::new(
            broker.clone(),
            BrokerIdentity::new("prod-cluster", "worker-1"),
        ));
        let mut status = manager.subscribe_to_status_changes().await;
        assert_eq!(status.recv().await, Some(ConnectionStatus::NotConnected));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move {
                retry_open(&manager, RetryConfig::default(), CancellationToken::new()).await;
            })
        };

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(manager.status().await, ConnectionStatus::NotConnected);

        broker.refuse_connects(false).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(status.recv().await, Some(ConnectionStatus::Connected));
        task.await.unwrap();
    }
}
