//! Durable subscription manager.

use std::sync::Arc;

use tracing::info;

use busline_broker::{Connection, Message, MessageHandler, StartPosition, Subscription};

use crate::error::ConnectionError;

/// Binds a message handler to a durable, named subscription on one
/// channel of an established connection.
///
/// Holds a handle clone, not the connection itself; the connection
/// manager keeps ownership of the underlying connection.
pub struct SubscriptionManager<T: Connection> {
    conn: T,
    channel: String,
    durable_name: String,
    handler: MessageHandler,
    subscription: Option<T::Subscription>,
}

impl<T: Connection> SubscriptionManager<T> {
    /// Creates an inactive manager; [`subscribe`](Self::subscribe)
    /// activates it.
    pub fn new(
        conn: T,
        durable_name: impl Into<String>,
        channel: impl Into<String>,
        handler: MessageHandler,
    ) -> Self {
        Self {
            conn,
            channel: channel.into(),
            durable_name: durable_name.into(),
            handler,
            subscription: None,
        }
    }

    /// Creates a manager whose handler just logs each message.
    pub fn with_default_handler(
        conn: T,
        durable_name: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self::new(conn, durable_name, channel, default_handler())
    }

    /// Activates the subscription, starting from new messages only.
    /// Resumption from the durable's stored position is the broker's
    /// business, keyed by the durable name.
    ///
    /// Transport errors are returned unchanged, without retry.
    pub async fn subscribe(&mut self) -> Result<(), ConnectionError> {
        let sub = self
            .conn
            .subscribe(
                &self.channel,
                &self.durable_name,
                StartPosition::NewOnly,
                self.handler.clone(),
            )
            .await?;
        info!(channel = %self.channel, durable = %self.durable_name, "subscribed");
        self.subscription = Some(sub);
        Ok(())
    }

    /// Closes the subscription. Fails with
    /// [`ConnectionError::NotConnected`] when it was never activated;
    /// transport close errors propagate with the subscription retained.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let sub = self
            .subscription
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?;
        sub.close().await?;
        self.subscription = None;
        Ok(())
    }
}

/// A handler that logs each received message.
pub fn default_handler() -> MessageHandler {
    Arc::new(|msg: Message| {
        info!(
            channel = %msg.channel,
            sequence = msg.sequence,
            redelivered = msg.redelivered,
            bytes = msg.payload.len(),
            "message received"
        );
    })
}
