//! Capability traits for a pub/sub broker client.
//!
//! The connection layer consumes a broker exclusively through these
//! traits, so a production transport and the in-memory double plug in
//! interchangeably.

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::types::{BrokerIdentity, KeepaliveConfig, LostCallback, MessageHandler, StartPosition};

/// Establishes connections to one broker cluster.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// Connects with the given identity and keepalive settings.
    ///
    /// `on_lost` is invoked by the transport if it later detects the
    /// connection has died. It is never invoked for a local
    /// [`Connection::close`], and may fire on any transport task.
    async fn connect(
        &self,
        identity: &BrokerIdentity,
        keepalive: KeepaliveConfig,
        on_lost: LostCallback,
    ) -> Result<Self::Conn, BrokerError>;
}

/// An established connection to a broker cluster.
///
/// Handles are cheap clones of the same underlying connection.
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    type Subscription: Subscription;

    /// Publishes `payload` to `channel`.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Creates a durable subscription on `channel`.
    ///
    /// The broker remembers the delivery position under `durable_name`
    /// across subscription closes and reconnects.
    async fn subscribe(
        &self,
        channel: &str,
        durable_name: &str,
        start: StartPosition,
        handler: MessageHandler,
    ) -> Result<Self::Subscription, BrokerError>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// An active subscription handle.
#[async_trait]
pub trait Subscription: Send + Sync + 'static {
    /// Stops delivery. The durable position is retained by the broker.
    async fn close(&self) -> Result<(), BrokerError>;
}
