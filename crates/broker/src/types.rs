//! Public types shared across the broker-client boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Names which broker cluster to join and how this client identifies
/// itself to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerIdentity {
    pub cluster_id: String,
    pub client_id: String,
}

impl BrokerIdentity {
    pub fn new(cluster_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            client_id: client_id.into(),
        }
    }
}

/// Keepalive settings handed to the transport at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Missed pings tolerated before the transport declares the
    /// connection lost.
    pub max_missed_pings: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(1),
            max_missed_pings: 3,
        }
    }
}

/// Where a new durable subscription starts reading.
///
/// Resumed durables ignore this and continue from their stored position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Only messages published after the subscription is created.
    NewOnly,
    /// Replay the channel from its first stored message.
    First,
}

/// A message delivered to a subscription handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    /// 1-based position in the channel log.
    pub sequence: u64,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// True when the broker has offered this message to the durable before.
    pub redelivered: bool,
}

/// Handler invoked for each message delivered to a subscription.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback invoked by the transport when it detects the connection is
/// lost. Never invoked for a locally requested close.
pub type LostCallback = Box<dyn Fn() + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_defaults() {
        let cfg = KeepaliveConfig::default();
        assert_eq!(cfg.ping_interval, Duration::from_secs(1));
        assert_eq!(cfg.max_missed_pings, 3);
    }

    #[test]
    fn identity_roundtrips_through_serde() {
        let id = BrokerIdentity::new("prod-cluster", "worker-7");
        let json = serde_json::to_string(&id).unwrap();
        let back: BrokerIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
