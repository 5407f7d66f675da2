//! In-memory broker transport.
//!
//! A single-process broker implementing the capability traits, used by
//! the demo app and tests. Channels keep an append-only log; durable
//! positions survive subscription closes and connection loss. Fault
//! injection covers connect refusal, close failure, and severed
//! connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::client::{Connection, Connector, Subscription};
use crate::error::BrokerError;
use crate::types::{
    BrokerIdentity, KeepaliveConfig, LostCallback, Message, MessageHandler, StartPosition,
};

/// Identity of a durable: (client, channel, durable name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DurableKey {
    client_id: String,
    channel: String,
    durable_name: String,
}

/// Delivery cursor for one durable.
///
/// `delivered` is the next sequence to hand to a handler; `offered` is
/// the highest sequence ever queued toward the durable. A message whose
/// sequence is at most `offered` but below `delivered` was queued but
/// never reached the handler, and is replayed as `redelivered`.
#[derive(Default)]
struct DurableState {
    delivered: AtomicU64,
    offered: AtomicU64,
}

struct StoredMessage {
    payload: Vec<u8>,
    timestamp: DateTime<Utc>,
}

struct ActiveSub {
    key: DurableKey,
    durable: Arc<DurableState>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Channel {
    log: Vec<StoredMessage>,
    subs: HashMap<u64, ActiveSub>,
}

struct ClientEntry {
    on_lost: LostCallback,
    alive: Arc<AtomicBool>,
    subs: Vec<(String, u64)>,
}

#[derive(Default)]
struct Core {
    refuse_connects: bool,
    fail_closes: bool,
    clients: HashMap<String, ClientEntry>,
    channels: HashMap<String, Channel>,
    durables: HashMap<DurableKey, Arc<DurableState>>,
    next_sub_id: u64,
}

/// An in-process broker for one cluster id.
///
/// Clones share the same broker; keep one around for fault injection
/// while handing another to a connection manager.
#[derive(Clone)]
pub struct MemoryBroker {
    cluster_id: String,
    core: Arc<Mutex<Core>>,
}

impl MemoryBroker {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            core: Arc::new(Mutex::new(Core::default())),
        }
    }

    /// When set, subsequent connect attempts fail as if the broker were
    /// unreachable.
    pub async fn refuse_connects(&self, refuse: bool) {
        self.core.lock().await.refuse_connects = refuse;
    }

    /// When set, connection closes fail and leave the connection alive.
    pub async fn fail_closes(&self, fail: bool) {
        self.core.lock().await.fail_closes = fail;
    }

    /// Returns whether a client id currently holds a connection.
    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.core.lock().await.clients.contains_key(client_id)
    }

    /// Severs a client's connection as if the transport died, firing its
    /// loss callback. Returns false if the client was not connected.
    ///
    /// Active subscriptions are torn down; durable positions survive.
    pub async fn disconnect_client(&self, client_id: &str) -> bool {
        let entry = {
            let mut core = self.core.lock().await;
            let Some(entry) = core.clients.remove(client_id) else {
                return false;
            };
            entry.alive.store(false, Ordering::Release);
            for (channel, sub_id) in &entry.subs {
                if let Some(chan) = core.channels.get_mut(channel) {
                    chan.subs.remove(sub_id);
                }
            }
            entry
        };
        warn!(client = %client_id, "severing connection");
        (entry.on_lost)();
        true
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Conn = MemoryConnection;

    async fn connect(
        &self,
        identity: &BrokerIdentity,
        _keepalive: KeepaliveConfig,
        on_lost: LostCallback,
    ) -> Result<MemoryConnection, BrokerError> {
        // Keepalive is accepted for interface parity; there is no wire
        // to ping in-process, so loss only happens via disconnect_client.
        let mut core = self.core.lock().await;
        if core.refuse_connects {
            return Err(BrokerError::Connect("broker unreachable".into()));
        }
        if identity.cluster_id != self.cluster_id {
            return Err(BrokerError::UnknownCluster(identity.cluster_id.clone()));
        }
        if core.clients.contains_key(&identity.client_id) {
            return Err(BrokerError::DuplicateClient(identity.client_id.clone()));
        }

        let alive = Arc::new(AtomicBool::new(true));
        core.clients.insert(
            identity.client_id.clone(),
            ClientEntry {
                on_lost,
                alive: alive.clone(),
                subs: Vec::new(),
            },
        );
        debug!(client = %identity.client_id, cluster = %self.cluster_id, "client connected");

        Ok(MemoryConnection {
            client_id: identity.client_id.clone(),
            core: self.core.clone(),
            alive,
        })
    }
}

/// A live connection to a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnection {
    client_id: String,
    core: Arc<Mutex<Core>>,
    alive: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("client_id", &self.client_id)
            .field("alive", &self.alive.load(Ordering::Acquire))
            .finish()
    }
}

impl MemoryConnection {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Subscription = MemorySubscription;

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let mut core = self.core.lock().await;
        let chan = core.channels.entry(channel.to_string()).or_default();
        let sequence = chan.log.len() as u64 + 1;
        let timestamp = Utc::now();
        chan.log.push(StoredMessage {
            payload: payload.to_vec(),
            timestamp,
        });

        for sub in chan.subs.values() {
            sub.durable.offered.fetch_max(sequence, Ordering::AcqRel);
            let _ = sub.tx.send(Message {
                channel: channel.to_string(),
                sequence,
                payload: payload.to_vec(),
                timestamp,
                redelivered: false,
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        durable_name: &str,
        start: StartPosition,
        handler: MessageHandler,
    ) -> Result<MemorySubscription, BrokerError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let mut core = self.core.lock().await;
        if !core.clients.contains_key(&self.client_id) {
            return Err(BrokerError::Closed);
        }

        let key = DurableKey {
            client_id: self.client_id.clone(),
            channel: channel.to_string(),
            durable_name: durable_name.to_string(),
        };
        let resumed = core.durables.contains_key(&key);
        let durable = core
            .durables
            .entry(key.clone())
            .or_insert_with(|| Arc::new(DurableState::default()))
            .clone();

        let sub_id = core.next_sub_id;
        core.next_sub_id += 1;

        let chan = core.channels.entry(channel.to_string()).or_default();
        if chan.subs.values().any(|s| s.key == key) {
            return Err(BrokerError::Subscribe(format!(
                "durable already active: {durable_name}"
            )));
        }

        let log_len = chan.log.len() as u64;
        let start_seq = if resumed {
            durable.delivered.load(Ordering::Acquire)
        } else {
            let seq = match start {
                StartPosition::NewOnly => log_len + 1,
                StartPosition::First => 1,
            };
            durable.delivered.store(seq, Ordering::Release);
            seq
        };

        let (tx, rx) = mpsc::unbounded_channel();

        // Backlog between the durable cursor and the head of the log.
        for sequence in start_seq..=log_len {
            let stored = &chan.log[(sequence - 1) as usize];
            let redelivered = sequence <= durable.offered.load(Ordering::Acquire);
            durable.offered.fetch_max(sequence, Ordering::AcqRel);
            let _ = tx.send(Message {
                channel: channel.to_string(),
                sequence,
                payload: stored.payload.clone(),
                timestamp: stored.timestamp,
                redelivered,
            });
        }

        chan.subs.insert(
            sub_id,
            ActiveSub {
                key,
                durable: durable.clone(),
                tx,
            },
        );
        if let Some(entry) = core.clients.get_mut(&self.client_id) {
            entry.subs.push((channel.to_string(), sub_id));
        }
        debug!(
            client = %self.client_id,
            channel,
            durable = durable_name,
            resumed,
            "subscription created"
        );

        tokio::spawn(dispatch(rx, handler, durable));

        Ok(MemorySubscription {
            client_id: self.client_id.clone(),
            channel: channel.to_string(),
            id: sub_id,
            core: self.core.clone(),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut core = self.core.lock().await;
        if core.fail_closes {
            return Err(BrokerError::Close("transport refused close".into()));
        }
        self.alive.store(false, Ordering::Release);
        if let Some(entry) = core.clients.remove(&self.client_id) {
            for (channel, sub_id) in &entry.subs {
                if let Some(chan) = core.channels.get_mut(channel) {
                    chan.subs.remove(sub_id);
                }
            }
            debug!(client = %self.client_id, "connection closed");
        }
        // Closing a dead or already-closed connection is a no-op.
        Ok(())
    }
}

/// Hands queued messages to the handler, advancing the durable cursor as
/// each one is dispatched.
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Message>,
    handler: MessageHandler,
    durable: Arc<DurableState>,
) {
    while let Some(msg) = rx.recv().await {
        durable.delivered.fetch_max(msg.sequence + 1, Ordering::AcqRel);
        handler(msg);
    }
}

/// Handle for one active subscription.
pub struct MemorySubscription {
    client_id: String,
    channel: String,
    id: u64,
    core: Arc<Mutex<Core>>,
}

impl std::fmt::Debug for MemorySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySubscription")
            .field("client_id", &self.client_id)
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn close(&self) -> Result<(), BrokerError> {
        let mut core = self.core.lock().await;
        let removed = core
            .channels
            .get_mut(&self.channel)
            .and_then(|c| c.subs.remove(&self.id));
        if removed.is_none() {
            // Already torn down by a connection close or loss.
            return Err(BrokerError::Closed);
        }
        if let Some(entry) = core.clients.get_mut(&self.client_id) {
            entry
                .subs
                .retain(|(ch, id)| !(ch == &self.channel && *id == self.id));
        }
        debug!(client = %self.client_id, channel = %self.channel, "subscription closed");
        Ok(())
    }
}
