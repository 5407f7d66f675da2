//! Connection manager: owns the broker handle, the connection status,
//! and the status-change observers.
//!
//! All mutable state lives behind one async mutex, and every mutation
//! runs its broadcast under that lock, so observers see status values in
//! transition order. The transport loss callback is epoch-guarded: a
//! callback from a connection that has since been closed or replaced is
//! ignored, so it is safe on any transport task at any time.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, trace, warn};

use busline_broker::{BrokerIdentity, Connection, Connector, KeepaliveConfig, LostCallback};

use crate::error::ConnectionError;
use crate::types::{ConnectionStatus, STATUS_SEND_TIMEOUT};

/// Receive-only view of a status subscription.
///
/// The first received value is the status as of registration time. The
/// stream ends (`recv` returns `None`) when the observer is evicted as
/// unresponsive or the manager is closed.
pub struct StatusObserver {
    rx: mpsc::Receiver<ConnectionStatus>,
}

impl StatusObserver {
    /// Receives the next status value.
    pub async fn recv(&mut self) -> Option<ConnectionStatus> {
        self.rx.recv().await
    }
}

struct ManagerState<T> {
    status: ConnectionStatus,
    conn: Option<T>,
    observers: HashMap<u64, mpsc::Sender<ConnectionStatus>>,
    next_observer_id: u64,
    /// Bumped on every connect attempt; loss callbacks carry the epoch
    /// of the connection they were registered for.
    epoch: u64,
}

impl<T> ManagerState<T> {
    /// Sets the status and delivers it to every observer, evicting any
    /// that stay unresponsive past [`STATUS_SEND_TIMEOUT`].
    ///
    /// Delivery attempts run concurrently, so one stuck observer delays
    /// the broadcast by at most the bound, not per observer.
    async fn transition(&mut self, status: ConnectionStatus) {
        self.status = status;

        let mut deliveries = Vec::with_capacity(self.observers.len());
        for (&id, tx) in &self.observers {
            let tx = tx.clone();
            deliveries.push(async move {
                (id, tokio::time::timeout(STATUS_SEND_TIMEOUT, tx.send(status)).await)
            });
        }

        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(Ok(())) => trace!(observer = id, ?status, "status delivered"),
                // Timed out, or the receiver was dropped. Removing the
                // sender closes the observer's channel.
                _ => {
                    warn!(observer = id, ?status, "evicting unresponsive status observer");
                    self.observers.remove(&id);
                }
            }
        }
    }
}

/// Manages one client connection to a broker cluster.
///
/// Created not connected and with no observers; reusable after
/// [`close`](Self::close).
pub struct ConnectionManager<C: Connector> {
    connector: C,
    identity: BrokerIdentity,
    keepalive: KeepaliveConfig,
    state: Arc<Mutex<ManagerState<C::Conn>>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, identity: BrokerIdentity) -> Self {
        Self::with_keepalive(connector, identity, KeepaliveConfig::default())
    }

    pub fn with_keepalive(
        connector: C,
        identity: BrokerIdentity,
        keepalive: KeepaliveConfig,
    ) -> Self {
        Self {
            connector,
            identity,
            keepalive,
            state: Arc::new(Mutex::new(ManagerState {
                status: ConnectionStatus::NotConnected,
                conn: None,
                observers: HashMap::new(),
                next_observer_id: 0,
                epoch: 0,
            })),
        }
    }

    /// The identity this manager connects with.
    pub fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    /// The current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.state.lock().await.status
    }

    /// Opens the managed connection.
    ///
    /// A no-op returning `Ok` when already connected. On success the
    /// status transitions to `Connected` and is broadcast to observers;
    /// on failure the transport error is returned and nothing changes.
    pub async fn open(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        if state.status == ConnectionStatus::Connected {
            return Ok(());
        }

        state.epoch += 1;
        let epoch = state.epoch;
        let on_lost: LostCallback = {
            let shared = Arc::clone(&self.state);
            Box::new(move || {
                // The transport may call this on any task; take the
                // manager lock from a spawned task rather than here.
                tokio::spawn(mark_lost(Arc::clone(&shared), epoch));
            })
        };

        let conn = self
            .connector
            .connect(&self.identity, self.keepalive, on_lost)
            .await?;
        info!(
            client = %self.identity.client_id,
            cluster = %self.identity.cluster_id,
            "connected"
        );
        state.conn = Some(conn);
        state.transition(ConnectionStatus::Connected).await;
        Ok(())
    }

    /// Closes the managed connection.
    ///
    /// Fails with [`ConnectionError::NotConnected`] when no handle is
    /// held. A transport close failure is returned with no state change.
    /// On success the status transitions to `NotConnected` and is
    /// broadcast, the handle is dropped, and every observer's channel is
    /// closed. The manager itself may be reopened later.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        let conn = state.conn.as_ref().ok_or(ConnectionError::NotConnected)?;
        conn.close().await?;
        info!(client = %self.identity.client_id, "connection closed");
        state.conn = None;
        state.transition(ConnectionStatus::NotConnected).await;
        // Terminal for observers: dropping the senders ends each stream.
        state.observers.clear();
        Ok(())
    }

    /// Returns a clone of the connection handle.
    ///
    /// The handle can go stale at any moment after return: a transport
    /// loss or a concurrent close invalidates it without warning.
    pub async fn get_conn(&self) -> Result<C::Conn, ConnectionError> {
        self.state
            .lock()
            .await
            .conn
            .clone()
            .ok_or(ConnectionError::NotConnected)
    }

    /// Registers a status observer.
    ///
    /// The observer's first received value is the status as of
    /// registration time; later transitions follow in order. An observer
    /// that stays unresponsive past the broadcast bound is evicted and
    /// its channel closed.
    pub async fn subscribe_to_status_changes(&self) -> StatusObserver {
        let mut state = self.state.lock().await;
        let (tx, rx) = mpsc::channel(1);
        // Fresh single-slot channel: the seed value always fits.
        let _ = tx.try_send(state.status);
        let id = state.next_observer_id;
        state.next_observer_id += 1;
        state.observers.insert(id, tx);
        debug!(observer = id, "status observer registered");
        StatusObserver { rx }
    }
}

/// Transport loss path: flips a still-current connection to `Lost` and
/// broadcasts. Callbacks whose epoch no longer matches are stale (the
/// connection was closed or replaced since) and ignored.
async fn mark_lost<T>(state: Arc<Mutex<ManagerState<T>>>, epoch: u64) {
    let mut state = state.lock().await;
    if state.epoch != epoch || state.status != ConnectionStatus::Connected {
        debug!(epoch, "ignoring stale connection-loss notification");
        return;
    }
    warn!("connection lost");
    // The dead handle stays until close() or a successful reopen, so
    // Lost -> NotConnected via close() remains reachable.
    state.transition(ConnectionStatus::Lost).await;
}
