//! Connection-level error type.

use busline_broker::BrokerError;
use thiserror::Error;

/// Errors from the connection and subscription managers.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The operation requires an active connection or subscription.
    #[error("not connected")]
    NotConnected,

    /// A transport error, passed through unchanged.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
