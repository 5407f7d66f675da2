//! Errors surfaced by a broker transport.

use thiserror::Error;

/// Transport-level failures. The connection layer propagates these
/// unchanged; it never wraps or retries at this boundary.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("close failed: {0}")]
    Close(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("client id already connected: {0}")]
    DuplicateClient(String),

    #[error("connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            BrokerError::UnknownCluster("nope".into()).to_string(),
            "unknown cluster: nope"
        );
        assert_eq!(BrokerError::Closed.to_string(), "connection closed");
        assert_eq!(
            BrokerError::Connect("refused".into()).to_string(),
            "connect failed: refused"
        );
    }
}
