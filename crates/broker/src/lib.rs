//! Broker-client capability boundary.
//!
//! Defines the traits the connection layer consumes a broker through,
//! the shared message and config types, and an in-memory transport used
//! by tests and the demo app.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{Connection, Connector, Subscription};
pub use error::BrokerError;
pub use memory::{MemoryBroker, MemoryConnection, MemorySubscription};
pub use types::{
    BrokerIdentity, KeepaliveConfig, LostCallback, Message, MessageHandler, StartPosition,
};
