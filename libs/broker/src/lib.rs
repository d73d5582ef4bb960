//! Broker connection lifecycle management.
//!
//! This crate keeps exactly one usable connection + channel pair alive to the
//! message broker on behalf of the gateway:
//! - A single supervisor task owns all connection state and is the only code
//!   that mutates it
//! - Error/close notifications from the broker client arrive on a fault
//!   channel and are consumed sequentially, so reconnect attempts never
//!   overlap
//! - Reconnection uses bounded backoff and gives up permanently after a
//!   configured number of consecutive failures
//!
//! Callers interact through a cloneable [`BrokerHandle`]; they never see the
//! underlying connection or channel.

pub mod amqp;
pub mod config;
pub mod error;
pub mod manager;
pub mod queue;
pub mod transport;

pub use amqp::AmqpTransport;
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use manager::BrokerHandle;
pub use queue::QueueName;
pub use transport::{BrokerChannel, BrokerConnection, BrokerTransport, Fault, MockTransport};
