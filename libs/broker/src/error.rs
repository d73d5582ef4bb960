//! Error types for broker operations.

use thiserror::Error;

/// Errors that can occur while talking to the broker.
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    /// The broker was unreachable or the handshake failed.
    ///
    /// Recovered automatically via backoff; callers only ever observe the
    /// eventual [`BrokerError::ChannelUnavailable`].
    #[error("broker connection failed: {0}")]
    ConnectionFailure(String),

    /// No usable channel at publish time.
    #[error("no broker channel available")]
    ChannelUnavailable,

    /// The transport-level send failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// All reconnection attempts have been used up; the manager will not try
    /// again until the process restarts.
    #[error("broker reconnection attempts exhausted")]
    RetriesExhausted,

    /// The manager task is no longer running.
    #[error("broker manager stopped")]
    ManagerStopped,
}
