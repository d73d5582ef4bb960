//! Broker transport interface and mock implementation.
//!
//! The transport abstracts the broker client:
//! - Opening a connection and deriving a channel from it
//! - Registering error/close observers that report faults
//! - Publishing payload bytes to a named queue
//!
//! A mock implementation is provided for testing and development.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::BrokerError;
use crate::queue::QueueName;

/// A fault reported asynchronously by the broker client.
///
/// Close events are treated identically to errors: both mean the handle pair
/// is no longer usable.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The connection reported an error or closed.
    Connection(String),
    /// The channel reported an error or closed.
    Channel(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Connection(reason) => write!(f, "connection fault: {reason}"),
            Fault::Channel(reason) => write!(f, "channel fault: {reason}"),
        }
    }
}

/// Sender half of the fault channel, handed to the transport so its
/// observers can report failures.
pub type FaultSender = mpsc::UnboundedSender<Fault>;

/// Broker transport interface.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Handle to an established connection.
    type Connection: BrokerConnection;

    /// Handle to a channel multiplexed over the connection.
    type Channel: BrokerChannel;

    /// Open a connection, derive a channel, and register fault observers
    /// that report into `faults`.
    async fn connect(
        &self,
        faults: FaultSender,
    ) -> Result<(Self::Connection, Self::Channel), BrokerError>;
}

/// An established broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Close the connection. Best-effort; close errors are swallowed.
    async fn close(&self);
}

/// A channel for issuing publish operations.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Publish payload bytes to a queue, marked persistent at the transport
    /// level. Does not wait for broker acknowledgment.
    async fn publish(&self, queue: &QueueName, payload: &[u8]) -> Result<(), BrokerError>;

    /// Close the channel. Best-effort; close errors are swallowed.
    async fn close(&self);
}

// =============================================================================
// Mock transport
// =============================================================================

/// Mock transport for testing and development.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

struct MockState {
    /// Fail this many upcoming connect attempts.
    fail_next_connects: AtomicU32,

    /// Whether every connect attempt should fail.
    refuse_all: AtomicBool,

    /// Total connect attempts observed.
    connect_attempts: AtomicU32,

    /// Artificial delay applied to each connect attempt.
    connect_delay: Mutex<Option<Duration>>,

    /// Whether publishes should fail.
    fail_publishes: AtomicBool,

    /// Messages recorded by queue name.
    published: Mutex<Vec<(String, Vec<u8>)>>,

    /// Fault sender registered by the most recent successful connect.
    fault_sender: Mutex<Option<FaultSender>>,
}

impl MockTransport {
    /// Create a mock transport that connects on the first attempt.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                fail_next_connects: AtomicU32::new(0),
                refuse_all: AtomicBool::new(false),
                connect_attempts: AtomicU32::new(0),
                connect_delay: Mutex::new(None),
                fail_publishes: AtomicBool::new(false),
                published: Mutex::new(Vec::new()),
                fault_sender: Mutex::new(None),
            }),
        }
    }

    /// Create a mock transport that refuses every connect attempt.
    pub fn refusing() -> Self {
        let transport = Self::new();
        transport.state.refuse_all.store(true, Ordering::SeqCst);
        transport
    }

    /// Fail the next `count` connect attempts, then connect normally.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.fail_next_connects.store(count, Ordering::SeqCst);
    }

    /// Delay each connect attempt by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = Some(delay);
    }

    /// Make publishes fail (or succeed again).
    pub fn set_fail_publishes(&self, fail: bool) {
        self.state.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Total connect attempts observed so far.
    pub fn connect_attempts(&self) -> u32 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// All recorded publishes as `(queue, payload)` pairs.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.published.lock().unwrap().clone()
    }

    /// Payloads recorded on a specific queue.
    pub fn published_on(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == queue)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Inject a fault as if the broker client had reported it.
    ///
    /// Returns `false` if no connection has registered observers yet.
    pub fn inject_fault(&self, fault: Fault) -> bool {
        let sender = self.state.fault_sender.lock().unwrap();
        match sender.as_ref() {
            Some(tx) => tx.send(fault).is_ok(),
            None => false,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    type Connection = MockConnection;
    type Channel = MockChannel;

    async fn connect(
        &self,
        faults: FaultSender,
    ) -> Result<(MockConnection, MockChannel), BrokerError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.refuse_all.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionFailure(
                "mock broker refusing connections".to_string(),
            ));
        }

        let remaining = self.state.fail_next_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state
                .fail_next_connects
                .store(remaining - 1, Ordering::SeqCst);
            return Err(BrokerError::ConnectionFailure(
                "mock broker connect failure".to_string(),
            ));
        }

        *self.state.fault_sender.lock().unwrap() = Some(faults);
        debug!("[MOCK] Broker connected");

        let closed = Arc::new(AtomicBool::new(false));
        Ok((
            MockConnection {
                closed: Arc::clone(&closed),
            },
            MockChannel {
                state: Arc::clone(&self.state),
                closed,
            },
        ))
    }
}

/// Connection handle produced by [`MockTransport`].
pub struct MockConnection {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("[MOCK] Broker connection closed");
    }
}

/// Channel handle produced by [`MockTransport`].
pub struct MockChannel {
    state: Arc<MockState>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn publish(&self, queue: &QueueName, payload: &[u8]) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("mock channel closed".to_string()));
        }
        if self.state.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("mock publish failure".to_string()));
        }

        self.state
            .published
            .lock()
            .unwrap()
            .push((queue.as_str().to_string(), payload.to_vec()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("[MOCK] Broker channel closed");
    }
}
