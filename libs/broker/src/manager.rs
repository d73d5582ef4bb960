//! Connection manager: a supervisor task owning the broker connection state.
//!
//! At most one live connection + channel pair exists at any time. All state
//! lives inside the supervisor task and is mutated only by it:
//! - HTTP-facing callers talk to it through a cloneable [`BrokerHandle`]
//!   (command mailbox + connected-state signal)
//! - The transport's error/close observers push onto a fault channel that
//!   the supervisor consumes sequentially, so no two reconnect attempts ever
//!   overlap
//! - Connect attempts run in a spawned task and report back on an internal
//!   mailbox, so a slow broker handshake never blocks publish traffic
//!
//! Each connection gets its own fault channel. Tearing the connection down
//! drops the receiver, so duplicate notifications for an outage that was
//! already handled can never touch a newer connection.
//!
//! State machine: Disconnected -> Connecting -> Connected -> (Disconnected on
//! fault), with a terminal given-up state once `max_retries` consecutive
//! attempts have failed. The only exit from given-up is a process restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::queue::QueueName;
use crate::transport::{BrokerChannel, BrokerConnection, BrokerTransport, Fault};

/// Command mailbox depth.
const MAILBOX_SIZE: usize = 256;

/// Commands accepted by the manager task.
#[derive(Debug)]
enum Command {
    /// Publish a payload to a queue, replying with the outcome.
    Publish {
        queue: QueueName,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },

    /// Start a connection attempt if none is active.
    EnsureConnected,
}

/// Handle for talking to the connection manager.
///
/// Cloneable and cheap to share across request handlers. Holders never see
/// the connection or channel; they only observe "channel available or not".
#[derive(Clone)]
pub struct BrokerHandle {
    commands: mpsc::Sender<Command>,
    connected: watch::Receiver<bool>,
}

impl BrokerHandle {
    /// Publish payload bytes to a queue.
    ///
    /// Fails with [`BrokerError::ChannelUnavailable`] when no channel is
    /// live; transport send failures surface here synchronously.
    pub async fn publish(&self, queue: QueueName, payload: Vec<u8>) -> Result<(), BrokerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                queue,
                payload,
                reply,
            })
            .await
            .map_err(|_| BrokerError::ManagerStopped)?;
        response.await.map_err(|_| BrokerError::ManagerStopped)?
    }

    /// Ask the manager to connect if it is not already connected or
    /// connecting. Idempotent; returns once the request is enqueued, not
    /// once the connection is up.
    pub async fn ensure_connected(&self) {
        let _ = self.commands.send(Command::EnsureConnected).await;
    }

    /// Whether a channel is currently live.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait up to `grace` for the connection to come up.
    ///
    /// Returns the connected state after the wait. This is a bounded wait on
    /// an explicit signal, not a poll loop; it completes as soon as the
    /// manager raises the connected flag or the grace period runs out.
    pub async fn wait_connected(&self, grace: Duration) -> bool {
        let mut connected = self.connected.clone();
        if *connected.borrow_and_update() {
            return true;
        }
        let _ = tokio::time::timeout(grace, async {
            while connected.changed().await.is_ok() {
                if *connected.borrow_and_update() {
                    break;
                }
            }
        })
        .await;
        let state = *connected.borrow();
        state
    }
}

/// Spawn the manager task and return a handle to it.
///
/// The manager stays disconnected until the first `ensure_connected` call.
/// Signalling `shutdown` closes the handles and stops the task.
pub fn spawn<T: BrokerTransport>(
    transport: T,
    config: BrokerConfig,
    shutdown: watch::Receiver<bool>,
) -> BrokerHandle {
    let (command_tx, command_rx) = mpsc::channel(MAILBOX_SIZE);
    let (connected_tx, connected_rx) = watch::channel(false);
    let (outcome_tx, outcome_rx) = mpsc::channel(1);

    let manager = ConnectionManager {
        transport: Arc::new(transport),
        config,
        connection: None,
        channel: None,
        connecting: false,
        retry_count: 0,
        gave_up: false,
        retry_at: None,
        connected_tx,
        outcome_tx,
    };

    tokio::spawn(manager.run(command_rx, outcome_rx, shutdown));

    BrokerHandle {
        commands: command_tx,
        connected: connected_rx,
    }
}

/// Outcome of a spawned connect attempt: the handle pair plus the fault
/// receiver wired to this connection's observers.
type ConnectOutcome<T> = Result<
    (
        <T as BrokerTransport>::Connection,
        <T as BrokerTransport>::Channel,
        mpsc::UnboundedReceiver<Fault>,
    ),
    BrokerError,
>;

struct ConnectionManager<T: BrokerTransport> {
    transport: Arc<T>,
    config: BrokerConfig,

    /// Live connection handle, if any.
    connection: Option<T::Connection>,

    /// Live channel handle. Invariant: `Some` only while `connection` is
    /// `Some` and no fault has been observed since it was set.
    channel: Option<T::Channel>,

    /// Re-entrancy guard: a connect attempt is in flight.
    connecting: bool,

    /// Consecutive failed attempts since the last successful connect.
    retry_count: u32,

    /// Terminal state: retries exhausted, no further automatic attempts.
    gave_up: bool,

    /// Deadline of the next scheduled reconnect attempt.
    retry_at: Option<Instant>,

    connected_tx: watch::Sender<bool>,
    outcome_tx: mpsc::Sender<ConnectOutcome<T>>,
}

/// Receive from the current connection's fault channel, if there is one.
async fn next_fault(faults: &mut Option<mpsc::UnboundedReceiver<Fault>>) -> Option<Fault> {
    match faults.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<T: BrokerTransport> ConnectionManager<T> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::Receiver<ConnectOutcome<T>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("Broker manager started");

        // Fault receiver for the current connection; dropped on teardown so
        // stale notifications never outlive the connection they refer to.
        let mut faults: Option<mpsc::UnboundedReceiver<Fault>> = None;

        loop {
            // Arm the retry timer outside the select so the future does not
            // borrow state the branch bodies mutate.
            let retry_at = self
                .retry_at
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            let retry_armed = self.retry_at.is_some();
            let fault_armed = faults.is_some();

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Broker manager received shutdown signal");
                        break;
                    }
                }

                Some(outcome) = outcomes.recv() => {
                    faults = self.on_connect_outcome(outcome).await;
                }

                fault = next_fault(&mut faults), if fault_armed => {
                    match fault {
                        Some(fault) => {
                            warn!(fault = %fault, "Broker fault observed");
                            faults = None;
                            self.reconnect().await;
                        }
                        None => {
                            // Observers gone without a fault report; nothing
                            // further will arrive on this channel.
                            faults = None;
                        }
                    }
                }

                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(command) => self.on_command(command).await,
                        None => {
                            debug!("All broker handles dropped");
                            break;
                        }
                    }
                }

                _ = sleep_until(retry_at), if retry_armed => {
                    self.retry_at = None;
                    self.ensure_connected();
                }
            }
        }

        self.close_handles().await;
        info!("Broker manager stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::EnsureConnected => self.ensure_connected(),
            Command::Publish {
                queue,
                payload,
                reply,
            } => {
                let _ = reply.send(self.publish(&queue, &payload).await);
            }
        }
    }

    /// Start a connect attempt unless one is in flight, a channel is already
    /// live, or the manager has given up.
    fn ensure_connected(&mut self) {
        if self.connecting || self.channel.is_some() {
            return;
        }
        if self.gave_up {
            debug!("Connect request ignored: reconnection attempts exhausted");
            return;
        }

        self.connecting = true;
        info!(attempt = self.retry_count + 1, "Connecting to broker");

        let transport = Arc::clone(&self.transport);
        let outcomes = self.outcome_tx.clone();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let outcome = transport
                .connect(fault_tx)
                .await
                .map(|(connection, channel)| (connection, channel, fault_rx));
            let _ = outcomes.send(outcome).await;
        });
    }

    /// Handle the result of a connect attempt. On success, returns the fault
    /// receiver to watch for this connection.
    async fn on_connect_outcome(
        &mut self,
        outcome: ConnectOutcome<T>,
    ) -> Option<mpsc::UnboundedReceiver<Fault>> {
        self.connecting = false;
        match outcome {
            Ok((connection, channel, faults)) => {
                self.connection = Some(connection);
                self.channel = Some(channel);
                self.retry_count = 0;
                self.retry_at = None;
                let _ = self.connected_tx.send(true);
                info!("Broker connection established");
                Some(faults)
            }
            Err(e) => {
                warn!(error = %e, "Broker connection attempt failed");
                self.reconnect().await;
                None
            }
        }
    }

    /// Tear down and either schedule the next attempt or give up.
    async fn reconnect(&mut self) {
        self.close_handles().await;
        self.retry_count += 1;

        if self.retry_count >= self.config.max_retries {
            self.gave_up = true;
            self.retry_at = None;
            error!(
                attempts = self.retry_count,
                error = %BrokerError::RetriesExhausted,
                "Giving up on broker reconnection until restart"
            );
            return;
        }

        let delay = self.config.backoff_delay(self.retry_count);
        self.retry_at = Some(Instant::now() + delay);
        info!(
            retry = self.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling broker reconnect"
        );
    }

    async fn publish(&mut self, queue: &QueueName, payload: &[u8]) -> Result<(), BrokerError> {
        match self.channel.as_ref() {
            Some(channel) => channel.publish(queue, payload).await,
            None => Err(BrokerError::ChannelUnavailable),
        }
    }

    /// Close any still-open handles, swallowing close errors.
    async fn close_handles(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        let _ = self.connected_tx.send(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            uri: "amqp://mock".to_string(),
            max_retries: 3,
            base_interval: Duration::from_millis(10),
            cap_factor: 4,
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn spawn_manager(
        transport: &MockTransport,
        config: BrokerConfig,
    ) -> (BrokerHandle, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn(transport.clone(), config, shutdown_rx);
        (handle, shutdown_tx)
    }

    #[tokio::test]
    async fn connect_attempts_never_overlap() {
        let transport = MockTransport::new();
        transport.set_connect_delay(Duration::from_millis(100));
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        handle.ensure_connected().await;
        handle.ensure_connected().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.connect_attempts(), 1);

        assert!(handle.wait_connected(Duration::from_millis(500)).await);
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn publish_fails_fast_without_channel() {
        let transport = MockTransport::refusing();
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            handle.publish(QueueName::for_tenant("t1"), b"{}".to_vec()),
        )
        .await
        .expect("publish must not hang");

        assert!(matches!(result, Err(BrokerError::ChannelUnavailable)));
    }

    #[tokio::test]
    async fn publish_succeeds_once_connected() {
        let transport = MockTransport::new();
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        assert!(handle.wait_connected(Duration::from_millis(500)).await);

        handle
            .publish(QueueName::for_tenant("t1"), br#"{"x":1}"#.to_vec())
            .await
            .unwrap();

        let published = transport.published_on("tenant.t1");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], br#"{"x":1}"#.to_vec());
    }

    #[tokio::test]
    async fn fault_triggers_reconnect_and_publish_recovers() {
        let transport = MockTransport::new();
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        assert!(handle.wait_connected(Duration::from_millis(500)).await);

        assert!(transport.inject_fault(Fault::Connection("connection reset".to_string())));

        // Reconnect happens after one backoff interval; publish then succeeds.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.wait_connected(Duration::from_millis(500)).await);
        assert_eq!(transport.connect_attempts(), 2);

        handle
            .publish(QueueName::for_tenant("t1"), b"{}".to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_faults_are_coalesced() {
        let transport = MockTransport::new();
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        assert!(handle.wait_connected(Duration::from_millis(500)).await);

        assert!(transport.inject_fault(Fault::Connection("reset".to_string())));
        assert!(transport.inject_fault(Fault::Channel("closed".to_string())));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_connected());
        // One reconnect for the outage, not one per notification.
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let transport = MockTransport::refusing();
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.connect_attempts(), 3);

        // No further attempts once given up, even when asked again.
        handle.ensure_connected().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.connect_attempts(), 3);

        let result = handle
            .publish(QueueName::for_tenant("t1"), b"{}".to_vec())
            .await;
        assert!(matches!(result, Err(BrokerError::ChannelUnavailable)));
    }

    #[tokio::test]
    async fn wait_connected_is_bounded() {
        let transport = MockTransport::refusing();
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        let started = std::time::Instant::now();
        let connected = handle.wait_connected(Duration::from_millis(100)).await;

        assert!(!connected);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn recovers_after_transient_connect_failures() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(handle.is_connected());
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn publish_error_surfaces_to_caller() {
        let transport = MockTransport::new();
        let (handle, _shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        assert!(handle.wait_connected(Duration::from_millis(500)).await);

        transport.set_fail_publishes(true);
        let result = handle
            .publish(QueueName::for_tenant("t1"), b"{}".to_vec())
            .await;
        assert!(matches!(result, Err(BrokerError::Publish(_))));
    }

    #[tokio::test]
    async fn shutdown_stops_the_manager() {
        let transport = MockTransport::new();
        let (handle, shutdown) = spawn_manager(&transport, test_config());

        handle.ensure_connected().await;
        assert!(handle.wait_connected(Duration::from_millis(500)).await);

        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = handle
            .publish(QueueName::for_tenant("t1"), b"{}".to_vec())
            .await;
        assert!(matches!(result, Err(BrokerError::ManagerStopped)));
    }
}
