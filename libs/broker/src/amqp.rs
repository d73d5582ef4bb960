//! AMQP transport backed by `lapin`.

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::time::timeout;
use tracing::debug;

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::queue::QueueName;
use crate::transport::{BrokerChannel, BrokerConnection, BrokerTransport, Fault, FaultSender};

/// Delivery mode marking a message as persistent.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// AMQP transport speaking to a real broker.
#[derive(Clone)]
pub struct AmqpTransport {
    config: BrokerConfig,
}

impl AmqpTransport {
    /// Create a transport for the broker named in `config`.
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    type Connection = AmqpConnection;
    type Channel = AmqpChannel;

    async fn connect(
        &self,
        faults: FaultSender,
    ) -> Result<(AmqpConnection, AmqpChannel), BrokerError> {
        let connecting = Connection::connect(&self.config.uri, ConnectionProperties::default());
        let connection = timeout(self.config.connect_timeout, connecting)
            .await
            .map_err(|_| BrokerError::ConnectionFailure("connect attempt timed out".to_string()))?
            .map_err(|e| BrokerError::ConnectionFailure(e.to_string()))?;

        // lapin reports errors and unexpected closes on either handle through
        // the connection-level handler; both end up on the fault channel.
        connection.on_error(move |error| {
            let _ = faults.send(Fault::Connection(error.to_string()));
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ConnectionFailure(e.to_string()))?;

        debug!("AMQP connection and channel established");
        Ok((AmqpConnection { inner: connection }, AmqpChannel { inner: channel }))
    }
}

/// Established AMQP connection.
pub struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn close(&self) {
        let _ = self.inner.close(200, "closing").await;
    }
}

/// AMQP channel used for publishes.
pub struct AmqpChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn publish(&self, queue: &QueueName, payload: &[u8]) -> Result<(), BrokerError> {
        // Fire-and-forget: awaiting basic_publish sends the frames; the
        // returned confirmation is dropped without being awaited. The queue
        // is never declared here, its topology belongs to the backend.
        self.inner
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT),
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.inner.close(200, "closing").await;
    }
}
