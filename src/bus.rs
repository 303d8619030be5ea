//! Message bus used to distribute readings and discovery descriptors
//!
//! The rest of the crate only sees the [`Bus`] trait. [`MqttBus`] implements it
//! on top of a long-lived `rumqttc` client whose event loop runs in its own
//! task and reconnects on its own.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::MqttConfig;

/// Requests the client buffers while the broker is unreachable
const REQUEST_QUEUE: usize = 64;

/// Result type alias for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur while talking to the bus
#[derive(Debug)]
pub enum BusError {
    /// The configured protocol is not supported by this client
    UnsupportedProtocol(String),

    /// The client refused to queue a message (e.g. queue full while offline)
    PublishFailed(String),

    /// A payload could not be serialized
    SerializationError(serde_json::Error),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::UnsupportedProtocol(proto) => {
                write!(f, "unsupported bus protocol: {}", proto)
            }
            BusError::PublishFailed(msg) => write!(f, "failed to publish message: {}", msg),
            BusError::SerializationError(err) => write!(f, "payload serialization error: {}", err),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::SerializationError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::SerializationError(err)
    }
}

impl From<rumqttc::ClientError> for BusError {
    fn from(err: rumqttc::ClientError) -> Self {
        BusError::PublishFailed(err.to_string())
    }
}

/// A single message ready to be published
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl BusMessage {
    /// JSON-encode `payload` into a non-retained message
    pub fn json(topic: impl Into<String>, payload: &impl Serialize) -> BusResult<Self> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_vec(payload)?,
            retain: false,
        })
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// Publish primitive of the bus
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, message: BusMessage) -> BusResult<()>;
}

/// MQTT connection held for the lifetime of the process
pub struct MqttBus {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    event_loop: JoinHandle<()>,
}

impl MqttBus {
    /// Create the client and spawn its event loop.
    ///
    /// Messages published before the broker accepted the connection are
    /// queued by the client and sent once connected. Publishing never waits:
    /// once the queue is full, further messages fail with
    /// [`BusError::PublishFailed`].
    pub fn connect(config: &MqttConfig) -> BusResult<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(15));

        match config.proto.as_str() {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" | "tls" => {
                options.set_transport(Transport::tls_with_default_config());
            }
            other => return Err(BusError::UnsupportedProtocol(other.to_string())),
        }

        if let Some((user, password)) = config.credentials() {
            options.set_credentials(user, password);
        }

        debug!(
            "connecting to {}://{}:{}",
            config.proto, config.host, config.port
        );

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE);
        let (connected_tx, connected) = watch::channel(false);

        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                        connected_tx.send_replace(true);
                    }
                    Ok(event) => trace!("MQTT event: {event:?}"),
                    Err(e) => {
                        if connected_tx.send_replace(false) {
                            warn!("lost connection to MQTT broker: {e}");
                        } else {
                            debug!("MQTT connection error: {e}");
                        }
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            connected,
            event_loop,
        })
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the broker acknowledged the connection, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        matches!(
            tokio::time::timeout(timeout, connected.wait_for(|c| *c)).await,
            Ok(Ok(_))
        )
    }

    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect failed: {e}");
        }
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, message: BusMessage) -> BusResult<()> {
        trace!("publishing to '{}'", message.topic);
        self.client.try_publish(
            message.topic,
            QoS::AtMostOnce,
            message.retain,
            message.payload,
        )?;
        Ok(())
    }
}
