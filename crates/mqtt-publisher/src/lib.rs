use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Anything the dispatcher can hand a finished message to.
///
/// Implementations must not block on the network: a publish either queues
/// the message or fails immediately.
pub trait PublishSink {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError>;
}

impl<T: PublishSink + ?Sized> PublishSink for &T {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        (**self).publish(topic, payload, retain)
    }
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Credentials are only sent when both username and password are set.
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Upper bound on waiting for the broker's CONNACK at startup.
    pub connect_timeout_ms: u64,
    /// Pause after a connection error before the event loop is polled again.
    pub reconnect_delay_ms: u64,
    /// Outgoing request queue between the client handle and the event loop.
    pub channel_capacity: usize,
}

impl MqttConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            return None;
        }
        Some((&self.username, &self.password))
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(1)));
        if let Some((username, password)) = self.credentials() {
            options.set_credentials(username, password);
        }
        options
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "core-mosquitto".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: "rtl433-bridge".to_string(),
            keep_alive_secs: 60,
            connect_timeout_ms: 5_000,
            reconnect_delay_ms: 1_000,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("mqtt broker did not acknowledge the connection within {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },
    #[error("mqtt broker refused the connection: {0:?}")]
    Refused(ConnectReturnCode),
}

/// MQTT publish handle. Without a client it only logs, which backs dry runs.
#[derive(Debug, Clone)]
pub struct Publisher {
    client: Option<AsyncClient>,
}

impl Publisher {
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Wraps a client whose event loop is driven elsewhere.
    pub fn from_client(client: AsyncClient) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Connects to the broker and waits for its CONNACK, then moves the event
    /// loop onto a background task that keeps the session alive until
    /// `shutdown` flips.
    pub async fn connect(
        config: &MqttConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, JoinHandle<()>), PublishError> {
        let (client, mut eventloop) =
            AsyncClient::new(config.options(), config.channel_capacity.max(1));

        let timeout_ms = config.connect_timeout_ms;
        timeout(Duration::from_millis(timeout_ms), wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| PublishError::ConnectTimeout { timeout_ms })??;
        info!(host = %config.host, port = config.port, "connected to mqtt broker");

        let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
        let handle = tokio::spawn(drive_eventloop(eventloop, shutdown, reconnect_delay));
        Ok((Self::from_client(client), handle))
    }

    pub fn is_mock(&self) -> bool {
        self.client.is_none()
    }
}

impl PublishSink for Publisher {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        match &self.client {
            Some(client) => {
                client.try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())?;
                Ok(())
            }
            None => {
                info!(topic = %topic, bytes = payload.len(), retain, "mock publish invoked");
                Ok(())
            }
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), PublishError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(PublishError::Refused(ack.code));
                }
                return Ok(());
            }
            event => debug!(?event, "mqtt event before connack"),
        }
    }
}

async fn drive_eventloop(
    mut eventloop: EventLoop,
    mut shutdown: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    loop {
        tokio::select! {
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "mqtt session re-established");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "mqtt connection error");
                        sleep(reconnect_delay).await;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mqtt event loop shutdown requested");
                    break;
                }
            }
        }
    }
}
