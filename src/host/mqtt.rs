use std::time::Duration;

use async_trait::async_trait;
use rumqttc::v5::{
    mqttbytes::{v5::Packet, QoS},
    AsyncClient, Event, EventLoop, MqttOptions,
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::{
    drivers::{Credentials, MessageBus},
    error::Fault,
};

/// Time allowed for the broker to acknowledge a connection
const CONNACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for queued publishes to flush on disconnect
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT v5 session with a broker.
///
/// The event loop runs in its own task for the life of one session and ends
/// at the first connection error, reconnecting is left to the caller.
pub struct MqttBus {
    host: String,
    port: u16,
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
}

impl MqttBus {
    /// * `url` - broker as host:port
    pub fn new(url: &str) -> Result<Self, Fault> {
        let (host, port) = url
            .split_once(':')
            .ok_or_else(|| Fault::Bus(format!("invalid broker URL {url}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| Fault::Bus(format!("invalid broker port {port}: {e}")))?;
        Ok(MqttBus {
            host: host.to_string(),
            port,
            client: None,
            driver: None,
        })
    }

    fn session_alive(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| !d.is_finished())
    }

    async fn close(&mut self) -> Result<(), Fault> {
        let res = match self.client.take() {
            Some(client) => client
                .disconnect()
                .await
                .map_err(|e| Fault::Bus(e.to_string())),
            None => Ok(()),
        };
        if let Some(driver) = self.driver.take() {
            let abort = driver.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, driver).await.is_err() {
                debug!("MQTT event loop did not stop, aborting");
                abort.abort();
            }
        }
        res
    }
}

/// Poll the event loop, reporting the first CONNACK or connection error
async fn drive(mut eventloop: EventLoop, connected: oneshot::Sender<Result<(), String>>) {
    let mut connected = Some(connected);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                trace!("Received CONNACK {:?}", ack);
                if let Some(tx) = connected.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(event) => trace!("MQTT event {:?}", event),
            Err(e) => {
                match connected.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e.to_string()));
                    }
                    None => debug!("MQTT session ended: {}", e),
                }
                break;
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), Fault> {
        if let Err(err) = self.close().await {
            trace!("Closing stale session: {}", err);
        }

        let mut mqtt_opts = MqttOptions::new(&credentials.client_id, &self.host, self.port);
        mqtt_opts
            .set_keep_alive(Duration::from_secs(20))
            .set_clean_start(true)
            .set_connection_timeout(CONNACK_TIMEOUT.as_secs());
        if let (Some(user), Some(password)) = (&credentials.user, &credentials.password) {
            mqtt_opts.set_credentials(user, password);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_opts, 16);
        let (tx, rx) = oneshot::channel();
        let driver = tokio::spawn(drive(eventloop, tx));

        match tokio::time::timeout(CONNACK_TIMEOUT, rx).await {
            Ok(Ok(Ok(()))) => {
                debug!("Connected to broker {}:{}", self.host, self.port);
                self.client = Some(client);
                self.driver = Some(driver);
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(Fault::Bus(e)),
            Ok(Err(_)) => Err(Fault::Bus("event loop ended before CONNACK".to_string())),
            Err(_) => {
                driver.abort();
                Err(Fault::Bus("timed out waiting for CONNACK".to_string()))
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Fault> {
        if !self.session_alive() {
            return Err(Fault::Bus("session closed".to_string()));
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Fault::Bus("not connected".to_string()))?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| {
                warn!("Failed to send MQTT message!");
                Fault::Bus(e.to_string())
            })
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        self.close().await
    }
}
