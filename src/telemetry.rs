use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::{
    drivers::{Credentials, MessageBus, NetworkLink},
    error::Fault,
    TelemetryMessage,
};

/// Connection attempts made by a single send before it gives up
pub const RECONNECT_ATTEMPTS: u32 = 5;

/// Pause between two connection attempts
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Poll period of the boot-time network wait
pub const NETWORK_POLL: Duration = Duration::from_secs(1);

/// Best-effort publisher, nothing is queued and no failure escapes it
pub struct TelemetryClient {
    network: Box<dyn NetworkLink>,
    bus: Box<dyn MessageBus>,
    credentials: Credentials,
    session_open: bool,
}

impl TelemetryClient {
    pub fn new(
        network: Box<dyn NetworkLink>,
        bus: Box<dyn MessageBus>,
        credentials: Credentials,
    ) -> Self {
        TelemetryClient {
            network,
            bus,
            credentials,
            session_open: false,
        }
    }

    /// Publish once, returns whether the message left the device
    pub async fn send(&mut self, msg: TelemetryMessage) -> bool {
        if !self.ensure_connected().await {
            warn!("Dropping message for {}, no connection", msg.topic);
            return false;
        }

        trace!("Sending {:?}", msg);
        match self.bus.publish(&msg.topic, &msg.payload).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to send message to {}: {}", msg.topic, err);
                self.session_open = false;
                false
            }
        }
    }

    /// Close the bus session and the link, failures are ignored
    pub async fn disconnect(&mut self) {
        if self.session_open {
            if let Err(err) = self.bus.disconnect().await {
                debug!("Message bus disconnect failed: {}", err);
            }
            self.session_open = false;
        }
        if let Err(err) = self.network.disconnect().await {
            debug!("Network disconnect failed: {}", err);
        }
    }

    /// Wait for network association, asking the link to connect between polls
    pub async fn await_network(&mut self, budget: Duration) -> Result<(), Fault> {
        let deadline = tokio::time::Instant::now() + budget;
        let mut polls: u64 = 0;
        loop {
            if self.network.is_connected().await {
                debug!("Network up after {} polls", polls);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Fault::NetworkUnavailable(budget));
            }
            if polls % 10 == 0 {
                info!("Waiting for network connection {}", polls);
            }
            if let Err(err) = self.network.connect().await {
                debug!("Network association attempt failed: {}", err);
            }
            polls += 1;
            tokio::time::sleep(NETWORK_POLL).await;
        }
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.session_open && self.network.is_connected().await {
            return true;
        }
        self.session_open = false;

        for attempt in 1..=RECONNECT_ATTEMPTS {
            match self.try_connect().await {
                Ok(()) => {
                    debug!("Connected on attempt {}", attempt);
                    self.session_open = true;
                    return true;
                }
                Err(err) => warn!("Connection attempt {} failed: {}", attempt, err),
            }
            if attempt < RECONNECT_ATTEMPTS {
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
        false
    }

    async fn try_connect(&mut self) -> Result<(), Fault> {
        if !self.network.is_connected().await {
            self.network.connect().await?;
        }
        self.bus.connect(&self.credentials).await
    }
}
