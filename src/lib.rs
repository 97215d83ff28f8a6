pub mod config;
pub mod controller;
pub mod drivers;
pub mod error;
pub mod host;
pub mod location;
pub mod motion;
pub mod proximity;
pub mod state_store;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod mock;

/// A message to be sent, delivered at most once and dropped on failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl TelemetryMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        TelemetryMessage {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// periodic liveness message, payload is always `1`
pub const HEARTBEAT_TOPIC: &str = "/heartbeat";

/// coordinates of a successful fix
pub const GPS_TOPIC: &str = "/gps";

/// sent when an accelerometer wake is confirmed as real motion
pub const WAKEUP_TOPIC: &str = "/wakeup";

/// sent when a monitoring session ends without a fix
pub const GPS_UNAVAILABLE_TOPIC: &str = "/gps/unavailable";

/// text of a fault that aborted a handling branch
pub const EXCEPTION_TOPIC: &str = "/exception";
