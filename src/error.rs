use std::time::Duration;

/// Unexpected collaborator failures.
///
/// Expected negative outcomes (no fix, no motion, owner absent) are never
/// reported through this type.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error("accelerometer: {0}")]
    Accelerometer(String),
    #[error("gps: {0}")]
    Gps(String),
    #[error("radio: {0}")]
    Radio(String),
    #[error("network link: {0}")]
    Network(String),
    #[error("message bus: {0}")]
    Bus(String),
    #[error("persistent store: {0}")]
    Store(String),
    #[error("power manager: {0}")]
    Power(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no network connectivity after {0:?}")]
    NetworkUnavailable(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
