//! Capability interfaces of the board collaborators.
//!
//! The engine only talks to hardware through these traits. Linux
//! implementations live in [`crate::host`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::Receiver;

use crate::error::Fault;

/// A 3-axis acceleration reading, in g
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Acceleration {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Acceleration { x, y, z }
    }

    pub fn axes(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Latitude and longitude in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// One radio advertisement seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub payload: Vec<u8>,
}

/// Message bus login
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// What the hardware reports as the cause of the last wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    PowerOn,
    Timer,
    Accelerometer,
    Other,
}

#[async_trait]
pub trait Accelerometer: Send {
    async fn read_acceleration(&mut self) -> Result<Acceleration, Fault>;

    /// Arm the threshold interrupt that wakes the board from deep sleep.
    async fn arm_motion_interrupt(&mut self, threshold_mg: u16, duration_ms: u16)
        -> Result<(), Fault>;
}

#[async_trait]
pub trait GpsReceiver: Send {
    /// Wait up to `timeout` for a fix, returns whether one was obtained.
    async fn request_fix(&mut self, timeout: Duration) -> Result<bool, Fault>;

    /// Coordinates of the last fix.
    async fn read_coordinates(&mut self) -> Result<Coordinates, Fault>;

    /// Release the receiver when it does not need to stay powered through sleep.
    async fn standby(&mut self) -> Result<(), Fault>;
}

#[async_trait]
pub trait RadioScanner: Send {
    /// Start a scan lasting at most `duration`, advertisements arrive on the
    /// returned channel until the scan ends or the receiver is dropped.
    async fn scan(&mut self, duration: Duration) -> Result<Receiver<Advertisement>, Fault>;

    async fn connect(&mut self, address: &str) -> Result<(), Fault>;

    async fn disconnect(&mut self) -> Result<(), Fault>;
}

#[async_trait]
pub trait NetworkLink: Send {
    async fn is_connected(&mut self) -> bool;

    async fn connect(&mut self) -> Result<(), Fault>;

    async fn disconnect(&mut self) -> Result<(), Fault>;
}

#[async_trait]
pub trait MessageBus: Send {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), Fault>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Fault>;

    async fn disconnect(&mut self) -> Result<(), Fault>;
}

/// Key/value storage that survives deep sleep and power loss
#[async_trait]
pub trait NonVolatileStore: Send {
    async fn get(&mut self, key: &str) -> Result<Option<i64>, Fault>;

    async fn set(&mut self, key: &str, value: i64) -> Result<(), Fault>;

    async fn erase(&mut self, key: &str) -> Result<(), Fault>;
}

#[async_trait]
pub trait PowerManager: Send {
    async fn wake_cause(&mut self) -> Result<WakeCause, Fault>;

    async fn configure_wake_sources(
        &mut self,
        timer: Duration,
        accelerometer_armed: bool,
    ) -> Result<(), Fault>;

    /// Suspend until the next wake. Hardware implementations never return.
    async fn enter_deep_sleep(&mut self, keep_gps_powered: bool) -> Result<(), Fault>;
}

/// Wall clock used for persisted timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
