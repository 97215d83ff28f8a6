use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    drivers::{Coordinates, GpsReceiver},
    error::Fault,
    motion::MotionDetector,
    state_store::PersistentStateStore,
    telemetry::TelemetryClient,
    TelemetryMessage, GPS_TOPIC, GPS_UNAVAILABLE_TOPIC,
};

/// Result of one fix acquisition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub valid: bool,
    pub coordinates: Option<Coordinates>,
    pub attempts_used: u32,
}

/// How a monitoring session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Session is over, the device may arm full sleep
    Ended,
    /// Still moving, the continue flag is set and the next wake resumes reading
    ContinueRead,
}

#[derive(Serialize)]
struct LocationReport {
    lat: f64,
    lon: f64,
    timestamp: DateTime<Utc>,
    attempts: u32,
}

#[derive(Serialize)]
struct UnavailableReport {
    attempts: u32,
    timestamp: DateTime<Utc>,
}

/// JSON message for `report`, none when it cannot be encoded
fn json_message(prefix: &str, suffix: &str, report: &impl Serialize) -> Option<TelemetryMessage> {
    let topic = format!("{prefix}{suffix}");
    match serde_json::to_vec(report) {
        Ok(payload) => Some(TelemetryMessage::new(topic, payload)),
        Err(e) => {
            warn!("Could not encode report for {}: {}", topic, e);
            None
        }
    }
}

/// Things a monitoring session reads and writes besides the receiver
pub struct SessionContext<'a> {
    pub motion: &'a mut MotionDetector,
    pub store: &'a mut PersistentStateStore,
    pub telemetry: &'a mut TelemetryClient,
    pub topic_prefix: &'a str,
    pub now: DateTime<Utc>,
}

pub struct LocationMonitor {
    gps: Box<dyn GpsReceiver>,
    max_attempts: u32,
    fix_timeout: Duration,
}

impl LocationMonitor {
    pub fn new(gps: Box<dyn GpsReceiver>, max_attempts: u32, fix_timeout: Duration) -> Self {
        LocationMonitor {
            gps,
            max_attempts,
            fix_timeout,
        }
    }

    /// Try for a fix up to `max_attempts` times, at least once
    pub async fn acquire_fix(&mut self, max_attempts: u32) -> Result<LocationFix, Fault> {
        let attempts = max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.gps.request_fix(self.fix_timeout).await {
                Ok(true) => {
                    let coordinates = self.gps.read_coordinates().await?;
                    info!("GPS fix on attempt {}: {:?}", attempt, coordinates);
                    return Ok(LocationFix {
                        valid: true,
                        coordinates: Some(coordinates),
                        attempts_used: attempt,
                    });
                }
                Ok(false) => debug!("No GPS fix on attempt {}", attempt),
                Err(err) => warn!("GPS fix attempt {} failed: {}", attempt, err),
            }
        }
        Ok(LocationFix {
            valid: false,
            coordinates: None,
            attempts_used: attempts,
        })
    }

    /// Acquire and publish a fix, optionally following motion afterwards
    pub async fn monitor_location(
        &mut self,
        follow_motion: bool,
        ctx: SessionContext<'_>,
    ) -> Result<MonitorOutcome, Fault> {
        let fix = self.acquire_fix(self.max_attempts).await?;

        let Some(coordinates) = fix.coordinates.filter(|_| fix.valid) else {
            info!("Location unavailable after {} attempts", fix.attempts_used);
            let report = UnavailableReport {
                attempts: fix.attempts_used,
                timestamp: ctx.now,
            };
            if let Some(msg) = json_message(ctx.topic_prefix, GPS_UNAVAILABLE_TOPIC, &report) {
                ctx.telemetry.send(msg).await;
            }
            return Ok(MonitorOutcome::Ended);
        };

        let report = LocationReport {
            lat: coordinates.lat,
            lon: coordinates.lon,
            timestamp: ctx.now,
            attempts: fix.attempts_used,
        };
        let delivered = match json_message(ctx.topic_prefix, GPS_TOPIC, &report) {
            Some(msg) => ctx.telemetry.send(msg).await,
            None => false,
        };
        if delivered {
            ctx.store.set_last_location_log(ctx.now).await?;
        }

        if !follow_motion {
            return Ok(MonitorOutcome::Ended);
        }

        if ctx.motion.detect().await?.in_motion {
            info!("Still in motion, resuming GPS read after the next wake");
            ctx.store.set_continue_gps_read().await?;
            Ok(MonitorOutcome::ContinueRead)
        } else {
            info!("Motion stopped, ending monitoring session");
            Ok(MonitorOutcome::Ended)
        }
    }

    /// Let the receiver power down for a full sleep
    pub async fn standby(&mut self) -> Result<(), Fault> {
        self.gps.standby().await
    }
}
