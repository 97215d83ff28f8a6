use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::{
    drivers::{PowerManager, WakeCause},
    error::Fault,
};

/// Latched accelerometer interrupt line, shared by the accelerometer that
/// raises it and the power manager that sleeps on it
#[derive(Clone, Default)]
pub struct WakeLatch {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl WakeLatch {
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Wait until raised, consuming the latch
    pub async fn wait(&self) {
        loop {
            if self.raised.swap(false, Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Deep sleep stand-in for a host that cannot power down. The process stays
/// up, waits out the armed wake sources and reports the one that fired.
pub struct HostPower {
    latch: WakeLatch,
    next_cause: WakeCause,
    timer: Duration,
    accelerometer_armed: bool,
}

impl HostPower {
    pub fn new(latch: WakeLatch) -> Self {
        HostPower {
            latch,
            next_cause: WakeCause::PowerOn,
            timer: Duration::ZERO,
            accelerometer_armed: false,
        }
    }
}

#[async_trait]
impl PowerManager for HostPower {
    async fn wake_cause(&mut self) -> Result<WakeCause, Fault> {
        Ok(self.next_cause)
    }

    async fn configure_wake_sources(
        &mut self,
        timer: Duration,
        accelerometer_armed: bool,
    ) -> Result<(), Fault> {
        self.timer = timer;
        self.accelerometer_armed = accelerometer_armed;
        Ok(())
    }

    async fn enter_deep_sleep(&mut self, keep_gps_powered: bool) -> Result<(), Fault> {
        info!(
            "Entering simulated deep sleep for {:?} (gps powered: {})",
            self.timer, keep_gps_powered
        );
        let cause = if self.accelerometer_armed {
            tokio::select! {
                _ = tokio::time::sleep(self.timer) => WakeCause::Timer,
                _ = self.latch.wait() => WakeCause::Accelerometer,
            }
        } else {
            tokio::time::sleep(self.timer).await;
            WakeCause::Timer
        };
        self.next_cause = cause;
        // an interrupt that was not armed must not leak into the next sleep
        self.latch.clear();
        debug!("Woke from simulated sleep: {:?}", self.next_cause);
        Ok(())
    }
}
