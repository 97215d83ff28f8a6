//! The wake-cycle state machine.
//!
//! Every wake runs `Booting -> Classifying -> Handling* -> Sleeping` once
//! and ends by suspending the board. Only an unreachable network at boot
//! ends a cycle any other way.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    config::TrackerConfig,
    drivers::{
        Accelerometer, Clock, GpsReceiver, MessageBus, NetworkLink, NonVolatileStore,
        PowerManager, RadioScanner, WakeCause,
    },
    error::Fault,
    location::{LocationMonitor, MonitorOutcome, SessionContext},
    motion::MotionDetector,
    proximity::{OwnerVerdict, ProximityGuard},
    state_store::PersistentStateStore,
    telemetry::TelemetryClient,
    TelemetryMessage, EXCEPTION_TOPIC, HEARTBEAT_TOPIC, WAKEUP_TOPIC,
};

/// Why this cycle runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    AccelerometerInterrupt,
    ContinueGpsRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Booting,
    Classifying,
    HandlingTimer,
    HandlingAccelerometer,
    ResumingGpsRead,
    Sleeping,
}

/// Wake sources and power state requested for the coming sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub timer: Duration,
    pub accelerometer_armed: bool,
    pub keep_gps_powered: bool,
}

impl SleepPlan {
    /// Timer plus accelerometer interrupt, receiver off
    pub fn full(timer: Duration) -> Self {
        SleepPlan {
            timer,
            accelerometer_armed: true,
            keep_gps_powered: false,
        }
    }

    /// Timer only, for a vehicle the owner is using
    pub fn quiet(timer: Duration) -> Self {
        SleepPlan {
            timer,
            accelerometer_armed: false,
            keep_gps_powered: false,
        }
    }

    /// Short timer-only nap with the receiver kept powered
    pub fn between_reads(timer: Duration) -> Self {
        SleepPlan {
            timer,
            accelerometer_armed: false,
            keep_gps_powered: true,
        }
    }
}

/// Summary of a finished cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub reason: WakeReason,
    pub plan: SleepPlan,
    /// Fault that aborted the handling branch, if any
    pub fault: Option<String>,
}

/// Board collaborators handed to the controller at boot
pub struct Board {
    pub accelerometer: Box<dyn Accelerometer>,
    pub gps: Box<dyn GpsReceiver>,
    /// Only used when an owner address is configured
    pub radio: Option<Box<dyn RadioScanner>>,
    pub network: Box<dyn NetworkLink>,
    pub bus: Box<dyn MessageBus>,
    pub store: Box<dyn NonVolatileStore>,
    pub power: Box<dyn PowerManager>,
    pub clock: Box<dyn Clock>,
}

pub struct WakeCycleController {
    config: TrackerConfig,
    motion: MotionDetector,
    location: LocationMonitor,
    proximity: Option<ProximityGuard>,
    telemetry: TelemetryClient,
    store: PersistentStateStore,
    power: Box<dyn PowerManager>,
    clock: Box<dyn Clock>,
    state: CycleState,
}

impl WakeCycleController {
    pub fn new(config: TrackerConfig, board: Board) -> Self {
        let proximity = match (config.owner_address.as_ref(), board.radio) {
            (Some(owner), Some(radio)) => Some(ProximityGuard::new(
                radio,
                owner.clone(),
                config.multi_wake_threshold,
            )),
            _ => None,
        };

        WakeCycleController {
            motion: MotionDetector::new(
                board.accelerometer,
                config.motion_threshold,
                config.motion_reads,
            ),
            location: LocationMonitor::new(
                board.gps,
                config.gps_max_attempts,
                config.gps_fix_timeout,
            ),
            proximity,
            telemetry: TelemetryClient::new(board.network, board.bus, config.credentials.clone()),
            store: PersistentStateStore::new(board.store),
            power: board.power,
            clock: board.clock,
            state: CycleState::Booting,
            config,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Run one wake cycle through to sleep.
    ///
    /// Returns an error only when the network stays unreachable at boot,
    /// the caller is then expected to hard reset the device.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, Fault> {
        self.transition(CycleState::Booting);
        self.telemetry
            .await_network(self.config.boot_network_timeout)
            .await?;

        self.transition(CycleState::Classifying);
        let reason = self.classify().await;
        info!("Wake reason: {:?}", reason);

        let handled = match reason {
            WakeReason::Timer => {
                self.transition(CycleState::HandlingTimer);
                self.handle_timer().await
            }
            WakeReason::AccelerometerInterrupt => {
                self.transition(CycleState::HandlingAccelerometer);
                self.handle_accelerometer().await
            }
            WakeReason::ContinueGpsRead => {
                self.transition(CycleState::ResumingGpsRead);
                self.resume_gps_read().await
            }
        };

        let (plan, fault) = match handled {
            Ok(plan) => (plan, None),
            Err(fault) => {
                error!("Wake handling failed: {}", fault);
                self.report_fault(&fault).await;
                (SleepPlan::full(self.config.sleep), Some(fault.to_string()))
            }
        };

        self.transition(CycleState::Sleeping);
        self.sleep(plan).await;

        Ok(CycleReport {
            reason,
            plan,
            fault,
        })
    }

    async fn classify(&mut self) -> WakeReason {
        // consumed before anything else can fail
        if self.store.take_continue_gps_read().await {
            return WakeReason::ContinueGpsRead;
        }
        match self.power.wake_cause().await {
            Ok(WakeCause::Accelerometer) => WakeReason::AccelerometerInterrupt,
            Ok(cause) => {
                debug!("Hardware wake cause {:?}", cause);
                WakeReason::Timer
            }
            Err(err) => {
                warn!("Could not read wake cause, assuming timer: {}", err);
                WakeReason::Timer
            }
        }
    }

    async fn handle_timer(&mut self) -> Result<SleepPlan, Fault> {
        self.telemetry
            .send(TelemetryMessage::new(
                self.config.topic(HEARTBEAT_TOPIC),
                "1",
            ))
            .await;

        let now = self.clock.now();
        let overdue = match self.store.last_location_log().await {
            Some(last) => (now - last)
                .to_std()
                .map_or(true, |since| since > self.config.log_interval),
            None => true,
        };
        if overdue {
            info!("Location log interval elapsed, running a single location pass");
            self.monitor(false).await?;
        }
        Ok(SleepPlan::full(self.config.sleep))
    }

    async fn handle_accelerometer(&mut self) -> Result<SleepPlan, Fault> {
        if let Some(guard) = self.proximity.as_mut() {
            match guard.is_owner_nearby(self.config.owner_scan).await {
                Ok(true) => {
                    let now = self.clock.now();
                    if guard.handle_owner_nearby(&mut self.store, now).await?
                        == OwnerVerdict::QuietSleep
                    {
                        return Ok(SleepPlan::quiet(self.config.owner_sleep));
                    }
                }
                Ok(false) => {}
                Err(err) => warn!("Owner scan failed, continuing as absent: {}", err),
            }
        }

        if !self.motion.detect().await?.in_motion {
            info!("No motion, treating as a false wakeup");
            return Ok(SleepPlan::full(self.config.sleep));
        }

        self.telemetry
            .send(TelemetryMessage::new(self.config.topic(WAKEUP_TOPIC), "1"))
            .await;
        let outcome = self.monitor(true).await?;
        Ok(self.plan_after(outcome))
    }

    async fn resume_gps_read(&mut self) -> Result<SleepPlan, Fault> {
        let outcome = self.monitor(true).await?;
        Ok(self.plan_after(outcome))
    }

    async fn monitor(&mut self, follow_motion: bool) -> Result<MonitorOutcome, Fault> {
        let ctx = SessionContext {
            motion: &mut self.motion,
            store: &mut self.store,
            telemetry: &mut self.telemetry,
            topic_prefix: &self.config.topic_prefix,
            now: self.clock.now(),
        };
        self.location.monitor_location(follow_motion, ctx).await
    }

    fn plan_after(&self, outcome: MonitorOutcome) -> SleepPlan {
        match outcome {
            MonitorOutcome::ContinueRead => SleepPlan::between_reads(self.config.between_reads),
            MonitorOutcome::Ended => SleepPlan::full(self.config.sleep),
        }
    }

    async fn report_fault(&mut self, fault: &Fault) {
        self.telemetry
            .send(TelemetryMessage::new(
                self.config.topic(EXCEPTION_TOPIC),
                fault.to_string(),
            ))
            .await;
    }

    /// Arm wake sources, drop the links and suspend. Failures are logged
    /// and never stop the suspend itself.
    async fn sleep(&mut self, plan: SleepPlan) {
        if plan.accelerometer_armed {
            if let Err(err) = self
                .motion
                .arm_interrupt(
                    self.config.interrupt_threshold_mg,
                    self.config.interrupt_duration_ms,
                )
                .await
            {
                error!("Could not arm accelerometer interrupt: {}", err);
            }
        }
        if !plan.keep_gps_powered {
            if let Err(err) = self.location.standby().await {
                warn!("Could not put GPS in standby: {}", err);
            }
        }
        if let Err(err) = self
            .power
            .configure_wake_sources(plan.timer, plan.accelerometer_armed)
            .await
        {
            error!("Could not configure wake sources: {}", err);
        }

        self.telemetry.disconnect().await;

        info!(
            "Sleeping for {:?} (accelerometer armed: {}, gps powered: {})",
            plan.timer, plan.accelerometer_armed, plan.keep_gps_powered
        );
        if let Err(err) = self.power.enter_deep_sleep(plan.keep_gps_powered).await {
            error!("Deep sleep failed: {}", err);
        }
    }

    fn transition(&mut self, next: CycleState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
