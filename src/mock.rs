//! Recording fakes of the board collaborators.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::{
    config::TrackerConfig,
    controller::{Board, WakeCycleController},
    drivers::{
        Acceleration, Accelerometer, Advertisement, Clock, Coordinates, Credentials, GpsReceiver,
        MessageBus, NetworkLink, NonVolatileStore, PowerManager, RadioScanner, WakeCause,
    },
    error::Fault,
    TelemetryMessage,
};

#[derive(Default)]
struct AccelInner {
    samples: VecDeque<Acceleration>,
    last: Acceleration,
    reads: usize,
    failing: bool,
    armed: Vec<(u16, u16)>,
}

/// Replays queued samples, then repeats the last one
#[derive(Clone, Default)]
pub struct FakeAccelerometer {
    inner: Arc<Mutex<AccelInner>>,
}

impl FakeAccelerometer {
    pub fn with_samples(samples: Vec<Acceleration>) -> Self {
        let fake = FakeAccelerometer::default();
        fake.inner.lock().unwrap().samples = samples.into();
        fake
    }

    pub fn failing() -> Self {
        let fake = FakeAccelerometer::default();
        fake.inner.lock().unwrap().failing = true;
        fake
    }

    pub fn reads(&self) -> usize {
        self.inner.lock().unwrap().reads
    }

    pub fn armed(&self) -> Vec<(u16, u16)> {
        self.inner.lock().unwrap().armed.clone()
    }
}

#[async_trait]
impl Accelerometer for FakeAccelerometer {
    async fn read_acceleration(&mut self) -> Result<Acceleration, Fault> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            return Err(Fault::Accelerometer("bus timeout".to_string()));
        }
        inner.reads += 1;
        if let Some(sample) = inner.samples.pop_front() {
            inner.last = sample;
        }
        Ok(inner.last)
    }

    async fn arm_motion_interrupt(
        &mut self,
        threshold_mg: u16,
        duration_ms: u16,
    ) -> Result<(), Fault> {
        self.inner
            .lock()
            .unwrap()
            .armed
            .push((threshold_mg, duration_ms));
        Ok(())
    }
}

#[derive(Default)]
struct GpsInner {
    fix_on: Option<u32>,
    coordinates: Option<Coordinates>,
    erroring: bool,
    requests: u32,
    standbys: usize,
}

/// Fixes once the total request count reaches `fix_on`
#[derive(Clone, Default)]
pub struct FakeGps {
    inner: Arc<Mutex<GpsInner>>,
}

impl FakeGps {
    pub fn never_fixes() -> Self {
        FakeGps::default()
    }

    pub fn fixes_on(attempt: u32, coordinates: Coordinates) -> Self {
        let fake = FakeGps::default();
        {
            let mut inner = fake.inner.lock().unwrap();
            inner.fix_on = Some(attempt);
            inner.coordinates = Some(coordinates);
        }
        fake
    }

    pub fn erroring() -> Self {
        let fake = FakeGps::default();
        fake.inner.lock().unwrap().erroring = true;
        fake
    }

    pub fn requests(&self) -> u32 {
        self.inner.lock().unwrap().requests
    }

    pub fn standbys(&self) -> usize {
        self.inner.lock().unwrap().standbys
    }
}

#[async_trait]
impl GpsReceiver for FakeGps {
    async fn request_fix(&mut self, _timeout: Duration) -> Result<bool, Fault> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests += 1;
        if inner.erroring {
            return Err(Fault::Gps("no NMEA output".to_string()));
        }
        Ok(inner.fix_on.is_some_and(|n| inner.requests >= n))
    }

    async fn read_coordinates(&mut self) -> Result<Coordinates, Fault> {
        self.inner
            .lock()
            .unwrap()
            .coordinates
            .ok_or_else(|| Fault::Gps("no coordinates".to_string()))
    }

    async fn standby(&mut self) -> Result<(), Fault> {
        self.inner.lock().unwrap().standbys += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RadioInner {
    adverts: Vec<String>,
    connects: Vec<String>,
    fail_connect: bool,
    // held so scans stay open until their window ends
    open_scans: Vec<Sender<Advertisement>>,
}

#[derive(Clone, Default)]
pub struct FakeRadio {
    inner: Arc<Mutex<RadioInner>>,
}

impl FakeRadio {
    pub fn silent() -> Self {
        FakeRadio::default()
    }

    pub fn advertising(addresses: &[&str]) -> Self {
        let fake = FakeRadio::default();
        fake.inner.lock().unwrap().adverts = addresses.iter().map(|a| a.to_string()).collect();
        fake
    }

    pub fn fail_connect(&self, fail: bool) {
        self.inner.lock().unwrap().fail_connect = fail;
    }

    pub fn connects(&self) -> Vec<String> {
        self.inner.lock().unwrap().connects.clone()
    }
}

#[async_trait]
impl RadioScanner for FakeRadio {
    async fn scan(&mut self, _duration: Duration) -> Result<Receiver<Advertisement>, Fault> {
        let mut inner = self.inner.lock().unwrap();
        let (tx, rx) = mpsc::channel(inner.adverts.len().max(1));
        for address in &inner.adverts {
            let _ = tx.try_send(Advertisement {
                address: address.clone(),
                payload: Vec::new(),
            });
        }
        inner.open_scans.push(tx);
        Ok(rx)
    }

    async fn connect(&mut self, address: &str) -> Result<(), Fault> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects.push(address.to_string());
        if inner.fail_connect {
            return Err(Fault::Radio("connection refused".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        Ok(())
    }
}

#[derive(Default)]
struct NetInner {
    connected: bool,
    failures_left: usize,
    connect_calls: usize,
    disconnect_calls: usize,
    fail_disconnect: bool,
}

/// Link whose `connect` fails a set number of times
#[derive(Clone, Default)]
pub struct FakeNetwork {
    inner: Arc<Mutex<NetInner>>,
}

impl FakeNetwork {
    pub fn connected() -> Self {
        let fake = FakeNetwork::default();
        fake.inner.lock().unwrap().connected = true;
        fake
    }

    pub fn disconnected(failures: usize) -> Self {
        let fake = FakeNetwork::default();
        fake.inner.lock().unwrap().failures_left = failures;
        fake
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.inner.lock().unwrap().fail_disconnect = fail;
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.lock().unwrap().disconnect_calls
    }
}

#[async_trait]
impl NetworkLink for FakeNetwork {
    async fn is_connected(&mut self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn connect(&mut self) -> Result<(), Fault> {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_calls += 1;
        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            return Err(Fault::Network("no known network in range".to_string()));
        }
        inner.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnect_calls += 1;
        if inner.fail_disconnect {
            return Err(Fault::Network("radio busy".to_string()));
        }
        inner.connected = false;
        Ok(())
    }
}

#[derive(Default)]
struct BusInner {
    connect_failures_left: usize,
    publish_failures_left: usize,
    fail_disconnect: bool,
    connect_calls: usize,
    publish_calls: usize,
    published: Vec<TelemetryMessage>,
}

/// Broker session that records every delivered message
#[derive(Clone, Default)]
pub struct FakeBus {
    inner: Arc<Mutex<BusInner>>,
}

impl FakeBus {
    pub fn failing_connects(failures: usize) -> Self {
        let fake = FakeBus::default();
        fake.inner.lock().unwrap().connect_failures_left = failures;
        fake
    }

    pub fn fail_publishes(&self, failures: usize) {
        self.inner.lock().unwrap().publish_failures_left = failures;
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.inner.lock().unwrap().fail_disconnect = fail;
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().connect_calls
    }

    pub fn publish_calls(&self) -> usize {
        self.inner.lock().unwrap().publish_calls
    }

    pub fn published(&self) -> Vec<TelemetryMessage> {
        self.inner.lock().unwrap().published.clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.published().into_iter().map(|msg| msg.topic).collect()
    }
}

#[async_trait]
impl MessageBus for FakeBus {
    async fn connect(&mut self, _credentials: &Credentials) -> Result<(), Fault> {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_calls += 1;
        if inner.connect_failures_left > 0 {
            inner.connect_failures_left -= 1;
            return Err(Fault::Bus("connection refused".to_string()));
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Fault> {
        let mut inner = self.inner.lock().unwrap();
        inner.publish_calls += 1;
        if inner.publish_failures_left > 0 {
            inner.publish_failures_left -= 1;
            return Err(Fault::Bus("broken pipe".to_string()));
        }
        inner.published.push(TelemetryMessage::new(topic, payload));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        if self.inner.lock().unwrap().fail_disconnect {
            return Err(Fault::Bus("not connected".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct StoreInner {
    values: HashMap<String, i64>,
    fail_erase: bool,
}

/// Non-volatile store shared by every clone, so it outlives a controller
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, value: i64) {
        self.inner
            .lock()
            .unwrap()
            .values
            .insert(key.to_string(), value);
    }

    pub fn value(&self, key: &str) -> Option<i64> {
        self.inner.lock().unwrap().values.get(key).copied()
    }

    pub fn fail_erase(&self, fail: bool) {
        self.inner.lock().unwrap().fail_erase = fail;
    }
}

#[async_trait]
impl NonVolatileStore for MemoryStore {
    async fn get(&mut self, key: &str) -> Result<Option<i64>, Fault> {
        Ok(self.value(key))
    }

    async fn set(&mut self, key: &str, value: i64) -> Result<(), Fault> {
        self.insert(key, value);
        Ok(())
    }

    async fn erase(&mut self, key: &str) -> Result<(), Fault> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_erase {
            return Err(Fault::Store("flash write failed".to_string()));
        }
        inner.values.remove(key);
        Ok(())
    }
}

struct PowerInner {
    cause: WakeCause,
    configured: Vec<(Duration, bool)>,
    sleeps: Vec<bool>,
}

#[derive(Clone)]
pub struct FakePower {
    inner: Arc<Mutex<PowerInner>>,
}

impl FakePower {
    pub fn new(cause: WakeCause) -> Self {
        FakePower {
            inner: Arc::new(Mutex::new(PowerInner {
                cause,
                configured: Vec::new(),
                sleeps: Vec::new(),
            })),
        }
    }

    pub fn wake_as(&self, cause: WakeCause) {
        self.inner.lock().unwrap().cause = cause;
    }

    pub fn configured(&self) -> Vec<(Duration, bool)> {
        self.inner.lock().unwrap().configured.clone()
    }

    /// `keep_gps_powered` of every deep sleep entered
    pub fn sleeps(&self) -> Vec<bool> {
        self.inner.lock().unwrap().sleeps.clone()
    }
}

#[async_trait]
impl PowerManager for FakePower {
    async fn wake_cause(&mut self) -> Result<WakeCause, Fault> {
        Ok(self.inner.lock().unwrap().cause)
    }

    async fn configure_wake_sources(
        &mut self,
        timer: Duration,
        accelerometer_armed: bool,
    ) -> Result<(), Fault> {
        self.inner
            .lock()
            .unwrap()
            .configured
            .push((timer, accelerometer_armed));
        Ok(())
    }

    async fn enter_deep_sleep(&mut self, keep_gps_powered: bool) -> Result<(), Fault> {
        self.inner.lock().unwrap().sleeps.push(keep_gps_powered);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// One set of fakes, cloned into every controller built from it
pub struct Rig {
    pub accel: FakeAccelerometer,
    pub gps: FakeGps,
    pub radio: FakeRadio,
    pub network: FakeNetwork,
    pub bus: FakeBus,
    pub memory: MemoryStore,
    pub power: FakePower,
    pub clock: ManualClock,
}

impl Rig {
    /// Stationary vehicle, no fix, connected network, timer wake
    pub fn new() -> Self {
        Rig {
            accel: FakeAccelerometer::with_samples(vec![Acceleration::new(0.0, 0.0, 1.0)]),
            gps: FakeGps::never_fixes(),
            radio: FakeRadio::silent(),
            network: FakeNetwork::connected(),
            bus: FakeBus::default(),
            memory: MemoryStore::default(),
            power: FakePower::new(WakeCause::Timer),
            clock: ManualClock::at(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()),
        }
    }

    pub fn board(&self) -> Board {
        Board {
            accelerometer: Box::new(self.accel.clone()),
            gps: Box::new(self.gps.clone()),
            radio: Some(Box::new(self.radio.clone())),
            network: Box::new(self.network.clone()),
            bus: Box::new(self.bus.clone()),
            store: Box::new(self.memory.clone()),
            power: Box::new(self.power.clone()),
            clock: Box::new(self.clock.clone()),
        }
    }

    pub fn controller(&self, config: TrackerConfig) -> WakeCycleController {
        WakeCycleController::new(config, self.board())
    }
}
