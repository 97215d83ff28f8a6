use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{fs, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    drivers::{Acceleration, Accelerometer},
    error::Fault,
};

use super::power::WakeLatch;

const STANDARD_GRAVITY: f32 = 9.806_65;

/// Poll period of the interrupt watcher
const WATCH_PERIOD: Duration = Duration::from_millis(20);

/// Accelerometer exposed through the Linux IIO sysfs interface
pub struct IioAccelerometer {
    dir: PathBuf,
    latch: WakeLatch,
    watcher: Option<JoinHandle<()>>,
}

impl IioAccelerometer {
    pub fn new(dir: impl Into<PathBuf>, latch: WakeLatch) -> Self {
        IioAccelerometer {
            dir: dir.into(),
            latch,
            watcher: None,
        }
    }
}

impl Drop for IioAccelerometer {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

async fn read_attr(dir: &Path, name: &str) -> Result<f32, Fault> {
    let raw = fs::read_to_string(dir.join(name))
        .await
        .map_err(|e| Fault::Accelerometer(format!("{name}: {e}")))?;
    raw.trim()
        .parse::<f32>()
        .map_err(|e| Fault::Accelerometer(format!("{name}: {e}")))
}

/// One reading in g
async fn read_axes(dir: &Path) -> Result<Acceleration, Fault> {
    let scale = read_attr(dir, "in_accel_scale").await? / STANDARD_GRAVITY;
    Ok(Acceleration::new(
        read_attr(dir, "in_accel_x_raw").await? * scale,
        read_attr(dir, "in_accel_y_raw").await? * scale,
        read_attr(dir, "in_accel_z_raw").await? * scale,
    ))
}

/// Largest per-axis departure from `baseline`, in mg
pub fn deviation_mg(baseline: &Acceleration, sample: &Acceleration) -> f32 {
    baseline
        .axes()
        .into_iter()
        .zip(sample.axes())
        .map(|(b, s)| (s - b).abs() * 1000.0)
        .fold(0.0, f32::max)
}

/// Raise the latch once the deviation stays above the threshold for `hold`
async fn watch(
    dir: PathBuf,
    baseline: Acceleration,
    threshold_mg: f32,
    hold: Duration,
    latch: WakeLatch,
) {
    let mut ticker = tokio::time::interval(WATCH_PERIOD);
    let mut exceeded_since: Option<Instant> = None;
    loop {
        ticker.tick().await;
        let sample = match read_axes(&dir).await {
            Ok(sample) => sample,
            Err(err) => {
                warn!("Accelerometer watcher read failed: {}", err);
                continue;
            }
        };
        if deviation_mg(&baseline, &sample) < threshold_mg {
            exceeded_since = None;
            continue;
        }
        let since = *exceeded_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= hold {
            info!("Accelerometer interrupt");
            latch.raise();
            return;
        }
    }
}

#[async_trait]
impl Accelerometer for IioAccelerometer {
    async fn read_acceleration(&mut self) -> Result<Acceleration, Fault> {
        read_axes(&self.dir).await
    }

    async fn arm_motion_interrupt(
        &mut self,
        threshold_mg: u16,
        duration_ms: u16,
    ) -> Result<(), Fault> {
        if let Some(previous) = self.watcher.take() {
            previous.abort();
        }
        self.latch.clear();

        let baseline = read_axes(&self.dir).await?;
        debug!(
            "Arming motion interrupt at {} mg for {} ms, baseline {:?}",
            threshold_mg, duration_ms, baseline
        );
        self.watcher = Some(tokio::spawn(watch(
            self.dir.clone(),
            baseline,
            f32::from(threshold_mg),
            Duration::from_millis(u64::from(duration_ms)),
            self.latch.clone(),
        )));
        Ok(())
    }
}
