use std::time::Duration;

use tracing::{debug, info};

use crate::{
    drivers::{Acceleration, Accelerometer},
    error::Fault,
};

/// Fixed pacing between two accelerometer reads
pub const SAMPLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionDecision {
    pub in_motion: bool,
}

/// Samples of one motion check, with the running per-axis extremes
#[derive(Debug, Clone)]
pub struct MotionWindow {
    threshold: f32,
    samples: Vec<Acceleration>,
    min: [f32; 3],
    max: [f32; 3],
}

impl MotionWindow {
    pub fn new(threshold: f32, capacity: usize) -> Self {
        MotionWindow {
            threshold,
            samples: Vec::with_capacity(capacity),
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    /// Add a sample, returns true when it differs from the previous one by
    /// at least the threshold on any axis.
    pub fn push(&mut self, sample: Acceleration) -> bool {
        let jolt = self
            .samples
            .last()
            .is_some_and(|prev| max_axis_delta(prev, &sample) >= self.threshold);

        for (axis, value) in sample.axes().into_iter().enumerate() {
            self.min[axis] = self.min[axis].min(value);
            self.max[axis] = self.max[axis].max(value);
        }
        self.samples.push(sample);
        jolt
    }

    /// Largest (max - min) over the three axes, zero when empty
    pub fn max_range(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (0..3)
            .map(|axis| self.max[axis] - self.min[axis])
            .fold(0.0, f32::max)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn max_axis_delta(a: &Acceleration, b: &Acceleration) -> f32 {
    a.axes()
        .into_iter()
        .zip(b.axes())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f32::max)
}

pub struct MotionDetector {
    accelerometer: Box<dyn Accelerometer>,
    threshold: f32,
    reads: usize,
}

impl MotionDetector {
    pub fn new(accelerometer: Box<dyn Accelerometer>, threshold: f32, reads: usize) -> Self {
        MotionDetector {
            accelerometer,
            threshold,
            reads,
        }
    }

    /// Sample `reads + 1` readings and decide whether the vehicle moves
    pub async fn detect(&mut self) -> Result<MotionDecision, Fault> {
        let mut window = MotionWindow::new(self.threshold, self.reads + 1);
        window.push(self.accelerometer.read_acceleration().await?);

        for _ in 0..self.reads {
            tokio::time::sleep(SAMPLE_DELAY).await;
            let sample = self.accelerometer.read_acceleration().await?;
            debug!("Acceleration sample {:?}", sample);
            if window.push(sample) {
                info!("Motion detected after {} samples", window.len());
                return Ok(MotionDecision { in_motion: true });
            }
        }

        let range = window.max_range();
        let in_motion = range >= self.threshold;
        info!(
            "Motion check over {} samples, range {:.3} g, in motion: {}",
            window.len(),
            range,
            in_motion
        );
        Ok(MotionDecision { in_motion })
    }

    /// Arm the wake interrupt of the owned accelerometer
    pub async fn arm_interrupt(&mut self, threshold_mg: u16, duration_ms: u16) -> Result<(), Fault> {
        self.accelerometer
            .arm_motion_interrupt(threshold_mg, duration_ms)
            .await
    }
}
