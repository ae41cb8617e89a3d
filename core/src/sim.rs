//! One-axis tracking simulation
//!
//! This module provides:
//! - A simulated target (`TrackingScenario`) moving under a constant commanded acceleration and observed by a
//!   noisy position sensor
//! - A periodic task (`TrackingTask`) that runs an [UnscentedKalmanFilter] against the scenario once per cycle
//! - A record type (`TrackingRecord`) for exporting the truth, the measurements and the estimates to CSV
//!
//! The filter state is `[position, velocity]`. Each cycle the truth advances by the elapsed time, the filter
//! predicts with [ConstantVelocity] driven by the commanded acceleration and is then corrected with the position
//! measurement. A cycle whose predict or update is rejected is logged and the run continues with the last good
//! estimate.
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::config::FilterConfig;
use crate::error::{EstimatorError, Result};
use crate::kalman::UnscentedKalmanFilter;
use crate::models::{ConstantVelocity, LinearModel};
use crate::rt::Task;
use crate::Estimator;

/// Simulated target with a noisy position sensor
#[derive(Clone, Debug)]
pub struct TrackingScenario {
    /// Elapsed simulation time in seconds
    pub time: f64,
    /// True position in meters
    pub position: f64,
    /// True velocity in m/s
    pub velocity: f64,
    /// Commanded acceleration in m/s^2
    pub acceleration: f64,
    noise_std: f64,
    noise: Normal<f64>,
    rng: StdRng,
}
impl TrackingScenario {
    /// Create a scenario starting at the origin.
    ///
    /// # Arguments
    /// * `velocity` - initial velocity in m/s
    /// * `acceleration` - constant commanded acceleration in m/s^2
    /// * `noise_std` - standard deviation of the position sensor noise in meters, `>= 0`
    /// * `seed` - seed for the sensor noise generator
    pub fn new(velocity: f64, acceleration: f64, noise_std: f64, seed: u64) -> Result<Self> {
        let invalid = EstimatorError::InvalidParameter {
            name: "noise_std",
            value: noise_std,
        };
        if !(noise_std.is_finite() && noise_std >= 0.0) {
            return Err(invalid);
        }
        let noise = Normal::new(0.0, noise_std).map_err(|_| invalid)?;
        Ok(TrackingScenario {
            time: 0.0,
            position: 0.0,
            velocity,
            acceleration,
            noise_std,
            noise,
            rng: StdRng::seed_from_u64(seed),
        })
    }
    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }
    /// Propagate the truth by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        let a = self.acceleration;
        self.position += self.velocity * dt + 0.5 * a * dt * dt;
        self.velocity += a * dt;
        self.time += dt;
    }
    /// Draw a position measurement of the current truth.
    pub fn measure(&mut self) -> f64 {
        self.position + self.noise.sample(&mut self.rng)
    }
}

/// One cycle of a tracking run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Simulation time in seconds
    pub time: f64,
    pub true_position: f64,
    pub true_velocity: f64,
    /// Raw sensor reading
    pub measurement: f64,
    /// Estimated position
    pub position: f64,
    /// Estimated velocity
    pub velocity: f64,
    pub position_variance: f64,
    pub velocity_variance: f64,
    /// Whether the measurement was fused this cycle
    pub corrected: bool,
}
impl TrackingRecord {
    /// Writes a sequence of records to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Reads records previously written with [TrackingRecord::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> io::Result<Vec<Self>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Root mean square of the estimated and measured position errors over `records`.
///
/// Returns `(estimate_rms, measurement_rms)`, or `None` for an empty slice.
pub fn position_rms(records: &[TrackingRecord]) -> Option<(f64, f64)> {
    if records.is_empty() {
        return None;
    }
    let count = records.len() as f64;
    let (estimate, measurement) = records.iter().fold((0.0, 0.0), |(e, m), r| {
        (
            e + (r.position - r.true_position).powi(2),
            m + (r.measurement - r.true_position).powi(2),
        )
    });
    Some(((estimate / count).sqrt(), (measurement / count).sqrt()))
}

/// Discrete white-acceleration process noise for a `[position, velocity]` state, row-major.
pub fn white_acceleration_noise(intensity: f64, dt: f64) -> [f64; 4] {
    let dt2 = dt * dt;
    [
        0.25 * dt2 * dt2 * intensity,
        0.5 * dt2 * dt * intensity,
        0.5 * dt2 * dt * intensity,
        dt2 * intensity,
    ]
}

/// Periodic task tracking a [TrackingScenario] with an [UnscentedKalmanFilter]
#[derive(Debug)]
pub struct TrackingTask {
    pub filter: UnscentedKalmanFilter,
    pub scenario: TrackingScenario,
    /// Process noise intensity (acceleration variance)
    pub process_noise: f64,
    pub records: Vec<TrackingRecord>,
    motion: ConstantVelocity,
    sensor: LinearModel,
}
impl TrackingTask {
    /// Build the filter from `config` and attach it to `scenario`.
    ///
    /// The configuration must describe a two-state `[position, velocity]` filter.
    pub fn new(config: &FilterConfig, scenario: TrackingScenario, process_noise: f64) -> Result<Self> {
        let motion = ConstantVelocity::new(1)?;
        if config.state_length != motion.state_length() {
            return Err(EstimatorError::Dimension {
                what: "tracking state length",
                expected: motion.state_length(),
                actual: config.state_length,
            });
        }
        if !(process_noise.is_finite() && process_noise >= 0.0) {
            return Err(EstimatorError::InvalidParameter {
                name: "process_noise",
                value: process_noise,
            });
        }
        Ok(TrackingTask {
            filter: config.build()?,
            scenario,
            process_noise,
            records: Vec::new(),
            motion,
            sensor: LinearModel::selection(2, &[0])?,
        })
    }
}
impl Task for TrackingTask {
    fn init(&mut self) {
        log::info!(
            "tracking started: noise_std = {}, acceleration = {}",
            self.scenario.noise_std(),
            self.scenario.acceleration
        );
        self.filter.print();
    }
    fn update(&mut self, time_lapse: f64) {
        self.scenario.advance(time_lapse);
        let control = [self.scenario.acceleration];
        let q = white_acceleration_noise(self.process_noise, time_lapse);
        if let Err(e) = self.filter.predict(&self.motion, time_lapse, 1, &control, &q) {
            log::warn!("t = {:.3}: predict failed, keeping last estimate: {e}", self.scenario.time);
        }
        let z = self.scenario.measure();
        let r = self.scenario.noise_std().powi(2);
        let corrected = match self.filter.update(&self.sensor, time_lapse, 1, &[z], &[r]) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("t = {:.3}: update failed, running open loop: {e}", self.scenario.time);
                false
            }
        };
        let x = self.filter.estimate();
        let p = self.filter.certainty();
        self.records.push(TrackingRecord {
            time: self.scenario.time,
            true_position: self.scenario.position,
            true_velocity: self.scenario.velocity,
            measurement: z,
            position: x[0],
            velocity: x[1],
            position_variance: p[(0, 0)],
            velocity_variance: p[(1, 1)],
            corrected,
        });
    }
}
