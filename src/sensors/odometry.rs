//! Odometry pose source.

use nalgebra::{Rotation3, Translation3};
use thiserror::Error;

use crate::core::types::Transform;

/// Failure modes of an odometry query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OdometryError {
    /// No sample brackets the requested timestamp.
    #[error("no odometric pose available for timestamp {0}")]
    NoPose(u64),

    /// The source holds no samples at all.
    #[error("odometry source is empty")]
    Empty,
}

/// An external, drift-prone pose source queried by timestamp.
///
/// Used to seed registration and to gate node creation; the back-end never
/// treats odometric poses as map-frame truth.
pub trait Odometry {
    /// The odometric pose at the given capture time.
    fn odometric_pose(&self, timestamp_us: u64) -> Result<Transform, OdometryError>;
}

/// Pose history answering timestamp queries by interpolation.
///
/// Samples must be pushed in non-decreasing timestamp order. Queries between
/// two samples interpolate linearly in translation and along the shortest
/// rotation path; queries outside the recorded range fail.
#[derive(Debug, Default)]
pub struct OdometryBuffer {
    samples: Vec<(u64, Transform)>,
}

impl OdometryBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pose sample.
    ///
    /// Out-of-order samples are dropped so the buffer stays sorted.
    pub fn push(&mut self, timestamp_us: u64, pose: Transform) {
        if let Some(&(last, _)) = self.samples.last() {
            if timestamp_us < last {
                log::warn!(
                    "Dropping out-of-order odometry sample at {} (last {})",
                    timestamp_us,
                    last
                );
                return;
            }
        }
        self.samples.push((timestamp_us, pose));
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn interpolate(a: &Transform, b: &Transform, t: f64) -> Transform {
        let translation = a.translation.vector + (b.translation.vector - a.translation.vector) * t;
        let relative = a.rotation.inverse() * b.rotation;
        let rotation = a.rotation * Rotation3::from_scaled_axis(relative.scaled_axis() * t);
        Transform::from_parts(Translation3::from(translation), rotation)
    }
}

impl Odometry for OdometryBuffer {
    fn odometric_pose(&self, timestamp_us: u64) -> Result<Transform, OdometryError> {
        if self.samples.is_empty() {
            return Err(OdometryError::Empty);
        }

        let idx = self.samples.partition_point(|&(ts, _)| ts <= timestamp_us);
        if idx == 0 {
            return Err(OdometryError::NoPose(timestamp_us));
        }

        let (ts_a, pose_a) = &self.samples[idx - 1];
        if *ts_a == timestamp_us || idx == self.samples.len() {
            if *ts_a == timestamp_us {
                return Ok(*pose_a);
            }
            return Err(OdometryError::NoPose(timestamp_us));
        }

        let (ts_b, pose_b) = &self.samples[idx];
        let t = (timestamp_us - ts_a) as f64 / (ts_b - ts_a) as f64;
        Ok(Self::interpolate(pose_a, pose_b, t))
    }
}
