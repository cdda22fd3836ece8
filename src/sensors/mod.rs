//! Sensor abstractions: registration and odometry interfaces.
//!
//! A [`Sensor`] computes a relative-pose constraint between two of its own
//! measurements; an [`Odometry`](odometry::Odometry) source answers pose
//! queries by timestamp. Both are consumed by the
//! [`Mapper`](crate::engine::Mapper) through trait objects, so concrete
//! registration backends plug in without touching the graph logic.
//!
//! # Guess convention
//!
//! `calculate_transform(source, target, guess)` seeds the alignment by
//! transforming the source data by `guess` before matching, and the returned
//! transform is `guess ∘ refinement`: always the full source-to-target pose,
//! regardless of how the backend handles initial estimates internally.

pub mod odometry;
mod point_cloud;

pub use odometry::{Odometry, OdometryBuffer, OdometryError};
pub use point_cloud::{PointCloudSensor, PointCloudSensorConfig};

use thiserror::Error;

use crate::core::types::{Covariance, Measurement, Transform};

/// A relative-pose constraint produced by registration.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Measured pose of the target in the source frame.
    pub transform: Transform,

    /// 6x6 covariance of the measurement; identity when unknown.
    pub covariance: Covariance,
}

impl Constraint {
    /// Create a constraint with identity covariance.
    pub fn with_identity_covariance(transform: Transform) -> Self {
        Self {
            transform,
            covariance: Covariance::identity(),
        }
    }
}

/// Failure modes of a registration attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The measurement payload is not the variant this sensor operates on.
    #[error("measurement is not compatible with sensor '{sensor}'")]
    BadMeasurementType {
        /// Name of the refusing sensor.
        sensor: String,
    },

    /// Registration did not converge to an acceptable answer.
    #[error("registration did not converge")]
    NoMatch,
}

/// A named registration backend.
///
/// Implementations must surface `NoMatch` when their internal convergence
/// check fails or the final transform contains non-finite entries; a
/// degenerate transform must never be returned as success.
pub trait Sensor {
    /// Unique name of this sensor; measurements are routed by it.
    fn name(&self) -> &str;

    /// Compute the source→target transform between two measurements.
    ///
    /// `guess` seeds the alignment (see module docs for the convention).
    fn calculate_transform(
        &self,
        source: &Measurement,
        target: &Measurement,
        guess: &Transform,
    ) -> Result<Constraint, RegistrationError>;
}
