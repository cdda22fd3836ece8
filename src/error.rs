//! Error types for the pose-graph back-end.
//!
//! # Error Recovery Strategies
//!
//! ## Fatal Per-Reading Errors (Reject the Reading)
//!
//! - **`UnknownSensor`**: the measurement names a sensor that was never
//!   registered. Register the sensor and re-submit.
//! - **`Odometry`**: the odometry source could not answer the timestamp
//!   query. The reading is rejected with no state change.
//! - **`Registration`**: a sensor refused the measurement payload
//!   (`BadMeasurementType`). Check which variant the sensor expects.
//!
//! ## Recoverable Conditions (Not Errors)
//!
//! A reading suppressed by the distance gate, or a registration `NoMatch`
//! that falls back to an odometry-only node, is reported as `Ok(false)` /
//! a skipped link rather than an error.
//!
//! ## Contract Violations (Caller Bugs)
//!
//! - **`UnknownNode`** / **`SelfLoop`**: an edge referenced a node that does
//!   not exist, or both endpoints are the same node.
//! - **`NoSolver`**: `optimize()` was called before a solver was configured.

use thiserror::Error;

use crate::core::types::NodeId;
use crate::sensors::odometry::OdometryError;
use crate::sensors::RegistrationError;

/// Errors surfaced by the mapper and graph store.
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("sensor '{0}' has not been registered")]
    UnknownSensor(String),

    #[error("sensor '{0}' is already registered")]
    DuplicateSensor(String),

    #[error("odometry error: {0}")]
    Odometry(#[from] OdometryError),

    #[error("registration error: {0}")]
    Registration(RegistrationError),

    #[error("a solver must be set before optimize() is called")]
    NoSolver,

    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    #[error("self-loop edge on node {0}")]
    SelfLoop(NodeId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
