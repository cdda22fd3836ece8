//! SetuSLAM - graph-based SLAM back-end.
//!
//! An online pose-graph back-end: as a robot gathers sensor readings, the
//! [`Mapper`] maintains a graph whose nodes are historical poses tagged with
//! their measurements and whose edges are relative-pose constraints with
//! covariance, and drives a non-linear solver that refines all poses to best
//! satisfy the constraints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      io/                            │  ← Graph export
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (mapper, pose graph, spatial index,          │
//! │         solver interface + built-in LM solver)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Collaborators
//! │      (registration interface, ICP, odometry)        │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Data flow for one reading
//!
//! reading → sensor resolved by name → odometric guess fetched → distance
//! gate → node created → sequential edge via registration against the last
//! node → neighbor candidates via the spatial index → up to K loop-closure
//! edges → (on request) solver invoked → corrected poses written back.
//!
//! # Example
//!
//! ```no_run
//! use setu_slam::engine::{Mapper, MapperConfig};
//! use setu_slam::engine::graph::{GraphOptimizer, GraphOptimizerConfig};
//! use setu_slam::sensors::{PointCloudSensor, PointCloudSensorConfig};
//! # use setu_slam::core::types::{Measurement, MeasurementData, PointCloud3D};
//!
//! let mut mapper = Mapper::new(MapperConfig::default());
//! mapper.register_sensor(Box::new(PointCloudSensor::new(
//!     "lidar",
//!     PointCloudSensorConfig::default(),
//! )))?;
//! mapper.set_solver(Box::new(GraphOptimizer::new(GraphOptimizerConfig::default())));
//!
//! # let reading = Measurement::new(0, 0, "robot", "lidar",
//! #     MeasurementData::PointCloud(PointCloud3D::new()));
//! if mapper.add_reading(reading)? {
//!     mapper.optimize()?;
//! }
//! # Ok::<(), setu_slam::Error>(())
//! ```

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Sensor collaborators (depends on core)
// ============================================================================
pub mod sensors;

// ============================================================================
// Layer 3: Graph engine (depends on core, sensors)
// ============================================================================
pub mod engine;

// ============================================================================
// Layer 4: I/O (depends on all layers)
// ============================================================================
pub mod io;

mod error;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

pub use crate::error::{Error, Result};

// Core types
pub use crate::core::math;
pub use crate::core::types::{Covariance, Measurement, MeasurementData, NodeId, Transform};
pub use crate::core::types::{Point3, PointCloud3D};

// Sensors
pub use crate::sensors::{
    Constraint, Odometry, OdometryBuffer, OdometryError, PointCloudSensor,
    PointCloudSensorConfig, RegistrationError, Sensor,
};

// Engine
pub use crate::engine::graph::{
    Edge, EdgeLabel, GraphOptimizer, GraphOptimizerConfig, Node, OptimizationRun, PoseGraph,
    Solver, SpatialIndex,
};
pub use crate::engine::{Mapper, MapperConfig};
