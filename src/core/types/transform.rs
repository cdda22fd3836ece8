//! Rigid transform and covariance types for 3D pose graphs.

use nalgebra::{IsometryMatrix3, Matrix6};

/// Rigid transform in SE(3).
///
/// The rotation is stored as a full 3x3 matrix rather than a quaternion, so
/// repeated composition accumulates numerical drift that
/// [`orthogonalize`](crate::core::math::orthogonalize) can repair.
pub type Transform = IsometryMatrix3<f64>;

/// 6x6 covariance of a pose constraint.
///
/// Row/column order is translation (x, y, z) then rotation (rx, ry, rz).
/// Symmetric positive-definite; identity when the producer has no estimate.
pub type Covariance = Matrix6<f64>;

/// Unique identifier of a node in the pose graph.
///
/// Assigned monotonically by the graph and never reused.
pub type NodeId = u64;
