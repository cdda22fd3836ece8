//! Core data types for the pose-graph back-end.
//!
//! - [`Transform`]: rigid transform in SE(3)
//! - [`Covariance`]: 6x6 constraint covariance
//! - [`NodeId`]: graph node identifier
//! - [`Measurement`] / [`MeasurementData`]: sensor reading container
//! - [`Point3`] / [`PointCloud3D`]: point cloud payload

mod measurement;
mod point_cloud;
mod transform;

pub use measurement::{Measurement, MeasurementData};
pub use point_cloud::{Point3, PointCloud3D};
pub use transform::{Covariance, NodeId, Transform};
