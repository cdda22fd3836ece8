//! Sensor measurement container.

use serde::{Deserialize, Serialize};

use super::PointCloud3D;

/// Payload of a measurement.
///
/// Each sensor declares which variant it accepts; handing a sensor the wrong
/// variant surfaces as the explicit
/// [`BadMeasurementType`](crate::sensors::RegistrationError::BadMeasurementType)
/// failure instead of a runtime downcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeasurementData {
    /// A 3D point cloud in the sensor-local frame.
    PointCloud(PointCloud3D),
}

/// A single sensor reading.
///
/// The pose graph takes ownership of the measurement for the lifetime of the
/// node it is attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    /// Caller-assigned unique identity of this reading.
    pub id: u64,

    /// Capture time in microseconds since epoch.
    pub timestamp_us: u64,

    /// Name of the robot that captured the reading.
    pub robot_name: String,

    /// Name of the sensor that produced the reading.
    pub sensor_name: String,

    /// Sensor payload.
    pub data: MeasurementData,
}

impl Measurement {
    /// Create a new measurement.
    pub fn new(
        id: u64,
        timestamp_us: u64,
        robot_name: impl Into<String>,
        sensor_name: impl Into<String>,
        data: MeasurementData,
    ) -> Self {
        Self {
            id,
            timestamp_us,
            robot_name: robot_name.into(),
            sensor_name: sensor_name.into(),
            data,
        }
    }

    /// The point cloud payload, if this measurement carries one.
    pub fn point_cloud(&self) -> Option<&PointCloud3D> {
        match &self.data {
            MeasurementData::PointCloud(cloud) => Some(cloud),
        }
    }
}
