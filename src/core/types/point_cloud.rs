//! 3D point cloud type used as a sensor payload.

use nalgebra::Point3 as NPoint3;
use serde::{Deserialize, Serialize};

use super::Transform;

/// A 3D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    /// X coordinate in meters
    pub x: f32,
    /// Y coordinate in meters
    pub y: f32,
    /// Z coordinate in meters
    pub z: f32,
}

impl Point3 {
    /// Create a new point.
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point3) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

impl Default for Point3 {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

/// A collection of 3D points in Cartesian coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud3D {
    /// Points in the sensor-local frame.
    pub points: Vec<Point3>,
}

impl PointCloud3D {
    /// Create an empty point cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cloud from a vector of points.
    pub fn from_points(points: Vec<Point3>) -> Self {
        Self { points }
    }

    /// Number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the cloud has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate over the points.
    pub fn iter(&self) -> impl Iterator<Item = &Point3> {
        self.points.iter()
    }

    /// Append a point.
    #[inline]
    pub fn push(&mut self, point: Point3) {
        self.points.push(point);
    }

    /// Transform every point into the frame described by `transform`.
    ///
    /// Returns a new cloud; the original is untouched.
    pub fn transform(&self, transform: &Transform) -> PointCloud3D {
        let points = self
            .points
            .iter()
            .map(|p| {
                let q = transform * NPoint3::new(p.x as f64, p.y as f64, p.z as f64);
                Point3::new(q.x as f32, q.y as f32, q.z as f32)
            })
            .collect();
        PointCloud3D { points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Translation3, Vector3};

    #[test]
    fn test_point_distance() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(2.0, 3.0, 6.0);
        assert_relative_eq!(a.distance(&b), 7.0);
        assert_relative_eq!(a.distance_squared(&b), 49.0);
    }

    #[test]
    fn test_cloud_transform_translation() {
        let cloud = PointCloud3D::from_points(vec![Point3::new(1.0, 0.0, 0.0)]);
        let tf = Transform::from_parts(
            Translation3::new(0.0, 2.0, 0.0),
            Rotation3::identity(),
        );

        let moved = cloud.transform(&tf);
        assert_relative_eq!(moved.points[0].x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(moved.points[0].y, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cloud_transform_rotation() {
        let cloud = PointCloud3D::from_points(vec![Point3::new(1.0, 0.0, 0.0)]);
        let tf = Transform::from_parts(
            Translation3::identity(),
            Rotation3::from_scaled_axis(Vector3::z() * std::f64::consts::FRAC_PI_2),
        );

        let rotated = cloud.transform(&tf);
        assert_relative_eq!(rotated.points[0].x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(rotated.points[0].y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_cloud() {
        let cloud = PointCloud3D::new();
        assert!(cloud.is_empty());
        assert_eq!(cloud.len(), 0);
    }
}
