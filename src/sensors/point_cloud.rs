//! Point-to-point ICP registration over 3D point clouds.
//!
//! Classic ICP: iteratively find nearest-neighbor correspondences with a k-d
//! tree, solve the closed-form rigid alignment (SVD), repeat until the
//! incremental transform falls below the convergence epsilons.
//!
//! # Frames
//!
//! The constraint transform is the pose of the target node in the source
//! node's frame, so it maps target-frame coordinates into source-frame
//! coordinates. The source cloud is first shifted into the estimated target
//! frame by the guess; the refinement aligns the target cloud onto it; the
//! returned transform is `guess ∘ refinement`.

use std::collections::BTreeMap;

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix3, Point3 as NPoint3, Rotation3, Translation3, Vector3, SVD};
use serde::{Deserialize, Serialize};

use super::{Constraint, RegistrationError, Sensor};
use crate::core::math::{compose_clean, is_finite, orthogonalize, rotation_angle, translation_norm};
use crate::core::types::{Measurement, PointCloud3D, Transform};

/// Configuration for the point-cloud registration sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointCloudSensorConfig {
    /// Voxel-grid leaf edge length for downsampling, in meters.
    ///
    /// Both clouds are downsampled before alignment. Zero disables
    /// downsampling.
    pub voxel_size: f32,

    /// Maximum correspondence distance (meters).
    ///
    /// Point pairs farther apart than this are rejected as outliers.
    pub max_correspondence_distance: f32,

    /// Maximum number of ICP iterations.
    pub max_iterations: u32,

    /// Convergence threshold on the incremental translation (meters).
    pub translation_epsilon: f64,

    /// Convergence threshold on the incremental rotation (radians).
    pub rotation_epsilon: f64,

    /// Minimum number of valid correspondences per iteration.
    pub min_correspondences: usize,

    /// Reject a converged match whose mean squared error exceeds this.
    ///
    /// Disabled when `None`.
    pub max_fitness_score: Option<f32>,
}

impl Default for PointCloudSensorConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.25,
            max_correspondence_distance: 0.5,
            max_iterations: 50,
            translation_epsilon: 0.001,
            rotation_epsilon: 0.001,
            min_correspondences: 10,
            max_fitness_score: None,
        }
    }
}

/// Registration sensor for [`PointCloud3D`] measurements.
pub struct PointCloudSensor {
    name: String,
    config: PointCloudSensorConfig,
}

impl PointCloudSensor {
    /// Create a new sensor with the given name and configuration.
    pub fn new(name: impl Into<String>, config: PointCloudSensorConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &PointCloudSensorConfig {
        &self.config
    }

    fn cloud_of<'a>(&self, m: &'a Measurement) -> Result<&'a PointCloud3D, RegistrationError> {
        m.point_cloud().ok_or_else(|| {
            log::error!(
                "Measurement {} given to sensor '{}' is not a point cloud",
                m.id,
                self.name
            );
            RegistrationError::BadMeasurementType {
                sensor: self.name.clone(),
            }
        })
    }

    /// Voxel-grid downsampling: one centroid per occupied voxel.
    fn voxel_downsample(cloud: &PointCloud3D, leaf: f32) -> PointCloud3D {
        if leaf <= 0.0 {
            return cloud.clone();
        }

        let mut voxels: BTreeMap<(i64, i64, i64), (f64, f64, f64, u32)> = BTreeMap::new();
        for p in cloud.iter() {
            let key = (
                (p.x / leaf).floor() as i64,
                (p.y / leaf).floor() as i64,
                (p.z / leaf).floor() as i64,
            );
            let cell = voxels.entry(key).or_insert((0.0, 0.0, 0.0, 0));
            cell.0 += p.x as f64;
            cell.1 += p.y as f64;
            cell.2 += p.z as f64;
            cell.3 += 1;
        }

        let points = voxels
            .values()
            .map(|&(sx, sy, sz, n)| {
                let n = n as f64;
                crate::core::types::Point3::new(
                    (sx / n) as f32,
                    (sy / n) as f32,
                    (sz / n) as f32,
                )
            })
            .collect();
        PointCloud3D { points }
    }

    fn build_kdtree(cloud: &PointCloud3D) -> KdTree<f32, 3> {
        let mut tree: KdTree<f32, 3> = KdTree::new();
        for (i, point) in cloud.iter().enumerate() {
            tree.add(&[point.x, point.y, point.z], i as u64);
        }
        tree
    }

    /// Find correspondences from the moving cloud (under `transform`) to the
    /// fixed cloud.
    ///
    /// Returns `(moving_idx, fixed_idx)` pairs within the maximum
    /// correspondence distance.
    fn find_correspondences(
        &self,
        moving: &PointCloud3D,
        fixed_tree: &KdTree<f32, 3>,
        transform: &Transform,
    ) -> Vec<(usize, usize)> {
        let max_dist_sq = self.config.max_correspondence_distance.powi(2);
        let mut correspondences = Vec::with_capacity(moving.len());

        for (i, point) in moving.iter().enumerate() {
            let q = transform * NPoint3::new(point.x as f64, point.y as f64, point.z as f64);
            let nearest =
                fixed_tree.nearest_one::<SquaredEuclidean>(&[q.x as f32, q.y as f32, q.z as f32]);

            if nearest.distance <= max_dist_sq {
                correspondences.push((i, nearest.item as usize));
            }
        }

        correspondences
    }

    /// Closed-form rigid alignment of the correspondences (Kabsch).
    ///
    /// Returns the incremental transform that moves the current moving-point
    /// positions onto their fixed counterparts, or `None` when the SVD is
    /// unavailable.
    fn compute_step(
        moving: &PointCloud3D,
        fixed: &PointCloud3D,
        correspondences: &[(usize, usize)],
        transform: &Transform,
    ) -> Option<Transform> {
        if correspondences.is_empty() {
            return None;
        }
        let n = correspondences.len() as f64;

        let mut moving_centroid = Vector3::zeros();
        let mut fixed_centroid = Vector3::zeros();
        for &(mi, fi) in correspondences {
            let p = &moving.points[mi];
            let q = transform * NPoint3::new(p.x as f64, p.y as f64, p.z as f64);
            moving_centroid += q.coords;
            let f = &fixed.points[fi];
            fixed_centroid += Vector3::new(f.x as f64, f.y as f64, f.z as f64);
        }
        moving_centroid /= n;
        fixed_centroid /= n;

        // Cross-covariance H = Σ (m_i - c_m)(f_i - c_f)^T
        let mut h = Matrix3::zeros();
        for &(mi, fi) in correspondences {
            let p = &moving.points[mi];
            let q = transform * NPoint3::new(p.x as f64, p.y as f64, p.z as f64);
            let m = q.coords - moving_centroid;
            let f = &fixed.points[fi];
            let fv = Vector3::new(f.x as f64, f.y as f64, f.z as f64) - fixed_centroid;
            h += m * fv.transpose();
        }

        let svd = SVD::new(h, true, true);
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => return None,
        };

        let mut v = v_t.transpose();
        let mut rotation = v * u.transpose();
        if rotation.determinant() < 0.0 {
            // Reflection case: flip the axis of least variance.
            v.column_mut(2).neg_mut();
            rotation = v * u.transpose();
        }

        let translation = fixed_centroid - rotation * moving_centroid;
        Some(Transform::from_parts(
            Translation3::from(translation),
            Rotation3::from_matrix_unchecked(rotation),
        ))
    }

    fn mean_squared_error(
        moving: &PointCloud3D,
        fixed: &PointCloud3D,
        correspondences: &[(usize, usize)],
        transform: &Transform,
    ) -> f32 {
        if correspondences.is_empty() {
            return f32::MAX;
        }

        let mut sum_sq = 0.0f64;
        for &(mi, fi) in correspondences {
            let p = &moving.points[mi];
            let q = transform * NPoint3::new(p.x as f64, p.y as f64, p.z as f64);
            let f = &fixed.points[fi];
            let d = q.coords - Vector3::new(f.x as f64, f.y as f64, f.z as f64);
            sum_sq += d.norm_squared();
        }

        (sum_sq / correspondences.len() as f64) as f32
    }
}

impl Sensor for PointCloudSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate_transform(
        &self,
        source: &Measurement,
        target: &Measurement,
        guess: &Transform,
    ) -> Result<Constraint, RegistrationError> {
        let source_cloud = self.cloud_of(source)?;
        let target_cloud = self.cloud_of(target)?;

        let filtered_source = Self::voxel_downsample(source_cloud, self.config.voxel_size);
        let filtered_target = Self::voxel_downsample(target_cloud, self.config.voxel_size);

        if filtered_source.len() < self.config.min_correspondences
            || filtered_target.len() < self.config.min_correspondences
        {
            log::debug!(
                "Sensor '{}': too few points to register ({} source, {} target)",
                self.name,
                filtered_source.len(),
                filtered_target.len()
            );
            return Err(RegistrationError::NoMatch);
        }

        // Shift the source cloud into the estimated target frame, so the
        // refinement starts near the identity and the full transform is
        // guess ∘ refinement.
        let shifted_source = filtered_source.transform(&guess.inverse());
        let fixed_tree = Self::build_kdtree(&shifted_source);

        let mut refinement = Transform::identity();
        let mut converged = false;

        for _ in 0..self.config.max_iterations {
            let correspondences =
                self.find_correspondences(&filtered_target, &fixed_tree, &refinement);
            if correspondences.len() < self.config.min_correspondences {
                log::debug!(
                    "Sensor '{}': only {} correspondences, need {}",
                    self.name,
                    correspondences.len(),
                    self.config.min_correspondences
                );
                return Err(RegistrationError::NoMatch);
            }

            let step = match Self::compute_step(
                &filtered_target,
                &shifted_source,
                &correspondences,
                &refinement,
            ) {
                Some(step) => step,
                None => return Err(RegistrationError::NoMatch),
            };

            refinement = orthogonalize(&(step * refinement));

            if translation_norm(&step) < self.config.translation_epsilon
                && rotation_angle(&step) < self.config.rotation_epsilon
            {
                converged = true;
                break;
            }
        }

        if !converged {
            log::debug!(
                "Sensor '{}': no convergence after {} iterations",
                self.name,
                self.config.max_iterations
            );
            return Err(RegistrationError::NoMatch);
        }

        if let Some(max_score) = self.config.max_fitness_score {
            let correspondences =
                self.find_correspondences(&filtered_target, &fixed_tree, &refinement);
            let mse =
                Self::mean_squared_error(&filtered_target, &shifted_source, &correspondences, &refinement);
            if mse > max_score {
                log::debug!(
                    "Sensor '{}': fitness score {} above limit {}",
                    self.name,
                    mse,
                    max_score
                );
                return Err(RegistrationError::NoMatch);
            }
        }

        let transform = compose_clean(guess, &refinement);
        if !is_finite(&transform) {
            log::error!(
                "Sensor '{}': registration produced non-finite entries",
                self.name
            );
            return Err(RegistrationError::NoMatch);
        }

        Ok(Constraint::with_identity_covariance(transform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MeasurementData, Point3};
    use approx::assert_relative_eq;

    fn test_config() -> PointCloudSensorConfig {
        PointCloudSensorConfig {
            voxel_size: 0.0,
            min_correspondences: 4,
            ..Default::default()
        }
    }

    /// A non-degenerate 3D point set with features spaced well apart.
    fn reference_cloud() -> PointCloud3D {
        let mut points = Vec::new();
        for i in 0..4 {
            for j in 0..3 {
                points.push(Point3::new(i as f32 * 1.5, j as f32 * 1.5, 0.0));
                points.push(Point3::new(i as f32 * 1.5, 0.0, j as f32 * 1.5 + 4.5));
            }
        }
        PointCloud3D::from_points(points)
    }

    fn measurement(id: u64, cloud: PointCloud3D) -> Measurement {
        Measurement::new(id, id * 1000, "robot", "lidar", MeasurementData::PointCloud(cloud))
    }

    fn translation(x: f64, y: f64, z: f64) -> Transform {
        Transform::from_parts(Translation3::new(x, y, z), Rotation3::identity())
    }

    #[test]
    fn test_identical_clouds_align_to_identity() {
        let sensor = PointCloudSensor::new("lidar", test_config());
        let source = measurement(1, reference_cloud());
        let target = measurement(2, reference_cloud());

        let constraint = sensor
            .calculate_transform(&source, &target, &Transform::identity())
            .unwrap();

        assert!(translation_norm(&constraint.transform) < 1e-3);
        assert!(rotation_angle(&constraint.transform) < 1e-3);
    }

    #[test]
    fn test_recovers_small_offset() {
        let sensor = PointCloudSensor::new("lidar", test_config());
        let truth = translation(0.3, 0.1, 0.0);

        // Target-frame coordinates of the same physical points.
        let source_cloud = reference_cloud();
        let target_cloud = source_cloud.transform(&truth.inverse());

        let constraint = sensor
            .calculate_transform(
                &measurement(1, source_cloud),
                &measurement(2, target_cloud),
                &Transform::identity(),
            )
            .unwrap();

        assert_relative_eq!(
            constraint.transform.translation.vector.x,
            0.3,
            epsilon = 1e-3
        );
        assert_relative_eq!(
            constraint.transform.translation.vector.y,
            0.1,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_guess_seeds_large_offset() {
        let sensor = PointCloudSensor::new("lidar", test_config());
        let truth = translation(2.0, 0.0, 0.0);

        let source_cloud = reference_cloud();
        let target_cloud = source_cloud.transform(&truth.inverse());

        // The offset is far beyond the correspondence distance; only the
        // guess makes this solvable, and the result must carry the guess.
        let constraint = sensor
            .calculate_transform(
                &measurement(1, source_cloud),
                &measurement(2, target_cloud),
                &truth,
            )
            .unwrap();

        assert_relative_eq!(
            constraint.transform.translation.vector.x,
            2.0,
            epsilon = 1e-3
        );
        assert_eq!(constraint.covariance, crate::core::types::Covariance::identity());
    }

    #[test]
    fn test_empty_cloud_is_no_match() {
        let sensor = PointCloudSensor::new("lidar", test_config());
        let source = measurement(1, PointCloud3D::new());
        let target = measurement(2, reference_cloud());

        let result = sensor.calculate_transform(&source, &target, &Transform::identity());
        assert_eq!(result.unwrap_err(), RegistrationError::NoMatch);
    }

    #[test]
    fn test_voxel_downsample_merges_cells() {
        let cloud = PointCloud3D::from_points(vec![
            Point3::new(0.01, 0.01, 0.0),
            Point3::new(0.02, 0.02, 0.0),
            Point3::new(5.0, 5.0, 5.0),
        ]);

        let filtered = PointCloudSensor::voxel_downsample(&cloud, 0.5);
        assert_eq!(filtered.len(), 2);
    }
}
