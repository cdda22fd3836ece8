//! Numerical primitives for SE(3) transforms.
//!
//! Rotation matrices drift away from orthonormality under repeated
//! composition. Every composition whose result is stored back into the graph
//! goes through [`compose_clean`] so no code path skips the repair.

use nalgebra::{Matrix3, Rotation3, Translation3, Vector3, Vector6};

use crate::core::types::Transform;

/// Re-orthonormalize the rotation part of a rigid transform.
///
/// Treats the three rotation rows x, y, z: the x·y dot product measures the
/// accumulated error, which is split symmetrically between x and y; z is
/// re-derived as their cross product; each row is renormalized with the
/// first-order Taylor correction `0.5 * (3 - v·v)`. The translation is
/// preserved.
///
/// For an already-orthonormal rotation this is the identity to within 1e-6.
pub fn orthogonalize(t: &Transform) -> Transform {
    let m = t.rotation.matrix();
    let x = Vector3::new(m[(0, 0)], m[(0, 1)], m[(0, 2)]);
    let y = Vector3::new(m[(1, 0)], m[(1, 1)], m[(1, 2)]);

    let error = x.dot(&y);
    let x_ort = x - (error / 2.0) * y;
    let y_ort = y - (error / 2.0) * x;
    let z_ort = x_ort.cross(&y_ort);

    let x_new = x_ort * (0.5 * (3.0 - x_ort.dot(&x_ort)));
    let y_new = y_ort * (0.5 * (3.0 - y_ort.dot(&y_ort)));
    let z_new = z_ort * (0.5 * (3.0 - z_ort.dot(&z_ort)));

    let rotation = Matrix3::from_rows(&[
        x_new.transpose(),
        y_new.transpose(),
        z_new.transpose(),
    ]);

    Transform::from_parts(t.translation, Rotation3::from_matrix_unchecked(rotation))
}

/// Compose two transforms and re-orthonormalize the result.
#[inline]
pub fn compose_clean(a: &Transform, b: &Transform) -> Transform {
    orthogonalize(&(a * b))
}

/// Euclidean norm of the translation part.
#[inline]
pub fn translation_norm(t: &Transform) -> f64 {
    t.translation.vector.norm()
}

/// Axis-angle magnitude of the rotation part, in `[0, π]`.
#[inline]
pub fn rotation_angle(t: &Transform) -> f64 {
    t.rotation.angle()
}

/// Check that every entry of the transform is a finite number.
///
/// Registration backends can produce NaN or infinite entries on degenerate
/// input; such transforms must never enter the graph.
pub fn is_finite(t: &Transform) -> bool {
    t.rotation.matrix().iter().all(|v| v.is_finite())
        && t.translation.vector.iter().all(|v| v.is_finite())
}

/// Decoupled SE(3) tangent coordinates of a transform.
///
/// Returns `[tx, ty, tz, rx, ry, rz]` where the rotation block is the
/// scaled-axis (axis-angle) vector. Translation and rotation are treated as
/// independent blocks, the usual parameterization for pose-graph residuals.
pub fn tangent_of(t: &Transform) -> Vector6<f64> {
    let mut v = Vector6::zeros();
    v.fixed_rows_mut::<3>(0).copy_from(&t.translation.vector);
    v.fixed_rows_mut::<3>(3).copy_from(&t.rotation.scaled_axis());
    v
}

/// Right-compose a transform with a tangent-space step.
///
/// The step is interpreted in the local frame of `t`, matching the
/// perturbation convention used by the graph optimizer.
pub fn apply_tangent(t: &Transform, delta: &Vector6<f64>) -> Transform {
    let step = Transform::from_parts(
        Translation3::new(delta[0], delta[1], delta[2]),
        Rotation3::from_scaled_axis(Vector3::new(delta[3], delta[4], delta[5])),
    );
    t * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn rotation_error(t: &Transform) -> f64 {
        let m = t.rotation.matrix();
        let should_be_identity = m.transpose() * m;
        (should_be_identity - Matrix3::identity()).norm()
    }

    #[test]
    fn test_orthogonalize_preserves_orthonormal() {
        let t = Transform::from_parts(
            Translation3::new(1.0, 2.0, 3.0),
            Rotation3::from_scaled_axis(Vector3::new(0.3, -0.2, 0.7)),
        );

        let fixed = orthogonalize(&t);
        assert!((fixed.rotation.matrix() - t.rotation.matrix()).norm() < 1e-6);
        assert_relative_eq!(fixed.translation.vector, t.translation.vector);
    }

    #[test]
    fn test_orthogonalize_repairs_drift() {
        let rot = Rotation3::from_scaled_axis(Vector3::new(0.1, 0.4, -0.3));
        let mut drifted = *rot.matrix();
        // Inject the kind of error that accumulates through composition.
        drifted[(0, 1)] += 1e-4;
        drifted[(1, 2)] -= 1e-4;
        let t = Transform::from_parts(
            Translation3::new(0.5, 0.0, 0.0),
            Rotation3::from_matrix_unchecked(drifted),
        );

        assert!(rotation_error(&t) > 1e-5);
        let fixed = orthogonalize(&t);
        assert!(rotation_error(&fixed) < 1e-6);
        assert_relative_eq!(fixed.translation.vector.x, 0.5);
    }

    #[test]
    fn test_compose_clean_stays_orthonormal() {
        let step = Transform::from_parts(
            Translation3::new(0.1, 0.0, 0.0),
            Rotation3::from_scaled_axis(Vector3::new(0.01, 0.02, 0.03)),
        );

        let mut pose = Transform::identity();
        for _ in 0..1000 {
            pose = compose_clean(&pose, &step);
        }
        assert!(rotation_error(&pose) < 1e-6);
    }

    #[test]
    fn test_rotation_angle() {
        let t = Transform::from_parts(
            Translation3::identity(),
            Rotation3::from_scaled_axis(Vector3::z() * FRAC_PI_2),
        );
        assert_relative_eq!(rotation_angle(&t), FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(rotation_angle(&Transform::identity()), 0.0);
    }

    #[test]
    fn test_translation_norm() {
        let t = Transform::from_parts(
            Translation3::new(3.0, 4.0, 0.0),
            Rotation3::identity(),
        );
        assert_relative_eq!(translation_norm(&t), 5.0);
    }

    #[test]
    fn test_is_finite_rejects_nan() {
        let mut m = Matrix3::identity();
        m[(2, 2)] = f64::NAN;
        let t = Transform::from_parts(
            Translation3::identity(),
            Rotation3::from_matrix_unchecked(m),
        );
        assert!(!is_finite(&t));
        assert!(is_finite(&Transform::identity()));
    }

    #[test]
    fn test_tangent_roundtrip() {
        let t = Transform::from_parts(
            Translation3::new(1.0, -2.0, 0.5),
            Rotation3::from_scaled_axis(Vector3::new(0.2, 0.1, -0.4)),
        );

        let v = tangent_of(&t);
        let rebuilt = apply_tangent(&Transform::identity(), &v);
        assert!((rebuilt.translation.vector - t.translation.vector).norm() < 1e-12);
        assert!((rebuilt.rotation.matrix() - t.rotation.matrix()).norm() < 1e-12);
    }
}
