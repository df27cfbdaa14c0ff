//! Geometry utilities: SE3 rigid transforms and heading angles.

pub mod se3;

pub use se3::SE3;

use nalgebra::Vector3;

/// Unsigned angle between two vectors, in degrees, in `[0, 180]`.
///
/// Returns 0 for degenerate (near-zero) inputs.
pub fn degree_angle(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let denom = a.norm() * b.norm();
    if denom < f64::EPSILON {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_degree_angle_orthogonal() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(degree_angle(&a, &b), 90.0, epsilon = 1e-10);
    }

    #[test]
    fn test_degree_angle_opposite() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        let b = Vector3::new(-2.0, 0.0, 0.0);
        assert_relative_eq!(degree_angle(&a, &b), 180.0, epsilon = 1e-10);
    }

    #[test]
    fn test_degree_angle_degenerate_is_zero() {
        let a = Vector3::zeros();
        let b = Vector3::new(1.0, 0.0, 0.0);
        assert_eq!(degree_angle(&a, &b), 0.0);
    }
}
