//! SE3: 6-DOF rigid transformation (rotation + translation).
//!
//! Keyframe poses are body-to-world transforms (T_wb). The pose-graph solver
//! works on a split tangent parameterization: the orientation component is the
//! SO(3) log (manifold-aware), the translation is plain Euclidean.

use nalgebra::{UnitQuaternion, Vector3, Vector6};

/// Rigid body transformation: `p' = R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Composition: `self ∘ other` (apply `other` first, then `self`).
    pub fn compose(&self, other: &SE3) -> SE3 {
        SE3 {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Inverse transformation.
    pub fn inverse(&self) -> SE3 {
        let rot_inv = self.rotation.inverse();
        SE3 {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Forward direction of the body frame in world coordinates (+X axis).
    pub fn heading(&self) -> Vector3<f64> {
        self.rotation * Vector3::x()
    }

    /// Split tangent: `[so3_log(R); t]`.
    ///
    /// Not the full SE(3) log — translation is taken as-is, matching the
    /// solver's parameterization.
    pub fn to_tangent(&self) -> Vector6<f64> {
        let mut tangent = Vector6::zeros();
        tangent
            .fixed_rows_mut::<3>(0)
            .copy_from(&self.rotation.scaled_axis());
        tangent.fixed_rows_mut::<3>(3).copy_from(&self.translation);
        tangent
    }

    /// Inverse of [`SE3::to_tangent`].
    pub fn from_tangent(tangent: &Vector6<f64>) -> Self {
        let omega: Vector3<f64> = tangent.fixed_rows::<3>(0).into_owned();
        let translation: Vector3<f64> = tangent.fixed_rows::<3>(3).into_owned();
        Self {
            rotation: UnitQuaternion::from_scaled_axis(omega),
            translation,
        }
    }
}

impl Default for SE3 {
    fn default() -> Self {
        SE3::identity()
    }
}

impl std::ops::Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> SE3 {
        self.compose(&rhs)
    }
}
