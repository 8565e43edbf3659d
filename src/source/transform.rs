// src/source/transform.rs
//
// Rigid sensor-to-registry transform. Applied by the loaders before anything
// reaches the tracking core; the core itself never sees raw coordinates.

use crate::error::ConfigError;
use crate::types::{Detection, Vec3};
use nalgebra::{Matrix4, Vector4};

#[derive(Debug, Clone, PartialEq)]
pub struct RigidTransform {
    matrix: Matrix4<f64>,
    yaw: f64,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
            yaw: 0.0,
        }
    }

    /// Builds from 16 row-major values. `None` means identity.
    pub fn from_row_major(values: Option<&[f64]>) -> Result<Self, ConfigError> {
        let Some(values) = values else {
            return Ok(Self::identity());
        };
        if values.len() != 16 || values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::BadTransform(values.len()));
        }
        let matrix = Matrix4::from_row_slice(values);
        // Yaw of the rotation block; assumes rotation about z dominates.
        let yaw = matrix[(1, 0)].atan2(matrix[(0, 0)]);
        Ok(Self { matrix, yaw })
    }

    pub fn is_identity(&self) -> bool {
        self.matrix == Matrix4::identity()
    }

    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn apply_point(&self, p: Vec3) -> Vec3 {
        let v = self.matrix * Vector4::new(p.x, p.y, p.z, 1.0);
        let w = if v[3].abs() > f64::EPSILON { v[3] } else { 1.0 };
        Vec3::new(v[0] / w, v[1] / w, v[2] / w)
    }

    /// Moves a detection into the registry frame: position through the full
    /// matrix, rotation offset by the transform's yaw.
    pub fn apply(&self, detection: &mut Detection) {
        detection.position = self.apply_point(detection.position);
        detection.rotation += self.yaw;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[rustfmt::skip]
    const ROT90_SHIFT: [f64; 16] = [
        0.0, -1.0, 0.0, 10.0,
        1.0,  0.0, 0.0,  0.0,
        0.0,  0.0, 1.0, -2.0,
        0.0,  0.0, 0.0,  1.0,
    ];

    #[test]
    fn none_is_identity() {
        let t = RigidTransform::from_row_major(None).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.apply_point(Vec3::new(1.0, 2.0, 3.0)), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn rotates_translates_and_offsets_yaw() {
        let t = RigidTransform::from_row_major(Some(&ROT90_SHIFT)).unwrap();
        assert!((t.yaw() - FRAC_PI_2).abs() < 1e-12);

        let mut d = Detection::new(Vec3::new(1.0, 0.0, 5.0), 0.25, Vec3::splat(1.0), 3);
        t.apply(&mut d);
        assert!((d.position.x - 10.0).abs() < 1e-12);
        assert!((d.position.y - 1.0).abs() < 1e-12);
        assert!((d.position.z - 3.0).abs() < 1e-12);
        assert!((d.rotation - (0.25 + FRAC_PI_2)).abs() < 1e-12);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(
            RigidTransform::from_row_major(Some(&[1.0; 9])),
            Err(ConfigError::BadTransform(9))
        );
    }
}
