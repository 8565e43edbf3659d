// src/tracking/kalman.rs
//
// Per-track recursive estimator.
//
// Position uses a constant-velocity model with unit time step per tick:
//   state x = [px, py, vx, vy]
//   F = [[I₂, I₂], [0₂, I₂]],  H = [I₂ | 0₂]
// Orientation is an independent scalar filter so yaw noise never leaks into
// the position estimate. Scale is carried along unfiltered.

use crate::error::ConfigError;
use crate::types::{Point2, Pose, Vec3};
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use tracing::warn;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Filter tuning and covariance classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Process noise on position per tick.
    pub q_position: f64,
    /// Process noise on velocity per tick. Parked vehicles barely move, so
    /// this mostly controls how fast uncertainty grows while unobserved.
    pub q_velocity: f64,
    /// Process noise on yaw per tick.
    pub q_rotation: f64,

    /// Measurement noise on detected position. Must be > 0.
    pub r_position: f64,
    /// Measurement noise on detected yaw. Must be > 0.
    pub r_rotation: f64,

    /// Initial position variance for a freshly seeded track.
    pub initial_position_variance: f64,
    /// Initial velocity variance (velocity starts at zero).
    pub initial_velocity_variance: f64,
    pub initial_rotation_variance: f64,

    /// Both position variances below this: the track is trusted.
    pub covariance_threshold: f64,
    /// Either position variance above this: the track is dropped.
    pub covariance_max_threshold: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            q_position: 1.0,
            q_velocity: 1.0,
            q_rotation: 0.05,
            r_position: 10.0,
            r_rotation: 0.1,
            initial_position_variance: 10.0,
            initial_velocity_variance: 100.0,
            initial_rotation_variance: 0.1,
            covariance_threshold: 50.0,
            covariance_max_threshold: 200.0, // ~7 missed ticks after a settled track
        }
    }
}

impl KalmanConfig {
    /// Rejects tunings that would make the innovation covariance singular or
    /// the thresholds meaningless. Run once before the first frame.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("r_position", self.r_position),
            ("r_rotation", self.r_rotation),
            ("initial_position_variance", self.initial_position_variance),
            ("initial_velocity_variance", self.initial_velocity_variance),
            ("initial_rotation_variance", self.initial_rotation_variance),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositiveNoise { name, value });
            }
        }

        let non_negative = [
            ("q_position", self.q_position),
            ("q_velocity", self.q_velocity),
            ("q_rotation", self.q_rotation),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeNoise { name, value });
            }
        }

        if !(self.covariance_threshold < self.covariance_max_threshold) {
            return Err(ConfigError::ThresholdOrder {
                low: self.covariance_threshold,
                high: self.covariance_max_threshold,
            });
        }

        Ok(())
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Covariance-based trust level of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackConfidence {
    /// Both position variances below `covariance_threshold`.
    Confident,
    /// Kept internally but not reported.
    Tentative,
    /// A position variance above `covariance_max_threshold`; delete.
    Divergent,
}

impl TrackConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confident => "CONFIDENT",
            Self::Tentative => "TENTATIVE",
            Self::Divergent => "DIVERGENT",
        }
    }
}

/// Wraps an angle into (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

// ============================================================================
// FILTER
// ============================================================================

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    x: Vector4<f64>,
    p: Matrix4<f64>,
    f: Matrix4<f64>,
    q: Matrix4<f64>,
    h: Matrix2x4<f64>,
    r: Matrix2<f64>,

    rotation: f64,
    rotation_var: f64,
    q_rotation: f64,
    r_rotation: f64,

    /// Height is not estimated; the last observed value is reported.
    z: f64,
    scale: Vec3,
}

impl KalmanFilter {
    /// Seeds a filter at a raw measurement with zero velocity.
    pub fn new(config: &KalmanConfig, position: Vec3, rotation: f64, scale: Vec3) -> Self {
        // Upper-right block couples position to velocity (dt = 1 tick).
        #[rustfmt::skip]
        let f = Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        let q = Matrix4::from_diagonal(&Vector4::new(
            config.q_position,
            config.q_position,
            config.q_velocity,
            config.q_velocity,
        ));

        #[rustfmt::skip]
        let h = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );

        let r = Matrix2::from_diagonal_element(config.r_position);

        let p = Matrix4::from_diagonal(&Vector4::new(
            config.initial_position_variance,
            config.initial_position_variance,
            config.initial_velocity_variance,
            config.initial_velocity_variance,
        ));

        Self {
            x: Vector4::new(position.x, position.y, 0.0, 0.0),
            p,
            f,
            q,
            h,
            r,
            rotation: wrap_angle(rotation),
            rotation_var: config.initial_rotation_variance,
            q_rotation: config.q_rotation,
            r_rotation: config.r_rotation,
            z: position.z,
            scale,
        }
    }

    /// Advances one tick: x = F·x, P = F·P·Fᵀ + Q, and P_θ += Q_θ.
    pub fn predict(&mut self) {
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;
        self.rotation_var += self.q_rotation;
    }

    /// Corrects the estimate with a measured position and yaw. Returns the
    /// position innovation (measurement − prediction).
    pub fn update(&mut self, position: Vec3, rotation: f64) -> Vector2<f64> {
        let z = Vector2::new(position.x, position.y);
        let innovation = z - self.h * self.x;

        let s = self.h * self.p * self.h.transpose() + self.r;
        let Some(s_inv) = s.try_inverse() else {
            warn!("Kalman: singular innovation covariance, skipping update");
            return innovation;
        };

        let k = self.p * self.h.transpose() * s_inv;
        self.x += k * innovation;
        self.p = (Matrix4::identity() - k * self.h) * self.p;

        // Scalar yaw filter on the wrapped innovation.
        let yaw_innovation = wrap_angle(rotation - self.rotation);
        let yaw_gain = self.rotation_var / (self.rotation_var + self.r_rotation);
        self.rotation = wrap_angle(self.rotation + yaw_gain * yaw_innovation);
        self.rotation_var *= 1.0 - yaw_gain;

        self.z = position.z;
        innovation
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.x[0], self.x[1])
    }

    pub fn velocity(&self) -> Point2 {
        Point2::new(self.x[2], self.x[3])
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn rotation_variance(&self) -> f64 {
        self.rotation_var
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Diagonal position variances (P_xx, P_yy).
    pub fn position_variance(&self) -> (f64, f64) {
        (self.p[(0, 0)], self.p[(1, 1)])
    }

    pub fn covariance(&self) -> &Matrix4<f64> {
        &self.p
    }

    pub fn classify(&self, config: &KalmanConfig) -> TrackConfidence {
        let (vx, vy) = self.position_variance();
        if vx > config.covariance_max_threshold || vy > config.covariance_max_threshold {
            TrackConfidence::Divergent
        } else if vx < config.covariance_threshold && vy < config.covariance_threshold {
            TrackConfidence::Confident
        } else {
            TrackConfidence::Tentative
        }
    }

    /// Current smoothed pose for rendering collaborators.
    pub fn pose(&self) -> Pose {
        Pose {
            position: Vec3::new(self.x[0], self.x[1], self.z),
            rotation: self.rotation,
            scale: self.scale,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
