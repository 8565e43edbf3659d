// src/tracking/mod.rs
//
// Track state estimation and frame-to-frame association.

pub mod association;
pub mod kalman;

pub use association::{Association, AssociationConfig, AssociationEngine, Track};
pub use kalman::{wrap_angle, KalmanConfig, KalmanFilter, TrackConfidence};
