// src/lib.rs
//
// Parking occupancy tracking: per-frame vehicle detections (or point clouds)
// are smoothed per parking space and turned into a debounced
// free/occupied/target/unknown status per space.

pub mod command;
pub mod config;
pub mod error;
pub mod geometry;
pub mod occupancy;
pub mod parking;
pub mod pipeline;
pub mod source;
pub mod tracking;
pub mod types;

pub use command::ManualCommand;
pub use error::{ConfigError, GeometryError, OccupancyError, ParseError, SourceError};
pub use occupancy::{OccupancyMap, OccupancyStatus};
pub use parking::ParkingRegistry;
pub use pipeline::{FrameInput, FrameOutput, FrameProcessor, ParkingSession};
pub use types::{Config, Detection, Point2, Pose, Vec3};
