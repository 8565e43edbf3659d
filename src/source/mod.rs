// src/source/mod.rs

pub mod csv_frame;
pub mod json_frame;
pub mod loader;
pub mod point_cloud;
pub mod transform;

pub use csv_frame::parse_csv_frame;
pub use json_frame::parse_json_frame;
pub use loader::FrameLoader;
pub use point_cloud::{normalize_ground, parse_pcd};
pub use transform::RigidTransform;
