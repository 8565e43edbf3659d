// src/parking/mod.rs
//
// Static parking-space geometry: the registry loaded once at startup and the
// extruded 3D volumes used to count point-cloud hits per space.

pub mod registry;
pub mod volume;

pub use registry::{parse_space_csv, ParkingRegistry, ParkingSpace};
pub use volume::{count_points, PointCloudCounts, VolumeConfig};
