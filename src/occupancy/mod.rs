// src/occupancy/mod.rs

pub mod state_machine;

pub use state_machine::{
    OccupancyConfig, OccupancyEvent, OccupancyMap, OccupancyRecord, OccupancyStatus,
    OccupancySummary, SpaceSnapshot, TransitionCause,
};
