// src/types.rs

use crate::occupancy::OccupancyConfig;
use crate::parking::VolumeConfig;
use crate::tracking::{AssociationConfig, KalmanConfig};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub parking: ParkingConfig,
    pub sources: SourcesConfig,
    pub tracking: TrackingConfig,
    pub occupancy: OccupancyConfig,
    pub point_cloud: VolumeConfig,
    pub runtime: RuntimeConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParkingConfig {
    pub geometry_dir: String,
    pub file_prefix: String,
    /// Number of geometry files (`{prefix}1.csv ..= {prefix}{count}.csv`).
    /// When absent the directory is scanned instead.
    pub count: Option<usize>,
    pub column_order: ColumnOrder,
}

impl Default for ParkingConfig {
    fn default() -> Self {
        Self {
            geometry_dir: "./parkingspaces".to_string(),
            file_prefix: "tumparking".to_string(),
            count: None,
            column_order: ColumnOrder::YX,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub kalman: KalmanConfig,
    pub association: AssociationConfig,
}

/// Column order of the two values on each geometry line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnOrder {
    XY,
    YX,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub bounding_boxes: Vec<FrameSourceConfig>,
    pub point_clouds: Vec<FrameSourceConfig>,
    /// Row-major 4x4 rigid transform applied to every raw position and yaw
    /// before it reaches the core. Identity when absent.
    pub transform: Option<Vec<f64>>,
    /// Object classes dropped before association (JSON frames only).
    pub excluded_classes: Vec<String>,
    /// Shift point clouds so their lowest point sits at z = 0.
    pub normalize_ground: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            bounding_boxes: Vec::new(),
            point_clouds: Vec::new(),
            transform: None,
            excluded_classes: vec!["Pedestrian".to_string()],
            normalize_ground: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSourceConfig {
    /// Path prefix; the frame file is `{path}{index:06}.{ext}`.
    pub path: String,
    /// Number of frames available, indices 1..=count.
    pub count: u64,
    pub format: FrameFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Csv,
    Json,
    Pcd,
}

impl FrameFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Pcd => "pcd",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_ms: u64,
    /// Stop after this many ticks. Runs until every source is exhausted
    /// (or forever with `loop_sources`) when absent.
    pub max_ticks: Option<u64>,
    pub loop_sources: bool,
    pub diagnostics_every: u64,
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_ms: 150,
            max_ticks: None,
            loop_sources: false,
            diagnostics_every: 150,
            event_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "parking_occupancy=info".to_string(),
        }
    }
}

// ============================================================================
// CORE VALUE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: f64) -> Self {
        Self { x: v, y: v, z: v }
    }

    pub fn xy(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Four corners in polygon order.
pub type Quad = [Point2; 4];

/// One raw per-frame observation, already in the registry's coordinate frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub position: Vec3,
    pub rotation: f64,
    pub scale: Vec3,
    pub frame_index: u64,
    pub class: Option<String>,
}

impl Detection {
    pub fn new(position: Vec3, rotation: f64, scale: Vec3, frame_index: u64) -> Self {
        Self {
            position,
            rotation,
            scale,
            frame_index,
            class: None,
        }
    }

    pub fn xy(&self) -> Point2 {
        self.position.xy()
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

/// Smoothed pose handed to the rendering collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: f64,
    pub scale: Vec3,
}
