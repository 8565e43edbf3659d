// src/error.rs
//
// Error taxonomy for the occupancy core. Everything except ConfigError is
// handled locally by the frame processor or the loaders; ConfigError is the
// only condition that stops the host before the first tick.

use thiserror::Error;

/// Malformed or incomplete parking-space polygon data. The space is skipped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    #[error("space {index}: need 4 numeric corners, got {found}")]
    TooFewCorners { index: usize, found: usize },

    #[error("space {index}: non-finite corner coordinate")]
    NonFiniteCorner { index: usize },

    #[error("no parking spaces could be loaded")]
    EmptyRegistry,
}

/// Malformed detection row or record. The single detection is dropped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("line {line}: expected at least {expected} columns, got {found}")]
    MissingColumns {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: column {column} is not a finite number ({value:?})")]
    NotANumber {
        line: usize,
        column: usize,
        value: String,
    },

    #[error("invalid JSON frame: {0}")]
    Json(String),

    #[error("unsupported point cloud: {0}")]
    PointCloud(String),
}

/// A frame's backing file could not be fetched. The whole frame is skipped.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("frame {index} unavailable at {path}: {source}")]
    Unavailable {
        index: u64,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame {index} could not be parsed: {source}")]
    Malformed {
        index: u64,
        #[source]
        source: ParseError,
    },
}

/// Structurally invalid configuration, raised before any frame is processed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("kalman: {name} must be finite and > 0 (got {value})")]
    NonPositiveNoise { name: &'static str, value: f64 },

    #[error("kalman: {name} must be finite and >= 0 (got {value})")]
    NegativeNoise { name: &'static str, value: f64 },

    #[error("tracking: covariance_threshold ({low}) must be below covariance_max_threshold ({high})")]
    ThresholdOrder { low: f64, high: f64 },

    #[error("transform must have 16 finite entries, got {0}")]
    BadTransform(usize),
}

/// Rejected manual occupancy operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OccupancyError {
    #[error("parking space {0} not found")]
    UnknownSpace(String),

    #[error("parking space {0}: target can only be set by selecting it as the destination")]
    TargetNotSettable(String),
}
