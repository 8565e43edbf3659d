// src/source/loader.rs
//
// Indexed frame sources. A source is a path prefix plus a frame count;
// frame `i` lives at `{prefix}{i:06}.{ext}`. Loading reads the file, parses
// it according to the source format and moves everything into the registry
// frame. Per-row parse problems are logged and dropped; only a missing file
// or an unreadable document turns into a SourceError.

use crate::error::SourceError;
use crate::pipeline::FrameInput;
use crate::source::csv_frame::parse_csv_frame;
use crate::source::json_frame::parse_json_frame;
use crate::source::point_cloud::{normalize_ground, parse_pcd};
use crate::source::transform::RigidTransform;
use crate::types::{FrameFormat, FrameSourceConfig, SourcesConfig};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FrameLoader {
    path: String,
    count: u64,
    format: FrameFormat,
    transform: RigidTransform,
    excluded_classes: Vec<String>,
    normalize_ground: bool,
}

impl FrameLoader {
    pub fn new(source: &FrameSourceConfig, sources: &SourcesConfig, transform: RigidTransform) -> Self {
        Self {
            path: source.path.clone(),
            count: source.count,
            format: source.format,
            transform,
            excluded_classes: sources.excluded_classes.clone(),
            normalize_ground: sources.normalize_ground,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn frame_path(&self, index: u64) -> String {
        format!("{}{:06}.{}", self.path, index, self.format.extension())
    }

    pub async fn load(&self, index: u64, timestamp_ms: u64) -> Result<FrameInput, SourceError> {
        let path = self.frame_path(index);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::Unavailable {
                index,
                path: path.clone(),
                source,
            })?;
        self.parse(&text, index, timestamp_ms)
    }

    fn parse(&self, text: &str, index: u64, timestamp_ms: u64) -> Result<FrameInput, SourceError> {
        let (mut detections, errors) = match self.format {
            FrameFormat::Csv => parse_csv_frame(text, index),
            FrameFormat::Json => parse_json_frame(text, index, &self.excluded_classes)
                .map_err(|source| SourceError::Malformed { index, source })?,
            FrameFormat::Pcd => {
                let mut points =
                    parse_pcd(text).map_err(|source| SourceError::Malformed { index, source })?;
                if self.normalize_ground {
                    normalize_ground(&mut points);
                }
                if !self.transform.is_identity() {
                    for p in points.iter_mut() {
                        *p = self.transform.apply_point(*p);
                    }
                }
                debug!("Frame {}: {} cloud points", index, points.len());
                return Ok(FrameInput::point_cloud(index, timestamp_ms, points));
            }
        };

        if !errors.is_empty() {
            warn!("Frame {}: dropped {} malformed rows", index, errors.len());
            for e in &errors {
                debug!("  {}", e);
            }
        }

        for d in detections.iter_mut() {
            self.transform.apply(d);
        }
        debug!("Frame {}: {} detections", index, detections.len());
        Ok(FrameInput::detections(index, timestamp_ms, detections))
    }
}
