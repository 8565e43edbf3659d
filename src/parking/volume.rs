// src/parking/volume.rs
//
// Point-cloud occupancy proxy. Each space's polygon is extruded into a slab
// around `z_center`; a space whose slab holds enough cloud points is treated
// as holding a vehicle, without any point-level segmentation.

use crate::parking::ParkingRegistry;
use crate::types::{Point2, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Height of the slab midpoint in the transformed frame.
    pub z_center: f64,
    /// Slab thickness; points count when |z - z_center| <= height / 2.
    pub height: f64,
    /// Points required at full sampling. Divided by the sample rate.
    pub base_threshold: usize,
    /// Clouds larger than this are sub-sampled down to roughly this size.
    pub max_sampled_points: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            z_center: 3.0,
            height: 1.5,
            base_threshold: 10,
            max_sampled_points: 10_000,
        }
    }
}

/// Result of reducing one cloud to per-space counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloudCounts {
    /// Sampled point count per covered space, keyed by space index.
    pub counts: BTreeMap<usize, usize>,
    /// Uids of spaces whose footprint overlaps the cloud's XY bounds, in
    /// ascending order. Only these are re-evaluated for occupancy.
    pub covered: Vec<String>,
    pub sample_rate: usize,
    pub threshold: usize,
}

impl PointCloudCounts {
    /// Space indices whose count reaches the threshold, ascending.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.counts
            .iter()
            .filter(move |(_, c)| **c >= self.threshold)
            .map(|(&i, _)| i)
    }
}

pub fn count_points(
    registry: &ParkingRegistry,
    points: &[Vec3],
    config: &VolumeConfig,
) -> PointCloudCounts {
    let finite: Vec<&Vec3> = points.iter().filter(|p| p.is_finite()).collect();
    if finite.is_empty() {
        return PointCloudCounts {
            sample_rate: 1,
            threshold: config.base_threshold.max(1),
            ..Default::default()
        };
    }

    let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in &finite {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }

    let overlapping: Vec<_> = registry
        .all()
        .iter()
        .filter(|s| s.overlaps(min, max))
        .collect();

    let sample_rate = (finite.len() / config.max_sampled_points.max(1)).max(1);
    // A threshold of zero would mark every covered space occupied.
    let threshold = (config.base_threshold / sample_rate).max(1);
    let z_min = config.z_center - config.height / 2.0;
    let z_max = config.z_center + config.height / 2.0;

    let mut counts: BTreeMap<usize, usize> = overlapping.iter().map(|s| (s.index, 0)).collect();

    for p in finite.iter().step_by(sample_rate) {
        if p.z < z_min || p.z > z_max {
            continue;
        }
        let xy = p.xy();
        for space in &overlapping {
            if space.contains(xy) {
                *counts.entry(space.index).or_default() += 1;
            }
        }
    }

    debug!(
        "Point cloud: {} points, {} overlapping spaces, sample_rate={}, threshold={}",
        finite.len(),
        overlapping.len(),
        sample_rate,
        threshold
    );

    PointCloudCounts {
        counts,
        covered: overlapping.iter().map(|s| s.uid.clone()).collect(),
        sample_rate,
        threshold,
    }
}
