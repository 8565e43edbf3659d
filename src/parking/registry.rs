// src/parking/registry.rs
//
// Fixed set of parking-space quadrilaterals keyed by uid ("1".."N").
//
// Design:
//   - uid is the 1-based position of the raw polygon, so a bad entry leaves a
//     gap instead of renumbering the spaces after it
//   - center and orientation are derived once at load; spaces are immutable
//   - iteration order is numeric uid order, never string order

use crate::error::GeometryError;
use crate::geometry::{bounds, centroid, compute_orientation, distance, inside_polygon};
use crate::types::{ColumnOrder, Point2, Quad};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct ParkingSpace {
    pub uid: String,
    /// 1-based position in the raw geometry list.
    pub index: usize,
    pub corners: Quad,
    pub center: Point2,
    /// Stall direction in [0, 2π).
    pub orientation: f64,
    pub min: Point2,
    pub max: Point2,
}

impl ParkingSpace {
    fn from_corners(index: usize, corners: Quad) -> Self {
        let (min, max) = bounds(&corners);
        Self {
            uid: index.to_string(),
            index,
            corners,
            center: centroid(&corners),
            orientation: compute_orientation(&corners),
            min,
            max,
        }
    }

    pub fn contains(&self, point: Point2) -> bool {
        inside_polygon(point, &self.corners)
    }

    /// XY bounding-box overlap with the rectangle `[min, max]`.
    pub fn overlaps(&self, min: Point2, max: Point2) -> bool {
        max.x >= self.min.x && min.x <= self.max.x && max.y >= self.min.y && min.y <= self.max.y
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParkingRegistry {
    spaces: Vec<ParkingSpace>,
    by_uid: HashMap<String, usize>,
}

impl ParkingRegistry {
    /// Builds the registry from raw corner lists, one per space. Entries with
    /// fewer than four finite corners are skipped; only an empty result fails.
    pub fn load(raw: &[Vec<Point2>]) -> Result<Self, GeometryError> {
        Self::load_indexed(raw.iter().enumerate().map(|(i, c)| (i + 1, c.as_slice())))
    }

    /// Same as [`load`](Self::load) with explicit 1-based indices, which must
    /// ascend. Indices that are absent are simply gaps in the uid sequence.
    fn load_indexed<'a>(
        entries: impl IntoIterator<Item = (usize, &'a [Point2])>,
    ) -> Result<Self, GeometryError> {
        let mut spaces = Vec::new();
        let mut skipped = 0;

        for (index, corners) in entries {
            match validate_corners(index, corners) {
                Ok(quad) => spaces.push(ParkingSpace::from_corners(index, quad)),
                Err(e) => {
                    warn!("Skipping parking space: {}", e);
                    skipped += 1;
                }
            }
        }

        if spaces.is_empty() {
            return Err(GeometryError::EmptyRegistry);
        }

        let by_uid = spaces
            .iter()
            .enumerate()
            .map(|(pos, s)| (s.uid.clone(), pos))
            .collect();

        info!(
            "Parking registry loaded: {} spaces ({} skipped)",
            spaces.len(),
            skipped
        );

        Ok(Self { spaces, by_uid })
    }

    /// Reads `{prefix}{n}.csv` files from `dir`. With `count` set, n runs over
    /// `1..=count`; otherwise the directory is scanned and n runs up to the
    /// largest suffix found. Unreadable files become skipped spaces.
    pub fn load_dir(
        dir: impl AsRef<Path>,
        prefix: &str,
        count: Option<usize>,
        order: ColumnOrder,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let files = match count {
            Some(n) => (1..=n)
                .map(|i| (i, dir.join(format!("{}{}.csv", prefix, i))))
                .collect::<BTreeMap<_, _>>(),
            None => discover_space_files(dir, prefix),
        };

        // Only files that exist take memory, however large their suffix.
        let mut raw = Vec::with_capacity(files.len());
        for (&n, path) in &files {
            match fs::read_to_string(path) {
                Ok(text) => raw.push((n, parse_space_csv(&text, order))),
                Err(e) => warn!("Cannot read {}: {}", path.display(), e),
            }
        }

        debug!("Read {} of {} geometry files from {}", raw.len(), files.len(), dir.display());

        Self::load_indexed(raw.iter().map(|(n, c)| (*n, c.as_slice())))
            .with_context(|| format!("loading parking spaces from {}", dir.display()))
    }

    pub fn get(&self, uid: &str) -> Option<&ParkingSpace> {
        self.by_uid.get(uid).map(|&pos| &self.spaces[pos])
    }

    /// All spaces in ascending uid order.
    pub fn all(&self) -> &[ParkingSpace] {
        &self.spaces
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.spaces.iter().map(|s| s.uid.as_str())
    }

    /// Space whose center is closest to `point` within `radius`. Ties go to
    /// the lower uid.
    pub fn nearest_within(&self, point: Point2, radius: f64) -> Option<&ParkingSpace> {
        let mut best: Option<(&ParkingSpace, f64)> = None;
        for space in &self.spaces {
            let d = distance(point, space.center);
            if d > radius {
                continue;
            }
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((space, d));
            }
        }
        best.map(|(s, _)| s)
    }

    /// First space (in uid order) whose polygon contains `point`.
    pub fn containing(&self, point: Point2) -> Option<&ParkingSpace> {
        self.spaces.iter().find(|s| s.contains(point))
    }
}

fn validate_corners(index: usize, corners: &[Point2]) -> Result<Quad, GeometryError> {
    if corners.len() < 4 {
        return Err(GeometryError::TooFewCorners {
            index,
            found: corners.len(),
        });
    }
    let quad = [corners[0], corners[1], corners[2], corners[3]];
    if quad.iter().any(|p| !p.is_finite()) {
        return Err(GeometryError::NonFiniteCorner { index });
    }
    Ok(quad)
}

/// Parses one geometry file: two numbers per line, first four valid rows.
/// Lines that do not hold two finite numbers are ignored.
pub fn parse_space_csv(text: &str, order: ColumnOrder) -> Vec<Point2> {
    text.lines()
        .filter_map(|line| {
            let mut cols = line.split(',').map(|c| c.trim().parse::<f64>());
            let a = cols.next()?.ok()?;
            let b = cols.next()?.ok()?;
            if !a.is_finite() || !b.is_finite() {
                return None;
            }
            Some(match order {
                ColumnOrder::XY => Point2::new(a, b),
                ColumnOrder::YX => Point2::new(b, a),
            })
        })
        .take(4)
        .collect()
}

fn discover_space_files(dir: &Path, prefix: &str) -> BTreeMap<usize, std::path::PathBuf> {
    let mut files = BTreeMap::new();

    for entry in WalkDir::new(dir)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let suffix = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(prefix))
            .and_then(|s| s.parse::<usize>().ok());
        if let Some(n) = suffix.filter(|&n| n > 0) {
            files.insert(n, path.to_path_buf());
        }
    }

    info!("Found {} parking geometry files", files.len());
    files
}
