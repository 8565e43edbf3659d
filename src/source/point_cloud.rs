// src/source/point_cloud.rs
//
// ASCII PCD reader. Only the x/y/z fields are kept; everything else
// (intensity, rgb, ...) is ignored.

use crate::error::ParseError;
use crate::types::Vec3;
use tracing::debug;

pub fn parse_pcd(text: &str) -> Result<Vec<Vec3>, ParseError> {
    let mut lines = text.lines();
    let mut fields: Vec<String> = Vec::new();
    let mut saw_data = false;

    for line in lines.by_ref() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("FIELDS") => fields = parts.map(str::to_ascii_lowercase).collect(),
            Some("DATA") => {
                let kind = parts.next().unwrap_or("");
                if kind != "ascii" {
                    return Err(ParseError::PointCloud(format!("DATA {} not supported", kind)));
                }
                saw_data = true;
                break;
            }
            _ => {}
        }
    }

    if !saw_data {
        return Err(ParseError::PointCloud("missing DATA line".to_string()));
    }

    let column = |name: &str, fallback: usize| {
        fields.iter().position(|f| f == name).unwrap_or(fallback)
    };
    let (ix, iy, iz) = (column("x", 0), column("y", 1), column("z", 2));
    let needed = ix.max(iy).max(iz) + 1;

    let mut points = Vec::new();
    let mut skipped = 0usize;
    for line in lines {
        let values: Vec<f64> = line
            .split_whitespace()
            .map_while(|v| v.parse::<f64>().ok())
            .collect();
        if values.len() < needed {
            if !line.trim().is_empty() {
                skipped += 1;
            }
            continue;
        }
        let p = Vec3::new(values[ix], values[iy], values[iz]);
        if p.is_finite() {
            points.push(p);
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        debug!("PCD: skipped {} malformed points", skipped);
    }
    Ok(points)
}

/// Shifts the cloud so its lowest point sits at z = 0.
pub fn normalize_ground(points: &mut [Vec3]) {
    let min_z = points.iter().map(|p| p.z).fold(f64::INFINITY, f64::min);
    if !min_z.is_finite() {
        return;
    }
    for p in points.iter_mut() {
        p.z -= min_z;
    }
}
