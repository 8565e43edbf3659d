// src/geometry.rs
//
// Planar helpers for parking-space polygons. Everything here is pure and
// works in the registry's XY plane.

use crate::types::{Point2, Quad};
use std::f64::consts::TAU;

/// Midpoints closer than this are treated as the same point when deriving
/// the stall direction.
const DEGENERATE_EPS: f64 = 1e-9;

/// Euclidean distance in the XY plane.
pub fn distance(a: Point2, b: Point2) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// The four edges of a quad as corner index pairs, in polygon order.
fn edges() -> [(usize, usize); 4] {
    [(0, 1), (1, 2), (2, 3), (3, 0)]
}

/// Ray-casting point-in-quadrilateral test. Points on the boundary count as
/// inside.
pub fn inside_polygon(point: Point2, quad: &Quad) -> bool {
    let mut crossings = 0u32;

    for (i, j) in edges() {
        let a = quad[i];
        let b = quad[j];

        if point == a || point == b {
            return true;
        }

        if a.y == b.y {
            // Horizontal edge: only a boundary hit matters, never a crossing.
            if point.y == a.y && point.x >= a.x.min(b.x) && point.x <= a.x.max(b.x) {
                return true;
            }
            continue;
        }

        if point.y < a.y.min(b.y) || point.y > a.y.max(b.y) {
            continue;
        }

        // The boundary test uses the closed span.
        let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
        if x_cross == point.x {
            return true;
        }

        // Crossings use a half-open span so a shared vertex is counted once.
        if (a.y > point.y) != (b.y > point.y) && x_cross > point.x {
            crossings += 1;
        }
    }

    crossings % 2 == 1
}

/// Edge indices of the quad sorted by ascending length. Ties keep polygon
/// order so the ranking is deterministic.
fn edges_by_length(quad: &Quad) -> [usize; 4] {
    let lengths: Vec<f64> = edges()
        .iter()
        .map(|&(i, j)| distance(quad[i], quad[j]))
        .collect();
    let mut order = [0usize, 1, 2, 3];
    order.sort_by(|&a, &b| lengths[a].total_cmp(&lengths[b]));
    order
}

/// Indices (into polygon-order edges) of the two shortest edges, lowest
/// index first.
fn short_edges(quad: &Quad) -> [usize; 2] {
    let order = edges_by_length(quad);
    let (a, b) = (order[0], order[1]);
    if a < b {
        [a, b]
    } else {
        [b, a]
    }
}

/// True when `p1 -> p2` (in either direction) is one of the two shortest
/// edges of `quad`. Classification is by rank, so near-equal lengths never
/// yield more or fewer than two short edges.
pub fn is_short_edge(p1: Point2, p2: Point2, quad: &Quad) -> bool {
    let Some(edge) = edges().iter().position(|&(i, j)| {
        (quad[i] == p1 && quad[j] == p2) || (quad[i] == p2 && quad[j] == p1)
    }) else {
        return false;
    };
    short_edges(quad).contains(&edge)
}

fn midpoint(a: Point2, b: Point2) -> Point2 {
    Point2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Normalizes an atan2 result into [0, 2π).
fn normalize_angle(angle: f64) -> f64 {
    let wrapped = if angle < 0.0 { angle + TAU } else { angle };
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Stall direction: angle of the vector joining the midpoints of the two
/// short edges, in [0, 2π).
///
/// Falls back to the corner 1 -> corner 3 diagonal when the short-edge
/// midpoints coincide (collapsed polygon).
pub fn compute_orientation(quad: &Quad) -> f64 {
    let [first, second] = short_edges(quad);
    let all = edges();
    let m1 = midpoint(quad[all[first].0], quad[all[first].1]);
    let m2 = midpoint(quad[all[second].0], quad[all[second].1]);

    if distance(m1, m2) < DEGENERATE_EPS {
        return normalize_angle((quad[2].y - quad[0].y).atan2(quad[2].x - quad[0].x));
    }

    normalize_angle((m2.y - m1.y).atan2(m2.x - m1.x))
}

/// Arithmetic mean of the four corners.
pub fn centroid(quad: &Quad) -> Point2 {
    let (sx, sy) = quad
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point2::new(sx / 4.0, sy / 4.0)
}

/// Axis-aligned XY bounds of a quad as (min, max).
pub fn bounds(quad: &Quad) -> (Point2, Point2) {
    let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in quad {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    (min, max)
}
