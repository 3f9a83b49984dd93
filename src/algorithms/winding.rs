//! Winding number calculation for point-in-polygon testing.
//!
//! Uses horizontal ray casting with signed crossing count, either over a closed
//! point loop or over an arbitrary set of directed edges (boundary loops plus
//! reversed hole loops).

use glam::DVec2;

/// Compute the winding number of a point relative to a closed polygon.
///
/// - Positive = counter-clockwise winding
/// - Negative = clockwise winding
/// - Zero = point is outside
pub fn winding_number(p: DVec2, polygon: &[DVec2]) -> i32 {
    if polygon.len() < 3 {
        return 0;
    }
    let n = polygon.len();
    (0..n).map(|i| edge_crossing(p, polygon[i], polygon[(i + 1) % n])).sum()
}

/// Winding number of `p` against directed edges `(a, b)` indexing into `vertices`.
///
/// The edges need not be ordered; they only have to form closed loops overall.
pub fn winding_number_edges(p: DVec2, vertices: &[DVec2], edges: &[(usize, usize)]) -> i32 {
    edges.iter().map(|&(a, b)| edge_crossing(p, vertices[a], vertices[b])).sum()
}

#[inline]
fn edge_crossing(p: DVec2, p1: DVec2, p2: DVec2) -> i32 {
    if p1.y <= p.y {
        // Upward crossing
        if p2.y > p.y && cross_product(p1 - p, p2 - p) > 0.0 {
            return 1;
        }
    } else if p2.y <= p.y && cross_product(p1 - p, p2 - p) < 0.0 {
        // Downward crossing
        return -1;
    }
    0
}

/// Non-zero rule.
#[inline]
pub fn point_in_polygon(p: DVec2, polygon: &[DVec2]) -> bool {
    winding_number(p, polygon) != 0
}

#[inline]
fn cross_product(a: DVec2, b: DVec2) -> f64 {
    a.x * b.y - a.y * b.x
}
