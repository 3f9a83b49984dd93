//! Outer boundary tracing over an arrangement graph.
//!
//! The walk starts at the lowest (then left-most) vertex and always takes the
//! sharpest right turn, which traces the outer contour counter-clockwise with the
//! interior on the left. Edges can be filtered by group id and skipped explicitly.

use std::collections::HashSet;

use glam::DVec2;

use crate::algorithms::arrangement::{Graph2, GraphEdge};
use crate::algorithms::winding::point_in_polygon;
use crate::geometry::math::unwind_positive;

/// Directed boundary edge (from, to).
pub type EdgeV = (usize, usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryTrace {
    /// No start vertex passes the filter.
    Empty,
    /// Closed contour back to the start vertex.
    Closed(Vec<EdgeV>),
    /// The walk got stuck or closed on a vertex other than the start.
    Open(Vec<EdgeV>),
}

impl BoundaryTrace {
    pub fn edges(&self) -> &[EdgeV] {
        match self {
            BoundaryTrace::Empty => &[],
            BoundaryTrace::Closed(e) | BoundaryTrace::Open(e) => e,
        }
    }
}

struct EdgeFilter<'a, F: Fn(u32) -> bool> {
    skip: HashSet<(usize, usize)>,
    gid: &'a F,
}

impl<F: Fn(u32) -> bool> EdgeFilter<'_, F> {
    fn passes(&self, e: &GraphEdge) -> bool {
        (self.gid)(e.gid) && !self.skip.contains(&(e.a.min(e.b), e.a.max(e.b)))
    }

    fn vertex_has_gid(&self, g: &Graph2, vid: usize) -> bool {
        g.vertex_edges(vid).iter().any(|&eid| g.edge(eid).map_or(false, |e| self.passes(e)))
    }
}

#[inline]
fn angle_between(base: DVec2, dir: DVec2) -> f64 {
    unwind_positive(dir.y.atan2(dir.x) - base.y.atan2(base.x))
}

/// Trace one outer boundary. Ties between equal turn angles go to the lower vertex id.
pub fn find_boundary(g: &Graph2, skip_edges: &[EdgeV], gid_filter: impl Fn(u32) -> bool) -> BoundaryTrace {
    let filter = EdgeFilter {
        skip: skip_edges.iter().map(|&(a, b)| (a.min(b), a.max(b))).collect(),
        gid: &gid_filter,
    };
    trace(g, &filter)
}

fn trace<F: Fn(u32) -> bool>(g: &Graph2, filter: &EdgeFilter<'_, F>) -> BoundaryTrace {
    let mut start: Option<(usize, DVec2)> = None;
    for vid in 0..g.vertex_count() {
        if !filter.vertex_has_gid(g, vid) {
            continue;
        }
        let p = g.vertex(vid);
        let better = match start {
            None => true,
            Some((_, s)) => p.y < s.y || (p.y == s.y && p.x < s.x),
        };
        if better {
            start = Some((vid, p));
        }
    }
    let Some((mut vid, mut v)) = start else { return BoundaryTrace::Empty };

    let mut vdir = DVec2::new(1.0, 0.0);
    let mut boundary: Vec<EdgeV> = Vec::new();
    // A simple walk can't visit more edges than the graph has
    let max_steps = g.max_edge_id() + 1;

    loop {
        let prev = boundary.last().map(|e| e.0);
        let mut best: Option<(usize, f64, DVec2)> = None;
        for &eid in g.vertex_edges(vid) {
            let Some(e) = g.edge(eid) else { continue };
            if !filter.passes(e) {
                continue;
            }
            let nbr = e.other(vid);
            if Some(nbr) == prev {
                continue;
            }
            let np = g.vertex(nbr);
            let dir = (np - v).normalize_or_zero();
            let ang = angle_between(vdir, dir);
            let take = match best {
                None => true,
                Some((bv, ba, _)) => ang < ba || (ang == ba && nbr < bv),
            };
            if take {
                best = Some((nbr, ang, dir));
            }
        }

        let Some((next, _, dir)) = best else { return BoundaryTrace::Open(boundary) };
        boundary.push((vid, next));
        vid = next;
        v = g.vertex(next);
        vdir = -dir;

        let revisits = boundary[..boundary.len() - 1].iter().any(|&(a, b)| a == vid || b == vid);
        if revisits {
            return if boundary[0].0 == vid { BoundaryTrace::Closed(boundary) } else { BoundaryTrace::Open(boundary) };
        }
        if boundary.len() > max_steps {
            return BoundaryTrace::Open(boundary);
        }
    }
}

/// Find every outer contour.
///
/// Works on a copy of the graph: after each closed contour, every vertex inside it
/// and every contour vertex is stripped of its edges, then the search repeats.
pub fn find_boundaries(g: &Graph2, skip_edges: &[EdgeV], gid_filter: impl Fn(u32) -> bool) -> Vec<Vec<EdgeV>> {
    let filter = EdgeFilter {
        skip: skip_edges.iter().map(|&(a, b)| (a.min(b), a.max(b))).collect(),
        gid: &gid_filter,
    };
    let mut work = g.clone();
    let mut out = Vec::new();
    loop {
        let found = trace(&work, &filter);
        let contour = match &found {
            BoundaryTrace::Empty => break,
            BoundaryTrace::Closed(c) | BoundaryTrace::Open(c) => c.clone(),
        };
        if contour.is_empty() {
            break;
        }
        if let BoundaryTrace::Closed(c) = found {
            let poly = boundary_points(&work, &c);
            for vid in 0..work.vertex_count() {
                if work.vertex_degree(vid) > 0 && point_in_polygon(work.vertex(vid), &poly) {
                    work.isolate_vertex(vid);
                }
            }
            out.push(c);
        }
        for &(a, b) in &contour {
            work.isolate_vertex(a);
            work.isolate_vertex(b);
        }
    }
    log::debug!("boundaries: found {}", out.len());
    out
}

/// Loop points of a boundary: the `from` vertex of every edge.
pub fn boundary_points(g: &Graph2, boundary: &[EdgeV]) -> Vec<DVec2> {
    boundary.iter().map(|&(a, _)| g.vertex(a)).collect()
}

pub fn reverse_boundary(boundary: &[EdgeV]) -> Vec<EdgeV> {
    boundary.iter().rev().map(|&(a, b)| (b, a)).collect()
}

/// Boundary loops followed by reversed hole loops, ready for a non-zero fill.
pub fn merge_boundaries(boundaries: &[Vec<EdgeV>], holes: &[Vec<EdgeV>]) -> Vec<EdgeV> {
    let mut out: Vec<EdgeV> = boundaries.iter().flatten().copied().collect();
    let holes: Vec<EdgeV> = holes.iter().flatten().copied().collect();
    out.extend(reverse_boundary(&holes));
    out
}

/// Same cyclic sequence of edges, possibly starting at a different edge.
pub fn is_same_boundary(a: &[EdgeV], b: &[EdgeV]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if a.is_empty() {
        return true;
    }
    let Some(first) = b.iter().position(|e| *e == a[0]) else { return false };
    (0..a.len()).all(|i| a[i] == b[(i + first) % b.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::math::signed_area;

    fn graph(points: &[(f64, f64)], edges: &[(usize, usize, u32)]) -> Graph2 {
        let mut g = Graph2::new();
        for &(x, y) in points { g.append_vertex(DVec2::new(x, y)); }
        for &(a, b, gid) in edges { g.append_edge(a, b, gid, vec![]); }
        g
    }

    #[test]
    fn square_with_diagonal() {
        let g = graph(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)], &[(0, 1, 2), (1, 2, 2), (2, 3, 2), (3, 0, 2), (0, 2, 2)]);
        let BoundaryTrace::Closed(b) = find_boundary(&g, &[], |_| true) else { panic!("expected closed") };
        assert_eq!(b.len(), 4);
        assert_eq!(b[0].0, b[3].1);
        assert_eq!(b[0], (0, 1));
        assert!(signed_area(&boundary_points(&g, &b)) > 0.0);
    }

    #[test]
    fn gid_filter_and_skip() {
        let g = graph(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)], &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 0, 1)]);
        assert_eq!(find_boundary(&g, &[], |gid| gid != 1), BoundaryTrace::Empty);
        let t = find_boundary(&g, &[(1, 0)], |_| true);
        assert!(matches!(t, BoundaryTrace::Open(_)));
    }

    #[test]
    fn disjoint_and_nested() {
        let mut pts = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        pts.extend([(20.0, 0.0), (30.0, 0.0), (30.0, 10.0), (20.0, 10.0)]);
        pts.extend([(3.0, 3.0), (6.0, 3.0), (6.0, 6.0)]);
        let edges = [
            (0, 1, 2), (1, 2, 2), (2, 3, 2), (3, 0, 2),
            (4, 5, 2), (5, 6, 2), (6, 7, 2), (7, 4, 2),
            (8, 9, 2), (9, 10, 2), (10, 8, 2),
        ];
        let g = graph(&pts, &edges);
        let all = find_boundaries(&g, &[], |_| true);
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|b| b.len() == 4));
    }

    #[test]
    fn same_boundary_rotation() {
        let a = vec![(0, 1), (1, 2), (2, 0)];
        let b = vec![(1, 2), (2, 0), (0, 1)];
        assert!(is_same_boundary(&a, &b));
        assert!(!is_same_boundary(&a, &reverse_boundary(&a)));
        let merged = merge_boundaries(&[a.clone()], &[vec![(3, 4), (4, 5), (5, 3)]]);
        assert_eq!(merged.len(), 6);
        assert_eq!(merged[3], (3, 5));
    }
}
