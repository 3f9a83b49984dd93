//! Constrained Delaunay triangulation of an arrangement.
//!
//! `delaunator` builds the unconstrained triangulation over all vertices. Missing
//! constraint edges are then recovered by flipping the edges that cross them, working
//! directly on delaunator's half-edge arrays. Edges that can't be recovered are
//! reported in `skipped_edges`.

use std::collections::{HashMap, VecDeque};

use delaunator::{next_halfedge, prev_halfedge, triangulate, Point as DPoint, EMPTY};
use glam::DVec2;
use rayon::prelude::*;

use crate::algorithms::winding::winding_number_edges;
use crate::error::{Error, Result};
use crate::geometry::intersect::orient;
use crate::geometry::math::{triangle_signed_area, Aabb2};

/// Triangles are stored counter-clockwise (positive signed area).
#[derive(Debug, Clone, Default)]
pub struct ConstrainedTriangulation {
    pub vertices: Vec<DVec2>,
    pub triangles: Vec<[usize; 3]>,
    pub skipped_edges: Vec<(usize, usize)>,
}

struct HalfEdges {
    tri: Vec<usize>,
    he: Vec<usize>,
    map: HashMap<(usize, usize), usize>,
}

impl HalfEdges {
    fn new(tri: Vec<usize>, he: Vec<usize>) -> Self {
        let mut map = HashMap::with_capacity(tri.len());
        for e in 0..tri.len() {
            map.insert((tri[e], tri[next_halfedge(e)]), e);
        }
        Self { tri, he, map }
    }

    #[inline]
    fn key(&self, e: usize) -> (usize, usize) { (self.tri[e], self.tri[next_halfedge(e)]) }

    fn has_edge(&self, a: usize, b: usize) -> bool {
        self.map.contains_key(&(a, b)) || self.map.contains_key(&(b, a))
    }

    fn link(&mut self, a: usize, b: usize) {
        self.he[a] = b;
        if b != EMPTY {
            self.he[b] = a;
        }
    }

    // Halfedges of the two triangles sharing edge `a`
    fn quad_halfedges(a: usize, b: usize) -> [usize; 6] {
        let a0 = a - a % 3;
        let b0 = b - b % 3;
        [a0, a0 + 1, a0 + 2, b0, b0 + 1, b0 + 2]
    }

    /// Flip the interior edge `a`: triangles (p,q,r0) and (q,p,r1) become (r1,q,r0) and (r0,p,r1).
    fn flip(&mut self, a: usize) -> Option<(usize, usize)> {
        let b = self.he[a];
        if b == EMPTY {
            return None;
        }
        let touched = Self::quad_halfedges(a, b);
        for &e in &touched {
            let k = self.key(e);
            self.map.remove(&k);
        }
        let ar = prev_halfedge(a);
        let bl = prev_halfedge(b);
        let p0 = self.tri[ar];
        let p1 = self.tri[bl];
        let hbl = self.he[bl];
        let har = self.he[ar];

        self.tri[a] = p1;
        self.tri[b] = p0;
        self.link(a, hbl);
        self.link(b, har);
        self.link(ar, bl);

        for &e in &touched {
            let k = self.key(e);
            self.map.insert(k, e);
        }
        Some((p0, p1))
    }
}

#[inline]
fn properly_cross(a: DVec2, b: DVec2, c: DVec2, d: DVec2) -> bool {
    let o1 = orient(a, b, c);
    let o2 = orient(a, b, d);
    let o3 = orient(c, d, a);
    let o4 = orient(c, d, b);
    o1 * o2 < 0.0 && o3 * o4 < 0.0
}

impl ConstrainedTriangulation {
    /// Triangulate `vertices` and enforce `edges` as constraints.
    pub fn build(vertices: &[DVec2], edges: &[(usize, usize)]) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::triangulation("fewer than three vertices"));
        }
        let points: Vec<DPoint> = vertices.iter().map(|p| DPoint { x: p.x, y: p.y }).collect();
        let t = triangulate(&points);
        if t.triangles.is_empty() {
            return Err(Error::triangulation("delaunay triangulation is empty"));
        }

        let mut hes = HalfEdges::new(t.triangles, t.halfedges);
        let mut skipped = Vec::new();
        for &(a, b) in edges {
            if a == b || hes.has_edge(a, b) {
                continue;
            }
            if !insert_constraint(&mut hes, vertices, a, b) {
                skipped.push((a, b));
            }
        }
        if !skipped.is_empty() {
            log::debug!("cdt: {} constraint edges skipped", skipped.len());
        }

        let mut triangles = Vec::with_capacity(hes.tri.len() / 3);
        for c in hes.tri.chunks_exact(3) {
            let (x, y, z) = (c[0], c[1], c[2]);
            let area = triangle_signed_area(vertices[x], vertices[y], vertices[z]);
            if area > 0.0 {
                triangles.push([x, y, z]);
            } else if area < 0.0 {
                triangles.push([z, y, x]);
            }
        }
        log::debug!("cdt: {} vertices, {} triangles", vertices.len(), triangles.len());

        Ok(Self { vertices: vertices.to_vec(), triangles, skipped_edges: skipped })
    }

    pub fn centroid(&self, tid: usize) -> DVec2 {
        let [a, b, c] = self.triangles[tid];
        (self.vertices[a] + self.vertices[b] + self.vertices[c]) / 3.0
    }

    /// Indices of triangles whose centroid has a non-zero winding number against `loops`
    /// (boundary loops plus reversed holes).
    pub fn filled_triangles(&self, loops: &[(usize, usize)]) -> Vec<usize> {
        if loops.is_empty() {
            return Vec::new();
        }
        let bounds = Aabb2::from_points(loops.iter().map(|&(a, _)| self.vertices[a]));
        (0..self.triangles.len())
            .into_par_iter()
            .filter(|&tid| {
                let c = self.centroid(tid);
                bounds.distance_squared(c) <= 0.0 && winding_number_edges(c, &self.vertices, loops) != 0
            })
            .collect()
    }
}

fn insert_constraint(hes: &mut HalfEdges, v: &[DVec2], a: usize, b: usize) -> bool {
    let (pa, pb) = (v[a], v[b]);
    let seg_box = Aabb2::from_points([pa, pb]);

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    for e in 0..hes.tri.len() {
        let opp = hes.he[e];
        if opp != EMPTY && opp < e {
            continue;
        }
        let (p, q) = hes.key(e);
        if p == a || p == b || q == a || q == b {
            continue;
        }
        let (pp, pq) = (v[p], v[q]);
        if !segment_box_overlap(&seg_box, pp, pq) {
            continue;
        }
        if properly_cross(pa, pb, pp, pq) {
            if opp == EMPTY {
                // crossing a hull edge means the segment leaves the triangulation
                return false;
            }
            queue.push_back((p, q));
        }
    }

    let mut guard = queue.len() * queue.len() + 64;
    while let Some((p, q)) = queue.pop_front() {
        if guard == 0 {
            return false;
        }
        guard -= 1;
        let Some(&e) = hes.map.get(&(p, q)).or_else(|| hes.map.get(&(q, p))) else { continue };
        let opp = hes.he[e];
        if opp == EMPTY {
            return false;
        }
        let r0 = hes.tri[prev_halfedge(e)];
        let r1 = hes.tri[prev_halfedge(opp)];
        let (ep, eq) = hes.key(e);
        let convex = orient(v[r0], v[r1], v[ep]) * orient(v[r0], v[r1], v[eq]) < 0.0;
        if !convex {
            queue.push_back((p, q));
            continue;
        }
        let Some((n0, n1)) = hes.flip(e) else { return false };
        let touches = n0 == a || n0 == b || n1 == a || n1 == b;
        if !touches && properly_cross(pa, pb, v[n0], v[n1]) {
            queue.push_back((n0, n1));
        }
    }
    hes.has_edge(a, b)
}

fn segment_box_overlap(b: &Aabb2, p: DVec2, q: DVec2) -> bool {
    let sb = Aabb2::from_points([p, q]);
    !(sb.max.x < b.min.x || sb.min.x > b.max.x || sb.max.y < b.min.y || sb.min.y > b.max.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64) -> DVec2 { DVec2::new(x, y) }

    #[test]
    fn square_has_two_ccw_triangles() {
        let pts = vec![v(0.0, 0.0), v(1.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)];
        let t = ConstrainedTriangulation::build(&pts, &[]).unwrap();
        assert_eq!(t.triangles.len(), 2);
        for tri in &t.triangles {
            assert!(triangle_signed_area(pts[tri[0]], pts[tri[1]], pts[tri[2]]) > 0.0);
        }
    }

    #[test]
    fn recovers_missing_constraint() {
        // thin vertical diamond: delaunay prefers the short horizontal diagonal
        let pts = vec![v(0.0, -5.0), v(1.0, 0.0), v(0.0, 5.0), v(-1.0, 0.0)];
        let plain = ConstrainedTriangulation::build(&pts, &[]).unwrap();
        let has = |t: &ConstrainedTriangulation, a: usize, b: usize| {
            t.triangles.iter().any(|tri| tri.contains(&a) && tri.contains(&b))
        };
        assert!(has(&plain, 1, 3));
        let cdt = ConstrainedTriangulation::build(&pts, &[(0, 2)]).unwrap();
        assert!(cdt.skipped_edges.is_empty());
        assert!(has(&cdt, 0, 2));
        assert!(!has(&cdt, 1, 3));
    }

    #[test]
    fn filled_with_hole() {
        let pts = vec![
            v(0.0, 0.0), v(10.0, 0.0), v(10.0, 10.0), v(0.0, 10.0),
            v(4.0, 4.0), v(6.0, 4.0), v(6.0, 6.0), v(4.0, 6.0),
        ];
        let outer = vec![(0, 1), (1, 2), (2, 3), (3, 0)];
        let hole = vec![(4, 5), (5, 6), (6, 7), (7, 4)];
        let all: Vec<_> = outer.iter().chain(hole.iter()).copied().collect();
        let t = ConstrainedTriangulation::build(&pts, &all).unwrap();
        let loops = crate::algorithms::boundary::merge_boundaries(&[outer], &[hole]);
        let filled = t.filled_triangles(&loops);
        let area: f64 = filled.iter().map(|&i| {
            let [a, b, c] = t.triangles[i];
            triangle_signed_area(pts[a], pts[b], pts[c])
        }).sum();
        assert!((area - 96.0).abs() < 1e-9);
    }

    #[test]
    fn collinear_input_fails() {
        let pts = vec![v(0.0, 0.0), v(1.0, 0.0), v(2.0, 0.0)];
        assert!(ConstrainedTriangulation::build(&pts, &[]).is_err());
    }
}
