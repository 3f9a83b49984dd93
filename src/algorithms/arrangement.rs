//! Incremental planar arrangement of 2D segments.
//!
//! Every inserted segment is split against the existing edges so the graph stays
//! planar: crossing edges always meet at a shared vertex. Vertices closer than the
//! snap tolerance are merged. Edges remember which surface groups (`gid` bitmask)
//! and which inserted polylines (`polylines`) produced them.

use glam::DVec2;

use crate::algorithms::hash_grid::PointHashGrid2;
use crate::geometry::intersect::{intersect_segments, perp_cw, SegIntersection, Segment2};
use crate::geometry::math::Aabb2;
use crate::geometry::tolerance::{DEFAULT_SNAP_TOL, EPS_DOT, GRID_CELLS_PER_DIM};

/// Surface group bits carried by arrangement edges.
pub mod group_id {
    pub const CENTER_LINE: u32 = 1;
    pub const DRIVING_SURFACE: u32 = 2;
    pub const SIDEWALKS_SOFT: u32 = 4;
    pub const SIDEWALKS_HARD: u32 = 8;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub a: usize,
    pub b: usize,
    pub gid: u32,
    pub polylines: Vec<u32>,
    pub was_overlapped: bool,
}

impl GraphEdge {
    #[inline]
    pub fn other(&self, v: usize) -> usize { if self.a == v { self.b } else { self.a } }

    fn absorb(&mut self, gid: u32, polylines: &[u32]) {
        self.gid |= gid;
        self.was_overlapped = true;
        for &p in polylines {
            if !self.polylines.contains(&p) {
                self.polylines.push(p);
            }
        }
    }
}

/// Vertex/edge graph; vertices are never removed, edges may be.
#[derive(Debug, Clone, Default)]
pub struct Graph2 {
    vertices: Vec<DVec2>,
    vertex_edges: Vec<Vec<usize>>,
    edges: Vec<Option<GraphEdge>>, // id is index
}

impl Graph2 {
    pub fn new() -> Self { Self::default() }

    pub fn vertex_count(&self) -> usize { self.vertices.len() }
    pub fn max_edge_id(&self) -> usize { self.edges.len() }
    pub fn edge_count(&self) -> usize { self.edges.iter().flatten().count() }

    #[inline] pub fn vertex(&self, vid: usize) -> DVec2 { self.vertices[vid] }
    pub fn vertices(&self) -> &[DVec2] { &self.vertices }
    pub fn set_vertex(&mut self, vid: usize, p: DVec2) { self.vertices[vid] = p; }

    #[inline] pub fn is_edge(&self, eid: usize) -> bool { matches!(self.edges.get(eid), Some(Some(_))) }
    #[inline] pub fn edge(&self, eid: usize) -> Option<&GraphEdge> { self.edges.get(eid).and_then(|e| e.as_ref()) }

    pub fn edges(&self) -> impl Iterator<Item = (usize, &GraphEdge)> + '_ {
        self.edges.iter().enumerate().filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    pub fn vertex_edges(&self, vid: usize) -> &[usize] { &self.vertex_edges[vid] }
    pub fn vertex_degree(&self, vid: usize) -> usize { self.vertex_edges[vid].len() }

    pub fn edge_segment(&self, eid: usize) -> Option<Segment2> {
        self.edge(eid).map(|e| Segment2::new(self.vertices[e.a], self.vertices[e.b]))
    }

    pub fn append_vertex(&mut self, p: DVec2) -> usize {
        self.vertices.push(p);
        self.vertex_edges.push(Vec::new());
        self.vertices.len() - 1
    }

    pub fn append_edge(&mut self, a: usize, b: usize, gid: u32, polylines: Vec<u32>) -> usize {
        debug_assert!(a != b, "degenerate edge");
        let eid = self.edges.len();
        self.edges.push(Some(GraphEdge { a, b, gid, polylines, was_overlapped: false }));
        self.vertex_edges[a].push(eid);
        self.vertex_edges[b].push(eid);
        eid
    }

    pub fn find_edge(&self, a: usize, b: usize) -> Option<usize> {
        let (small, other) = if self.vertex_edges[a].len() <= self.vertex_edges[b].len() { (a, b) } else { (b, a) };
        self.vertex_edges[small].iter().copied().find(|&eid| {
            self.edge(eid).map_or(false, |e| e.other(small) == other)
        })
    }

    pub fn remove_edge(&mut self, eid: usize) -> Option<GraphEdge> {
        let e = self.edges.get_mut(eid)?.take()?;
        self.vertex_edges[e.a].retain(|&x| x != eid);
        self.vertex_edges[e.b].retain(|&x| x != eid);
        Some(e)
    }

    /// Remove every edge touching `vid`.
    pub fn isolate_vertex(&mut self, vid: usize) {
        for eid in std::mem::take(&mut self.vertex_edges[vid]) {
            if let Some(e) = self.edges[eid].take() {
                let other = e.other(vid);
                self.vertex_edges[other].retain(|&x| x != eid);
            }
        }
    }

    fn relink_end(&mut self, eid: usize, old: usize, new: usize) {
        if let Some(e) = self.edges[eid].as_mut() {
            if e.b == old { e.b = new } else { e.a = new }
        }
        self.vertex_edges[old].retain(|&x| x != eid);
        self.vertex_edges[new].push(eid);
    }

    /// Split edge (a,b) at its midpoint: `eid` becomes (a,new) and a new edge (new,b) is
    /// appended with the same attributes. Returns (new vertex, new edge).
    pub fn split_edge(&mut self, eid: usize) -> Option<(usize, usize)> {
        let e = self.edge(eid)?.clone();
        let mid = (self.vertices[e.a] + self.vertices[e.b]) * 0.5;
        let vnew = self.append_vertex(mid);
        self.relink_end(eid, e.b, vnew);
        let enew = self.append_edge(vnew, e.b, e.gid, e.polylines.clone());
        if let Some(n) = self.edges[enew].as_mut() {
            n.was_overlapped = e.was_overlapped;
        }
        Some((vnew, enew))
    }

    /// Split edge (a,b) through an existing vertex `v`. Pieces that coincide with
    /// existing edges are merged into them. Returns (v, edge (v,b)) or `None` for the
    /// edge when `v` is already an endpoint.
    pub fn split_edge_with_vertex(&mut self, eid: usize, v: usize) -> Option<(usize, Option<usize>)> {
        let e = self.edge(eid)?.clone();
        if v == e.a || v == e.b {
            return Some((v, None));
        }
        match self.find_edge(e.a, v) {
            Some(existing) => {
                self.remove_edge(eid);
                if let Some(x) = self.edges[existing].as_mut() {
                    x.absorb(e.gid, &e.polylines);
                }
            }
            None => self.relink_end(eid, e.b, v),
        }
        let enew = match self.find_edge(v, e.b) {
            Some(existing) => {
                if let Some(x) = self.edges[existing].as_mut() {
                    x.absorb(e.gid, &e.polylines);
                }
                existing
            }
            None => {
                let n = self.append_edge(v, e.b, e.gid, e.polylines.clone());
                if let Some(x) = self.edges[n].as_mut() {
                    x.was_overlapped = e.was_overlapped;
                }
                n
            }
        };
        Some((v, Some(enew)))
    }
}

#[derive(Debug, Clone, Copy)]
struct SegmentPoint {
    t: f64,
    vid: usize,
}

/// Planar arrangement with vertex snapping.
#[derive(Debug, Clone)]
pub struct Arrangement2 {
    pub graph: Graph2,
    grid: PointHashGrid2<usize>,
    pub snap_tol: f64,
    next_polyline_id: u32,
    degenerate_splits: usize,
}

impl Arrangement2 {
    /// `bounds` sizes the hash grid; points outside still work, only slower.
    pub fn new(bounds: &Aabb2, snap_tol: f64) -> Self {
        let snap_tol = if snap_tol > 0.0 { snap_tol } else { DEFAULT_SNAP_TOL };
        let cell = snap_tol.max(bounds.max_dim() / GRID_CELLS_PER_DIM);
        Self {
            graph: Graph2::new(),
            grid: PointHashGrid2::new(cell),
            snap_tol,
            next_polyline_id: 0,
            degenerate_splits: 0,
        }
    }

    pub fn allocate_polyline_id(&mut self) -> u32 {
        let id = self.next_polyline_id;
        self.next_polyline_id += 1;
        id
    }

    /// Number of consecutive split points that landed on the same parameter.
    pub fn degenerate_splits(&self) -> usize { self.degenerate_splits }

    pub fn find_existing_vertex(&self, p: DVec2) -> Option<usize> {
        self.find_nearest_vertex(p, self.snap_tol, |_| false)
    }

    pub fn find_nearest_vertex(&self, p: DVec2, radius: f64, ignore: impl Fn(usize) -> bool) -> Option<usize> {
        let g = &self.graph;
        self.grid
            .find_nearest_in_radius(p, radius, |v| g.vertex(v).distance_squared(p), ignore)
            .map(|(v, _)| v)
    }

    /// Vertices strictly within `radius` of `p` with squared distances.
    pub fn find_vertices_in_radius(&self, p: DVec2, radius: f64, ignore: impl Fn(usize) -> bool) -> Vec<(usize, f64)> {
        let g = &self.graph;
        self.grid.find_all_in_radius(p, radius, |v| g.vertex(v).distance_squared(p), ignore)
    }

    fn append_tracked_vertex(&mut self, p: DVec2) -> usize {
        let vid = self.graph.append_vertex(p);
        self.grid.insert(vid, p);
        vid
    }

    /// Insert a lone point. Returns `None` if a vertex already exists within tolerance;
    /// otherwise splits the closest edge within tolerance or appends an isolated vertex.
    pub fn insert_point(&mut self, p: DVec2) -> Option<usize> {
        self.insert_point_tol(p, self.snap_tol)
    }

    fn insert_point_tol(&mut self, p: DVec2, tol: f64) -> Option<usize> {
        if self.find_existing_vertex(p).is_some() {
            return None;
        }
        let mut closest = tol * tol;
        let mut found = None;
        for (eid, e) in self.graph.edges() {
            let seg = Segment2::new(self.graph.vertex(e.a), self.graph.vertex(e.b));
            let (d2, _) = seg.distance_squared(p);
            if d2 < closest {
                closest = d2;
                found = Some(eid);
            }
        }
        if let Some((vnew, _)) = found.and_then(|eid| self.graph.split_edge(eid)) {
            self.graph.set_vertex(vnew, p);
            self.grid.insert(vnew, p);
            return Some(vnew);
        }
        Some(self.append_tracked_vertex(p))
    }

    /// Insert segment `[a, b]` tagged with `gid` and optional polyline id.
    /// Returns false when nothing was inserted (degenerate or already a single vertex).
    pub fn insert_segment(&mut self, a: DVec2, b: DVec2, gid: u32, pid: Option<u32>) -> bool {
        let tol = self.snap_tol;
        let mut a = a;
        let mut b = b;

        // 1) snap endpoints to existing vertices
        let a_idx = self.find_existing_vertex(a);
        let b_idx = self.find_existing_vertex(b);
        if a_idx.is_some() && a_idx == b_idx {
            return false;
        }
        if let Some(v) = a_idx { a = self.graph.vertex(v); }
        if let Some(v) = b_idx { b = self.graph.vertex(v); }

        // 2) degenerate segment is a point insert
        if a.distance_squared(b) <= tol * tol {
            if a_idx.is_some() || b_idx.is_some() {
                return false;
            }
            return self.insert_point_tol(a, tol).is_some();
        }

        let seg_ab = Segment2::new(a, b);
        let mut points: Vec<SegmentPoint> = Vec::new();

        // 3) crossings with existing edges
        let hits = self.find_intersecting_edges(a, b, tol);

        // 4) floating vertices lying on the segment
        for vid in 0..self.graph.vertex_count() {
            if self.graph.vertex_degree(vid) > 0 || Some(vid) == a_idx || Some(vid) == b_idx {
                continue;
            }
            let v = self.graph.vertex(vid);
            if seg_ab.distance_squared(v).0 < tol * tol {
                points.push(SegmentPoint { t: seg_ab.project(v), vid });
            }
        }

        // 5) split crossed edges and collect split vertices
        for (eid, edge_seg, hit) in hits {
            match hit {
                SegIntersection::None => {}
                SegIntersection::Point { t, .. } => {
                    if let Some((vid, _)) = self.split_segment_at_t(eid, t, tol) {
                        points.push(SegmentPoint { t: seg_ab.project(self.graph.vertex(vid)), vid });
                    }
                }
                SegIntersection::Segment { t0, t1, .. } => {
                    let Some((vid0, new_eid)) = self.split_segment_at_t(eid, t0, tol) else { continue };
                    points.push(SegmentPoint { t: seg_ab.project(self.graph.vertex(vid0)), vid: vid0 });
                    let second = match new_eid {
                        None => self.split_segment_at_t(eid, t1, tol),
                        Some(ne) => {
                            let p1 = edge_seg.point_at(t1);
                            match self.graph.edge_segment(ne) {
                                Some(ns) => self.split_segment_at_t(ne, ns.project(p1), tol),
                                None => None,
                            }
                        }
                    };
                    if let Some((vid1, _)) = second {
                        points.push(SegmentPoint { t: seg_ab.project(self.graph.vertex(vid1)), vid: vid1 });
                    }
                }
            }
        }

        // 6) endpoints
        let a_vid = match a_idx.or_else(|| self.find_existing_vertex(a)) {
            Some(v) => v,
            None => self.append_tracked_vertex(a),
        };
        let b_vid = match b_idx.or_else(|| self.find_existing_vertex(b)) {
            Some(v) => v,
            None => self.append_tracked_vertex(b),
        };
        points.push(SegmentPoint { t: -seg_ab.extent, vid: a_vid });
        points.push(SegmentPoint { t: seg_ab.extent, vid: b_vid });
        points.sort_by(|p, q| p.t.total_cmp(&q.t));

        // 7) connect consecutive points
        let polylines: Vec<u32> = pid.into_iter().collect();
        for w in points.windows(2) {
            let (p0, p1) = (w[0], w[1]);
            if p0.vid == p1.vid {
                continue;
            }
            match self.graph.find_edge(p0.vid, p1.vid) {
                None => {
                    if (p1.t - p0.t).abs() < f32::EPSILON as f64 {
                        self.degenerate_splits += 1;
                        log::warn!("arrangement: split points {} and {} share t={}", p0.vid, p1.vid, p0.t);
                    }
                    self.graph.append_edge(p0.vid, p1.vid, gid, polylines.clone());
                }
                Some(eid) => {
                    if let Some(e) = self.graph.edges[eid].as_mut() {
                        e.absorb(gid, &polylines);
                    }
                }
            }
        }
        true
    }

    /// Split `eid` at centered parameter `t`, reusing an endpoint when `t` is within
    /// `tol` of it, or an existing vertex at the split point.
    /// Returns (vertex used, new edge (v,b) if a split happened).
    fn split_segment_at_t(&mut self, eid: usize, t: f64, tol: f64) -> Option<(usize, Option<usize>)> {
        let (ea, eb) = {
            let e = self.graph.edge(eid)?;
            (e.a, e.b)
        };
        let seg = self.graph.edge_segment(eid)?;
        if t < -(seg.extent - tol) {
            return Some((ea, None));
        }
        if t > seg.extent - tol {
            return Some((eb, None));
        }
        let pt = seg.point_at(t);
        match self.find_existing_vertex(pt) {
            Some(existing) => self.graph.split_edge_with_vertex(eid, existing),
            None => {
                let (vnew, enew) = self.graph.split_edge(eid)?;
                self.graph.set_vertex(vnew, pt);
                self.grid.insert(vnew, pt);
                Some((vnew, Some(enew)))
            }
        }
    }

    fn find_intersecting_edges(&self, a: DVec2, b: DVec2, tol: f64) -> Vec<(usize, Segment2, SegIntersection)> {
        let perp = perp_cw(b - a).normalize_or_zero();
        let side = |p: DVec2| -> i8 {
            let d = (p - a).dot(perp);
            if d > tol { 1 } else if d < -tol { -1 } else { 0 }
        };
        let seg_ab = Segment2::new(a, b);
        let mut hits = Vec::new();
        for (eid, e) in self.graph.edges() {
            let x = self.graph.vertex(e.a);
            let y = self.graph.vertex(e.b);
            let (sx, sy) = (side(x), side(y));
            if sx == sy && sx != 0 {
                continue;
            }
            let edge_seg = Segment2::new(x, y);
            let r = intersect_segments(&edge_seg, &seg_ab, tol, EPS_DOT);
            if r != SegIntersection::None {
                hits.push((eid, edge_seg, r));
            }
        }
        hits
    }
}
