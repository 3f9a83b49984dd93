//! The base pass: every lane of every spline goes into one planar arrangement, which is
//! triangulated once and lifted back to 3D. Derived ops read the finished
//! [`RoadBaseOperatorData`] without mutating it.

use std::sync::{Arc, Mutex};

use glam::{DQuat, DVec2, DVec3};
use rayon::prelude::*;

use crate::algorithms::arrangement::{group_id, Arrangement2};
use crate::algorithms::boundary::{find_boundaries, merge_boundaries, EdgeV};
use crate::algorithms::smoothing::{smooth_heights, SmoothOptions};
use crate::algorithms::triangle_tree::TriangleTree2;
use crate::algorithms::triangulate::ConstrainedTriangulation;
use crate::base::polygon::{vertex_flags, ArrangementVertex3d, PolygonId, RoadPolygon};
use crate::config::{BaseConfig, OverlapStrategy};
use crate::error::{Error, Result};
use crate::geometry::curve::FloatCurve;
use crate::geometry::math::{hermite, ray_plane_intersection, xy, Aabb2};
use crate::geometry::tolerance::{EPS_KINDA_SMALL, EPS_SMALL};
use crate::result::GeometryResult;
use crate::road::attributes::Rgba;
use crate::road::layout::{RoadLane, CENTER_LANE};
use crate::road::position::RoadPosition;
use crate::road::snapshot::RoadSplineSnapshot;
use crate::scheduler::Progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseState {
    #[default]
    Init,
    BuildingPolygons,
    ArrangementComplete,
    Triangulated,
    HeightResolved,
    Smoothed,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugLines {
    pub color: Rgba,
    pub thickness: f32,
    pub lines: Vec<(DVec3, DVec3)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: DVec3,
    pub normal: DVec3,
    pub triangle: usize,
}

pub struct RoadBaseOperatorData {
    pub snapshots: Vec<Arc<RoadSplineSnapshot>>,
    pub config: BaseConfig,
    pub arrangement: Arrangement2,
    pub polygons: Vec<RoadPolygon>,
    /// One entry per arrangement vertex
    pub vertices3d: Vec<ArrangementVertex3d>,
    /// Clockwise seen from above
    pub triangles: Vec<[usize; 3]>,
    /// Outer contours of the whole arrangement
    pub boundaries: Vec<Vec<EdgeV>>,
    /// (S, R) extent of every spline
    pub spline_bounds: Vec<Aabb2>,
    pub triangle_tree: TriangleTree2,
    pub max_z: f64,
    pub state: BaseState,
    pub result: GeometryResult,
    boundary_vertices: Vec<bool>,
    debug_lines: Mutex<Vec<DebugLines>>,
}

/// Area-weighted vertex normals of a clockwise mesh.
pub(crate) fn vertex_normals(positions: &[DVec3], triangles: &[[usize; 3]]) -> Vec<DVec3> {
    let mut acc = vec![DVec3::ZERO; positions.len()];
    for t in triangles {
        let [a, b, c] = t.map(|v| positions[v]);
        let n = (c - a).cross(b - a);
        for &v in t {
            acc[v] += n;
        }
    }
    acc.into_iter().map(|n| if n.length_squared() > EPS_SMALL * EPS_SMALL { n.normalize() } else { DVec3::Z }).collect()
}

impl RoadBaseOperatorData {
    pub fn new(snapshots: Vec<Arc<RoadSplineSnapshot>>, config: BaseConfig) -> Self {
        let spline_bounds = vec![Aabb2::empty(); snapshots.len()];
        let arrangement = Arrangement2::new(&Aabb2::empty(), config.vertex_snap_tol);
        Self {
            snapshots,
            config,
            arrangement,
            polygons: Vec::new(),
            vertices3d: Vec::new(),
            triangles: Vec::new(),
            boundaries: Vec::new(),
            spline_bounds,
            triangle_tree: TriangleTree2::default(),
            max_z: 0.0,
            state: BaseState::Init,
            result: GeometryResult::new(),
            boundary_vertices: Vec::new(),
            debug_lines: Mutex::new(Vec::new()),
        }
    }

    pub fn is_boundary_vertex(&self, vid: usize) -> bool {
        self.boundary_vertices.get(vid).copied().unwrap_or(false)
    }

    pub fn snapshot(&self, poly: &RoadPolygon) -> Option<&RoadSplineSnapshot> {
        self.snapshots.get(poly.spline_index).map(|s| s.as_ref())
    }

    pub fn polygon(&self, id: PolygonId) -> Option<&RoadPolygon> {
        self.polygons.get(id)
    }

    pub fn triangle_normal(&self, tid: usize) -> DVec3 {
        let [a, b, c] = self.triangles[tid].map(|v| self.vertices3d[v].vertex);
        (c - a).cross(b - a).normalize_or_zero()
    }

    /// Drop a vertical ray through `p` onto the nearest base triangle.
    pub fn find_ray_intersection(&self, p: DVec2) -> Option<RayHit> {
        let (tid, _) = self.triangle_tree.find_nearest(p)?;
        let corner = self.vertices3d[self.triangles[tid][0]].vertex;
        let normal = self.triangle_normal(tid);
        let point = ray_plane_intersection(DVec3::new(p.x, p.y, self.max_z), DVec3::NEG_Z, corner, normal);
        Some(RayHit { point, normal, triangle: tid })
    }

    /// Road positions of the resolved 3D vertices `vids`, as seen by `poly`, with the
    /// frame tilted onto the vertex normal. Vertices the polygon never touched are skipped.
    pub fn make_polyline(&self, vids: &[usize], poly: PolygonId) -> Vec<RoadPosition> {
        vids.iter()
            .filter_map(|&vid| {
                let v = &self.vertices3d[vid];
                let info = v.info(poly)?;
                let mut pos = info.pos;
                pos.location = v.vertex;
                let (up, normal) = (pos.up_vector().normalize_or_zero(), v.normal.normalize_or_zero());
                if up != DVec3::ZERO && normal != DVec3::ZERO {
                    pos.quat = DQuat::from_rotation_arc(up, normal) * pos.quat;
                }
                Some(pos)
            })
            .collect()
    }

    /// Queue debug segments along `edges`. Safe to call from concurrent ops.
    pub fn add_debug_lines(&self, edges: &[EdgeV], color: Rgba, thickness: f32) {
        let lines = edges.iter().map(|&(a, b)| (self.vertices3d[a].vertex, self.vertices3d[b].vertex)).collect();
        self.push_debug_lines(DebugLines { color, thickness, lines });
    }

    pub fn push_debug_lines(&self, lines: DebugLines) {
        if let Ok(mut all) = self.debug_lines.lock() {
            all.push(lines);
        }
    }

    pub fn debug_lines(&self) -> Vec<DebugLines> {
        self.debug_lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Mark the pass failed with `text`; the returned error only unwinds the steps.
    fn fail(&mut self, text: &str) -> Error {
        self.result.set_failed(text);
        Error::arrangement(text)
    }

    /// Area the lanes of every snapshot can reach, used to size the arrangement grid.
    fn compute_bounds(&self) -> Aabb2 {
        let mut bounds = Aabb2::empty();
        for snapshot in self.snapshots.iter().filter(|s| !s.skip_generation) {
            let layout = snapshot.layout();
            let widest = |c: &FloatCurve| c.value_range().map_or(c.eval(0.0), |(_, hi)| hi).abs();
            let margin = layout
                .sections
                .iter()
                .map(|s| {
                    let side = |lanes: &[RoadLane]| lanes.iter().map(|l| widest(&l.width)).sum::<f64>();
                    side(&s.left).max(side(&s.right))
                })
                .fold(0.0, f64::max)
                + widest(&layout.r_offset);
            let samples = snapshot.sample_lane(
                0,
                CENTER_LANE,
                |_| 0.0,
                self.config.max_square_distance_from_spline,
                self.config.min_segment_length,
                0.0,
                snapshot.length(),
            );
            for p in samples {
                let c = xy(p.location);
                bounds.contain(c - DVec2::splat(margin));
                bounds.contain(c + DVec2::splat(margin));
            }
        }
        bounds
    }

    fn build_polygons(&mut self, progress: &dyn Progress) -> Result<()> {
        self.state = BaseState::BuildingPolygons;
        let bounds = self.compute_bounds();
        self.arrangement = Arrangement2::new(&bounds, self.config.vertex_snap_tol);

        let snapshots = self.snapshots.clone();
        for (spline_index, snapshot) in snapshots.iter().enumerate() {
            if snapshot.skip_generation {
                continue;
            }
            for (section_index, section) in snapshot.layout().sections.iter().enumerate() {
                let left = section.left.len() as i32;
                let right = section.right.len() as i32;
                for lane_index in -left..=right {
                    if lane_index != CENTER_LANE && section.lane(lane_index).map_or(true, |l| l.skip_generation) {
                        continue;
                    }
                    let id = self.polygons.len();
                    match RoadPolygon::build_lane(id, spline_index, snapshot, section_index, lane_index, &mut self.arrangement, &self.config) {
                        Ok(poly) => self.polygons.push(poly),
                        Err(e) => {
                            self.result.add_error(0, e.to_string());
                            return Err(self.fail("can't make the lane polygon"));
                        }
                    }
                }
                progress.check()?;
            }
            if snapshot.is_closed_loop() && snapshot.layout().filled_instance.is_some() {
                let id = self.polygons.len();
                match RoadPolygon::build_simple(id, spline_index, snapshot, &mut self.arrangement, &self.config) {
                    Ok(poly) => self.polygons.push(poly),
                    Err(e) => {
                        self.result.add_error(0, e.to_string());
                        return Err(self.fail("can't make the simple polygon"));
                    }
                }
            }
        }
        if self.arrangement.degenerate_splits() > 0 {
            log::warn!("arrangement: {} degenerate splits", self.arrangement.degenerate_splits());
        }
        Ok(())
    }

    fn complete_arrangement(&mut self) -> Result<()> {
        let graph = &self.arrangement.graph;
        self.vertices3d = vec![ArrangementVertex3d::default(); graph.vertex_count()];
        let mut failure = None;
        for poly in &mut self.polygons {
            let snapshot = &self.snapshots[poly.spline_index];
            let bounds = &mut self.spline_bounds[poly.spline_index];
            if let Err(e) = poly.complete_arrangement(graph, snapshot, &mut self.vertices3d, bounds) {
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            self.result.add_error(0, e.to_string());
            return Err(self.fail("can't complete the arrangement for one of the lane polygons"));
        }
        self.state = BaseState::ArrangementComplete;
        Ok(())
    }

    fn triangulate(&mut self, progress: &dyn Progress) -> Result<()> {
        let graph = &self.arrangement.graph;
        self.boundaries = find_boundaries(graph, &[], |gid| gid != group_id::CENTER_LINE);
        if self.boundaries.is_empty() {
            return Err(self.fail("can't find boundaries"));
        }
        self.boundary_vertices = vec![false; graph.vertex_count()];
        for &(a, b) in self.boundaries.iter().flatten() {
            self.boundary_vertices[a] = true;
            self.boundary_vertices[b] = true;
        }

        let edges: Vec<(usize, usize)> = graph.edges().map(|(_, e)| (e.a, e.b)).collect();
        let cdt = match ConstrainedTriangulation::build(graph.vertices(), &edges) {
            Ok(cdt) => cdt,
            Err(e) => {
                self.result.add_error(0, e.to_string());
                return Err(self.fail("can't triangulate"));
            }
        };
        progress.check()?;

        let mut global_tid = vec![None; cdt.triangles.len()];
        for tid in cdt.filled_triangles(&merge_boundaries(&self.boundaries, &[])) {
            let [a, b, c] = cdt.triangles[tid];
            global_tid[tid] = Some(self.triangles.len());
            self.triangles.push([c, b, a]);
        }
        if self.triangles.is_empty() {
            return Err(self.fail("no triangles"));
        }
        progress.check()?;

        let owned: Vec<Option<Vec<usize>>> = self
            .polygons
            .par_iter()
            .map(|poly| {
                let owns_area = !poly.is_polyline() && poly.lane().map_or(true, |l| l.lane_index != CENTER_LANE);
                owns_area.then(|| {
                    let loops = merge_boundaries(&[poly.boundary.clone()], &poly.holes);
                    cdt.filled_triangles(&loops).into_iter().filter_map(|t| global_tid[t]).collect()
                })
            })
            .collect();

        for (pid, tids) in owned.into_iter().enumerate() {
            let Some(tids) = tids else { continue };
            if tids.is_empty() {
                let desc = self.snapshot(&self.polygons[pid]).map(|s| self.polygons[pid].description(s)).unwrap_or_default();
                return Err(self.fail(&format!("can't get filled triangles for {desc}")));
            }
            let poly = &self.polygons[pid];
            let snapshot = &self.snapshots[poly.spline_index];
            let bounds = self.spline_bounds[poly.spline_index];
            for &tid in &tids {
                for vid in self.triangles[tid] {
                    poly.add_vertex_info(graph, snapshot, &mut self.vertices3d, vid, Some(&bounds), vertex_flags::OVERLAP_POLY);
                }
            }
            self.polygons[pid].triangle_ids = tids;
            progress.check()?;
        }
        self.state = BaseState::Triangulated;
        Ok(())
    }

    fn resolve_heights(&mut self, progress: &dyn Progress) -> Result<()> {
        let strategy = self.config.overlap_strategy;
        let mut used = vec![false; self.vertices3d.len()];
        self.triangles.iter().flatten().for_each(|&v| used[v] = true);
        if self.vertices3d.iter().zip(&used).any(|(v, &u)| u && v.infos.is_empty()) {
            return Err(self.fail("mesh is broken"));
        }
        for (vid, v) in self.vertices3d.iter_mut().enumerate() {
            match v.infos.split_first() {
                Some((first, rest)) => {
                    v.vertex = first.pos.location;
                    v.vertex.z = rest.iter().fold(first.pos.location.z, |z, i| strategy.fold(z, i.pos.location.z));
                }
                None => v.vertex = self.arrangement.graph.vertex(vid).extend(0.0),
            }
        }
        progress.check()?;

        let radius = self.config.overlap_radius;
        if radius > EPS_KINDA_SMALL {
            for vid in 0..self.vertices3d.len() {
                // Vertices no polygon covers carry no height of their own.
                if self.vertices3d[vid].infos.is_empty() {
                    continue;
                }
                let z = self.vertices3d[vid].vertex.z;
                let near = self.arrangement.find_vertices_in_radius(self.arrangement.graph.vertex(vid), radius, |n| {
                    n == vid
                        || self.boundary_vertices.get(n).copied().unwrap_or(false)
                        || self.vertices3d[n].infos.is_empty()
                });
                for (n, d2) in near {
                    let alpha = d2.sqrt() / radius;
                    let nz = &mut self.vertices3d[n].vertex.z;
                    *nz = match strategy {
                        OverlapStrategy::UseMaxZ => nz.max(hermite(z, z - radius, alpha)),
                        OverlapStrategy::UseMinZ => nz.min(hermite(z, z + radius, alpha)),
                    };
                }
                if vid % 256 == 0 {
                    progress.check()?;
                }
            }
        }

        let positions: Vec<DVec3> = self.vertices3d.iter().map(|v| v.vertex).collect();
        self.set_normals(&positions);
        self.state = BaseState::HeightResolved;
        Ok(())
    }

    fn set_normals(&mut self, positions: &[DVec3]) {
        for (v, n) in self.vertices3d.iter_mut().zip(vertex_normals(positions, &self.triangles)) {
            v.normal = n;
        }
    }

    fn smooth(&mut self, progress: &dyn Progress) -> Result<()> {
        if self.snapshots.len() <= 1 || !self.config.smooth {
            return Ok(());
        }
        let mut positions: Vec<DVec3> = self.vertices3d.iter().map(|v| v.vertex).collect();
        let opts = SmoothOptions::scaled(self.config.smooth_speed, self.config.smoothness, positions.len());
        smooth_heights(&mut positions, &self.triangles, &[], opts);
        progress.check()?;
        if positions.iter().all(|p| p.z.is_finite()) {
            for (v, p) in self.vertices3d.iter_mut().zip(&positions) {
                v.vertex.z = p.z;
            }
            self.set_normals(&positions);
            self.state = BaseState::Smoothed;
        } else {
            self.result.add_warning(0, "can't smooth mesh");
        }
        Ok(())
    }

    fn build_trees(&mut self) {
        let flat: Vec<DVec2> = self.vertices3d.iter().map(|v| xy(v.vertex)).collect();
        self.triangle_tree = TriangleTree2::build(&flat, &self.triangles);
        self.max_z = self.vertices3d.iter().map(|v| v.vertex.z).fold(f64::MIN, f64::max);
        if self.config.draw_boundaries {
            for boundary in &self.boundaries {
                self.add_debug_lines(boundary, Rgba::BLUE, 4.0);
            }
        }
    }

    fn run(&mut self, progress: &dyn Progress) -> Result<()> {
        progress.check()?;
        self.build_polygons(progress)?;
        progress.check()?;
        self.complete_arrangement()?;
        progress.check()?;
        self.triangulate(progress)?;
        progress.check()?;
        self.resolve_heights(progress)?;
        self.smooth(progress)?;
        progress.check()?;
        self.build_trees();
        Ok(())
    }
}

/// Builds [`RoadBaseOperatorData`] from a set of spline snapshots.
pub struct RoadBaseOperator {
    pub snapshots: Vec<Arc<RoadSplineSnapshot>>,
    pub config: BaseConfig,
}

impl RoadBaseOperator {
    pub fn new(snapshots: Vec<Arc<RoadSplineSnapshot>>, config: BaseConfig) -> Self {
        Self { snapshots, config }
    }

    pub fn calculate(self, progress: &dyn Progress) -> RoadBaseOperatorData {
        let mut data = RoadBaseOperatorData::new(self.snapshots, self.config);
        match data.run(progress) {
            Ok(()) => {
                data.state = BaseState::Done;
                data.result.set_success();
                log::debug!(
                    "base: {} polygons, {} vertices, {} triangles",
                    data.polygons.len(),
                    data.vertices3d.len(),
                    data.triangles.len()
                );
            }
            Err(e) => {
                data.state = BaseState::Failed;
                if !data.result.has_failed() {
                    data.result.fail_with(&e);
                }
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road::layout::{RoadLaneSection, RoadLayout};
    use crate::road::spline::SplineCurve;
    use crate::scheduler::{CancelToken, NeverCancel};
    use approx::assert_relative_eq;

    fn straight(label: &str, from: DVec3, to: DVec3) -> Arc<RoadSplineSnapshot> {
        let layout = RoadLayout::new(vec![RoadLaneSection::new(0.0, vec![RoadLane::driving(350.0)], vec![RoadLane::driving(350.0)])]);
        Arc::new(RoadSplineSnapshot::new(label, SplineCurve::from_positions(&[from, to], false), layout))
    }

    #[test]
    fn straight_road_is_fully_covered() {
        let road = straight("A", DVec3::ZERO, DVec3::new(1000.0, 0.0, 0.0));
        let data = RoadBaseOperator::new(vec![road], BaseConfig::default()).calculate(&NeverCancel);
        assert!(data.result.has_result(), "{:?}", data.result);
        assert_eq!(data.state, BaseState::Done);

        let area = |tids: &[usize]| -> f64 {
            tids.iter()
                .map(|&t| {
                    let [a, b, c] = data.triangles[t].map(|v| xy(data.vertices3d[v].vertex));
                    0.5 * (b - a).perp_dot(c - a).abs()
                })
                .sum()
        };
        let all: Vec<usize> = (0..data.triangles.len()).collect();
        assert_relative_eq!(area(&all), 700_000.0, max_relative = 1e-6);

        let lanes: Vec<&RoadPolygon> = data.polygons.iter().filter(|p| !p.triangle_ids.is_empty()).collect();
        assert_eq!(lanes.len(), 2);
        assert!(lanes[0].triangle_ids.iter().all(|t| !lanes[1].triangle_ids.contains(t)));
        for lane in &lanes {
            assert_relative_eq!(area(&lane.triangle_ids), 350_000.0, max_relative = 1e-6);
        }

        let hit = data.find_ray_intersection(DVec2::new(500.0, 100.0)).unwrap();
        assert_relative_eq!(hit.point.z, 0.0, epsilon = 1e-6);
        assert_relative_eq!(hit.normal.z, 1.0, epsilon = 1e-9);
        assert!((0..data.vertices3d.len()).any(|v| data.is_boundary_vertex(v)));
        assert!(data.debug_lines().is_empty());
    }

    #[test]
    fn triangles_are_clockwise() {
        let road = straight("A", DVec3::ZERO, DVec3::new(1000.0, 0.0, 0.0));
        let data = RoadBaseOperator::new(vec![road], BaseConfig::default()).calculate(&NeverCancel);
        for t in &data.triangles {
            let [a, b, c] = t.map(|v| xy(data.vertices3d[v].vertex));
            assert!((b - a).perp_dot(c - a) < 0.0);
        }
    }

    #[test]
    fn crossing_roads_take_the_higher_surface() {
        let low = straight("low", DVec3::new(0.0, 0.0, 0.0), DVec3::new(2000.0, 0.0, 0.0));
        let high = straight("high", DVec3::new(1000.0, -1000.0, 100.0), DVec3::new(1000.0, 1000.0, 100.0));
        let cfg = BaseConfig { smooth: false, overlap_radius: 0.0, ..BaseConfig::default() };
        let data = RoadBaseOperator::new(vec![low, high], cfg).calculate(&NeverCancel);
        assert!(data.result.has_result(), "{:?}", data.result);

        for v in &data.vertices3d {
            let spread: Vec<f64> = v.infos.iter().map(|i| i.pos.location.z).collect();
            if let Some(max) = spread.iter().copied().reduce(f64::max) {
                assert_relative_eq!(v.vertex.z, max, epsilon = 1e-9);
            }
        }
        let hit = data.find_ray_intersection(DVec2::new(1000.0, 0.0)).unwrap();
        assert_relative_eq!(hit.point.z, 100.0, epsilon = 1e-6);
    }

    #[test]
    fn crossing_roads_take_the_lower_surface() {
        let low = straight("low", DVec3::new(0.0, 0.0, 0.0), DVec3::new(2000.0, 0.0, 0.0));
        let high = straight("high", DVec3::new(1000.0, -1000.0, 100.0), DVec3::new(1000.0, 1000.0, 100.0));
        let cfg = BaseConfig {
            smooth: false,
            overlap_radius: 0.0,
            overlap_strategy: OverlapStrategy::UseMinZ,
            ..BaseConfig::default()
        };
        let data = RoadBaseOperator::new(vec![low, high], cfg).calculate(&NeverCancel);
        assert!(data.result.has_result(), "{:?}", data.result);

        for v in &data.vertices3d {
            if let Some(min) = v.infos.iter().map(|i| i.pos.location.z).reduce(f64::min) {
                assert_relative_eq!(v.vertex.z, min, epsilon = 1e-9);
            }
        }
        let hit = data.find_ray_intersection(DVec2::new(1000.0, 0.0)).unwrap();
        assert_relative_eq!(hit.point.z, 0.0, epsilon = 1e-6);
    }

    fn crossing_with_falloff(strategy: OverlapStrategy) -> RoadBaseOperatorData {
        let low = straight("low", DVec3::new(0.0, 0.0, 0.0), DVec3::new(2000.0, 0.0, 0.0));
        let high = straight("high", DVec3::new(1000.0, -1000.0, 1000.0), DVec3::new(1000.0, 1000.0, 1000.0));
        let cfg = BaseConfig { smooth: false, overlap_radius: 500.0, overlap_strategy: strategy, ..BaseConfig::default() };
        let data = RoadBaseOperator::new(vec![low, high], cfg).calculate(&NeverCancel);
        assert!(data.result.has_result(), "{:?}", data.result);
        data
    }

    #[test]
    fn falloff_pulls_neighbours_up_to_the_crossing() {
        let data = crossing_with_falloff(OverlapStrategy::UseMaxZ);
        let mut raised = 0;
        for (vid, v) in data.vertices3d.iter().enumerate() {
            let Some(own) = v.infos.iter().map(|i| i.pos.location.z).reduce(f64::max) else {
                continue;
            };
            assert!(v.vertex.z >= own - 1e-9, "vertex {vid} lowered");
            assert!(v.vertex.z <= 1000.0 + 1e-9, "vertex {vid} above the crossing");
            if data.is_boundary_vertex(vid) {
                assert_relative_eq!(v.vertex.z, own, epsilon = 1e-9);
            } else if own < 1e-9 && v.vertex.z > 1.0 {
                raised += 1;
            }
        }
        assert!(raised > 0);
    }

    #[test]
    fn falloff_pulls_neighbours_down_to_the_crossing() {
        let data = crossing_with_falloff(OverlapStrategy::UseMinZ);
        for (vid, v) in data.vertices3d.iter().enumerate() {
            let Some(own) = v.infos.iter().map(|i| i.pos.location.z).reduce(f64::min) else {
                continue;
            };
            assert!(v.vertex.z <= own + 1e-9, "vertex {vid} raised");
            assert!(v.vertex.z >= -1e-9, "vertex {vid} below the crossing");
            if data.is_boundary_vertex(vid) {
                assert_relative_eq!(v.vertex.z, own, epsilon = 1e-9);
            }
        }
        let hit = data.find_ray_intersection(DVec2::new(1000.0, 0.0)).unwrap();
        assert_relative_eq!(hit.point.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn uncovered_vertices_do_not_spread_height() {
        let road = straight("A", DVec3::new(0.0, 0.0, 1000.0), DVec3::new(1000.0, 0.0, 1000.0));
        let cfg = BaseConfig {
            smooth: false,
            overlap_radius: 500.0,
            overlap_strategy: OverlapStrategy::UseMinZ,
            ..BaseConfig::default()
        };
        let mut data = RoadBaseOperator::new(vec![road], cfg).calculate(&NeverCancel);
        assert!(data.result.has_result(), "{:?}", data.result);

        let stray = data.arrangement.insert_point(DVec2::new(500.0, 100.0)).unwrap();
        assert_eq!(stray, data.vertices3d.len());
        data.vertices3d.push(ArrangementVertex3d { vertex: DVec3::ZERO, normal: DVec3::Z, infos: Vec::new() });
        data.resolve_heights(&NeverCancel).unwrap();

        for v in data.vertices3d.iter().filter(|v| !v.infos.is_empty()) {
            assert_relative_eq!(v.vertex.z, 1000.0, epsilon = 1e-9);
        }
        assert_relative_eq!(data.vertices3d[stray].vertex.z, 0.0);
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let road = straight("A", DVec3::ZERO, DVec3::new(1000.0, 0.0, 0.0));
        let data = RoadBaseOperator::new(vec![road], BaseConfig::default()).calculate(&token);
        assert!(data.result.is_cancelled());
        assert_eq!(data.state, BaseState::Failed);
        assert!(data.triangles.is_empty());
    }

    #[test]
    fn empty_input_fails() {
        let data = RoadBaseOperator::new(Vec::new(), BaseConfig::default()).calculate(&NeverCancel);
        assert!(data.result.has_failed());
        assert!(data.result.errors.iter().any(|e| e.text == "can't find boundaries"));
    }
}
