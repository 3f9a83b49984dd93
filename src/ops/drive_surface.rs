//! Driving surface: every driving lane's triangles plus the islands between lanes.

use std::collections::{BTreeSet, HashMap};

use crate::base::operator::RoadBaseOperatorData;
use crate::config::DriveSurfaceConfig;
use crate::error::Result;
use crate::geometry::math::hermite;
use crate::geometry::tolerance::EPS_KINDA_SMALL;
use crate::mesh::RoadMesh;
use crate::ops::{driving_lane, polygons_by_priority, regroup, run_mesh_op, section_group, MeshOutput, GROUPS_PER_SPLINE};
use crate::preset::RoadPreset;
use crate::result::GeometryResult;
use crate::scheduler::Progress;

/// First group id of the island pieces.
const ISLAND_GROUP_BASE: u32 = GROUPS_PER_SPLINE * GROUPS_PER_SPLINE + 1;

pub struct DriveSurfaceOp {
    pub config: DriveSurfaceConfig,
}

/// Triangles no polygon owns, reachable by edges from a triangle with at least two
/// corners on a driving lane.
fn island_triangles(base: &RoadBaseOperatorData, is_driving: &[bool]) -> Vec<usize> {
    let mut claimed = vec![false; base.triangles.len()];
    for tid in base.polygons.iter().flat_map(|p| &p.triangle_ids) {
        claimed[*tid] = true;
    }
    let free: Vec<usize> = (0..base.triangles.len()).filter(|&t| !claimed[t]).collect();

    let mut by_edge: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for &tid in &free {
        let t = base.triangles[tid];
        for k in 0..3 {
            let (a, b) = (t[k], t[(k + 1) % 3]);
            by_edge.entry((a.min(b), a.max(b))).or_default().push(tid);
        }
    }

    let driving_corner = |vid: usize| base.vertices3d[vid].infos.iter().any(|i| is_driving[i.poly]);
    let mut filled = vec![false; base.triangles.len()];
    let mut stack: Vec<usize> = free
        .iter()
        .copied()
        .filter(|&tid| base.triangles[tid].iter().filter(|&&v| driving_corner(v)).count() > 1)
        .collect();
    stack.iter().for_each(|&t| filled[t] = true);
    while let Some(tid) = stack.pop() {
        let t = base.triangles[tid];
        for k in 0..3 {
            let (a, b) = (t[k], t[(k + 1) % 3]);
            for &n in by_edge.get(&(a.min(b), a.max(b))).into_iter().flatten() {
                if !filled[n] {
                    filled[n] = true;
                    stack.push(n);
                }
            }
        }
    }
    free.into_iter().filter(|&t| filled[t]).collect()
}

impl DriveSurfaceOp {
    pub fn new(config: DriveSurfaceConfig) -> Self {
        Self { config }
    }

    /// Per-vertex blend between the default and the edge color: 1 on the outer border,
    /// 0.5 where driving lanes of different splines meet and on islands, softened over
    /// `vertex_color_smooth_radius`.
    fn color_alpha(&self, base: &RoadBaseOperatorData, is_driving: &[bool], islands: &[usize]) -> Vec<f64> {
        let mut alpha = vec![0.0; base.vertices3d.len()];
        if !self.config.compute_vertex_color {
            return alpha;
        }
        for &tid in islands {
            base.triangles[tid].iter().for_each(|&v| alpha[v] = 0.5);
        }
        for (vid, v) in base.vertices3d.iter().enumerate() {
            let driving: Vec<_> = v.infos.iter().filter(|i| is_driving[i.poly]).collect();
            if driving.is_empty() {
                continue;
            }
            if base.is_boundary_vertex(vid) {
                alpha[vid] = 1.0;
            } else {
                let splines: BTreeSet<usize> = driving.iter().filter_map(|i| base.polygon(i.poly)).map(|p| p.spline_index).collect();
                if splines.len() > 1 {
                    alpha[vid] = 0.5;
                }
            }
        }

        let radius = self.config.vertex_color_smooth_radius;
        if radius > EPS_KINDA_SMALL {
            let graph = &base.arrangement.graph;
            for vid in 0..alpha.len() {
                let a = alpha[vid];
                for (n, d2) in base.arrangement.find_vertices_in_radius(graph.vertex(vid), radius, |_| false) {
                    let blended = hermite(a, alpha[n], d2.sqrt() / radius);
                    alpha[n] = alpha[n].min(blended);
                }
            }
        }
        alpha
    }

    fn build(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress, mesh: &mut RoadMesh, _: &mut GeometryResult) -> Result<()> {
        let is_driving: Vec<bool> = base.polygons.iter().map(|p| driving_lane(base, p).is_some()).collect();
        if !is_driving.contains(&true) {
            return Ok(());
        }
        let islands = island_triangles(base, &is_driving);
        progress.check()?;

        for v in &base.vertices3d {
            let vid = mesh.append_vertex(v.vertex);
            mesh.normals[vid as usize] = v.normal;
        }
        let alpha = self.color_alpha(base, &is_driving, &islands);
        progress.check()?;

        let (default, edge) = (self.config.default_color.to_linear(), self.config.edge_color.to_linear());
        let blend = |a: f64| {
            let a = a as f32;
            [0, 1, 2, 3].map(|c| default[c] + (edge[c] - default[c]) * a)
        };
        let split = self.config.split_by_sections;
        let island_material = mesh.material_slot(&self.config.island_material_profile);

        let mut written = vec![false; base.triangles.len()];
        for poly in polygons_by_priority(base, preset, |p| is_driving[p.id]) {
            let Some(lane) = driving_lane(base, poly) else { continue };
            let material = mesh.material_slot(&lane.material_profile);
            let group = if split { section_group(poly, true) } else { 0 };
            for &tid in &poly.triangle_ids {
                if written[tid] {
                    continue;
                }
                written[tid] = true;
                let t = base.triangles[tid];
                let new = mesh.append_triangle(t.map(|v| v as u32), material, group);
                if let Some([uv0, uv1, uv2]) = poly.uv_layers(base, tid) {
                    mesh.uv0[new] = uv0;
                    mesh.uv1[new] = uv1;
                    mesh.uv2[new] = uv2;
                }
                mesh.colors[new] = t.map(|v| blend(alpha[v]));
            }
            progress.check()?;
        }

        let pieces = if split {
            let neighbours = island_neighbours(base, &islands);
            connected_islands(&islands, &neighbours)
        } else {
            vec![islands.clone()]
        };
        for (index, piece) in pieces.iter().enumerate() {
            let group = if split { ISLAND_GROUP_BASE + index as u32 } else { 0 };
            for &tid in piece {
                if written[tid] {
                    continue;
                }
                written[tid] = true;
                let t = base.triangles[tid];
                let new = mesh.append_triangle(t.map(|v| v as u32), island_material, group);
                mesh.colors[new] = t.map(|v| {
                    let a = alpha[v] as f32;
                    [a, a, a, 1.0]
                });
            }
        }

        if split {
            regroup(mesh, self.config.merge_area_threshold);
        }
        mesh.compact();
        mesh.compute_normals();
        Ok(())
    }

    pub fn calculate(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress) -> MeshOutput {
        run_mesh_op("drive surface", base, progress, |mesh, result| self.build(base, preset, progress, mesh, result))
    }
}

/// Edge neighbours among the island triangles.
fn island_neighbours(base: &RoadBaseOperatorData, islands: &[usize]) -> HashMap<usize, Vec<usize>> {
    let mut by_edge: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for &tid in islands {
        let t = base.triangles[tid];
        for k in 0..3 {
            let (a, b) = (t[k], t[(k + 1) % 3]);
            by_edge.entry((a.min(b), a.max(b))).or_default().push(tid);
        }
    }
    let mut out: HashMap<usize, Vec<usize>> = HashMap::new();
    for tids in by_edge.values() {
        for &a in tids {
            out.entry(a).or_default().extend(tids.iter().copied().filter(|&b| b != a));
        }
    }
    out
}

fn connected_islands(islands: &[usize], neighbours: &HashMap<usize, Vec<usize>>) -> Vec<Vec<usize>> {
    let mut seen: BTreeSet<usize> = BTreeSet::new();
    let mut pieces = Vec::new();
    for &seed in islands {
        if !seen.insert(seed) {
            continue;
        }
        let mut piece = vec![seed];
        let mut stack = vec![seed];
        while let Some(t) = stack.pop() {
            for &n in neighbours.get(&t).into_iter().flatten() {
                if seen.insert(n) {
                    piece.push(n);
                    stack.push(n);
                }
            }
        }
        pieces.push(piece);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{base, straight, two_lane_base};
    use crate::road::attributes::Rgba;
    use crate::road::layout::RoadLane;
    use crate::scheduler::NeverCancel;
    use approx::assert_relative_eq;

    fn area(mesh: &RoadMesh) -> f64 {
        (0..mesh.triangle_count()).map(|t| mesh.triangle_area(t)).sum()
    }

    #[test]
    fn covers_both_lanes_once() {
        let base = two_lane_base();
        let out = DriveSurfaceOp::new(DriveSurfaceConfig::default()).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        assert!(out.result.has_result(), "{:?}", out.result);
        assert_relative_eq!(area(&out.mesh), 700_000.0, max_relative = 1e-6);
        assert_eq!(out.mesh.material_slots, vec!["Default".to_string()]);
        assert!(out.mesh.normals.iter().all(|n| n.z > 0.99));
        assert!(out.mesh.positions.len() <= base.vertices3d.len());
    }

    #[test]
    fn outer_border_takes_the_edge_color() {
        let base = two_lane_base();
        let cfg = DriveSurfaceConfig {
            vertex_color_smooth_radius: 0.0,
            default_color: Rgba::WHITE,
            edge_color: Rgba::BLACK,
            ..DriveSurfaceConfig::default()
        };
        let out = DriveSurfaceOp::new(cfg).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        let mut edge_corners = 0;
        for (tid, t) in out.mesh.triangles.iter().enumerate() {
            for k in 0..3 {
                let p = out.mesh.positions[t[k] as usize];
                if (p.y.abs() - 350.0).abs() < 1e-6 {
                    assert_eq!(out.mesh.colors[tid][k], [0.0, 0.0, 0.0, 1.0]);
                    edge_corners += 1;
                }
            }
        }
        assert!(edge_corners > 0);
    }

    #[test]
    fn sidewalk_only_road_has_no_surface() {
        let base = base(vec![straight("S", 800.0, vec![], vec![RoadLane::sidewalk(300.0)])]);
        let out = DriveSurfaceOp::new(DriveSurfaceConfig::default()).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        assert!(out.result.has_result());
        assert!(out.mesh.is_empty());
    }

    #[test]
    fn split_by_sections_keeps_one_group_per_lane_run() {
        let base = two_lane_base();
        let cfg = DriveSurfaceConfig { split_by_sections: true, merge_area_threshold: 0.0, ..DriveSurfaceConfig::default() };
        let out = DriveSurfaceOp::new(cfg).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        let groups: BTreeSet<u32> = out.mesh.group_ids.iter().copied().collect();
        assert_eq!(groups.len(), 1);
        assert_relative_eq!(out.mesh.group_area(0), 700_000.0, max_relative = 1e-6);
    }
}
