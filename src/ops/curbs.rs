//! Curbs: a profile curve swept along the borders of sidewalk lanes.

use glam::{DVec2, DVec3};

use crate::algorithms::polyline_merge::{three_vectors, Located, MergePolyline, PolylineArrangement};
use crate::base::operator::RoadBaseOperatorData;
use crate::base::polygon::{PolygonShape, RoadPolygon};
use crate::config::CurbsConfig;
use crate::error::Result;
use crate::mesh::RoadMesh;
use crate::ops::{run_mesh_op, sidewalk_lane, MeshOutput};
use crate::preset::{CurbProfile, RoadPreset};
use crate::result::GeometryResult;
use crate::road::position::RoadPosition;
use crate::scheduler::Progress;

const MERGE_TOL: f64 = 1.0;
const PROFILE_MAX_SQ_DIST: f64 = 0.01;
const PROFILE_MIN_DT: f64 = 0.01;
const PROFILE_MAX_POINTS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
struct CurbVertex {
    pos: RoadPosition,
    section: usize,
}

impl Located for CurbVertex {
    fn location(&self) -> DVec3 {
        self.pos.location
    }
    fn up(&self) -> DVec3 {
        self.pos.up_vector()
    }
}

type CurbLines = PolylineArrangement<CurbVertex, String>;

/// Repeat the first vertex at the end so a border of a closed lane meets itself.
fn close_loop(vertices: &mut Vec<CurbVertex>) {
    if let (Some(&first), Some(last)) = (vertices.first(), vertices.last()) {
        if vertices.len() > 2 && first.pos.location.distance(last.pos.location) > MERGE_TOL * 0.01 {
            vertices.push(first);
        }
    }
}

pub struct CurbsOp {
    pub config: CurbsConfig,
}

impl CurbsOp {
    pub fn new(config: CurbsConfig) -> Self {
        Self { config }
    }

    /// Flagged border lines of one sidewalk polygon. Right and left lanes walk them in
    /// opposite directions so every curb faces the same way across its lane.
    fn collect_lines(&self, base: &RoadBaseOperatorData, poly: &RoadPolygon, lines: &mut CurbLines) {
        let Some(sidewalk) = sidewalk_lane(base, poly) else { return };
        let flags = sidewalk.curbs;
        let mut chains: Vec<(Vec<usize>, bool, usize, bool)> = Vec::new();
        match &poly.shape {
            PolygonShape::Lane(lane) => {
                let is_right = lane.lane_index >= 0;
                if flags.begin && !lane.is_loop {
                    chains.push((lane.begin_cap_vertices.clone(), is_right, lane.section_index, false));
                }
                if flags.end && !lane.is_loop {
                    chains.push((lane.end_cap_vertices.clone(), !is_right, lane.section_index, false));
                }
                if flags.inside {
                    chains.push((lane.inside_vertices.clone(), !is_right, lane.section_index, lane.is_loop));
                }
                if flags.outside {
                    chains.push((lane.outside_vertices.clone(), is_right, lane.section_index, lane.is_loop));
                }
            }
            PolygonShape::Simple(simple) => {
                if flags.inside || flags.outside {
                    chains.push((simple.line_vertices.clone(), true, 0, false));
                }
            }
        }
        for (mut vids, reverse, section, closed) in chains {
            if reverse {
                vids.reverse();
            }
            let mut vertices: Vec<CurbVertex> = base.make_polyline(&vids, poly.id).into_iter().map(|pos| CurbVertex { pos, section }).collect();
            if closed {
                close_loop(&mut vertices);
            }
            if vertices.len() >= 2 {
                lines.insert(MergePolyline::new(vertices, sidewalk.curb_profile.clone()), MERGE_TOL);
            }
        }
    }

    /// Sweep `profile` along one merged border line.
    fn sweep(&self, mesh: &mut RoadMesh, line: &[CurbVertex], profile: &CurbProfile, material: u32) {
        let (times, values) = profile.curve.to_polyline(0.0, profile.width, PROFILE_MAX_SQ_DIST, PROFILE_MIN_DT, PROFILE_MAX_POINTS);
        let (Some((min_t, max_t)), Some((_, max_v))) = (profile.curve.time_range(), profile.curve.value_range()) else { return };
        let n = times.len();
        if n < 2 {
            return;
        }
        let mut profile_len = vec![0.0; n];
        for i in 1..n {
            profile_len[i] = profile_len[i - 1] + DVec2::new(times[i] - times[i - 1], values[i] - values[i - 1]).length();
        }
        let half = (max_t - min_t) * 0.5;
        let scale = self.config.uv0_scale;

        let base = mesh.vertex_count() as u32;
        let mut uvs = Vec::with_capacity(line.len() * n);
        let mut along = 0.0;
        for (s, v) in line.iter().enumerate() {
            if s > 0 {
                along += line[s - 1].pos.location.distance(v.pos.location);
            }
            let (_, right, up, sin_a) = three_vectors(line, s);
            let sin_a = if sin_a.abs() > 1e-6 { sin_a } else { 1.0 };
            for i in 0..n {
                let p = v.pos.location - right * ((times[i] - half) / sin_a) + up * (values[i] - max_v + self.config.curb_height);
                mesh.append_vertex(p);
                uvs.push(DVec2::new(along * scale, (profile_len[n - 1] - profile_len[i]) * scale));
            }
        }

        let n = n as u32;
        for s in 0..line.len() as u32 - 1 {
            let group = line[s as usize].section as u32;
            for i in 0..n - 1 {
                let (a, b, c, d) = (s * n + i, (s + 1) * n + i, s * n + i + 1, (s + 1) * n + i + 1);
                for tri in [[a, b, c], [b, d, c]] {
                    let tri = tri.map(|v| v + base);
                    let new = mesh.append_triangle(tri, material, group);
                    mesh.uv0[new] = tri.map(|v| uvs[(v - base) as usize]);
                }
            }
        }
    }

    fn build(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress, mesh: &mut RoadMesh, result: &mut GeometryResult) -> Result<()> {
        let mut lines = CurbLines::new();
        for poly in &base.polygons {
            self.collect_lines(base, poly, &mut lines);
        }
        progress.check()?;

        for line in &lines.polylines {
            let Some(profile) = preset.curb_profiles.get(&line.meta) else {
                result.add_warning(0, format!("can't find curb profile: {}", line.meta));
                continue;
            };
            if profile.curve.keys().len() < 2 {
                result.add_warning(0, format!("can't build curb mesh: profile {} needs at least two keys", line.meta));
                continue;
            }
            let material = mesh.material_slot(&line.meta);
            self.sweep(mesh, &line.vertices, profile, material);
            progress.check()?;
        }
        mesh.compute_normals();
        Ok(())
    }

    pub fn calculate(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress) -> MeshOutput {
        run_mesh_op("curbs", base, progress, |mesh, result| self.build(base, preset, progress, mesh, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::curve::FloatCurve;
    use crate::ops::test_util::{base, straight};
    use crate::road::layout::{LaneInstance, RoadLane, SidewalkLane};
    use crate::scheduler::NeverCancel;
    use approx::assert_relative_eq;

    fn sidewalk(profile: &str) -> RoadLane {
        RoadLane::new(FloatCurve::constant(300.0), LaneInstance::Sidewalk(SidewalkLane { curb_profile: profile.into(), ..SidewalkLane::default() }))
    }

    #[test]
    fn curbs_along_both_sidewalk_borders() {
        let base = base(vec![straight("A", 1000.0, vec![], vec![RoadLane::driving(350.0), sidewalk("Default")])]);
        let cfg = CurbsConfig::default();
        let out = CurbsOp::new(cfg.clone()).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        assert!(out.result.has_result(), "{:?}", out.result);
        assert!(!out.mesh.is_empty());
        assert_eq!(out.mesh.material_slots, vec!["Default".to_string()]);

        let top = out.mesh.positions.iter().map(|p| p.z).fold(f64::MIN, f64::max);
        let bottom = out.mesh.positions.iter().map(|p| p.z).fold(f64::MAX, f64::min);
        assert_relative_eq!(top, cfg.curb_height, epsilon = 1e-9);
        assert_relative_eq!(bottom, cfg.curb_height - 15.0, epsilon = 1e-9);

        // one sweep centred on each border
        let near = |y: f64| out.mesh.positions.iter().filter(|p| (p.y - y).abs() <= 7.5 + 1e-6).count();
        assert!(near(350.0) > 0);
        assert!(near(650.0) > 0);
        assert_eq!(near(350.0) + near(650.0), out.mesh.vertex_count());

        let v_max = out.mesh.uv0.iter().flatten().map(|uv| uv.x).fold(f64::MIN, f64::max);
        assert_relative_eq!(v_max, 1000.0 * cfg.uv0_scale, epsilon = 1e-6);
    }

    #[test]
    fn loop_border_is_closed_once() {
        let at = |x: f64, y: f64| CurbVertex {
            pos: RoadPosition { location: DVec3::new(x, y, 0.0), ..RoadPosition::default() },
            section: 0,
        };
        let mut ring = vec![at(0.0, 0.0), at(100.0, 0.0), at(100.0, 100.0), at(0.0, 100.0)];
        close_loop(&mut ring);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[4], ring[0]);

        close_loop(&mut ring);
        assert_eq!(ring.len(), 5);

        let mut pair = vec![at(0.0, 0.0), at(100.0, 0.0)];
        close_loop(&mut pair);
        assert_eq!(pair.len(), 2);
    }

    #[test]
    fn missing_profile_is_a_warning() {
        let base = base(vec![straight("A", 600.0, vec![], vec![sidewalk("Granite")])]);
        let out = CurbsOp::new(CurbsConfig::default()).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        assert!(out.result.has_result());
        assert!(out.mesh.is_empty());
        assert!(out.result.warnings.iter().all(|w| w.text == "can't find curb profile: Granite"));
        assert!(!out.result.warnings.is_empty());
    }

    #[test]
    fn flat_profile_needs_two_keys() {
        let mut preset = RoadPreset::with_defaults();
        preset.curb_profiles.insert("Flat".into(), CurbProfile { material: "M".into(), curve: FloatCurve::constant(5.0), width: 15.0 });
        let base = base(vec![straight("A", 600.0, vec![], vec![sidewalk("Flat")])]);
        let out = CurbsOp::new(CurbsConfig::default()).calculate(&base, &preset, &NeverCancel);
        assert!(out.mesh.is_empty());
        assert!(out.result.warnings[0].text.starts_with("can't build curb mesh"));
    }
}
