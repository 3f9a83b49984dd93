//! Lane marks: ribbons along lane borders driven by the "Mark" attribute.

use glam::{DVec2, DVec3};

use crate::algorithms::polyline_merge::{three_vectors, Located, MergePolyline, PolylineArrangement};
use crate::base::operator::RoadBaseOperatorData;
use crate::base::polygon::RoadPolygon;
use crate::config::MarksConfig;
use crate::error::Result;
use crate::mesh::RoadMesh;
use crate::ops::{run_mesh_op, MeshOutput};
use crate::preset::RoadPreset;
use crate::result::GeometryResult;
use crate::road::attributes::{names, AttributeValue, MarkProfile, MarkSource, Rgba};
use crate::road::layout::CENTER_LANE;
use crate::road::position::{sub_polyline_by_s, RoadPosition};
use crate::scheduler::Progress;

const MERGE_TOL: f64 = 1.0;
const UV_V_SCALE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
struct MarkVertex {
    pos: RoadPosition,
    section: usize,
}

impl Located for MarkVertex {
    fn location(&self) -> DVec3 {
        self.pos.location
    }
    fn up(&self) -> DVec3 {
        self.pos.up_vector()
    }
}

type MarkLines = PolylineArrangement<MarkVertex, MarkSource>;

pub struct MarksOp {
    pub config: MarksConfig,
}

/// Start the line at its lowest S and make S grow along it. A closed line gets its first
/// vertex appended again one spline length further.
fn normalize_by_s(mut points: Vec<RoadPosition>, closed: bool, length: f64) -> Vec<RoadPosition> {
    if points.len() < 2 {
        return points;
    }
    if !closed {
        if points[0].s > points[points.len() - 1].s {
            points.reverse();
        }
        return points;
    }
    points.pop();
    let rotate_to_min = |points: &mut Vec<RoadPosition>| {
        let min = (0..points.len()).min_by(|&a, &b| points[a].s.total_cmp(&points[b].s)).unwrap_or(0);
        points.rotate_left(min);
    };
    rotate_to_min(&mut points);
    if points.len() > 2 && points[1].s > points[2].s {
        points.reverse();
        rotate_to_min(&mut points);
    }
    let mut first = points[0];
    first.s += length;
    points.push(first);
    points
}

/// Vertices of `points` between arc lengths `d0` and `d1`; `s` already holds arc length.
fn slice(points: &[MarkVertex], d0: f64, d1: f64) -> Vec<MarkVertex> {
    let positions: Vec<RoadPosition> = points.iter().map(|p| p.pos).collect();
    let section_at = |s: f64| points[points.partition_point(|p| p.pos.s <= s).saturating_sub(1).min(points.len() - 1)].section;
    sub_polyline_by_s(&positions, d0, d1).into_iter().map(|pos| MarkVertex { pos, section: section_at(pos.s) }).collect()
}

/// Quad strip between `r - width / 2` and `r + width / 2` across the line.
fn ribbon(mesh: &mut RoadMesh, points: &[MarkVertex], r: f64, width: f64, z: f64, color: Rgba, material: u32) {
    if points.len() < 2 {
        return;
    }
    let base = mesh.vertex_count() as u32;
    let mut uvs = Vec::with_capacity(points.len() * 2);
    for i in 0..points.len() {
        let (_, right, up, sin_a) = three_vectors(points, i);
        let sin_a = if sin_a.abs() > 1e-6 { sin_a } else { 1.0 };
        let loc = points[i].pos.location + up * z;
        mesh.append_vertex(loc + right * ((r - width * 0.5) / sin_a));
        mesh.append_vertex(loc + right * ((r + width * 0.5) / sin_a));
        let v = points[i].pos.s * UV_V_SCALE;
        uvs.push(DVec2::new(0.0, v));
        uvs.push(DVec2::new(1.0, v));
    }
    let color = color.to_linear();
    for i in 0..points.len() as u32 - 1 {
        let group = points[i as usize].section as u32;
        let (a0, b0, a1, b1) = (base + 2 * i, base + 2 * i + 1, base + 2 * i + 2, base + 2 * i + 3);
        for tri in [[a0, b0, a1], [b0, b1, a1]] {
            let new = mesh.append_triangle(tri, material, group);
            mesh.uv0[new] = tri.map(|v| uvs[(v - base) as usize]);
            mesh.colors[new] = [color; 3];
        }
    }
}

impl MarksOp {
    pub fn new(config: MarksConfig) -> Self {
        Self { config }
    }

    /// Insert every keyed mark range of one lane polygon.
    fn collect_lines(&self, base: &RoadBaseOperatorData, poly: &RoadPolygon, lines: &mut MarkLines) {
        let (Some(lane), Some(snapshot)) = (poly.lane(), base.snapshot(poly)) else { return };
        let Some(section) = poly.section(snapshot) else { return };
        let Some(attribute) = section.lane_attributes(lane.lane_index).and_then(|a| a.get(names::MARK)) else { return };
        if !attribute.has_keys() {
            return;
        }
        let lane_end = match poly.road_lane(snapshot) {
            Some(l) => l.end_offset(),
            None => section.end_offset(),
        };
        let vids = if lane.lane_index == CENTER_LANE { &lane.inside_vertices } else { &lane.outside_vertices };
        let closed = vids.len() > 2 && vids.first() == vids.last();
        let line = normalize_by_s(base.make_polyline(vids, poly.id), closed, snapshot.length());

        for (s0, s1, value) in attribute.ranges(lane_end - section.s_offset) {
            let AttributeValue::Mark(mark) = value else { continue };
            if mark.profile == MarkSource::Custom(MarkProfile::None) {
                continue;
            }
            let part = sub_polyline_by_s(&line, s0 + section.s_offset, s1 + section.s_offset);
            if part.len() < 2 {
                continue;
            }
            let vertices = part.into_iter().map(|pos| MarkVertex { pos, section: lane.section_index }).collect();
            lines.insert(MergePolyline::new(vertices, mark.profile.clone()), MERGE_TOL);
        }
    }

    fn build_profile(&self, mesh: &mut RoadMesh, result: &mut GeometryResult, points: &[MarkVertex], profile: &MarkProfile, r: f64, length: f64) {
        let z = self.config.mark_offset;
        match profile {
            MarkProfile::None => result.add_warning(0, "can't build mark: the profile is empty"),
            MarkProfile::Solid { width, color, material_profile } => {
                let material = mesh.material_slot(material_profile);
                ribbon(mesh, points, r, *width, z, *color, material);
            }
            MarkProfile::Broken { width, long, gap, color, material_profile } => {
                let material = mesh.material_slot(material_profile);
                if length < *long || long + gap <= 0.0 {
                    ribbon(mesh, points, r, *width, z, *color, material);
                    return;
                }
                let count = (length / (long + gap)).round().max(1.0);
                let step = length / count;
                let dash = step * long / (long + gap);
                for i in 0..count as usize {
                    let d0 = i as f64 * step;
                    ribbon(mesh, &slice(points, d0, d0 + dash), r, *width, z, *color, material);
                }
            }
            MarkProfile::Double { left, right, gap } => {
                self.build_profile(mesh, result, points, left, r - gap * 0.5, length);
                self.build_profile(mesh, result, points, right, r + gap * 0.5, length);
            }
        }
    }

    fn build(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress, mesh: &mut RoadMesh, result: &mut GeometryResult) -> Result<()> {
        let mut lines = MarkLines::new();
        for poly in &base.polygons {
            self.collect_lines(base, poly, &mut lines);
        }
        progress.check()?;

        for line in &mut lines.polylines {
            let mut acc = 0.0;
            let mut prev: Option<DVec3> = None;
            for v in &mut line.vertices {
                acc += prev.map_or(0.0, |p| p.distance(v.pos.location));
                prev = Some(v.pos.location);
                v.pos.s = acc;
            }

            let profile = match &line.meta {
                MarkSource::Custom(p) => p,
                MarkSource::Preset(name) => match preset.lane_mark_profiles.get(name) {
                    Some(p) => p,
                    None => {
                        result.add_warning(0, format!("can't find mark profile: {name}"));
                        continue;
                    }
                },
            };
            self.build_profile(mesh, result, &line.vertices, profile, 0.0, acc);
            progress.check()?;
        }
        mesh.compute_normals();
        Ok(())
    }

    pub fn calculate(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress) -> MeshOutput {
        run_mesh_op("marks", base, progress, |mesh, result| self.build(base, preset, progress, mesh, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{base, straight};
    use crate::road::attributes::{LaneAttribute, LaneMark};
    use crate::road::layout::RoadLane;
    use crate::scheduler::NeverCancel;
    use approx::assert_relative_eq;

    fn marked(keys: &[(f64, MarkSource)]) -> RoadLane {
        let mut attr = LaneAttribute::new();
        for (s, profile) in keys {
            attr.add_key(*s, AttributeValue::Mark(LaneMark { profile: profile.clone() }));
        }
        RoadLane::driving(350.0).with_attribute(names::MARK, attr)
    }

    fn preset_mark(name: &str) -> MarkSource {
        MarkSource::Preset(name.into())
    }

    /// Lengths of the connected strips along X.
    fn dash_lengths(mesh: &RoadMesh) -> Vec<f64> {
        let mut xs: Vec<(f64, f64)> = Vec::new();
        for t in &mesh.triangles {
            let lo = t.iter().map(|&v| mesh.positions[v as usize].x).fold(f64::MAX, f64::min);
            let hi = t.iter().map(|&v| mesh.positions[v as usize].x).fold(f64::MIN, f64::max);
            match xs.last_mut() {
                Some(last) if (lo - last.1).abs() < 1e-6 || lo <= last.1 => last.1 = last.1.max(hi),
                _ => xs.push((lo, hi)),
            }
        }
        xs.into_iter().map(|(a, b)| b - a).collect()
    }

    #[test]
    fn broken_mark_splits_into_equal_dashes() {
        let mut preset = RoadPreset::with_defaults();
        preset.lane_mark_profiles.insert("B".into(), MarkProfile::broken(15.0, 300.0, 200.0));
        let base = base(vec![straight("A", 1000.0, vec![], vec![marked(&[(0.0, preset_mark("B"))])])]);
        let out = MarksOp::new(MarksConfig::default()).calculate(&base, &preset, &NeverCancel);
        assert!(out.result.has_result(), "{:?}", out.result);

        let dashes = dash_lengths(&out.mesh);
        assert_eq!(dashes.len(), 2);
        for d in &dashes {
            assert_relative_eq!(*d, 300.0, epsilon = 1e-6);
        }
        assert!(out.mesh.positions.iter().all(|p| (p.z - 3.0).abs() < 1e-9));
        assert!(out.mesh.positions.iter().all(|p| (p.y - 350.0).abs() <= 7.5 + 1e-9));
        assert!(out.mesh.normals.iter().all(|n| n.z > 0.99));
    }

    #[test]
    fn solid_mark_covers_its_range_only() {
        let lane = marked(&[(0.0, preset_mark("Solid")), (600.0, MarkSource::Custom(MarkProfile::None))]);
        let base = base(vec![straight("A", 1000.0, vec![], vec![lane])]);
        let out = MarksOp::new(MarksConfig::default()).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        let area: f64 = (0..out.mesh.triangle_count()).map(|t| out.mesh.triangle_area(t)).sum();
        assert_relative_eq!(area, 600.0 * 15.0, max_relative = 1e-6);
        assert_eq!(out.mesh.material_slots, vec!["Default".to_string()]);
        let v_max = out.mesh.uv0.iter().flatten().map(|uv| uv.y).fold(f64::MIN, f64::max);
        assert_relative_eq!(v_max, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn double_mark_places_two_ribbons() {
        let profile = MarkProfile::Double { left: Box::new(MarkProfile::solid(10.0)), right: Box::new(MarkProfile::solid(10.0)), gap: 30.0 };
        let base = base(vec![straight("A", 500.0, vec![], vec![marked(&[(0.0, MarkSource::Custom(profile))])])]);
        let out = MarksOp::new(MarksConfig::default()).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        let ys: Vec<f64> = out.mesh.positions.iter().map(|p| p.y).collect();
        let lo = ys.iter().copied().fold(f64::MAX, f64::min);
        let hi = ys.iter().copied().fold(f64::MIN, f64::max);
        assert_relative_eq!(lo, 350.0 - 20.0, epsilon = 1e-6);
        assert_relative_eq!(hi, 350.0 + 20.0, epsilon = 1e-6);
    }

    #[test]
    fn unknown_profile_is_a_warning() {
        let base = base(vec![straight("A", 500.0, vec![], vec![marked(&[(0.0, preset_mark("Zebra"))])])]);
        let out = MarksOp::new(MarksConfig::default()).calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        assert!(out.result.has_result());
        assert!(out.mesh.is_empty());
        assert_eq!(out.result.warnings[0].text, "can't find mark profile: Zebra");
    }

    #[test]
    fn closed_line_starts_at_lowest_s() {
        let p = |s: f64| RoadPosition { s, location: DVec3::new(s, 0.0, 0.0), ..RoadPosition::default() };
        let line = normalize_by_s(vec![p(300.0), p(200.0), p(100.0), p(0.0), p(300.0)], true, 400.0);
        let s: Vec<f64> = line.iter().map(|v| v.s).collect();
        assert_eq!(s, vec![0.0, 100.0, 200.0, 300.0, 400.0]);
    }
}
