//! Reference splines for instanced meshes (fences, rails, ...).
//!
//! Lane attributes named after a preset `ref_spline_entries` entry and keyed with
//! [`Generation`] values are traced across the road surface, merged into continuous
//! lines and cut into fixed-length spline segments.

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::algorithms::polyline::remove_polyline_self_intersection;
use crate::algorithms::polyline_merge::{Located, MergePolyline, PolylineArrangement};
use crate::base::operator::{DebugLines, RoadBaseOperatorData};
use crate::base::polygon::RoadPolygon;
use crate::config::SplineMeshConfig;
use crate::error::Result;
use crate::geometry::math::{hermite, hermite2, quat_from_xz, xy};
use crate::preset::{RefSplineEntry, RoadPreset};
use crate::result::GeometryResult;
use crate::road::attributes::{AttributeValue, Generation, Rgba};
use crate::road::layout::LaneDirection;
use crate::road::spline::SplineCurve;
use crate::scheduler::Progress;

const MERGE_TOL: f64 = 10.0;
const DEBUG_STEPS_PER_SEGMENT: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineMeshSegment {
    pub start_pos: DVec3,
    pub start_tangent: DVec3,
    pub end_pos: DVec3,
    pub end_tangent: DVec3,
    pub start_scale: DVec2,
    pub end_scale: DVec2,
    pub start_offset: DVec2,
    pub end_offset: DVec2,
    /// Radians
    pub start_roll: f64,
    pub end_roll: f64,
    pub entry_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SplineMeshOutput {
    pub segments: Vec<SplineMeshSegment>,
    pub result: GeometryResult,
}

/// Shape values carried by a keyed vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ShapeKey {
    scale: DVec2,
    offset: DVec2,
    roll: f64,
}

impl Default for ShapeKey {
    fn default() -> Self {
        Self { scale: DVec2::ONE, offset: DVec2::ZERO, roll: 0.0 }
    }
}

impl From<&Generation> for ShapeKey {
    fn from(g: &Generation) -> Self {
        Self { scale: g.scale, offset: g.offset, roll: g.roll.to_radians() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RefVertex {
    location: DVec3,
    up: DVec3,
    key: Option<ShapeKey>,
    reverse: bool,
}

impl Located for RefVertex {
    fn location(&self) -> DVec3 {
        self.location
    }
    fn up(&self) -> DVec3 {
        self.up
    }
    fn flip(&mut self) {
        self.reverse = !self.reverse;
    }
}

type RefLines = PolylineArrangement<RefVertex, String>;

/// Key values along a line, indexed by arc length.
struct KeyTrack {
    keys: Vec<(f64, ShapeKey)>,
}

impl KeyTrack {
    fn new(line: &[RefVertex], curve: &SplineCurve) -> Self {
        let mut keys: Vec<(f64, ShapeKey)> =
            line.iter().enumerate().filter_map(|(i, v)| v.key.map(|k| (curve.distance_at_point(i), k))).collect();
        let length = curve.length();
        match (keys.first().copied(), keys.last().copied()) {
            (Some(first), Some(last)) => {
                if first.0 > 0.0 {
                    keys.insert(0, (0.0, first.1));
                }
                if last.0 < length {
                    keys.push((length, last.1));
                }
            }
            _ => keys = vec![(0.0, ShapeKey::default()), (length, ShapeKey::default())],
        }
        Self { keys }
    }

    fn eval(&self, d: f64) -> ShapeKey {
        let i = self.keys.partition_point(|k| k.0 <= d);
        let (Some(a), Some(b)) = (self.keys.get(i.saturating_sub(1)), self.keys.get(i)) else {
            return self.keys.last().map_or_else(ShapeKey::default, |k| k.1);
        };
        let span = b.0 - a.0;
        let t = if span > 0.0 { ((d - a.0) / span).clamp(0.0, 1.0) } else { 0.0 };
        ShapeKey {
            scale: hermite2(a.1.scale, b.1.scale, t),
            offset: hermite2(a.1.offset, b.1.offset, t),
            roll: hermite(a.1.roll, b.1.roll, t),
        }
    }
}

/// Surface up vector at arc length `d`, lerped between the bracketing vertices.
fn up_at_distance(line: &[RefVertex], curve: &SplineCurve, d: f64) -> DVec3 {
    let i = (0..line.len()).rposition(|i| curve.distance_at_point(i) <= d).unwrap_or(0);
    let Some(next) = line.get(i + 1) else { return line[i].up };
    let (d0, d1) = (curve.distance_at_point(i), curve.distance_at_point(i + 1));
    let t = if d1 > d0 { ((d - d0) / (d1 - d0)).clamp(0.0, 1.0) } else { 0.0 };
    line[i].up.lerp(next.up, t).normalize_or_zero()
}

/// Signed angle around `forward` from the world-up frame to `up`.
fn frame_roll(forward: DVec3, up: DVec3) -> f64 {
    let forward = forward.normalize_or_zero();
    let world_up = quat_from_xz(forward, DVec3::Z) * DVec3::Z;
    let up = (up - forward * up.dot(forward)).normalize_or_zero();
    if up == DVec3::ZERO {
        return 0.0;
    }
    forward.dot(world_up.cross(up)).atan2(world_up.dot(up))
}

pub struct SplineMeshOp {
    pub config: SplineMeshConfig,
}

impl SplineMeshOp {
    pub fn new(config: SplineMeshConfig) -> Self {
        Self { config }
    }

    /// Trace every generation range of one lane polygon onto the base surface.
    fn collect_lines(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, poly: &RoadPolygon, lines: &mut RefLines) {
        let (Some(lane), Some(snapshot)) = (poly.lane(), base.snapshot(poly)) else { return };
        let (Some(section), Some(road_lane)) = (poly.section(snapshot), poly.road_lane(snapshot)) else { return };
        let Some(attributes) = section.lane_attributes(lane.lane_index) else { return };
        let side_reverse = (lane.lane_index < 0) ^ (road_lane.direction == LaneDirection::Invert);

        for (name, attribute) in attributes {
            let Some(entry) = preset.ref_spline_entries.get(name) else { continue };
            let keys = attribute.keys();
            let is_reverse = matches!(keys.first().map(|k| &k.value), Some(AttributeValue::Generation(g)) if g.reverse);

            for (i, key) in keys.iter().enumerate() {
                let AttributeValue::Generation(start) = &key.value else { continue };
                let next = keys.get(i + 1);
                let end = next.and_then(|n| match &n.value {
                    AttributeValue::Generation(g) => Some(g),
                    _ => None,
                });
                let s0 = key.s_offset + section.s_offset;
                let s1 = next.map_or(road_lane.end_offset(), |n| n.s_offset + section.s_offset);
                if s1 <= s0 {
                    continue;
                }
                let alpha = |s: f64| match end {
                    Some(end) => hermite(start.alpha, end.alpha, (s - s0) / (s1 - s0)),
                    None => start.alpha,
                };
                let samples = snapshot.sample_lane(lane.section_index, lane.lane_index, alpha, f64::MAX, entry.length_of_segment * 0.5, s0, s1);
                let mut points: Vec<DVec2> = samples.iter().map(|p| xy(p.location)).collect();
                remove_polyline_self_intersection(&mut points);
                if points.len() < 2 {
                    continue;
                }

                let Some(hits) = points.iter().map(|&p| base.find_ray_intersection(p)).collect::<Option<Vec<_>>>() else {
                    log::debug!("{name}: generation range {s0}..{s1} leaves the road surface");
                    continue;
                };
                let reverse = side_reverse ^ is_reverse;
                let last = hits.len() - 1;
                let vertices = hits
                    .iter()
                    .enumerate()
                    .map(|(j, hit)| {
                        let key = match j {
                            0 => Some(ShapeKey::from(start)),
                            j if j == last => end.map(ShapeKey::from),
                            _ => None,
                        };
                        RefVertex { location: hit.point, up: hit.normal, key, reverse }
                    })
                    .collect();
                lines.insert(MergePolyline::new(vertices, name.clone()), MERGE_TOL);
            }
        }
    }

    fn segments(&self, line: &[RefVertex], name: &str, entry: &RefSplineEntry) -> Vec<SplineMeshSegment> {
        let positions: Vec<DVec3> = line.iter().map(|v| v.location).collect();
        let curve = SplineCurve::from_positions(&positions, false);
        let length = curve.length();
        if length <= 0.0 || entry.length_of_segment <= 0.0 {
            return Vec::new();
        }
        let track = KeyTrack::new(line, &curve);
        let count = (length / entry.length_of_segment).round().max(1.0) as usize;
        let seg_len = length / count as f64;

        let sample = |d: f64| {
            let key = curve.key_at_distance(d);
            let tangent = curve.derivative_at_key(key).normalize_or_zero();
            let mut shape = track.eval(d);
            if !entry.align_world_up {
                shape.roll += frame_roll(tangent, up_at_distance(line, &curve, d));
            }
            (curve.location_at_key(key), tangent * seg_len, shape)
        };

        (0..count)
            .map(|j| {
                let (start_pos, start_tangent, a) = sample(j as f64 * seg_len);
                let (end_pos, end_tangent, b) = sample((j + 1) as f64 * seg_len);
                SplineMeshSegment {
                    start_pos,
                    start_tangent,
                    end_pos,
                    end_tangent,
                    start_scale: a.scale,
                    end_scale: b.scale,
                    start_offset: a.offset,
                    end_offset: b.offset,
                    start_roll: a.roll,
                    end_roll: b.roll,
                    entry_name: name.to_string(),
                }
            })
            .collect()
    }

    fn debug_lines(segments: &[SplineMeshSegment]) -> Vec<(DVec3, DVec3)> {
        let mut lines = Vec::new();
        for seg in segments {
            let point = |t: f64| {
                let (t2, t3) = (t * t, t * t * t);
                seg.start_pos * (2.0 * t3 - 3.0 * t2 + 1.0)
                    + seg.start_tangent * (t3 - 2.0 * t2 + t)
                    + seg.end_pos * (3.0 * t2 - 2.0 * t3)
                    + seg.end_tangent * (t3 - t2)
            };
            let mut prev = seg.start_pos;
            for k in 1..=DEBUG_STEPS_PER_SEGMENT {
                let p = point(k as f64 / DEBUG_STEPS_PER_SEGMENT as f64);
                lines.push((prev, p));
                prev = p;
            }
        }
        lines
    }

    fn build(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress, segments: &mut Vec<SplineMeshSegment>) -> Result<()> {
        let mut lines = RefLines::new();
        for poly in &base.polygons {
            self.collect_lines(base, preset, poly, &mut lines);
        }
        progress.check()?;

        for line in &mut lines.polylines {
            let Some(entry) = preset.ref_spline_entries.get(&line.meta) else { continue };
            if line.vertices.first().map_or(false, |v| v.reverse) ^ entry.reverse_spline_direction {
                line.reverse();
            }
            segments.extend(self.segments(&line.vertices, &line.meta, entry));
            progress.check()?;
        }

        if self.config.draw_ref_splines && !segments.is_empty() {
            base.push_debug_lines(DebugLines { color: Rgba { r: 0, g: 255, b: 0, a: 100 }, thickness: 4.0, lines: Self::debug_lines(segments) });
        }
        Ok(())
    }

    pub fn calculate(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress) -> SplineMeshOutput {
        let mut out = SplineMeshOutput::default();
        if !base.result.has_result() {
            out.result.set_failed("spline mesh: base data has no result");
            return out;
        }
        match progress.check().and_then(|_| self.build(base, preset, progress, &mut out.segments)).and_then(|_| progress.check()) {
            Ok(()) => {
                out.result.set_success();
                log::debug!("spline mesh: {} segments", out.segments.len());
            }
            Err(e) => {
                out.segments.clear();
                out.result.fail_with(&e);
            }
        }
        out
    }
}
