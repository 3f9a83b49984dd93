//! Immutable copy of one authored road spline, as handed to a compute pass.

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::geometry::math::ray_plane_intersection;
use crate::geometry::tolerance::{EPS_SMALL, MAX_SAMPLE_DEPTH};
use crate::road::layout::{RoadLayout, CENTER_LANE};
use crate::road::position::RoadPosition;
use crate::road::spline::SplineCurve;

/// How far below the spline a height probe starts.
const UP_RAY_DEPTH: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotData {
    #[serde(default)]
    label: String,
    #[serde(default)]
    version: u64,
    spline: SplineCurve,
    #[serde(default)]
    layout: RoadLayout,
    #[serde(default)]
    material_priority: i32,
    #[serde(default)]
    skip_generation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SnapshotData", into = "SnapshotData")]
pub struct RoadSplineSnapshot {
    pub label: String,
    /// Bumped by the owner whenever the live spline changes
    pub version: u64,
    pub material_priority: i32,
    pub skip_generation: bool,
    spline: SplineCurve,
    flattened: SplineCurve,
    layout: RoadLayout,
}

impl From<SnapshotData> for RoadSplineSnapshot {
    fn from(d: SnapshotData) -> Self {
        let mut s = Self::new(d.label, d.spline, d.layout);
        s.version = d.version;
        s.material_priority = d.material_priority;
        s.skip_generation = d.skip_generation;
        s
    }
}

impl From<RoadSplineSnapshot> for SnapshotData {
    fn from(s: RoadSplineSnapshot) -> Self {
        SnapshotData {
            label: s.label,
            version: s.version,
            spline: s.spline,
            layout: s.layout,
            material_priority: s.material_priority,
            skip_generation: s.skip_generation,
        }
    }
}

impl RoadSplineSnapshot {
    pub fn new(label: impl Into<String>, spline: SplineCurve, mut layout: RoadLayout) -> Self {
        layout.update_layout();
        layout.update_bounds(spline.length());
        let flattened = spline.flattened();
        Self {
            label: label.into(),
            version: 0,
            material_priority: 0,
            skip_generation: false,
            spline,
            flattened,
            layout,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_material_priority(mut self, priority: i32) -> Self {
        self.material_priority = priority;
        self
    }

    pub fn spline(&self) -> &SplineCurve { &self.spline }
    pub fn flattened(&self) -> &SplineCurve { &self.flattened }
    pub fn layout(&self) -> &RoadLayout { &self.layout }
    pub fn length(&self) -> f64 { self.spline.length() }
    pub fn is_closed_loop(&self) -> bool { self.spline.is_closed_loop() }

    pub fn road_position(&self, s: f64, r: f64) -> RoadPosition {
        let key = self.spline.key_at_distance(s);
        let quat = self.spline.quat_at_key(key);
        RoadPosition { location: self.spline.location_at_key(key) + quat * DVec3::Y * r, quat, s, r }
    }

    /// Position on a lane border. `alpha` 0 is the inner border, 1 the outer one.
    pub fn lane_road_position(&self, section: usize, lane: i32, alpha: f64, s: f64) -> RoadPosition {
        let lane_r = self.layout.sections.get(section).map_or(0.0, |sec| sec.eval_lane_r_offset(lane, s, alpha));
        self.road_position(s, lane_r + self.layout.eval_r_offset(s))
    }

    /// Project a 2D point onto the road surface around the nearest spline key.
    ///
    /// The key is searched on the flattened spline. A vertical ray through `p` is
    /// intersected with the plane through the key location, normal to its up vector.
    pub fn up_ray_intersection(&self, p: DVec2) -> RoadPosition {
        let key = self.flattened.find_nearest_key(p.extend(0.0));
        let location = self.spline.location_at_key(key);
        let quat = self.spline.quat_at_key(key);
        let origin = DVec3::new(p.x, p.y, location.z - UP_RAY_DEPTH);
        let hit = ray_plane_intersection(origin, DVec3::NEG_Z, location, quat * DVec3::Z);
        let local = quat.inverse() * (hit - location);
        RoadPosition { location: hit, quat, s: self.spline.distance_at_key(key), r: local.y }
    }

    /// Adaptive samples of a lane border between `s0` and `s1`.
    ///
    /// Returns an empty list for an unknown section or lane, or an inverted range. A
    /// zero-length spline yields its single start point.
    pub fn sample_lane(
        &self,
        section: usize,
        lane: i32,
        alpha: impl Fn(f64) -> f64,
        max_sq_dist: f64,
        min_seg_len: f64,
        s0: f64,
        s1: f64,
    ) -> Vec<RoadPosition> {
        self.sample_lane_range(section, lane, &alpha, max_sq_dist.max(EPS_SMALL), min_seg_len.max(EPS_SMALL), s0, s1, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn sample_lane_range(
        &self,
        section: usize,
        lane: i32,
        alpha: &dyn Fn(f64) -> f64,
        max_sq: f64,
        min_len: f64,
        mut s0: f64,
        mut s1: f64,
        allow_wrap: bool,
    ) -> Vec<RoadPosition> {
        let Some(sec) = self.layout.sections.get(section) else {
            return Vec::new();
        };
        if lane != CENTER_LANE && !sec.check_lane_index(lane) {
            return Vec::new();
        }
        if self.spline.num_points() == 0 {
            return Vec::new();
        }
        let sample = |s: f64| self.lane_road_position(section, lane, alpha(s), s);
        let length = self.length();
        if length <= 0.0 {
            return vec![sample(0.0)];
        }

        let wrap = allow_wrap && self.is_closed_loop() && (s0 < 0.0 || s1 > length);
        if !wrap {
            s0 = s0.clamp(0.0, length);
            s1 = s1.clamp(0.0, length);
        }
        if s0 > s1 {
            return Vec::new();
        }
        if s0 == s1 {
            return vec![sample(s0)];
        }

        if wrap {
            let loop_of = |d: f64| ((d / length).floor() as i64, d.rem_euclid(length));
            let (first, start) = loop_of(s0);
            let (last, end) = loop_of(s1);
            let mut out: Vec<RoadPosition> = Vec::new();
            let mut from = start;
            for idx in first..=last {
                out.pop();
                let to = if idx == last { end } else { length };
                out.extend(self.sample_lane_range(section, lane, alpha, max_sq, min_len, from, to, false));
                from = 0.0;
            }
            return out;
        }

        let breaks = self.break_points(section, s0, s1);
        let mut out: Vec<RoadPosition> = Vec::new();
        for (i, w) in breaks.windows(2).enumerate() {
            let (start, stop) = (w[0], w[1]);
            let half = (stop - start) / 2.0;
            if half == 0.0 {
                if i + 2 == breaks.len() {
                    out.push(sample(stop));
                }
                continue;
            }
            for k in 0..2 {
                let a = start + half * k as f64;
                let mut part = Vec::new();
                self.subdivide(&sample, a, a + half, max_sq, min_len, 0, &mut part);
                if !part.is_empty() {
                    out.pop();
                    out.extend(part);
                }
            }
        }
        out
    }

    /// Spline points, section bounds and offset keys inside `[s0, s1]`.
    fn break_points(&self, section: usize, s0: f64, s1: f64) -> Vec<f64> {
        let segs = self.spline.num_segments();
        let seg_start = (self.spline.key_at_distance(s0).floor() as usize).min(segs);
        let seg_end = (self.spline.key_at_distance(s1).floor() as usize + 1).min(segs);

        let mut breaks: Vec<f64> = (seg_start..seg_end).map(|i| s0.max(self.spline.distance_at_point(i))).collect();
        breaks.push(s1.min(self.spline.distance_at_point(seg_end)));

        let in_range = |s: f64| s >= s0 && s <= s1;
        if let Some(sec) = self.layout.sections.get(section) {
            breaks.extend([sec.s_offset, sec.end_offset()].into_iter().filter(|&s| in_range(s)));
        }
        breaks.extend(self.layout.r_offset.keys().iter().map(|k| k.time).filter(|&s| in_range(s)));
        breaks.push(s0);
        breaks.push(s1);
        breaks.sort_by(f64::total_cmp);
        breaks.dedup_by(|b, a| (*b - *a).abs() < EPS_SMALL);
        breaks
    }

    #[allow(clippy::too_many_arguments)]
    fn subdivide(
        &self,
        sample: &dyn Fn(f64) -> RoadPosition,
        s0: f64,
        s1: f64,
        max_sq: f64,
        min_len: f64,
        depth: u32,
        out: &mut Vec<RoadPosition>,
    ) {
        let d = s1 - s0;
        if d <= 0.0 {
            return;
        }
        let mid_s = s0 + d / 2.0;
        let (a, m, b) = (sample(s0), sample(mid_s), sample(s1));
        let dev = crate::geometry::math::point_seg_distance_sq_3d(m.location, a.location, b.location);
        if depth < MAX_SAMPLE_DEPTH && (dev > max_sq || a.location.distance(m.location) > min_len) {
            let mut left = Vec::new();
            let mut right = Vec::new();
            self.subdivide(sample, s0, mid_s, max_sq, min_len, depth + 1, &mut left);
            self.subdivide(sample, mid_s, s1, max_sq, min_len, depth + 1, &mut right);
            if !left.is_empty() && !right.is_empty() {
                left.pop();
            }
            out.extend(left);
            out.extend(right);
        } else {
            out.push(a);
            if !a.same_as(&b) {
                out.push(b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road::layout::{RoadLane, RoadLaneSection};
    use approx::assert_relative_eq;

    fn straight() -> RoadSplineSnapshot {
        let spline = SplineCurve::from_positions(&[DVec3::ZERO, DVec3::new(1000.0, 0.0, 0.0)], false);
        let layout = RoadLayout::new(vec![RoadLaneSection::new(0.0, vec![RoadLane::driving(350.0)], vec![RoadLane::driving(350.0)])]);
        RoadSplineSnapshot::new("straight", spline, layout)
    }

    #[test]
    fn lane_positions() {
        let snap = straight();
        assert_relative_eq!(snap.length(), 1000.0, epsilon = 1e-6);
        let p = snap.lane_road_position(0, 1, 1.0, 500.0);
        assert_relative_eq!(p.location.x, 500.0, epsilon = 1e-6);
        assert_relative_eq!(p.location.y, 350.0, epsilon = 1e-6);
        let p = snap.lane_road_position(0, -1, 1.0, 500.0);
        assert_relative_eq!(p.location.y, -350.0, epsilon = 1e-6);
    }

    #[test]
    fn samples_respect_min_segment_length() {
        let snap = straight();
        let pts = snap.sample_lane(0, 1, |_| 1.0, 1.0, 100.0, 0.0, 1000.0);
        // two halves, each bisected down to 125 long pieces
        assert_eq!(pts.len(), 9);
        assert_relative_eq!(pts[0].s, 0.0);
        assert_relative_eq!(pts.last().unwrap().s, 1000.0, epsilon = 1e-9);
        for w in pts.windows(2) {
            assert!(w[1].s > w[0].s);
            assert!(w[0].location.distance(w[1].location) <= 200.0 + 1e-6);
        }
        assert!(snap.sample_lane(0, 2, |_| 1.0, 1.0, 100.0, 0.0, 1000.0).is_empty());
        assert_eq!(snap.sample_lane(0, 1, |_| 0.0, 1.0, 100.0, 300.0, 300.0).len(), 1);
    }

    #[test]
    fn up_ray_gives_road_coordinates() {
        let snap = straight();
        let p = snap.up_ray_intersection(DVec2::new(250.0, 120.0));
        assert_relative_eq!(p.s, 250.0, epsilon = 1e-3);
        assert_relative_eq!(p.r, 120.0, epsilon = 1e-6);
        assert_relative_eq!(p.location.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn closed_loop_range_wraps() {
        let spline = SplineCurve::from_positions(
            &[DVec3::ZERO, DVec3::new(1000.0, 0.0, 0.0), DVec3::new(1000.0, 1000.0, 0.0), DVec3::new(0.0, 1000.0, 0.0)],
            true,
        );
        let snap = RoadSplineSnapshot::new("loop", spline, RoadLayout::new(vec![RoadLaneSection::new(0.0, vec![], vec![])]));
        let l = snap.length();
        let pts = snap.sample_lane(0, 0, |_| 0.0, 1.0, 200.0, l - 100.0, l + 100.0);
        assert!(pts.len() > 2);
        assert_relative_eq!(pts[0].s, l - 100.0, epsilon = 1e-6);
        assert_relative_eq!(pts.last().unwrap().s, 100.0, epsilon = 1e-6);
    }

    #[test]
    fn json_round_trip_rebuilds_layout() {
        let snap = straight();
        let json = serde_json::to_string(&snap).unwrap();
        let back: RoadSplineSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.layout().sections[0].right[0].lane_index(), 1);
        assert_relative_eq!(back.layout().sections[0].end_offset(), back.length());
    }
}
