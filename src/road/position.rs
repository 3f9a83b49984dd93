use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::algorithms::polyline_merge::Located;
use crate::geometry::tolerance::EPS_SMALL;

/// A point in road coordinates: world location and frame plus the (S, R) offsets it was
/// sampled at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadPosition {
    pub location: DVec3,
    pub quat: DQuat,
    pub s: f64,
    pub r: f64,
}

impl Default for RoadPosition {
    fn default() -> Self {
        Self { location: DVec3::ZERO, quat: DQuat::IDENTITY, s: 0.0, r: 0.0 }
    }
}

impl RoadPosition {
    pub fn forward(&self) -> DVec3 { self.quat * DVec3::X }
    pub fn right(&self) -> DVec3 { self.quat * DVec3::Y }
    pub fn up_vector(&self) -> DVec3 { self.quat * DVec3::Z }

    pub fn lerp(&self, other: &RoadPosition, t: f64) -> RoadPosition {
        RoadPosition {
            location: self.location.lerp(other.location, t),
            quat: self.quat.slerp(other.quat, t),
            s: self.s + (other.s - self.s) * t,
            r: self.r + (other.r - self.r) * t,
        }
    }

    pub(crate) fn same_as(&self, other: &RoadPosition) -> bool {
        self.location.distance_squared(other.location) <= EPS_SMALL * EPS_SMALL
            && (self.s - other.s).abs() <= EPS_SMALL
    }
}

impl Located for RoadPosition {
    fn location(&self) -> DVec3 { self.location }
    fn up(&self) -> DVec3 { self.up_vector() }
}

pub fn polyline_length<P: Located>(points: &[P]) -> f64 {
    points.windows(2).map(|w| w[0].location().distance(w[1].location())).sum()
}

/// Part of a polyline whose S runs monotonically, clipped to `[s0, s1]`. The ends are
/// interpolated between the neighbouring samples.
pub fn sub_polyline_by_s(points: &[RoadPosition], s0: f64, s1: f64) -> Vec<RoadPosition> {
    if points.len() < 2 || s1 <= s0 {
        return Vec::new();
    }
    let ascending = points[points.len() - 1].s >= points[0].s;
    let key = |p: &RoadPosition| if ascending { p.s } else { -p.s };
    let (lo, hi) = if ascending { (s0, s1) } else { (-s1, -s0) };

    let mut out = Vec::new();
    for w in points.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        let (ka, kb) = (key(a), key(b));
        if kb < lo || ka > hi || kb - ka <= EPS_SMALL {
            continue;
        }
        let t0 = ((lo - ka) / (kb - ka)).max(0.0);
        let t1 = ((hi - ka) / (kb - ka)).min(1.0);
        let start = a.lerp(b, t0);
        if out.last().map_or(true, |l: &RoadPosition| !l.same_as(&start)) {
            out.push(start);
        }
        out.push(a.lerp(b, t1));
    }
    if out.len() < 2 { Vec::new() } else { out }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Vec<RoadPosition> {
        (0..=n)
            .map(|i| RoadPosition { location: DVec3::new(i as f64 * 100.0, 0.0, 0.0), s: i as f64 * 100.0, ..Default::default() })
            .collect()
    }

    #[test]
    fn clips_by_s() {
        let pts = line(10);
        let sub = sub_polyline_by_s(&pts, 150.0, 420.0);
        assert_eq!(sub.first().unwrap().location.x, 150.0);
        assert_eq!(sub.last().unwrap().location.x, 420.0);
        assert!((polyline_length(&sub) - 270.0).abs() < 1e-9);
        assert!(sub_polyline_by_s(&pts, 2000.0, 3000.0).is_empty());
    }

    #[test]
    fn clips_descending_polyline() {
        let mut pts = line(4);
        pts.reverse();
        let sub = sub_polyline_by_s(&pts, 50.0, 250.0);
        assert_eq!(sub.first().unwrap().s, 250.0);
        assert_eq!(sub.last().unwrap().s, 50.0);
    }
}
