//! Cubic Hermite spline with a distance reparameterisation table.
//!
//! Input keys run from 0 to the segment count, one unit per segment. Distances are
//! resolved through a table with a fixed number of steps per segment.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::geometry::math::quat_from_xz;
use crate::geometry::tolerance::{EPS_SMALL, REPARAM_STEPS_PER_SEGMENT};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplinePoint {
    pub position: DVec3,
    /// Roll about the forward axis, degrees
    #[serde(default)]
    pub roll: f64,
    /// Tangent per unit input key; auto when `None`
    #[serde(default)]
    pub tangent: Option<DVec3>,
}

impl SplinePoint {
    pub fn new(position: DVec3) -> Self {
        Self { position, roll: 0.0, tangent: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SplineData {
    points: Vec<SplinePoint>,
    #[serde(default)]
    closed_loop: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "SplineData", into = "SplineData")]
pub struct SplineCurve {
    points: Vec<SplinePoint>,
    closed_loop: bool,
    tangents: Vec<DVec3>,
    /// (distance, input key), REPARAM_STEPS_PER_SEGMENT entries per segment plus the end
    reparam: Vec<(f64, f64)>,
}

impl From<SplineData> for SplineCurve {
    fn from(d: SplineData) -> Self {
        Self::new(d.points, d.closed_loop)
    }
}

impl From<SplineCurve> for SplineData {
    fn from(s: SplineCurve) -> Self {
        SplineData { points: s.points, closed_loop: s.closed_loop }
    }
}

// Gauss-Legendre, 5 points on [0, 1]
const GL_NODES: [(f64, f64); 5] = [
    (0.046_910_077_030_668, 0.118_463_442_528_095),
    (0.230_765_344_947_158, 0.239_314_335_249_683),
    (0.5, 0.284_444_444_444_444),
    (0.769_234_655_052_842, 0.239_314_335_249_683),
    (0.953_089_922_969_332, 0.118_463_442_528_095),
];

impl SplineCurve {
    pub fn new(points: Vec<SplinePoint>, closed_loop: bool) -> Self {
        let mut s = Self { points, closed_loop, tangents: Vec::new(), reparam: Vec::new() };
        s.update();
        s
    }

    /// Straight polyline through `positions` with auto tangents.
    pub fn from_positions(positions: &[DVec3], closed_loop: bool) -> Self {
        Self::new(positions.iter().copied().map(SplinePoint::new).collect(), closed_loop)
    }

    pub fn points(&self) -> &[SplinePoint] { &self.points }
    pub fn is_closed_loop(&self) -> bool { self.closed_loop }
    pub fn num_points(&self) -> usize { self.points.len() }

    pub fn num_segments(&self) -> usize {
        let n = self.points.len();
        if self.closed_loop { n } else { n.saturating_sub(1) }
    }

    fn update(&mut self) {
        self.tangents = self.auto_tangents();
        self.reparam.clear();
        let segs = self.num_segments();
        if segs == 0 {
            self.reparam.push((0.0, 0.0));
            return;
        }
        let mut dist = 0.0;
        for seg in 0..segs {
            for step in 0..REPARAM_STEPS_PER_SEGMENT {
                let f = step as f64 / REPARAM_STEPS_PER_SEGMENT as f64;
                if step > 0 {
                    let f0 = (step - 1) as f64 / REPARAM_STEPS_PER_SEGMENT as f64;
                    dist += self.segment_length_between(seg, f0, f);
                } else if seg > 0 {
                    let f0 = (REPARAM_STEPS_PER_SEGMENT - 1) as f64 / REPARAM_STEPS_PER_SEGMENT as f64;
                    dist += self.segment_length_between(seg - 1, f0, 1.0);
                }
                self.reparam.push((dist, seg as f64 + f));
            }
        }
        let f0 = (REPARAM_STEPS_PER_SEGMENT - 1) as f64 / REPARAM_STEPS_PER_SEGMENT as f64;
        dist += self.segment_length_between(segs - 1, f0, 1.0);
        self.reparam.push((dist, segs as f64));
    }

    fn auto_tangents(&self) -> Vec<DVec3> {
        let n = self.points.len();
        (0..n)
            .map(|i| {
                if let Some(t) = self.points[i].tangent {
                    return t;
                }
                if n < 2 {
                    return DVec3::ZERO;
                }
                let p = |k: usize| self.points[k].position;
                if self.closed_loop {
                    (p((i + 1) % n) - p((i + n - 1) % n)) * 0.5
                } else if i == 0 {
                    p(1) - p(0)
                } else if i == n - 1 {
                    p(n - 1) - p(n - 2)
                } else {
                    (p(i + 1) - p(i - 1)) * 0.5
                }
            })
            .collect()
    }

    fn segment(&self, key: f64) -> (usize, f64) {
        let segs = self.num_segments();
        if segs == 0 {
            return (0, 0.0);
        }
        let k = key.clamp(0.0, segs as f64);
        let i = (k.floor() as usize).min(segs - 1);
        (i, k - i as f64)
    }

    fn ends(&self, seg: usize) -> (DVec3, DVec3, DVec3, DVec3) {
        let n = self.points.len();
        let j = (seg + 1) % n;
        (self.points[seg].position, self.tangents[seg], self.points[j].position, self.tangents[j])
    }

    pub fn location_at_key(&self, key: f64) -> DVec3 {
        match self.points.len() {
            0 => DVec3::ZERO,
            1 => self.points[0].position,
            _ => {
                let (seg, t) = self.segment(key);
                let (p0, t0, p1, t1) = self.ends(seg);
                let t2 = t * t;
                let t3 = t2 * t;
                p0 * (2.0 * t3 - 3.0 * t2 + 1.0)
                    + t0 * (t3 - 2.0 * t2 + t)
                    + p1 * (-2.0 * t3 + 3.0 * t2)
                    + t1 * (t3 - t2)
            }
        }
    }

    pub fn derivative_at_key(&self, key: f64) -> DVec3 {
        if self.points.len() < 2 {
            return DVec3::X;
        }
        let (seg, t) = self.segment(key);
        let (p0, t0, p1, t1) = self.ends(seg);
        let t2 = t * t;
        p0 * (6.0 * t2 - 6.0 * t)
            + t0 * (3.0 * t2 - 4.0 * t + 1.0)
            + p1 * (-6.0 * t2 + 6.0 * t)
            + t1 * (3.0 * t2 - 2.0 * t)
    }

    fn second_derivative_at_key(&self, key: f64) -> DVec3 {
        if self.points.len() < 2 {
            return DVec3::ZERO;
        }
        let (seg, t) = self.segment(key);
        let (p0, t0, p1, t1) = self.ends(seg);
        p0 * (12.0 * t - 6.0) + t0 * (6.0 * t - 4.0) + p1 * (-12.0 * t + 6.0) + t1 * (6.0 * t - 2.0)
    }

    fn roll_at_key(&self, key: f64) -> f64 {
        let n = self.points.len();
        if n < 2 {
            return self.points.first().map_or(0.0, |p| p.roll);
        }
        let (seg, t) = self.segment(key);
        let a = self.points[seg].roll;
        let b = self.points[(seg + 1) % n].roll;
        a + (b - a) * t
    }

    /// Frame at `key`: X forward, Y right, Z up. Right is `up x forward` before roll.
    pub fn quat_at_key(&self, key: f64) -> DQuat {
        let forward = self.derivative_at_key(key);
        let base = quat_from_xz(forward, DVec3::Z);
        base * DQuat::from_rotation_x(self.roll_at_key(key).to_radians())
    }

    pub fn right_at_key(&self, key: f64) -> DVec3 {
        self.quat_at_key(key) * DVec3::Y
    }

    pub fn up_at_key(&self, key: f64) -> DVec3 {
        self.quat_at_key(key) * DVec3::Z
    }

    fn segment_length_between(&self, seg: usize, f0: f64, f1: f64) -> f64 {
        let span = f1 - f0;
        if span <= 0.0 {
            return 0.0;
        }
        GL_NODES
            .iter()
            .map(|&(x, w)| w * self.derivative_at_key(seg as f64 + f0 + span * x).length())
            .sum::<f64>()
            * span
    }

    pub fn length(&self) -> f64 {
        self.reparam.last().map_or(0.0, |r| r.0)
    }

    /// Distance along the spline at spline point `index`.
    pub fn distance_at_point(&self, index: usize) -> f64 {
        let i = index * REPARAM_STEPS_PER_SEGMENT;
        if index > self.num_segments() {
            return 0.0;
        }
        self.reparam.get(i).map_or_else(|| self.length(), |r| r.0)
    }

    pub fn distance_at_key(&self, key: f64) -> f64 {
        let segs = self.num_segments();
        if key <= 0.0 || segs == 0 {
            return 0.0;
        }
        if key >= segs as f64 {
            return self.length();
        }
        let (seg, f) = self.segment(key);
        self.distance_at_point(seg) + self.segment_length_between(seg, 0.0, f)
    }

    pub fn key_at_distance(&self, distance: f64) -> f64 {
        let table = &self.reparam;
        if table.len() < 2 {
            return 0.0;
        }
        if distance <= table[0].0 {
            return table[0].1;
        }
        let last = table[table.len() - 1];
        if distance >= last.0 {
            return last.1;
        }
        let hi = table.partition_point(|&(d, _)| d <= distance).min(table.len() - 1);
        let (d0, k0) = table[hi - 1];
        let (d1, k1) = table[hi];
        if d1 - d0 < EPS_SMALL {
            return k0;
        }
        k0 + (k1 - k0) * (distance - d0) / (d1 - d0)
    }

    pub fn location_at_distance(&self, distance: f64) -> DVec3 {
        self.location_at_key(self.key_at_distance(distance))
    }

    /// Input key of the spline point nearest to `p`: coarse sampling, then Newton steps.
    pub fn find_nearest_key(&self, p: DVec3) -> f64 {
        let segs = self.num_segments();
        if segs == 0 {
            return 0.0;
        }
        const COARSE: usize = 16;
        let mut best = (f64::MAX, 0.0);
        for seg in 0..segs {
            for i in 0..=COARSE {
                let key = seg as f64 + i as f64 / COARSE as f64;
                let d = self.location_at_key(key).distance_squared(p);
                if d < best.0 {
                    best = (d, key);
                }
            }
        }

        let (lo, hi) = (0.0, segs as f64);
        let mut key = best.1;
        for _ in 0..8 {
            let diff = self.location_at_key(key) - p;
            let d1 = self.derivative_at_key(key);
            let d2 = self.second_derivative_at_key(key);
            let num = diff.dot(d1);
            let den = d1.dot(d1) + diff.dot(d2);
            if den.abs() < EPS_SMALL {
                break;
            }
            let next = (key - num / den).clamp(lo, hi);
            if (next - key).abs() < 1e-9 {
                key = next;
                break;
            }
            key = next;
        }
        if self.location_at_key(key).distance_squared(p) <= best.0 { key } else { best.1 }
    }

    /// Copy with all heights and tangent Z components set to zero.
    pub fn flattened(&self) -> Self {
        let points = self
            .points
            .iter()
            .zip(&self.tangents)
            .map(|(pt, t)| SplinePoint {
                position: DVec3::new(pt.position.x, pt.position.y, 0.0),
                roll: pt.roll,
                tangent: Some(DVec3::new(t.x, t.y, 0.0)),
            })
            .collect();
        Self::new(points, self.closed_loop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn straight() -> SplineCurve {
        SplineCurve::from_positions(&[DVec3::ZERO, DVec3::new(1000.0, 0.0, 0.0)], false)
    }

    #[test]
    fn straight_length_and_reparam() {
        let s = straight();
        assert_relative_eq!(s.length(), 1000.0, epsilon = 1e-6);
        let k = s.key_at_distance(250.0);
        assert_relative_eq!(s.location_at_key(k).x, 250.0, epsilon = 1e-6);
        assert_relative_eq!(s.distance_at_key(0.5), 500.0, epsilon = 1e-6);
    }

    #[test]
    fn frame_right_is_up_cross_forward() {
        let s = straight();
        let q = s.quat_at_key(0.3);
        assert_relative_eq!((q * DVec3::X).x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(s.right_at_key(0.3).y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(s.up_at_key(0.3).z, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn nearest_key_on_curve() {
        let s = SplineCurve::from_positions(
            &[DVec3::ZERO, DVec3::new(500.0, 200.0, 0.0), DVec3::new(1000.0, 0.0, 0.0)],
            false,
        );
        let target = s.location_at_key(1.37);
        let k = s.find_nearest_key(target + DVec3::new(0.0, 0.0, 50.0));
        assert_relative_eq!(k, 1.37, epsilon = 1e-4);
    }

    #[test]
    fn closed_loop_has_extra_segment() {
        let sq = [
            DVec3::ZERO,
            DVec3::new(100.0, 0.0, 0.0),
            DVec3::new(100.0, 100.0, 0.0),
            DVec3::new(0.0, 100.0, 0.0),
        ];
        let s = SplineCurve::from_positions(&sq, true);
        assert_eq!(s.num_segments(), 4);
        assert_relative_eq!(s.location_at_key(4.0).x, 0.0, epsilon = 1e-9);
        assert!(s.length() > 400.0);
    }

    #[test]
    fn serde_rebuilds_table() {
        let s = straight();
        let json = serde_json::to_string(&s).unwrap();
        let back: SplineCurve = serde_json::from_str(&json).unwrap();
        assert_relative_eq!(back.length(), s.length());
    }
}
