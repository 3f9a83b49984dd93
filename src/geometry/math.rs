use glam::{DQuat, DVec2, DVec3};

use super::tolerance::{EPS_SMALL, safe_div};

pub fn seg_distance_sq(p: DVec2, a: DVec2, b: DVec2) -> (f64, f64) {
    let v = b - a;
    let w = p - a;
    let vv = v.length_squared();
    let mut t = if vv > 0.0 { w.dot(v) / vv } else { 0.0 };
    if t < 0.0 { t = 0.0; } else if t > 1.0 { t = 1.0; }
    let proj = a + v * t;
    (p.distance_squared(proj), t)
}

pub fn point_seg_distance_sq_3d(p: DVec3, a: DVec3, b: DVec3) -> f64 {
    let v = b - a;
    let vv = v.length_squared();
    let t = if vv > 0.0 { ((p - a).dot(v) / vv).clamp(0.0, 1.0) } else { 0.0 };
    p.distance_squared(a + v * t)
}

/// Cubic Hermite between `p0` and `p1` with zero tangents.
#[inline]
pub fn hermite(p0: f64, p1: f64, a: f64) -> f64 {
    let a2 = a * a;
    let a3 = a2 * a;
    p0 * (2.0 * a3 - 3.0 * a2 + 1.0) + p1 * (3.0 * a2 - 2.0 * a3)
}

#[inline]
pub fn hermite2(p0: DVec2, p1: DVec2, a: f64) -> DVec2 {
    DVec2::new(hermite(p0.x, p1.x, a), hermite(p0.y, p1.y, a))
}

#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 { a + (b - a) * t }

/// Wrap an angle into [0, 2pi).
#[inline]
pub fn unwind_positive(mut a: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    a %= two_pi;
    if a < 0.0 { a += two_pi; }
    if a >= two_pi { a -= two_pi; }
    a
}

/// Signed area, positive for counter-clockwise loops (y up).
pub fn signed_area(poly: &[DVec2]) -> f64 {
    let n = poly.len();
    if n < 3 { return 0.0; }
    let mut s = 0.0;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        s += a.x * b.y - b.x * a.y;
    }
    s * 0.5
}

#[inline]
pub fn is_clockwise(poly: &[DVec2]) -> bool { signed_area(poly) < 0.0 }

#[inline]
pub fn triangle_signed_area(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    0.5 * ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x))
}

#[inline]
pub fn xy(v: DVec3) -> DVec2 { DVec2::new(v.x, v.y) }

/// Rotation whose X axis follows `forward` and Z axis leans towards `up`.
pub fn quat_from_xz(forward: DVec3, up: DVec3) -> DQuat {
    let x = forward.normalize_or_zero();
    let x = if x == DVec3::ZERO { DVec3::X } else { x };
    let mut y = up.cross(x);
    if y.length_squared() < EPS_SMALL {
        let fallback = if x.z.abs() < 0.99 { DVec3::Z } else { DVec3::Y };
        y = fallback.cross(x);
    }
    let y = y.normalize();
    let z = x.cross(y);
    DQuat::from_mat3(&glam::DMat3::from_cols(x, y, z)).normalize()
}

/// Intersect the ray `origin + dir * t` with the plane through `p` with normal `n`.
pub fn ray_plane_intersection(origin: DVec3, dir: DVec3, p: DVec3, n: DVec3) -> DVec3 {
    let denom = dir.dot(n);
    let t = safe_div((p - origin).dot(n), denom, 0.0);
    origin + dir * t
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb2 {
    pub min: DVec2,
    pub max: DVec2,
}

impl Default for Aabb2 {
    fn default() -> Self { Self::empty() }
}

impl Aabb2 {
    pub fn empty() -> Self {
        Self { min: DVec2::splat(f64::MAX), max: DVec2::splat(-f64::MAX) }
    }

    pub fn from_points(pts: impl IntoIterator<Item = DVec2>) -> Self {
        let mut b = Self::empty();
        for p in pts { b.contain(p); }
        b
    }

    #[inline]
    pub fn is_empty(&self) -> bool { self.min.x > self.max.x || self.min.y > self.max.y }

    #[inline]
    pub fn contain(&mut self, p: DVec2) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn contain_box(&mut self, o: &Aabb2) {
        if o.is_empty() { return; }
        self.contain(o.min);
        self.contain(o.max);
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() { 0.0 } else { (self.max.x - self.min.x) * (self.max.y - self.min.y) }
    }

    pub fn extents(&self) -> DVec2 {
        if self.is_empty() { DVec2::ZERO } else { (self.max - self.min) * 0.5 }
    }

    pub fn max_dim(&self) -> f64 {
        if self.is_empty() { 0.0 } else { (self.max.x - self.min.x).max(self.max.y - self.min.y) }
    }

    pub fn distance_squared(&self, p: DVec2) -> f64 {
        let d = (self.min - p).max(DVec2::ZERO).max(p - self.max);
        d.length_squared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hermite_endpoints() {
        assert_relative_eq!(hermite(2.0, 5.0, 0.0), 2.0);
        assert_relative_eq!(hermite(2.0, 5.0, 1.0), 5.0);
        assert_relative_eq!(hermite(2.0, 5.0, 0.5), 3.5);
    }

    #[test]
    fn unwind_range() {
        assert_relative_eq!(unwind_positive(-std::f64::consts::FRAC_PI_2), 1.5 * std::f64::consts::PI);
        assert!(unwind_positive(std::f64::consts::TAU) < 1e-12);
    }

    #[test]
    fn square_orientation() {
        let sq = [DVec2::new(0.0, 0.0), DVec2::new(1.0, 0.0), DVec2::new(1.0, 1.0), DVec2::new(0.0, 1.0)];
        assert_relative_eq!(signed_area(&sq), 1.0);
        assert!(!is_clockwise(&sq));
    }

    #[test]
    fn frame_axes() {
        let q = quat_from_xz(DVec3::X, DVec3::Z);
        assert!((q * DVec3::Y - DVec3::Y).length() < 1e-12);
        assert!((q * DVec3::Z - DVec3::Z).length() < 1e-12);
    }
}
