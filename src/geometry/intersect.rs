// Segment-segment intersection in center/extent form.
// Parameters are signed distances from the segment center, in [-extent, extent].

use glam::DVec2;

use super::tolerance::EPS_SMALL;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment2 {
    pub center: DVec2,
    pub direction: DVec2,
    pub extent: f64,
}

impl Segment2 {
    pub fn new(a: DVec2, b: DVec2) -> Self {
        let center = (a + b) * 0.5;
        let d = b - a;
        let len = d.length();
        let direction = if len > EPS_SMALL { d / len } else { DVec2::ZERO };
        Self { center, direction, extent: len * 0.5 }
    }

    #[inline] pub fn start(&self) -> DVec2 { self.center - self.direction * self.extent }
    #[inline] pub fn end(&self) -> DVec2 { self.center + self.direction * self.extent }
    #[inline] pub fn point_at(&self, t: f64) -> DVec2 { self.center + self.direction * t }
    #[inline] pub fn project(&self, p: DVec2) -> f64 { (p - self.center).dot(self.direction) }

    /// Squared distance from `p` to the segment and the clamped parameter of the closest point.
    pub fn distance_squared(&self, p: DVec2) -> (f64, f64) {
        let t = self.project(p);
        if t >= self.extent {
            (p.distance_squared(self.end()), self.extent)
        } else if t <= -self.extent {
            (p.distance_squared(self.start()), -self.extent)
        } else {
            (p.distance_squared(self.point_at(t)), t)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegIntersection {
    None,
    // Single crossing/touch; t is the parameter on the first segment
    Point { t: f64, point: DVec2 },
    // Collinear overlap; [t0, t1] on the first segment
    Segment { t0: f64, t1: f64, p0: DVec2, p1: DVec2 },
}

#[inline]
pub fn dot_perp(a: DVec2, b: DVec2) -> f64 { a.x * b.y - a.y * b.x }

#[inline]
pub fn perp_cw(v: DVec2) -> DVec2 { DVec2::new(v.y, -v.x) }

#[inline]
pub fn orient(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

#[inline]
fn within_eps(x: f64, eps: f64) -> bool { x.abs() <= eps }

// Intersect [u0,u1] with [v0,v1]; returns 0, 1 or 2 parameters.
fn interval_overlap(u0: f64, u1: f64, v0: f64, v1: f64) -> (usize, f64, f64) {
    if u1 < v0 || u0 > v1 {
        (0, 0.0, 0.0)
    } else if u1 > v0 {
        if u0 < v1 {
            let lo = u0.max(v0);
            let hi = u1.min(v1);
            if lo < hi { (2, lo, hi) } else { (1, lo, lo) }
        } else {
            (1, u0, u0)
        }
    } else {
        (1, u1, u1)
    }
}

/// Intersect `s0` with `s1`.
///
/// `interval_tol` widens both parameter ranges for the crossing test; `dot_tol` treats
/// nearly parallel directions as parallel so near-overlaps resolve as collinear spans.
pub fn intersect_segments(s0: &Segment2, s1: &Segment2, interval_tol: f64, dot_tol: f64) -> SegIntersection {
    let diff = s1.center - s0.center;
    let d0_perp_d1 = dot_perp(s0.direction, s1.direction);

    if !within_eps(d0_perp_d1, dot_tol) {
        let inv = 1.0 / d0_perp_d1;
        let t0 = dot_perp(diff, s1.direction) * inv;
        let t1 = dot_perp(diff, s0.direction) * inv;
        if t0.abs() <= s0.extent + interval_tol && t1.abs() <= s1.extent + interval_tol {
            return SegIntersection::Point { t: t0, point: s0.point_at(t0) };
        }
        return SegIntersection::None;
    }

    // Parallel: collinear only if the center offset is also parallel
    let diff_len = diff.length();
    if diff_len > EPS_SMALL {
        let n = diff / diff_len;
        if !within_eps(dot_perp(n, s1.direction), dot_tol) {
            return SegIntersection::None;
        }
    }

    let c = s0.direction.dot(diff);
    let (count, a, b) = interval_overlap(-s0.extent, s0.extent, c - s1.extent, c + s1.extent);
    match count {
        2 => SegIntersection::Segment { t0: a, t1: b, p0: s0.point_at(a), p1: s0.point_at(b) },
        1 => SegIntersection::Point { t: a, point: s0.point_at(a) },
        _ => SegIntersection::None,
    }
}

/// Proper crossing test used by polyline cleanup: interiors cross, endpoints excluded.
pub fn segments_cross(a: DVec2, b: DVec2, c: DVec2, d: DVec2) -> Option<DVec2> {
    let o1 = orient(a, b, c);
    let o2 = orient(a, b, d);
    let o3 = orient(c, d, a);
    let o4 = orient(c, d, b);
    if (o1 > 0.0 && o2 < 0.0 || o1 < 0.0 && o2 > 0.0) && (o3 > 0.0 && o4 < 0.0 || o3 < 0.0 && o4 > 0.0) {
        let r = b - a;
        let s = d - c;
        let rxs = dot_perp(r, s);
        if within_eps(rxs, EPS_SMALL) {
            return None;
        }
        let t = dot_perp(c - a, s) / rxs;
        return Some(a + r * t);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const EI: f64 = 1e-5;
    const ED: f64 = 1e-4;

    fn seg(ax: f64, ay: f64, bx: f64, by: f64) -> Segment2 {
        Segment2::new(DVec2::new(ax, ay), DVec2::new(bx, by))
    }

    #[test]
    fn proper_cross() {
        let r = intersect_segments(&seg(0.0, 0.0, 2.0, 2.0), &seg(0.0, 2.0, 2.0, 0.0), EI, ED);
        match r {
            SegIntersection::Point { t, point } => {
                assert!(t.abs() < 1e-9);
                assert!((point - DVec2::ONE).length() < 1e-9);
            }
            _ => panic!("expected point"),
        }
    }

    #[test]
    fn endpoint_touch() {
        let r = intersect_segments(&seg(0.0, 0.0, 1.0, 0.0), &seg(1.0, 0.0, 1.0, 1.0), EI, ED);
        match r {
            SegIntersection::Point { t, point } => {
                assert!((t - 0.5).abs() < 1e-9);
                assert!((point.x - 1.0).abs() < 1e-9);
            }
            _ => panic!("expected touch"),
        }
    }

    #[test]
    fn collinear_overlap() {
        let r = intersect_segments(&seg(0.0, 0.0, 3.0, 0.0), &seg(1.0, 0.0, 2.0, 0.0), EI, ED);
        match r {
            SegIntersection::Segment { t0, t1, .. } => {
                assert!((t0 + 0.5).abs() < 1e-9);
                assert!((t1 - 0.5).abs() < 1e-9);
            }
            _ => panic!("expected overlap"),
        }
    }

    #[test]
    fn parallel_apart() {
        let r = intersect_segments(&seg(0.0, 0.0, 3.0, 0.0), &seg(0.0, 1.0, 3.0, 1.0), EI, ED);
        assert_eq!(r, SegIntersection::None);
    }

    #[test]
    fn cross_excludes_shared_endpoint() {
        let a = DVec2::new(0.0, 0.0);
        assert!(segments_cross(a, DVec2::new(1.0, 0.0), a, DVec2::new(0.0, 1.0)).is_none());
        let p = segments_cross(
            DVec2::new(0.0, -1.0),
            DVec2::new(0.0, 1.0),
            DVec2::new(-1.0, 0.0),
            DVec2::new(1.0, 0.0),
        );
        assert!(p.map(|p| p.length() < 1e-12).unwrap_or(false));
    }
}
