//! End-to-end merging of 3D polylines (marks, curbs, spline-mesh paths).
//!
//! A polyline joins another when their touching ends are within tolerance and their
//! directions agree at the joint. The payload `meta` has to compare equal too, which
//! keeps e.g. different mark profiles apart.

use glam::DVec3;

/// A polyline vertex with a world location and an up direction.
pub trait Located {
    fn location(&self) -> DVec3;
    fn up(&self) -> DVec3;

    /// Called on every vertex when its polyline is reversed.
    fn flip(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMode {
    /// self.last joins other.first
    Normal,
    /// self.last joins other.last
    OtherReverse,
    /// self.first joins other.first
    SelfReverse,
    /// self.first joins other.last
    BothReverse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergePolyline<P, M> {
    pub vertices: Vec<P>,
    pub meta: M,
}

impl<P: Located, M: PartialEq> MergePolyline<P, M> {
    pub fn new(vertices: Vec<P>, meta: M) -> Self {
        Self { vertices, meta }
    }

    fn dir(&self, from: usize, to: usize) -> DVec3 {
        (self.vertices[to].location() - self.vertices[from].location()).normalize_or_zero()
    }

    pub fn can_append(&self, other: &Self, mode: AppendMode, tol: f64) -> bool {
        let (n, m) = (self.vertices.len(), other.vertices.len());
        if n < 2 || m < 2 || self.meta != other.meta {
            return false;
        }
        let (mine, theirs, dir_a, dir_b) = match mode {
            AppendMode::Normal => (n - 1, 0, self.dir(n - 2, n - 1), other.dir(0, 1)),
            AppendMode::OtherReverse => (n - 1, m - 1, self.dir(n - 2, n - 1), other.dir(m - 1, m - 2)),
            AppendMode::SelfReverse => (0, 0, self.dir(1, 0), other.dir(0, 1)),
            AppendMode::BothReverse => (0, m - 1, self.dir(1, 0), other.dir(m - 1, m - 2)),
        };
        let d = self.vertices[mine].location().distance(other.vertices[theirs].location());
        d <= tol && dir_a.dot(dir_b) > 0.0
    }

    /// Drop the joint vertex and extend with `other`.
    pub fn append(&mut self, other: Vec<P>) {
        self.vertices.pop();
        self.vertices.extend(other);
    }

    pub fn reverse(&mut self) {
        self.vertices.reverse();
        self.vertices.iter_mut().for_each(P::flip);
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolylineArrangement<P, M> {
    pub polylines: Vec<MergePolyline<P, M>>,
}

impl<P: Located, M: PartialEq> PolylineArrangement<P, M> {
    pub fn new() -> Self {
        Self { polylines: Vec::new() }
    }

    /// Add a polyline, joining it to an existing one when possible. A join can close
    /// the gap between two existing polylines, in which case they fuse as well.
    pub fn insert(&mut self, poly: MergePolyline<P, M>, tol: f64) {
        if self.polylines.is_empty() {
            self.polylines.push(poly);
            return;
        }
        match self.try_append(poly, tol) {
            Ok(idx) => {
                let joined = self.polylines.remove(idx);
                match self.try_append(joined, tol) {
                    Ok(_) => {}
                    Err(joined) => self.polylines.insert(idx, joined),
                }
            }
            Err(poly) => self.polylines.push(poly),
        }
    }

    fn try_append(&mut self, mut poly: MergePolyline<P, M>, tol: f64) -> Result<usize, MergePolyline<P, M>> {
        for i in 0..self.polylines.len() {
            let it = &mut self.polylines[i];
            if it.can_append(&poly, AppendMode::Normal, tol) {
                it.append(poly.vertices);
                return Ok(i);
            }
            if it.can_append(&poly, AppendMode::OtherReverse, tol) {
                poly.reverse();
                it.append(poly.vertices);
                return Ok(i);
            }
            if poly.can_append(it, AppendMode::Normal, tol) {
                poly.append(std::mem::take(&mut it.vertices));
                it.vertices = poly.vertices;
                return Ok(i);
            }
            if poly.can_append(it, AppendMode::SelfReverse, tol) {
                poly.reverse();
                poly.append(std::mem::take(&mut it.vertices));
                it.vertices = poly.vertices;
                return Ok(i);
            }
        }
        Err(poly)
    }
}

/// Local frame at vertex `i` of a polyline: (forward, right, up, sin_a).
///
/// `up` comes from the vertex, `right = up x forward`. At interior vertices forward
/// and right are averaged over both segments and `sin_a` is the sine of half the
/// turn angle, used to keep offset ribbons at constant width.
pub fn three_vectors<P: Located>(vertices: &[P], i: usize) -> (DVec3, DVec3, DVec3, f64) {
    let up = vertices[i].up();
    let n = vertices.len();
    if n < 2 {
        return (DVec3::X, up.cross(DVec3::X).normalize_or_zero(), up, 1.0);
    }
    if i == 0 || i == n - 1 {
        let f = if i == 0 {
            vertices[1].location() - vertices[0].location()
        } else {
            vertices[n - 1].location() - vertices[n - 2].location()
        }
        .normalize_or_zero();
        return (f, up.cross(f).normalize_or_zero(), up, 1.0);
    }
    let f0 = (vertices[i].location() - vertices[i - 1].location()).normalize_or_zero();
    let f1 = (vertices[i + 1].location() - vertices[i].location()).normalize_or_zero();
    let angle = (-f0).dot(f1).clamp(-1.0, 1.0).acos();
    let sin_a = (angle * 0.5).sin();
    let forward = (f0 + f1).normalize_or_zero();
    let r0 = up.cross(f0).normalize_or_zero();
    let r1 = up.cross(f1).normalize_or_zero();
    (forward, (r0 + r1).normalize_or_zero(), up, sin_a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct P(DVec3);
    impl Located for P {
        fn location(&self) -> DVec3 { self.0 }
        fn up(&self) -> DVec3 { DVec3::Z }
    }

    fn line(pts: &[(f64, f64)], meta: &'static str) -> MergePolyline<P, &'static str> {
        MergePolyline::new(pts.iter().map(|&(x, y)| P(DVec3::new(x, y, 0.0))).collect(), meta)
    }

    #[test]
    fn joins_head_to_tail() {
        let mut arr = PolylineArrangement::new();
        arr.insert(line(&[(0.0, 0.0), (1.0, 0.0)], "a"), 0.1);
        arr.insert(line(&[(1.0, 0.0), (2.0, 0.0)], "a"), 0.1);
        assert_eq!(arr.polylines.len(), 1);
        assert_eq!(arr.polylines[0].vertices.len(), 3);
    }

    #[test]
    fn joins_reversed_and_fuses_gap() {
        let mut arr = PolylineArrangement::new();
        arr.insert(line(&[(0.0, 0.0), (1.0, 0.0)], "a"), 0.1);
        arr.insert(line(&[(3.0, 0.0), (2.0, 0.0)], "a"), 0.1);
        assert_eq!(arr.polylines.len(), 2);
        arr.insert(line(&[(1.0, 0.0), (2.0, 0.0)], "a"), 0.1);
        assert_eq!(arr.polylines.len(), 1);
        let xs: Vec<f64> = arr.polylines[0].vertices.iter().map(|p| p.0.x).collect();
        assert_eq!(xs, vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn meta_and_direction_block_join() {
        let mut arr = PolylineArrangement::new();
        arr.insert(line(&[(0.0, 0.0), (1.0, 0.0)], "a"), 0.1);
        arr.insert(line(&[(1.0, 0.0), (2.0, 0.0)], "b"), 0.1);
        // folds back on itself
        arr.insert(line(&[(1.0, 0.0), (0.5, 0.0)], "a"), 0.1);
        assert_eq!(arr.polylines.len(), 3);
    }

    #[test]
    fn miter_factor_at_right_angle() {
        let v = [P(DVec3::ZERO), P(DVec3::X), P(DVec3::new(1.0, 1.0, 0.0))];
        let (_, right, _, sin_a) = three_vectors(&v, 1);
        assert!((sin_a - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert!((right.length() - 1.0).abs() < 1e-12);
    }
}
