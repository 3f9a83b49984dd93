//! Bounding-volume tree over 2D triangles for nearest-triangle queries.
//!
//! Built top-down by splitting on the longest axis at the median centroid.

use glam::DVec2;

use crate::geometry::math::{seg_distance_sq, triangle_signed_area, Aabb2};

#[derive(Debug, Clone)]
enum Node {
    Leaf { bounds: Aabb2, tid: usize },
    Internal { bounds: Aabb2, left: Box<Node>, right: Box<Node> },
}

impl Node {
    fn bounds(&self) -> &Aabb2 {
        match self {
            Node::Leaf { bounds, .. } | Node::Internal { bounds, .. } => bounds,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriangleTree2 {
    root: Option<Node>,
    corners: Vec<[DVec2; 3]>,
}

/// Squared distance from `p` to a filled triangle (0 inside).
pub fn point_triangle_distance_sq(p: DVec2, t: &[DVec2; 3]) -> f64 {
    let s0 = triangle_signed_area(t[0], t[1], p);
    let s1 = triangle_signed_area(t[1], t[2], p);
    let s2 = triangle_signed_area(t[2], t[0], p);
    let has_neg = s0 < 0.0 || s1 < 0.0 || s2 < 0.0;
    let has_pos = s0 > 0.0 || s1 > 0.0 || s2 > 0.0;
    if !(has_neg && has_pos) {
        return 0.0;
    }
    seg_distance_sq(p, t[0], t[1]).0
        .min(seg_distance_sq(p, t[1], t[2]).0)
        .min(seg_distance_sq(p, t[2], t[0]).0)
}

impl TriangleTree2 {
    pub fn build(vertices: &[DVec2], triangles: &[[usize; 3]]) -> Self {
        let corners: Vec<[DVec2; 3]> = triangles
            .iter()
            .map(|t| [vertices[t[0]], vertices[t[1]], vertices[t[2]]])
            .collect();
        let prims: Vec<(Aabb2, usize)> = corners
            .iter()
            .enumerate()
            .map(|(i, c)| (Aabb2::from_points(c.iter().copied()), i))
            .collect();
        let root = if prims.is_empty() { None } else { Some(Self::build_recursive(prims)) };
        Self { root, corners }
    }

    fn build_recursive(mut prims: Vec<(Aabb2, usize)>) -> Node {
        if prims.len() == 1 {
            let (bounds, tid) = prims[0];
            return Node::Leaf { bounds, tid };
        }
        let mut bounds = Aabb2::empty();
        for (b, _) in &prims {
            bounds.contain_box(b);
        }
        let size = bounds.max - bounds.min;
        let center = |b: &Aabb2| if size.x >= size.y { (b.min.x + b.max.x) * 0.5 } else { (b.min.y + b.max.y) * 0.5 };
        prims.sort_by(|(a, _), (b, _)| center(a).total_cmp(&center(b)));
        let right = prims.split_off(prims.len() / 2);
        Node::Internal {
            bounds,
            left: Box::new(Self::build_recursive(prims)),
            right: Box::new(Self::build_recursive(right)),
        }
    }

    pub fn len(&self) -> usize { self.corners.len() }
    pub fn is_empty(&self) -> bool { self.corners.is_empty() }

    /// Nearest triangle to `p` and its squared distance (0 when `p` is inside).
    pub fn find_nearest(&self, p: DVec2) -> Option<(usize, f64)> {
        let root = self.root.as_ref()?;
        let mut best: Option<(usize, f64)> = None;
        self.nearest_recursive(root, p, &mut best);
        best
    }

    fn nearest_recursive(&self, node: &Node, p: DVec2, best: &mut Option<(usize, f64)>) {
        let bound = best.map_or(f64::MAX, |b| b.1);
        if node.bounds().distance_squared(p) > bound {
            return;
        }
        match node {
            Node::Leaf { tid, .. } => {
                let d = point_triangle_distance_sq(p, &self.corners[*tid]);
                if best.map_or(true, |b| d < b.1) {
                    *best = Some((*tid, d));
                }
            }
            Node::Internal { left, right, .. } => {
                let dl = left.bounds().distance_squared(p);
                let dr = right.bounds().distance_squared(p);
                let (first, second) = if dl <= dr { (left, right) } else { (right, left) };
                self.nearest_recursive(first, p, best);
                self.nearest_recursive(second, p, best);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_mesh(n: usize) -> (Vec<DVec2>, Vec<[usize; 3]>) {
        let mut v = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                v.push(DVec2::new(x as f64, y as f64));
            }
        }
        let mut t = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * (n + 1) + x;
                t.push([i, i + 1, i + n + 2]);
                t.push([i, i + n + 2, i + n + 1]);
            }
        }
        (v, t)
    }

    #[test]
    fn finds_containing_triangle() {
        let (v, t) = grid_mesh(8);
        let tree = TriangleTree2::build(&v, &t);
        let p = DVec2::new(3.7, 2.2);
        let (tid, d) = tree.find_nearest(p).unwrap();
        assert_eq!(d, 0.0);
        assert_eq!(point_triangle_distance_sq(p, &[v[t[tid][0]], v[t[tid][1]], v[t[tid][2]]]), 0.0);
    }

    #[test]
    fn outside_point_distance() {
        let (v, t) = grid_mesh(4);
        let tree = TriangleTree2::build(&v, &t);
        let (_, d) = tree.find_nearest(DVec2::new(-2.0, 1.5)).unwrap();
        assert!((d - 4.0).abs() < 1e-12);
        assert!(TriangleTree2::build(&v, &[]).find_nearest(DVec2::ZERO).is_none());
    }
}
