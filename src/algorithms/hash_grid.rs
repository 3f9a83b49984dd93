//! Uniform hash grid over 2D points.
//!
//! Values are bucketed by integer cell coordinates; the cell size is fixed at
//! construction. Queries take a caller-supplied squared-distance function so the grid
//! can index anything that has a position (vertex ids, triangle ids, ...).
//! Mutation needs `&mut self`; concurrent read-only queries are fine.

use std::collections::HashMap;

use glam::DVec2;

use crate::geometry::tolerance::EPS_SMALL;

#[derive(Debug, Clone)]
pub struct PointHashGrid2<T> {
    cell: f64,
    buckets: HashMap<(i64, i64), Vec<T>>,
    len: usize,
}

impl<T: Copy + PartialEq> PointHashGrid2<T> {
    pub fn new(cell_size: f64) -> Self {
        Self { cell: cell_size.max(EPS_SMALL), buckets: HashMap::new(), len: 0 }
    }

    pub fn cell_size(&self) -> f64 { self.cell }
    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }

    #[inline]
    fn to_cell(&self, p: DVec2) -> (i64, i64) {
        ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64)
    }

    pub fn insert(&mut self, value: T, position: DVec2) {
        let key = self.to_cell(position);
        self.buckets.entry(key).or_default().push(value);
        self.len += 1;
    }

    /// Remove one occurrence of `value` from the cell of `position`.
    pub fn remove(&mut self, value: T, position: DVec2) -> bool {
        let key = self.to_cell(position);
        let Some(bucket) = self.buckets.get_mut(&key) else { return false };
        let Some(i) = bucket.iter().position(|v| *v == value) else { return false };
        bucket.swap_remove(i);
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        self.len -= 1;
        true
    }

    pub fn update(&mut self, value: T, old: DVec2, new: DVec2) {
        if self.to_cell(old) == self.to_cell(new) {
            return;
        }
        let removed = self.remove(value, old);
        debug_assert!(removed, "value was not at its old position");
        self.insert(value, new);
    }

    fn for_each_in_box(&self, p: DVec2, radius: f64, mut f: impl FnMut(T)) {
        let (x0, y0) = self.to_cell(p - DVec2::splat(radius));
        let (x1, y1) = self.to_cell(p + DVec2::splat(radius));
        for yi in y0..=y1 {
            for xi in x0..=x1 {
                if let Some(bucket) = self.buckets.get(&(xi, yi)) {
                    for &v in bucket {
                        f(v);
                    }
                }
            }
        }
    }

    /// Nearest value strictly within `radius`, with its squared distance.
    /// An empty grid or no candidate in range yields `None`.
    pub fn find_nearest_in_radius(
        &self,
        p: DVec2,
        radius: f64,
        dist_sq: impl Fn(T) -> f64,
        ignore: impl Fn(T) -> bool,
    ) -> Option<(T, f64)> {
        if self.len == 0 {
            return None;
        }
        let r2 = radius * radius;
        let mut best: Option<(T, f64)> = None;
        self.for_each_in_box(p, radius, |v| {
            if ignore(v) {
                return;
            }
            let d = dist_sq(v);
            if d < r2 && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((v, d));
            }
        });
        best
    }

    /// Every value strictly within `radius`, unordered.
    pub fn find_all_in_radius(
        &self,
        p: DVec2,
        radius: f64,
        dist_sq: impl Fn(T) -> f64,
        ignore: impl Fn(T) -> bool,
    ) -> Vec<(T, f64)> {
        let mut out = Vec::new();
        if self.len == 0 {
            return out;
        }
        let r2 = radius * radius;
        self.for_each_in_box(p, radius, |v| {
            if ignore(v) {
                return;
            }
            let d = dist_sq(v);
            if d < r2 {
                out.push((v, d));
            }
        });
        out
    }
}
