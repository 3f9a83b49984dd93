//! Cotangent-weighted implicit smoothing of vertex heights.
//!
//! Only Z moves. Each step solves `(I + t L) z = z0` for the interior vertices with a
//! few Gauss-Seidel sweeps, where `L` is the normalized cotangent Laplacian. Vertices
//! on an open mesh border stay fixed.

use std::collections::HashMap;

use glam::DVec3;
use rayon::prelude::*;

use crate::geometry::tolerance::EPS_SMALL;

const GAUSS_SEIDEL_SWEEPS: usize = 32;
const MAX_COTAN: f64 = 1e4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothOptions {
    /// Per-step blend, 0..1
    pub alpha: f64,
    /// Number of implicit steps is `ceil(power)`, the last one fractional
    pub power: f64,
}

impl SmoothOptions {
    /// Power grows with mesh size so large networks get a comparable visual result.
    pub fn scaled(speed: f64, smoothness: f64, vertex_count: usize) -> Self {
        let power = (smoothness * smoothness / 50.0) * vertex_count as f64;
        Self { alpha: speed, power }
    }
}

fn cot(a: DVec3, b: DVec3, c: DVec3) -> f64 {
    // cotangent of the angle at `a`
    let u = b - a;
    let v = c - a;
    let cross = u.cross(v).length();
    if cross < EPS_SMALL {
        return 0.0;
    }
    (u.dot(v) / cross).clamp(-MAX_COTAN, MAX_COTAN)
}

/// Per-vertex neighbour weights and the open-border flag.
fn cotan_weights(positions: &[DVec3], triangles: &[[usize; 3]]) -> (Vec<Vec<(usize, f64)>>, Vec<bool>) {
    let mut edge_w: HashMap<(usize, usize), (f64, u32)> = HashMap::new();
    for t in triangles {
        for k in 0..3 {
            let (i, j, o) = (t[k], t[(k + 1) % 3], t[(k + 2) % 3]);
            let w = 0.5 * cot(positions[o], positions[i], positions[j]);
            let key = (i.min(j), i.max(j));
            let e = edge_w.entry(key).or_insert((0.0, 0));
            e.0 += w;
            e.1 += 1;
        }
    }

    let mut border = vec![false; positions.len()];
    let mut nbrs: Vec<Vec<(usize, f64)>> = vec![Vec::new(); positions.len()];
    for (&(i, j), &(w, count)) in &edge_w {
        if count < 2 {
            border[i] = true;
            border[j] = true;
        }
        let w = w.max(0.0);
        nbrs[i].push((j, w));
        nbrs[j].push((i, w));
    }

    // Normalize; vertices with degenerate fans fall back to uniform weights
    nbrs.par_iter_mut().for_each(|list| {
        list.sort_unstable_by_key(|&(v, _)| v);
        let sum: f64 = list.iter().map(|&(_, w)| w).sum();
        if sum > EPS_SMALL {
            list.iter_mut().for_each(|(_, w)| *w /= sum);
        } else if !list.is_empty() {
            let u = 1.0 / list.len() as f64;
            list.iter_mut().for_each(|(_, w)| *w = u);
        }
    });
    (nbrs, border)
}

/// Smooth the Z coordinate of `positions` in place. `fixed` marks extra vertices that
/// must keep their height. Returns the number of vertices that were free to move.
pub fn smooth_heights(
    positions: &mut [DVec3],
    triangles: &[[usize; 3]],
    fixed: &[bool],
    opts: SmoothOptions,
) -> usize {
    if positions.is_empty() || triangles.is_empty() || opts.alpha <= 0.0 || opts.power <= 0.0 {
        return 0;
    }
    let (nbrs, border) = cotan_weights(positions, triangles);
    let free: Vec<usize> = (0..positions.len())
        .filter(|&v| !border[v] && !fixed.get(v).copied().unwrap_or(false) && !nbrs[v].is_empty())
        .collect();

    let mut remaining = opts.power;
    while remaining > 0.0 {
        let t = opts.alpha * remaining.min(1.0);
        remaining -= 1.0;
        let z0: Vec<f64> = positions.iter().map(|p| p.z).collect();
        for _ in 0..GAUSS_SEIDEL_SWEEPS {
            for &v in &free {
                let avg: f64 = nbrs[v].iter().map(|&(j, w)| w * positions[j].z).sum();
                positions[v].z = (z0[v] + t * avg) / (1.0 + t);
            }
        }
    }
    log::debug!("smoothing: {} free vertices, power {:.3}", free.len(), opts.power);
    free.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, bump: f64) -> (Vec<DVec3>, Vec<[usize; 3]>) {
        let mut v = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                let z = if x == n / 2 && y == n / 2 { bump } else { 0.0 };
                v.push(DVec3::new(x as f64, y as f64, z));
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
    fn bump_flattens_and_border_stays() {
        let (mut v, t) = grid(6, 10.0);
        let center = 3 * 7 + 3;
        let moved = smooth_heights(&mut v, &t, &[], SmoothOptions { alpha: 0.5, power: 4.0 });
        assert!(moved > 0);
        assert!(v[center].z < 10.0);
        assert!(v[center].z > 0.0);
        assert_eq!(v[0].z, 0.0);
        assert_eq!(v[6].z, 0.0);
        for p in &v {
            assert!(p.z <= 10.0 && p.z >= 0.0);
        }
    }

    #[test]
    fn fixed_vertices_hold() {
        let (mut v, t) = grid(6, 10.0);
        let center = 3 * 7 + 3;
        let mut fixed = vec![false; v.len()];
        fixed[center] = true;
        smooth_heights(&mut v, &t, &fixed, SmoothOptions { alpha: 0.5, power: 2.0 });
        assert_eq!(v[center].z, 10.0);
        // neighbours get pulled up
        assert!(v[center + 1].z > 0.0);
    }

    #[test]
    fn scaled_power() {
        let o = SmoothOptions::scaled(0.1, 0.5, 1000);
        assert!((o.power - 5.0).abs() < 1e-12);
        assert_eq!(o.alpha, 0.1);
    }
}
