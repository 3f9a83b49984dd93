// Centralized tolerances and helpers for the road arrangement (world units are cm)

pub const EPS_SMALL: f64 = 1e-8;          // UE_SMALL_NUMBER-like zero test
pub const EPS_KINDA_SMALL: f64 = 1e-4;    // radius / weight guard
pub const EPS_DOT: f64 = 1e-4;            // near-parallel threshold for overlap detection
pub const EPS_SIDE: f64 = 1e-8;           // normalized perp length guard
pub const DEFAULT_SNAP_TOL: f64 = 1e-5;   // arrangement snap tolerance when none configured

// Spatial hash cells per bounding box max dimension
pub const GRID_CELLS_PER_DIM: f64 = 64.0;

// Adaptive sampling caps
pub const MAX_SAMPLE_DEPTH: u32 = 24;
pub const REPARAM_STEPS_PER_SEGMENT: usize = 10;

#[inline] pub fn clamp01(x: f64) -> f64 { x.max(0.0).min(1.0) }
#[inline] pub fn near_zero(x: f64, eps: f64) -> bool { x.abs() <= eps }
#[inline] pub fn approx_eq(a: f64, b: f64, eps: f64) -> bool { (a - b).abs() <= eps }

#[inline]
pub fn safe_div(num: f64, den: f64, fallback: f64) -> f64 {
    if den.abs() <= EPS_SMALL { fallback } else { num / den }
}
