//! Keyed scalar curves (lane widths, offsets, cap and curb profiles).
//!
//! Keys are kept sorted by time. Evaluation clamps outside the key range and an
//! empty curve evaluates to its `default_value`.

use serde::{Deserialize, Serialize};

use super::math::seg_distance_sq;
use super::tolerance::EPS_SMALL;
use glam::DVec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpMode {
    Constant,
    Linear,
    #[default]
    Cubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub time: f64,
    pub value: f64,
    #[serde(default)]
    pub interp: InterpMode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatCurve {
    #[serde(default)]
    keys: Vec<CurveKey>,
    #[serde(default)]
    pub default_value: f64,
}

impl FloatCurve {
    pub fn new() -> Self { Self::default() }

    pub fn constant(value: f64) -> Self {
        let mut c = Self::new();
        c.add_key(0.0, value, InterpMode::Cubic);
        c
    }

    pub fn linear(points: &[(f64, f64)]) -> Self {
        let mut c = Self::new();
        for &(t, v) in points { c.add_key(t, v, InterpMode::Linear); }
        c
    }

    /// Insert a key, replacing any key at the same time.
    pub fn add_key(&mut self, time: f64, value: f64, interp: InterpMode) {
        let key = CurveKey { time, value, interp };
        match self.keys.iter().position(|k| k.time >= time) {
            Some(i) if (self.keys[i].time - time).abs() <= EPS_SMALL => self.keys[i] = key,
            Some(i) => self.keys.insert(i, key),
            None => self.keys.push(key),
        }
    }

    pub fn keys(&self) -> &[CurveKey] { &self.keys }

    pub fn has_keys(&self) -> bool { !self.keys.is_empty() }

    pub fn time_range(&self) -> Option<(f64, f64)> {
        Some((self.keys.first()?.time, self.keys.last()?.time))
    }

    pub fn value_range(&self) -> Option<(f64, f64)> {
        if self.keys.is_empty() {
            return None;
        }
        let lo = self.keys.iter().map(|k| k.value).fold(f64::MAX, f64::min);
        let hi = self.keys.iter().map(|k| k.value).fold(-f64::MAX, f64::max);
        Some((lo, hi))
    }

    /// True when every key (or the default, if keyless) is zero.
    pub fn is_zero(&self) -> bool {
        if self.keys.is_empty() {
            return self.default_value.abs() <= EPS_SMALL;
        }
        self.keys.iter().all(|k| k.value.abs() <= EPS_SMALL)
    }

    // Catmull-Rom tangent (value per unit time), flat at the ends
    fn auto_tangent(&self, i: usize) -> f64 {
        if i == 0 || i + 1 >= self.keys.len() {
            return 0.0;
        }
        let p = self.keys[i - 1];
        let n = self.keys[i + 1];
        let dt = n.time - p.time;
        if dt.abs() <= EPS_SMALL { 0.0 } else { (n.value - p.value) / dt }
    }

    pub fn eval(&self, t: f64) -> f64 {
        let n = self.keys.len();
        if n == 0 {
            return self.default_value;
        }
        if n == 1 || t <= self.keys[0].time {
            return self.keys[0].value;
        }
        if t >= self.keys[n - 1].time {
            return self.keys[n - 1].value;
        }
        let i = self.keys.partition_point(|k| k.time <= t).saturating_sub(1).min(n - 2);
        let k0 = self.keys[i];
        let k1 = self.keys[i + 1];
        let dt = k1.time - k0.time;
        if dt <= EPS_SMALL {
            return k1.value;
        }
        let u = (t - k0.time) / dt;
        match k0.interp {
            InterpMode::Constant => k0.value,
            InterpMode::Linear => k0.value + (k1.value - k0.value) * u,
            InterpMode::Cubic => {
                let m0 = self.auto_tangent(i) * dt;
                let m1 = self.auto_tangent(i + 1) * dt;
                let u2 = u * u;
                let u3 = u2 * u;
                (2.0 * u3 - 3.0 * u2 + 1.0) * k0.value
                    + (u3 - 2.0 * u2 + u) * m0
                    + (-2.0 * u3 + 3.0 * u2) * k1.value
                    + (u3 - u2) * m1
            }
        }
    }

    /// Adaptive sampling of the curve over `[t0, t1]` as (time, value) pairs.
    ///
    /// Key times inside the range are always emitted. A span is bisected while its
    /// midpoint deviates from the chord by more than `max_sq_dist`, as long as the
    /// span is wider than `min_dt` and fewer than `max_points` have been produced.
    pub fn to_polyline(&self, t0: f64, t1: f64, max_sq_dist: f64, min_dt: f64, max_points: usize) -> (Vec<f64>, Vec<f64>) {
        let mut breaks = vec![t0];
        breaks.extend(self.keys.iter().map(|k| k.time).filter(|&t| t > t0 + EPS_SMALL && t < t1 - EPS_SMALL));
        breaks.push(t1);

        let mut times = vec![t0];
        let budget = max_points.max(2);
        for w in breaks.windows(2) {
            self.subdivide(w[0], w[1], max_sq_dist, min_dt, budget, &mut times);
            times.push(w[1]);
        }
        times.dedup_by(|a, b| (*a - *b).abs() <= EPS_SMALL);
        let values = times.iter().map(|&t| self.eval(t)).collect();
        (times, values)
    }

    fn subdivide(&self, a: f64, b: f64, max_sq_dist: f64, min_dt: f64, budget: usize, out: &mut Vec<f64>) {
        if out.len() + 1 >= budget || b - a <= min_dt {
            return;
        }
        let m = 0.5 * (a + b);
        let pa = DVec2::new(a, self.eval(a));
        let pb = DVec2::new(b, self.eval(b));
        let pm = DVec2::new(m, self.eval(m));
        let (d2, _) = seg_distance_sq(pm, pa, pb);
        if d2 <= max_sq_dist {
            return;
        }
        self.subdivide(a, m, max_sq_dist, min_dt, budget, out);
        out.push(m);
        self.subdivide(m, b, max_sq_dist, min_dt, budget, out);
    }
}
