//! Lane attribute timelines: marks, speed limits and generation keys keyed by S.
//!
//! Key offsets are relative to the start of the owning section. A key holds its value
//! up to the next key.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::geometry::tolerance::EPS_KINDA_SMALL;

pub mod names {
    pub const MARK: &str = "Mark";
    pub const SPEED: &str = "Speed";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba { r: 255, g: 255, b: 255, a: 255 };
    pub const BLACK: Rgba = Rgba { r: 0, g: 0, b: 0, a: 255 };
    pub const BLUE: Rgba = Rgba { r: 0, g: 0, b: 255, a: 255 };

    pub fn to_linear(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a].map(|c| c as f32 / 255.0)
    }
}

impl Default for Rgba {
    fn default() -> Self { Rgba::WHITE }
}

fn default_mark_width() -> f64 { 15.0 }
fn default_material_profile() -> String { "Default".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarkProfile {
    None,
    Solid {
        #[serde(default = "default_mark_width")]
        width: f64,
        #[serde(default)]
        color: Rgba,
        #[serde(default = "default_material_profile")]
        material_profile: String,
    },
    Broken {
        #[serde(default = "default_mark_width")]
        width: f64,
        long: f64,
        gap: f64,
        #[serde(default)]
        color: Rgba,
        #[serde(default = "default_material_profile")]
        material_profile: String,
    },
    /// Two sub-profiles placed `gap` apart across the line
    Double { left: Box<MarkProfile>, right: Box<MarkProfile>, gap: f64 },
}

impl Default for MarkProfile {
    fn default() -> Self { MarkProfile::None }
}

impl MarkProfile {
    pub fn solid(width: f64) -> Self {
        MarkProfile::Solid { width, color: Rgba::WHITE, material_profile: default_material_profile() }
    }

    pub fn broken(width: f64, long: f64, gap: f64) -> Self {
        MarkProfile::Broken { width, long, gap, color: Rgba::WHITE, material_profile: default_material_profile() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkSource {
    /// Look up by name in the preset
    Preset(String),
    Custom(MarkProfile),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneMark {
    pub profile: MarkSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// 0 is the inner side of the lane, 1 the outer side
    pub alpha: f64,
    pub scale: DVec2,
    /// (Y, Z)
    pub offset: DVec2,
    /// Degrees
    pub roll: f64,
    pub reverse: bool,
}

impl Default for Generation {
    fn default() -> Self {
        Self { alpha: 0.5, scale: DVec2::ONE, offset: DVec2::ZERO, roll: 0.0, reverse: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Mark(LaneMark),
    Speed(f64),
    Generation(Generation),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeKey {
    pub s_offset: f64,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LaneAttribute {
    keys: Vec<AttributeKey>,
}

impl LaneAttribute {
    pub fn new() -> Self { Self::default() }

    pub fn keys(&self) -> &[AttributeKey] { &self.keys }
    pub fn has_keys(&self) -> bool { !self.keys.is_empty() }

    /// Insert keeping keys sorted; returns the key index.
    pub fn add_key(&mut self, s_offset: f64, value: AttributeValue) -> usize {
        let i = self.keys.partition_point(|k| k.s_offset <= s_offset);
        self.keys.insert(i, AttributeKey { s_offset, value });
        i
    }

    pub fn update_or_add_key(&mut self, s_offset: f64, value: AttributeValue, tol: f64) -> usize {
        match self.find_key(s_offset, tol) {
            Some(i) => {
                self.keys[i].value = value;
                i
            }
            None => self.add_key(s_offset, value),
        }
    }

    pub fn find_key(&self, s_offset: f64, tol: f64) -> Option<usize> {
        self.keys.iter().position(|k| (k.s_offset - s_offset).abs() <= tol)
    }

    /// Last key at or before `s_offset`.
    pub fn find_key_before_or_at(&self, s_offset: f64) -> Option<usize> {
        let i = self.keys.partition_point(|k| k.s_offset <= s_offset + EPS_KINDA_SMALL);
        i.checked_sub(1)
    }

    pub fn evaluate(&self, s_offset: f64) -> Option<&AttributeValue> {
        self.find_key_before_or_at(s_offset).map(|i| &self.keys[i].value)
    }

    /// Drop keys that repeat the previous key's value.
    pub fn remove_redundant_keys(&mut self) {
        self.keys.dedup_by(|b, a| a.value == b.value);
    }

    /// Clip to `[s0, s1]`, keeping the value active at `s0` as the first key.
    pub fn trim(&mut self, s0: f64, s1: f64) {
        let carried = self.evaluate(s0).cloned();
        self.keys.retain(|k| k.s_offset >= s0 && k.s_offset <= s1);
        if let Some(value) = carried {
            if self.keys.first().map_or(true, |k| k.s_offset > s0 + EPS_KINDA_SMALL) {
                self.keys.insert(0, AttributeKey { s_offset: s0, value });
            }
        }
    }

    /// S ranges (relative) covered by each key, ending at the next key or `end`.
    pub fn ranges(&self, end: f64) -> impl Iterator<Item = (f64, f64, &AttributeValue)> + '_ {
        self.keys.iter().enumerate().map(move |(i, k)| {
            let s1 = self.keys.get(i + 1).map_or(end, |n| n.s_offset);
            (k.s_offset, s1, &k.value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(name: &str) -> AttributeValue {
        AttributeValue::Mark(LaneMark { profile: MarkSource::Preset(name.into()) })
    }

    #[test]
    fn keys_stay_sorted_and_evaluate_stepwise() {
        let mut a = LaneAttribute::new();
        a.add_key(500.0, mark("b"));
        a.add_key(0.0, mark("a"));
        assert_eq!(a.keys()[0].s_offset, 0.0);
        assert_eq!(a.evaluate(250.0), Some(&mark("a")));
        assert_eq!(a.evaluate(500.0), Some(&mark("b")));
        assert_eq!(a.evaluate(-1.0), None);
        let r: Vec<_> = a.ranges(1000.0).map(|(s0, s1, _)| (s0, s1)).collect();
        assert_eq!(r, vec![(0.0, 500.0), (500.0, 1000.0)]);
    }

    #[test]
    fn update_and_trim() {
        let mut a = LaneAttribute::new();
        a.add_key(0.0, AttributeValue::Speed(50.0));
        a.add_key(100.0, AttributeValue::Speed(50.0));
        a.add_key(300.0, AttributeValue::Speed(90.0));
        a.remove_redundant_keys();
        assert_eq!(a.keys().len(), 2);
        a.update_or_add_key(300.0, AttributeValue::Speed(70.0), 1e-3);
        assert_eq!(a.keys().len(), 2);
        a.trim(200.0, 400.0);
        assert_eq!(a.keys()[0].s_offset, 200.0);
        assert_eq!(a.keys()[0].value, AttributeValue::Speed(50.0));
    }

    #[test]
    fn profile_json() {
        let p: MarkProfile = serde_json::from_str(r#"{"type":"Broken","long":300,"gap":200}"#).unwrap();
        assert_eq!(p, MarkProfile::broken(15.0, 300.0, 200.0));
    }
}
