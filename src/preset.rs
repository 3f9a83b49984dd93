//! Named material, curb, mark and reference-spline profiles looked up by the ops.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::curve::FloatCurve;
use crate::road::attributes::MarkProfile;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialProfile {
    pub material: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SurfaceProfile {
    pub material: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub decal_material: Option<String>,
}

fn default_curb_width() -> f64 { 15.0 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurbProfile {
    pub material: String,
    /// Cross-section: time runs across the curb (0..width), value is the height
    pub curve: FloatCurve,
    #[serde(default = "default_curb_width")]
    pub width: f64,
}

fn default_segment_length() -> f64 { 1500.0 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefSplineEntry {
    #[serde(default = "default_segment_length")]
    pub length_of_segment: f64,
    #[serde(default)]
    pub align_world_up: bool,
    #[serde(default)]
    pub reverse_spline_direction: bool,
}

impl Default for RefSplineEntry {
    fn default() -> Self {
        Self { length_of_segment: default_segment_length(), align_world_up: false, reverse_spline_direction: false }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadPreset {
    pub driveable_material_profiles: BTreeMap<String, SurfaceProfile>,
    pub sidewalk_material_profiles: BTreeMap<String, SurfaceProfile>,
    pub lane_mark_material_profiles: BTreeMap<String, MaterialProfile>,
    pub curb_profiles: BTreeMap<String, CurbProfile>,
    pub lane_mark_profiles: BTreeMap<String, MarkProfile>,
    pub ref_spline_entries: BTreeMap<String, RefSplineEntry>,
}

impl RoadPreset {
    /// A preset with one "Default" entry for every material table and a plain
    /// rectangular curb.
    pub fn with_defaults() -> Self {
        let surface = |m: &str| SurfaceProfile { material: m.to_string(), priority: 0, decal_material: None };
        let mut p = Self::default();
        p.driveable_material_profiles.insert("Default".into(), surface("M_Road"));
        p.sidewalk_material_profiles.insert("Default".into(), surface("M_Sidewalk"));
        p.lane_mark_material_profiles.insert("Default".into(), MaterialProfile { material: "M_Mark".into() });
        p.curb_profiles.insert(
            "Default".into(),
            CurbProfile { material: "M_Curb".into(), curve: FloatCurve::linear(&[(0.0, 0.0), (2.0, 15.0), (13.0, 15.0), (15.0, 0.0)]), width: 15.0 },
        );
        p.lane_mark_profiles.insert("Solid".into(), MarkProfile::solid(15.0));
        p.lane_mark_profiles.insert("Broken".into(), MarkProfile::broken(15.0, 300.0, 450.0));
        p
    }

    pub fn from_json(s: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults() {
        let p = RoadPreset::from_json(r#"{"curb_profiles":{"c":{"material":"m","curve":{"keys":[]}}},"ref_spline_entries":{"Fence":{}}}"#).unwrap();
        assert_eq!(p.curb_profiles["c"].width, 15.0);
        assert_eq!(p.ref_spline_entries["Fence"].length_of_segment, 1500.0);
        assert!(p.driveable_material_profiles.is_empty());
    }
}
