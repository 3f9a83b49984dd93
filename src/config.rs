//! Knobs for the base pass and every derived op.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::road::attributes::Rgba;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverlapStrategy {
    #[default]
    UseMaxZ,
    UseMinZ,
}

impl OverlapStrategy {
    /// Fold one more height into the running extreme.
    pub fn fold(self, acc: f64, z: f64) -> f64 {
        match self {
            OverlapStrategy::UseMaxZ => acc.max(z),
            OverlapStrategy::UseMinZ => acc.min(z),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    pub overlap_strategy: OverlapStrategy,
    pub overlap_radius: f64,
    pub max_square_distance_from_spline: f64,
    pub max_square_distance_from_cap: f64,
    pub min_segment_length: f64,
    pub vertex_snap_tol: f64,
    pub uv0_scale_factor: f64,
    pub uv1_scale_factor: f64,
    pub uv2_scale_factor: f64,
    pub smooth: bool,
    pub smooth_speed: f64,
    pub smoothness: f64,
    pub draw_boundaries: bool,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            overlap_strategy: OverlapStrategy::UseMaxZ,
            overlap_radius: 500.0,
            max_square_distance_from_spline: 1.0,
            max_square_distance_from_cap: 1.0,
            min_segment_length: 375.0,
            vertex_snap_tol: 0.01,
            uv0_scale_factor: 0.0025,
            uv1_scale_factor: 0.001,
            uv2_scale_factor: 0.001,
            smooth: true,
            smooth_speed: 0.1,
            smoothness: 0.5,
            draw_boundaries: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSurfaceConfig {
    pub island_material_profile: String,
    pub compute_vertex_color: bool,
    pub vertex_color_smooth_radius: f64,
    pub default_color: Rgba,
    pub edge_color: Rgba,
    pub split_by_sections: bool,
    pub merge_area_threshold: f64,
}

impl Default for DriveSurfaceConfig {
    fn default() -> Self {
        Self {
            island_material_profile: "Default".to_string(),
            compute_vertex_color: true,
            vertex_color_smooth_radius: 200.0,
            default_color: Rgba::WHITE,
            edge_color: Rgba::BLACK,
            split_by_sections: false,
            merge_area_threshold: 250_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecalsConfig {
    pub decal_offset: f64,
    pub split_by_sections: bool,
}

impl Default for DecalsConfig {
    fn default() -> Self {
        Self { decal_offset: 3.0, split_by_sections: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidewalksConfig {
    pub sidewalk_height: f64,
    pub split_by_sections: bool,
    pub merge_area_threshold: f64,
}

impl Default for SidewalksConfig {
    fn default() -> Self {
        Self { sidewalk_height: 10.0, split_by_sections: false, merge_area_threshold: 250_000.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurbsConfig {
    /// Height of the curb top above the sidewalk surface
    pub curb_height: f64,
    pub uv0_scale: f64,
}

impl Default for CurbsConfig {
    fn default() -> Self {
        Self { curb_height: 10.0, uv0_scale: 0.001 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarksConfig {
    pub mark_offset: f64,
}

impl Default for MarksConfig {
    fn default() -> Self {
        Self { mark_offset: 3.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineMeshConfig {
    pub draw_ref_splines: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadMeshConfig {
    pub base: BaseConfig,
    pub drive_surface: DriveSurfaceConfig,
    pub decals: DecalsConfig,
    pub sidewalks: SidewalksConfig,
    pub curbs: CurbsConfig,
    pub marks: MarksConfig,
    pub spline_mesh: SplineMeshConfig,
}

impl RoadMeshConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.base;
        let non_negative = [
            ("overlap_radius", b.overlap_radius),
            ("max_square_distance_from_spline", b.max_square_distance_from_spline),
            ("max_square_distance_from_cap", b.max_square_distance_from_cap),
            ("min_segment_length", b.min_segment_length),
            ("vertex_snap_tol", b.vertex_snap_tol),
            ("smooth_speed", b.smooth_speed),
            ("smoothness", b.smoothness),
            ("drive_surface.vertex_color_smooth_radius", self.drive_surface.vertex_color_smooth_radius),
            ("drive_surface.merge_area_threshold", self.drive_surface.merge_area_threshold),
            ("sidewalks.merge_area_threshold", self.sidewalks.merge_area_threshold),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::config(format!("{name} must be a finite non-negative number, got {v}")));
            }
        }
        let finite = [
            ("uv0_scale_factor", b.uv0_scale_factor),
            ("uv1_scale_factor", b.uv1_scale_factor),
            ("uv2_scale_factor", b.uv2_scale_factor),
            ("decals.decal_offset", self.decals.decal_offset),
            ("sidewalks.sidewalk_height", self.sidewalks.sidewalk_height),
            ("curbs.curb_height", self.curbs.curb_height),
            ("curbs.uv0_scale", self.curbs.uv0_scale),
            ("marks.mark_offset", self.marks.mark_offset),
        ];
        for (name, v) in finite {
            if !v.is_finite() {
                return Err(Error::config(format!("{name} must be finite, got {v}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_json() {
        let cfg = RoadMeshConfig::from_json("{}").unwrap();
        assert_eq!(cfg, RoadMeshConfig::default());
        assert_eq!(cfg.base.min_segment_length, 375.0);
        assert_eq!(cfg.drive_surface.merge_area_threshold, 250_000.0);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let cfg = RoadMeshConfig::from_json(r#"{"base":{"overlap_strategy":"UseMinZ","smooth":false}}"#).unwrap();
        assert_eq!(cfg.base.overlap_strategy, OverlapStrategy::UseMinZ);
        assert!(!cfg.base.smooth);
        assert_eq!(cfg.base.vertex_snap_tol, 0.01);
        let back = RoadMeshConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn rejects_negative_tolerance() {
        let err = RoadMeshConfig::from_json(r#"{"base":{"vertex_snap_tol":-1.0}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn fold_is_order_independent() {
        let zs = [3.0, -1.0, 7.5, 2.0];
        let a = zs.iter().fold(f64::MIN, |acc, &z| OverlapStrategy::UseMaxZ.fold(acc, z));
        let b = zs.iter().rev().fold(f64::MIN, |acc, &z| OverlapStrategy::UseMaxZ.fold(acc, z));
        assert_eq!(a, b);
        assert_eq!(zs.iter().fold(f64::MAX, |acc, &z| OverlapStrategy::UseMinZ.fold(acc, z)), -1.0);
    }
}
