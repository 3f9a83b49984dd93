//! Lane sections and lanes of one road spline.
//!
//! Lane index 0 is the centre line, right lanes are `1..=right.len()` and left lanes
//! `-1..=-left.len()`, both counted from the centre outwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::curve::FloatCurve;
use crate::geometry::math::lerp;
use crate::road::attributes::LaneAttribute;

pub const DEFAULT_LANE_WIDTH: f64 = 375.0;
pub const CENTER_LANE: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SectionSide {
    #[default]
    Both,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LaneDirection {
    #[default]
    Default,
    Invert,
}

fn default_profile() -> String { "Default".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrivingLane {
    #[serde(default = "default_profile")]
    pub material_profile: String,
    #[serde(default)]
    pub invert_uv0: bool,
}

impl Default for DrivingLane {
    fn default() -> Self {
        Self { material_profile: default_profile(), invert_uv0: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurbFlags {
    pub inside: bool,
    pub outside: bool,
    pub begin: bool,
    pub end: bool,
}

impl Default for CurbFlags {
    fn default() -> Self {
        Self { inside: true, outside: true, begin: false, end: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidewalkLane {
    pub material_profile: String,
    pub soft_border: bool,
    /// Cap shape over the lane width, 0..1 in time, value in lane widths
    pub begin_cap: Option<FloatCurve>,
    pub end_cap: Option<FloatCurve>,
    pub curbs: CurbFlags,
    pub curb_profile: String,
}

impl Default for SidewalkLane {
    fn default() -> Self {
        Self {
            material_profile: default_profile(),
            soft_border: false,
            begin_cap: None,
            end_cap: None,
            curbs: CurbFlags::default(),
            curb_profile: default_profile(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LaneInstance {
    #[default]
    None,
    Driving(DrivingLane),
    Sidewalk(SidewalkLane),
}

impl LaneInstance {
    pub fn driving(&self) -> Option<&DrivingLane> {
        match self {
            LaneInstance::Driving(d) => Some(d),
            _ => None,
        }
    }

    pub fn sidewalk(&self) -> Option<&SidewalkLane> {
        match self {
            LaneInstance::Sidewalk(s) => Some(s),
            _ => None,
        }
    }
}

fn default_width() -> FloatCurve { FloatCurve::constant(DEFAULT_LANE_WIDTH) }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadLane {
    /// Width over S, relative to the start section
    #[serde(default = "default_width")]
    pub width: FloatCurve,
    #[serde(default)]
    pub instance: LaneInstance,
    #[serde(default)]
    pub attributes: BTreeMap<String, LaneAttribute>,
    #[serde(default)]
    pub direction: LaneDirection,
    #[serde(default)]
    pub skip_generation: bool,

    #[serde(skip)]
    lane_index: i32,
    #[serde(skip)]
    start_section: usize,
    #[serde(skip)]
    end_section: usize,
    #[serde(skip)]
    s_offset_end: f64,
}

impl Default for RoadLane {
    fn default() -> Self {
        Self::new(default_width(), LaneInstance::None)
    }
}

impl RoadLane {
    pub fn new(width: FloatCurve, instance: LaneInstance) -> Self {
        Self {
            width,
            instance,
            attributes: BTreeMap::new(),
            direction: LaneDirection::Default,
            skip_generation: false,
            lane_index: CENTER_LANE,
            start_section: 0,
            end_section: 0,
            s_offset_end: 0.0,
        }
    }

    pub fn driving(width: f64) -> Self {
        Self::new(FloatCurve::constant(width), LaneInstance::Driving(DrivingLane::default()))
    }

    pub fn sidewalk(width: f64) -> Self {
        Self::new(FloatCurve::constant(width), LaneInstance::Sidewalk(SidewalkLane::default()))
    }

    pub fn with_attribute(mut self, name: &str, attr: LaneAttribute) -> Self {
        self.attributes.insert(name.to_string(), attr);
        self
    }

    pub fn lane_index(&self) -> i32 { self.lane_index }
    pub fn start_section(&self) -> usize { self.start_section }
    pub fn end_section(&self) -> usize { self.end_section }
    /// S where the lane ends, filled by `RoadLayout::update_bounds`.
    pub fn end_offset(&self) -> f64 { self.s_offset_end }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoadLaneSection {
    #[serde(default)]
    pub side: SectionSide,
    #[serde(default)]
    pub left: Vec<RoadLane>,
    #[serde(default)]
    pub right: Vec<RoadLane>,
    /// Centre-line attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, LaneAttribute>,
    #[serde(default)]
    pub s_offset: f64,
    #[serde(skip)]
    s_offset_end: f64,
}

impl RoadLaneSection {
    pub fn new(s_offset: f64, left: Vec<RoadLane>, right: Vec<RoadLane>) -> Self {
        Self { s_offset, left, right, ..Default::default() }
    }

    pub fn end_offset(&self) -> f64 { self.s_offset_end }

    pub fn check_lane_index(&self, lane: i32) -> bool {
        match lane {
            0 => false,
            l if l > 0 => matches!(self.side, SectionSide::Both | SectionSide::Right) && ((l - 1) as usize) < self.right.len(),
            l => matches!(self.side, SectionSide::Both | SectionSide::Left) && ((-l - 1) as usize) < self.left.len(),
        }
    }

    pub fn lane(&self, lane: i32) -> Option<&RoadLane> {
        if lane > 0 {
            self.right.get((lane - 1) as usize)
        } else if lane < 0 {
            self.left.get((-lane - 1) as usize)
        } else {
            None
        }
    }

    /// Attribute table for a lane, the section's own table for the centre line.
    pub fn lane_attributes(&self, lane: i32) -> Option<&BTreeMap<String, LaneAttribute>> {
        if lane == CENTER_LANE {
            Some(&self.attributes)
        } else {
            self.lane(lane).map(|l| &l.attributes)
        }
    }

    /// Lateral offset of a lane border at absolute `s`. `alpha` 0 is the inner border,
    /// 1 the outer one. Left lanes have negative offsets.
    pub fn eval_lane_r_offset(&self, lane: i32, s: f64, alpha: f64) -> f64 {
        if lane == CENTER_LANE {
            return 0.0;
        }
        let lanes = if lane > 0 { &self.right } else { &self.left };
        let mut border = 0.0;
        let mut pre = 0.0;
        for l in lanes.iter().take(lane.unsigned_abs() as usize) {
            pre = border;
            border += l.width.eval(s - self.s_offset);
        }
        lerp(pre, border, alpha) * if lane > 0 { 1.0 } else { -1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadLayout {
    pub sections: Vec<RoadLaneSection>,
    pub r_offset: FloatCurve,
    /// Fill used for the interior of closed-loop splines
    pub filled_instance: Option<LaneInstance>,
    /// Degrees
    pub filled_tex_angle: f64,
    pub filled_tex_scale: f64,
}

impl Default for RoadLayout {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
            r_offset: FloatCurve::new(),
            filled_instance: None,
            filled_tex_angle: 0.0,
            filled_tex_scale: 1.0,
        }
    }
}

impl RoadLayout {
    pub fn new(sections: Vec<RoadLaneSection>) -> Self {
        Self { sections, ..Default::default() }
    }

    /// Drop zero-width lanes and assign lane indices and the section span of every lane.
    /// A section that only redefines one side extends the lanes of the other side from
    /// the last section that defined it.
    pub fn update_layout(&mut self) {
        for section in &mut self.sections {
            section.left.retain(|l| !l.width.is_zero());
            section.right.retain(|l| !l.width.is_zero());
        }

        let mut finished_left: Option<usize> = None;
        let mut finished_right: Option<usize> = None;
        for idx in 0..self.sections.len() {
            let side = self.sections[idx].side;
            match side {
                SectionSide::Left => self.sections[idx].right.clear(),
                SectionSide::Right => self.sections[idx].left.clear(),
                SectionSide::Both => {}
            }

            if matches!(side, SectionSide::Both | SectionSide::Left) {
                for (i, lane) in self.sections[idx].left.iter_mut().enumerate() {
                    lane.lane_index = -(i as i32) - 1;
                    lane.start_section = idx;
                    lane.end_section = idx;
                }
                finished_left = Some(idx);
            } else if let Some(f) = finished_left {
                self.sections[f].left.iter_mut().for_each(|l| l.end_section = idx);
            }

            if matches!(side, SectionSide::Both | SectionSide::Right) {
                for (i, lane) in self.sections[idx].right.iter_mut().enumerate() {
                    lane.lane_index = i as i32 + 1;
                    lane.start_section = idx;
                    lane.end_section = idx;
                }
                finished_right = Some(idx);
            } else if let Some(f) = finished_right {
                self.sections[f].right.iter_mut().for_each(|l| l.end_section = idx);
            }
        }
    }

    /// Fill the cached end offsets of sections and lanes for a spline of `spline_length`.
    pub fn update_bounds(&mut self, spline_length: f64) {
        let n = self.sections.len();
        if n == 0 {
            return;
        }
        self.sections[0].s_offset = 0.0;
        self.sections[n - 1].s_offset_end = spline_length;
        for i in 0..n - 1 {
            self.sections[i].s_offset_end = self.sections[i + 1].s_offset;
        }

        let mut finished_left: Option<usize> = None;
        let mut finished_right: Option<usize> = None;
        for idx in 0..n {
            let side = self.sections[idx].side;
            let end = self.sections[idx].s_offset_end;
            if matches!(side, SectionSide::Both | SectionSide::Left) {
                self.sections[idx].left.iter_mut().for_each(|l| l.s_offset_end = end);
                finished_left = Some(idx);
            } else if let Some(f) = finished_left {
                self.sections[f].left.iter_mut().for_each(|l| l.s_offset_end = end);
            }
            if matches!(side, SectionSide::Both | SectionSide::Right) {
                self.sections[idx].right.iter_mut().for_each(|l| l.s_offset_end = end);
                finished_right = Some(idx);
            } else if let Some(f) = finished_right {
                self.sections[f].right.iter_mut().for_each(|l| l.s_offset_end = end);
            }
        }
    }

    pub fn eval_r_offset(&self, s: f64) -> f64 {
        if self.r_offset.has_keys() { self.r_offset.eval(s) } else { 0.0 }
    }

    /// Closest section at or before `section` that carries lanes on `side`.
    pub fn find_side_section(&self, section: usize, side: SectionSide) -> Option<usize> {
        (0..=section.min(self.sections.len().checked_sub(1)?))
            .rev()
            .find(|&i| self.sections[i].side == side || self.sections[i].side == SectionSide::Both)
    }

    pub fn lane_start_offset(&self, lane: &RoadLane) -> f64 {
        self.sections.get(lane.start_section).map_or(0.0, |s| s.s_offset)
    }
}
