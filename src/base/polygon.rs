//! Lane and fill polygons.
//!
//! A polygon samples its border lines into the shared arrangement, then, once every
//! spline has been inserted, walks them back out of the graph to get its boundary and
//! the road parameters of every vertex it touches. Polygons live in
//! `RoadBaseOperatorData::polygons` and are referred to by index.

use glam::{DMat2, DVec2};

use crate::algorithms::arrangement::{group_id, Arrangement2, Graph2};
use crate::algorithms::boundary::{reverse_boundary, EdgeV};
use crate::algorithms::polyline::{find_polyline, remove_polyline_self_intersection};
use crate::base::operator::RoadBaseOperatorData;
use crate::config::BaseConfig;
use crate::error::{Error, Result};
use crate::geometry::curve::FloatCurve;
use crate::geometry::math::{signed_area, xy, Aabb2};
use crate::geometry::tolerance::{safe_div, EPS_KINDA_SMALL, EPS_SMALL};
use crate::mesh::CornerUvs;
use crate::preset::RoadPreset;
use crate::road::layout::{LaneInstance, RoadLane, RoadLaneSection, CENTER_LANE};
use crate::road::position::RoadPosition;
use crate::road::snapshot::RoadSplineSnapshot;

pub type PolygonId = usize;

/// What a vertex is to the polygon that recorded it.
pub mod vertex_flags {
    pub const INSIDE: u32 = 1;
    pub const OUTSIDE: u32 = 2;
    pub const END_CAP: u32 = 4;
    pub const BEGIN_CAP: u32 = 8;
    /// Begin cap of a looped lane
    pub const LOOP_SEAM: u32 = 16;
    /// Corner of a triangle owned by the polygon
    pub const OVERLAP_POLY: u32 = 32;
    pub const SIMPLE_POLY: u32 = 64;
}

const CAP_MIN_DT: f64 = 1e-4;
const CAP_MAX_POINTS: usize = 200;

/// One polygon's view of an arrangement vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoadVertexInfo {
    pub poly: PolygonId,
    pub vid: usize,
    pub pos: RoadPosition,
    /// Across the lane, 0..1
    pub alpha0: f64,
    /// Across the whole spline
    pub alpha1: f64,
    /// Distance from the inner lane border
    pub alpha2: f64,
    pub flags: u32,
}

impl RoadVertexInfo {
    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArrangementVertex3d {
    pub vertex: glam::DVec3,
    pub normal: glam::DVec3,
    pub infos: Vec<RoadVertexInfo>,
}

impl ArrangementVertex3d {
    pub fn info(&self, poly: PolygonId) -> Option<&RoadVertexInfo> {
        self.infos.iter().find(|i| i.poly == poly)
    }
}

/// A polyline inserted into the arrangement. `vid_b == Some(vid_a)` is a closed loop,
/// `vid_b == None` a line that collapsed to one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInfo {
    pub pid: u32,
    pub vid_a: usize,
    pub vid_b: Option<usize>,
}

impl LineInfo {
    pub fn is_loop(&self) -> bool {
        self.vid_b == Some(self.vid_a)
    }
}

#[derive(Debug, Clone, Copy)]
struct LaneSides {
    outside: LineInfo,
    begin_cap: LineInfo,
    end_cap: LineInfo,
}

#[derive(Debug, Clone)]
pub struct LanePolygon {
    pub section_index: usize,
    pub lane_index: i32,
    pub is_loop: bool,
    pub inside_vertices: Vec<usize>,
    pub outside_vertices: Vec<usize>,
    pub begin_cap_vertices: Vec<usize>,
    pub end_cap_vertices: Vec<usize>,
    inside: LineInfo,
    sides: Option<LaneSides>,
}

#[derive(Debug, Clone)]
pub struct SimplePolygon {
    pub line_vertices: Vec<usize>,
    line: LineInfo,
}

#[derive(Debug, Clone)]
pub enum PolygonShape {
    Lane(LanePolygon),
    Simple(SimplePolygon),
}

#[derive(Debug, Clone)]
pub struct RoadPolygon {
    pub id: PolygonId,
    pub spline_index: usize,
    /// Clockwise
    pub boundary: Vec<EdgeV>,
    pub holes: Vec<Vec<EdgeV>>,
    pub triangle_ids: Vec<usize>,
    pub poly2d: Vec<DVec2>,
    pub bounds: Aabb2,
    pub shape: PolygonShape,
}

fn lane_description(snapshot: &RoadSplineSnapshot, section: usize, lane: i32) -> String {
    format!("RoadLanePoly (spline: \"{}\", section: {section}, lane: {lane})", snapshot.label)
}

fn simple_description(snapshot: &RoadSplineSnapshot) -> String {
    format!("SimplePoly (spline: \"{}\")", snapshot.label)
}

fn chain_edges(chain: &[usize]) -> Vec<EdgeV> {
    chain.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Insert consecutive segments of `points` under a fresh polyline id.
fn add_line(arrangement: &mut Arrangement2, points: &[DVec2], gid: u32) -> Option<LineInfo> {
    if points.len() <= 1 {
        return None;
    }
    let pid = arrangement.allocate_polyline_id();
    for w in points.windows(2) {
        arrangement.insert_segment(w[0], w[1], gid, Some(pid));
    }
    let vid_a = arrangement.find_existing_vertex(points[0])?;
    let vid_b = arrangement.find_existing_vertex(points[points.len() - 1])?;
    if vid_a == vid_b && points.len() <= 2 {
        return Some(LineInfo { pid, vid_a, vid_b: None });
    }
    Some(LineInfo { pid, vid_a, vid_b: Some(vid_b) })
}

/// Drop points from the start until `distance` of the line is gone.
fn remove_points_from_begin(points: &mut Vec<DVec2>, distance: f64) {
    if distance <= 0.0 {
        return;
    }
    let mut acc = 0.0;
    for i in 1..points.len() {
        acc += points[i - 1].distance(points[i]);
        if acc >= distance {
            points.drain(..i);
            return;
        }
    }
    points.clear();
}

fn remove_points_from_end(points: &mut Vec<DVec2>, distance: f64) {
    if distance <= 0.0 || points.len() < 2 {
        return;
    }
    let mut acc = 0.0;
    for i in (0..points.len() - 1).rev() {
        acc += points[i].distance(points[i + 1]);
        if acc >= distance {
            points.truncate(i + 1);
            return;
        }
    }
    points.clear();
}

/// Border of a lane over every section it spans, in 2D and without self-crossings.
fn sample_border(snapshot: &RoadSplineSnapshot, section_index: usize, lane: Option<&RoadLane>, lane_index: i32, alpha: f64, cfg: &BaseConfig) -> Vec<DVec2> {
    let sections = &snapshot.layout().sections;
    let range = match lane {
        Some(l) => l.start_section()..=l.end_section(),
        None => section_index..=section_index,
    };
    let mut points: Vec<DVec2> = Vec::new();
    for sec in range.filter_map(|i| sections.get(i)) {
        let part = snapshot.sample_lane(
            section_index,
            lane_index,
            |_| alpha,
            cfg.max_square_distance_from_spline,
            cfg.min_segment_length,
            sec.s_offset,
            sec.end_offset(),
        );
        if !points.is_empty() && !part.is_empty() {
            points.pop();
        }
        points.extend(part.iter().map(|p| xy(p.location)));
    }
    remove_polyline_self_intersection(&mut points);
    points
}

/// Cap line across a lane from the inner to the outer border. `s_at(d)` maps a depth in
/// lane widths to S. Returns the points and the deepest value of the curve.
fn sample_cap(
    snapshot: &RoadSplineSnapshot,
    section_index: usize,
    lane_index: i32,
    curve: &FloatCurve,
    width: f64,
    max_sq_cap: f64,
    s_at: impl Fn(f64) -> f64,
) -> (Vec<DVec2>, f64) {
    if width <= EPS_SMALL {
        return (Vec::new(), 0.0);
    }
    let (times, values) = curve.to_polyline(0.0, 1.0, max_sq_cap / (width * width), CAP_MIN_DT, CAP_MAX_POINTS);
    let max_value = values.iter().copied().fold(f64::MIN, f64::max);
    let points = times
        .iter()
        .zip(&values)
        .map(|(&t, &v)| xy(snapshot.lane_road_position(section_index, lane_index, t, s_at(max_value - v)).location))
        .collect();
    (points, max_value)
}

impl RoadPolygon {
    /// Sample the lane's borders and caps and insert them into the arrangement.
    pub(crate) fn build_lane(
        id: PolygonId,
        spline_index: usize,
        snapshot: &RoadSplineSnapshot,
        section_index: usize,
        lane_index: i32,
        arrangement: &mut Arrangement2,
        cfg: &BaseConfig,
    ) -> Result<Self> {
        let desc = || lane_description(snapshot, section_index, lane_index);
        let section = snapshot
            .layout()
            .sections
            .get(section_index)
            .ok_or_else(|| Error::lane_polygon(desc(), "Unknown section"))?;
        let lane = section.lane(lane_index);
        if lane_index != CENTER_LANE && lane.is_none() {
            return Err(Error::lane_polygon(desc(), "Unknown lane"));
        }
        let sidewalk = lane.and_then(|l| l.instance.sidewalk());

        let mut inside = sample_border(snapshot, section_index, lane, lane_index, 0.0, cfg);
        let mut outside = match lane {
            Some(_) => sample_border(snapshot, section_index, lane, lane_index, 1.0, cfg),
            None => Vec::new(),
        };
        let mut begin_cap = Vec::new();
        let mut end_cap = Vec::new();

        if let (Some(lane), Some(sw)) = (lane, sidewalk) {
            let keyed = |c: &Option<FloatCurve>| c.as_ref().filter(|c| c.has_keys()).cloned();
            if let Some(curve) = keyed(&sw.end_cap).filter(|_| sw.curbs.end) {
                let end = lane.end_offset();
                let width = lane.width.eval(end - section.s_offset);
                let (cap, max_value) = sample_cap(snapshot, section_index, lane_index, &curve, width, cfg.max_square_distance_from_cap, |d| end - d * width);
                if max_value > 0.0 && !cap.is_empty() {
                    remove_points_from_end(&mut inside, max_value * width);
                    remove_points_from_end(&mut outside, max_value * width);
                    inside.push(cap[0]);
                    outside.push(cap[cap.len() - 1]);
                }
                end_cap = cap;
            }
            if let Some(curve) = keyed(&sw.begin_cap).filter(|_| sw.curbs.begin) {
                let start = section.s_offset;
                let width = lane.width.eval(0.0);
                let (cap, max_value) = sample_cap(snapshot, section_index, lane_index, &curve, width, cfg.max_square_distance_from_cap, |d| start + d * width);
                if max_value > 0.0 && !cap.is_empty() {
                    remove_points_from_begin(&mut inside, max_value * width);
                    remove_points_from_begin(&mut outside, max_value * width);
                    inside.insert(0, cap[0]);
                    outside.insert(0, cap[cap.len() - 1]);
                }
                begin_cap = cap;
            }
        }

        if lane.is_some() {
            if begin_cap.len() < 2 {
                begin_cap = inside.first().zip(outside.first()).map_or_else(Vec::new, |(&a, &b)| vec![a, b]);
            }
            if end_cap.len() < 2 {
                end_cap = inside.last().zip(outside.last()).map_or_else(Vec::new, |(&a, &b)| vec![a, b]);
            }
        }

        let gid = match lane.map(|l| &l.instance) {
            None => group_id::CENTER_LINE,
            Some(LaneInstance::Driving(_)) => group_id::DRIVING_SURFACE,
            Some(LaneInstance::Sidewalk(sw)) if sw.soft_border => group_id::SIDEWALKS_SOFT,
            Some(LaneInstance::Sidewalk(_)) => group_id::SIDEWALKS_HARD,
            Some(LaneInstance::None) => 0,
        };

        let inside_info = add_line(arrangement, &inside, gid).ok_or_else(|| Error::lane_polygon(desc(), "InsideLineInfo failed"))?;
        let mut sides = None;
        if lane.is_some() {
            let outside_info = add_line(arrangement, &outside, gid).ok_or_else(|| Error::lane_polygon(desc(), "OutsideLineInfo failed"))?;
            if inside_info.is_loop() != outside_info.is_loop() {
                return Err(Error::lane_polygon(desc(), "Wrong loop"));
            }
            let end_info = add_line(arrangement, &end_cap, gid);
            let begin_info = add_line(arrangement, &begin_cap, gid);
            let begin_info = begin_info.ok_or_else(|| Error::lane_polygon(desc(), "BeginCapInfo line info failed"))?;
            let end_info = end_info.ok_or_else(|| Error::lane_polygon(desc(), "EndCapInfo line info failed"))?;
            sides = Some(LaneSides { outside: outside_info, begin_cap: begin_info, end_cap: end_info });
        }

        Ok(Self::new(
            id,
            spline_index,
            PolygonShape::Lane(LanePolygon {
                section_index,
                lane_index,
                is_loop: inside_info.is_loop(),
                inside_vertices: Vec::new(),
                outside_vertices: Vec::new(),
                begin_cap_vertices: Vec::new(),
                end_cap_vertices: Vec::new(),
                inside: inside_info,
                sides,
            }),
        ))
    }

    /// Fill of a closed-loop spline, bounded by its centre line.
    pub(crate) fn build_simple(
        id: PolygonId,
        spline_index: usize,
        snapshot: &RoadSplineSnapshot,
        arrangement: &mut Arrangement2,
        cfg: &BaseConfig,
    ) -> Result<Self> {
        let desc = || simple_description(snapshot);
        let samples = snapshot.sample_lane(
            0,
            CENTER_LANE,
            |_| 0.0,
            cfg.max_square_distance_from_spline,
            cfg.min_segment_length,
            0.0,
            snapshot.length(),
        );
        if samples.is_empty() {
            return Err(Error::lane_polygon(desc(), "Can't sample the spline"));
        }
        let mut points: Vec<DVec2> = samples.iter().map(|p| xy(p.location)).collect();
        remove_polyline_self_intersection(&mut points);

        let gid = match &snapshot.layout().filled_instance {
            Some(LaneInstance::Driving(_)) => group_id::DRIVING_SURFACE,
            Some(LaneInstance::Sidewalk(_)) => group_id::SIDEWALKS_SOFT,
            _ => 0,
        };

        if points.len() < 2 {
            return Err(Error::lane_polygon(desc(), "polygon failed"));
        }
        let pid = arrangement.allocate_polyline_id();
        for w in points.windows(2) {
            arrangement.insert_segment(w[0], w[1], gid, Some(pid));
        }
        let vid = arrangement.find_existing_vertex(points[0]).ok_or_else(|| Error::lane_polygon(desc(), "polygon failed"))?;
        let line = LineInfo { pid, vid_a: vid, vid_b: Some(vid) };

        Ok(Self::new(id, spline_index, PolygonShape::Simple(SimplePolygon { line_vertices: Vec::new(), line })))
    }

    fn new(id: PolygonId, spline_index: usize, shape: PolygonShape) -> Self {
        Self {
            id,
            spline_index,
            boundary: Vec::new(),
            holes: Vec::new(),
            triangle_ids: Vec::new(),
            poly2d: Vec::new(),
            bounds: Aabb2::empty(),
            shape,
        }
    }

    pub fn lane(&self) -> Option<&LanePolygon> {
        match &self.shape {
            PolygonShape::Lane(l) => Some(l),
            PolygonShape::Simple(_) => None,
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.shape, PolygonShape::Simple(_))
    }

    pub fn description(&self, snapshot: &RoadSplineSnapshot) -> String {
        match &self.shape {
            PolygonShape::Lane(l) => lane_description(snapshot, l.section_index, l.lane_index),
            PolygonShape::Simple(_) => simple_description(snapshot),
        }
    }

    pub fn section<'a>(&self, snapshot: &'a RoadSplineSnapshot) -> Option<&'a RoadLaneSection> {
        snapshot.layout().sections.get(self.lane()?.section_index)
    }

    pub fn road_lane<'a>(&self, snapshot: &'a RoadSplineSnapshot) -> Option<&'a RoadLane> {
        let l = self.lane()?;
        snapshot.layout().sections.get(l.section_index)?.lane(l.lane_index)
    }

    /// Lane kind: the lane's instance, the layout fill for simple polygons, nothing
    /// for the centre line.
    pub fn lane_instance<'a>(&self, snapshot: &'a RoadSplineSnapshot) -> Option<&'a LaneInstance> {
        match &self.shape {
            PolygonShape::Lane(_) => self.road_lane(snapshot).map(|l| &l.instance),
            PolygonShape::Simple(_) => snapshot.layout().filled_instance.as_ref(),
        }
    }

    /// An open boundary only describes a line, it owns no area.
    pub fn is_polyline(&self) -> bool {
        match (self.boundary.first(), self.boundary.last()) {
            (Some(first), Some(last)) => first.0 != last.1,
            _ => true,
        }
    }

    /// Draw order of overlapping surfaces, higher wins.
    pub fn priority(&self, data: &RoadBaseOperatorData, preset: &RoadPreset) -> f64 {
        let Some(snapshot) = data.snapshots.get(self.spline_index) else { return 0.0 };
        let profile = match self.lane_instance(snapshot) {
            Some(LaneInstance::Driving(d)) => preset.driveable_material_profiles.get(&d.material_profile).map_or(0, |p| p.priority),
            Some(LaneInstance::Sidewalk(s)) => preset.sidewalk_material_profiles.get(&s.material_profile).map_or(0, |p| p.priority),
            _ => 0,
        };
        let order = data.snapshots.len() - self.spline_index - 1;
        f64::from(profile) + f64::from(snapshot.material_priority) / 1000.0 + order as f64 / 1_000_000.0
    }

    /// Record this polygon at `vid`, or update the flags if it already is.
    pub(crate) fn add_vertex_info(
        &self,
        graph: &Graph2,
        snapshot: &RoadSplineSnapshot,
        vertices: &mut [ArrangementVertex3d],
        vid: usize,
        spline_bounds: Option<&Aabb2>,
        flags: u32,
    ) {
        let alpha1 = |r: f64| spline_bounds.map_or(0.0, |b| safe_div(r - b.max.y, b.max.y - b.min.y, 0.0));
        let lane = self.lane();
        if let Some(info) = vertices[vid].infos.iter_mut().find(|i| i.poly == self.id) {
            if lane.is_some() {
                info.alpha1 = alpha1(info.pos.r);
            }
            info.flags |= flags;
            return;
        }

        let v2d = graph.vertex(vid);
        let mut pos = snapshot.up_ray_intersection(v2d);
        pos.location.x = v2d.x;
        pos.location.y = v2d.y;

        let (alpha0, alpha1, alpha2) = match lane {
            Some(l) => {
                let layout = snapshot.layout();
                let base = layout.eval_r_offset(pos.s);
                let (r1, r2) = layout.sections.get(l.section_index).map_or((0.0, 0.0), |sec| {
                    (sec.eval_lane_r_offset(l.lane_index, pos.s, 0.0), sec.eval_lane_r_offset(l.lane_index, pos.s, 1.0))
                });
                let (r1, r2) = (r1 + base, r2 + base);
                let mut a0 = safe_div(pos.r - r1, r2 - r1, 0.0);
                let invert = self.road_lane(snapshot).and_then(|l| l.instance.driving()).map_or(false, |d| d.invert_uv0);
                if invert {
                    a0 = 1.0 - a0;
                }
                (a0, alpha1(pos.r), pos.r - r1)
            }
            None => (0.0, 0.0, 0.0),
        };

        vertices[vid].infos.push(RoadVertexInfo { poly: self.id, vid, pos, alpha0, alpha1, alpha2, flags });
    }

    fn process_line(
        &self,
        graph: &Graph2,
        snapshot: &RoadSplineSnapshot,
        vertices: &mut [ArrangementVertex3d],
        line: &LineInfo,
        flags: u32,
        what: &str,
    ) -> Result<Vec<usize>> {
        let chain = find_polyline(graph, line.pid, line.vid_a, line.vid_b)
            .ok_or_else(|| Error::lane_polygon(self.description(snapshot), format!("{what} line not found after arrangement")))?;
        for &vid in &chain {
            self.add_vertex_info(graph, snapshot, vertices, vid, None, flags);
        }
        Ok(chain)
    }

    /// Loop of boundary points; flips `edges` and the points to clockwise. Grows
    /// `local_bounds` by the (S, R) of every point. The flag tells whether it flipped.
    fn make_poly(&self, edges: &mut Vec<EdgeV>, vertices: &[ArrangementVertex3d], local_bounds: Option<&mut Aabb2>) -> (Vec<DVec2>, bool) {
        let Some(&(first, _)) = edges.first() else { return (Vec::new(), false) };
        let infos: Vec<&RoadVertexInfo> =
            std::iter::once(first).chain(edges.iter().map(|e| e.1)).filter_map(|vid| vertices[vid].info(self.id)).collect();
        if let Some(b) = local_bounds {
            infos.iter().for_each(|i| b.contain(DVec2::new(i.pos.s, i.pos.r)));
        }
        let mut points: Vec<DVec2> = infos.iter().map(|i| xy(i.pos.location)).collect();
        let flip = signed_area(&points) >= 0.0;
        if flip {
            *edges = reverse_boundary(edges);
            points.reverse();
        }
        (points, flip)
    }

    /// Recover this polygon's lines from the finished arrangement and build its
    /// boundary. `spline_bounds` collects the (S, R) extent of the whole spline.
    pub(crate) fn complete_arrangement(
        &mut self,
        graph: &Graph2,
        snapshot: &RoadSplineSnapshot,
        vertices: &mut [ArrangementVertex3d],
        spline_bounds: &mut Aabb2,
    ) -> Result<()> {
        match self.shape.clone() {
            PolygonShape::Lane(lane) => self.complete_lane(lane, graph, snapshot, vertices, spline_bounds),
            PolygonShape::Simple(simple) => self.complete_simple(simple, graph, snapshot, vertices),
        }
    }

    fn complete_lane(
        &mut self,
        mut lane: LanePolygon,
        graph: &Graph2,
        snapshot: &RoadSplineSnapshot,
        vertices: &mut [ArrangementVertex3d],
        spline_bounds: &mut Aabb2,
    ) -> Result<()> {
        use vertex_flags::*;
        lane.inside_vertices = self.process_line(graph, snapshot, vertices, &lane.inside, INSIDE, "Inside")?;
        if let Some(sides) = lane.sides {
            lane.outside_vertices = self.process_line(graph, snapshot, vertices, &sides.outside, OUTSIDE, "Outside")?;
            if lane.is_loop {
                lane.begin_cap_vertices = self.process_line(graph, snapshot, vertices, &sides.begin_cap, LOOP_SEAM, "LoopSeam")?;
            } else {
                lane.begin_cap_vertices = self.process_line(graph, snapshot, vertices, &sides.begin_cap, BEGIN_CAP, "BeginCap")?;
                lane.end_cap_vertices = self.process_line(graph, snapshot, vertices, &sides.end_cap, END_CAP, "EndCap")?;
            }
        }

        let mut local_bounds = Aabb2::empty();
        let mut boundary: Vec<EdgeV>;
        let mut holes: Vec<Vec<EdgeV>> = Vec::new();
        if lane.sides.is_none() {
            boundary = chain_edges(&lane.inside_vertices);
        } else if lane.is_loop {
            let chain_box = |chain: &[usize]| Aabb2::from_points(chain[..chain.len().saturating_sub(1)].iter().map(|&v| graph.vertex(v)));
            let (outer, inner) = if chain_box(&lane.inside_vertices).area() > chain_box(&lane.outside_vertices).area() {
                (&lane.inside_vertices, &lane.outside_vertices)
            } else {
                (&lane.outside_vertices, &lane.inside_vertices)
            };
            boundary = chain_edges(outer);
            holes.push(chain_edges(inner));
            if let Some(info) = outer.first().and_then(|&v| vertices[v].info(self.id)) {
                local_bounds.contain(DVec2::new(snapshot.length(), info.pos.r));
            }
        } else {
            boundary = chain_edges(&lane.inside_vertices);
            boundary.extend(chain_edges(&lane.end_cap_vertices));
            boundary.extend(reverse_boundary(&chain_edges(&lane.outside_vertices)));
            boundary.extend(reverse_boundary(&chain_edges(&lane.begin_cap_vertices)));
        }

        self.poly2d = self.make_poly(&mut boundary, vertices, Some(&mut local_bounds)).0;
        if let Some(hole) = holes.first_mut() {
            self.make_poly(hole, vertices, Some(&mut local_bounds));
        }
        self.bounds = Aabb2::from_points(self.poly2d.iter().copied());
        self.boundary = boundary;
        self.holes = holes;
        self.shape = PolygonShape::Lane(lane);
        if !local_bounds.is_empty() {
            spline_bounds.contain_box(&local_bounds);
        }
        Ok(())
    }

    fn complete_simple(
        &mut self,
        mut simple: SimplePolygon,
        graph: &Graph2,
        snapshot: &RoadSplineSnapshot,
        vertices: &mut [ArrangementVertex3d],
    ) -> Result<()> {
        let mut chain = find_polyline(graph, simple.line.pid, simple.line.vid_a, simple.line.vid_b)
            .ok_or_else(|| Error::lane_polygon(self.description(snapshot), "line not found after arrangement"))?;
        for &vid in &chain {
            self.add_vertex_info(graph, snapshot, vertices, vid, None, vertex_flags::SIMPLE_POLY);
        }
        let mut boundary = chain_edges(&chain);
        let (points, flipped) = self.make_poly(&mut boundary, vertices, None);
        if flipped {
            chain.reverse();
        }
        simple.line_vertices = chain;
        self.bounds = Aabb2::from_points(points.iter().copied());
        self.poly2d = points;
        self.boundary = boundary;
        self.shape = PolygonShape::Simple(simple);
        Ok(())
    }

    /// This polygon's vertex records at the corners of base triangle `tid`.
    pub fn tri_infos<'a>(&self, data: &'a RoadBaseOperatorData, tid: usize) -> Option<[&'a RoadVertexInfo; 3]> {
        let t = data.triangles.get(tid)?;
        Some([
            data.vertices3d[t[0]].info(self.id)?,
            data.vertices3d[t[1]].info(self.id)?,
            data.vertices3d[t[2]].info(self.id)?,
        ])
    }

    /// S of a triangle corner. On the loop seam a vertex is both at 0 and at the spline
    /// length; the triangle's other corners decide which.
    fn corner_s(&self, data: &RoadBaseOperatorData, tid: usize, infos: [&RoadVertexInfo; 3], k: usize) -> f64 {
        let info = infos[k];
        if !info.has(vertex_flags::LOOP_SEAM) {
            return info.pos.s;
        }
        let seam = infos.map(|i| i.has(vertex_flags::LOOP_SEAM));
        if seam.iter().all(|&s| s) {
            return info.pos.s;
        }
        let length = data.snapshots.get(self.spline_index).map_or(0.0, |s| s.length());
        let t = data.triangles[tid];
        let here = data.vertices3d[t[k]].vertex;
        let forward = info.pos.forward();
        let behind = (0..3)
            .filter(|&j| j != k && !seam[j])
            .all(|j| (data.vertices3d[t[j]].vertex - here).normalize_or_zero().dot(forward) < 0.0);
        if behind {
            length
        } else if info.pos.s >= length - EPS_KINDA_SMALL {
            0.0
        } else {
            info.pos.s
        }
    }

    /// UV0..UV2 of base triangle `tid` as seen by this polygon.
    pub fn uv_layers(&self, data: &RoadBaseOperatorData, tid: usize) -> Option<[CornerUvs; 3]> {
        let infos = self.tri_infos(data, tid)?;
        let snapshot = data.snapshots.get(self.spline_index)?;
        match &self.shape {
            PolygonShape::Lane(_) => {
                let bounds = data.spline_bounds.get(self.spline_index).copied().unwrap_or_default();
                let length = bounds.max.x - bounds.min.x;
                let aligned = |f: f64| if length > EPS_SMALL { (length * f).round() / length } else { f };
                let (f0, f1, f2) = (data.config.uv0_scale_factor, data.config.uv1_scale_factor, data.config.uv2_scale_factor);
                let (a0, a1, a2) = (aligned(f0), aligned(f1), aligned(f2));
                let alpha1_mul = if bounds.is_empty() { 0.0 } else { bounds.extents().y * a1 * 2.0 };
                let s = [0, 1, 2].map(|k| self.corner_s(data, tid, infos, k));
                Some([
                    [0, 1, 2].map(|k| DVec2::new(infos[k].alpha0, s[k] * a0)),
                    [0, 1, 2].map(|k| DVec2::new((infos[k].alpha1 - 0.5) * alpha1_mul + 0.5, s[k] * a1)),
                    [0, 1, 2].map(|k| DVec2::new(infos[k].alpha2 * f2, s[k] * a2)),
                ])
            }
            PolygonShape::Simple(_) => {
                let layout = snapshot.layout();
                let size = self.bounds.max - self.bounds.min;
                let scale = safe_div(layout.filled_tex_scale, size.max_element(), 0.0);
                let rotate = DMat2::from_angle(layout.filled_tex_angle.to_radians());
                let origin = snapshot.spline().points().first().map_or(DVec2::ZERO, |p| xy(p.position)) * scale;
                let uv = [0, 1, 2].map(|k| rotate * (xy(infos[k].pos.location) * scale) + origin);
                Some([uv, uv, uv])
            }
        }
    }
}
