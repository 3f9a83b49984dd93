//! Meshes derived from a finished base pass.
//!
//! Every op reads a shared [`RoadBaseOperatorData`] and never mutates it apart from
//! queueing debug lines.

pub mod curbs;
pub mod decals;
pub mod drive_surface;
pub mod marks;
pub mod sidewalks;
pub mod spline_mesh;

use crate::base::operator::RoadBaseOperatorData;
use crate::base::polygon::RoadPolygon;
use crate::config::RoadMeshConfig;
use crate::error::Result;
use crate::mesh::RoadMesh;
use crate::preset::RoadPreset;
use crate::result::GeometryResult;
use crate::road::layout::{DrivingLane, SidewalkLane};
use crate::scheduler::Progress;

pub use curbs::CurbsOp;
pub use decals::DecalsOp;
pub use drive_surface::DriveSurfaceOp;
pub use marks::MarksOp;
pub use sidewalks::SidewalksOp;
pub use spline_mesh::{SplineMeshOp, SplineMeshOutput, SplineMeshSegment};

/// Group offset reserved per spline when meshes are split by section.
pub(crate) const GROUPS_PER_SPLINE: u32 = 1024;

#[derive(Debug, Clone, Default)]
pub struct MeshOutput {
    pub mesh: RoadMesh,
    pub result: GeometryResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedOp {
    DriveSurface,
    Decals,
    Sidewalks,
    Curbs,
    Marks,
    SplineMesh,
}

#[derive(Debug, Clone)]
pub enum DerivedOutput {
    Mesh(MeshOutput),
    Segments(SplineMeshOutput),
}

impl DerivedOp {
    pub const ALL: [DerivedOp; 6] =
        [DerivedOp::DriveSurface, DerivedOp::Decals, DerivedOp::Sidewalks, DerivedOp::Curbs, DerivedOp::Marks, DerivedOp::SplineMesh];

    pub fn run(self, config: &RoadMeshConfig, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress) -> DerivedOutput {
        match self {
            DerivedOp::DriveSurface => DerivedOutput::Mesh(DriveSurfaceOp::new(config.drive_surface.clone()).calculate(base, preset, progress)),
            DerivedOp::Decals => DerivedOutput::Mesh(DecalsOp::new(config.decals.clone()).calculate(base, preset, progress)),
            DerivedOp::Sidewalks => DerivedOutput::Mesh(SidewalksOp::new(config.sidewalks.clone()).calculate(base, preset, progress)),
            DerivedOp::Curbs => DerivedOutput::Mesh(CurbsOp::new(config.curbs.clone()).calculate(base, preset, progress)),
            DerivedOp::Marks => DerivedOutput::Mesh(MarksOp::new(config.marks.clone()).calculate(base, preset, progress)),
            DerivedOp::SplineMesh => DerivedOutput::Segments(SplineMeshOp::new(config.spline_mesh.clone()).calculate(base, preset, progress)),
        }
    }
}

/// Shared frame of every mesh op: refuse a failed base, honour cancellation and fold
/// the outcome of `build` into the result.
pub(crate) fn run_mesh_op(
    name: &str,
    base: &RoadBaseOperatorData,
    progress: &dyn Progress,
    build: impl FnOnce(&mut RoadMesh, &mut GeometryResult) -> Result<()>,
) -> MeshOutput {
    let mut out = MeshOutput::default();
    if !base.result.has_result() {
        out.result.set_failed(format!("{name}: base data has no result"));
        return out;
    }
    let outcome = progress.check().and_then(|_| build(&mut out.mesh, &mut out.result)).and_then(|_| progress.check());
    match outcome {
        Ok(()) => {
            out.result.set_success();
            log::debug!("{name}: {} triangles, {} materials", out.mesh.triangle_count(), out.mesh.material_slots.len());
        }
        Err(e) => {
            out.mesh = RoadMesh::new();
            out.result.fail_with(&e);
        }
    }
    out
}

pub(crate) fn driving_lane<'a>(base: &'a RoadBaseOperatorData, poly: &RoadPolygon) -> Option<&'a DrivingLane> {
    poly.lane_instance(base.snapshot(poly)?)?.driving()
}

pub(crate) fn sidewalk_lane<'a>(base: &'a RoadBaseOperatorData, poly: &RoadPolygon) -> Option<&'a SidewalkLane> {
    poly.lane_instance(base.snapshot(poly)?)?.sidewalk()
}

/// Area polygons matching `keep`, highest priority first.
pub(crate) fn polygons_by_priority<'a>(
    base: &'a RoadBaseOperatorData,
    preset: &RoadPreset,
    keep: impl Fn(&RoadPolygon) -> bool,
) -> Vec<&'a RoadPolygon> {
    let mut polys: Vec<(f64, &RoadPolygon)> =
        base.polygons.iter().filter(|p| !p.is_polyline() && keep(p)).map(|p| (p.priority(base, preset), p)).collect();
    polys.sort_by(|a, b| b.0.total_cmp(&a.0));
    polys.into_iter().map(|(_, p)| p).collect()
}

/// Group id of a polygon's triangles when a mesh is split by lane section.
pub(crate) fn section_group(poly: &RoadPolygon, with_spline: bool) -> u32 {
    let section = poly.lane().map_or(0, |l| l.section_index as u32);
    if with_spline {
        poly.spline_index as u32 * GROUPS_PER_SPLINE + section
    } else {
        section
    }
}

/// Split groups into connected pieces and fold the small ones into their neighbours.
pub(crate) fn regroup(mesh: &mut RoadMesh, merge_area_threshold: f64) {
    mesh.split_groups_by_components();
    if merge_area_threshold > 0.0 {
        mesh.merge_groups_by_area(merge_area_threshold);
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use glam::DVec3;

    use crate::base::operator::{RoadBaseOperator, RoadBaseOperatorData};
    use crate::config::BaseConfig;
    use crate::road::layout::{RoadLane, RoadLaneSection, RoadLayout};
    use crate::road::snapshot::RoadSplineSnapshot;
    use crate::road::spline::SplineCurve;
    use crate::scheduler::NeverCancel;

    pub fn straight(label: &str, length: f64, left: Vec<RoadLane>, right: Vec<RoadLane>) -> Arc<RoadSplineSnapshot> {
        let layout = RoadLayout::new(vec![RoadLaneSection::new(0.0, left, right)]);
        let spline = SplineCurve::from_positions(&[DVec3::ZERO, DVec3::new(length, 0.0, 0.0)], false);
        Arc::new(RoadSplineSnapshot::new(label, spline, layout))
    }

    pub fn base(snapshots: Vec<Arc<RoadSplineSnapshot>>) -> RoadBaseOperatorData {
        let cfg = BaseConfig { smooth: false, ..BaseConfig::default() };
        let data = RoadBaseOperator::new(snapshots, cfg).calculate(&NeverCancel);
        assert!(data.result.has_result(), "{:?}", data.result);
        data
    }

    /// 1000 long, one 350 driving lane per side.
    pub fn two_lane_base() -> RoadBaseOperatorData {
        base(vec![straight("A", 1000.0, vec![RoadLane::driving(350.0)], vec![RoadLane::driving(350.0)])])
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::two_lane_base;
    use super::*;
    use crate::error::Error;
    use crate::scheduler::{CancelToken, NeverCancel};

    #[test]
    fn failed_base_fails_every_op() {
        let base = crate::base::operator::RoadBaseOperator::new(Vec::new(), Default::default()).calculate(&NeverCancel);
        let out = run_mesh_op("test", &base, &NeverCancel, |_, _| Ok(()));
        assert!(out.result.has_failed());
    }

    #[test]
    fn cancelled_op_returns_no_mesh() {
        let base = two_lane_base();
        let token = CancelToken::new();
        token.cancel();
        let out = run_mesh_op("test", &base, &token, |mesh, _| {
            mesh.append_vertex(glam::DVec3::ZERO);
            Ok(())
        });
        assert!(out.result.is_cancelled());
        assert_eq!(out.mesh.vertex_count(), 0);

        let out = run_mesh_op("test", &base, &NeverCancel, |_, _| Err(Error::invalid_input("bad")));
        assert!(out.result.has_failed());
    }

    #[test]
    fn every_op_runs_on_a_plain_road() {
        let base = two_lane_base();
        let cfg = RoadMeshConfig::default();
        let preset = RoadPreset::with_defaults();
        for op in DerivedOp::ALL {
            match op.run(&cfg, &base, &preset, &NeverCancel) {
                DerivedOutput::Mesh(m) => assert!(m.result.has_result(), "{op:?}: {:?}", m.result),
                DerivedOutput::Segments(s) => assert!(s.result.has_result(), "{op:?}: {:?}", s.result),
            }
        }
    }
}
