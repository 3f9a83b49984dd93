//! Sidewalk tops: sidewalk lane triangles lifted along the surface normal.

use crate::base::operator::RoadBaseOperatorData;
use crate::config::SidewalksConfig;
use crate::error::Result;
use crate::mesh::RoadMesh;
use crate::ops::{polygons_by_priority, regroup, run_mesh_op, section_group, sidewalk_lane, MeshOutput};
use crate::preset::RoadPreset;
use crate::scheduler::Progress;

pub struct SidewalksOp {
    pub config: SidewalksConfig,
}

impl SidewalksOp {
    pub fn new(config: SidewalksConfig) -> Self {
        Self { config }
    }

    fn build(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress, mesh: &mut RoadMesh) -> Result<()> {
        for v in &base.vertices3d {
            let vid = mesh.append_vertex(v.vertex + v.normal * self.config.sidewalk_height);
            mesh.normals[vid as usize] = v.normal;
        }
        // section groups only mean something when there is a single spline
        let split = self.config.split_by_sections && base.snapshots.len() == 1;

        let mut written = vec![false; base.triangles.len()];
        for poly in polygons_by_priority(base, preset, |p| sidewalk_lane(base, p).is_some()) {
            let Some(lane) = sidewalk_lane(base, poly) else { continue };
            let material = mesh.material_slot(&lane.material_profile);
            let group = if split { section_group(poly, false) } else { 0 };
            for &tid in &poly.triangle_ids {
                if std::mem::replace(&mut written[tid], true) {
                    continue;
                }
                let new = mesh.append_triangle(base.triangles[tid].map(|v| v as u32), material, group);
                if let Some([uv0, uv1, uv2]) = poly.uv_layers(base, tid) {
                    mesh.uv0[new] = uv0;
                    mesh.uv1[new] = uv1;
                    mesh.uv2[new] = uv2;
                }
            }
            progress.check()?;
        }

        if split {
            regroup(mesh, self.config.merge_area_threshold);
        }
        mesh.compact();
        mesh.compute_normals();
        Ok(())
    }

    pub fn calculate(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress) -> MeshOutput {
        run_mesh_op("sidewalks", base, progress, |mesh, _| self.build(base, preset, progress, mesh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{base, straight};
    use crate::road::layout::RoadLane;
    use crate::scheduler::NeverCancel;
    use approx::assert_relative_eq;

    #[test]
    fn lifts_sidewalk_lanes_only() {
        let base = base(vec![straight("A", 1000.0, vec![RoadLane::sidewalk(300.0)], vec![RoadLane::driving(350.0), RoadLane::sidewalk(200.0)])]);
        let out = SidewalksOp::new(SidewalksConfig { sidewalk_height: 15.0, ..SidewalksConfig::default() })
            .calculate(&base, &RoadPreset::with_defaults(), &NeverCancel);
        assert!(out.result.has_result(), "{:?}", out.result);

        let area: f64 = (0..out.mesh.triangle_count()).map(|t| out.mesh.triangle_area(t)).sum();
        assert_relative_eq!(area, 500_000.0, max_relative = 1e-6);
        assert!(out.mesh.positions.iter().all(|p| (p.z - 15.0).abs() < 1e-9));
        assert!(out.mesh.colors.iter().flatten().all(|c| *c == [1.0; 4]));
        assert_eq!(out.mesh.material_slots, vec!["Default".to_string()]);
    }
}
