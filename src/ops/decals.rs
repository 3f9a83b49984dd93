//! Decal layers over driving lanes whose surface profile names a decal material.

use crate::base::operator::RoadBaseOperatorData;
use crate::base::polygon::RoadPolygon;
use crate::config::DecalsConfig;
use crate::error::Result;
use crate::mesh::RoadMesh;
use crate::ops::{driving_lane, run_mesh_op, section_group, MeshOutput};
use crate::preset::RoadPreset;
use crate::scheduler::Progress;

pub struct DecalsOp {
    pub config: DecalsConfig,
}

impl DecalsOp {
    pub fn new(config: DecalsConfig) -> Self {
        Self { config }
    }

    fn polygon_mesh(&self, base: &RoadBaseOperatorData, poly: &RoadPolygon, profile: &str, split: bool) -> RoadMesh {
        let mut mesh = RoadMesh::new();
        for v in &base.vertices3d {
            let vid = mesh.append_vertex(v.vertex + v.normal * self.config.decal_offset);
            mesh.normals[vid as usize] = v.normal;
        }
        let material = mesh.material_slot(profile);
        let group = if split { section_group(poly, false) } else { 0 };
        for &tid in &poly.triangle_ids {
            let new = mesh.append_triangle(base.triangles[tid].map(|v| v as u32), material, group);
            if let Some([uv0, uv1, uv2]) = poly.uv_layers(base, tid) {
                mesh.uv0[new] = uv0;
                mesh.uv1[new] = uv1;
                mesh.uv2[new] = uv2;
            }
        }
        mesh.compact();
        mesh.compute_normals();
        mesh
    }

    fn build(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress, mesh: &mut RoadMesh) -> Result<()> {
        let split = self.config.split_by_sections && base.snapshots.len() == 1;
        for poly in base.polygons.iter().filter(|p| !p.is_polyline()) {
            let Some(lane) = driving_lane(base, poly) else { continue };
            let has_decal = preset
                .driveable_material_profiles
                .get(&lane.material_profile)
                .map_or(false, |p| p.decal_material.is_some());
            if !has_decal || poly.triangle_ids.is_empty() {
                continue;
            }
            mesh.append_mesh(&self.polygon_mesh(base, poly, &lane.material_profile, split));
            progress.check()?;
        }
        Ok(())
    }

    pub fn calculate(&self, base: &RoadBaseOperatorData, preset: &RoadPreset, progress: &dyn Progress) -> MeshOutput {
        run_mesh_op("decals", base, progress, |mesh, _| self.build(base, preset, progress, mesh))
    }
}
