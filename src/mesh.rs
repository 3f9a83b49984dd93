//! Output triangle mesh shared by every derived op.
//!
//! Colors and UVs are stored per triangle corner so neighbouring triangles of
//! different lanes can disagree at a shared vertex.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::geometry::tolerance::EPS_SMALL;

pub type CornerColors = [[f32; 4]; 3];
pub type CornerUvs = [DVec2; 3];

const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadMesh {
    pub positions: Vec<DVec3>,
    pub normals: Vec<DVec3>,
    pub triangles: Vec<[u32; 3]>,
    pub colors: Vec<CornerColors>,
    pub uv0: Vec<CornerUvs>,
    pub uv1: Vec<CornerUvs>,
    pub uv2: Vec<CornerUvs>,
    pub material_ids: Vec<u32>,
    pub group_ids: Vec<u32>,
    /// Material id -> material name
    pub material_slots: Vec<String>,
}

impl RoadMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize { self.positions.len() }
    pub fn triangle_count(&self) -> usize { self.triangles.len() }
    pub fn is_empty(&self) -> bool { self.triangles.is_empty() }

    pub fn append_vertex(&mut self, p: DVec3) -> u32 {
        self.positions.push(p);
        self.normals.push(DVec3::Z);
        (self.positions.len() - 1) as u32
    }

    /// Append a white triangle with zero UVs.
    pub fn append_triangle(&mut self, tri: [u32; 3], material_id: u32, group_id: u32) -> usize {
        self.triangles.push(tri);
        self.colors.push([WHITE; 3]);
        self.uv0.push([DVec2::ZERO; 3]);
        self.uv1.push([DVec2::ZERO; 3]);
        self.uv2.push([DVec2::ZERO; 3]);
        self.material_ids.push(material_id);
        self.group_ids.push(group_id);
        self.triangles.len() - 1
    }

    /// Id of a named material, adding a slot the first time it is seen.
    pub fn material_slot(&mut self, name: &str) -> u32 {
        match self.material_slots.iter().position(|m| m == name) {
            Some(i) => i as u32,
            None => {
                self.material_slots.push(name.to_string());
                (self.material_slots.len() - 1) as u32
            }
        }
    }

    fn corners(&self, tid: usize) -> [DVec3; 3] {
        let t = self.triangles[tid];
        [self.positions[t[0] as usize], self.positions[t[1] as usize], self.positions[t[2] as usize]]
    }

    /// Face normal. Triangles are clockwise seen from above, so flat ground gives +Z.
    pub fn triangle_normal(&self, tid: usize) -> DVec3 {
        let [a, b, c] = self.corners(tid);
        (c - a).cross(b - a).normalize_or_zero()
    }

    pub fn triangle_area(&self, tid: usize) -> f64 {
        let [a, b, c] = self.corners(tid);
        0.5 * (b - a).cross(c - a).length()
    }

    /// Area-weighted vertex normals.
    pub fn compute_normals(&mut self) {
        let mut acc = vec![DVec3::ZERO; self.positions.len()];
        for tid in 0..self.triangles.len() {
            let [a, b, c] = self.corners(tid);
            let n = (c - a).cross(b - a);
            for &v in &self.triangles[tid] {
                acc[v as usize] += n;
            }
        }
        self.normals = acc
            .into_iter()
            .map(|n| if n.length_squared() > EPS_SMALL * EPS_SMALL { n.normalize() } else { DVec3::Z })
            .collect();
    }

    /// Up to three edge-adjacent triangles per triangle.
    pub fn triangle_neighbours(&self) -> Vec<Vec<usize>> {
        let mut by_edge: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
        for (tid, t) in self.triangles.iter().enumerate() {
            for k in 0..3 {
                let (a, b) = (t[k], t[(k + 1) % 3]);
                by_edge.entry((a.min(b), a.max(b))).or_default().push(tid);
            }
        }
        let mut out = vec![Vec::new(); self.triangles.len()];
        for tids in by_edge.values() {
            for &a in tids {
                for &b in tids {
                    if a != b && !out[a].contains(&b) {
                        out[a].push(b);
                    }
                }
            }
        }
        out
    }

    /// Edge-connected components among `tids`, each listed in input order.
    pub fn connected_components(&self, tids: &[usize], neighbours: &[Vec<usize>]) -> Vec<Vec<usize>> {
        let mut component: HashMap<usize, Option<usize>> = tids.iter().map(|&t| (t, None)).collect();
        let mut count = 0;
        for &seed in tids {
            if component.get(&seed).copied().flatten().is_some() {
                continue;
            }
            component.insert(seed, Some(count));
            let mut stack = vec![seed];
            while let Some(t) = stack.pop() {
                for &n in &neighbours[t] {
                    if let Some(slot) = component.get_mut(&n) {
                        if slot.is_none() {
                            *slot = Some(count);
                            stack.push(n);
                        }
                    }
                }
            }
            count += 1;
        }
        let mut out = vec![Vec::new(); count];
        for &t in tids {
            if let Some(Some(c)) = component.get(&t) {
                out[*c].push(t);
            }
        }
        out
    }

    fn groups(&self) -> BTreeMap<u32, Vec<usize>> {
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (tid, &g) in self.group_ids.iter().enumerate() {
            groups.entry(g).or_default().push(tid);
        }
        groups
    }

    pub fn group_area(&self, group: u32) -> f64 {
        (0..self.triangles.len()).filter(|&t| self.group_ids[t] == group).map(|t| self.triangle_area(t)).sum()
    }

    /// Give every disconnected piece of a group its own id. New ids start above the
    /// current maximum. Returns the largest id in use.
    pub fn split_groups_by_components(&mut self) -> Option<u32> {
        let groups = self.groups();
        let mut next = *groups.keys().next_back()? + 1;
        let neighbours = self.triangle_neighbours();
        for tids in groups.values() {
            let parts = self.connected_components(tids, &neighbours);
            for part in parts.iter().skip(1) {
                for &t in part {
                    self.group_ids[t] = next;
                }
                next += 1;
            }
        }
        self.group_ids.iter().copied().max()
    }

    /// Merge every group smaller than `threshold` into the adjacent group with the
    /// largest area, until no small group has a neighbour left.
    pub fn merge_groups_by_area(&mut self, threshold: f64) {
        let neighbours = self.triangle_neighbours();
        loop {
            let groups = self.groups();
            let area: BTreeMap<u32, f64> =
                groups.iter().map(|(&g, tids)| (g, tids.iter().map(|&t| self.triangle_area(t)).sum())).collect();
            let mut merge: Option<(u32, u32)> = None;
            for (&g, tids) in &groups {
                if area[&g] >= threshold {
                    continue;
                }
                let adjacent: BTreeSet<u32> = tids
                    .iter()
                    .flat_map(|&t| neighbours[t].iter().map(|&n| self.group_ids[n]))
                    .filter(|&n| n != g)
                    .collect();
                let target = adjacent.into_iter().max_by(|a, b| area[a].total_cmp(&area[b]));
                if let Some(target) = target {
                    merge = Some((g, target));
                    break;
                }
            }
            let Some((from, to)) = merge else { break };
            self.group_ids.iter_mut().filter(|g| **g == from).for_each(|g| *g = to);
        }
    }

    /// Append another mesh, remapping its material ids by name.
    pub fn append_mesh(&mut self, other: &RoadMesh) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        let remap: Vec<u32> = other.material_slots.iter().map(|m| self.material_slot(m)).collect();
        for tid in 0..other.triangles.len() {
            let t = other.triangles[tid];
            self.triangles.push([t[0] + base, t[1] + base, t[2] + base]);
            self.colors.push(other.colors[tid]);
            self.uv0.push(other.uv0[tid]);
            self.uv1.push(other.uv1[tid]);
            self.uv2.push(other.uv2[tid]);
            let mid = other.material_ids[tid] as usize;
            self.material_ids.push(remap.get(mid).copied().unwrap_or(0));
            self.group_ids.push(other.group_ids[tid]);
        }
    }

    /// Drop vertices no triangle refers to.
    pub fn compact(&mut self) {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        for t in &mut self.triangles {
            for v in t.iter_mut() {
                let old = *v as usize;
                if remap[old] == u32::MAX {
                    remap[old] = positions.len() as u32;
                    positions.push(self.positions[old]);
                    normals.push(self.normals[old]);
                }
                *v = remap[old];
            }
        }
        self.positions = positions;
        self.normals = normals;
    }

    /// Move every vertex along its normal.
    pub fn offset_along_normals(&mut self, distance: f64) {
        for (p, n) in self.positions.iter_mut().zip(&self.normals) {
            *p += *n * distance;
        }
    }
}
