//! Procedural road meshes from lane-annotated splines.
//!
//! Splines with lane layouts are sampled into lane polygons, inserted into a planar
//! arrangement, traced into boundaries and triangulated into one shared base mesh. The
//! derived ops in [`ops`] turn that base into drive surfaces, sidewalks, curbs, marks,
//! decals and reference splines. [`scheduler::RoadPipeline`] runs the whole chain on
//! background workers and drops results of outdated inputs.

pub mod geometry {
    pub mod curve;
    pub mod intersect;
    pub mod math;
    pub mod tolerance;
}
pub mod algorithms {
    pub mod arrangement;
    pub mod boundary;
    pub mod hash_grid;
    pub mod polyline;
    pub mod polyline_merge;
    pub mod smoothing;
    pub mod triangle_tree;
    pub mod triangulate;
    pub mod winding;
}
pub mod road {
    pub mod attributes;
    pub mod layout;
    pub mod position;
    pub mod snapshot;
    pub mod spline;
}
pub mod base {
    pub mod operator;
    pub mod polygon;
}
pub mod config;
pub mod error;
pub mod mesh;
pub mod ops;
pub mod preset;
pub mod result;
pub mod scheduler;

pub use base::operator::{RoadBaseOperator, RoadBaseOperatorData};
pub use config::RoadMeshConfig;
pub use error::{Error, Result};
pub use mesh::RoadMesh;
pub use preset::RoadPreset;
pub use result::GeometryResult;
pub use road::snapshot::RoadSplineSnapshot;
pub use scheduler::{CancelToken, Progress, RoadPipeline};
