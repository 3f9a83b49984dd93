use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::DVec3;
use roadnet::preset::SurfaceProfile;
use roadnet::road::layout::{RoadLane, RoadLaneSection, RoadLayout};
use roadnet::road::spline::SplineCurve;
use roadnet::scheduler::DirtyKind;
use roadnet::{RoadMeshConfig, RoadPipeline, RoadPreset, RoadSplineSnapshot};

fn road(length: f64) -> Arc<RoadSplineSnapshot> {
    let layout = RoadLayout::new(vec![RoadLaneSection::new(
        0.0,
        vec![RoadLane::driving(350.0)],
        vec![RoadLane::driving(350.0), RoadLane::sidewalk(250.0)],
    )]);
    let spline = SplineCurve::from_positions(&[DVec3::ZERO, DVec3::new(length, 0.0, 0.0)], false);
    Arc::new(RoadSplineSnapshot::new("main", spline, layout))
}

fn run_until_idle(pipeline: &mut RoadPipeline) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while pipeline.is_busy() {
        assert!(Instant::now() < deadline, "pipeline did not settle");
        pipeline.tick();
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn first_pass_publishes_every_output() {
    let mut pipeline = RoadPipeline::new(vec![road(1000.0)], RoadMeshConfig::default(), RoadPreset::with_defaults());
    assert!(pipeline.is_busy());
    run_until_idle(&mut pipeline);

    assert_eq!(pipeline.generation(), 1);
    let results = pipeline.results();
    assert_eq!(results.generation, 1);
    assert!(results.base.as_ref().is_some_and(|r| r.has_result()));
    assert!(results.is_complete());
    assert!(results.drive_surface.as_ref().is_some_and(|m| !m.mesh.is_empty()));
    assert!(results.sidewalks.as_ref().is_some_and(|m| !m.mesh.is_empty()));
    assert!(results.curbs.as_ref().is_some_and(|m| !m.mesh.is_empty()));
}

#[test]
fn preset_change_keeps_the_base() {
    let mut pipeline = RoadPipeline::new(vec![road(1000.0)], RoadMeshConfig::default(), RoadPreset::with_defaults());
    run_until_idle(&mut pipeline);
    let base = pipeline.base().cloned().expect("base published");

    let mut preset = RoadPreset::with_defaults();
    preset.driveable_material_profiles.insert(
        "Default".into(),
        SurfaceProfile { material: "M_Road".into(), priority: 0, decal_material: Some("M_Oil".into()) },
    );
    pipeline.set_preset(preset);
    run_until_idle(&mut pipeline);

    assert_eq!(pipeline.generation(), 1);
    assert!(Arc::ptr_eq(&base, pipeline.base().expect("base kept")));
    assert!(pipeline.results().decals.as_ref().is_some_and(|m| !m.mesh.is_empty()));
}

#[test]
fn geometry_change_supersedes_a_running_pass() {
    let mut pipeline = RoadPipeline::new(vec![road(1000.0)], RoadMeshConfig::default(), RoadPreset::with_defaults());
    pipeline.tick();
    pipeline.set_snapshots(vec![road(2000.0)]);
    pipeline.mark_dirty(DirtyKind::Attributes);
    run_until_idle(&mut pipeline);

    assert_eq!(pipeline.generation(), 2);
    assert_eq!(pipeline.results().generation, 2);
    let base = pipeline.base().expect("base published");
    assert!(base.vertices3d.iter().any(|v| v.vertex.x > 1500.0));
    assert!(pipeline.results().is_complete());
}

#[test]
fn base_config_change_rebuilds_but_op_config_does_not() {
    let mut pipeline = RoadPipeline::new(vec![road(1000.0)], RoadMeshConfig::default(), RoadPreset::with_defaults());
    run_until_idle(&mut pipeline);

    let mut cfg = RoadMeshConfig::default();
    cfg.sidewalks.sidewalk_height = 25.0;
    pipeline.set_config(cfg.clone());
    run_until_idle(&mut pipeline);
    assert_eq!(pipeline.generation(), 1);
    let top = pipeline.results().sidewalks.as_ref().map(|m| m.mesh.positions.iter().map(|p| p.z).fold(f64::MIN, f64::max));
    assert!(top.is_some_and(|z| (z - 25.0).abs() < 1e-6));

    cfg.base.smooth = false;
    pipeline.set_config(cfg);
    run_until_idle(&mut pipeline);
    assert_eq!(pipeline.generation(), 2);
}
