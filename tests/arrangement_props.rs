use std::collections::HashSet;

use glam::DVec2;
use proptest::prelude::*;
use roadnet::algorithms::arrangement::Arrangement2;
use roadnet::algorithms::boundary::find_boundaries;
use roadnet::geometry::intersect::orient;
use roadnet::geometry::math::Aabb2;

const SNAP_TOL: f64 = 1e-3;

#[derive(Clone, Debug)]
struct Seg {
    a: (u8, u8),
    b: (u8, u8),
    layer: u8,
}

fn seg_strategy() -> impl Strategy<Value = Seg> {
    ((0u8..=40, 0u8..=40), (0u8..=40, 0u8..=40), 0u8..4).prop_map(|(a, b, layer)| Seg { a, b, layer })
}

fn point((x, y): (u8, u8)) -> DVec2 {
    DVec2::new(x as f64 * 25.0, y as f64 * 25.0)
}

fn build(segs: &[Seg]) -> Arrangement2 {
    let bounds = Aabb2::from_points([DVec2::ZERO, DVec2::splat(1000.0)]);
    let mut arr = Arrangement2::new(&bounds, SNAP_TOL);
    for s in segs {
        let pid = arr.allocate_polyline_id();
        arr.insert_segment(point(s.a), point(s.b), 1 << s.layer, Some(pid));
    }
    arr
}

/// Signed distance of `c` from the line through `a` and `b`.
fn side(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    orient(a, b, c) / a.distance(b)
}

/// Both segments pass clearly through each other's interior.
fn cross_clearly(a: DVec2, b: DVec2, c: DVec2, d: DVec2) -> bool {
    let apart = |s0: f64, s1: f64| s0.abs() > SNAP_TOL && s1.abs() > SNAP_TOL && s0.signum() != s1.signum();
    apart(side(a, b, c), side(a, b, d)) && apart(side(c, d, a), side(c, d, b))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn graph_stays_consistent(segs in prop::collection::vec(seg_strategy(), 1..12)) {
        let arr = build(&segs);
        let g = &arr.graph;
        let all_layers = segs.iter().fold(0u32, |acc, s| acc | (1 << s.layer));

        let mut pairs = HashSet::new();
        for (eid, e) in g.edges() {
            prop_assert_ne!(e.a, e.b);
            prop_assert!(g.vertex_edges(e.a).contains(&eid));
            prop_assert!(g.vertex_edges(e.b).contains(&eid));
            prop_assert!(pairs.insert((e.a.min(e.b), e.a.max(e.b))), "duplicate edge {} {}", e.a, e.b);
            prop_assert!(e.gid != 0 && e.gid & !all_layers == 0);
        }
        for v in 0..g.vertex_count() {
            for &eid in g.vertex_edges(v) {
                let e = g.edge(eid);
                prop_assert!(e.is_some_and(|e| e.a == v || e.b == v));
            }
        }
    }

    #[test]
    fn vertices_respect_snap_tolerance(segs in prop::collection::vec(seg_strategy(), 1..12)) {
        let arr = build(&segs);
        let vs = arr.graph.vertices();
        for i in 0..vs.len() {
            for j in i + 1..vs.len() {
                let d = vs[i].distance(vs[j]);
                prop_assert!(d >= SNAP_TOL, "vertices {} and {} are {} apart", i, j, d);
            }
        }
    }

    #[test]
    fn edges_only_meet_at_vertices(segs in prop::collection::vec(seg_strategy(), 1..12)) {
        let arr = build(&segs);
        let g = &arr.graph;
        let edges: Vec<(usize, usize)> = g.edges().map(|(_, e)| (e.a, e.b)).collect();
        for (i, &(a, b)) in edges.iter().enumerate() {
            for &(c, d) in &edges[i + 1..] {
                if a == c || a == d || b == c || b == d {
                    continue;
                }
                let (pa, pb, pc, pd) = (g.vertex(a), g.vertex(b), g.vertex(c), g.vertex(d));
                prop_assert!(!cross_clearly(pa, pb, pc, pd), "edges {}-{} and {}-{} cross", a, b, c, d);
            }
        }
    }

    #[test]
    fn inserted_endpoints_are_vertices(segs in prop::collection::vec(seg_strategy(), 1..12)) {
        let arr = build(&segs);
        let g = &arr.graph;
        for s in &segs {
            for p in [point(s.a), point(s.b)] {
                let near = g.vertices().iter().any(|v| v.distance(p) <= SNAP_TOL * 1.0001);
                prop_assert!(near, "no vertex at {:?}", p);
            }
        }
    }

    #[test]
    fn boundaries_only_use_graph_edges(segs in prop::collection::vec(seg_strategy(), 1..10)) {
        let arr = build(&segs);
        let g = &arr.graph;
        for boundary in find_boundaries(g, &[], |_| true) {
            for &(a, b) in &boundary {
                prop_assert!(g.find_edge(a, b).is_some());
            }
        }
    }
}

#[test]
fn grid_of_crossings() {
    let mut segs = Vec::new();
    for i in 0..=4u8 {
        segs.push(Seg { a: (0, i * 10), b: (40, i * 10), layer: 0 });
        segs.push(Seg { a: (i * 10, 0), b: (i * 10, 40), layer: 1 });
    }
    let arr = build(&segs);
    assert_eq!(arr.graph.vertex_count(), 25);
    assert_eq!(arr.graph.edge_count(), 40);
    assert!(arr.graph.edges().all(|(_, e)| e.gid == 1 || e.gid == 2));
}
