//! Polyline helpers: self-intersection cleanup and recovery of an inserted polyline
//! from the arrangement graph.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use glam::DVec2;
use rayon::prelude::*;

use crate::algorithms::arrangement::Graph2;
use crate::geometry::intersect::{intersect_segments, SegIntersection, Segment2};
use crate::geometry::tolerance::{EPS_DOT, EPS_KINDA_SMALL, EPS_SMALL};

struct SelfHit {
    i: usize,
    j: usize,
    point: DVec2,
}

fn find_self_intersection(poly: &[DVec2]) -> Option<SelfHit> {
    if poly.len() < 4 {
        return None;
    }
    let is_loop = poly[0].distance(poly[poly.len() - 1]) <= EPS_KINDA_SMALL;
    let n = poly.len() - usize::from(is_loop);

    let lowest_i = AtomicUsize::new(usize::MAX);
    let claim: Mutex<Option<SelfHit>> = Mutex::new(None);

    (0..n.saturating_sub(1)).into_par_iter().for_each(|i| {
        let seg_a = Segment2::new(poly[i], poly[i + 1]);
        for j in (i + 2)..n.saturating_sub(1) {
            if i > lowest_i.load(AtomicOrdering::Relaxed) {
                return;
            }
            let seg_b = Segment2::new(poly[j], poly[j + 1]);
            let point = match intersect_segments(&seg_a, &seg_b, EPS_SMALL, EPS_DOT) {
                SegIntersection::None => continue,
                SegIntersection::Point { point, .. } => point,
                SegIntersection::Segment { p0, .. } => p0,
            };
            if let Ok(mut slot) = claim.lock() {
                let better = slot.as_ref().map_or(true, |h| (i, j) < (h.i, h.j));
                if better {
                    *slot = Some(SelfHit { i, j, point });
                    lowest_i.fetch_min(i, AtomicOrdering::Relaxed);
                }
            }
            return;
        }
    });

    claim.into_inner().ok().flatten()
}

/// Cut out self-intersecting loops: for a crossing between segments `i` and `j`, the
/// points `i+1..=j` are replaced by the crossing point. Repeats until clean.
/// For a closed loop (first point equals last) the closing segment is not tested.
pub fn remove_polyline_self_intersection(poly: &mut Vec<DVec2>) {
    let mut guard = poly.len();
    while let Some(hit) = find_self_intersection(poly) {
        poly.splice(hit.i + 1..=hit.j, std::iter::once(hit.point));
        if guard == 0 {
            log::warn!("polyline: self-intersection cleanup did not converge");
            break;
        }
        guard -= 1;
    }
}

pub fn has_self_intersection(poly: &[DVec2]) -> bool {
    find_self_intersection(poly).is_some()
}

#[derive(Debug, Clone, Copy)]
struct QueueItem {
    dist: f64,
    vid: usize,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for QueueItem {}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
// Reversed for a min-heap
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other.dist.total_cmp(&self.dist).then_with(|| other.vid.cmp(&self.vid))
    }
}

type Adjacency = HashMap<usize, Vec<(usize, f64)>>;

fn dijkstra(adj: &Adjacency, from: usize, to: usize) -> Vec<usize> {
    let mut dist: HashMap<usize, f64> = HashMap::new();
    let mut prev: HashMap<usize, usize> = HashMap::new();
    let mut heap = BinaryHeap::new();
    dist.insert(from, 0.0);
    heap.push(QueueItem { dist: 0.0, vid: from });

    while let Some(QueueItem { dist: d, vid }) = heap.pop() {
        if vid == to {
            break;
        }
        if dist.get(&vid).map_or(false, |&best| d > best) {
            continue;
        }
        for &(nbr, w) in adj.get(&vid).map(Vec::as_slice).unwrap_or(&[]) {
            let nd = d + w;
            if dist.get(&nbr).map_or(true, |&cur| nd < cur) {
                dist.insert(nbr, nd);
                prev.insert(nbr, vid);
                heap.push(QueueItem { dist: nd, vid: nbr });
            }
        }
    }

    if !dist.contains_key(&to) || from == to {
        return Vec::new();
    }
    let mut path = vec![to];
    let mut cur = to;
    while let Some(&p) = prev.get(&cur) {
        path.push(p);
        cur = p;
        if cur == from {
            break;
        }
    }
    path.reverse();
    path
}

fn remove_link(adj: &mut Adjacency, a: usize, b: usize) {
    if let Some(l) = adj.get_mut(&a) {
        l.retain(|&(v, _)| v != b);
    }
    if let Some(l) = adj.get_mut(&b) {
        l.retain(|&(v, _)| v != a);
    }
}

/// Recover the vertex chain of polyline `pid` between `vid_a` and `vid_b` by a
/// shortest-path walk restricted to edges carrying `pid`.
///
/// `vid_b == None` is a single-point line and yields `[vid_a]`. `vid_a == vid_b` is a
/// loop: each edge at `vid_a` is removed in turn until a cycle is found; the result
/// then starts and ends with `vid_a`. Returns `None` if no chain exists.
pub fn find_polyline(g: &Graph2, pid: u32, vid_a: usize, vid_b: Option<usize>) -> Option<Vec<usize>> {
    let Some(vid_b) = vid_b else { return Some(vec![vid_a]) };

    let mut adj: Adjacency = HashMap::new();
    for (_, e) in g.edges() {
        if !e.polylines.contains(&pid) {
            continue;
        }
        let w = g.vertex(e.a).distance(g.vertex(e.b));
        adj.entry(e.a).or_default().push((e.b, w));
        adj.entry(e.b).or_default().push((e.a, w));
    }
    if !adj.contains_key(&vid_a) || !adj.contains_key(&vid_b) {
        return None;
    }

    if vid_a == vid_b {
        let mut nbrs: Vec<usize> = adj[&vid_a].iter().map(|&(v, _)| v).collect();
        nbrs.sort_unstable();
        nbrs.dedup();
        for nbr in nbrs {
            let mut cut = adj.clone();
            remove_link(&mut cut, vid_a, nbr);
            let mut path = dijkstra(&cut, vid_a, nbr);
            if !path.is_empty() {
                path.push(vid_a);
                return Some(path);
            }
        }
        return None;
    }

    let path = dijkstra(&adj, vid_a, vid_b);
    if path.is_empty() { None } else { Some(path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64) -> DVec2 { DVec2::new(x, y) }

    #[test]
    fn removes_single_crossing() {
        // segment 0 crosses segment 3
        let mut p = vec![v(0.0, 0.0), v(10.0, 0.0), v(10.0, 5.0), v(5.0, 5.0), v(5.0, -5.0), v(20.0, -5.0)];
        let before = p.len();
        remove_polyline_self_intersection(&mut p);
        assert!(!has_self_intersection(&p));
        // points 1..=3 replaced by the crossing point
        assert_eq!(p.len(), before - 3 + 1);
        assert!((p[1] - v(5.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn clean_polyline_untouched() {
        let mut p = vec![v(0.0, 0.0), v(1.0, 0.0), v(2.0, 1.0), v(3.0, 0.0)];
        let copy = p.clone();
        remove_polyline_self_intersection(&mut p);
        assert_eq!(p, copy);
    }

    fn chain_graph() -> Graph2 {
        let mut g = Graph2::new();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (1.0, 1.0)] { g.append_vertex(v(x, y)); }
        g.append_edge(0, 1, 2, vec![7]);
        g.append_edge(1, 2, 2, vec![7]);
        g.append_edge(0, 3, 2, vec![8]);
        g.append_edge(3, 2, 2, vec![8]);
        g
    }

    #[test]
    fn dijkstra_respects_pid() {
        let g = chain_graph();
        assert_eq!(find_polyline(&g, 7, 0, Some(2)), Some(vec![0, 1, 2]));
        assert_eq!(find_polyline(&g, 8, 0, Some(2)), Some(vec![0, 3, 2]));
        assert_eq!(find_polyline(&g, 9, 0, Some(2)), None);
        assert_eq!(find_polyline(&g, 7, 3, None), Some(vec![3]));
    }

    #[test]
    fn loop_polyline() {
        let mut h = Graph2::new();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] { h.append_vertex(v(x, y)); }
        h.append_edge(0, 1, 2, vec![1]);
        h.append_edge(1, 2, 2, vec![1]);
        h.append_edge(2, 3, 2, vec![1]);
        h.append_edge(3, 0, 2, vec![1]);
        let path = find_polyline(&h, 1, 0, Some(0)).unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(path[0], 0);
        assert_eq!(path[4], 0);
    }
}
