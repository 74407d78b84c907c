//! k-d tree over stop coordinates with exact geodesic k-nearest queries.
//!
//! Nodes live in a flat arena and refer to their children by index, so the
//! whole tree is dropped in one go when a snapshot is replaced. The split
//! axis alternates with depth: longitude at even depths, latitude at odd.
//!
//! Stops whose coordinate equals the split value are routed to the right
//! subtree, so every stop in the input is reachable by a query.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;

use geo::HaversineDistance;
use tracing::debug;

use crate::models::{Coordinate, StopRecord};

/// Mean Earth radius in metres, the same constant `geo` uses for haversine.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Longitude,
    Latitude,
}

impl Axis {
    fn value(self, coord: Coordinate) -> f64 {
        match self {
            Axis::Longitude => coord.longitude,
            Axis::Latitude => coord.latitude,
        }
    }

    fn next(self) -> Self {
        match self {
            Axis::Longitude => Axis::Latitude,
            Axis::Latitude => Axis::Longitude,
        }
    }

    /// Lower bound on the distance from `origin` to any point on the far
    /// side of the split.
    fn boundary_distance(self, origin: Coordinate, split: f64) -> f64 {
        match self {
            Axis::Latitude => EARTH_RADIUS_M * (origin.latitude - split).abs().to_radians(),
            // The far side of a meridian split is bounded by the split
            // meridian and the antimeridian; a path may cross either.
            Axis::Longitude => {
                meridian_distance(origin, split).min(meridian_distance(origin, 180.0))
            }
        }
    }
}

/// Shortest distance from `origin` to the half great circle at `longitude`.
fn meridian_distance(origin: Coordinate, longitude: f64) -> f64 {
    let mut dlon = (longitude - origin.longitude).rem_euclid(360.0);
    if dlon > 180.0 {
        dlon = 360.0 - dlon;
    }
    let lat = origin.latitude.to_radians();
    if dlon <= 90.0 {
        let s = (lat.cos() * dlon.to_radians().sin()).clamp(-1.0, 1.0);
        EARTH_RADIUS_M * s.asin()
    } else {
        // Closest point of the half meridian is a pole
        EARTH_RADIUS_M * (FRAC_PI_2 - lat.abs())
    }
}

/// Great-circle distance in metres.
pub fn geodesic_distance(a: Coordinate, b: Coordinate) -> f64 {
    a.to_point().haversine_distance(&b.to_point())
}

#[derive(Debug)]
struct Node {
    stop: usize,
    axis: Axis,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

/// A stop returned by a nearest query, with its distance from the origin.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub stop: Arc<StopRecord>,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    stop: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Equal distances fall back to input order so results are reproducible.
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.stop.cmp(&other.stop))
    }
}

/// Fixed-capacity max-heap holding the k best candidates seen so far.
struct BestK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl BestK {
    fn new(k: usize) -> Self {
        BestK {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn offer(&mut self, candidate: Candidate) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Whether a region at least `bound` metres away could still improve
    /// the result. A region exactly at the worst distance is still visited,
    /// since a tie there with a lower input index ranks ahead.
    fn admits(&self, bound: f64) -> bool {
        match self.heap.peek() {
            Some(worst) if self.heap.len() >= self.k => worst.distance >= bound,
            _ => true,
        }
    }

    fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Immutable spatial index over a stop list.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    stops: Vec<Arc<StopRecord>>,
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl SpatialIndex {
    /// Build a balanced tree by recursive median split.
    pub fn build(stops: Vec<Arc<StopRecord>>) -> Self {
        let mut order: Vec<usize> = (0..stops.len()).collect();
        let mut nodes = Vec::with_capacity(stops.len());
        let root = build_subtree(&stops, &mut order, Axis::Longitude, &mut nodes);
        debug!("Spatial index built over {} stops", stops.len());
        SpatialIndex { stops, nodes, root }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The `k` stops closest to `origin`, nearest first.
    ///
    /// Returns every stop when `k` exceeds the index size and nothing when
    /// `k` is zero, the index is empty, or the origin is not finite.
    pub fn nearest(&self, origin: Coordinate, k: usize) -> Vec<Neighbor> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        if k == 0 || !origin.is_finite() {
            return Vec::new();
        }

        let mut best = BestK::new(k.min(self.stops.len()));
        self.search(root, origin, &mut best);

        best.into_sorted()
            .into_iter()
            .map(|c| Neighbor {
                stop: Arc::clone(&self.stops[c.stop]),
                distance_m: c.distance,
            })
            .collect()
    }

    /// Like [`SpatialIndex::nearest`] without the distances.
    pub fn k_nearest(&self, origin: Coordinate, k: usize) -> Vec<Arc<StopRecord>> {
        self.nearest(origin, k).into_iter().map(|n| n.stop).collect()
    }

    fn search(&self, id: NodeId, origin: Coordinate, best: &mut BestK) {
        let node = &self.nodes[id];
        let coord = self.stops[node.stop].coordinate();

        best.offer(Candidate {
            distance: geodesic_distance(origin, coord),
            stop: node.stop,
        });

        let split = node.axis.value(coord);
        let (near, far) = if node.axis.value(origin) < split {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(near) = near {
            self.search(near, origin, best);
        }
        if let Some(far) = far {
            if best.admits(node.axis.boundary_distance(origin, split)) {
                self.search(far, origin, best);
            }
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn walk(index: &SpatialIndex, id: Option<NodeId>) -> usize {
            match id {
                None => 0,
                Some(id) => {
                    let node = &index.nodes[id];
                    1 + walk(index, node.left).max(walk(index, node.right))
                }
            }
        }
        walk(self, self.root)
    }
}

/// Place the median of `items` along `axis` as a node and recurse on both
/// halves. Returns the id of the subtree root.
fn build_subtree(
    stops: &[Arc<StopRecord>],
    items: &mut [usize],
    axis: Axis,
    nodes: &mut Vec<Node>,
) -> Option<NodeId> {
    if items.is_empty() {
        return None;
    }

    let value = |i: usize| axis.value(stops[i].coordinate());
    let mid = items.len() / 2;
    items.select_nth_unstable_by(mid, |&a, &b| value(a).total_cmp(&value(b)));
    let pivot = value(items[mid]);

    // Everything left of `mid` is <= pivot. Keep only strictly smaller
    // values on the left; ties with the pivot move right.
    let mut split = 0;
    for i in 0..mid {
        if value(items[i]) < pivot {
            items.swap(i, split);
            split += 1;
        }
    }
    items.swap(split, mid);

    let id = nodes.len();
    nodes.push(Node {
        stop: items[split],
        axis,
        left: None,
        right: None,
    });

    let (left, rest) = items.split_at_mut(split);
    let right = &mut rest[1..];
    let left_id = build_subtree(stops, left, axis.next(), nodes);
    let right_id = build_subtree(stops, right, axis.next(), nodes);
    nodes[id].left = left_id;
    nodes[id].right = right_id;

    Some(id)
}
