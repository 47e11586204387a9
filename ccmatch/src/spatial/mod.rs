//! Spatial index over 2D catalog positions.
//!
//! A k-d tree built once per point set and queried many times: radius
//! queries for single points, and batch joins between two trees (or a tree
//! and itself) for the isolation filter, the offset-voting histogram and the
//! cross-matchers. The tree knows nothing about sky geometry; callers scale
//! RA before building it.

use glam::DVec2;
use rayon::prelude::*;

#[cfg(test)]
mod tests;

/// Below this many query points a batch join runs on the calling thread.
const PARALLEL_QUERY_THRESHOLD: usize = 2048;

/// A point found by a radius query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub dist_sq: f64,
}

/// A 2D k-d tree with median splits.
#[derive(Debug, Clone)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<DVec2>,
}

#[derive(Debug, Clone)]
struct KdNode {
    point_idx: usize,
    left: Option<usize>,
    right: Option<usize>,
    /// 0 = x, 1 = y
    split_dim: usize,
}

impl KdTree {
    /// Builds a balanced tree. An empty slice gives an empty tree that
    /// answers every query with nothing.
    pub fn build(points: &[DVec2]) -> Self {
        let points = points.to_vec();
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        Self::build_recursive(&points, &mut indices, 0, &mut nodes);
        Self { nodes, points }
    }

    fn build_recursive(
        points: &[DVec2],
        indices: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }

        let split_dim = depth % 2;
        let median = indices.len() / 2;
        indices.select_nth_unstable_by(median, |&a, &b| {
            points[a][split_dim].total_cmp(&points[b][split_dim])
        });
        let point_idx = indices[median];

        let node_idx = nodes.len();
        nodes.push(KdNode {
            point_idx,
            left: None,
            right: None,
            split_dim,
        });

        let (left_indices, right_part) = indices.split_at_mut(median);
        let right_indices = &mut right_part[1..];

        let left = Self::build_recursive(points, left_indices, depth + 1, nodes);
        let right = Self::build_recursive(points, right_indices, depth + 1, nodes);

        nodes[node_idx].left = left;
        nodes[node_idx].right = right;

        Some(node_idx)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> DVec2 {
        self.points[index]
    }

    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    /// Appends to `out` the indices of all points with `|p - query| <= radius`.
    pub fn radius_indices_into(&self, query: DVec2, radius: f64, out: &mut Vec<usize>) {
        if self.nodes.is_empty() {
            return;
        }
        let radius_sq = radius * radius;
        self.visit_within(0, query, radius_sq, &mut |idx, _| out.push(idx));
    }

    /// All points within `radius`, nearest first (ties by index).
    pub fn within_radius(&self, query: DVec2, radius: f64) -> Vec<Neighbor> {
        let mut found = Vec::new();
        if self.nodes.is_empty() {
            return found;
        }
        let radius_sq = radius * radius;
        self.visit_within(0, query, radius_sq, &mut |index, dist_sq| {
            found.push(Neighbor { index, dist_sq })
        });
        found.sort_by(|a, b| {
            a.dist_sq
                .total_cmp(&b.dist_sq)
                .then_with(|| a.index.cmp(&b.index))
        });
        found
    }

    /// Number of points within `radius` of `query`.
    pub fn count_within_radius(&self, query: DVec2, radius: f64) -> usize {
        let mut count = 0;
        if !self.nodes.is_empty() {
            self.visit_within(0, query, radius * radius, &mut |_, _| count += 1);
        }
        count
    }

    fn visit_within(
        &self,
        node_idx: usize,
        query: DVec2,
        radius_sq: f64,
        visit: &mut impl FnMut(usize, f64),
    ) {
        let node = &self.nodes[node_idx];
        let point = self.points[node.point_idx];

        let dist_sq = query.distance_squared(point);
        if dist_sq <= radius_sq {
            visit(node.point_idx, dist_sq);
        }

        let diff = query[node.split_dim] - point[node.split_dim];
        let diff_sq = diff * diff;

        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(near_idx) = near {
            self.visit_within(near_idx, query, radius_sq, visit);
        }
        if let Some(far_idx) = far {
            if diff_sq <= radius_sq {
                self.visit_within(far_idx, query, radius_sq, visit);
            }
        }
    }

    /// For every point of `self`, the indices of the points of `other` within
    /// `radius`, nearest first.
    ///
    /// `other` may be `self`; every point then matches itself.
    pub fn points_within_radius(&self, other: &KdTree, radius: f64) -> Vec<Vec<usize>> {
        let query = |p: &DVec2| -> Vec<usize> {
            other
                .within_radius(*p, radius)
                .into_iter()
                .map(|n| n.index)
                .collect()
        };
        if self.points.len() < PARALLEL_QUERY_THRESHOLD {
            self.points.iter().map(query).collect()
        } else {
            self.points.par_iter().map(query).collect()
        }
    }

    /// Per-point neighbor counts of `self` against `other` within `radius`.
    pub fn neighbor_counts(&self, other: &KdTree, radius: f64) -> Vec<usize> {
        let count = |p: &DVec2| other.count_within_radius(*p, radius);
        if self.points.len() < PARALLEL_QUERY_THRESHOLD {
            self.points.iter().map(count).collect()
        } else {
            self.points.par_iter().map(count).collect()
        }
    }

    /// Number of `(i, j)` pairs with `|self[i] - other[j]| <= radius`.
    pub fn count_pairs_within_radius(&self, other: &KdTree, radius: f64) -> usize {
        self.neighbor_counts(other, radius).into_iter().sum()
    }
}
