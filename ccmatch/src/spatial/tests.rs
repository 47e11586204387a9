//! Tests for the k-d tree.

use super::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn radius_search_indices(tree: &KdTree, query: DVec2, radius: f64) -> Vec<usize> {
    let mut buf = Vec::new();
    tree.radius_indices_into(query, radius, &mut buf);
    buf.sort();
    buf
}

fn random_points(n: usize, seed: u64) -> Vec<DVec2> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| DVec2::new(rng.random_range(0.0..100.0), rng.random_range(0.0..100.0)))
        .collect()
}

fn brute_force(points: &[DVec2], query: DVec2, radius: f64) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.distance_squared(query) <= radius * radius)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn test_kdtree_build_empty() {
    let tree = KdTree::build(&[]);
    assert!(tree.is_empty());
    assert!(tree.within_radius(DVec2::ZERO, 10.0).is_empty());
    assert_eq!(tree.count_within_radius(DVec2::ZERO, 10.0), 0);
}

#[test]
fn test_kdtree_radius_indices_basic() {
    let points = vec![
        DVec2::new(0.0, 0.0),
        DVec2::new(1.0, 0.0),
        DVec2::new(0.0, 1.0),
        DVec2::new(5.0, 5.0),
        DVec2::new(10.0, 10.0),
    ];
    let tree = KdTree::build(&points);

    let indices = radius_search_indices(&tree, DVec2::new(0.0, 0.0), 2.0);
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn test_kdtree_radius_is_inclusive() {
    let points = vec![DVec2::new(0.0, 0.0), DVec2::new(3.0, 4.0)];
    let tree = KdTree::build(&points);
    assert_eq!(tree.count_within_radius(DVec2::ZERO, 5.0), 2);
    assert_eq!(tree.count_within_radius(DVec2::ZERO, 4.999), 1);
}

#[test]
fn test_kdtree_within_radius_sorted_by_distance() {
    let points = vec![
        DVec2::new(3.0, 0.0),
        DVec2::new(1.0, 0.0),
        DVec2::new(2.0, 0.0),
        DVec2::new(50.0, 0.0),
    ];
    let tree = KdTree::build(&points);
    let found = tree.within_radius(DVec2::ZERO, 10.0);
    let order: Vec<usize> = found.iter().map(|n| n.index).collect();
    assert_eq!(order, vec![1, 2, 0]);
    assert!((found[2].dist_sq - 9.0).abs() < 1e-12);
}

#[test]
fn test_kdtree_matches_brute_force() {
    let points = random_points(1000, 7);
    let tree = KdTree::build(&points);
    let queries = random_points(50, 8);

    for q in queries {
        for radius in [0.5, 3.0, 12.0] {
            let expected = brute_force(&points, q, radius);
            let found = radius_search_indices(&tree, q, radius);
            assert_eq!(found, expected, "query {:?} radius {}", q, radius);
        }
    }
}

#[test]
fn test_kdtree_duplicate_points() {
    let points = vec![DVec2::new(1.0, 1.0); 5];
    let tree = KdTree::build(&points);
    assert_eq!(tree.count_within_radius(DVec2::new(1.0, 1.0), 0.0), 5);
}

#[test]
fn test_self_join_counts_include_self() {
    let points = vec![
        DVec2::new(0.0, 0.0),
        DVec2::new(0.5, 0.0),
        DVec2::new(10.0, 10.0),
    ];
    let tree = KdTree::build(&points);
    let counts = tree.neighbor_counts(&tree, 1.0);
    assert_eq!(counts, vec![2, 2, 1]);
    assert_eq!(tree.count_pairs_within_radius(&tree, 1.0), 5);
}

#[test]
fn test_points_within_radius_between_trees() {
    let src = KdTree::build(&[DVec2::new(0.0, 0.0), DVec2::new(20.0, 20.0)]);
    let reference = KdTree::build(&[
        DVec2::new(0.4, 0.0),
        DVec2::new(0.1, 0.0),
        DVec2::new(5.0, 5.0),
    ]);

    let lists = src.points_within_radius(&reference, 1.0);
    assert_eq!(lists.len(), 2);
    assert_eq!(lists[0], vec![1, 0]);
    assert!(lists[1].is_empty());
    assert_eq!(src.count_pairs_within_radius(&reference, 1.0), 2);
}

#[test]
fn test_batch_join_large_input_matches_brute_force() {
    // Above the parallel threshold.
    let a = random_points(3000, 11);
    let b = random_points(500, 12);
    let tree_a = KdTree::build(&a);
    let tree_b = KdTree::build(&b);

    let lists = tree_a.points_within_radius(&tree_b, 2.0);
    for (i, list) in lists.iter().enumerate().step_by(97) {
        let mut sorted = list.clone();
        sorted.sort();
        assert_eq!(sorted, brute_force(&b, a[i], 2.0), "point {}", i);
    }

    let expected_pairs: usize = a.iter().map(|p| brute_force(&b, *p, 2.0).len()).sum();
    assert_eq!(tree_a.count_pairs_within_radius(&tree_b, 2.0), expected_pairs);
}
