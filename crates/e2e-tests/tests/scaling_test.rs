//! Stage-1 cost as the collection grows.
//!
//! Work is measured in tree nodes expanded rather than wall time so the
//! test is stable on loaded CI machines. `scale_bench` measures latency.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use e2e_tests::random_coords;
use landmark_spatial::{RTreeIndex, SpatialIndex};
use landmark_types::{Coord, IndexParams};

const POOL: usize = 100;
const QUERIES: usize = 50;

fn mean_nodes_visited(size: usize, rng: &mut StdRng) -> f64 {
    let index = RTreeIndex::new(IndexParams::default()).unwrap();
    index
        .rebuild(random_coords(rng, size, 0.9), IndexParams::default())
        .unwrap();
    assert_eq!(index.len(), size);

    let mut total = 0usize;
    for _ in 0..QUERIES {
        let center: Coord = [
            rng.random_range(-0.8..0.8),
            rng.random_range(-0.8..0.8),
            rng.random_range(-0.8..0.8),
        ];
        let result = index.range_query(&center, 4.0, POOL);
        assert_eq!(result.len(), POOL);
        total += result.nodes_visited;
    }
    total as f64 / QUERIES as f64
}

#[test]
fn test_stage_one_work_grows_sublinearly() {
    let mut rng = StdRng::seed_from_u64(1_024);
    let sizes = [1_000, 4_000, 16_000, 64_000];
    let visited: Vec<f64> = sizes
        .iter()
        .map(|&n| mean_nodes_visited(n, &mut rng))
        .collect();

    // 64x the atoms for a fixed pool: a linear scan would cost 64x
    let growth = visited[3] / visited[0];
    assert!(
        growth < 3.0,
        "nodes visited grew {:.2}x from 1K to 64K: {:?}",
        growth,
        visited
    );
    for pair in visited.windows(2) {
        assert!(pair[1] < pair[0] * 2.0, "{:?}", visited);
    }
}
