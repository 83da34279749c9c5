//! End-to-end test infrastructure for landmark.
//!
//! Provides a shared TestHarness over a real engine and seeded data
//! generators for the retrieval, locality, and tuning scenarios.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::Rng;

use landmark_service::Engine;
use landmark_types::{AtomId, Coord, Settings};

/// Shared test harness for E2E tests.
///
/// Owns a temp directory and an engine opened over it. Background tasks
/// are not started; tests drive the engine directly.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub engine: Engine,
}

impl TestHarness {
    /// Engine over `dimension`-dimensional vectors with default settings.
    pub fn new(dimension: usize) -> Self {
        Self::with_settings(test_settings(dimension))
    }

    pub fn with_settings(settings: Settings) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let engine =
            Engine::open_at(settings, temp_dir.path()).expect("Failed to open test engine");
        Self {
            _temp_dir: temp_dir,
            engine,
        }
    }

    /// Close the engine and open a new one over the same directory.
    pub fn reopen(self, settings: Settings) -> Self {
        let TestHarness { _temp_dir, engine } = self;
        drop(engine);
        let engine =
            Engine::open_at(settings, _temp_dir.path()).expect("Failed to reopen test engine");
        Self { _temp_dir, engine }
    }

    /// Insert every vector and return ids in input order.
    pub fn insert_all(&self, vectors: &[Vec<f32>], prefix: &str) -> Vec<AtomId> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                self.engine
                    .insert(v.clone(), &format!("{}/{}", prefix, i))
                    .expect("Failed to insert vector")
            })
            .collect()
    }
}

/// Settings for a test engine. Tuning stays off unless a test starts it.
pub fn test_settings(dimension: usize) -> Settings {
    let mut settings = Settings::default();
    settings.projection.dimension = dimension;
    settings.tuning.enabled = false;
    settings.tuning.retry_initial_ms = 1;
    settings
}

/// Standard normal sample (Box-Muller).
pub fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

pub fn gaussian_vector(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    (0..dimension).map(|_| gaussian(rng)).collect()
}

/// `base` plus isotropic noise with standard deviation `sigma`.
pub fn perturb(rng: &mut StdRng, base: &[f32], sigma: f32) -> Vec<f32> {
    base.iter().map(|x| x + sigma * gaussian(rng)).collect()
}

/// A collection with one planted cluster hidden among random vectors.
pub struct PlantedCluster {
    pub vectors: Vec<Vec<f32>>,
    pub center: Vec<f32>,
    /// Indices into `vectors` that belong to the cluster
    pub members: HashSet<usize>,
}

/// `total` vectors, `cluster_size` of them drawn tightly around one center.
/// Members are scattered through the collection rather than contiguous.
pub fn planted_cluster(
    rng: &mut StdRng,
    total: usize,
    cluster_size: usize,
    dimension: usize,
    sigma: f32,
) -> PlantedCluster {
    let center = gaussian_vector(rng, dimension);
    let stride = (total / cluster_size.max(1)).max(1);
    let mut vectors = Vec::with_capacity(total);
    let mut members = HashSet::new();
    for i in 0..total {
        if i % stride == 0 && members.len() < cluster_size {
            members.insert(i);
            vectors.push(perturb(rng, &center, sigma));
        } else {
            vectors.push(gaussian_vector(rng, dimension));
        }
    }
    PlantedCluster {
        vectors,
        center,
        members,
    }
}

/// `clusters * per_cluster` vectors grouped around random centers.
/// Returns the vectors and the centers.
pub fn clustered_vectors(
    rng: &mut StdRng,
    clusters: usize,
    per_cluster: usize,
    dimension: usize,
    sigma: f32,
) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let centers: Vec<Vec<f32>> = (0..clusters)
        .map(|_| gaussian_vector(rng, dimension))
        .collect();
    let vectors = centers
        .iter()
        .flat_map(|c| (0..per_cluster).map(|_| perturb(rng, c, sigma)).collect::<Vec<_>>())
        .collect();
    (vectors, centers)
}

/// Vectors near a random `rank`-dimensional subspace, the way real
/// embeddings concentrate on a few dominant directions.
pub fn low_rank_vectors(
    rng: &mut StdRng,
    count: usize,
    dimension: usize,
    rank: usize,
    sigma: f32,
) -> Vec<Vec<f32>> {
    let basis: Vec<Vec<f32>> = (0..rank)
        .map(|_| {
            let v = gaussian_vector(rng, dimension);
            let n = norm(&v);
            v.into_iter().map(|x| x / n).collect()
        })
        .collect();
    (0..count)
        .map(|_| {
            let weights: Vec<f32> = (0..rank).map(|_| gaussian(rng)).collect();
            (0..dimension)
                .map(|d| {
                    let signal: f32 = basis.iter().zip(&weights).map(|(b, w)| b[d] * w).sum();
                    signal + sigma * gaussian(rng)
                })
                .collect()
        })
        .collect()
}

/// Uniform random coordinates inside `[-extent, extent]^3`.
pub fn random_coords(rng: &mut StdRng, count: usize, extent: f32) -> Vec<(AtomId, Coord)> {
    (0..count)
        .map(|i| {
            let coord: Coord = [
                rng.random_range(-extent..extent),
                rng.random_range(-extent..extent),
                rng.random_range(-extent..extent),
            ];
            (AtomId::compute(&coord, &format!("coord/{}", i)), coord)
        })
        .collect()
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm(a) * norm(b))
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Exact top-k by cosine similarity, as indices into `vectors`.
pub fn brute_force_top_k(query: &[f32], vectors: &[Vec<f32>], k: usize) -> Vec<usize> {
    let mut scored: Vec<(f32, usize)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (cosine(query, v), i))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, i)| i).collect()
}

fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    // Ties share the mean of their positions
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let mean = (start + end - 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = mean;
        }
        start = end;
    }
    ranks
}

/// Spearman rank correlation of two equally long samples.
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "samples must have equal length");
    let ra = ranks(a);
    let rb = ranks(b);
    let n = ra.len() as f64;
    let mean_a = ra.iter().sum::<f64>() / n;
    let mean_b = rb.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in ra.iter().zip(&rb) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a) * (x - mean_a);
        var_b += (y - mean_b) * (y - mean_b);
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_spearman_bounds() {
        let a = [1.0, 2.0, 3.0, 4.0];
        assert!((spearman(&a, &[10.0, 20.0, 30.0, 40.0]) - 1.0).abs() < 1e-12);
        assert!((spearman(&a, &[4.0, 3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_planted_cluster_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = planted_cluster(&mut rng, 100, 10, 8, 0.05);
        assert_eq!(data.vectors.len(), 100);
        assert_eq!(data.members.len(), 10);
        for &i in &data.members {
            assert!(cosine(&data.vectors[i], &data.center) > 0.9);
        }
    }
}
