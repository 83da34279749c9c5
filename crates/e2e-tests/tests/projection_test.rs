//! Locality of the landmark projection.
//!
//! High-dimensional distances and projected distances should agree in
//! rank order. Data is drawn near a low-rank subspace, the structure real
//! embedding collections have; the correlation is averaged over several
//! landmark seeds because any single seed can be unlucky.

use rand::rngs::StdRng;
use rand::SeedableRng;

use e2e_tests::{euclidean, low_rank_vectors, perturb, spearman};
use landmark_projection::Projector;

const DIM: usize = 128;
const SAMPLE: usize = 1_000;
const SPEARMAN_THRESHOLD: f64 = 0.6;

fn projected_distance(a: &[f32; 3], b: &[f32; 3]) -> f64 {
    euclidean(a, b)
}

fn pairwise<T>(items: &[T], distance: impl Fn(&T, &T) -> f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(items.len() * items.len().saturating_sub(1) / 2);
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            out.push(distance(&items[i], &items[j]));
        }
    }
    out
}

/// 1,000 vectors within noise 0.01 of a random 2-dimensional subspace of
/// R^128. On i.i.d. uniform vectors pairwise distances concentrate around
/// one value and their rank order carries no structure for three axes to
/// keep, so the correlation would measure noise rather than locality.
#[test]
fn test_projection_preserves_distance_ordering() {
    let mut rng = StdRng::seed_from_u64(68);
    let vectors = low_rank_vectors(&mut rng, SAMPLE, DIM, 2, 0.01);

    let high = pairwise(&vectors, |a, b| euclidean(a, b));

    let seeds = [0x1A4D_3A2C_u64, 7, 42];
    let correlations: Vec<f64> = seeds
        .iter()
        .map(|&seed| {
            let projector = Projector::new(DIM, seed, false).unwrap();
            let coords: Vec<[f32; 3]> = vectors
                .iter()
                .map(|v| projector.project(v).unwrap())
                .collect();
            spearman(&high, &pairwise(&coords, projected_distance))
        })
        .collect();
    let mean = correlations.iter().sum::<f64>() / correlations.len() as f64;

    assert!(
        mean >= SPEARMAN_THRESHOLD,
        "mean Spearman {:.3} below {} (per seed: {:?})",
        mean,
        SPEARMAN_THRESHOLD,
        correlations
    );
    // Every seed carries real signal
    assert!(correlations.iter().all(|&c| c > 0.2), "{:?}", correlations);
}

#[test]
fn test_small_perturbations_stay_local() {
    let mut rng = StdRng::seed_from_u64(69);
    let projector = Projector::new(DIM, 0x1A4D_3A2C, true).unwrap();
    let base = low_rank_vectors(&mut rng, 200, DIM, 8, 0.1);

    let mut near = 0.0;
    let mut far = 0.0;
    for pair in base.windows(2) {
        let a = projector.project(&pair[0]).unwrap();
        let nudged = projector.project(&perturb(&mut rng, &pair[0], 0.001)).unwrap();
        let other = projector.project(&pair[1]).unwrap();
        near += projected_distance(&a, &nudged);
        far += projected_distance(&a, &other);
    }
    assert!(near * 50.0 < far, "near {:.5} far {:.5}", near, far);
}

#[test]
fn test_same_seed_is_reproducible_across_instances() {
    let mut rng = StdRng::seed_from_u64(70);
    let vectors = low_rank_vectors(&mut rng, 50, DIM, 4, 0.1);
    let a = Projector::new(DIM, 99, true).unwrap();
    let b = Projector::new(DIM, 99, true).unwrap();
    assert_eq!(a.fingerprint(), b.fingerprint());
    for v in &vectors {
        assert_eq!(a.project(v).unwrap(), b.project(v).unwrap());
    }
}
