//! Seeded landmark basis and projection.
//!
//! Landmarks are `k` pseudo-random vectors drawn uniformly from `[-1, 1]^D`
//! by a ChaCha8 generator seeded with a fixed value, then orthonormalized
//! with modified Gram–Schmidt in `f64`. Coordinate `i` of a projection is
//! the dot product of the (optionally L2-normalized) input with landmark
//! `i`.

use landmark_types::{Coord, LandmarkRecord, ProjectionSettings, PROJECTED_DIMS};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ProjectionError;

/// Domain tag mixed into the landmark fingerprint.
const BASIS_DIGEST_TAG: &[u8] = b"landmark.basis.v1";

/// Redraws allowed per landmark when a draw is nearly dependent on earlier ones.
const MAX_DRAWS_PER_LANDMARK: usize = 16;

/// Residual norm below which a draw counts as dependent.
const MIN_RESIDUAL_NORM: f64 = 1e-6;

/// Check shape and values of an input vector.
pub fn validate_vector(vector: &[f32], expected_dim: usize) -> Result<(), ProjectionError> {
    if vector.len() != expected_dim {
        return Err(ProjectionError::DimensionMismatch {
            expected: expected_dim,
            actual: vector.len(),
        });
    }
    if let Some((i, v)) = vector.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ProjectionError::InvalidVector(format!(
            "component {} is {}",
            i, v
        )));
    }
    Ok(())
}

/// Pure projection from `D` dimensions to `k` landmark axes.
#[derive(Debug, Clone)]
pub struct Projector {
    dimension: usize,
    seed: u64,
    normalize: bool,
    landmarks: Vec<Vec<f64>>,
    fingerprint: String,
}

impl Projector {
    /// Generate landmarks for `dimension` from `seed`.
    pub fn new(dimension: usize, seed: u64, normalize: bool) -> Result<Self, ProjectionError> {
        if dimension < PROJECTED_DIMS {
            return Err(ProjectionError::InvalidConfig(format!(
                "dimension {} is smaller than the {} landmark axes",
                dimension, PROJECTED_DIMS
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut landmarks: Vec<Vec<f64>> = Vec::with_capacity(PROJECTED_DIMS);

        while landmarks.len() < PROJECTED_DIMS {
            let mut accepted = None;
            for _ in 0..MAX_DRAWS_PER_LANDMARK {
                let mut v: Vec<f64> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
                // Modified Gram-Schmidt: subtract projections one basis vector at a time
                for e in &landmarks {
                    let d = dot(&v, e);
                    for (x, y) in v.iter_mut().zip(e) {
                        *x -= d * y;
                    }
                }
                let norm = dot(&v, &v).sqrt();
                if norm > MIN_RESIDUAL_NORM {
                    for x in v.iter_mut() {
                        *x /= norm;
                    }
                    accepted = Some(v);
                    break;
                }
            }
            match accepted {
                Some(v) => landmarks.push(v),
                None => {
                    return Err(ProjectionError::InvalidConfig(format!(
                        "could not draw independent landmark {} for seed {}",
                        landmarks.len(),
                        seed
                    )))
                }
            }
        }

        let fingerprint = fingerprint(seed, dimension, normalize, &landmarks);
        debug!(dimension, seed, fingerprint = %&fingerprint[..12], "Generated landmarks");

        Ok(Self {
            dimension,
            seed,
            normalize,
            landmarks,
            fingerprint,
        })
    }

    pub fn from_settings(settings: &ProjectionSettings) -> Result<Self, ProjectionError> {
        Self::new(settings.dimension, settings.seed, settings.normalize)
    }

    /// Restore a projector from persisted landmarks, verifying the fingerprint.
    pub fn from_record(record: &LandmarkRecord) -> Result<Self, ProjectionError> {
        if record.vectors.len() != PROJECTED_DIMS
            || record.vectors.iter().any(|v| v.len() != record.dimension)
        {
            return Err(ProjectionError::InvalidConfig(format!(
                "stored landmarks have the wrong shape for dimension {}",
                record.dimension
            )));
        }
        let computed = fingerprint(record.seed, record.dimension, record.normalize, &record.vectors);
        if computed != record.fingerprint {
            return Err(ProjectionError::FingerprintMismatch {
                stored: record.fingerprint.clone(),
                computed,
            });
        }
        Ok(Self {
            dimension: record.dimension,
            seed: record.seed,
            normalize: record.normalize,
            landmarks: record.vectors.clone(),
            fingerprint: computed,
        })
    }

    /// Persistable form of this basis.
    pub fn to_record(&self, version: u32) -> LandmarkRecord {
        LandmarkRecord {
            version,
            seed: self.seed,
            dimension: self.dimension,
            normalize: self.normalize,
            fingerprint: self.fingerprint.clone(),
            vectors: self.landmarks.clone(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Project a vector onto the landmark axes.
    ///
    /// Pure: the result depends only on `vector` and the fixed landmarks.
    pub fn project(&self, vector: &[f32]) -> Result<Coord, ProjectionError> {
        validate_vector(vector, self.dimension)?;

        let scale = if self.normalize {
            let norm = vector
                .iter()
                .map(|x| (*x as f64) * (*x as f64))
                .sum::<f64>()
                .sqrt();
            if norm == 0.0 {
                return Err(ProjectionError::ZeroVector);
            }
            1.0 / norm
        } else {
            1.0
        };

        let mut coord = [0.0f32; PROJECTED_DIMS];
        for (c, landmark) in coord.iter_mut().zip(&self.landmarks) {
            let d: f64 = vector
                .iter()
                .zip(landmark)
                .map(|(x, l)| (*x as f64) * l)
                .sum();
            *c = (d * scale) as f32;
        }
        Ok(coord)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    pub fn landmarks(&self) -> &[Vec<f64>] {
        &self.landmarks
    }

    /// Hex SHA-256 identifying this basis.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn fingerprint(seed: u64, dimension: usize, normalize: bool, landmarks: &[Vec<f64>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(BASIS_DIGEST_TAG);
    hasher.update(seed.to_le_bytes());
    hasher.update((dimension as u64).to_le_bytes());
    hasher.update([normalize as u8]);
    for landmark in landmarks {
        for x in landmark {
            hasher.update(x.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_landmarks_are_orthonormal() {
        let p = Projector::new(256, 7, false).unwrap();
        let l = p.landmarks();
        for i in 0..PROJECTED_DIMS {
            assert!((dot(&l[i], &l[i]) - 1.0).abs() < 1e-12);
            for j in (i + 1)..PROJECTED_DIMS {
                assert!(dot(&l[i], &l[j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_same_seed_same_landmarks() {
        let a = Projector::new(64, 42, true).unwrap();
        let b = Projector::new(64, 42, true).unwrap();
        assert_eq!(a.landmarks(), b.landmarks());
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Projector::new(64, 43, true).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_projection_is_bit_identical() {
        let p = Projector::new(128, 1, true).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let v = random_vector(&mut rng, 128);
            let a = p.project(&v).unwrap();
            let b = p.project(&v).unwrap();
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let p = Projector::new(16, 1, false).unwrap();
        let err = p.project(&[0.0; 15]).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::DimensionMismatch {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let p = Projector::new(4, 1, false).unwrap();
        assert!(matches!(
            p.project(&[0.0, f32::NAN, 0.0, 0.0]),
            Err(ProjectionError::InvalidVector(_))
        ));
        assert!(matches!(
            p.project(&[f32::INFINITY, 0.0, 0.0, 0.0]),
            Err(ProjectionError::InvalidVector(_))
        ));
    }

    #[test]
    fn test_zero_vector_with_normalization() {
        let p = Projector::new(8, 1, true).unwrap();
        assert_eq!(p.project(&[0.0; 8]), Err(ProjectionError::ZeroVector));

        let raw = Projector::new(8, 1, false).unwrap();
        assert_eq!(raw.project(&[0.0; 8]).unwrap(), [0.0; 3]);
    }

    #[test]
    fn test_small_perturbation_small_move() {
        let p = Projector::new(128, 3, false).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let v = random_vector(&mut rng, 128);
        let mut w = v.clone();
        w[17] += 1e-3;
        let a = p.project(&v).unwrap();
        let b = p.project(&w).unwrap();
        let moved: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt();
        // Orthonormal rows: the projection is 1-Lipschitz
        assert!(moved <= 1e-3 + 1e-6);
    }

    #[test]
    fn test_normalized_coordinates_in_unit_ball() {
        let p = Projector::new(64, 11, true).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            let v: Vec<f32> = random_vector(&mut rng, 64).iter().map(|x| x * 100.0).collect();
            let c = p.project(&v).unwrap();
            let norm: f32 = c.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!(norm <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_record_roundtrip_and_tamper() {
        let p = Projector::new(32, 99, true).unwrap();
        let record = p.to_record(1);
        let restored = Projector::from_record(&record).unwrap();
        assert_eq!(restored.fingerprint(), p.fingerprint());
        let v = vec![0.5f32; 32];
        assert_eq!(restored.project(&v).unwrap(), p.project(&v).unwrap());

        let mut tampered = record.clone();
        tampered.vectors[0][0] += 1e-9;
        assert!(matches!(
            Projector::from_record(&tampered),
            Err(ProjectionError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_dimension_too_small() {
        assert!(matches!(
            Projector::new(2, 1, false),
            Err(ProjectionError::InvalidConfig(_))
        ));
    }
}
