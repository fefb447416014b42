use crate::config::check_weight_cap;
use crate::error::{Result, SearchError};
use rand::Rng;
use rand_distr::{Distribution, Gamma};

/// Draws weight vectors uniformly from the simplex, rejecting any that breach the cap.
///
/// Normalized Gamma(1, 1) draws give a symmetric Dirichlet(1, .., 1) sample.
#[derive(Clone, Debug)]
pub struct WeightSampler {
    dimension: usize,
    max_weight: f64,
    max_rejections: usize,
    gamma: Gamma<f64>,
}

impl WeightSampler {
    pub fn new(dimension: usize, max_weight: f64, max_rejections: usize) -> Result<Self> {
        check_weight_cap(dimension, max_weight)?;
        if max_rejections == 0 {
            return Err(SearchError::Configuration(
                "max rejections must be > 0".to_string(),
            ));
        }
        let gamma = Gamma::new(1.0, 1.0)
            .map_err(|e| SearchError::Configuration(format!("gamma distribution: {}", e)))?;
        Ok(Self { dimension, max_weight, max_rejections, gamma })
    }

    /// Returns one admissible weight vector, or `SamplingExhausted` once the
    /// rejection budget is spent. `combination` only labels the error.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, combination: &str) -> Result<Vec<f64>> {
        let mut raw = vec![0.0; self.dimension];
        for _ in 0..self.max_rejections {
            for v in raw.iter_mut() {
                *v = self.gamma.sample(rng);
            }
            let sum: f64 = raw.iter().sum();
            if !(sum > 0.0 && sum.is_finite()) {
                continue;
            }
            if raw.iter().all(|v| v / sum <= self.max_weight) {
                return Ok(raw.iter().map(|v| v / sum).collect());
            }
        }
        Err(SearchError::SamplingExhausted {
            combination: combination.to_string(),
            attempts: self.max_rejections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WEIGHT_TOLERANCE;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_weights_sum_to_one_and_respect_cap() {
        let sampler = WeightSampler::new(5, 0.3, 100_000).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..10_000 {
            let w = sampler.sample(&mut rng, "test").unwrap();
            assert_eq!(w.len(), 5);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < WEIGHT_TOLERANCE, "Weights should sum to 1.0, got {}", sum);
            assert!(w.iter().all(|&v| v >= 0.0 && v <= 0.3), "Weight out of bounds: {:?}", w);
        }
    }

    #[test]
    fn test_single_asset_gets_full_weight() {
        let sampler = WeightSampler::new(1, 1.0, 10).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sampler.sample(&mut rng, "A").unwrap(), vec![1.0]);
    }

    #[test]
    fn test_cap_below_one_over_k_fails_before_sampling() {
        let err = WeightSampler::new(5, 0.1, 100).unwrap_err();
        assert!(matches!(err, SearchError::Configuration(_)));
    }

    #[test]
    fn test_tight_cap_exhausts_retry_budget() {
        // 0.34 over three assets is admissible but very unlikely per draw.
        let sampler = WeightSampler::new(3, 0.34, 5).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let mut exhausted = false;
        for _ in 0..50 {
            if let Err(e) = sampler.sample(&mut rng, "A-B-C") {
                assert_eq!(
                    e,
                    SearchError::SamplingExhausted { combination: "A-B-C".to_string(), attempts: 5 }
                );
                exhausted = true;
                break;
            }
        }
        assert!(exhausted, "a near-1/k cap with 5 retries should exhaust at least once");
    }

    #[test]
    fn test_same_seed_same_draw() {
        let sampler = WeightSampler::new(4, 0.5, 1000).unwrap();
        let a = sampler.sample(&mut StdRng::seed_from_u64(77), "x").unwrap();
        let b = sampler.sample(&mut StdRng::seed_from_u64(77), "x").unwrap();
        assert_eq!(a, b);
    }
}
