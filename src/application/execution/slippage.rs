use rand::Rng;

/// Quantity tiers for the slippage spread: small orders see 5 bps of
/// standard deviation, large ones 15 bps.
const SMALL_ORDER_SIGMA: f64 = 0.0005;
const LARGE_ORDER_SIGMA: f64 = 0.0015;
const LARGE_ORDER_THRESHOLD: i64 = 1000;

/// Trait defining a slippage simulation model.
pub trait SlippageModel: Send + Sync {
    /// Draw the relative price perturbation for one execution.
    fn epsilon(&self, quantity: i64) -> f64;
}

/// Zero-mean Gaussian slippage with a quantity-dependent sigma.
#[derive(Debug, Clone, Default)]
pub struct GaussianSlippage;

impl GaussianSlippage {
    pub fn new() -> Self {
        Self
    }

    fn sigma(quantity: i64) -> f64 {
        if quantity < LARGE_ORDER_THRESHOLD {
            SMALL_ORDER_SIGMA
        } else {
            LARGE_ORDER_SIGMA
        }
    }
}

impl SlippageModel for GaussianSlippage {
    fn epsilon(&self, quantity: i64) -> f64 {
        let mut rng = rand::rng();
        // Box-Muller transform over two uniform draws.
        let u1: f64 = rng.random_range(f64::EPSILON..1.0);
        let u2: f64 = rng.random_range(0.0..1.0);
        let standard_normal = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        standard_normal * Self::sigma(quantity)
    }
}

/// Fixed perturbation, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSlippage(pub f64);

impl SlippageModel for FixedSlippage {
    fn epsilon(&self, _quantity: i64) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigma_tiers() {
        assert_eq!(GaussianSlippage::sigma(1), SMALL_ORDER_SIGMA);
        assert_eq!(GaussianSlippage::sigma(999), SMALL_ORDER_SIGMA);
        assert_eq!(GaussianSlippage::sigma(1000), LARGE_ORDER_SIGMA);
        assert_eq!(GaussianSlippage::sigma(50_000), LARGE_ORDER_SIGMA);
    }

    #[test]
    fn test_epsilon_stays_in_plausible_range() {
        let model = GaussianSlippage::new();
        for _ in 0..1000 {
            let eps = model.epsilon(100);
            // Six sigmas of headroom; beyond that the draw is broken.
            assert!(eps.abs() < 6.0 * SMALL_ORDER_SIGMA, "epsilon {}", eps);
        }
    }

    #[test]
    fn test_epsilon_is_roughly_zero_mean() {
        let model = GaussianSlippage::new();
        let n = 5000;
        let mean: f64 = (0..n).map(|_| model.epsilon(100)).sum::<f64>() / f64::from(n);
        assert!(mean.abs() < 3.0 * SMALL_ORDER_SIGMA / f64::from(n).sqrt() * 5.0);
    }
}
