use crate::error::{Result, SearchError};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::PathBuf;
use tracing::{info, warn};

/// Trading periods per year used to annualize daily moments.
pub const TRADING_DAYS: f64 = 252.0;

/// Allowed drift of a weight vector's sum away from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Volatility at or below this is treated as degenerate (Sharpe = -inf).
pub const VOL_EPSILON: f64 = 1e-12;

pub const DEFAULT_COMBINATION_SIZE: usize = 10;
pub const DEFAULT_TRIALS_PER_COMBINATION: usize = 1000;
pub const DEFAULT_MAX_WEIGHT: f64 = 0.3;
pub const DEFAULT_SEED: u64 = 42;
/// Upper bound on rejected Dirichlet draws before a combination is abandoned.
pub const DEFAULT_MAX_REJECTIONS: usize = 100_000;
/// Combinations kept in flight per logical worker when no explicit bound is given.
pub const IN_FLIGHT_PER_THREAD: usize = 4;
pub const DEFAULT_TOP_N: usize = 5;
/// Smallest synthetic universe for `--demo`; grows to the combination size.
pub const DEMO_UNIVERSE_SIZE: usize = 8;
pub const DEMO_ROWS: usize = 252;

pub const RESULTS_FILE_STEM: &str = "portfolio_results";
pub const SUMMARY_FILE_STEM: &str = "performance_metrics";
pub const BACKTEST_FILE_STEM: &str = "backtesting_results";

/// Default universe when no tickers are given: the Dow 30 constituents.
pub const DOW_30: &[&str] = &[
    "MSFT", "AAPL", "NVDA", "AMZN", "WMT", "JPM", "V", "HD", "PG", "JNJ",
    "UNH", "KO", "CRM", "CVX", "CSCO", "IBM", "MCD", "AXP", "MRK", "DIS",
    "VZ", "GS", "CAT", "BA", "AMGN", "HON", "NKE", "SHW", "MMM", "TRV",
];

/// Search parameters, validated once against the universe before any work starts.
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    pub combination_size: usize,
    pub trials_per_combination: usize,
    pub max_weight: f64,
    pub base_seed: u64,
    /// Maximum number of combinations whose moments are held at once.
    pub max_in_flight: usize,
    pub max_rejections: usize,
}

impl SimConfig {
    pub fn new(combination_size: usize, trials_per_combination: usize) -> Self {
        Self {
            combination_size,
            trials_per_combination,
            max_weight: DEFAULT_MAX_WEIGHT,
            base_seed: DEFAULT_SEED,
            max_in_flight: IN_FLIGHT_PER_THREAD * num_cpus::get().max(1),
            max_rejections: DEFAULT_MAX_REJECTIONS,
        }
    }

    pub fn with_max_weight(mut self, max_weight: f64) -> Self {
        self.max_weight = max_weight;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_max_rejections(mut self, max_rejections: usize) -> Self {
        self.max_rejections = max_rejections;
        self
    }

    pub fn validate(&self, universe_size: usize) -> Result<()> {
        let k = self.combination_size;
        if k < 1 || k > universe_size {
            return Err(SearchError::Configuration(format!(
                "combination size {} must be between 1 and the universe size {}",
                k, universe_size
            )));
        }
        if self.trials_per_combination == 0 {
            return Err(SearchError::Configuration(
                "trials per combination must be > 0".to_string(),
            ));
        }
        check_weight_cap(k, self.max_weight)?;
        if self.max_in_flight == 0 {
            return Err(SearchError::Configuration(
                "max in-flight combinations must be > 0".to_string(),
            ));
        }
        if self.max_rejections == 0 {
            return Err(SearchError::Configuration(
                "max rejections must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A cap below 1/k leaves the simplex without any admissible point.
pub fn check_weight_cap(dimension: usize, max_weight: f64) -> Result<()> {
    if !max_weight.is_finite() || max_weight <= 0.0 || max_weight > 1.0 {
        return Err(SearchError::Configuration(format!(
            "max weight {} must lie in (0, 1]",
            max_weight
        )));
    }
    if dimension == 0 {
        return Err(SearchError::Configuration(
            "weight dimension must be > 0".to_string(),
        ));
    }
    // Slack covers only the rounding of a cap written as 1.0 / k.
    let rounding = dimension as f64 * f64::EPSILON;
    if max_weight * (dimension as f64) < 1.0 - rounding {
        return Err(SearchError::Configuration(format!(
            "max weight {} is below 1/{} = {:.6}; no weight vector can satisfy it",
            max_weight,
            dimension,
            1.0 / dimension as f64
        )));
    }
    Ok(())
}

/// Resolves a requested worker count; 0 means every logical CPU.
pub fn resolve_thread_count(requested: usize) -> usize {
    if requested == 0 {
        let num_threads = num_cpus::get().max(1);
        info!("Thread count=auto -> using {} threads (all logical CPU cores)", num_threads);
        num_threads
    } else {
        info!("Thread count={} (requested)", requested);
        requested
    }
}

pub fn build_search_pool(num_threads: usize) -> Result<ThreadPool> {
    let num_threads = num_threads.max(1);
    match ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("optifolio-search-{}", i))
        .build()
    {
        Ok(pool) => {
            info!("Initialized Rayon search pool with {} threads", num_threads);
            Ok(pool)
        }
        Err(e) => {
            warn!("Failed to build Rayon search pool: {}", e);
            Err(SearchError::Configuration(format!(
                "cannot build a {}-thread pool: {}",
                num_threads, e
            )))
        }
    }
}

/// Reads a directory override from the environment, ignoring blank values.
pub fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub fn env_usize(var: &str) -> Option<usize> {
    std::env::var(var).ok().and_then(|v| v.trim().parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_reasonable_config() {
        let cfg = SimConfig::new(3, 100).with_max_weight(0.5);
        assert!(cfg.validate(5).is_ok());
    }

    #[test]
    fn test_validate_rejects_combination_size_out_of_range() {
        let too_big = SimConfig::new(6, 10).with_max_weight(1.0);
        assert!(matches!(too_big.validate(5), Err(SearchError::Configuration(_))));

        let zero = SimConfig::new(0, 10).with_max_weight(1.0);
        assert!(matches!(zero.validate(5), Err(SearchError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_trials_and_bounds() {
        let cfg = SimConfig::new(2, 0).with_max_weight(1.0);
        assert!(matches!(cfg.validate(3), Err(SearchError::Configuration(_))));

        let cfg = SimConfig::new(2, 10).with_max_weight(1.0).with_max_in_flight(0);
        assert!(matches!(cfg.validate(3), Err(SearchError::Configuration(_))));

        let cfg = SimConfig::new(2, 10).with_max_weight(1.0).with_max_rejections(0);
        assert!(matches!(cfg.validate(3), Err(SearchError::Configuration(_))));
    }

    #[test]
    fn test_weight_cap_below_one_over_k_is_rejected() {
        assert!(check_weight_cap(5, 0.19).is_err());
        assert!(check_weight_cap(5, 0.2).is_ok());
        assert!(check_weight_cap(1, 1.0).is_ok());
        assert!(check_weight_cap(3, 0.0).is_err());
        assert!(check_weight_cap(3, 1.5).is_err());
    }

    #[test]
    fn test_weight_cap_just_below_one_over_k_is_rejected() {
        assert!(matches!(check_weight_cap(3, 0.3333333332), Err(SearchError::Configuration(_))));
        assert!(check_weight_cap(7, 0.142857142).is_err());
        for k in 1..=30 {
            assert!(check_weight_cap(k, 1.0 / k as f64).is_ok(), "1/{} should be admissible", k);
        }
        assert!(check_weight_cap(3, f64::NAN).is_err());
    }

    #[test]
    fn test_build_search_pool_uses_requested_threads() {
        let pool = build_search_pool(2).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
