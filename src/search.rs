use crate::combinations::{Combination, CombinationGenerator};
use crate::config::{build_search_pool, SimConfig};
use crate::data::ReturnsMatrix;
use crate::error::{Result, SearchError};
use crate::moments::estimate_moments;
use crate::portfolio::{evaluate, PortfolioStats};
use crate::sampler::WeightSampler;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

// ──────────────────────────────────────────────────────────────────────────────
// Results and Run State
// ──────────────────────────────────────────────────────────────────────────────

/// Best weighting found for one combination.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationResult {
    pub combination: Combination,
    pub weights: Vec<f64>,
    pub stats: PortfolioStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombinationPhase {
    Pending,
    MomentsComputed,
    TrialsRunning,
    BestSelected,
}

/// Shared stop signal checked between units of work.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchSummary {
    pub combinations: usize,
    pub trials_per_combination: usize,
    pub total_trials: usize,
    pub degenerate_trials: usize,
    pub threads: usize,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl SearchSummary {
    pub fn trials_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.total_trials as f64 / secs } else { 0.0 }
    }
}

#[derive(Clone, Debug)]
pub struct SearchOutcome {
    /// One entry per combination, in no particular order.
    pub results: Vec<SimulationResult>,
    pub summary: SearchSummary,
}

// ──────────────────────────────────────────────────────────────────────────────
// Trial Reduction
// ──────────────────────────────────────────────────────────────────────────────

struct Trial {
    index: usize,
    weights: Vec<f64>,
    stats: PortfolioStats,
}

/// Running reduction over a combination's trials.
struct TrialReduction {
    best: Trial,
    degenerate: usize,
}

/// Higher Sharpe wins; equal Sharpe goes to the lower trial index.
fn prefer(a: Trial, b: Trial) -> Trial {
    match a.stats.sharpe.total_cmp(&b.stats.sharpe) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => {
            if a.index <= b.index { a } else { b }
        }
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Seed for one trial, a pure function of the run seed, combination rank and trial index.
pub fn trial_seed(base_seed: u64, combination_rank: usize, trial_index: usize) -> u64 {
    let h = splitmix64(base_seed);
    let h = splitmix64(h ^ combination_rank as u64);
    splitmix64(h ^ trial_index as u64)
}

// ──────────────────────────────────────────────────────────────────────────────
// Parallel Search Engine
// ──────────────────────────────────────────────────────────────────────────────

/// Two-level parallel search: combinations in bounded windows, trials within each.
pub struct ParallelSearchEngine<'a> {
    returns: &'a ReturnsMatrix,
    config: SimConfig,
    pool: ThreadPool,
    cancel: CancelFlag,
    deadline: Option<Instant>,
}

impl<'a> ParallelSearchEngine<'a> {
    pub fn new(returns: &'a ReturnsMatrix, config: SimConfig, num_threads: usize) -> Result<Self> {
        config.validate(returns.tickers().len())?;
        let pool = build_search_pool(num_threads)?;
        Ok(Self {
            returns,
            config,
            pool,
            cancel: CancelFlag::new(),
            deadline: None,
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.cancel.cancel();
            return Err(SearchError::Cancelled);
        }
        Ok(())
    }

    pub fn run(&self) -> Result<SearchOutcome> {
        let started = Instant::now();
        let cfg = &self.config;
        let mut generator = CombinationGenerator::new(self.returns.tickers(), cfg.combination_size)?;
        let sampler = WeightSampler::new(cfg.combination_size, cfg.max_weight, cfg.max_rejections)?;
        let total = generator.total();

        info!(
            "Searching {} combinations of {} from {} tickers, {} trials each (max weight {:.2}, seed {})",
            total,
            cfg.combination_size,
            self.returns.tickers().len(),
            cfg.trials_per_combination,
            cfg.max_weight,
            cfg.base_seed
        );

        let mut results = Vec::with_capacity(total.min(1 << 20));
        let mut degenerate_trials = 0usize;
        let log_every = (total / 20).max(1);
        let mut next_log = log_every;

        loop {
            self.check_cancelled()?;
            let window: Vec<Combination> = generator.by_ref().take(cfg.max_in_flight).collect();
            if window.is_empty() {
                break;
            }

            let outcomes: Vec<Result<(SimulationResult, usize)>> = self.pool.install(|| {
                window
                    .into_par_iter()
                    .map(|combination| self.search_combination(combination, &sampler))
                    .collect()
            });
            // Windows come back in rank order, so the first error reported is deterministic.
            for outcome in outcomes {
                let (result, degenerate) = outcome?;
                degenerate_trials += degenerate;
                results.push(result);
            }

            if results.len() >= next_log || results.len() == total {
                info!(
                    "Progress: {}/{} combinations ({:.1}%)",
                    results.len(),
                    total,
                    results.len() as f64 / total.max(1) as f64 * 100.0
                );
                next_log = results.len() + log_every;
            }
        }

        let summary = SearchSummary {
            combinations: results.len(),
            trials_per_combination: cfg.trials_per_combination,
            total_trials: results.len() * cfg.trials_per_combination,
            degenerate_trials,
            threads: self.pool.current_num_threads(),
            elapsed: started.elapsed(),
        };
        if degenerate_trials > 0 {
            debug!("{} trials had degenerate volatility and were excluded", degenerate_trials);
        }
        info!(
            "Search finished: {} combinations, {} trials in {:.2}s ({:.0} trials/s)",
            summary.combinations,
            summary.total_trials,
            summary.elapsed.as_secs_f64(),
            summary.trials_per_second()
        );
        Ok(SearchOutcome { results, summary })
    }

    fn search_combination(
        &self,
        combination: Combination,
        sampler: &WeightSampler,
    ) -> Result<(SimulationResult, usize)> {
        self.check_cancelled()?;
        let label = combination.label();
        trace!("{} {:?}", label, CombinationPhase::Pending);

        let moments = estimate_moments(self.returns, &combination)?;
        trace!("{} {:?}", label, CombinationPhase::MomentsComputed);

        let rank = combination.rank;
        let base_seed = self.config.base_seed;
        trace!("{} {:?}", label, CombinationPhase::TrialsRunning);
        let reduced = (0..self.config.trials_per_combination)
            .into_par_iter()
            .map(|index| -> Result<TrialReduction> {
                let mut rng = StdRng::seed_from_u64(trial_seed(base_seed, rank, index));
                let weights = sampler.sample(&mut rng, &label)?;
                let stats = evaluate(&weights, &moments)?;
                let degenerate = usize::from(stats.is_degenerate());
                Ok(TrialReduction { best: Trial { index, weights, stats }, degenerate })
            })
            .try_reduce_with(|a, b| {
                Ok(TrialReduction {
                    best: prefer(a.best, b.best),
                    degenerate: a.degenerate + b.degenerate,
                })
            })
            .ok_or_else(|| SearchError::Configuration("trials per combination must be > 0".to_string()))??;

        trace!(
            "{} {:?}: trial {} sharpe {:.4}",
            label,
            CombinationPhase::BestSelected,
            reduced.best.index,
            reduced.best.stats.sharpe
        );
        Ok((
            SimulationResult {
                combination,
                weights: reduced.best.weights,
                stats: reduced.best.stats,
            },
            reduced.degenerate,
        ))
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
