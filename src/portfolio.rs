use crate::config::{VOL_EPSILON, WEIGHT_TOLERANCE};
use crate::error::{Result, SearchError};
use crate::moments::MomentEstimate;
use serde::Serialize;

// ──────────────────────────────────────────────────────────────────────────────
// Portfolio Statistics
// ──────────────────────────────────────────────────────────────────────────────

/// Annualized performance of one weighting of a combination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub annual_return: f64,
    pub annual_vol: f64,
    /// Return over volatility with a zero risk-free rate; `-inf` when volatility is degenerate.
    pub sharpe: f64,
}

impl PortfolioStats {
    pub fn is_degenerate(&self) -> bool {
        self.sharpe == f64::NEG_INFINITY
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Portfolio Math
// ──────────────────────────────────────────────────────────────────────────────

pub fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

pub fn portfolio_variance(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += weights[i] * weights[j] * cov[i][j];
        }
    }
    var
}

pub fn sharpe_ratio(annual_return: f64, annual_vol: f64) -> f64 {
    if annual_vol.is_finite() && annual_vol > VOL_EPSILON && annual_return.is_finite() {
        annual_return / annual_vol
    } else {
        f64::NEG_INFINITY
    }
}

pub fn evaluate(weights: &[f64], moments: &MomentEstimate) -> Result<PortfolioStats> {
    if weights.len() != moments.dimension() {
        return Err(SearchError::DataContract(format!(
            "{} weights for a {}-asset moment estimate",
            weights.len(),
            moments.dimension()
        )));
    }
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(SearchError::DataContract(format!(
            "weights sum to {}, expected 1",
            total
        )));
    }
    let annual_return = portfolio_return(weights, moments.mean());
    // Round-off can push a near-singular quadratic form slightly below zero.
    let annual_vol = portfolio_variance(weights, moments.covariance()).max(0.0).sqrt();
    Ok(PortfolioStats {
        annual_return,
        annual_vol,
        sharpe: sharpe_ratio(annual_return, annual_vol),
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
