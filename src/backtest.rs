use crate::data::ReturnsMatrix;
use crate::moments::estimate_for_tickers;
use crate::portfolio::{evaluate, PortfolioStats};
use crate::report::join_weights;
use crate::search::SimulationResult;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Out-of-sample re-evaluation of the winning portfolio.
#[derive(Clone, Debug)]
pub struct BacktestReport {
    pub tickers: Vec<String>,
    /// Weights renormalized over the tickers present out of sample.
    pub weights: Vec<f64>,
    pub in_sample: PortfolioStats,
    pub out_of_sample: PortfolioStats,
    pub equal_weight: PortfolioStats,
    pub dropped: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BacktestRow<'a> {
    #[serde(rename = "Period")]
    period: &'a str,
    #[serde(rename = "AnnualReturn")]
    annual_return: f64,
    #[serde(rename = "AnnualVol")]
    annual_vol: f64,
    #[serde(rename = "Sharpe")]
    sharpe: f64,
    #[serde(rename = "Tickers")]
    tickers: String,
    #[serde(rename = "Weights")]
    weights: String,
}

pub fn evaluate_out_of_sample(best: &SimulationResult, returns: &ReturnsMatrix) -> Result<BacktestReport> {
    let mut tickers = Vec::new();
    let mut raw_weights = Vec::new();
    let mut dropped = Vec::new();
    for (ticker, &w) in best.combination.tickers.iter().zip(best.weights.iter()) {
        if returns.contains(ticker) {
            tickers.push(ticker.clone());
            raw_weights.push(w);
        } else {
            warn!("{} has no out-of-sample data, removing it from the portfolio", ticker);
            dropped.push(ticker.clone());
        }
    }
    if tickers.is_empty() {
        bail!("none of {} has out-of-sample data", best.combination.label());
    }

    let total: f64 = raw_weights.iter().sum();
    if total <= 0.0 {
        bail!("remaining weights of {} sum to zero", best.combination.label());
    }
    let weights: Vec<f64> = raw_weights.iter().map(|w| w / total).collect();

    let moments = estimate_for_tickers(returns, &tickers).context("out-of-sample moments")?;
    let out_of_sample = evaluate(&weights, &moments)?;
    let equal = vec![1.0 / tickers.len() as f64; tickers.len()];
    let equal_weight = evaluate(&equal, &moments)?;

    info!(
        "Out-of-sample: return {:.4}, vol {:.4}, sharpe {:.4} (equal weight sharpe {:.4})",
        out_of_sample.annual_return, out_of_sample.annual_vol, out_of_sample.sharpe, equal_weight.sharpe
    );
    Ok(BacktestReport {
        tickers,
        weights,
        in_sample: best.stats,
        out_of_sample,
        equal_weight,
        dropped,
    })
}

pub fn write_backtest_csv(path: &Path, report: &BacktestReport) -> Result<()> {
    let tickers = report.tickers.join("-");
    let equal = vec![1.0 / report.tickers.len() as f64; report.tickers.len()];
    let rows = [
        ("in_sample", &report.in_sample, join_weights(&report.weights)),
        ("out_of_sample", &report.out_of_sample, join_weights(&report.weights)),
        ("out_of_sample_equal_weight", &report.equal_weight, join_weights(&equal)),
    ];

    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for (period, stats, weights) in rows {
        writer.serialize(BacktestRow {
            period,
            annual_return: stats.annual_return,
            annual_vol: stats.annual_vol,
            sharpe: stats.sharpe,
            tickers: tickers.clone(),
            weights,
        })?;
    }
    writer.flush()?;
    info!("Wrote backtest comparison to {}", path.display());
    Ok(())
}

pub fn print_backtest(report: &BacktestReport) {
    println!("\nOut-of-sample performance ({}):", report.tickers.join(", "));
    if !report.dropped.is_empty() {
        println!("  Dropped (no data)  : {}", report.dropped.join(", "));
    }
    println!("  {:<22} {:>10} {:>10} {:>8}", "", "Return", "Vol", "Sharpe");
    for (name, s) in [
        ("In-sample", &report.in_sample),
        ("Out-of-sample", &report.out_of_sample),
        ("Equal weight (OOS)", &report.equal_weight),
    ] {
        println!(
            "  {:<22} {:>+9.2}% {:>9.2}% {:>8.3}",
            name,
            s.annual_return * 100.0,
            s.annual_vol * 100.0,
            s.sharpe
        );
    }
}
