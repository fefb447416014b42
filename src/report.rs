use crate::config::SimConfig;
use crate::data::ReturnsMatrix;
use crate::search::{SearchSummary, SimulationResult};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// One line of the results file; tickers and weights are `-`-joined.
#[derive(Debug, Serialize)]
struct ResultRow {
    #[serde(rename = "Rank")]
    rank: usize,
    #[serde(rename = "Tickers")]
    tickers: String,
    #[serde(rename = "Weights")]
    weights: String,
    #[serde(rename = "AnnualReturn")]
    annual_return: f64,
    #[serde(rename = "AnnualVol")]
    annual_vol: f64,
    #[serde(rename = "Sharpe")]
    sharpe: f64,
}

#[derive(Debug, Serialize)]
struct BestPortfolio {
    tickers: Vec<String>,
    weights: Vec<f64>,
    annual_return: f64,
    annual_vol: f64,
    sharpe: f64,
}

#[derive(Debug, Serialize)]
struct ConfigSnapshot {
    combination_size: usize,
    trials_per_combination: usize,
    max_weight: f64,
    base_seed: u64,
    max_in_flight: usize,
    max_rejections: usize,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    finished_at: String,
    universe: &'a [String],
    return_rows: usize,
    period_start: Option<String>,
    period_end: Option<String>,
    config: ConfigSnapshot,
    execution_time_secs: f64,
    num_portfolios: usize,
    total_simulations: usize,
    simulations_per_second: f64,
    degenerate_simulations: usize,
    threads: usize,
    best: Option<BestPortfolio>,
}

pub fn join_weights(weights: &[f64]) -> String {
    weights.iter().map(|w| format!("{:.6}", w)).collect::<Vec<_>>().join("-")
}

/// `<dir>/<stem>_<UTC timestamp>.<ext>`, creating `dir` if needed.
pub fn timestamped_path(dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file_name = format!("{}_{}.{}", stem, Utc::now().format("%Y%m%d_%H%M%S"), ext);
    Ok(dir.join(file_name))
}

pub fn write_results_csv(path: &Path, results: &[SimulationResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for (i, r) in results.iter().enumerate() {
        writer.serialize(ResultRow {
            rank: i + 1,
            tickers: r.combination.label(),
            weights: join_weights(&r.weights),
            annual_return: r.stats.annual_return,
            annual_vol: r.stats.annual_vol,
            sharpe: r.stats.sharpe,
        })?;
    }
    writer.flush()?;
    info!("Wrote {} portfolios to {}", results.len(), path.display());
    Ok(())
}

pub fn write_run_summary(
    path: &Path,
    returns: &ReturnsMatrix,
    config: &SimConfig,
    summary: &SearchSummary,
    ranked: &[SimulationResult],
) -> Result<()> {
    let run = RunSummary {
        finished_at: Utc::now().to_rfc3339(),
        universe: returns.tickers(),
        return_rows: returns.rows(),
        period_start: returns.dates().first().map(|d| d.to_string()),
        period_end: returns.dates().last().map(|d| d.to_string()),
        config: ConfigSnapshot {
            combination_size: config.combination_size,
            trials_per_combination: config.trials_per_combination,
            max_weight: config.max_weight,
            base_seed: config.base_seed,
            max_in_flight: config.max_in_flight,
            max_rejections: config.max_rejections,
        },
        execution_time_secs: summary.elapsed.as_secs_f64(),
        num_portfolios: summary.combinations,
        total_simulations: summary.total_trials,
        simulations_per_second: summary.trials_per_second(),
        degenerate_simulations: summary.degenerate_trials,
        threads: summary.threads,
        best: ranked.first().map(|r| BestPortfolio {
            tickers: r.combination.tickers.clone(),
            weights: r.weights.clone(),
            annual_return: r.stats.annual_return,
            annual_vol: r.stats.annual_vol,
            sharpe: r.stats.sharpe,
        }),
    };

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &run)?;
    info!("Wrote run summary to {}", path.display());
    Ok(())
}

/// Pretty-prints the top of the leaderboard and the winner's allocation.
pub fn print_leaderboard(ranked: &[SimulationResult], summary: &SearchSummary, top_n: usize) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║               Optifolio Search Results                    ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  Portfolios evaluated  : {:>10}                        ║",
        summary.combinations
    );
    println!(
        "║  Simulations           : {:>10}                        ║",
        summary.total_trials
    );
    println!(
        "║  Elapsed               : {:>9.2}s                        ║",
        summary.elapsed.as_secs_f64()
    );
    println!(
        "║  Simulations / second  : {:>10.0}                        ║",
        summary.trials_per_second()
    );
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  #    Sharpe   Ann.Ret   Ann.Vol   Tickers                ║");
    println!("╠════════════════════════════════════════════════════════════╣");

    for (i, r) in ranked.iter().take(top_n).enumerate() {
        println!(
            "║  {:<3} {:>7.3}  {:>+7.2}%  {:>6.2}%   {}",
            i + 1,
            r.stats.sharpe,
            r.stats.annual_return * 100.0,
            r.stats.annual_vol * 100.0,
            r.combination.label()
        );
    }

    if let Some(best) = ranked.first() {
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Best Portfolio Weights                                   ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        let mut weights: Vec<(&String, f64)> =
            best.combination.tickers.iter().zip(best.weights.iter().copied()).collect();
        weights.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (ticker, w) in weights {
            println!("║    {:<6} {:>7.2}%                                        ║", ticker, w * 100.0);
        }
    }
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("⚠  Historical in-sample fit. Not financial advice.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinations::Combination;
    use crate::portfolio::PortfolioStats;
    use std::time::Duration;

    fn sample_results() -> Vec<SimulationResult> {
        vec![SimulationResult {
            combination: Combination {
                rank: 0,
                indices: vec![0, 1],
                tickers: vec!["AAPL".to_string(), "MSFT".to_string()],
            },
            weights: vec![0.25, 0.75],
            stats: PortfolioStats { annual_return: 0.2, annual_vol: 0.1, sharpe: 2.0 },
        }]
    }

    fn sample_summary() -> SearchSummary {
        SearchSummary {
            combinations: 1,
            trials_per_combination: 10,
            total_trials: 10,
            degenerate_trials: 0,
            threads: 1,
            elapsed: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_join_weights() {
        assert_eq!(join_weights(&[0.25, 0.75]), "0.250000-0.750000");
    }

    #[test]
    fn test_write_results_and_summary() {
        let dir = std::env::temp_dir().join(format!("optifolio_report_{}", std::process::id()));
        let results = sample_results();

        let csv_path = timestamped_path(&dir, "portfolio_results", "csv").unwrap();
        write_results_csv(&csv_path, &results).unwrap();
        let contents = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("Rank,Tickers,Weights,AnnualReturn,AnnualVol,Sharpe"));
        assert_eq!(lines.next(), Some("1,AAPL-MSFT,0.250000-0.750000,0.2,0.1,2.0"));

        let json_path = dir.join("summary.json");
        let cfg = SimConfig::new(2, 10).with_max_weight(1.0);
        let returns = ReturnsMatrix::new_mock(&["AAPL", "MSFT"], 100, 1);
        write_run_summary(&json_path, &returns, &cfg, &sample_summary(), &results).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed["num_portfolios"], 1);
        assert_eq!(parsed["total_simulations"], 10);
        assert_eq!(parsed["simulations_per_second"], 20.0);
        assert_eq!(parsed["best"]["tickers"][1], "MSFT");
        assert_eq!(parsed["return_rows"], 100);
        assert_eq!(parsed["period_start"], "2024-01-02");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
