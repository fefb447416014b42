mod aggregate;
mod backtest;
mod combinations;
mod config;
mod data;
mod error;
mod moments;
mod portfolio;
mod report;
mod sampler;
mod search;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::SimConfig;
use data::{DateRange, ReturnsMatrix};
use search::{CancelFlag, ParallelSearchEngine, SearchOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Optifolio: brute-force Sharpe ratio search over asset combinations",
    after_help = "EXAMPLES:
    # Search 3-asset portfolios from per-ticker price files
    cargo run --release -- --prices-dir data -k 3 --trials 5000 --max-weight 0.5

    # Use a wide returns file and a fixed seed
    cargo run --release -- --returns-csv rets.csv -k 4 --seed 7

    # Evaluate the winner on a later period
    cargo run --release -- --prices-dir data --end 2024-12-31 --backtest-dir data/backtest --backtest-start 2025-01-01

    # Synthetic universe, no files needed
    cargo run --release -- --demo -k 3 --max-weight 0.5"
)]
struct Args {
    /// Directory with one <TICKER>.csv price file per asset (env: OPTIFOLIO_DATA_DIR)
    #[arg(long)]
    prices_dir: Option<PathBuf>,

    /// Wide CSV of precomputed returns: date column followed by one column per ticker
    #[arg(long, conflicts_with = "prices_dir")]
    returns_csv: Option<PathBuf>,

    /// Comma-separated tickers (default: every CSV in --prices-dir, or the Dow 30 if listed there).
    /// Narrows --returns-csv to these columns and names the --demo universe.
    #[arg(long)]
    tickers: Option<String>,

    /// Assets per portfolio
    #[arg(short = 'k', long, default_value_t = config::DEFAULT_COMBINATION_SIZE)]
    combination_size: usize,

    /// Random weight trials per combination
    #[arg(long, default_value_t = config::DEFAULT_TRIALS_PER_COMBINATION)]
    trials: usize,

    /// Maximum weight of any single asset, in (1/k, 1]
    #[arg(long, default_value_t = config::DEFAULT_MAX_WEIGHT)]
    max_weight: f64,

    /// Base seed; identical inputs and seed reproduce identical results
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    seed: u64,

    /// Worker threads (0 = all logical CPUs; env: OPTIFOLIO_THREADS)
    #[arg(long)]
    threads: Option<usize>,

    /// Combinations processed concurrently (default: 4 per thread)
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Rejected weight draws allowed per trial before giving up
    #[arg(long, default_value_t = config::DEFAULT_MAX_REJECTIONS)]
    max_rejections: usize,

    /// First date (YYYY-MM-DD) of the search period
    #[arg(long)]
    start: Option<String>,

    /// Last date (YYYY-MM-DD) of the search period
    #[arg(long)]
    end: Option<String>,

    /// Rows of the leaderboard to print
    #[arg(long, default_value_t = config::DEFAULT_TOP_N)]
    top_n: usize,

    /// Where result files go (env: OPTIFOLIO_OUTPUT_DIR; default: current directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Price directory for out-of-sample evaluation of the best portfolio (env: OPTIFOLIO_BACKTEST_DIR)
    #[arg(long)]
    backtest_dir: Option<PathBuf>,

    #[arg(long)]
    backtest_start: Option<String>,

    #[arg(long)]
    backtest_end: Option<String>,

    /// Abort the search after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Run on a synthetic seeded universe instead of files
    #[arg(long)]
    demo: bool,
}

fn parse_range(start: Option<&str>, end: Option<&str>) -> Result<DateRange> {
    let start = start.map(data::parse_date).transpose()?;
    let end = end.map(data::parse_date).transpose()?;
    DateRange::new(start, end)
}

fn parse_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn load_returns(args: &Args) -> Result<ReturnsMatrix> {
    let range = parse_range(args.start.as_deref(), args.end.as_deref())?;

    let requested = args.tickers.as_deref().map(parse_tickers);

    if args.demo {
        let symbols: Vec<String> = match requested {
            Some(tickers) => tickers,
            None => {
                let size = args.combination_size.max(config::DEMO_UNIVERSE_SIZE);
                config::DOW_30.iter().take(size).map(|s| s.to_string()).collect()
            }
        };
        info!("Demo mode: synthetic returns for {:?}", symbols);
        let symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();
        return Ok(ReturnsMatrix::new_mock(&symbols, config::DEMO_ROWS, args.seed));
    }

    if let Some(path) = &args.returns_csv {
        let matrix = data::load_returns_csv(path, range)?;
        return match requested {
            Some(tickers) => matrix
                .select(&tickers)
                .with_context(|| format!("selecting --tickers from {}", path.display())),
            None => Ok(matrix),
        };
    }

    let dir = args
        .prices_dir
        .clone()
        .or_else(|| config::env_path("OPTIFOLIO_DATA_DIR"))
        .ok_or_else(|| anyhow!("No input given: pass --prices-dir, --returns-csv, or --demo"))?;

    let tickers = match requested {
        Some(tickers) => tickers,
        None => {
            let found = data::discover_tickers(&dir)?;
            let dow: Vec<String> = config::DOW_30
                .iter()
                .map(|s| s.to_string())
                .filter(|t| found.contains(t))
                .collect();
            if dow.len() == config::DOW_30.len() { dow } else { found }
        }
    };
    if tickers.is_empty() {
        return Err(anyhow!("No tickers found in {}", dir.display()));
    }
    data::load_price_dir(&dir, &tickers, range)
}

/// Demo runs lift a cap that no k-asset weighting could meet.
fn demo_max_weight(combination_size: usize, requested: f64) -> f64 {
    let k = combination_size.max(1) as f64;
    if requested * k >= 1.0 {
        return requested;
    }
    let lifted = (2.0 / k).min(1.0);
    warn!(
        "Max weight {:.2} is below 1/{}; demo uses {:.2} instead",
        requested, combination_size, lifted
    );
    lifted
}

async fn run_search(
    returns: Arc<ReturnsMatrix>,
    sim_config: SimConfig,
    threads: usize,
    deadline: Option<Duration>,
) -> Result<SearchOutcome> {
    let cancel = CancelFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling search...");
                cancel.cancel();
            }
        })
    };

    let handle = tokio::task::spawn_blocking(move || {
        let mut engine = ParallelSearchEngine::new(&returns, sim_config, threads)?.with_cancel_flag(cancel);
        if let Some(budget) = deadline {
            engine = engine.with_deadline(budget);
        }
        engine.run()
    });
    let outcome = handle.await.context("search task panicked")?;
    watcher.abort();
    Ok(outcome?)
}

async fn run(args: Args) -> Result<()> {
    let returns = Arc::new(load_returns(&args)?);

    let threads = config::resolve_thread_count(
        args.threads.or_else(|| config::env_usize("OPTIFOLIO_THREADS")).unwrap_or(0),
    );
    let max_weight = if args.demo {
        demo_max_weight(args.combination_size, args.max_weight)
    } else {
        args.max_weight
    };
    let mut sim_config = SimConfig::new(args.combination_size, args.trials)
        .with_max_weight(max_weight)
        .with_seed(args.seed)
        .with_max_in_flight(config::IN_FLIGHT_PER_THREAD * threads)
        .with_max_rejections(args.max_rejections);
    if let Some(max_in_flight) = args.max_in_flight {
        sim_config = sim_config.with_max_in_flight(max_in_flight);
    }
    sim_config.validate(returns.tickers().len())?;

    let outcome = run_search(
        returns.clone(),
        sim_config.clone(),
        threads,
        args.deadline_secs.map(Duration::from_secs),
    )
    .await?;
    let summary = outcome.summary;
    let ranked = aggregate::rank_results(outcome.results);

    report::print_leaderboard(&ranked, &summary, args.top_n);

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| config::env_path("OPTIFOLIO_OUTPUT_DIR"))
        .unwrap_or_else(|| PathBuf::from("."));
    let results_path = report::timestamped_path(&output_dir, config::RESULTS_FILE_STEM, "csv")?;
    report::write_results_csv(&results_path, &ranked)?;
    let summary_path = report::timestamped_path(&output_dir, config::SUMMARY_FILE_STEM, "json")?;
    report::write_run_summary(
        &summary_path,
        &returns,
        &sim_config,
        &summary,
        &ranked,
    )?;

    let backtest_dir = args
        .backtest_dir
        .clone()
        .or_else(|| config::env_path("OPTIFOLIO_BACKTEST_DIR"));
    if let (Some(dir), Some(best)) = (backtest_dir, ranked.first()) {
        let range = parse_range(args.backtest_start.as_deref(), args.backtest_end.as_deref())?;
        let (available, missing): (Vec<String>, Vec<String>) = best
            .combination
            .tickers
            .iter()
            .cloned()
            .partition(|t| data::price_file_path(&dir, t).exists());
        for ticker in &missing {
            warn!("No out-of-sample price file for {}, dropping it", ticker);
        }
        if available.is_empty() {
            return Err(anyhow!(
                "No out-of-sample price files in {} for {}",
                dir.display(),
                best.combination.label()
            ));
        }
        let oos = data::load_price_dir(&dir, &available, range)
            .with_context(|| format!("loading out-of-sample prices from {}", dir.display()))?;
        let bt = backtest::evaluate_out_of_sample(best, &oos)?;
        backtest::print_backtest(&bt);
        let bt_path = report::timestamped_path(&output_dir, config::BACKTEST_FILE_STEM, "csv")?;
        backtest::write_backtest_csv(&bt_path, &bt)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("optifolio=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => info!("Optifolio run completed."),
        Err(e) => {
            error!("Optifolio run failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tickers_normalizes() {
        assert_eq!(parse_tickers(" aapl, msft,,nvda "), vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[test]
    fn test_parse_range_rejects_inverted_dates() {
        assert!(parse_range(Some("2025-01-01"), Some("2024-01-01")).is_err());
        let range = parse_range(Some("2024-01-01"), None).unwrap();
        assert!(range.end.is_none());
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("optifolio_main_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn output_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_demo_with_small_k_runs_from_the_command_line() {
        let out = scratch_dir("demo_k3");
        let args = Args::parse_from([
            "optifolio", "--demo", "-k", "3", "--trials", "50", "--threads", "2",
            "--output-dir", out.to_str().unwrap(),
        ]);
        run(args).await.unwrap();
        assert_eq!(output_files(&out), 2);
        std::fs::remove_dir_all(&out).unwrap();
    }

    #[tokio::test]
    async fn test_demo_with_default_k_sizes_its_universe() {
        let out = scratch_dir("demo_default");
        let args = Args::parse_from([
            "optifolio", "--demo", "--trials", "20", "--threads", "2",
            "--output-dir", out.to_str().unwrap(),
        ]);
        let returns = load_returns(&args).unwrap();
        assert_eq!(returns.tickers().len(), config::DEFAULT_COMBINATION_SIZE);
        run(args).await.unwrap();
        std::fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn test_demo_max_weight_lifts_only_infeasible_caps() {
        assert_eq!(demo_max_weight(10, 0.3), 0.3);
        assert!((demo_max_weight(3, 0.3) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(demo_max_weight(1, 0.3), 1.0);
    }

    #[test]
    fn test_tickers_narrow_returns_csv_and_demo() {
        let dir = scratch_dir("select");
        let path = dir.join("rets.csv");
        std::fs::write(&path, "date,X,Y,Z\n2024-01-02,0.01,-0.02,0.0\n2024-01-03,0.03,0.00,0.01\n").unwrap();
        let csv = path.to_str().unwrap();

        let args = Args::parse_from(["optifolio", "--returns-csv", csv, "--tickers", "z,x"]);
        let returns = load_returns(&args).unwrap();
        assert_eq!(returns.tickers(), &["Z".to_string(), "X".to_string()]);
        assert_eq!(returns.column("Z").unwrap(), &[0.0, 0.01]);

        let args = Args::parse_from(["optifolio", "--returns-csv", csv, "--tickers", "X,NOPE"]);
        assert!(load_returns(&args).is_err());

        let args = Args::parse_from(["optifolio", "--demo", "--tickers", "AAPL,MSFT,NVDA"]);
        let returns = load_returns(&args).unwrap();
        assert_eq!(returns.tickers(), &["AAPL".to_string(), "MSFT".to_string(), "NVDA".to_string()]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_demo_search_runs_end_to_end() {
        let returns = Arc::new(ReturnsMatrix::new_mock(&["A", "B", "C", "D"], 100, 1));
        let cfg = SimConfig::new(2, 20).with_max_weight(1.0).with_max_in_flight(2);
        let outcome = run_search(returns, cfg, 2, None).await.unwrap();
        assert_eq!(outcome.results.len(), 6);
    }
}
