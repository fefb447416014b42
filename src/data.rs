use crate::error::SearchError;
use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use rand::prelude::*;
use rand_distr::Normal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Dense table of simple period returns: one column per ticker, rows aligned by date.
///
/// Built once by the loader and only borrowed afterwards.
#[derive(Clone, Debug)]
pub struct ReturnsMatrix {
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    columns: Vec<Vec<f64>>,
    index: HashMap<String, usize>,
}

impl ReturnsMatrix {
    pub fn new(
        dates: Vec<NaiveDate>,
        tickers: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> crate::error::Result<Self> {
        if tickers.len() != columns.len() {
            return Err(SearchError::DataContract(format!(
                "{} tickers but {} return columns",
                tickers.len(),
                columns.len()
            )));
        }
        let mut index = HashMap::with_capacity(tickers.len());
        for (i, ticker) in tickers.iter().enumerate() {
            if index.insert(ticker.clone(), i).is_some() {
                return Err(SearchError::DataContract(format!("duplicate ticker {}", ticker)));
            }
        }
        for (ticker, column) in tickers.iter().zip(columns.iter()) {
            if column.len() != dates.len() {
                return Err(SearchError::DataContract(format!(
                    "column {} has {} rows, expected {}",
                    ticker,
                    column.len(),
                    dates.len()
                )));
            }
            if let Some(pos) = column.iter().position(|v| !v.is_finite()) {
                return Err(SearchError::DataContract(format!(
                    "column {} has a non-finite return at row {}",
                    ticker, pos
                )));
            }
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SearchError::DataContract(
                "return dates must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { dates, tickers, columns, index })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> usize {
        self.dates.len()
    }

    pub fn column(&self, ticker: &str) -> Option<&[f64]> {
        self.index.get(ticker).map(|&i| self.columns[i].as_slice())
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.index.contains_key(ticker)
    }

    /// Keeps only the named columns, in the order given.
    pub fn select(&self, tickers: &[String]) -> crate::error::Result<Self> {
        let missing: Vec<&str> = tickers
            .iter()
            .filter(|t| !self.contains(t))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(SearchError::DataContract(format!(
                "requested tickers not in the returns data: {}",
                missing.join(", ")
            )));
        }
        let columns = tickers.iter().map(|t| self.columns[self.index[t]].clone()).collect();
        Self::new(self.dates.clone(), tickers.to_vec(), columns)
    }

    /// Builds returns from aligned price columns: `p[t] / p[t-1] - 1`.
    pub fn from_prices(
        dates: Vec<NaiveDate>,
        tickers: Vec<String>,
        prices: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if dates.len() < 2 {
            bail!("need at least 2 aligned price rows to compute returns, got {}", dates.len());
        }
        let mut columns = Vec::with_capacity(prices.len());
        for (ticker, series) in tickers.iter().zip(prices.iter()) {
            if let Some(p) = series.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
                bail!("{}: non-positive or invalid price {}", ticker, p);
            }
            columns.push(simple_returns(series));
        }
        let return_dates = dates[1..].to_vec();
        Ok(Self::new(return_dates, tickers, columns)?)
    }

    /// Synthetic correlated random-walk returns, reproducible for a given seed.
    pub fn new_mock(tickers: &[&str], rows: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let market = Normal::new(0.0004, 0.01).unwrap();
        let idio = Normal::new(0.0, 0.012).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let betas: Vec<f64> = tickers.iter().map(|_| rng.gen_range(0.4..1.4)).collect();
        let alphas: Vec<f64> = tickers.iter().map(|_| rng.gen_range(-0.0003..0.0008)).collect();
        let mut columns = vec![Vec::with_capacity(rows); tickers.len()];
        for _ in 0..rows {
            let m: f64 = market.sample(&mut rng);
            for (j, column) in columns.iter_mut().enumerate() {
                column.push(alphas[j] + betas[j] * m + idio.sample(&mut rng));
            }
        }
        let dates = (0..rows).map(|i| start + chrono::Duration::days(i as i64)).collect();
        let tickers = tickers.iter().map(|s| s.to_string()).collect();
        Self::new(dates, tickers, columns).unwrap()
    }
}

pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Inclusive date window; open ends are unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                bail!("start date {} is after end date {}", s, e);
            }
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    // Timestamps such as "2024-08-01 00:00:00-04:00" carry the date in the first ten chars.
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .map_err(|_| anyhow!("Invalid date '{}', expected YYYY-MM-DD", trimmed))
}

/// Price history of a single ticker keyed by date.
#[derive(Clone, Debug)]
pub struct PriceSeries {
    pub ticker: String,
    pub prices: BTreeMap<NaiveDate, f64>,
}

fn date_column(headers: &csv::StringRecord) -> usize {
    headers
        .iter()
        .position(|h| matches!(h.trim().to_ascii_lowercase().as_str(), "date" | "datetime" | "timestamp"))
        .unwrap_or(0)
}

/// Reads `<TICKER>.csv` with a date column and one price column.
///
/// Rows whose date or price does not parse (blank cells, extra header lines)
/// are skipped.
pub fn read_price_csv(path: &Path, ticker: &str, range: DateRange) -> Result<PriceSeries> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let date_idx = date_column(&headers);
    let price_idx = (0..headers.len())
        .find(|&i| i != date_idx)
        .ok_or_else(|| anyhow!("{}: no price column", path.display()))?;

    let mut prices = BTreeMap::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        let date = record.get(date_idx).map(parse_date);
        let price = record.get(price_idx).and_then(|p| p.trim().parse::<f64>().ok());
        match (date, price) {
            (Some(Ok(date)), Some(price)) => {
                if range.contains(date) {
                    prices.insert(date, price);
                }
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("{}: skipped {} unparseable rows", ticker, skipped);
    }
    Ok(PriceSeries { ticker: ticker.to_string(), prices })
}

/// Keeps only dates present in every series, ascending.
pub fn align_prices(series: &[PriceSeries]) -> (Vec<NaiveDate>, Vec<Vec<f64>>) {
    let Some(first) = series.first() else {
        return (Vec::new(), Vec::new());
    };
    let dates: Vec<NaiveDate> = first
        .prices
        .keys()
        .filter(|d| series.iter().all(|s| s.prices.contains_key(d)))
        .copied()
        .collect();
    let columns = series
        .iter()
        .map(|s| dates.iter().map(|d| s.prices[d]).collect())
        .collect();
    (dates, columns)
}

/// Tickers with a `<TICKER>.csv` file in `dir`, sorted.
pub fn discover_tickers(dir: &Path) -> Result<Vec<String>> {
    let mut tickers = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tickers.push(stem.to_string());
            }
        }
    }
    tickers.sort();
    Ok(tickers)
}

pub fn price_file_path(dir: &Path, ticker: &str) -> PathBuf {
    dir.join(format!("{}.csv", ticker))
}

/// Loads one price file per ticker, aligns them on common dates, and converts to returns.
pub fn load_price_dir(dir: &Path, tickers: &[String], range: DateRange) -> Result<ReturnsMatrix> {
    let mut seen = HashSet::new();
    for t in tickers {
        if !seen.insert(t.as_str()) {
            bail!("ticker {} listed more than once", t);
        }
    }

    let mut series = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let path = price_file_path(dir, ticker);
        let s = read_price_csv(&path, ticker, range)?;
        if s.prices.len() < 2 {
            bail!("{}: only {} price rows in range", s.ticker, s.prices.len());
        }
        debug!("{}: {} price rows", s.ticker, s.prices.len());
        series.push(s);
    }

    let (dates, prices) = align_prices(&series);
    let dropped = series.iter().map(|s| s.prices.len()).max().unwrap_or(0) - dates.len();
    if dropped > 0 {
        warn!("Dropped {} dates missing a price for at least one ticker", dropped);
    }
    let matrix = ReturnsMatrix::from_prices(dates, tickers.to_vec(), prices)
        .with_context(|| format!("building returns from {}", dir.display()))?;
    info!(
        "Loaded {} tickers from {} ({} return rows)",
        matrix.tickers().len(),
        dir.display(),
        matrix.rows()
    );
    Ok(matrix)
}

/// Reads a wide returns file: a date column followed by one column per ticker.
pub fn load_returns_csv(path: &Path, range: DateRange) -> Result<ReturnsMatrix> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let date_idx = date_column(&headers);
    let value_idx: Vec<usize> = (0..headers.len()).filter(|&i| i != date_idx).collect();
    if value_idx.is_empty() {
        bail!("{}: no ticker columns", path.display());
    }
    let tickers: Vec<String> = value_idx.iter().map(|&i| headers[i].trim().to_string()).collect();

    let mut dates = Vec::new();
    let mut columns = vec![Vec::new(); tickers.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        let date = parse_date(record.get(date_idx).unwrap_or_default())
            .with_context(|| format!("{} row {}", path.display(), line + 2))?;
        if !range.contains(date) {
            continue;
        }
        let mut row = Vec::with_capacity(value_idx.len());
        for (&i, ticker) in value_idx.iter().zip(tickers.iter()) {
            let raw = record.get(i).unwrap_or_default().trim();
            let value = raw.parse::<f64>().map_err(|_| {
                anyhow!("{} row {}: missing or invalid return '{}' for {}", path.display(), line + 2, raw, ticker)
            })?;
            row.push(value);
        }
        dates.push(date);
        for (column, value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }

    let matrix = ReturnsMatrix::new(dates, tickers, columns)
        .with_context(|| format!("validating {}", path.display()))?;
    info!(
        "Loaded returns for {} tickers from {} ({} rows)",
        matrix.tickers().len(),
        path.display(),
        matrix.rows()
    );
    Ok(matrix)
}
