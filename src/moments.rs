use crate::combinations::Combination;
use crate::config::TRADING_DAYS;
use crate::data::ReturnsMatrix;
use crate::error::{Result, SearchError};

/// Annualized mean vector and covariance matrix of one combination's returns.
#[derive(Clone, Debug, PartialEq)]
pub struct MomentEstimate {
    mean: Vec<f64>,
    covariance: Vec<Vec<f64>>,
}

impl MomentEstimate {
    pub fn new(mean: Vec<f64>, covariance: Vec<Vec<f64>>) -> Result<Self> {
        let k = mean.len();
        if covariance.len() != k || covariance.iter().any(|row| row.len() != k) {
            return Err(SearchError::DataContract(format!(
                "covariance must be {}x{} to match the mean vector",
                k, k
            )));
        }
        Ok(Self { mean, covariance })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn covariance(&self) -> &[Vec<f64>] {
        &self.covariance
    }
}

pub fn estimate_moments(returns: &ReturnsMatrix, combination: &Combination) -> Result<MomentEstimate> {
    estimate_for_tickers(returns, &combination.tickers)
}

/// Mean and covariance of the named columns, both scaled by `TRADING_DAYS`.
///
/// Covariance uses the population divisor (row count, not row count - 1).
pub fn estimate_for_tickers(returns: &ReturnsMatrix, tickers: &[String]) -> Result<MomentEstimate> {
    let rows = returns.rows();
    if rows == 0 {
        return Err(SearchError::DataContract(
            "returns matrix has no rows".to_string(),
        ));
    }

    let columns: Vec<&[f64]> = tickers
        .iter()
        .map(|t| {
            returns.column(t).ok_or_else(|| {
                SearchError::DataContract(format!("ticker {} is absent from the returns matrix", t))
            })
        })
        .collect::<Result<_>>()?;

    let n = rows as f64;
    let k = columns.len();
    let daily_means: Vec<f64> = columns.iter().map(|c| c.iter().sum::<f64>() / n).collect();

    let mut cov = vec![vec![0.0; k]; k];
    for i in 0..k {
        for j in i..k {
            let sum: f64 = columns[i]
                .iter()
                .zip(columns[j].iter())
                .map(|(a, b)| (a - daily_means[i]) * (b - daily_means[j]))
                .sum();
            let covariance = sum / n * TRADING_DAYS;
            cov[i][j] = covariance;
            cov[j][i] = covariance;
        }
    }

    let mean = daily_means.iter().map(|m| m * TRADING_DAYS).collect();
    MomentEstimate::new(mean, cov)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinations::CombinationGenerator;
    use chrono::NaiveDate;

    fn matrix(columns: Vec<(&str, Vec<f64>)>) -> ReturnsMatrix {
        let rows = columns[0].1.len();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates = (0..rows).map(|i| start + chrono::Duration::days(i as i64)).collect();
        let (tickers, cols): (Vec<String>, Vec<Vec<f64>>) =
            columns.into_iter().map(|(t, c)| (t.to_string(), c)).unzip();
        ReturnsMatrix::new(dates, tickers, cols).unwrap()
    }

    #[test]
    fn test_mean_and_population_covariance() {
        let m = matrix(vec![
            ("A", vec![0.01, 0.03, -0.01, 0.01]),
            ("B", vec![0.02, 0.00, 0.02, 0.00]),
        ]);
        let est = estimate_for_tickers(&m, &["A".to_string(), "B".to_string()]).unwrap();

        assert!((est.mean()[0] - 0.01 * TRADING_DAYS).abs() < 1e-12);
        assert!((est.mean()[1] - 0.01 * TRADING_DAYS).abs() < 1e-12);

        // A deviations: 0, .02, -.02, 0 -> var = .0008 / 4 = .0002
        // B deviations: .01, -.01, .01, -.01 -> var = .0004 / 4 = .0001
        // cross: 0 - .0002 - .0002 + 0 = -.0004 / 4 = -.0001
        let cov = est.covariance();
        assert!((cov[0][0] - 0.0002 * TRADING_DAYS).abs() < 1e-12);
        assert!((cov[1][1] - 0.0001 * TRADING_DAYS).abs() < 1e-12);
        assert!((cov[0][1] + 0.0001 * TRADING_DAYS).abs() < 1e-12);
        assert_eq!(cov[0][1], cov[1][0]);
    }

    #[test]
    fn test_covariance_is_symmetric_for_generated_combinations() {
        let m = ReturnsMatrix::new_mock(&["A", "B", "C", "D"], 120, 11);
        for combo in CombinationGenerator::new(m.tickers(), 3).unwrap() {
            let est = estimate_moments(&m, &combo).unwrap();
            assert_eq!(est.dimension(), 3);
            for i in 0..3 {
                assert!(est.covariance()[i][i] > 0.0);
                for j in 0..3 {
                    assert_eq!(est.covariance()[i][j], est.covariance()[j][i]);
                }
            }
        }
    }

    #[test]
    fn test_estimation_is_deterministic() {
        let m = ReturnsMatrix::new_mock(&["A", "B", "C"], 80, 3);
        let tickers: Vec<String> = m.tickers().to_vec();
        assert_eq!(
            estimate_for_tickers(&m, &tickers).unwrap(),
            estimate_for_tickers(&m, &tickers).unwrap()
        );
    }

    #[test]
    fn test_unknown_ticker_is_a_data_contract_error() {
        let m = ReturnsMatrix::new_mock(&["A", "B"], 10, 1);
        let err = estimate_for_tickers(&m, &["A".to_string(), "ZZZ".to_string()]).unwrap_err();
        assert!(matches!(err, SearchError::DataContract(_)));
    }

    #[test]
    fn test_zero_rows_is_a_data_contract_error() {
        let m = ReturnsMatrix::new(Vec::new(), vec!["A".to_string()], vec![Vec::new()]).unwrap();
        let err = estimate_for_tickers(&m, &["A".to_string()]).unwrap_err();
        assert!(matches!(err, SearchError::DataContract(_)));
    }
}
