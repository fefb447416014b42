use crate::search::SimulationResult;

/// Orders results by Sharpe, best first; equal Sharpe keeps generation order.
pub fn rank_results(mut results: Vec<SimulationResult>) -> Vec<SimulationResult> {
    results.sort_by(|a, b| {
        b.stats
            .sharpe
            .total_cmp(&a.stats.sharpe)
            .then(a.combination.rank.cmp(&b.combination.rank))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinations::Combination;
    use crate::portfolio::PortfolioStats;

    fn result(rank: usize, sharpe: f64) -> SimulationResult {
        SimulationResult {
            combination: Combination {
                rank,
                indices: vec![rank],
                tickers: vec![format!("T{}", rank)],
            },
            weights: vec![1.0],
            stats: PortfolioStats { annual_return: sharpe, annual_vol: 1.0, sharpe },
        }
    }

    fn ranks(results: &[SimulationResult]) -> Vec<usize> {
        results.iter().map(|r| r.combination.rank).collect()
    }

    #[test]
    fn test_sorts_by_sharpe_descending() {
        let ranked = rank_results(vec![result(0, 0.5), result(1, 2.0), result(2, -1.0), result(3, 1.0)]);
        assert_eq!(ranks(&ranked), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_ties_follow_generation_order_regardless_of_input_order() {
        let ranked = rank_results(vec![result(4, 1.0), result(2, 1.0), result(7, 3.0), result(0, 1.0)]);
        assert_eq!(ranks(&ranked), vec![7, 0, 2, 4]);
    }

    #[test]
    fn test_degenerate_results_sink_to_the_bottom() {
        let ranked = rank_results(vec![result(0, f64::NEG_INFINITY), result(1, -3.0)]);
        assert_eq!(ranks(&ranked), vec![1, 0]);
    }
}
