use crate::error::{Result, SearchError};

/// One k-subset of the universe, in ascending universe-index order.
///
/// `rank` is the position of the subset in lexicographic generation order and
/// doubles as its identity for seeding and tie-breaking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Combination {
    pub rank: usize,
    pub indices: Vec<usize>,
    pub tickers: Vec<String>,
}

impl Combination {
    pub fn label(&self) -> String {
        self.tickers.join("-")
    }
}

/// Number of k-subsets of an n-set, saturating at `usize::MAX`.
pub fn n_choose_k(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        // acc * (n - i) is always divisible by (i + 1) at this point
        acc = acc * (n - i) as u128 / (i + 1) as u128;
        if acc > usize::MAX as u128 {
            return usize::MAX;
        }
    }
    acc as usize
}

/// Lazily enumerates every k-subset of a universe with an index counter.
///
/// The counter starts at `[0, 1, .., k-1]`; each step bumps the rightmost
/// index that still has room and resets everything to its right.
pub struct CombinationGenerator<'a> {
    universe: &'a [String],
    indices: Vec<usize>,
    next_rank: usize,
    total: usize,
    exhausted: bool,
}

impl<'a> CombinationGenerator<'a> {
    pub fn new(universe: &'a [String], k: usize) -> Result<Self> {
        let n = universe.len();
        if k < 1 || k > n {
            return Err(SearchError::Configuration(format!(
                "combination size {} must be between 1 and the universe size {}",
                k, n
            )));
        }
        Ok(Self {
            universe,
            indices: (0..k).collect(),
            next_rank: 0,
            total: n_choose_k(n, k),
            exhausted: false,
        })
    }

    /// Total number of combinations this generator yields.
    pub fn total(&self) -> usize {
        self.total
    }

    fn advance(&mut self) {
        let n = self.universe.len();
        let k = self.indices.len();
        let pivot = (0..k).rev().find(|&i| self.indices[i] < n - k + i);
        match pivot {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            }
            None => self.exhausted = true,
        }
    }
}

impl Iterator for CombinationGenerator<'_> {
    type Item = Combination;

    fn next(&mut self) -> Option<Combination> {
        if self.exhausted {
            return None;
        }
        let combination = Combination {
            rank: self.next_rank,
            indices: self.indices.clone(),
            tickers: self.indices.iter().map(|&i| self.universe[i].clone()).collect(),
        };
        self.next_rank += 1;
        self.advance();
        Some(combination)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.exhausted {
            return (0, Some(0));
        }
        let remaining = self.total.saturating_sub(self.next_rank);
        if self.total == usize::MAX {
            (remaining, None)
        } else {
            (remaining, Some(remaining))
        }
    }
}
