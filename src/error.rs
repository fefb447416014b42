use thiserror::Error;

/// Failures raised by the combinatorial search core.
///
/// Degenerate volatility is not represented here: a trial with zero
/// volatility is scored at negative infinity and simply never wins.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Data contract violated: {0}")]
    DataContract(String),

    #[error("Sampling exhausted for {combination}: no valid weight vector after {attempts} draws")]
    SamplingExhausted { combination: String, attempts: usize },

    #[error("Search cancelled before completion")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SearchError>;
