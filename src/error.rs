//! Error types
//!
//! Fatal failures only. Data-quality problems that degrade gracefully
//! (missing tickers, thin history) are reported as [`crate::types::DataWarning`]
//! next to the data instead of aborting.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PfoError>;

#[derive(Error, Debug)]
pub enum PfoError {
    /// Transport or auth failure reaching a data source
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// No recognized price column for a ticker
    #[error("No price field found for {ticker} (available: {available:?})")]
    NoPriceFieldFound { ticker: String, available: Vec<String> },

    #[error("Negative portfolio variance: {variance}")]
    NegativeVariance { variance: f64 },

    #[error("Could not draw non-degenerate weights after {attempts} attempts")]
    DegenerateWeights { attempts: usize },

    #[error("Too many failed draws: {failed} failures for {requested} samples")]
    TooManyFailedSamples { failed: usize, requested: usize },

    #[error("Price matrix is empty")]
    EmptyMatrix,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PfoError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry of the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            PfoError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            _ => false,
        }
    }
}

impl From<config::ConfigError> for PfoError {
    fn from(e: config::ConfigError) -> Self {
        PfoError::Config(e.to_string())
    }
}
