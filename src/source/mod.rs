//! Price sources
//!
//! Each adapter turns a [`FetchRequest`] into a [`RawTable`] keyed by
//! (field, ticker). Transport failures abort the fetch; tickers a source does
//! not know are reported as [`DataWarning::MissingTicker`] and left out.

pub mod csv;
pub mod moex;
pub mod provider;


pub use self::csv::CsvSource;
pub use moex::MoexSource;
pub use provider::ProviderSource;

use crate::config::{Config, DataConfig};
use crate::error::{PfoError, Result};
use crate::types::{DataWarning, RawTable, Ticker};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Which adapter to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Exchange ISS REST API
    Moex,
    /// Commercial chart API
    Provider,
    /// Directory of `<ticker>.csv` files
    #[default]
    Csv,
}

/// Tickers and an optional inclusive date window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub tickers: Vec<Ticker>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl FetchRequest {
    pub fn new<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tickers: tickers.into_iter().map(Into::into).collect(),
            start: None,
            end: None,
        }
    }

    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self::new(config.tickers.iter().cloned()).with_range(config.start_date, config.end_date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// Outcome for one requested ticker
#[derive(Debug, Clone, PartialEq)]
pub enum TickerStatus {
    Fetched { observations: usize },
    NotFound,
    Unreadable(String),
}

/// Data plus everything that went wrong without being fatal
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub table: RawTable,
    pub statuses: BTreeMap<Ticker, TickerStatus>,
    pub warnings: Vec<DataWarning>,
}

impl FetchReport {
    pub fn record_fetched(&mut self, ticker: &str, table: RawTable, observations: usize) {
        self.table.merge(table);
        self.statuses
            .insert(ticker.to_string(), TickerStatus::Fetched { observations });
    }

    pub fn record_missing(&mut self, source_name: &str, ticker: &str) {
        tracing::warn!(source = source_name, ticker, "Ticker not found");
        self.statuses.insert(ticker.to_string(), TickerStatus::NotFound);
        self.warnings.push(DataWarning::MissingTicker {
            source_name: source_name.to_string(),
            ticker: ticker.to_string(),
        });
    }

    pub fn record_unreadable(&mut self, source_name: &str, ticker: &str, reason: String) {
        tracing::warn!(source = source_name, ticker, %reason, "Ticker unreadable");
        self.statuses
            .insert(ticker.to_string(), TickerStatus::Unreadable(reason.clone()));
        self.warnings.push(DataWarning::UnreadableTicker {
            source_name: source_name.to_string(),
            ticker: ticker.to_string(),
            reason,
        });
    }

    pub fn fetched(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .filter(|(_, s)| matches!(s, TickerStatus::Fetched { .. }))
            .map(|(t, _)| t.as_str())
    }
}

/// Trait for historical price sources
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Source name for logging and warnings
    fn name(&self) -> &str;

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport>;
}

/// Build the adapter selected in the config
pub fn build_source(config: &Config) -> Result<Box<dyn PriceSource>> {
    let source: Box<dyn PriceSource> = match config.data.source {
        SourceKind::Csv => Box::new(CsvSource::new(&config.data.path)),
        SourceKind::Moex => Box::new(MoexSource::new(config.moex.clone())),
        SourceKind::Provider => Box::new(ProviderSource::new(config.provider.clone())),
    };
    Ok(source)
}

/// Run `op` up to `max_retries + 1` times while it fails transiently.
///
/// Exhausted or non-transient transport errors surface as
/// [`PfoError::SourceUnavailable`].
pub(crate) async fn with_retries<T, F, Fut>(source_name: &str, max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                tracing::debug!(source = source_name, attempt, "Retrying after error: {}", e);
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }
            Err(PfoError::Http(e)) => return Err(PfoError::unavailable(source_name, e.to_string())),
            Err(e) => return Err(e),
        }
    }
}

/// Build the HTTP session for one source or board. Every request is bounded by `timeout_secs`.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("pfo/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PfoError::unavailable("http", e.to_string()))
}
