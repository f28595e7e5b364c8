//! Price normalization
//!
//! Collapses a source-shaped [`RawTable`] keyed by (field, ticker) into a
//! [`PriceMatrix`] with one canonical price column per ticker, then applies the
//! missing-data gate. Dropped tickers are reported as warnings, never errors.


use crate::config::DataConfig;
use crate::error::{PfoError, Result};
use crate::stats::period_returns;
use crate::types::{DataWarning, PriceMatrix, PriceSeries, RawTable, Ticker};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Recognized price fields, most preferred first. Matching ignores case.
pub const PRICE_FIELD_PRIORITY: &[&str] = &[
    "Adj Close",
    "Adj. Close",
    "Adjusted Close",
    "Close",
    "LEGALCLOSEPRICE",
    "WAPRICE",
];

/// Field label used when a normalized matrix is turned back into a raw table
pub const CANONICAL_FIELD: &str = "Adj Close";

/// Default missing-observation threshold
pub const DEFAULT_MAX_MISSING: usize = 50;

/// Date alignment across tickers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    /// Union of all dates, gaps kept as missing
    #[default]
    Outer,
    /// Only dates on which every surviving ticker has a price
    Inner,
}

/// Normalization output
#[derive(Debug, Clone)]
pub struct Normalized {
    pub matrix: PriceMatrix,
    /// Field chosen for each surviving or dropped ticker
    pub fields: BTreeMap<Ticker, String>,
    pub warnings: Vec<DataWarning>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_missing: usize,
    join: JoinPolicy,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    priority: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            max_missing: DEFAULT_MAX_MISSING,
            join: JoinPolicy::Outer,
            start: None,
            end: None,
            priority: PRICE_FIELD_PRIORITY.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self::new()
            .with_max_missing(config.max_missing)
            .with_join(config.join)
            .with_window(config.start_date, config.end_date)
    }

    pub fn with_max_missing(mut self, max_missing: usize) -> Self {
        self.max_missing = max_missing;
        self
    }

    pub fn with_join(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }

    /// Active date window, inclusive on both ends
    pub fn with_window(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Replace the field priority list
    pub fn with_priority(mut self, priority: Vec<String>) -> Self {
        self.priority = priority;
        self
    }

    /// Pick the price field for one ticker.
    ///
    /// Prefers the highest-priority field with observations; falls back to the
    /// highest-priority recognized field even if it is empty.
    pub fn resolve_field<'a>(&self, table: &'a RawTable, ticker: &str) -> Result<&'a str> {
        let keys: Vec<(&'a str, bool)> = table
            .keys()
            .filter(|k| k.ticker == ticker)
            .map(|k| {
                let has_data = table
                    .column(&k.field, ticker)
                    .is_some_and(|c| !c.is_empty());
                (k.field.as_str(), has_data)
            })
            .collect();

        let find = |want_data: bool| {
            self.priority.iter().find_map(|p| {
                keys.iter()
                    .find(|(f, has_data)| f.eq_ignore_ascii_case(p) && (*has_data || !want_data))
                    .map(|(f, _)| *f)
            })
        };

        find(true)
            .or_else(|| find(false))
            .ok_or_else(|| PfoError::NoPriceFieldFound {
                ticker: ticker.to_string(),
                available: keys.iter().map(|(f, _)| f.to_string()).collect(),
            })
    }

    /// Collapse to one canonical column per ticker and apply the missing-data gate
    pub fn normalize(&self, table: &RawTable) -> Result<Normalized> {
        let tickers = table.tickers();
        if tickers.is_empty() {
            return Err(PfoError::EmptyMatrix);
        }

        let mut fields = BTreeMap::new();
        let mut series = Vec::with_capacity(tickers.len());
        for ticker in &tickers {
            let field = self.resolve_field(table, ticker)?;
            let column = table.column(field, ticker).cloned().unwrap_or_default();
            let windowed: BTreeMap<NaiveDate, f64> = column
                .into_iter()
                .filter(|(d, _)| self.in_window(*d))
                .collect();

            fields.insert(ticker.to_string(), field.to_string());
            series.push(PriceSeries::from_map(*ticker, &windowed));
        }

        let mut matrix = PriceMatrix::from_series(&series)?;
        let n_dates = matrix.n_dates();
        let mut warnings = Vec::new();

        let threshold = self.max_missing;
        matrix.retain_tickers(|ticker, column| {
            let missing = column.iter().filter(|v| v.is_none()).count();
            if missing > threshold || missing == n_dates {
                warnings.push(DataWarning::InsufficientHistory {
                    ticker: ticker.to_string(),
                    missing,
                    threshold,
                });
                false
            } else {
                true
            }
        });

        self.drop_without_returns(&mut matrix, &mut warnings);
        if self.join == JoinPolicy::Inner {
            matrix.drop_incomplete_rows();
            self.drop_without_returns(&mut matrix, &mut warnings);
        }

        for w in &warnings {
            warn!("{}", w);
        }
        info!(
            tickers = matrix.n_tickers(),
            dates = matrix.n_dates(),
            dropped = warnings.len(),
            "Normalized price matrix"
        );

        Ok(Normalized {
            matrix,
            fields,
            warnings,
        })
    }

    /// Drop tickers that cannot produce a single period return. Dropping a
    /// ticker can remove dates, so this runs until nothing changes.
    fn drop_without_returns(&self, matrix: &mut PriceMatrix, warnings: &mut Vec<DataWarning>) {
        loop {
            matrix.drop_empty_rows();
            let before = matrix.n_tickers();
            let threshold = self.max_missing;
            matrix.retain_tickers(|ticker, column| {
                if yields_returns(column) {
                    return true;
                }
                warnings.push(DataWarning::InsufficientHistory {
                    ticker: ticker.to_string(),
                    missing: column.iter().filter(|v| v.is_none()).count(),
                    threshold,
                });
                false
            });
            if matrix.n_tickers() == before {
                break;
            }
        }
    }

    fn in_window(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// At least two observations and one computable period return
fn yields_returns(column: &[Option<f64>]) -> bool {
    column.iter().flatten().count() >= 2 && period_returns(column).iter().any(Option::is_some)
}

impl From<&PriceMatrix> for RawTable {
    /// Re-label a normalized matrix under [`CANONICAL_FIELD`]
    fn from(matrix: &PriceMatrix) -> Self {
        let mut table = RawTable::new();
        for (i, ticker) in matrix.tickers().iter().enumerate() {
            table.ensure_column(CANONICAL_FIELD, ticker);
            for (date, value) in matrix.dates().iter().zip(matrix.column(i)) {
                if let Some(v) = value {
                    table.insert(CANONICAL_FIELD, ticker, *date, *v);
                }
            }
        }
        table
    }
}
