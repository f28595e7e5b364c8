//! Core data types for price ingestion

use crate::error::{PfoError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Security identifier, e.g. `AAPL` or `SBER`
pub type Ticker = String;

/// Two-key column label: (price field, ticker)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub field: String,
    pub ticker: Ticker,
}

impl FieldKey {
    pub fn new(field: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ticker: ticker.into(),
        }
    }
}

/// Source-shaped table before normalization.
///
/// Every column is keyed by [`FieldKey`]; a date missing from a column is a
/// missing observation. Columns from different tickers are implicitly
/// outer-joined on date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    columns: BTreeMap<FieldKey, BTreeMap<NaiveDate, f64>>,
}

impl RawTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one observation. Non-finite values count as missing and are dropped.
    pub fn insert(&mut self, field: &str, ticker: &str, date: NaiveDate, value: f64) {
        let column = self
            .columns
            .entry(FieldKey::new(field, ticker))
            .or_default();
        if value.is_finite() {
            column.insert(date, value);
        }
    }

    /// Register a column that may end up with no observations
    pub fn ensure_column(&mut self, field: &str, ticker: &str) {
        self.columns.entry(FieldKey::new(field, ticker)).or_default();
    }

    /// Outer-join another table into this one. Later values win on overlap.
    pub fn merge(&mut self, other: RawTable) {
        for (key, column) in other.columns {
            self.columns.entry(key).or_default().extend(column);
        }
    }

    pub fn column(&self, field: &str, ticker: &str) -> Option<&BTreeMap<NaiveDate, f64>> {
        self.columns.get(&FieldKey::new(field, ticker))
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.columns.keys()
    }

    pub fn tickers(&self) -> BTreeSet<&str> {
        self.columns.keys().map(|k| k.ticker.as_str()).collect()
    }

    pub fn fields(&self) -> BTreeSet<&str> {
        self.columns.keys().map(|k| k.field.as_str()).collect()
    }

    /// Fields carrying at least one observation for `ticker`
    pub fn fields_for(&self, ticker: &str) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(k, col)| k.ticker == ticker && !col.is_empty())
            .map(|(k, _)| k.field.as_str())
            .collect()
    }

    /// Drop every column of a ticker
    pub fn remove_ticker(&mut self, ticker: &str) {
        self.columns.retain(|k, _| k.ticker != ticker);
    }

    /// Keep only observations within `[start, end]`
    pub fn restrict(&mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) {
        for column in self.columns.values_mut() {
            column.retain(|d, _| start.map_or(true, |s| *d >= s) && end.map_or(true, |e| *d <= e));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.values().all(|c| c.is_empty())
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }
}

/// One ticker's canonical prices, strictly increasing by date
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub ticker: Ticker,
    points: Vec<(NaiveDate, f64)>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Result<Self> {
        let ticker = ticker.into();
        if let Some(w) = points.windows(2).find(|w| w[0].0 >= w[1].0) {
            return Err(PfoError::InvalidParameter(format!(
                "{}: dates not strictly increasing at {}",
                ticker, w[1].0
            )));
        }
        Ok(Self { ticker, points })
    }

    pub fn from_map(ticker: impl Into<String>, map: &BTreeMap<NaiveDate, f64>) -> Self {
        Self {
            ticker: ticker.into(),
            points: map.iter().map(|(d, v)| (*d, *v)).collect(),
        }
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Aligned price table: one canonical price column per ticker over a shared
/// date index. `None` marks a missing observation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceMatrix {
    dates: Vec<NaiveDate>,
    tickers: Vec<Ticker>,
    /// Column-major: `columns[ticker][date]`
    columns: Vec<Vec<Option<f64>>>,
}

impl PriceMatrix {
    pub fn new(
        dates: Vec<NaiveDate>,
        tickers: Vec<Ticker>,
        columns: Vec<Vec<Option<f64>>>,
    ) -> Result<Self> {
        if tickers.len() != columns.len() {
            return Err(PfoError::InvalidParameter(format!(
                "{} tickers but {} columns",
                tickers.len(),
                columns.len()
            )));
        }
        if let Some((t, c)) = tickers.iter().zip(&columns).find(|(_, c)| c.len() != dates.len()) {
            return Err(PfoError::InvalidParameter(format!(
                "column {} has {} rows, index has {}",
                t,
                c.len(),
                dates.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PfoError::InvalidParameter(
                "date index not strictly increasing".into(),
            ));
        }
        let unique: BTreeSet<&str> = tickers.iter().map(String::as_str).collect();
        if unique.len() != tickers.len() {
            return Err(PfoError::InvalidParameter("duplicate tickers".into()));
        }
        Ok(Self { dates, tickers, columns })
    }

    /// Outer-join series on the union of their dates
    pub fn from_series(series: &[PriceSeries]) -> Result<Self> {
        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|s| s.points.iter().map(|(d, _)| *d))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let columns = series
            .iter()
            .map(|s| {
                let by_date: BTreeMap<NaiveDate, f64> = s.points.iter().copied().collect();
                dates.iter().map(|d| by_date.get(d).copied()).collect()
            })
            .collect();

        Self::new(dates, series.iter().map(|s| s.ticker.clone()).collect(), columns)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn n_dates(&self) -> usize {
        self.dates.len()
    }

    pub fn n_tickers(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() || self.dates.is_empty()
    }

    pub fn column(&self, index: usize) -> &[Option<f64>] {
        &self.columns[index]
    }

    pub fn column_by_ticker(&self, ticker: &str) -> Option<&[Option<f64>]> {
        let idx = self.tickers.iter().position(|t| t == ticker)?;
        Some(&self.columns[idx])
    }

    pub fn get(&self, ticker: &str, date: NaiveDate) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        self.column_by_ticker(ticker)?[row]
    }

    pub fn missing_count(&self, index: usize) -> usize {
        self.columns[index].iter().filter(|v| v.is_none()).count()
    }

    /// Observed (non-missing) points of one ticker
    pub fn series(&self, ticker: &str) -> Option<PriceSeries> {
        let column = self.column_by_ticker(ticker)?;
        let points = self
            .dates
            .iter()
            .zip(column)
            .filter_map(|(d, v)| v.map(|v| (*d, v)))
            .collect();
        Some(PriceSeries {
            ticker: ticker.to_string(),
            points,
        })
    }

    /// Keep tickers for which `keep` returns true
    pub fn retain_tickers<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &[Option<f64>]) -> bool,
    {
        let mut tickers = Vec::with_capacity(self.tickers.len());
        let mut columns = Vec::with_capacity(self.columns.len());
        for (t, c) in self.tickers.drain(..).zip(self.columns.drain(..)) {
            if keep(&t, &c) {
                tickers.push(t);
                columns.push(c);
            }
        }
        self.tickers = tickers;
        self.columns = columns;
    }

    /// Subset of tickers, in the order given. Unknown tickers are ignored.
    pub fn select(&self, tickers: &[&str]) -> PriceMatrix {
        let mut out = PriceMatrix {
            dates: self.dates.clone(),
            tickers: Vec::new(),
            columns: Vec::new(),
        };
        for t in tickers {
            if let Some(col) = self.column_by_ticker(t) {
                out.tickers.push(t.to_string());
                out.columns.push(col.to_vec());
            }
        }
        out
    }

    /// Drop dates where any ticker is missing (inner join)
    pub fn drop_incomplete_rows(&mut self) {
        let keep: Vec<bool> = (0..self.dates.len())
            .map(|i| self.columns.iter().all(|c| c[i].is_some()))
            .collect();
        self.filter_rows(&keep);
    }

    /// Drop dates where every ticker is missing
    pub fn drop_empty_rows(&mut self) {
        let keep: Vec<bool> = (0..self.dates.len())
            .map(|i| self.columns.iter().any(|c| c[i].is_some()))
            .collect();
        self.filter_rows(&keep);
    }

    fn filter_rows(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.dates.retain(|_| *flags.next().unwrap_or(&false));
        for column in &mut self.columns {
            let mut flags = keep.iter();
            column.retain(|_| *flags.next().unwrap_or(&false));
        }
    }
}

/// Non-fatal data problem, collected next to fetched or normalized data
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataWarning {
    #[error("{source_name}: ticker {ticker} not found")]
    MissingTicker { source_name: String, ticker: Ticker },

    #[error("{ticker}: insufficient history ({missing} missing observations, threshold {threshold})")]
    InsufficientHistory {
        ticker: Ticker,
        missing: usize,
        threshold: usize,
    },

    #[error("{source_name}: ticker {ticker} unreadable: {reason}")]
    UnreadableTicker {
        source_name: String,
        ticker: Ticker,
        reason: String,
    },
}

impl DataWarning {
    pub fn ticker(&self) -> &str {
        match self {
            DataWarning::MissingTicker { ticker, .. } => ticker,
            DataWarning::InsufficientHistory { ticker, .. } => ticker,
            DataWarning::UnreadableTicker { ticker, .. } => ticker,
        }
    }
}
