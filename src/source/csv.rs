//! CSV directory source
//!
//! One file per ticker, named `<ticker>.csv`. The date column is the first
//! column (or any column called `Date`/`TRADEDATE`); every other column is
//! carried as a field so the normalizer can pick the price.

use super::{FetchReport, FetchRequest, PriceSource};
use crate::error::{PfoError, Result};
use crate::types::RawTable;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const DATE_HEADERS: &[&str] = &["Date", "TRADEDATE", "Datetime", "Timestamp"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y", "%Y%m%d"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Tickers with a `<ticker>.csv` file in the directory
    pub fn available_tickers(&self) -> Result<BTreeSet<String>> {
        if !self.dir.exists() {
            return Err(PfoError::unavailable(
                self.name(),
                format!("{} does not exist", self.dir.display()),
            ));
        }
        if !self.dir.is_dir() {
            return Err(PfoError::unavailable(
                self.name(),
                format!("{} is not a directory", self.dir.display()),
            ));
        }

        let mut tickers = BTreeSet::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if !is_csv || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tickers.insert(stem.to_string());
            }
        }
        Ok(tickers)
    }

    fn ticker_path(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", ticker))
    }
}

#[async_trait]
impl PriceSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport> {
        let available = self.available_tickers()?;
        let tickers: Vec<String> = if request.tickers.is_empty() {
            available.iter().cloned().collect()
        } else {
            request.tickers.clone()
        };

        let mut report = FetchReport::default();
        for ticker in &tickers {
            if !available.contains(ticker) {
                report.record_missing(self.name(), ticker);
                continue;
            }

            match read_ticker_file(&self.ticker_path(ticker), ticker, request) {
                Ok((table, rows)) => report.record_fetched(ticker, table, rows),
                Err(e) => report.record_unreadable(self.name(), ticker, e.to_string()),
            }
        }

        tracing::info!(
            dir = %self.dir.display(),
            requested = tickers.len(),
            fetched = report.fetched().count(),
            "CSV fetch complete"
        );
        Ok(report)
    }
}

/// Parse one ticker file, keeping rows inside the request window
pub fn read_ticker_file(path: &Path, ticker: &str, request: &FetchRequest) -> Result<(RawTable, usize)> {
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(PfoError::InvalidParameter(format!(
            "{}: expected a date column and at least one price column",
            path.display()
        )));
    }

    let date_idx = headers
        .iter()
        .position(|h| DATE_HEADERS.iter().any(|d| d.eq_ignore_ascii_case(h)))
        .unwrap_or(0);

    let mut table = RawTable::new();
    for (idx, field) in headers.iter().enumerate() {
        if idx != date_idx {
            table.ensure_column(field, ticker);
        }
    }

    let mut rows = 0;
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let Some(date) = record.get(date_idx).and_then(parse_date) else {
            tracing::debug!(ticker, line = line + 2, "Skipping row with unparseable date");
            continue;
        };
        if !request.contains(date) {
            continue;
        }

        for (idx, field) in headers.iter().enumerate() {
            if idx == date_idx {
                continue;
            }
            if let Some(value) = record.get(idx).and_then(parse_number) {
                table.insert(field, ticker, date, value);
            }
        }
        rows += 1;
    }

    Ok((table, rows))
}

/// Calendar date from the common CSV date spellings
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| chrono::DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

/// Plain number, optionally with `,` thousands grouping (`1,234.5`).
/// Any other comma (e.g. a decimal comma) makes the value unreadable.
fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("nan") {
        return None;
    }
    if !raw.contains(',') {
        return raw.parse::<f64>().ok();
    }

    let unsigned = raw.strip_prefix('-').unwrap_or(raw);
    let int_part = unsigned.split_once('.').map_or(unsigned, |(int, _)| int);
    let digits = |g: &str| g.bytes().all(|b| b.is_ascii_digit());
    let mut groups = int_part.split(',');
    let grouped = groups
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()) && digits(g))
        && groups.all(|g| g.len() == 3 && digits(g));
    if !grouped {
        return None;
    }
    raw.replace(',', "").parse::<f64>().ok()
}
