//! Market-data provider source (chart API)
//!
//! Batch-fetches daily OHLC plus adjusted close for a ticker list, either over
//! an explicit range or the maximum history the provider has.

use super::{http_client, with_retries, FetchReport, FetchRequest, PriceSource};
use crate::config::ProviderConfig;
use crate::error::{PfoError, Result};
use crate::types::RawTable;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate};
use futures_util::future::join_all;
use serde::Deserialize;

/// Requested history span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    Range { start: NaiveDate, end: NaiveDate },
    Max,
}

impl HistoryWindow {
    pub fn from_request(request: &FetchRequest, today: NaiveDate) -> Self {
        match (request.start, request.end) {
            (None, None) => HistoryWindow::Max,
            (start, end) => HistoryWindow::Range {
                start: start.unwrap_or(NaiveDate::MIN),
                end: end.unwrap_or(today),
            },
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("interval", "1d".to_string()),
            ("includeAdjustedClose", "true".to_string()),
            ("events", "div,splits".to_string()),
        ];
        match self {
            HistoryWindow::Max => query.push(("range", "max".to_string())),
            HistoryWindow::Range { start, end } => {
                let ts = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map_or(0, |dt| dt.and_utc().timestamp().max(0));
                query.push(("period1", ts(*start).to_string()));
                // period2 is exclusive
                query.push(("period2", ts(*end + Duration::days(1)).to_string()));
            }
        }
        query
    }
}

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Deserialize)]
pub struct Chart {
    pub result: Option<Vec<ChartResult>>,
    pub error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
pub struct ChartError {
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChartResult {
    #[serde(default)]
    pub meta: ChartMeta,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartMeta {
    /// Exchange offset from UTC in seconds
    #[serde(default)]
    pub gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<Quote>,
    #[serde(default)]
    pub adjclose: Vec<AdjClose>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct AdjClose {
    #[serde(default)]
    pub adjclose: Vec<Option<f64>>,
}

impl ChartResponse {
    /// `None` when the provider does not know the ticker or has no bars
    pub fn to_table(&self, ticker: &str) -> Option<(RawTable, usize)> {
        let result = self.chart.result.as_ref()?.first()?;
        if result.timestamp.is_empty() {
            return None;
        }

        let dates: Vec<Option<NaiveDate>> = result
            .timestamp
            .iter()
            .map(|ts| DateTime::from_timestamp(ts + result.meta.gmtoffset, 0).map(|dt| dt.date_naive()))
            .collect();

        let mut table = RawTable::new();
        let mut put = |field: &str, values: &[Option<f64>]| {
            table.ensure_column(field, ticker);
            for (date, value) in dates.iter().zip(values) {
                if let (Some(d), Some(v)) = (date, value) {
                    table.insert(field, ticker, *d, *v);
                }
            }
        };

        if let Some(q) = result.indicators.quote.first() {
            put("Open", &q.open);
            put("High", &q.high);
            put("Low", &q.low);
            put("Close", &q.close);
        }
        if let Some(adj) = result.indicators.adjclose.first() {
            put("Adj Close", &adj.adjclose);
        }

        let rows = dates.iter().filter(|d| d.is_some()).count();
        Some((table, rows))
    }
}

pub struct ProviderSource {
    config: ProviderConfig,
}

impl ProviderSource {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn chart_url(&self, ticker: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}",
            self.config.base_url.trim_end_matches('/'),
            ticker
        )
    }

    async fn fetch_one(
        &self,
        http: &reqwest::Client,
        ticker: &str,
        window: HistoryWindow,
    ) -> Result<Option<ChartResponse>> {
        let url = self.chart_url(ticker);
        let query = window.query();
        let (url, query) = (&url, &query);

        with_retries(self.name(), self.config.max_retries, || async move {
            let resp = http.get(url).query(query).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let chart: ChartResponse = resp.error_for_status()?.json().await?;
            Ok(Some(chart))
        })
        .await
    }
}

#[async_trait]
impl PriceSource for ProviderSource {
    fn name(&self) -> &str {
        "provider"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport> {
        if request.tickers.is_empty() {
            return Err(PfoError::InvalidParameter(
                "provider fetch needs at least one ticker".into(),
            ));
        }

        let http = http_client(self.config.timeout_secs)?;
        let window = HistoryWindow::from_request(request, chrono::Utc::now().date_naive());

        let responses = join_all(
            request
                .tickers
                .iter()
                .map(|t| self.fetch_one(&http, t, window)),
        )
        .await;

        let mut report = FetchReport::default();
        for (ticker, response) in request.tickers.iter().zip(responses) {
            match response?.as_ref().and_then(|r| r.to_table(ticker)) {
                Some((mut table, _)) => {
                    table.restrict(request.start, request.end);
                    let rows = ["Adj Close", "Close"]
                        .iter()
                        .filter_map(|f| table.column(f, ticker))
                        .map(|c| c.len())
                        .max()
                        .unwrap_or(0);
                    report.record_fetched(ticker, table, rows);
                }
                None => report.record_missing(self.name(), ticker),
            }
        }

        tracing::info!(
            ?window,
            requested = request.tickers.len(),
            fetched = report.fetched().count(),
            "Provider fetch complete"
        );
        Ok(report)
    }
}
