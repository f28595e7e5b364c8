//! Exchange ISS history source
//!
//! Walks the configured boards in order and queries each still-unresolved
//! ticker's trading history there. Every board gets its own HTTP session which
//! is dropped once the board is done.

use super::{http_client, with_retries, FetchReport, FetchRequest, PriceSource};
use crate::config::{BoardConfig, MoexConfig};
use crate::error::Result;
use crate::types::RawTable;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Price fields requested from the history endpoint
pub const HISTORY_FIELDS: &[&str] = &["CLOSE", "LEGALCLOSEPRICE", "WAPRICE"];

/// Hard stop for runaway pagination
const MAX_PAGES: usize = 1_000;

/// ISS table block: column names plus positional rows
#[derive(Debug, Clone, Deserialize)]
pub struct IssBlock {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

impl IssBlock {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    pub history: IssBlock,
    #[serde(rename = "history.cursor")]
    pub cursor: Option<IssBlock>,
}

impl HistoryPage {
    /// Offset of the next page, if any
    pub fn next_start(&self, start: usize) -> Option<usize> {
        if let Some(cursor) = &self.cursor {
            let row = cursor.data.first()?;
            let field = |name: &str| {
                cursor
                    .index_of(name)
                    .and_then(|i| row.get(i))
                    .and_then(Value::as_u64)
                    .map(|v| v as usize)
            };
            let (index, total, page_size) = (field("INDEX")?, field("TOTAL")?, field("PAGESIZE")?);
            let next = index + page_size;
            return (next < total && page_size > 0).then_some(next);
        }
        (!self.history.data.is_empty()).then_some(start + self.history.data.len())
    }

    /// Observations of one ticker as (field, ticker) columns
    pub fn to_table(&self, ticker: &str) -> (RawTable, usize) {
        let mut table = RawTable::new();
        let Some(date_idx) = self.history.index_of("TRADEDATE") else {
            return (table, 0);
        };
        let fields: Vec<(&str, usize)> = HISTORY_FIELDS
            .iter()
            .filter_map(|f| self.history.index_of(f).map(|i| (*f, i)))
            .collect();

        let mut rows = 0;
        for row in &self.history.data {
            let Some(date) = row
                .get(date_idx)
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            else {
                continue;
            };
            for (field, idx) in &fields {
                if let Some(v) = row.get(*idx).and_then(Value::as_f64) {
                    table.insert(field, ticker, date, v);
                }
            }
            rows += 1;
        }
        (table, rows)
    }
}

/// HTTP session scoped to one board
struct BoardSession<'a> {
    http: reqwest::Client,
    base_url: &'a str,
    board: &'a BoardConfig,
    max_retries: u32,
}

impl<'a> BoardSession<'a> {
    fn open(config: &'a MoexConfig, board: &'a BoardConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/'),
            board,
            max_retries: config.max_retries,
        })
    }

    fn history_url(&self, ticker: &str) -> String {
        format!(
            "{}/history/engines/{}/markets/{}/boards/{}/securities/{}.json",
            self.base_url, self.board.engine, self.board.market, self.board.board, ticker
        )
    }

    async fn page(&self, ticker: &str, request: &FetchRequest, start: usize) -> Result<HistoryPage> {
        let url = self.history_url(ticker);
        let mut query = vec![
            ("iss.meta".to_string(), "off".to_string()),
            ("start".to_string(), start.to_string()),
            (
                "history.columns".to_string(),
                std::iter::once("TRADEDATE")
                    .chain(HISTORY_FIELDS.iter().copied())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        ];
        if let Some(from) = request.start {
            query.push(("from".to_string(), from.format("%Y-%m-%d").to_string()));
        }
        if let Some(till) = request.end {
            query.push(("till".to_string(), till.format("%Y-%m-%d").to_string()));
        }

        let (http, url, query) = (&self.http, &url, &query);
        with_retries("moex", self.max_retries, || async move {
            let page: HistoryPage = http
                .get(url)
                .query(query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(page)
        })
        .await
    }

    /// Full history of one ticker on this board; empty if the board does not list it
    async fn history(&self, ticker: &str, request: &FetchRequest) -> Result<(RawTable, usize)> {
        let mut table = RawTable::new();
        let mut rows = 0;
        let mut start = 0;

        for _ in 0..MAX_PAGES {
            let page = self.page(ticker, request, start).await?;
            let (chunk, n) = page.to_table(ticker);
            table.merge(chunk);
            rows += n;
            debug!(ticker, board = %self.board.board, start, rows = n, "ISS page");

            match page.next_start(start) {
                Some(next) if n > 0 => start = next,
                _ => break,
            }
        }

        table.restrict(request.start, request.end);
        Ok((table, rows))
    }
}

pub struct MoexSource {
    config: MoexConfig,
}

impl MoexSource {
    pub fn new(config: MoexConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PriceSource for MoexSource {
    fn name(&self) -> &str {
        "moex"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport> {
        let mut report = FetchReport::default();
        let mut pending: BTreeSet<&str> = request.tickers.iter().map(String::as_str).collect();

        for board in &self.config.boards {
            if pending.is_empty() {
                break;
            }
            let session = BoardSession::open(&self.config, board)?;

            let mut found = Vec::new();
            for ticker in &pending {
                let (table, rows) = session.history(ticker, request).await?;
                if rows > 0 {
                    report.record_fetched(ticker, table, rows);
                    found.push(*ticker);
                }
            }
            for ticker in found {
                pending.remove(ticker);
            }
            debug!(board = %board.board, remaining = pending.len(), "Board done");
        }

        for ticker in pending {
            report.record_missing(self.name(), ticker);
        }

        tracing::info!(
            boards = self.config.boards.len(),
            fetched = report.fetched().count(),
            "MOEX fetch complete"
        );
        Ok(report)
    }
}
