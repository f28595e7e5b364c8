//! Return and risk statistics
//!
//! Derives from a [`PriceMatrix`]:
//! - period returns (`price[i] / price[i-1] - 1`)
//! - annualized expected returns, per period or compounded by calendar year
//! - the covariance matrix of period returns (population or sample)
//! - per-ticker risk summaries used for screening
//!
//! Missing prices are forward-filled before differencing, so a gap yields a
//! zero return and the next observation is measured against the last known
//! price. Leading gaps stay missing. Means skip missing returns and each
//! covariance entry uses the pairwise-complete observations of its two tickers.

#[cfg(test)]
mod tests;

use crate::error::{PfoError, Result};
use crate::types::{PriceMatrix, Ticker};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// How period returns are scaled to a yearly figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnualizationMode {
    /// Mean period return times the annualization factor
    #[serde(alias = "period", alias = "mean")]
    PerPeriod,
    /// Mean of the compounded returns of each calendar year in the data.
    ///
    /// Every year counts once, so a partial first or last year weighs as much
    /// as a full one.
    #[default]
    #[serde(alias = "year", alias = "calendar-year")]
    ByCalendarYear,
}

impl FromStr for AnnualizationMode {
    type Err = PfoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "per-period" | "period" | "mean" => Ok(Self::PerPeriod),
            "by-calendar-year" | "year" | "calendar-year" => Ok(Self::ByCalendarYear),
            other => Err(PfoError::InvalidParameter(format!(
                "unknown annualization mode: {}",
                other
            ))),
        }
    }
}

/// Covariance normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CovarianceKind {
    /// Divide by N
    #[default]
    Population,
    /// Divide by N - 1
    Sample,
}

impl CovarianceKind {
    fn ddof(self) -> usize {
        match self {
            CovarianceKind::Population => 0,
            CovarianceKind::Sample => 1,
        }
    }
}

impl FromStr for CovarianceKind {
    type Err = PfoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "population" => Ok(Self::Population),
            "sample" => Ok(Self::Sample),
            other => Err(PfoError::InvalidParameter(format!(
                "unknown covariance kind: {}",
                other
            ))),
        }
    }
}

/// Period-over-period returns; one row fewer than the source prices
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    dates: Vec<NaiveDate>,
    tickers: Vec<Ticker>,
    columns: Vec<Vec<Option<f64>>>,
}

impl ReturnMatrix {
    pub fn from_prices(prices: &PriceMatrix) -> Result<Self> {
        if prices.n_tickers() == 0 || prices.n_dates() < 2 {
            return Err(PfoError::EmptyMatrix);
        }

        let columns = (0..prices.n_tickers())
            .map(|i| period_returns(prices.column(i)))
            .collect();

        Ok(Self {
            dates: prices.dates()[1..].to_vec(),
            tickers: prices.tickers().to_vec(),
            columns,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn column(&self, index: usize) -> &[Option<f64>] {
        &self.columns[index]
    }

    pub fn n_tickers(&self) -> usize {
        self.tickers.len()
    }

    /// Observed returns of one ticker
    pub fn observed(&self, index: usize) -> Vec<f64> {
        self.columns[index].iter().flatten().copied().collect()
    }

    pub fn mean(&self, index: usize) -> Option<f64> {
        let observed = self.observed(index);
        if observed.is_empty() {
            return None;
        }
        Some(observed.iter().sum::<f64>() / observed.len() as f64)
    }

    /// Compounded return of each calendar year with at least one observation
    pub fn yearly_returns(&self, index: usize) -> BTreeMap<i32, f64> {
        let mut years: BTreeMap<i32, f64> = BTreeMap::new();
        for (date, r) in self.dates.iter().zip(&self.columns[index]) {
            if let Some(r) = r {
                *years.entry(date.year()).or_insert(1.0) *= 1.0 + r;
            }
        }
        years.into_iter().map(|(y, growth)| (y, growth - 1.0)).collect()
    }

    /// Covariance of two columns over their pairwise-complete observations
    pub fn covariance(&self, i: usize, j: usize, kind: CovarianceKind) -> Result<f64> {
        let pairs: Vec<(f64, f64)> = self.columns[i]
            .iter()
            .zip(&self.columns[j])
            .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
            .collect();

        let n = pairs.len();
        if n <= kind.ddof() || n == 0 {
            return Err(PfoError::InvalidParameter(format!(
                "{} / {}: {} overlapping returns, not enough for covariance",
                self.tickers[i], self.tickers[j], n
            )));
        }

        let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
        let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
        let sum: f64 = pairs
            .iter()
            .map(|(a, b)| (a - mean_a) * (b - mean_b))
            .sum();

        Ok(sum / (n - kind.ddof()) as f64)
    }
}

/// `price[i] / price[i-1] - 1` over forward-filled prices
pub(crate) fn period_returns(prices: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last: Option<f64> = None;
    let mut filled = Vec::with_capacity(prices.len());
    for p in prices {
        if p.is_some() {
            last = *p;
        }
        filled.push(last);
    }

    filled
        .windows(2)
        .map(|w| match (w[0], w[1]) {
            (Some(prev), Some(cur)) if prev > 0.0 => Some(cur / prev - 1.0),
            _ => None,
        })
        .collect()
}

/// Square symmetric covariance matrix of period returns
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    tickers: Vec<Ticker>,
    values: Vec<Vec<f64>>,
}

impl CovarianceMatrix {
    pub fn from_returns(returns: &ReturnMatrix, kind: CovarianceKind) -> Result<Self> {
        let n = returns.n_tickers();
        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let c = returns.covariance(i, j, kind)?;
                values[i][j] = c;
                values[j][i] = c;
            }
        }
        Ok(Self {
            tickers: returns.tickers().to_vec(),
            values,
        })
    }

    /// Build from precomputed values. The matrix must be square and symmetric.
    pub fn from_values(tickers: Vec<Ticker>, values: Vec<Vec<f64>>) -> Result<Self> {
        let n = tickers.len();
        if values.len() != n || values.iter().any(|row| row.len() != n) {
            return Err(PfoError::InvalidParameter(format!(
                "covariance must be {}x{}",
                n, n
            )));
        }
        for i in 0..n {
            for j in 0..i {
                if (values[i][j] - values[j][i]).abs() > 1e-12 {
                    return Err(PfoError::InvalidParameter(format!(
                        "covariance not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        Ok(Self { tickers, values })
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn dim(&self) -> usize {
        self.tickers.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i]
    }

    pub fn variance(&self, i: usize) -> f64 {
        self.values[i][i]
    }

    /// `wᵗ Σ w`
    pub fn portfolio_variance(&self, weights: &[f64]) -> f64 {
        let mut var = 0.0;
        for (i, wi) in weights.iter().enumerate() {
            for (j, wj) in weights.iter().enumerate() {
                var += wi * wj * self.values[i][j];
            }
        }
        var
    }

    /// Correlation matrix; zero-variance tickers correlate 0 with others, 1 with themselves
    pub fn correlation(&self) -> Vec<Vec<f64>> {
        let n = self.dim();
        let vols: Vec<f64> = (0..n).map(|i| self.variance(i).max(0.0).sqrt()).collect();
        let mut corr = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if vols[i] > 0.0 && vols[j] > 0.0 {
                    corr[i][j] = self.values[i][j] / (vols[i] * vols[j]);
                } else if i == j {
                    corr[i][j] = 1.0;
                }
            }
        }
        corr
    }
}

/// Everything the simulator needs from the price history
#[derive(Debug, Clone)]
pub struct RiskStatistics {
    pub returns: ReturnMatrix,
    pub annualized_returns: Vec<f64>,
    pub covariance: CovarianceMatrix,
}

/// Period returns, annualized expected returns and the covariance matrix
pub fn returns_and_covariance(
    prices: &PriceMatrix,
    mode: AnnualizationMode,
    annualization_factor: f64,
    kind: CovarianceKind,
) -> Result<RiskStatistics> {
    let returns = ReturnMatrix::from_prices(prices)?;
    let annualized_returns = annualized_returns(&returns, mode, annualization_factor)?;
    let covariance = CovarianceMatrix::from_returns(&returns, kind)?;

    tracing::debug!(
        tickers = returns.n_tickers(),
        periods = returns.dates().len(),
        ?mode,
        ?kind,
        "Computed return statistics"
    );

    Ok(RiskStatistics {
        returns,
        annualized_returns,
        covariance,
    })
}

pub fn annualized_returns(
    returns: &ReturnMatrix,
    mode: AnnualizationMode,
    annualization_factor: f64,
) -> Result<Vec<f64>> {
    (0..returns.n_tickers())
        .map(|i| {
            let value = match mode {
                AnnualizationMode::PerPeriod => returns.mean(i).map(|m| m * annualization_factor),
                AnnualizationMode::ByCalendarYear => {
                    let yearly = returns.yearly_returns(i);
                    if yearly.is_empty() {
                        None
                    } else {
                        Some(yearly.values().sum::<f64>() / yearly.len() as f64)
                    }
                }
            };
            value.ok_or_else(|| {
                PfoError::InvalidParameter(format!("{} has no observed returns", returns.tickers()[i]))
            })
        })
        .collect()
}

/// Stand-alone risk profile of one ticker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerSummary {
    pub ticker: Ticker,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
}

/// Per-ticker return, volatility, Sharpe and Sortino ratios
pub fn ticker_summaries(
    stats: &RiskStatistics,
    risk_free_rate: f64,
    periods_per_year: f64,
) -> Vec<TickerSummary> {
    let scale = periods_per_year.sqrt();
    (0..stats.returns.n_tickers())
        .map(|i| {
            let ret = stats.annualized_returns[i];
            let vol = stats.covariance.variance(i).max(0.0).sqrt() * scale;

            let observed = stats.returns.observed(i);
            let downside = if observed.is_empty() {
                0.0
            } else {
                let sq: f64 = observed.iter().map(|r| r.min(0.0).powi(2)).sum();
                (sq / observed.len() as f64).sqrt() * scale
            };

            TickerSummary {
                ticker: stats.returns.tickers()[i].clone(),
                annualized_return: ret,
                annualized_volatility: vol,
                sharpe: risk_adjusted_ratio(ret - risk_free_rate, vol),
                sortino: risk_adjusted_ratio(ret - risk_free_rate, downside),
            }
        })
        .collect()
}

/// Tickers whose Sharpe or Sortino ratio reaches its threshold.
///
/// Unset thresholds never match; with neither set every ticker passes.
pub fn select_tickers(
    summaries: &[TickerSummary],
    min_sharpe: Option<f64>,
    min_sortino: Option<f64>,
) -> Vec<Ticker> {
    let reaches = |value: f64, min: Option<f64>| min.is_some_and(|m| value >= m);
    summaries
        .iter()
        .filter(|s| {
            (min_sharpe.is_none() && min_sortino.is_none())
                || reaches(s.sharpe, min_sharpe)
                || reaches(s.sortino, min_sortino)
        })
        .map(|s| s.ticker.clone())
        .collect()
}

/// Excess return over risk.
///
/// Zero risk gives `+inf` / `-inf` by the sign of the excess return and `NaN`
/// when the excess return is zero as well.
pub fn risk_adjusted_ratio(excess_return: f64, risk: f64) -> f64 {
    if risk == 0.0 {
        if excess_return > 0.0 {
            f64::INFINITY
        } else if excess_return < 0.0 {
            f64::NEG_INFINITY
        } else {
            f64::NAN
        }
    } else {
        excess_return / risk
    }
}
