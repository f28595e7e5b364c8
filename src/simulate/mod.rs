//! # Monte Carlo Frontier Sampling
//!
//! Samples random long-only weight vectors over the surviving tickers and
//! scores each one:
//! - annualized return `w · μ`
//! - annualized volatility `sqrt(wᵗ Σ w) * sqrt(periods_per_year)`
//! - risk-adjusted ratio `(return - rfr) / volatility`
//!
//! Draws are split into fixed-size chunks, each with its own RNG seeded from
//! the run seed and the chunk index, so a seeded run gives the same frontier
//! whether chunks run sequentially or on the rayon pool. The frontier keeps
//! generation order.
//!
//! ```rust,ignore
//! use pfo::simulate::Simulator;
//!
//! let frontier = Simulator::new(config.simulation.clone()).simulate(&prices)?;
//! let best = frontier.max_ratio();
//! ```

#[cfg(test)]
mod tests;

use crate::config::SimulationConfig;
use crate::error::{PfoError, Result};
use crate::stats::{
    returns_and_covariance, risk_adjusted_ratio, select_tickers, ticker_summaries, AnnualizationMode,
    RiskStatistics,
};
use crate::types::{PriceMatrix, Ticker};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

/// Draws per RNG stream
const CHUNK_SIZE: usize = 1024;

/// Redraws allowed when every uniform draw comes out zero
const MAX_WEIGHT_DRAWS: usize = 16;

/// Negative variance within this fraction of the largest asset variance is rounding noise
const VARIANCE_TOLERANCE: f64 = 1e-12;

/// One Monte Carlo draw
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampledPortfolio {
    pub weights: Vec<f64>,
    /// Annualized expected return
    pub annual_return: f64,
    /// Annualized volatility
    pub volatility: f64,
    /// `(annual_return - rfr) / volatility`; ±inf or NaN at zero volatility
    pub ratio: f64,
}

/// Sampled frontier in generation order
#[derive(Debug, Clone, PartialEq)]
pub struct Frontier {
    tickers: Vec<Ticker>,
    portfolios: Vec<SampledPortfolio>,
    risk_free_rate: f64,
    failed_draws: usize,
}

impl Frontier {
    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn portfolios(&self) -> &[SampledPortfolio] {
        &self.portfolios
    }

    pub fn len(&self) -> usize {
        self.portfolios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty()
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    /// Draws rejected and redrawn during the run
    pub fn failed_draws(&self) -> usize {
        self.failed_draws
    }

    /// Highest risk-adjusted ratio; NaN ratios are skipped
    pub fn max_ratio(&self) -> Option<&SampledPortfolio> {
        self.portfolios
            .iter()
            .filter(|p| !p.ratio.is_nan())
            .max_by(|a, b| a.ratio.total_cmp(&b.ratio))
    }

    pub fn min_volatility(&self) -> Option<&SampledPortfolio> {
        self.portfolios
            .iter()
            .min_by(|a, b| a.volatility.total_cmp(&b.volatility))
    }

    /// Table header: Return, Volatility, Sharp Ratio, then `<ticker> weight`
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            "Return".to_string(),
            "Volatility".to_string(),
            "Sharp Ratio".to_string(),
        ];
        columns.extend(self.tickers.iter().map(|t| format!("{} weight", t)));
        columns
    }

    /// Table rows matching [`Frontier::columns`]
    pub fn rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        self.portfolios.iter().map(|p| {
            let mut row = Vec::with_capacity(3 + p.weights.len());
            row.extend([p.annual_return, p.volatility, p.ratio]);
            row.extend_from_slice(&p.weights);
            row
        })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(self.columns())?;
        for row in self.rows() {
            out.write_record(row.iter().map(|v| v.to_string()))?;
        }
        out.flush()?;
        Ok(())
    }
}

pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        let c = &self.config;
        if c.periods_per_year == 0 {
            return Err(PfoError::InvalidParameter("periods_per_year must be positive".into()));
        }
        if !c.risk_free_rate.is_finite() {
            return Err(PfoError::InvalidParameter("risk_free_rate must be finite".into()));
        }
        if !(0.0..=1.0).contains(&c.max_failure_rate) {
            return Err(PfoError::InvalidParameter(format!(
                "max_failure_rate must be within [0, 1], got {}",
                c.max_failure_rate
            )));
        }
        Ok(())
    }

    /// Derive statistics from prices and sample the frontier.
    ///
    /// With `min_sharpe` or `min_sortino` set, tickers failing both screens are
    /// left out before sampling.
    pub fn simulate(&self, prices: &PriceMatrix) -> Result<Frontier> {
        self.validate()?;
        if prices.is_empty() {
            return Err(PfoError::EmptyMatrix);
        }
        let stats = self.statistics(prices)?;
        match self.screen(&stats)? {
            Some(kept) => {
                let names: Vec<&str> = kept.iter().map(String::as_str).collect();
                self.simulate_with(&self.statistics(&prices.select(&names))?)
            }
            None => self.simulate_with(&stats),
        }
    }

    fn statistics(&self, prices: &PriceMatrix) -> Result<RiskStatistics> {
        returns_and_covariance(
            prices,
            self.config.annualization,
            f64::from(self.config.periods_per_year),
            self.config.covariance,
        )
    }

    /// Tickers passing the ratio screen, `None` when nothing is screened out
    fn screen(&self, stats: &RiskStatistics) -> Result<Option<Vec<Ticker>>> {
        let (min_sharpe, min_sortino) = (self.config.min_sharpe, self.config.min_sortino);
        if min_sharpe.is_none() && min_sortino.is_none() {
            return Ok(None);
        }

        let summaries = ticker_summaries(
            stats,
            self.config.risk_free_rate,
            f64::from(self.config.periods_per_year),
        );
        let kept = select_tickers(&summaries, min_sharpe, min_sortino);
        if kept.is_empty() {
            return Err(PfoError::InvalidParameter(format!(
                "no ticker passes the screen (min_sharpe {:?}, min_sortino {:?})",
                min_sharpe, min_sortino
            )));
        }
        if kept.len() == summaries.len() {
            return Ok(None);
        }

        info!(
            kept = kept.len(),
            screened_out = summaries.len() - kept.len(),
            "Screened tickers by risk-adjusted ratio"
        );
        Ok(Some(kept))
    }

    /// Sample the frontier from precomputed statistics
    pub fn simulate_with(&self, stats: &RiskStatistics) -> Result<Frontier> {
        self.validate()?;
        let n_assets = stats.annualized_returns.len();
        if n_assets == 0 {
            return Err(PfoError::EmptyMatrix);
        }
        if stats.covariance.dim() != n_assets {
            return Err(PfoError::InvalidParameter(format!(
                "{} returns but {}x{} covariance",
                n_assets,
                stats.covariance.dim(),
                stats.covariance.dim()
            )));
        }

        let num_samples = self.config.num_samples;
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let max_failures = (self.config.max_failure_rate * num_samples as f64).ceil() as usize;
        let n_chunks = num_samples.div_ceil(CHUNK_SIZE);
        let sampler = Sampler {
            stats,
            risk_free_rate: self.config.risk_free_rate,
            vol_scale: f64::from(self.config.periods_per_year).sqrt(),
            variance_floor: -VARIANCE_TOLERANCE * max_variance(stats),
            max_failures,
            num_samples,
        };

        let run_chunk = |chunk: usize| {
            let start = chunk * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(num_samples);
            let mut rng = StdRng::seed_from_u64(chunk_seed(seed, chunk as u64));
            sampler.run(&mut rng, end - start)
        };

        let chunks: Vec<Result<(Vec<SampledPortfolio>, usize)>> = if self.config.parallel {
            (0..n_chunks).into_par_iter().map(run_chunk).collect()
        } else {
            (0..n_chunks).map(run_chunk).collect()
        };

        let mut portfolios = Vec::with_capacity(num_samples);
        let mut failed_draws = 0;
        for chunk in chunks {
            let (draws, failed) = chunk?;
            portfolios.extend(draws);
            failed_draws += failed;
        }

        if failed_draws > max_failures {
            return Err(PfoError::TooManyFailedSamples {
                failed: failed_draws,
                requested: num_samples,
            });
        }
        if failed_draws > 0 {
            warn!(failed_draws, num_samples, "Some draws failed and were redrawn");
        }

        info!(
            samples = portfolios.len(),
            assets = n_assets,
            seed,
            "Sampled portfolio frontier"
        );

        Ok(Frontier {
            tickers: stats.covariance.tickers().to_vec(),
            portfolios,
            risk_free_rate: self.config.risk_free_rate,
            failed_draws,
        })
    }
}

/// Per-run state shared read-only by every chunk
struct Sampler<'a> {
    stats: &'a RiskStatistics,
    risk_free_rate: f64,
    vol_scale: f64,
    variance_floor: f64,
    max_failures: usize,
    /// Samples requested for the whole run
    num_samples: usize,
}

impl Sampler<'_> {
    fn run(&self, rng: &mut StdRng, count: usize) -> Result<(Vec<SampledPortfolio>, usize)> {
        let mut draws = Vec::with_capacity(count);
        let mut failed = 0;
        while draws.len() < count {
            match draw_weights(rng, self.stats.annualized_returns.len())
                .and_then(|w| self.evaluate(w))
            {
                Ok(p) => draws.push(p),
                Err(e) => {
                    failed += 1;
                    tracing::debug!("Draw rejected: {}", e);
                    if failed > self.max_failures {
                        return Err(PfoError::TooManyFailedSamples {
                            failed,
                            requested: self.num_samples,
                        });
                    }
                }
            }
        }
        Ok((draws, failed))
    }

    fn evaluate(&self, weights: Vec<f64>) -> Result<SampledPortfolio> {
        let annual_return: f64 = weights
            .iter()
            .zip(&self.stats.annualized_returns)
            .map(|(w, r)| w * r)
            .sum();

        let mut variance = self.stats.covariance.portfolio_variance(&weights);
        if variance.is_nan() || variance < self.variance_floor {
            return Err(PfoError::NegativeVariance { variance });
        }
        if variance < 0.0 {
            variance = 0.0;
        }

        let volatility = variance.sqrt() * self.vol_scale;
        Ok(SampledPortfolio {
            ratio: risk_adjusted_ratio(annual_return - self.risk_free_rate, volatility),
            weights,
            annual_return,
            volatility,
        })
    }
}

/// Uniform draws normalized onto the simplex
pub fn draw_weights<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Result<Vec<f64>> {
    for _ in 0..MAX_WEIGHT_DRAWS {
        let raw: Vec<f64> = (0..n).map(|_| rng.random::<f64>()).collect();
        let sum: f64 = raw.iter().sum();
        if sum > 0.0 {
            return Ok(raw.into_iter().map(|w| w / sum).collect());
        }
    }
    Err(PfoError::DegenerateWeights {
        attempts: MAX_WEIGHT_DRAWS,
    })
}

fn max_variance(stats: &RiskStatistics) -> f64 {
    (0..stats.covariance.dim())
        .map(|i| stats.covariance.variance(i).abs())
        .fold(0.0, f64::max)
}

/// SplitMix64 step of the run seed, one stream per chunk
fn chunk_seed(seed: u64, chunk: u64) -> u64 {
    let mut z = seed.wrapping_add(chunk.wrapping_add(1).wrapping_mul(0x9e3779b97f4a7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Run with the default settings apart from the given parameters
pub fn simulate(
    prices: &PriceMatrix,
    risk_free_rate: f64,
    num_samples: usize,
    annualization: AnnualizationMode,
    periods_per_year: u32,
) -> Result<Frontier> {
    Simulator::new(SimulationConfig {
        risk_free_rate,
        num_samples,
        annualization,
        periods_per_year,
        ..SimulationConfig::default()
    })
    .simulate(prices)
}
