//! Configuration management
//!
//! Loaded from an optional TOML file, then overridden by `PFO__SECTION__KEY`
//! environment variables (a `.env` file is honoured).

use crate::error::Result;
use crate::normalize::JoinPolicy;
use crate::source::SourceKind;
use crate::stats::{AnnualizationMode, CovarianceKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub moex: MoexConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// What to fetch and how to clean it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    #[serde(default)]
    pub source: SourceKind,
    /// Empty means "everything the source has" (CSV only)
    #[serde(default)]
    pub tickers: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Directory of `<ticker>.csv` files
    #[serde(default = "default_data_path")]
    pub path: PathBuf,
    /// Tickers with more missing observations are dropped
    #[serde(default = "default_max_missing")]
    pub max_missing: usize,
    #[serde(default)]
    pub join: JoinPolicy,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            tickers: Vec::new(),
            start_date: None,
            end_date: None,
            path: default_data_path(),
            max_missing: default_max_missing(),
            join: JoinPolicy::default(),
        }
    }
}

/// One exchange trading board, e.g. TQBR on the shares market
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BoardConfig {
    pub board: String,
    /// Instrument class (ISS "market"): shares, bonds, ...
    pub market: String,
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl BoardConfig {
    pub fn new(board: &str, market: &str) -> Self {
        Self {
            board: board.to_string(),
            market: market.to_string(),
            engine: default_engine(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MoexConfig {
    #[serde(default = "default_moex_url")]
    pub base_url: String,
    #[serde(default = "default_boards")]
    pub boards: Vec<BoardConfig>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for MoexConfig {
    fn default() -> Self {
        Self {
            base_url: default_moex_url(),
            boards: default_boards(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Monte Carlo run parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    #[serde(default)]
    pub annualization: AnnualizationMode,
    /// Trading periods per year, 252 for daily bars
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: u32,
    #[serde(default)]
    pub covariance: CovarianceKind,
    /// Fixed seed for reproducible frontiers
    pub seed: Option<u64>,
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Share of failed draws tolerated before the run aborts
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,
    /// Keep only tickers reaching this Sharpe ratio (or the Sortino screen)
    pub min_sharpe: Option<f64>,
    /// Keep only tickers reaching this Sortino ratio (or the Sharpe screen)
    pub min_sortino: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            num_samples: default_num_samples(),
            annualization: AnnualizationMode::default(),
            periods_per_year: default_periods_per_year(),
            covariance: CovarianceKind::default(),
            seed: None,
            parallel: true,
            max_failure_rate: default_max_failure_rate(),
            min_sharpe: None,
            min_sortino: None,
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_missing() -> usize {
    50
}

fn default_engine() -> String {
    "stock".to_string()
}

fn default_moex_url() -> String {
    "https://iss.moex.com/iss".to_string()
}

fn default_boards() -> Vec<BoardConfig> {
    vec![BoardConfig::new("TQBR", "shares")]
}

fn default_provider_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_risk_free_rate() -> f64 {
    0.01
}

fn default_num_samples() -> usize {
    10_000
}

fn default_periods_per_year() -> u32 {
    252
}

fn default_max_failure_rate() -> f64 {
    0.01
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file (optional) and environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("PFO")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("data.tickers")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        tracing::debug!(source = ?config.data.source, tickers = config.data.tickers.len(), "Config loaded");
        Ok(config)
    }
}
