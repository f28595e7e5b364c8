//! Portfolio Frontier Optimizer
//!
//! Fetches daily price history for a set of tickers, cleans it into a
//! date-aligned price matrix and samples the efficient frontier by Monte Carlo.
//!
//! ## Architecture
//!
//! ```text
//! Source (MOEX/Provider/CSV) → RawTable → Normalizer → PriceMatrix
//!                                                          ↓
//!                          Frontier ← Simulator ← Stats (returns, covariance)
//! ```

pub mod config;
pub mod error;
pub mod normalize;
pub mod simulate;
pub mod source;
pub mod stats;
pub mod types;
