//! Unit tests for return and risk statistics

use super::*;
use crate::types::PriceMatrix;
use chrono::NaiveDate;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn days(n: usize) -> Vec<NaiveDate> {
    (0..n)
        .map(|i| date(2020, 1, 1) + chrono::Duration::days(i as i64))
        .collect()
}

fn matrix(tickers: &[&str], columns: Vec<Vec<Option<f64>>>) -> PriceMatrix {
    let n = columns[0].len();
    PriceMatrix::new(
        days(n),
        tickers.iter().map(|t| t.to_string()).collect(),
        columns,
    )
    .unwrap()
}

fn full(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

#[test]
fn test_period_returns() {
    let prices = matrix(&["A"], vec![full(&[100.0, 110.0, 99.0])]);
    let returns = ReturnMatrix::from_prices(&prices).unwrap();

    assert_eq!(returns.dates().len(), 2);
    let col = returns.column(0);
    assert!((col[0].unwrap() - 0.10).abs() < 1e-12);
    assert!((col[1].unwrap() + 0.10).abs() < 1e-12);
}

#[test]
fn test_period_returns_forward_fill() {
    let prices = matrix(&["A"], vec![vec![None, Some(100.0), None, Some(120.0)]]);
    let returns = ReturnMatrix::from_prices(&prices).unwrap();
    let col = returns.column(0);

    // leading gap stays missing, inner gap becomes a flat period
    assert_eq!(col[0], None);
    assert_eq!(col[1], Some(0.0));
    assert!((col[2].unwrap() - 0.2).abs() < 1e-12);
}

#[test]
fn test_returns_need_two_rows() {
    let prices = matrix(&["A"], vec![full(&[100.0])]);
    assert!(matches!(
        ReturnMatrix::from_prices(&prices),
        Err(PfoError::EmptyMatrix)
    ));
}

#[test]
fn test_per_period_annualization() {
    let prices = matrix(&["A"], vec![full(&[100.0, 101.0, 102.01])]);
    let returns = ReturnMatrix::from_prices(&prices).unwrap();
    let annual = annualized_returns(&returns, AnnualizationMode::PerPeriod, 252.0).unwrap();
    assert!((annual[0] - 0.01 * 252.0).abs() < 1e-9);
}

#[test]
fn test_calendar_year_annualization() {
    let dates = vec![
        date(2019, 12, 30),
        date(2019, 12, 31),
        date(2020, 1, 2),
        date(2020, 1, 3),
    ];
    // 2019: +10%; 2020: 110 -> 121 (+10%) then 121 -> 145.2 (+20%)
    let prices = PriceMatrix::new(
        dates,
        vec!["A".to_string()],
        vec![full(&[100.0, 110.0, 121.0, 145.2])],
    )
    .unwrap();
    let returns = ReturnMatrix::from_prices(&prices).unwrap();

    let yearly = returns.yearly_returns(0);
    assert!((yearly[&2019] - 0.10).abs() < 1e-12);
    assert!((yearly[&2020] - (1.1 * 1.2 - 1.0)).abs() < 1e-12);

    let annual = annualized_returns(&returns, AnnualizationMode::ByCalendarYear, 252.0).unwrap();
    assert!((annual[0] - (0.10 + 0.32) / 2.0).abs() < 1e-12);
}

#[test]
fn test_population_vs_sample_covariance() {
    let prices = matrix(&["A"], vec![full(&[100.0, 110.0, 99.0, 108.9])]);
    let returns = ReturnMatrix::from_prices(&prices).unwrap();

    let pop = returns.covariance(0, 0, CovarianceKind::Population).unwrap();
    let sample = returns.covariance(0, 0, CovarianceKind::Sample).unwrap();
    assert!((sample - pop * 3.0 / 2.0).abs() < 1e-12);
}

#[test]
fn test_covariance_symmetric() {
    let prices = matrix(
        &["A", "B", "C"],
        vec![
            full(&[10.0, 10.5, 10.2, 10.9, 11.3, 11.0]),
            full(&[20.0, 19.4, 19.9, 20.8, 20.1, 21.5]),
            full(&[5.0, 5.1, 5.3, 5.0, 4.8, 5.2]),
        ],
    );
    let stats = returns_and_covariance(
        &prices,
        AnnualizationMode::PerPeriod,
        252.0,
        CovarianceKind::Population,
    )
    .unwrap();

    let cov = &stats.covariance;
    for i in 0..cov.dim() {
        assert!(cov.variance(i) > 0.0);
        for j in 0..cov.dim() {
            assert_eq!(cov.get(i, j), cov.get(j, i));
        }
    }
}

#[test]
fn test_constant_price_has_zero_covariance() {
    let prices = matrix(
        &["A", "B"],
        vec![
            full(&[100.0, 102.0, 101.0, 105.0, 104.0]),
            full(&[50.0, 50.0, 50.0, 50.0, 50.0]),
        ],
    );
    let stats = returns_and_covariance(
        &prices,
        AnnualizationMode::PerPeriod,
        252.0,
        CovarianceKind::Population,
    )
    .unwrap();

    assert_eq!(stats.covariance.row(1), &[0.0, 0.0]);
    assert_eq!(stats.covariance.get(0, 1), 0.0);
    assert_eq!(stats.covariance.portfolio_variance(&[0.0, 1.0]), 0.0);
    assert_eq!(stats.annualized_returns[1], 0.0);
}

#[test]
fn test_pairwise_complete_covariance() {
    let prices = matrix(
        &["A", "B"],
        vec![
            full(&[100.0, 101.0, 103.0, 102.0, 104.0]),
            vec![None, None, Some(10.0), Some(10.5), Some(10.2)],
        ],
    );
    let returns = ReturnMatrix::from_prices(&prices).unwrap();
    // B has returns only on the last two periods
    assert_eq!(returns.observed(1).len(), 2);
    assert!(returns.covariance(0, 1, CovarianceKind::Population).is_ok());
    assert!(returns.covariance(0, 1, CovarianceKind::Sample).is_ok());
}

#[test]
fn test_covariance_from_values_validation() {
    let tickers = vec!["A".to_string(), "B".to_string()];
    assert!(CovarianceMatrix::from_values(tickers.clone(), vec![vec![1.0, 0.2], vec![0.3, 1.0]]).is_err());
    assert!(CovarianceMatrix::from_values(tickers.clone(), vec![vec![1.0, 0.2]]).is_err());

    let cov = CovarianceMatrix::from_values(tickers, vec![vec![0.04, 0.01], vec![0.01, 0.09]]).unwrap();
    let var = cov.portfolio_variance(&[0.5, 0.5]);
    assert!((var - (0.25 * 0.04 + 0.25 * 0.09 + 2.0 * 0.25 * 0.01)).abs() < 1e-15);
}

#[test]
fn test_correlation() {
    let cov = CovarianceMatrix::from_values(
        vec!["A".into(), "B".into(), "C".into()],
        vec![
            vec![0.04, 0.012, 0.0],
            vec![0.012, 0.09, 0.0],
            vec![0.0, 0.0, 0.0],
        ],
    )
    .unwrap();
    let corr = cov.correlation();
    assert!((corr[0][1] - 0.2).abs() < 1e-12);
    assert_eq!(corr[2][2], 1.0);
    assert_eq!(corr[0][2], 0.0);
}

#[test]
fn test_risk_adjusted_ratio_sentinels() {
    assert_eq!(risk_adjusted_ratio(0.1, 0.0), f64::INFINITY);
    assert_eq!(risk_adjusted_ratio(-0.1, 0.0), f64::NEG_INFINITY);
    assert!(risk_adjusted_ratio(0.0, 0.0).is_nan());
    assert!((risk_adjusted_ratio(0.1, 0.2) - 0.5).abs() < 1e-15);
}

#[test]
fn test_ticker_summaries_and_selection() {
    let prices = matrix(
        &["UP", "FLAT"],
        vec![
            full(&[100.0, 101.0, 100.5, 102.0, 103.0, 102.5, 104.0]),
            full(&[10.0; 7]),
        ],
    );
    let stats = returns_and_covariance(
        &prices,
        AnnualizationMode::PerPeriod,
        252.0,
        CovarianceKind::Population,
    )
    .unwrap();
    let summaries = ticker_summaries(&stats, 0.01, 252.0);

    assert_eq!(summaries.len(), 2);
    assert!(summaries[0].sharpe > 1.0);
    assert!(summaries[0].sortino > summaries[0].sharpe);
    assert_eq!(summaries[1].annualized_volatility, 0.0);
    assert_eq!(summaries[1].sharpe, f64::NEG_INFINITY);

    assert_eq!(select_tickers(&summaries, Some(1.0), Some(1.0)), vec!["UP".to_string()]);
    assert_eq!(select_tickers(&summaries, None, Some(1.0)), vec!["UP".to_string()]);
    assert_eq!(select_tickers(&summaries, None, None).len(), 2);
    assert!(select_tickers(&summaries, Some(f64::INFINITY), None).is_empty());
}

#[test]
fn test_mode_parsing() {
    assert_eq!("per-period".parse::<AnnualizationMode>().unwrap(), AnnualizationMode::PerPeriod);
    assert_eq!("year".parse::<AnnualizationMode>().unwrap(), AnnualizationMode::ByCalendarYear);
    assert!("weekly".parse::<AnnualizationMode>().is_err());
    assert_eq!("sample".parse::<CovarianceKind>().unwrap(), CovarianceKind::Sample);
}

#[test]
fn test_partial_years_count_once() {
    // Six weeks of 2019 against most of 2020: each year is one term of the mean
    let dates = vec![
        date(2019, 11, 20),
        date(2019, 12, 31),
        date(2020, 6, 30),
        date(2020, 11, 20),
    ];
    let prices = PriceMatrix::new(
        dates,
        vec!["A".to_string()],
        vec![full(&[100.0, 102.0, 91.8, 110.16])],
    )
    .unwrap();
    let returns = ReturnMatrix::from_prices(&prices).unwrap();

    let yearly = returns.yearly_returns(0);
    assert_eq!(yearly.len(), 2);
    assert!((yearly[&2019] - 0.02).abs() < 1e-12);
    assert!((yearly[&2020] - 0.08).abs() < 1e-12);

    let annual = annualized_returns(&returns, AnnualizationMode::ByCalendarYear, 252.0).unwrap();
    assert!((annual[0] - 0.05).abs() < 1e-12);
}
