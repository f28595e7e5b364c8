//! Unit tests for Monte Carlo frontier sampling

use super::*;
use crate::stats::{CovarianceKind, CovarianceMatrix, ReturnMatrix};
use crate::types::PriceMatrix;
use chrono::{Duration, NaiveDate};

fn prices(tickers: &[&str], columns: Vec<Vec<f64>>) -> PriceMatrix {
    let n = columns[0].len();
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    PriceMatrix::new(
        (0..n).map(|i| start + Duration::days(i as i64)).collect(),
        tickers.iter().map(|t| t.to_string()).collect(),
        columns
            .into_iter()
            .map(|c| c.into_iter().map(Some).collect())
            .collect(),
    )
    .unwrap()
}

fn three_assets() -> PriceMatrix {
    prices(
        &["AAPL", "AMD", "NKE"],
        vec![
            vec![100.0, 101.5, 100.8, 102.9, 104.0, 103.1, 105.6, 106.2],
            vec![50.0, 49.2, 51.0, 52.3, 51.1, 53.8, 54.0, 52.9],
            vec![80.0, 80.4, 79.9, 80.8, 81.5, 81.0, 81.9, 82.4],
        ],
    )
}

fn config(num_samples: usize) -> SimulationConfig {
    SimulationConfig {
        num_samples,
        seed: Some(7),
        annualization: AnnualizationMode::PerPeriod,
        ..SimulationConfig::default()
    }
}

fn stats_from(returns: Vec<f64>, cov: Vec<Vec<f64>>) -> RiskStatistics {
    let tickers: Vec<String> = (0..returns.len()).map(|i| format!("T{}", i)).collect();
    let price_rows = prices(
        &tickers.iter().map(String::as_str).collect::<Vec<_>>(),
        vec![vec![1.0, 1.0]; returns.len()],
    );
    RiskStatistics {
        returns: ReturnMatrix::from_prices(&price_rows).unwrap(),
        annualized_returns: returns,
        covariance: CovarianceMatrix::from_values(tickers, cov).unwrap(),
    }
}

#[test]
fn test_weights_on_simplex() {
    let frontier = Simulator::new(config(2_000)).simulate(&three_assets()).unwrap();
    for p in frontier.portfolios() {
        let sum: f64 = p.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(p.weights.iter().all(|w| *w >= 0.0));
        assert_eq!(p.weights.len(), 3);
    }
}

#[test]
fn test_ratio_matches_definition() {
    let frontier = Simulator::new(config(500)).simulate(&three_assets()).unwrap();
    let rfr = frontier.risk_free_rate();
    for p in frontier.portfolios() {
        assert!(p.volatility > 0.0);
        let expected = (p.annual_return - rfr) / p.volatility;
        assert!((p.ratio - expected).abs() < 1e-12 * expected.abs().max(1.0));
    }
}

#[test]
fn test_return_and_volatility_formulas() {
    let stats = stats_from(
        vec![0.10, 0.20],
        vec![vec![0.0004, 0.0001], vec![0.0001, 0.0009]],
    );
    let frontier = Simulator::new(config(50)).simulate_with(&stats).unwrap();

    for p in frontier.portfolios() {
        let (a, b) = (p.weights[0], p.weights[1]);
        let ret = a * 0.10 + b * 0.20;
        let var = a * a * 0.0004 + b * b * 0.0009 + 2.0 * a * b * 0.0001;
        assert!((p.annual_return - ret).abs() < 1e-12);
        assert!((p.volatility - var.sqrt() * 252f64.sqrt()).abs() < 1e-12);
    }
}

#[test]
fn test_frontier_has_requested_rows() {
    let frontier = simulate(&three_assets(), 0.01, 1000, AnnualizationMode::PerPeriod, 252).unwrap();
    assert_eq!(frontier.len(), 1000);
    assert_eq!(frontier.rows().count(), 1000);
    for row in frontier.rows() {
        let weights: f64 = row[3..].iter().sum();
        assert!((weights - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_constant_price_ticker() {
    let matrix = prices(
        &["A", "B"],
        vec![
            vec![100.0, 102.0, 101.0, 105.0, 104.0],
            vec![20.0, 20.0, 20.0, 20.0, 20.0],
        ],
    );
    let frontier = Simulator::new(config(100)).simulate(&matrix).unwrap();
    assert_eq!(frontier.len(), 100);
    assert_eq!(frontier.failed_draws(), 0);
    assert!(frontier.portfolios().iter().all(|p| p.volatility.is_finite()));
}

#[test]
fn test_zero_volatility_sentinels() {
    let stats = stats_from(vec![0.05], vec![vec![0.0]]);
    let frontier = Simulator::new(config(10)).simulate_with(&stats).unwrap();
    for p in frontier.portfolios() {
        assert_eq!(p.weights, vec![1.0]);
        assert_eq!(p.volatility, 0.0);
        assert_eq!(p.ratio, f64::INFINITY);
    }

    let stats = stats_from(vec![0.0], vec![vec![0.0]]);
    let frontier = Simulator::new(config(10)).simulate_with(&stats).unwrap();
    assert!(frontier.portfolios().iter().all(|p| p.ratio == f64::NEG_INFINITY));
}

#[test]
fn test_negative_variance_rejected() {
    // Not positive semi-definite: equal weights give a negative variance
    let stats = stats_from(
        vec![0.1, 0.1],
        vec![vec![0.0001, -0.01], vec![-0.01, 0.0001]],
    );
    let err = Simulator::new(config(2_000)).simulate_with(&stats).unwrap_err();
    match err {
        PfoError::TooManyFailedSamples { failed, requested } => {
            assert_eq!(requested, 2_000);
            assert!(failed > 20);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_single_negative_variance_draw() {
    let stats = stats_from(vec![0.1, 0.1], vec![vec![0.0001, -0.01], vec![-0.01, 0.0001]]);
    let sampler = Sampler {
        stats: &stats,
        risk_free_rate: 0.01,
        vol_scale: 1.0,
        variance_floor: -VARIANCE_TOLERANCE * max_variance(&stats),
        max_failures: 0,
        num_samples: 1,
    };
    let err = sampler.evaluate(vec![0.5, 0.5]).unwrap_err();
    match err {
        PfoError::NegativeVariance { variance } => assert!(variance < 0.0),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let matrix = three_assets();
    let a = Simulator::new(config(3_000)).simulate(&matrix).unwrap();
    let b = Simulator::new(config(3_000)).simulate(&matrix).unwrap();
    assert_eq!(a, b);

    let sequential = Simulator::new(SimulationConfig {
        parallel: false,
        ..config(3_000)
    })
    .simulate(&matrix)
    .unwrap();
    assert_eq!(a, sequential);

    let other_seed = Simulator::new(SimulationConfig {
        seed: Some(8),
        ..config(3_000)
    })
    .simulate(&matrix)
    .unwrap();
    assert_ne!(a.portfolios()[0].weights, other_seed.portfolios()[0].weights);
}

#[test]
fn test_chunks_draw_independent_streams() {
    let frontier = Simulator::new(config(2 * CHUNK_SIZE)).simulate(&three_assets()).unwrap();
    let p = frontier.portfolios();
    assert_ne!(p[0].weights, p[CHUNK_SIZE].weights);
}

#[test]
fn test_zero_samples() {
    let frontier = Simulator::new(config(0)).simulate(&three_assets()).unwrap();
    assert!(frontier.is_empty());
    assert!(frontier.max_ratio().is_none());
}

#[test]
fn test_empty_matrix_rejected() {
    assert!(matches!(
        Simulator::new(config(10)).simulate(&PriceMatrix::default()),
        Err(PfoError::EmptyMatrix)
    ));
}

#[test]
fn test_invalid_parameters() {
    let bad = SimulationConfig {
        periods_per_year: 0,
        ..config(10)
    };
    assert!(Simulator::new(bad).simulate(&three_assets()).is_err());

    let bad = SimulationConfig {
        max_failure_rate: 1.5,
        ..config(10)
    };
    assert!(Simulator::new(bad).simulate(&three_assets()).is_err());
}

#[test]
fn test_columns_and_csv() {
    let frontier = Simulator::new(config(5)).simulate(&three_assets()).unwrap();
    assert_eq!(
        frontier.columns(),
        vec![
            "Return",
            "Volatility",
            "Sharp Ratio",
            "AAPL weight",
            "AMD weight",
            "NKE weight"
        ]
    );

    let mut buf = Vec::new();
    frontier.write_csv(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with("Return,Volatility,Sharp Ratio,AAPL weight"));
    assert_eq!(lines[1].split(',').count(), 6);
}

#[test]
fn test_max_ratio_and_min_volatility() {
    let frontier = Simulator::new(config(1_000)).simulate(&three_assets()).unwrap();
    let best = frontier.max_ratio().unwrap();
    let safest = frontier.min_volatility().unwrap();
    assert!(frontier.portfolios().iter().all(|p| p.ratio <= best.ratio));
    assert!(frontier.portfolios().iter().all(|p| p.volatility >= safest.volatility));
}

#[test]
fn test_calendar_year_mode() {
    let sim = Simulator::new(SimulationConfig {
        annualization: AnnualizationMode::ByCalendarYear,
        covariance: CovarianceKind::Sample,
        ..config(100)
    });
    let frontier = sim.simulate(&three_assets()).unwrap();
    assert_eq!(frontier.len(), 100);
}

#[test]
fn test_draw_weights() {
    let mut rng = StdRng::seed_from_u64(1);
    let w = draw_weights(&mut rng, 4).unwrap();
    assert_eq!(w.len(), 4);
    assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
}

#[test]
fn test_chunk_seeds_differ() {
    assert_ne!(chunk_seed(42, 0), chunk_seed(42, 1));
    assert_ne!(chunk_seed(42, 0), chunk_seed(43, 0));
}

#[test]
fn test_ratio_screen_drops_tickers() {
    let matrix = prices(
        &["UP", "DOWN", "FLAT"],
        vec![
            vec![100.0, 101.0, 100.5, 102.0, 103.0, 102.5, 104.0],
            vec![100.0, 99.0, 99.5, 98.0, 97.0, 97.5, 96.0],
            vec![10.0; 7],
        ],
    );
    let sim = Simulator::new(SimulationConfig {
        min_sharpe: Some(1.0),
        ..config(50)
    });
    let frontier = sim.simulate(&matrix).unwrap();
    assert_eq!(frontier.tickers(), &["UP".to_string()]);
    assert!(frontier.portfolios().iter().all(|p| p.weights == vec![1.0]));

    let unscreened = Simulator::new(config(50)).simulate(&matrix).unwrap();
    assert_eq!(unscreened.tickers().len(), 3);
}

#[test]
fn test_ratio_screen_rejecting_everything() {
    let sim = Simulator::new(SimulationConfig {
        min_sharpe: Some(f64::INFINITY),
        min_sortino: Some(f64::INFINITY),
        ..config(50)
    });
    assert!(matches!(
        sim.simulate(&three_assets()),
        Err(PfoError::InvalidParameter(_))
    ));
}
