//! Portfolio Frontier Optimizer
//!
//! Fetches prices, normalizes them and samples the efficient frontier.

use clap::{Parser, Subcommand};
use pfo::{
    config::Config,
    normalize::{Normalized, Normalizer},
    simulate::{Frontier, SampledPortfolio, Simulator},
    source::{build_source, FetchRequest},
    stats::{returns_and_covariance, ticker_summaries},
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pfo")]
#[command(about = "Monte Carlo efficient frontier for a set of tickers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and normalize prices, then show what survived
    Fetch,
    /// Run the full pipeline and sample the frontier
    Simulate {
        /// Write the frontier table as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Number of portfolios to sample
        #[arg(short, long)]
        samples: Option<usize>,
        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Fetch => show_prices(config).await,
        Commands::Simulate {
            output,
            samples,
            seed,
        } => run_simulation(config, output, samples, seed).await,
    }
}

async fn load_prices(config: &Config) -> anyhow::Result<Normalized> {
    let source = build_source(config)?;
    let request = FetchRequest::from_config(&config.data);
    tracing::info!(source = source.name(), tickers = request.tickers.len(), "Fetching prices");

    let report = source.fetch(&request).await?;
    let mut normalized = Normalizer::from_config(&config.data).normalize(&report.table)?;

    let mut warnings = report.warnings;
    warnings.append(&mut normalized.warnings);
    normalized.warnings = warnings;
    Ok(normalized)
}

fn print_warnings(normalized: &Normalized) {
    if normalized.warnings.is_empty() {
        return;
    }
    println!("\n⚠️  Warnings:");
    for warning in &normalized.warnings {
        println!("  - {}", warning);
    }
}

async fn show_prices(config: Config) -> anyhow::Result<()> {
    let normalized = load_prices(&config).await?;
    let matrix = &normalized.matrix;

    println!("\n📊 Price matrix: {} dates × {} tickers", matrix.n_dates(), matrix.n_tickers());
    if let (Some(first), Some(last)) = (matrix.dates().first(), matrix.dates().last()) {
        println!("   {} → {}", first, last);
    }
    println!("{:-<72}", "");
    println!("{:<12} {:<16} {:>8} {:>10} {:>10} {:>10}", "Ticker", "Field", "Missing", "Return", "Vol", "Sharpe");

    let sim = &config.simulation;
    let summaries = if matrix.n_tickers() > 0 && matrix.n_dates() > 1 {
        let stats = returns_and_covariance(
            matrix,
            sim.annualization,
            f64::from(sim.periods_per_year),
            sim.covariance,
        )?;
        ticker_summaries(&stats, sim.risk_free_rate, f64::from(sim.periods_per_year))
    } else {
        Vec::new()
    };

    for (i, ticker) in matrix.tickers().iter().enumerate() {
        let field = normalized.fields.get(ticker).map_or("-", String::as_str);
        match summaries.get(i) {
            Some(s) => println!(
                "{:<12} {:<16} {:>8} {:>9.2}% {:>9.2}% {:>10.2}",
                ticker,
                field,
                matrix.missing_count(i),
                s.annualized_return * 100.0,
                s.annualized_volatility * 100.0,
                s.sharpe
            ),
            None => println!("{:<12} {:<16} {:>8}", ticker, field, matrix.missing_count(i)),
        }
    }

    print_warnings(&normalized);
    Ok(())
}

async fn run_simulation(
    mut config: Config,
    output: Option<PathBuf>,
    samples: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(n) = samples {
        config.simulation.num_samples = n;
    }
    if seed.is_some() {
        config.simulation.seed = seed;
    }

    let normalized = load_prices(&config).await?;
    print_warnings(&normalized);

    let frontier = Simulator::new(config.simulation.clone()).simulate(&normalized.matrix)?;
    print_frontier(&frontier);

    if let Some(path) = output {
        frontier.write_csv(BufWriter::new(File::create(&path)?))?;
        println!("\n💾 Frontier written to {}", path.display());
    }
    Ok(())
}

fn print_frontier(frontier: &Frontier) {
    println!(
        "\n📈 Sampled {} portfolios over {} tickers (rfr {:.2}%, {} failed draws)",
        frontier.len(),
        frontier.tickers().len(),
        frontier.risk_free_rate() * 100.0,
        frontier.failed_draws()
    );

    let show = |title: &str, p: Option<&SampledPortfolio>| {
        let Some(p) = p else {
            return;
        };
        println!("\n{}", title);
        println!("  Return:     {:>8.2}%", p.annual_return * 100.0);
        println!("  Volatility: {:>8.2}%", p.volatility * 100.0);
        println!("  Ratio:      {:>8.3}", p.ratio);
        for (ticker, w) in frontier.tickers().iter().zip(&p.weights) {
            println!("    {:<12} {:>6.2}%", ticker, w * 100.0);
        }
    };

    show("🏆 Max risk-adjusted ratio", frontier.max_ratio());
    show("🛡️  Min volatility", frontier.min_volatility());
}
