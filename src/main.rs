use clap::{Parser, Subcommand};
use portfolio_composer::allocation::AllocationTarget;
use portfolio_composer::analysis::{analyze_stock, compare_metrics};
use portfolio_composer::quotes::{HistoryPeriod, MarketDataClient};
use portfolio_composer::{AppConfig, ComposeRequest, ComposerError, PortfolioComposer};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

/// Composes bucketed investment portfolios from live market data.
#[derive(Parser, Debug)]
#[command(name = "portfolio-composer", version)]
#[command(about = "Compose value/growth/bond portfolios from market data", long_about = None)]
struct Cli {
    /// JSON configuration file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Allocate an amount across buckets.
    Compose {
        /// Cash to invest
        #[arg(short, long)]
        amount: f64,

        /// Bucket target as bucket=percent, repeatable (default value=40 growth=40 bonds=20)
        #[arg(long = "alloc", value_parser = parse_alloc)]
        alloc: Vec<(String, f64)>,

        /// Region filter passed to discovery
        #[arg(long)]
        region: Option<String>,

        /// Ask the narrative provider for a written analysis
        #[arg(long)]
        narrative: bool,

        /// Narrative language code
        #[arg(long)]
        language: Option<String>,
    },
    /// Latest price for a ticker.
    Quote { ticker: String },
    /// Company fundamentals.
    Fundamentals { ticker: String },
    /// Historical prices.
    History {
        ticker: String,

        /// 1month, 3months, 1year or 5years
        #[arg(short, long, default_value = "1month")]
        period: String,
    },
    /// Rule-based fundamentals assessment.
    Analyze { ticker: String },
    /// Side-by-side metrics for several tickers.
    Compare {
        #[arg(required = true)]
        tickers: Vec<String>,
    },
}

fn parse_alloc(s: &str) -> Result<(String, f64), String> {
    let (bucket, pct) = s
        .split_once('=')
        .ok_or_else(|| format!("expected bucket=percent, got '{}'", s))?;
    let pct = pct
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid percentage '{}': {}", pct, e))?;
    Ok((bucket.trim().to_string(), pct))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Compose {
            amount,
            alloc,
            region,
            narrative,
            language,
        } => {
            let composer = PortfolioComposer::from_config(&config)?;
            let request = ComposeRequest {
                amount,
                target_alloc: (!alloc.is_empty()).then(|| AllocationTarget::from_pairs(alloc)),
                region,
                narrative: narrative.then_some(true),
                language,
            };
            print_json(&composer.compose(&request).await?)
        }
        Commands::Quote { ticker } => {
            let client = MarketDataClient::alpha_vantage(&config.market_data)?;
            print_json(&client.get_price(&ticker).await?)
        }
        Commands::Fundamentals { ticker } => {
            let client = MarketDataClient::alpha_vantage(&config.market_data)?;
            print_json(&client.get_fundamentals(&ticker).await?)
        }
        Commands::History { ticker, period } => {
            let client = MarketDataClient::alpha_vantage(&config.market_data)?;
            let history = client
                .get_historical_prices(&ticker, HistoryPeriod::parse(&period))
                .await?;
            print_json(&history)
        }
        Commands::Analyze { ticker } => {
            let client = MarketDataClient::alpha_vantage(&config.market_data)?;
            print_json(&analyze_stock(&client, &ticker).await?)
        }
        Commands::Compare { tickers } => {
            let client = MarketDataClient::alpha_vantage(&config.market_data)?;
            print_json(&compare_metrics(&client, &tickers).await)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            let error = match e.downcast::<ComposerError>() {
                Ok(domain) => domain,
                Err(other) => ComposerError::Config(format!("{:#}", other)),
            };
            match serde_json::to_string_pretty(&error.to_body()) {
                Ok(body) => eprintln!("{}", body),
                Err(_) => eprintln!("{}", error),
            }
            if error.kind().is_client_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
