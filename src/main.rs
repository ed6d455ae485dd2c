use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "feedmix",
    version,
    about = "Fault-tolerant, source-balanced feed aggregation",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and print the effective values
    CheckConfig,

    /// Run the orchestrator against a synthetic in-memory catalog
    Simulate {
        /// Number of synthetic sources
        #[arg(short, long, default_value = "8")]
        sources: usize,

        /// Probability that a source fails on each fetch round
        #[arg(short, long, default_value = "0.2")]
        failure_rate: f64,

        /// Items to request
        #[arg(short, long)]
        limit: Option<usize>,

        /// Retrieval rounds to run
        #[arg(short, long, default_value = "1")]
        rounds: usize,

        /// RNG seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,

        /// Print Prometheus metrics after the text report
        #[arg(long)]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::CheckConfig => {
            tracing::info!(config = ?cli.config, "Starting check-config command");
            commands::check_config(&config)?;
        }

        Commands::Simulate {
            sources,
            failure_rate,
            limit,
            rounds,
            seed,
            format,
            metrics,
        } => {
            tracing::info!(
                sources = %sources,
                failure_rate = %failure_rate,
                limit = ?limit,
                rounds = %rounds,
                seed = ?seed,
                "Starting simulate command"
            );
            commands::simulate(
                config,
                commands::SimulateParams {
                    sources,
                    failure_rate,
                    limit,
                    rounds,
                    seed,
                    format,
                    metrics,
                },
            )
            .await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("feedmix=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("feedmix={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
