//! regmig CLI
//!
//! Copies artifacts between package registries from a YAML or JSON config.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use regmig_core::FailureMode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "regmig")]
#[command(author, version, about = "regmig - Migrate artifacts between package registries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "REGMIG_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migrations described by a config file
    Migrate {
        /// Config file (defaults to regmig.yaml in the current directory)
        #[arg(short, long, env = "REGMIG_CONFIG")]
        config: Option<PathBuf>,

        /// List what would be copied without writing to the destination
        #[arg(long)]
        dry_run: bool,

        /// Override the configured concurrency
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Override the configured failure mode (continue, stop)
        #[arg(long)]
        failure_mode: Option<FailureMode>,
    },

    /// Validate a config file
    Validate {
        /// Config file (defaults to regmig.yaml in the current directory)
        #[arg(short, long, env = "REGMIG_CONFIG")]
        config: Option<PathBuf>,
    },

    /// List registered adapter types
    Adapters,
}

fn init_logging(verbose: bool, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "regmig=debug,regmig_core=debug,regmig_adapters=debug".into()
        } else {
            "regmig=info,regmig_core=info,regmig_adapters=info".into()
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => {
            let subscriber = builder.json().with_target(true).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = builder.with_target(false).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format)?;
    info!("Starting regmig");

    let result = match cli.command {
        Commands::Migrate {
            config,
            dry_run,
            concurrency,
            failure_mode,
        } => {
            commands::migrate::run(commands::migrate::MigrateOptions {
                config,
                dry_run,
                concurrency,
                failure_mode,
            })
            .await
        }
        Commands::Validate { config } => commands::validate::run(config).await,
        Commands::Adapters => commands::adapters::run().await,
    };

    if let Err(ref e) = result {
        error!("Command failed: {}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
