//! Migrate command - Run every configured mapping

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use regmig_adapters::{create_adapter_registry, OciImageCopier};
use regmig_core::{format_summary, Config, FailureMode, Migrator, RunContext};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::load_config;

pub struct MigrateOptions {
    pub config: Option<PathBuf>,
    pub dry_run: bool,
    pub concurrency: Option<usize>,
    pub failure_mode: Option<FailureMode>,
}

/// Apply command-line overrides on top of the loaded config
fn apply_overrides(config: &mut Config, options: &MigrateOptions) {
    if options.dry_run {
        config.dry_run = true;
    }
    if let Some(concurrency) = options.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(mode) = options.failure_mode {
        config.failure_mode = mode;
    }
}

pub async fn run(options: MigrateOptions) -> Result<()> {
    println!("{}", "🚚 Migrating registries...".cyan().bold());

    let (mut config, config_path) = load_config(options.config.as_deref())?;
    apply_overrides(&mut config, &options);

    println!("  📁 Using config: {}", config_path.display().to_string().dimmed());
    println!(
        "  ⚙️  {} mapping(s), concurrency {}, failure mode {}{}",
        config.mappings.len(),
        config.concurrency,
        config.failure_mode.as_str(),
        if config.dry_run { ", dry run".yellow().to_string() } else { String::new() }
    );

    let adapters = create_adapter_registry()
        .map_err(|e| anyhow::anyhow!("Failed to register adapters: {}", e))?;
    let copier = OciImageCopier::new()
        .map_err(|e| anyhow::anyhow!("Failed to create image copier: {}", e))?;
    let migrator = Migrator::new(adapters).with_image_copier(Arc::new(copier));

    let token = CancellationToken::new();
    let ctx = RunContext::with_token(token.clone());
    info!(trace_id = %ctx.trace_id(), "Migration run started");

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing started transfers and stopping");
            token.cancel();
        }
    });

    let result = migrator.run(&config, &ctx).await;
    interrupt.abort();

    let summary = result.map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    println!("{}", format_summary(&summary));

    if ctx.is_cancelled() {
        println!("{}", "⏹️  Migration cancelled".yellow().bold());
        return Err(anyhow::anyhow!("Migration cancelled"));
    }

    if summary.success {
        println!("{}", "✅ Migration completed successfully!".green().bold());
        Ok(())
    } else {
        for outcome in &summary.mappings {
            if let Some(ref error) = outcome.error {
                println!("  {} {}: {}", "❌".red(), outcome.mapping.red(), error);
            }
        }
        println!("{}", "❌ Migration finished with failures".red().bold());
        Err(anyhow::anyhow!("Migration failed"))
    }
}
