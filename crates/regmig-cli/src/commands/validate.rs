//! Validate command - Validate configuration

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use regmig_adapters::create_adapter_registry;
use regmig_core::ConfigManager;

use super::load_config;

pub async fn run(config: Option<PathBuf>) -> Result<()> {
    println!("{}", "🔍 Validating regmig configuration...".cyan().bold());

    let (config, config_path) = load_config(config.as_deref())?;

    println!("  📁 Config file: {}", config_path.display().to_string().dimmed());
    println!();

    let adapters = create_adapter_registry()
        .map_err(|e| anyhow::anyhow!("Failed to register adapters: {}", e))?;

    println!("{}", "📋 Configuration validation:".yellow());
    let result = ConfigManager::validate(&config, &adapters.registered_types());

    if result.valid {
        println!("  {} Schema is valid", "✅".green());
    } else {
        println!("  {} Schema validation failed", "❌".red());
        for error in &result.errors {
            println!(
                "      {} {}: {} {}",
                "•".red(),
                error.field.red(),
                error.message,
                format!("[{}]", error.code).dimmed()
            );
        }
    }

    for warning in &result.warnings {
        println!("  {} {}: {}", "⚠️".yellow(), warning.field.yellow(), warning.message);
        if let Some(ref suggestion) = warning.suggestion {
            println!("      💡 {}", suggestion.dimmed());
        }
    }

    println!();

    println!("{}", "🎯 Mappings:".yellow());
    for mapping in &config.mappings {
        println!(
            "  {} {} {} → {}",
            "•".cyan(),
            mapping.artifact_type.as_str().cyan(),
            mapping.source_registry,
            mapping.destination_registry
        );
        for pattern in &mapping.include_patterns {
            println!("      + {}", pattern.dimmed());
        }
        for pattern in &mapping.exclude_patterns {
            println!("      - {}", pattern.dimmed());
        }
    }

    println!();

    if !result.valid {
        println!("{}", "❌ Validation failed - please fix the errors above".red().bold());
        return Err(anyhow::anyhow!("Validation failed"));
    }

    println!("{}", "✅ Configuration is valid!".green().bold());
    Ok(())
}
