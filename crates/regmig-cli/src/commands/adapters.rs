//! Adapters command - List registry backends this build can talk to

use anyhow::Result;
use colored::Colorize;
use regmig_adapters::create_adapter_registry;
use regmig_core::ArtifactType;

pub async fn run() -> Result<()> {
    let adapters = create_adapter_registry()
        .map_err(|e| anyhow::anyhow!("Failed to register adapters: {}", e))?;

    println!("{}", "🔌 Registered adapters:".cyan().bold());
    for registry_type in adapters.registered_types() {
        println!("  {} {}", "•".green(), registry_type.cyan());
    }

    println!();
    println!("{}", "📦 Artifact types:".cyan().bold());
    for artifact_type in ArtifactType::all() {
        let note = if artifact_type.is_oci() {
            "image copy"
        } else {
            "file copy"
        };
        println!("  {} {:<10} {}", "•".green(), artifact_type.as_str(), note.dimmed());
    }

    Ok(())
}
