//! Migration service: runs every configured mapping in order

use crate::adapter::{AdapterRegistry, ImageCopier};
use crate::config::ConfigManager;
use crate::engine::{Engine, Job, RunContext};
use crate::error::Result;
use crate::jobs::{MappingScope, RegistryJob};
use crate::stats::TransferStats;
use crate::types::{Config, FailureMode, MappingOutcome, MigrationSummary};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

/// Top-level entry point of a migration run
pub struct Migrator {
    adapters: AdapterRegistry,
    copier: Option<Arc<dyn ImageCopier>>,
}

impl Migrator {
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self {
            adapters,
            copier: None,
        }
    }

    /// Use `copier` for OCI (Docker, Helm) mappings
    pub fn with_image_copier(mut self, copier: Arc<dyn ImageCopier>) -> Self {
        self.copier = Some(copier);
        self
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Run every mapping of `config` in order.
    ///
    /// Configuration and credential problems fail before any job starts.
    /// Mapping failures are reported in the returned summary; with
    /// [`FailureMode::Stop`] the first one ends the run.
    pub async fn run(&self, config: &Config, ctx: &RunContext) -> Result<MigrationSummary> {
        ConfigManager::ensure_valid(config, &self.adapters.registered_types())?;

        let source = self.adapters.create(&config.source)?;
        let destination = self.adapters.create(&config.destination)?;
        source.validate_credentials().await?;
        destination.validate_credentials().await?;

        let started = Instant::now();
        let stats = TransferStats::new();
        let mut outcomes = Vec::with_capacity(config.mappings.len());

        info!(
            trace_id = ctx.trace_id(),
            mappings = config.mappings.len(),
            dry_run = config.dry_run,
            "Starting migration"
        );

        for (index, mapping) in config.mappings.iter().enumerate() {
            let label = mapping.label();
            if ctx.is_cancelled() {
                info!(mapping = %label, "Run cancelled; skipping remaining mappings");
                break;
            }

            let scope = MappingScope::new(
                config,
                mapping,
                Arc::clone(&source),
                Arc::clone(&destination),
                stats.clone(),
            )
            .with_copier(self.copier.clone());
            let job: Box<dyn Job> = Box::new(RegistryJob::new(Arc::new(scope)));

            let span = info_span!("mapping", index, mapping = %label);
            let result = Engine::execute(ctx, 1, vec![job]).instrument(span).await;

            match result {
                Ok(()) => {
                    info!(mapping = %label, "Mapping completed");
                    outcomes.push(MappingOutcome {
                        mapping: label,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(mapping = %label, error = %e, "Mapping failed");
                    outcomes.push(MappingOutcome {
                        mapping: label,
                        error: Some(e.to_string()),
                    });
                    if config.failure_mode == FailureMode::Stop {
                        info!("Failure mode is stop; ending run");
                        break;
                    }
                }
            }
        }

        let ran_all = outcomes.len() == config.mappings.len();
        let success = ran_all && outcomes.iter().all(|o| o.error.is_none());

        Ok(MigrationSummary {
            success,
            dry_run: config.dry_run,
            mappings: outcomes,
            stats: stats.snapshot().await,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
