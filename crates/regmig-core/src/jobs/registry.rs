use super::{MappingScope, PackageJob};
use crate::engine::{Engine, Job, RunContext};
use crate::error::Result;
use crate::tree::build_tree;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Migrates one source registry into one destination registry
pub struct RegistryJob {
    scope: Arc<MappingScope>,
}

impl RegistryJob {
    pub fn new(scope: Arc<MappingScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Job for RegistryJob {
    fn info(&self) -> String {
        format!("registry {}", self.scope.mapping.label())
    }

    async fn pre(&self, _ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        scope.source.get_registry(scope.source_registry()).await?;

        match scope.destination.get_registry(scope.destination_registry()).await {
            Ok(info) => {
                debug!(registry = %info.name, "Destination registry present");
                Ok(())
            }
            Err(e) if e.is_not_found() && scope.dry_run => {
                info!(
                    registry = scope.destination_registry(),
                    "Destination registry missing; would create it"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!(registry = scope.destination_registry(), "Creating destination registry");
                scope
                    .destination
                    .create_registry(scope.destination_registry(), scope.artifact_type())
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn migrate(&self, ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        let files = scope.source.get_files(scope.source_registry()).await?;
        let root = build_tree(files);

        let mut packages = scope
            .source
            .get_packages(scope.source_registry(), scope.artifact_type(), &root)
            .await?;

        // OCI repositories have no file tree; patterns apply to package names instead
        if scope.artifact_type().is_oci() {
            packages.retain(|p| scope.filter.allows(&p.name));
        }

        info!(
            registry = scope.source_registry(),
            packages = packages.len(),
            "Migrating packages"
        );

        let jobs = packages
            .into_iter()
            .map(|package| {
                Box::new(PackageJob::new(Arc::clone(scope), package, Arc::clone(&root)))
                    as Box<dyn Job>
            })
            .collect();

        Engine::execute(ctx, scope.concurrency, jobs).await
    }

    async fn post(&self, _ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        if scope.dry_run {
            return Ok(());
        }

        let metadata = scope
            .source
            .get_registry_metadata(scope.source_registry())
            .await?;
        if metadata.is_empty() {
            return Ok(());
        }

        if let Err(e) = scope
            .destination
            .set_registry_metadata(scope.destination_registry(), &metadata)
            .await
        {
            warn!(registry = scope.destination_registry(), error = %e, "Could not copy registry metadata");
        }
        Ok(())
    }
}
