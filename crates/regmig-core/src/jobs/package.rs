use super::{MappingScope, VersionJob};
use crate::adapter::ImageCopyRequest;
use crate::engine::{Engine, Job, RunContext};
use crate::error::{MigrateError, Result};
use crate::tree::{get_node_for_path, TreeNode};
use crate::types::{File, FileStat, Package};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Migrates every version of one package.
///
/// OCI packages are handed whole to the image copier instead.
pub struct PackageJob {
    scope: Arc<MappingScope>,
    package: Package,
    root: Arc<TreeNode>,
}

impl PackageJob {
    pub fn new(scope: Arc<MappingScope>, package: Package, root: Arc<TreeNode>) -> Self {
        Self {
            scope,
            package,
            root,
        }
    }

    async fn copy_image(&self, ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        let record = File::new(scope.source_registry(), &self.package.name, self.package.size);

        if scope.dry_run {
            scope.stats.record(FileStat::skipped(&record, "dry run")).await;
            return Ok(());
        }

        let copier = scope.copier.as_ref().ok_or_else(|| {
            MigrateError::Unsupported(format!(
                "no image copier configured for {} package {}",
                scope.artifact_type(),
                self.package.name
            ))
        })?;

        let request = ImageCopyRequest {
            source: scope
                .source
                .oci_image_path(scope.source_registry(), &self.package.name)?,
            destination: scope
                .destination
                .oci_image_path(scope.destination_registry(), &self.package.name)?,
            keychain: scope.source.keychain()?.merge(scope.destination.keychain()?),
            jobs: scope.concurrency,
            source_insecure: scope.source_insecure,
            destination_insecure: scope.destination_insecure,
        };

        info!(source = %request.source, destination = %request.destination, "Copying image repository");
        match copier.copy_repository(ctx, &request).await {
            Ok(()) => {
                scope.stats.record(FileStat::success(&record)).await;
                Ok(())
            }
            Err(e) => {
                if !e.is_cancelled() {
                    scope
                        .stats
                        .record(FileStat::failed(&record, e.to_string()))
                        .await;
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Job for PackageJob {
    fn info(&self) -> String {
        format!("package {}", self.package.name)
    }

    async fn migrate(&self, ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        if scope.artifact_type().is_oci() {
            return self.copy_image(ctx).await;
        }

        let node = get_node_for_path(&self.root, &self.package.path)?;
        let versions = scope
            .source
            .get_versions(scope.artifact_type(), &self.package, &node)
            .await?;
        debug!(package = %self.package.name, versions = versions.len(), "Found versions");

        let jobs = versions
            .into_iter()
            .map(|version| {
                Box::new(VersionJob::new(Arc::clone(scope), version, Arc::clone(&self.root)))
                    as Box<dyn Job>
            })
            .collect();

        Engine::execute(ctx, scope.version_concurrency, jobs).await
    }
}
