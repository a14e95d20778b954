use super::{FileJob, MappingScope};
use crate::engine::{Engine, Job, RunContext};
use crate::error::{MigrateError, Result};
use crate::tree::{get_node_for_path, TreeNode};
use crate::types::{ArtifactType, File, Version};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Migrates the files of one package version
pub struct VersionJob {
    scope: Arc<MappingScope>,
    version: Version,
    root: Arc<TreeNode>,
}

impl VersionJob {
    pub fn new(scope: Arc<MappingScope>, version: Version, root: Arc<TreeNode>) -> Self {
        Self {
            scope,
            version,
            root,
        }
    }

    /// Files belonging to this version, after include/exclude filtering
    fn files(&self) -> Result<Vec<File>> {
        let node = get_node_for_path(&self.root, &self.version.path)?;
        let candidates: Vec<&File> = if self.version.files.is_empty() {
            node.files()
        } else {
            node.leaves()
                .filter_map(|leaf| leaf.file.as_ref())
                .filter(|f| self.version.files.contains(&f.name))
                .collect()
        };

        Ok(candidates
            .into_iter()
            .filter(|f| self.scope.filter.allows(&f.uri))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Job for VersionJob {
    fn info(&self) -> String {
        format!("version {}@{}", self.version.pkg, self.version.name)
    }

    async fn pre(&self, _ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        if scope.artifact_type().is_oci() {
            return Err(MigrateError::Unsupported(format!(
                "{} versions are copied with their package",
                scope.artifact_type()
            )));
        }

        match scope
            .destination
            .version_exists(
                scope.destination_registry(),
                scope.artifact_type(),
                &self.version.pkg,
                &self.version.name,
            )
            .await
        {
            Ok(true) => info!("Version already present at destination; checking files individually"),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Version existence check failed"),
        }
        Ok(())
    }

    async fn migrate(&self, ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        let files = self.files()?;
        debug!(files = files.len(), "Migrating version files");

        let jobs = files
            .into_iter()
            .map(|file| {
                Box::new(FileJob::new(Arc::clone(scope), file, &self.version)) as Box<dyn Job>
            })
            .collect();

        Engine::execute(ctx, scope.concurrency, jobs).await
    }

    async fn post(&self, _ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        if scope.dry_run || scope.artifact_type() != ArtifactType::Npm {
            return Ok(());
        }

        let tags = scope
            .source
            .get_tags(scope.source_registry(), &self.version.pkg)
            .await?;
        for (tag, _) in tags.iter().filter(|(_, v)| **v == self.version.name) {
            if let Err(e) = scope
                .destination
                .add_tag(scope.destination_registry(), &self.version.pkg, tag, &self.version.name)
                .await
            {
                warn!(tag = %tag, error = %e, "Could not copy dist-tag");
            }
        }
        Ok(())
    }
}
