use super::MappingScope;
use crate::adapter::Upload;
use crate::engine::{Job, RunContext};
use crate::error::{MigrateError, Result};
use crate::types::{File, FileStat, Version};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Copies one file from the source to the destination registry
pub struct FileJob {
    scope: Arc<MappingScope>,
    file: File,
    package: String,
    version: String,
    metadata: BTreeMap<String, String>,
}

impl FileJob {
    pub fn new(scope: Arc<MappingScope>, file: File, version: &Version) -> Self {
        Self {
            scope,
            file,
            package: version.pkg.clone(),
            version: version.name.clone(),
            metadata: version.metadata.clone(),
        }
    }

    async fn transfer(&self, ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        let download = scope
            .source
            .download_file(scope.source_registry(), &self.file.uri)
            .await?;

        ctx.check()?;
        let upload = Upload {
            body: download.body,
            file: self.file.clone(),
            headers: download.headers,
            package: self.package.clone(),
            version: self.version.clone(),
            artifact_type: scope.artifact_type(),
            metadata: self.metadata.clone(),
        };
        scope
            .destination
            .upload_file(scope.destination_registry(), upload)
            .await
    }
}

#[async_trait]
impl Job for FileJob {
    fn info(&self) -> String {
        format!("file {}", self.file.uri)
    }

    async fn migrate(&self, ctx: &RunContext) -> Result<()> {
        let scope = &self.scope;
        let stats = &scope.stats;

        if scope.dry_run {
            stats.record(FileStat::skipped(&self.file, "dry run")).await;
            return Ok(());
        }

        match scope
            .destination
            .file_exists(scope.destination_registry(), &self.file.uri)
            .await
        {
            Ok(true) => {
                debug!("File already present at destination");
                stats
                    .record(FileStat::skipped(&self.file, "already present"))
                    .await;
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Existence check failed; copying anyway"),
        }

        // Cancellation is checked between steps only; a started upload runs to completion
        ctx.check()?;
        match self.transfer(ctx).await {
            Ok(()) => {
                debug!(size = self.file.size, "File copied");
                stats.record(FileStat::success(&self.file)).await;
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                stats
                    .record(FileStat::failed(&self.file, e.to_string()))
                    .await;
                Err(MigrateError::transfer(&self.file.uri, e.to_string()))
            }
        }
    }
}
