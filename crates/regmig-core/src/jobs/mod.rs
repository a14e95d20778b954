//! The four job levels of a migration.
//!
//! A mapping runs as one [`RegistryJob`], which fans out into
//! [`PackageJob`]s, then [`VersionJob`]s, then [`FileJob`]s, each level
//! through its own nested [`Engine`](crate::engine::Engine) run.

mod file;
mod package;
mod registry;
mod version;

pub use file::FileJob;
pub use package::PackageJob;
pub use registry::RegistryJob;
pub use version::VersionJob;

use crate::adapter::{Adapter, ImageCopier};
use crate::filter::PatternFilter;
use crate::stats::TransferStats;
use crate::types::{ArtifactType, Config, RegistryMapping};
use std::sync::Arc;

/// Read-only state shared by every job of one mapping
pub struct MappingScope {
    pub mapping: RegistryMapping,
    pub source: Arc<dyn Adapter>,
    pub destination: Arc<dyn Adapter>,
    pub copier: Option<Arc<dyn ImageCopier>>,
    pub stats: TransferStats,
    pub filter: PatternFilter,
    pub dry_run: bool,
    /// Fan-out for Package and File jobs
    pub concurrency: usize,
    /// Fan-out for Version jobs
    pub version_concurrency: usize,
    /// Per-side plain HTTP allowance, passed on to the image copier
    pub source_insecure: bool,
    pub destination_insecure: bool,
}

impl MappingScope {
    pub fn new(
        config: &Config,
        mapping: &RegistryMapping,
        source: Arc<dyn Adapter>,
        destination: Arc<dyn Adapter>,
        stats: TransferStats,
    ) -> Self {
        Self {
            mapping: mapping.clone(),
            source,
            destination,
            copier: None,
            stats,
            filter: PatternFilter::new(&mapping.include_patterns, &mapping.exclude_patterns),
            dry_run: config.dry_run,
            concurrency: config.mapping_concurrency(mapping),
            version_concurrency: config.version_concurrency,
            source_insecure: config.source.insecure,
            destination_insecure: config.destination.insecure,
        }
    }

    pub fn with_copier(mut self, copier: Option<Arc<dyn ImageCopier>>) -> Self {
        self.copier = copier;
        self
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.mapping.artifact_type
    }

    pub fn source_registry(&self) -> &str {
        &self.mapping.source_registry
    }

    pub fn destination_registry(&self) -> &str {
        &self.mapping.destination_registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{bytes_stream, collect_stream, Download, Keychain, Upload};
    use crate::catalog::{packages_from_tree, versions_from_tree};
    use crate::engine::{Engine, Job, RunContext};
    use crate::error::{MigrateError, Result};
    use crate::tree::{build_tree, TreeNode};
    use crate::types::{
        Credentials, FailureMode, File, Package, RegistryConfig, RegistryInfo, TransferStatus,
        Version,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Single-registry backend with knobs for slow uploads and failing metadata writes
    #[derive(Default)]
    struct StubAdapter {
        files: Mutex<BTreeMap<String, Bytes>>,
        metadata: BTreeMap<String, String>,
        upload_delay: Option<Duration>,
        fail_metadata: bool,
    }

    impl StubAdapter {
        fn with_files(files: &[(&str, &str)]) -> Self {
            let stored = files
                .iter()
                .map(|(uri, data)| (uri.to_string(), Bytes::copy_from_slice(data.as_bytes())))
                .collect();
            Self {
                files: Mutex::new(stored),
                ..Self::default()
            }
        }

        fn uris(&self) -> Vec<String> {
            self.files.lock().unwrap().keys().cloned().collect()
        }
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        fn registry_type(&self) -> &str {
            "stub"
        }
        fn endpoint(&self) -> &str {
            "stub://"
        }
        async fn validate_credentials(&self) -> Result<()> {
            Ok(())
        }
        async fn get_registry(&self, registry: &str) -> Result<RegistryInfo> {
            Ok(RegistryInfo {
                name: registry.to_string(),
                artifact_type: None,
                url: None,
                description: None,
            })
        }
        async fn create_registry(&self, registry: &str, _t: ArtifactType) -> Result<RegistryInfo> {
            self.get_registry(registry).await
        }
        async fn get_files(&self, registry: &str) -> Result<Vec<File>> {
            let files = self.files.lock().unwrap();
            Ok(files
                .iter()
                .map(|(uri, data)| File::new(registry, uri.as_str(), data.len() as u64))
                .collect())
        }
        async fn get_packages(
            &self,
            registry: &str,
            artifact_type: ArtifactType,
            root: &Arc<TreeNode>,
        ) -> Result<Vec<Package>> {
            packages_from_tree(registry, artifact_type, root)
        }
        async fn get_versions(
            &self,
            artifact_type: ArtifactType,
            package: &Package,
            node: &Arc<TreeNode>,
        ) -> Result<Vec<Version>> {
            versions_from_tree(artifact_type, package, node)
        }
        async fn download_file(&self, _registry: &str, uri: &str) -> Result<Download> {
            let data = self
                .files
                .lock()
                .unwrap()
                .get(uri)
                .cloned()
                .ok_or_else(|| MigrateError::NotFound(uri.to_string()))?;
            Ok(Download {
                body: bytes_stream(data),
                headers: BTreeMap::new(),
            })
        }
        async fn upload_file(&self, _registry: &str, upload: Upload) -> Result<()> {
            let data = collect_stream(upload.body).await?;
            if let Some(delay) = self.upload_delay {
                tokio::time::sleep(delay).await;
            }
            self.files.lock().unwrap().insert(upload.file.uri, data);
            Ok(())
        }
        async fn file_exists(&self, _registry: &str, uri: &str) -> Result<bool> {
            Ok(self.files.lock().unwrap().contains_key(uri))
        }
        async fn version_exists(&self, _r: &str, _t: ArtifactType, _p: &str, _v: &str) -> Result<bool> {
            Ok(false)
        }
        fn oci_image_path(&self, registry: &str, package: &str) -> Result<String> {
            Ok(format!("stub.example/{}/{}", registry, package))
        }
        fn keychain(&self) -> Result<Keychain> {
            Ok(Keychain::new())
        }
        async fn get_registry_metadata(&self, _r: &str) -> Result<BTreeMap<String, String>> {
            Ok(self.metadata.clone())
        }
        async fn set_registry_metadata(&self, registry: &str, _m: &BTreeMap<String, String>) -> Result<()> {
            if self.fail_metadata {
                return Err(MigrateError::adapter(registry, "metadata is read-only"));
            }
            Ok(())
        }
    }

    fn scope(
        artifact_type: ArtifactType,
        source: Arc<StubAdapter>,
        destination: Arc<StubAdapter>,
    ) -> Arc<MappingScope> {
        let registry = |endpoint: &str| RegistryConfig {
            endpoint: endpoint.to_string(),
            registry_type: "stub".to_string(),
            credentials: Credentials::new("user", "pass"),
            insecure: false,
        };
        let mapping = RegistryMapping::new(artifact_type, "src", "dst");
        let config = Config {
            version: "1".to_string(),
            dry_run: false,
            concurrency: 2,
            failure_mode: FailureMode::Continue,
            version_concurrency: 2,
            source: registry("stub://source"),
            destination: registry("stub://destination"),
            mappings: vec![mapping.clone()],
        };
        Arc::new(MappingScope::new(
            &config,
            &mapping,
            source,
            destination,
            TransferStats::new(),
        ))
    }

    #[tokio::test]
    async fn test_started_upload_completes_after_cancel() {
        let source = Arc::new(StubAdapter::with_files(&[("/pkg-1.0.0.tgz", "one")]));
        let destination = Arc::new(StubAdapter {
            upload_delay: Some(Duration::from_millis(300)),
            ..StubAdapter::default()
        });
        let scope = scope(ArtifactType::Npm, source, Arc::clone(&destination));
        let version = Version::new("src", "pkg", "1.0.0", "/").with_files(vec!["pkg-1.0.0.tgz".into()]);
        let job = FileJob::new(Arc::clone(&scope), File::new("src", "/pkg-1.0.0.tgz", 3), &version);

        let ctx = RunContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        job.migrate(&ctx).await.unwrap();

        assert!(ctx.is_cancelled());
        assert_eq!(destination.uris(), vec!["/pkg-1.0.0.tgz".to_string()]);
        let stats = scope.stats.snapshot().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].status, TransferStatus::Success);
    }

    #[tokio::test]
    async fn test_cancelled_file_job_does_not_start() {
        let source = Arc::new(StubAdapter::with_files(&[("/pkg-1.0.0.tgz", "one")]));
        let destination = Arc::new(StubAdapter::default());
        let scope = scope(ArtifactType::Npm, source, Arc::clone(&destination));
        let version = Version::new("src", "pkg", "1.0.0", "/");
        let job = FileJob::new(Arc::clone(&scope), File::new("src", "/pkg-1.0.0.tgz", 3), &version);

        let ctx = RunContext::new();
        ctx.cancel();
        let err = job.migrate(&ctx).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(destination.uris().is_empty());
        assert_eq!(scope.stats.len().await, 0);
    }

    #[tokio::test]
    async fn test_oci_version_job_is_unsupported() {
        let scope = scope(
            ArtifactType::Docker,
            Arc::new(StubAdapter::default()),
            Arc::new(StubAdapter::default()),
        );
        let job = VersionJob::new(scope, Version::new("src", "app", "latest", "/app"), build_tree(Vec::new()));

        let err = job.pre(&RunContext::new()).await.unwrap_err();
        assert!(matches!(err, MigrateError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_registry_post_failure_keeps_mapping_successful() {
        let mut source = StubAdapter::with_files(&[("/pkg-1.0.0.tgz", "one")]);
        source.metadata.insert("description".to_string(), "npm mirror".to_string());
        let destination = Arc::new(StubAdapter {
            fail_metadata: true,
            ..StubAdapter::default()
        });
        let scope = scope(ArtifactType::Npm, Arc::new(source), Arc::clone(&destination));

        let job: Box<dyn Job> = Box::new(RegistryJob::new(Arc::clone(&scope)));
        Engine::execute(&RunContext::new(), 1, vec![job]).await.unwrap();

        assert_eq!(destination.uris(), vec!["/pkg-1.0.0.tgz".to_string()]);
        let stats = scope.stats.snapshot().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].status, TransferStatus::Success);
    }

    #[tokio::test]
    async fn test_package_job_with_missing_path_is_not_found() {
        let source = Arc::new(StubAdapter::with_files(&[("/pkg-1.0.0.tgz", "one")]));
        let scope = scope(ArtifactType::Npm, Arc::clone(&source), Arc::new(StubAdapter::default()));
        let root = build_tree(source.get_files("src").await.unwrap());
        let job = PackageJob::new(scope, Package::new("src", "/missing", "missing"), root);

        let err = job.migrate(&RunContext::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
