//! Registry backends for regmig

mod fs;
mod memory;
mod oci;

pub use fs::FilesystemAdapter;
pub use memory::{MemoryAdapter, MemoryStore};
pub use oci::OciImageCopier;

use regmig_core::{Adapter, AdapterRegistry, Result};
use std::sync::Arc;

/// Register every backend that can be built from configuration alone
pub fn register_builtin(registry: &mut AdapterRegistry) -> Result<()> {
    registry.register_factory("fs", |config| {
        Ok(Arc::new(FilesystemAdapter::new(config)?) as Arc<dyn Adapter>)
    })
}

/// Register the in-process backend under type `memory`, backed by `store`
pub fn register_memory(registry: &mut AdapterRegistry, store: MemoryStore) -> Result<()> {
    registry.register_factory("memory", move |config| {
        Ok(Arc::new(MemoryAdapter::new(config, store.clone())) as Arc<dyn Adapter>)
    })
}

/// Create an adapter registry with all built-in backends registered
pub fn create_adapter_registry() -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    register_builtin(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use regmig_core::{
        ArtifactType, Config, Credentials, FailureMode, ImageCopier, ImageCopyRequest,
        MigrateError, Migrator, RegistryConfig, RegistryMapping, RunContext, TransferStatus,
    };
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    const SRC: &str = "mem://source";
    const DST: &str = "mem://destination";

    fn registry_config(endpoint: &str) -> RegistryConfig {
        RegistryConfig {
            endpoint: endpoint.to_string(),
            registry_type: "memory".to_string(),
            credentials: Credentials::new("user", "pass"),
            insecure: false,
        }
    }

    fn config(mappings: Vec<RegistryMapping>) -> Config {
        Config {
            version: "1".to_string(),
            dry_run: false,
            concurrency: 2,
            failure_mode: FailureMode::Continue,
            version_concurrency: 4,
            source: registry_config(SRC),
            destination: registry_config(DST),
            mappings,
        }
    }

    fn migrator(store: &MemoryStore) -> Migrator {
        let mut adapters = create_adapter_registry().unwrap();
        register_memory(&mut adapters, store.clone()).unwrap();
        Migrator::new(adapters)
    }

    async fn npm_source() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_registry(SRC, "npm-local", ArtifactType::Npm).await;
        store.put_file(SRC, "npm-local", "/pkg-1.0.0.tgz", "one").await;
        store.put_file(SRC, "npm-local", "/pkg-1.1.0.tgz", "two").await;
        store
    }

    #[test]
    fn test_builtin_registration() {
        let mut registry = create_adapter_registry().unwrap();
        assert_eq!(registry.registered_types(), vec!["fs".to_string()]);
        assert!(matches!(
            register_builtin(&mut registry),
            Err(MigrateError::DuplicateAdapter(_))
        ));
    }

    #[tokio::test]
    async fn test_npm_end_to_end() {
        let store = npm_source().await;
        let mapping = RegistryMapping::new(ArtifactType::Npm, "npm-local", "npm-remote");

        let summary = migrator(&store)
            .run(&config(vec![mapping]), &RunContext::new())
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.stats.len(), 2);
        assert!(summary
            .stats
            .iter()
            .all(|s| s.status == TransferStatus::Success));
        assert_eq!(
            store.uris(DST, "npm-remote").await,
            vec!["/pkg-1.0.0.tgz".to_string(), "/pkg-1.1.0.tgz".to_string()]
        );
        assert_eq!(
            store.file_data(DST, "npm-remote", "/pkg-1.1.0.tgz").await.unwrap(),
            "two"
        );
    }

    #[tokio::test]
    async fn test_exclude_pattern_drops_matching_version() {
        let store = npm_source().await;
        let mut mapping = RegistryMapping::new(ArtifactType::Npm, "npm-local", "npm-remote");
        mapping.exclude_patterns = vec!["*-1.1.0.tgz".to_string()];

        let summary = migrator(&store)
            .run(&config(vec![mapping]), &RunContext::new())
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.stats.len(), 1);
        assert_eq!(summary.stats[0].uri, "/pkg-1.0.0.tgz");
        assert_eq!(summary.stats[0].status, TransferStatus::Success);
    }

    #[tokio::test]
    async fn test_rerun_skips_files_already_present() {
        let store = npm_source().await;
        let mapping = RegistryMapping::new(ArtifactType::Npm, "npm-local", "npm-remote");
        let config = config(vec![mapping]);
        let migrator = migrator(&store);

        migrator.run(&config, &RunContext::new()).await.unwrap();
        let second = migrator.run(&config, &RunContext::new()).await.unwrap();

        assert!(second.success);
        assert_eq!(second.stats.len(), 2);
        assert!(second
            .stats
            .iter()
            .all(|s| s.status == TransferStatus::Skipped));
    }

    #[tokio::test]
    async fn test_dry_run_transfers_nothing() {
        let store = npm_source().await;
        let mut config = config(vec![RegistryMapping::new(
            ArtifactType::Npm,
            "npm-local",
            "npm-remote",
        )]);
        config.dry_run = true;

        let summary = migrator(&store).run(&config, &RunContext::new()).await.unwrap();

        assert!(summary.success);
        assert!(summary.dry_run);
        assert!(summary
            .stats
            .iter()
            .all(|s| s.status == TransferStatus::Skipped));
        assert!(!store.has_registry(DST, "npm-remote").await);
    }

    #[tokio::test]
    async fn test_dist_tags_and_metadata_follow_the_files() {
        let store = npm_source().await;
        let mut seed = AdapterRegistry::new();
        register_memory(&mut seed, store.clone()).unwrap();
        let source = seed.create(&registry_config(SRC)).unwrap();
        source.add_tag("npm-local", "pkg", "latest", "1.1.0").await.unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("description".to_string(), "public mirror".to_string());
        source.set_registry_metadata("npm-local", &metadata).await.unwrap();

        let mapping = RegistryMapping::new(ArtifactType::Npm, "npm-local", "npm-remote");
        migrator(&store)
            .run(&config(vec![mapping]), &RunContext::new())
            .await
            .unwrap();

        let destination = seed.create(&registry_config(DST)).unwrap();
        let tags = destination.get_tags("npm-remote", "pkg").await.unwrap();
        assert_eq!(tags.get("latest").map(String::as_str), Some("1.1.0"));
        assert_eq!(
            destination.get_registry_metadata("npm-remote").await.unwrap(),
            metadata
        );
    }

    async fn two_mappings_first_failing(mode: FailureMode) -> regmig_core::MigrationSummary {
        let store = npm_source().await;
        store.add_registry(SRC, "npm-other", ArtifactType::Npm).await;
        store.put_file(SRC, "npm-other", "/lib-2.0.0.tgz", "lib").await;
        store.add_registry(DST, "npm-broken", ArtifactType::Npm).await;
        store.reject_uploads(DST, "npm-broken").await;

        let mut config = config(vec![
            RegistryMapping::new(ArtifactType::Npm, "npm-local", "npm-broken"),
            RegistryMapping::new(ArtifactType::Npm, "npm-other", "npm-good"),
        ]);
        config.failure_mode = mode;
        migrator(&store).run(&config, &RunContext::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_failure_mode_continue_runs_later_mappings() {
        let summary = two_mappings_first_failing(FailureMode::Continue).await;

        assert!(!summary.success);
        assert_eq!(summary.mappings.len(), 2);
        assert!(summary.mappings[0].error.is_some());
        assert!(summary.mappings[1].error.is_none());

        let failed: Vec<_> = summary
            .stats
            .iter()
            .filter(|s| s.status == TransferStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|s| s.error.as_deref().unwrap_or("").contains("rejected")));
        assert!(summary
            .stats
            .iter()
            .any(|s| s.uri == "/lib-2.0.0.tgz" && s.status == TransferStatus::Success));
    }

    #[tokio::test]
    async fn test_failure_mode_stop_ends_the_run() {
        let summary = two_mappings_first_failing(FailureMode::Stop).await;

        assert!(!summary.success);
        assert_eq!(summary.mappings.len(), 1);
        assert!(summary.stats.iter().all(|s| s.uri != "/lib-2.0.0.tgz"));
    }

    #[derive(Default)]
    struct RecordingCopier {
        requests: Mutex<Vec<ImageCopyRequest>>,
    }

    #[async_trait]
    impl ImageCopier for RecordingCopier {
        async fn copy_repository(&self, _ctx: &RunContext, request: &ImageCopyRequest) -> Result<()> {
            self.requests.lock().await.push(request.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_oci_packages_go_through_the_image_copier() {
        let store = MemoryStore::new();
        let mut mapping = RegistryMapping::new(ArtifactType::Docker, "docker-local", "docker-remote");
        mapping.include_patterns = vec!["team/app".to_string()];
        let mut config = config(vec![mapping]);
        config.source.endpoint = "https://src.example.com".to_string();
        config.destination.endpoint = "https://dst.example.com".to_string();
        config.destination.insecure = true;
        store.put_image("https://src.example.com", "docker-local", "team/app").await;
        store.put_image("https://src.example.com", "docker-local", "team/tool").await;

        let copier = Arc::new(RecordingCopier::default());
        let summary = migrator(&store)
            .with_image_copier(copier.clone())
            .run(&config, &RunContext::new())
            .await
            .unwrap();

        assert!(summary.success, "{:?}", summary.mappings);
        let requests = copier.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source, "src.example.com/docker-local/team/app");
        assert_eq!(requests[0].destination, "dst.example.com/docker-remote/team/app");
        assert!(requests[0].keychain.resolve("src.example.com").is_some());
        assert!(requests[0].keychain.resolve("dst.example.com").is_some());
        assert_eq!(requests[0].jobs, 2);
        assert!(!requests[0].source_insecure);
        assert!(requests[0].destination_insecure);

        assert_eq!(summary.stats.len(), 1);
        assert_eq!(summary.stats[0].status, TransferStatus::Success);
    }

    #[tokio::test]
    async fn test_oci_without_copier_fails_the_mapping() {
        let store = MemoryStore::new();
        store.put_image(SRC, "docker-local", "app").await;
        let config = config(vec![RegistryMapping::new(
            ArtifactType::Docker,
            "docker-local",
            "docker-remote",
        )]);

        let summary = migrator(&store).run(&config, &RunContext::new()).await.unwrap();
        assert!(!summary.success);
        let error = summary.mappings[0].error.as_deref().unwrap_or_default();
        assert!(error.contains("no image copier"), "{}", error);
    }

    #[tokio::test]
    async fn test_cancelled_run_transfers_nothing() {
        let store = npm_source().await;
        let ctx = RunContext::new();
        ctx.cancel();

        let summary = migrator(&store)
            .run(
                &config(vec![RegistryMapping::new(ArtifactType::Npm, "npm-local", "npm-remote")]),
                &ctx,
            )
            .await
            .unwrap();

        assert!(!summary.success);
        assert!(summary.stats.is_empty());
        assert!(store.uris(DST, "npm-remote").await.is_empty());
    }

    #[tokio::test]
    async fn test_filesystem_to_filesystem() {
        let src = tempfile::TempDir::new().unwrap();
        let dst = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("maven/com/acme/lib/1.0")).unwrap();
        std::fs::write(src.path().join("maven/com/acme/lib/1.0/lib-1.0.jar"), b"jar").unwrap();
        std::fs::write(src.path().join("maven/com/acme/lib/1.0/lib-1.0.pom"), b"pom").unwrap();

        let fs_config = |dir: &tempfile::TempDir| RegistryConfig {
            endpoint: dir.path().display().to_string(),
            registry_type: "fs".to_string(),
            credentials: Credentials::new("local", ""),
            insecure: false,
        };
        let mut config = config(vec![RegistryMapping::new(ArtifactType::Maven, "maven", "maven")]);
        config.source = fs_config(&src);
        config.destination = fs_config(&dst);

        let summary = Migrator::new(create_adapter_registry().unwrap())
            .run(&config, &RunContext::new())
            .await
            .unwrap();

        assert!(summary.success, "{:?}", summary.mappings);
        assert_eq!(summary.stats.len(), 2);
        assert_eq!(
            std::fs::read(dst.path().join("maven/com/acme/lib/1.0/lib-1.0.jar")).unwrap(),
            b"jar"
        );
    }
}
