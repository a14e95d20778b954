//! In-process registry backend
//!
//! Every adapter created from the same [`MemoryStore`] sees the same data,
//! partitioned by endpoint. Supports the full capability set, OCI
//! repositories and tags included, which makes it the backend of choice for
//! embedding and for exercising the migration chain without a network.

use async_trait::async_trait;
use bytes::Bytes;
use regmig_core::catalog::{packages_from_helm_index, packages_from_tree, tree_has_version, versions_from_tree};
use regmig_core::{
    build_tree, bytes_stream, collect_stream, registry_host, Adapter,
    ArtifactType, Credentials, Download, File, Keychain, MigrateError, Package, RegistryConfig,
    RegistryInfo, Result, TreeNode, Upload, Version,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct RegistryState {
    info: RegistryInfo,
    files: BTreeMap<String, (File, Bytes)>,
    images: BTreeSet<String>,
    tags: BTreeMap<String, BTreeMap<String, String>>,
    metadata: BTreeMap<String, String>,
    reject_uploads: bool,
}

type Endpoints = HashMap<String, HashMap<String, RegistryState>>;

/// Shared backing store for [`MemoryAdapter`]s
#[derive(Clone, Default)]
pub struct MemoryStore {
    endpoints: Arc<RwLock<Endpoints>>,
}

fn missing(registry: &str) -> MigrateError {
    MigrateError::NotFound(format!("registry {}", registry))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry if it does not exist yet
    pub async fn add_registry(&self, endpoint: &str, registry: &str, artifact_type: ArtifactType) {
        let mut endpoints = self.endpoints.write().await;
        endpoints
            .entry(endpoint.to_string())
            .or_default()
            .entry(registry.to_string())
            .or_insert_with(|| RegistryState {
                info: RegistryInfo {
                    name: registry.to_string(),
                    artifact_type: Some(artifact_type),
                    ..Default::default()
                },
                ..Default::default()
            });
    }

    /// Store a file, creating a generic registry on first use
    pub async fn put_file(&self, endpoint: &str, registry: &str, uri: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let file = File::new(registry, uri, data.len() as u64);
        let mut endpoints = self.endpoints.write().await;
        let state = endpoints
            .entry(endpoint.to_string())
            .or_default()
            .entry(registry.to_string())
            .or_insert_with(|| RegistryState {
                info: RegistryInfo {
                    name: registry.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            });
        state.files.insert(file.uri.clone(), (file, data));
    }

    /// Record an OCI repository in a registry
    pub async fn put_image(&self, endpoint: &str, registry: &str, repository: &str) {
        self.add_registry(endpoint, registry, ArtifactType::Docker).await;
        let mut endpoints = self.endpoints.write().await;
        if let Some(state) = endpoints
            .get_mut(endpoint)
            .and_then(|regs| regs.get_mut(registry))
        {
            state.images.insert(repository.to_string());
        }
    }

    /// Make every upload into `registry` fail
    pub async fn reject_uploads(&self, endpoint: &str, registry: &str) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(state) = endpoints
            .get_mut(endpoint)
            .and_then(|regs| regs.get_mut(registry))
        {
            state.reject_uploads = true;
        }
    }

    /// Sorted URIs stored in a registry
    pub async fn uris(&self, endpoint: &str, registry: &str) -> Vec<String> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(endpoint)
            .and_then(|regs| regs.get(registry))
            .map(|state| state.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn file_data(&self, endpoint: &str, registry: &str, uri: &str) -> Option<Bytes> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(endpoint)
            .and_then(|regs| regs.get(registry))
            .and_then(|state| state.files.get(uri))
            .map(|(_, data)| data.clone())
    }

    pub async fn has_registry(&self, endpoint: &str, registry: &str) -> bool {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(endpoint)
            .map(|regs| regs.contains_key(registry))
            .unwrap_or(false)
    }

    async fn read<T>(&self, endpoint: &str, registry: &str, f: impl FnOnce(&RegistryState) -> T) -> Result<T> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(endpoint)
            .and_then(|regs| regs.get(registry))
            .map(f)
            .ok_or_else(|| missing(registry))
    }

    async fn write<T>(
        &self,
        endpoint: &str,
        registry: &str,
        f: impl FnOnce(&mut RegistryState) -> T,
    ) -> Result<T> {
        let mut endpoints = self.endpoints.write().await;
        endpoints
            .get_mut(endpoint)
            .and_then(|regs| regs.get_mut(registry))
            .map(f)
            .ok_or_else(|| missing(registry))
    }
}

/// Registry adapter over a [`MemoryStore`]
pub struct MemoryAdapter {
    endpoint: String,
    credentials: Credentials,
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new(config: &RegistryConfig, store: MemoryStore) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            credentials: config.credentials.clone(),
            store,
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn registry_type(&self) -> &str {
        "memory"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn validate_credentials(&self) -> Result<()> {
        if self.credentials.is_empty() {
            return Err(MigrateError::Auth {
                endpoint: self.endpoint.clone(),
                message: "no credentials supplied".to_string(),
            });
        }
        Ok(())
    }

    async fn get_registry(&self, registry: &str) -> Result<RegistryInfo> {
        self.store
            .read(&self.endpoint, registry, |state| state.info.clone())
            .await
    }

    async fn create_registry(&self, registry: &str, artifact_type: ArtifactType) -> Result<RegistryInfo> {
        self.store
            .add_registry(&self.endpoint, registry, artifact_type)
            .await;
        self.get_registry(registry).await
    }

    async fn get_files(&self, registry: &str) -> Result<Vec<File>> {
        self.store
            .read(&self.endpoint, registry, |state| {
                state.files.values().map(|(f, _)| f.clone()).collect()
            })
            .await
    }

    async fn get_packages(
        &self,
        registry: &str,
        artifact_type: ArtifactType,
        root: &Arc<TreeNode>,
    ) -> Result<Vec<Package>> {
        if artifact_type.is_oci() {
            return self
                .store
                .read(&self.endpoint, registry, |state| {
                    state
                        .images
                        .iter()
                        .map(|repo| Package::new(registry, format!("/{}", repo), repo))
                        .collect()
                })
                .await;
        }

        if artifact_type == ArtifactType::HelmLegacy && root.child("index.yaml").is_some() {
            if let Some(index) = self.store.file_data(&self.endpoint, registry, "/index.yaml").await {
                let text = String::from_utf8_lossy(&index);
                return packages_from_helm_index(registry, &text, root);
            }
        }

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

    async fn download_file(&self, registry: &str, uri: &str) -> Result<Download> {
        let data = self
            .store
            .file_data(&self.endpoint, registry, uri)
            .await
            .ok_or_else(|| MigrateError::NotFound(format!("{}{}", registry, uri)))?;

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), data.len().to_string());
        Ok(Download {
            body: bytes_stream(data),
            headers,
        })
    }

    async fn upload_file(&self, registry: &str, upload: Upload) -> Result<()> {
        let rejected = self
            .store
            .read(&self.endpoint, registry, |state| state.reject_uploads)
            .await?;
        if rejected {
            return Err(MigrateError::adapter(registry, format!("upload of {} rejected", upload.file.uri)));
        }

        let data = collect_stream(upload.body).await?;
        debug!(registry, uri = %upload.file.uri, size = data.len(), "Stored file");
        let mut file = File::new(registry, &upload.file.uri, data.len() as u64);
        file.checksums = upload.file.checksums;
        self.store
            .write(&self.endpoint, registry, move |state| {
                state.files.insert(file.uri.clone(), (file, data));
            })
            .await
    }

    async fn file_exists(&self, registry: &str, uri: &str) -> Result<bool> {
        Ok(self.store.file_data(&self.endpoint, registry, uri).await.is_some())
    }

    async fn version_exists(
        &self,
        registry: &str,
        artifact_type: ArtifactType,
        package: &str,
        version: &str,
    ) -> Result<bool> {
        if artifact_type.is_oci() {
            return Ok(false);
        }
        let root = build_tree(self.get_files(registry).await?);
        tree_has_version(registry, artifact_type, &root, package, version)
    }

    fn oci_image_path(&self, registry: &str, package: &str) -> Result<String> {
        Ok(format!("{}/{}/{}", registry_host(&self.endpoint)?, registry, package))
    }

    fn keychain(&self) -> Result<Keychain> {
        Keychain::for_endpoint(&self.endpoint, &self.credentials)
    }

    async fn get_tags(&self, registry: &str, package: &str) -> Result<BTreeMap<String, String>> {
        self.store
            .read(&self.endpoint, registry, |state| {
                state.tags.get(package).cloned().unwrap_or_default()
            })
            .await
    }

    async fn add_tag(&self, registry: &str, package: &str, tag: &str, version: &str) -> Result<()> {
        self.store
            .write(&self.endpoint, registry, |state| {
                state
                    .tags
                    .entry(package.to_string())
                    .or_default()
                    .insert(tag.to_string(), version.to_string());
            })
            .await
    }

    async fn get_registry_metadata(&self, registry: &str) -> Result<BTreeMap<String, String>> {
        self.store
            .read(&self.endpoint, registry, |state| state.metadata.clone())
            .await
    }

    async fn set_registry_metadata(
        &self,
        registry: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.store
            .write(&self.endpoint, registry, |state| {
                state.metadata.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
            })
            .await
    }
}
