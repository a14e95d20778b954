//! Registry adapter trait and factory registry

use crate::engine::RunContext;
use crate::error::{MigrateError, Result};
use crate::tree::TreeNode;
use crate::types::{ArtifactType, Credentials, File, Package, RegistryConfig, RegistryInfo, Version};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Streaming file body
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Wrap an in-memory buffer as a [`ByteStream`]
pub fn bytes_stream(data: Bytes) -> ByteStream {
    stream::once(async move { Ok(data) }).boxed()
}

/// Drain a [`ByteStream`] into one buffer
pub async fn collect_stream(mut body: ByteStream) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// A downloaded file: its body plus transport headers worth forwarding
pub struct Download {
    pub body: ByteStream,
    pub headers: BTreeMap<String, String>,
}

/// Everything a destination needs to store one file
pub struct Upload {
    pub body: ByteStream,
    pub file: File,
    pub headers: BTreeMap<String, String>,
    pub package: String,
    pub version: String,
    pub artifact_type: ArtifactType,
    /// Format-specific values from the source version
    pub metadata: BTreeMap<String, String>,
}

/// Credentials keyed by registry host, consumed by the image copier
#[derive(Clone, Debug, Default)]
pub struct Keychain {
    entries: BTreeMap<String, Credentials>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keychain holding `credentials` for the host of `endpoint`
    pub fn for_endpoint(endpoint: &str, credentials: &Credentials) -> Result<Self> {
        let mut keychain = Self::new();
        if !credentials.is_empty() {
            keychain.insert(registry_host(endpoint)?, credentials.clone());
        }
        Ok(keychain)
    }

    pub fn insert(&mut self, host: impl Into<String>, credentials: Credentials) {
        self.entries.insert(host.into(), credentials);
    }

    /// Merge two keychains; entries already present in `self` win
    pub fn merge(mut self, other: Keychain) -> Self {
        for (host, creds) in other.entries {
            self.entries.entry(host).or_insert(creds);
        }
        self
    }

    pub fn resolve(&self, host: &str) -> Option<&Credentials> {
        self.entries.get(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|h| h.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Host (with port, when present) of a registry endpoint, scheme optional
pub fn registry_host(endpoint: &str) -> Result<String> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    };
    let url = url::Url::parse(&with_scheme)
        .map_err(|e| MigrateError::InvalidConfig(format!("endpoint {}: {}", endpoint, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| MigrateError::InvalidConfig(format!("endpoint {} has no host", endpoint)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Registry adapter trait
///
/// One adapter represents one configured registry endpoint, used as source
/// or destination. Methods are called concurrently from many jobs targeting
/// different packages and versions of the same registry.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Backend kind this adapter was created for
    fn registry_type(&self) -> &str;

    /// Configured endpoint
    fn endpoint(&self) -> &str;

    /// Check that the configured credentials are accepted
    async fn validate_credentials(&self) -> Result<()>;

    /// Fetch registry metadata, `NotFound` if the registry does not exist
    async fn get_registry(&self, registry: &str) -> Result<RegistryInfo>;

    /// Best-effort creation of a missing registry
    async fn create_registry(&self, registry: &str, artifact_type: ArtifactType) -> Result<RegistryInfo>;

    /// Flat listing of every file in a registry
    async fn get_files(&self, registry: &str) -> Result<Vec<File>>;

    /// Packages of `artifact_type` in a registry, using `root` where the format allows
    async fn get_packages(
        &self,
        registry: &str,
        artifact_type: ArtifactType,
        root: &Arc<TreeNode>,
    ) -> Result<Vec<Package>>;

    /// Versions of one package; `node` is the package's subtree
    async fn get_versions(
        &self,
        artifact_type: ArtifactType,
        package: &Package,
        node: &Arc<TreeNode>,
    ) -> Result<Vec<Version>>;

    async fn download_file(&self, registry: &str, uri: &str) -> Result<Download>;

    async fn upload_file(&self, registry: &str, upload: Upload) -> Result<()>;

    async fn file_exists(&self, registry: &str, uri: &str) -> Result<bool>;

    async fn version_exists(
        &self,
        registry: &str,
        artifact_type: ArtifactType,
        package: &str,
        version: &str,
    ) -> Result<bool>;

    /// OCI reference (`host/path`) of a package stored as an OCI repository
    fn oci_image_path(&self, registry: &str, package: &str) -> Result<String>;

    /// Credentials for the image copier
    fn keychain(&self) -> Result<Keychain>;

    /// Mutable pointers (e.g. NPM dist-tags) of a package: tag -> version
    async fn get_tags(&self, _registry: &str, _package: &str) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    async fn add_tag(&self, registry: &str, package: &str, _tag: &str, _version: &str) -> Result<()> {
        Err(MigrateError::Unsupported(format!(
            "tags on {}/{} for {} registries",
            registry,
            package,
            self.registry_type()
        )))
    }

    async fn get_registry_metadata(&self, registry: &str) -> Result<BTreeMap<String, String>>;

    async fn set_registry_metadata(
        &self,
        registry: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Builds an adapter from a registry configuration
pub type AdapterFactory = Arc<dyn Fn(&RegistryConfig) -> Result<Arc<dyn Adapter>> + Send + Sync>;

/// Registry of adapter factories keyed by registry type
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; registering the same type twice is an error
    pub fn register_factory<F>(&mut self, registry_type: &str, factory: F) -> Result<()>
    where
        F: Fn(&RegistryConfig) -> Result<Arc<dyn Adapter>> + Send + Sync + 'static,
    {
        let key = registry_type.trim().to_ascii_lowercase();
        if self.factories.contains_key(&key) {
            return Err(MigrateError::DuplicateAdapter(key));
        }
        self.factories.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Check if a factory is registered for a type
    pub fn has(&self, registry_type: &str) -> bool {
        self.factories
            .contains_key(&registry_type.trim().to_ascii_lowercase())
    }

    /// Get all registered types, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Create an adapter for a configured registry
    pub fn create(&self, config: &RegistryConfig) -> Result<Arc<dyn Adapter>> {
        let key = config.registry_type.trim().to_ascii_lowercase();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| MigrateError::AdapterNotFound(config.registry_type.clone()))?;
        factory(config)
    }
}

/// Parameters of one whole-repository OCI copy
#[derive(Clone, Debug)]
pub struct ImageCopyRequest {
    pub source: String,
    pub destination: String,
    pub keychain: Keychain,
    /// Upper bound on concurrent tag copies
    pub jobs: usize,
    /// Reach the source over plain HTTP or unverified TLS
    pub source_insecure: bool,
    /// Reach the destination over plain HTTP or unverified TLS
    pub destination_insecure: bool,
}

/// External primitive copying a full OCI repository between registries
#[async_trait]
pub trait ImageCopier: Send + Sync {
    async fn copy_repository(&self, ctx: &RunContext, request: &ImageCopyRequest) -> Result<()>;
}
