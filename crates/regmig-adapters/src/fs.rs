//! Local directory backend
//!
//! The endpoint is a directory (`file://` prefix accepted) and every registry
//! is one sub-directory of it:
//! - `<root>/<registry>/**` - artifact files
//! - `<root>/<registry>/.regmig/registry.json` - registry info
//! - `<root>/<registry>/.regmig/metadata.json` - registry metadata
//! - `<root>/<registry>/.regmig/tags/<package>.json` - dist-tags

use async_trait::async_trait;
use futures::StreamExt;
use regmig_core::catalog::{packages_from_helm_index, packages_from_tree, tree_has_version, versions_from_tree};
use regmig_core::{
    build_tree, Adapter, ArtifactType, ByteStream, Download, File, Keychain, MigrateError, Package,
    RegistryConfig, RegistryInfo, Result, TreeNode, Upload, Version,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

const STATE_DIR: &str = ".regmig";

/// Registry adapter over a local directory tree
pub struct FilesystemAdapter {
    endpoint: String,
    root: PathBuf,
}

impl FilesystemAdapter {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let path = config
            .endpoint
            .strip_prefix("file://")
            .unwrap_or(&config.endpoint);
        if path.trim().is_empty() {
            return Err(MigrateError::InvalidConfig(
                "filesystem endpoint must be a directory".to_string(),
            ));
        }
        Ok(Self {
            endpoint: config.endpoint.clone(),
            root: PathBuf::from(path),
        })
    }

    fn registry_dir(&self, registry: &str) -> Result<PathBuf> {
        if registry.is_empty() || registry.contains(['/', '\\']) || registry == ".." || registry == "." {
            return Err(MigrateError::adapter(registry, "invalid registry name"));
        }
        Ok(self.root.join(registry))
    }

    /// Map a registry URI to a path inside the registry directory
    fn file_path(&self, registry: &str, uri: &str) -> Result<PathBuf> {
        let mut path = self.registry_dir(registry)?;
        for segment in uri.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." || segment == "." || segment == STATE_DIR {
                return Err(MigrateError::adapter(registry, format!("invalid path {}", uri)));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn state_path(&self, registry: &str, name: &str) -> Result<PathBuf> {
        Ok(self.registry_dir(registry)?.join(STATE_DIR).join(name))
    }

    fn tags_path(&self, registry: &str, package: &str) -> Result<PathBuf> {
        // Scoped NPM names contain a slash
        let file = format!("{}.json", package.replace('/', "%2f"));
        Ok(self.registry_dir(registry)?.join(STATE_DIR).join("tags").join(file))
    }

    async fn ensure_registry(&self, registry: &str) -> Result<PathBuf> {
        let dir = self.registry_dir(registry)?;
        if tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            Ok(dir)
        } else {
            Err(MigrateError::NotFound(format!("registry {}", registry)))
        }
    }

    async fn list_files(&self, registry: &str, dir: &Path) -> Result<Vec<File>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name == STATE_DIR || name.ends_with(".part") {
                    continue;
                }
                let metadata = entry.metadata().await?;
                let path = entry.path();
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                let relative = path
                    .strip_prefix(dir)
                    .map_err(|e| MigrateError::adapter(registry, e.to_string()))?;
                let uri = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                let mut file = File::new(registry, uri, metadata.len());
                file.last_modified = metadata.modified().ok().map(Into::into);
                files.push(file);
            }
        }

        Ok(files)
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(serde_json::from_slice(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(value)?).await?;
    Ok(())
}

/// Stream `body` into a new file at `path`, returning the bytes written
async fn write_body(path: &Path, mut body: ByteStream) -> std::io::Result<u64> {
    let mut out = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    Ok(written)
}

#[async_trait]
impl Adapter for FilesystemAdapter {
    fn registry_type(&self) -> &str {
        "fs"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn validate_credentials(&self) -> Result<()> {
        match tokio::fs::metadata(&self.root).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(MigrateError::InvalidConfig(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(root = %self.root.display(), "Endpoint directory does not exist yet");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_registry(&self, registry: &str) -> Result<RegistryInfo> {
        self.ensure_registry(registry).await?;
        let mut info: RegistryInfo = read_json(&self.state_path(registry, "registry.json")?).await?;
        if info.name.is_empty() {
            info.name = registry.to_string();
        }
        Ok(info)
    }

    async fn create_registry(&self, registry: &str, artifact_type: ArtifactType) -> Result<RegistryInfo> {
        let dir = self.registry_dir(registry)?;
        tokio::fs::create_dir_all(&dir).await?;
        let info = RegistryInfo {
            name: registry.to_string(),
            artifact_type: Some(artifact_type),
            url: Some(dir.display().to_string()),
            description: None,
        };
        write_json(&self.state_path(registry, "registry.json")?, &info).await?;
        Ok(info)
    }

    async fn get_files(&self, registry: &str) -> Result<Vec<File>> {
        let dir = self.ensure_registry(registry).await?;
        let files = self.list_files(registry, &dir).await?;
        debug!(registry, count = files.len(), "Listed files");
        Ok(files)
    }

    async fn get_packages(
        &self,
        registry: &str,
        artifact_type: ArtifactType,
        root: &Arc<TreeNode>,
    ) -> Result<Vec<Package>> {
        if artifact_type.is_oci() {
            return Err(MigrateError::Unsupported(format!(
                "{} registries on the filesystem backend",
                artifact_type
            )));
        }

        if artifact_type == ArtifactType::HelmLegacy && root.child("index.yaml").is_some() {
            let index = tokio::fs::read_to_string(self.file_path(registry, "index.yaml")?).await?;
            return packages_from_helm_index(registry, &index, root);
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
        let path = self.file_path(registry, uri)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MigrateError::NotFound(format!("{}{}", registry, uri))
            } else {
                e.into()
            }
        })?;
        let size = file.metadata().await?.len();

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), size.to_string());
        Ok(Download {
            body: ReaderStream::new(file).boxed(),
            headers,
        })
    }

    async fn upload_file(&self, registry: &str, upload: Upload) -> Result<()> {
        let path = self.file_path(registry, &upload.file.uri)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so readers never see partial files
        let partial = path.with_file_name(format!("{}.part", upload.file.name));
        let written = match write_body(&partial, upload.body).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    warn!(path = %partial.display(), error = %cleanup, "Could not remove partial upload");
                }
                return Err(e.into());
            }
        };

        tokio::fs::rename(&partial, &path).await?;
        debug!(registry, uri = %upload.file.uri, size = written, "Stored file");
        Ok(())
    }

    async fn file_exists(&self, registry: &str, uri: &str) -> Result<bool> {
        let path = self.file_path(registry, uri)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
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
        let files = match self.get_files(registry).await {
            Ok(files) => files,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        tree_has_version(registry, artifact_type, &build_tree(files), package, version)
    }

    fn oci_image_path(&self, registry: &str, package: &str) -> Result<String> {
        Err(MigrateError::Unsupported(format!(
            "OCI image {}/{} on the filesystem backend",
            registry, package
        )))
    }

    fn keychain(&self) -> Result<Keychain> {
        Ok(Keychain::new())
    }

    async fn get_tags(&self, registry: &str, package: &str) -> Result<BTreeMap<String, String>> {
        read_json(&self.tags_path(registry, package)?).await
    }

    async fn add_tag(&self, registry: &str, package: &str, tag: &str, version: &str) -> Result<()> {
        let path = self.tags_path(registry, package)?;
        let mut tags: BTreeMap<String, String> = read_json(&path).await?;
        if let Some(previous) = tags.insert(tag.to_string(), version.to_string()) {
            if previous != version {
                warn!(package, tag, from = %previous, to = version, "Moving dist-tag");
            }
        }
        write_json(&path, &tags).await
    }

    async fn get_registry_metadata(&self, registry: &str) -> Result<BTreeMap<String, String>> {
        self.ensure_registry(registry).await?;
        read_json(&self.state_path(registry, "metadata.json")?).await
    }

    async fn set_registry_metadata(
        &self,
        registry: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.ensure_registry(registry).await?;
        write_json(&self.state_path(registry, "metadata.json")?, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use regmig_core::{bytes_stream, collect_stream, Credentials};
    use tempfile::TempDir;

    fn adapter(dir: &TempDir) -> FilesystemAdapter {
        FilesystemAdapter::new(&RegistryConfig {
            endpoint: format!("file://{}", dir.path().display()),
            registry_type: "fs".to_string(),
            credentials: Credentials::default(),
            insecure: false,
        })
        .unwrap()
    }

    fn upload(uri: &str, data: &'static [u8]) -> Upload {
        Upload {
            body: bytes_stream(Bytes::from_static(data)),
            file: File::new("npm", uri, data.len() as u64),
            headers: BTreeMap::new(),
            package: "pkg".to_string(),
            version: "1.0.0".to_string(),
            artifact_type: ArtifactType::Npm,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let dir = TempDir::new().unwrap();
        let fs = adapter(&dir);

        assert!(fs.get_registry("npm").await.unwrap_err().is_not_found());
        let info = fs.create_registry("npm", ArtifactType::Npm).await.unwrap();
        assert_eq!(info.artifact_type, Some(ArtifactType::Npm));
        assert_eq!(fs.get_registry("npm").await.unwrap().name, "npm");
        assert!(fs.get_files("npm").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_then_list_and_download() {
        let dir = TempDir::new().unwrap();
        let fs = adapter(&dir);
        fs.create_registry("npm", ArtifactType::Npm).await.unwrap();

        fs.upload_file("npm", upload("/a/pkg-1.0.0.tgz", b"tarball")).await.unwrap();
        assert!(fs.file_exists("npm", "/a/pkg-1.0.0.tgz").await.unwrap());
        assert!(!fs.file_exists("npm", "/a/pkg-2.0.0.tgz").await.unwrap());

        let files = fs.get_files("npm").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].uri, "/a/pkg-1.0.0.tgz");
        assert_eq!(files[0].size, 7);
        assert!(files[0].last_modified.is_some());

        let download = fs.download_file("npm", "/a/pkg-1.0.0.tgz").await.unwrap();
        assert_eq!(collect_stream(download.body).await.unwrap(), Bytes::from_static(b"tarball"));

        assert!(fs
            .version_exists("npm", ArtifactType::Npm, "pkg", "1.0.0")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let fs = adapter(&dir);
        fs.create_registry("npm", ArtifactType::Npm).await.unwrap();

        let mut broken = upload("/a/pkg-1.0.0.tgz", b"tarball");
        broken.body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"tar")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")),
        ])
        .boxed();

        assert!(fs.upload_file("npm", broken).await.is_err());
        assert!(!dir.path().join("npm/a/pkg-1.0.0.tgz.part").exists());
        assert!(!dir.path().join("npm/a/pkg-1.0.0.tgz").exists());
        assert!(!fs.file_exists("npm", "/a/pkg-1.0.0.tgz").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let fs = adapter(&dir);
        assert!(fs.file_path("npm", "/../etc/passwd").is_err());
        assert!(fs.file_path("npm", "/.regmig/metadata.json").is_err());
        assert!(fs.registry_dir("a/b").is_err());
    }

    #[tokio::test]
    async fn test_tags_and_metadata_side_files() {
        let dir = TempDir::new().unwrap();
        let fs = adapter(&dir);
        fs.create_registry("npm", ArtifactType::Npm).await.unwrap();

        fs.add_tag("npm", "@acme/widgets", "latest", "1.0.0").await.unwrap();
        let tags = fs.get_tags("npm", "@acme/widgets").await.unwrap();
        assert_eq!(tags.get("latest").map(String::as_str), Some("1.0.0"));
        assert!(fs.get_tags("npm", "other").await.unwrap().is_empty());

        let mut metadata = BTreeMap::new();
        metadata.insert("description".to_string(), "mirror".to_string());
        fs.set_registry_metadata("npm", &metadata).await.unwrap();
        assert_eq!(fs.get_registry_metadata("npm").await.unwrap(), metadata);

        // side files never show up as artifacts
        assert!(fs.get_files("npm").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oci_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let fs = adapter(&dir);
        let root = build_tree(Vec::new());
        assert!(matches!(
            fs.get_packages("docker", ArtifactType::Docker, &root).await,
            Err(MigrateError::Unsupported(_))
        ));
        assert!(fs.oci_image_path("docker", "app").is_err());
    }
}
