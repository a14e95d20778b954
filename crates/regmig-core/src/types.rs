//! Core type definitions for regmig

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Package formats the migrator knows how to enumerate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArtifactType {
    Generic,
    Maven,
    Npm,
    Docker,
    Helm,
    HelmLegacy,
    Python,
    Nuget,
    Go,
    Rpm,
    Conda,
    Dart,
    Cargo,
}

impl ArtifactType {
    /// Get all artifact types
    pub fn all() -> &'static [ArtifactType] {
        &[
            ArtifactType::Generic,
            ArtifactType::Maven,
            ArtifactType::Npm,
            ArtifactType::Docker,
            ArtifactType::Helm,
            ArtifactType::HelmLegacy,
            ArtifactType::Python,
            ArtifactType::Nuget,
            ArtifactType::Go,
            ArtifactType::Rpm,
            ArtifactType::Conda,
            ArtifactType::Dart,
            ArtifactType::Cargo,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Generic => "GENERIC",
            ArtifactType::Maven => "MAVEN",
            ArtifactType::Npm => "NPM",
            ArtifactType::Docker => "DOCKER",
            ArtifactType::Helm => "HELM",
            ArtifactType::HelmLegacy => "HELM_LEGACY",
            ArtifactType::Python => "PYTHON",
            ArtifactType::Nuget => "NUGET",
            ArtifactType::Go => "GO",
            ArtifactType::Rpm => "RPM",
            ArtifactType::Conda => "CONDA",
            ArtifactType::Dart => "DART",
            ArtifactType::Cargo => "CARGO",
        }
    }

    /// Artifact types stored as OCI repositories and copied whole
    pub fn is_oci(&self) -> bool {
        matches!(self, ArtifactType::Docker | ArtifactType::Helm)
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ArtifactType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown artifact type: {}", s))
    }
}

impl TryFrom<String> for ArtifactType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArtifactType> for String {
    fn from(value: ArtifactType) -> Self {
        value.as_str().to_string()
    }
}

/// Run-level policy for a failed mapping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    #[default]
    Continue,
    Stop,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::Continue => "continue",
            FailureMode::Stop => "stop",
        }
    }
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FailureMode::Continue),
            "stop" => Ok(FailureMode::Stop),
            other => Err(format!("failure mode must be continue or stop, got {}", other)),
        }
    }
}

/// Registry credentials
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// True when neither a username nor a password is set
    pub fn is_empty(&self) -> bool {
        self.username.as_deref().map(str::is_empty).unwrap_or(true)
            && self.password.as_deref().map(str::is_empty).unwrap_or(true)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One configured registry endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    pub endpoint: String,
    #[serde(rename = "type")]
    pub registry_type: String,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub insecure: bool,
}

/// Source registry, destination registry, artifact type and filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMapping {
    pub artifact_type: ArtifactType,
    pub source_registry: String,
    pub destination_registry: String,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Overrides the top-level concurrency for this mapping
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl RegistryMapping {
    pub fn new(
        artifact_type: ArtifactType,
        source_registry: impl Into<String>,
        destination_registry: impl Into<String>,
    ) -> Self {
        Self {
            artifact_type,
            source_registry: source_registry.into(),
            destination_registry: destination_registry.into(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            concurrency: None,
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{} {} -> {}",
            self.artifact_type, self.source_registry, self.destination_registry
        )
    }
}

fn default_config_version() -> String {
    "1".to_string()
}

fn default_version_concurrency() -> usize {
    4
}

/// Top-level migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub version: String,
    #[serde(default)]
    pub dry_run: bool,
    pub concurrency: usize,
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Fan-out used by Package jobs when spawning Version jobs
    #[serde(default = "default_version_concurrency")]
    pub version_concurrency: usize,
    pub source: RegistryConfig,
    pub destination: RegistryConfig,
    #[serde(default)]
    pub mappings: Vec<RegistryMapping>,
}

impl Config {
    /// Concurrency for one mapping's Package and File fan-out
    pub fn mapping_concurrency(&self, mapping: &RegistryMapping) -> usize {
        mapping.concurrency.unwrap_or(self.concurrency)
    }
}

/// Content hashes reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// One remote object in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub name: String,
    pub registry: String,
    /// Path from the registry root, always starting with `/`
    pub uri: String,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksums: Checksums,
}

impl File {
    /// Create a file record, deriving `name` from the last `uri` segment
    pub fn new(registry: impl Into<String>, uri: impl Into<String>, size: u64) -> Self {
        let uri = normalize_uri(&uri.into());
        let name = uri.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            registry: registry.into(),
            uri,
            is_folder: false,
            size,
            last_modified: None,
            checksums: Checksums::default(),
        }
    }

    pub fn folder(registry: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            is_folder: true,
            ..Self::new(registry, uri, 0)
        }
    }
}

/// Ensure a leading `/`, drop duplicate and trailing separators
pub fn normalize_uri(uri: &str) -> String {
    let segments: Vec<&str> = uri.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// A named unit within a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub registry: String,
    /// Tree path of the package root
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    /// Set for formats where package and version coincide, e.g. Helm-legacy
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl Package {
    pub fn new(registry: impl Into<String>, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            path: normalize_uri(&path.into()),
            name: name.into(),
            size: 0,
            url: None,
            version: None,
        }
    }
}

/// One addressable release of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub registry: String,
    pub pkg: String,
    pub name: String,
    /// Tree path of this version's files
    pub path: String,
    #[serde(default)]
    pub size: u64,
    /// When non-empty, only leaves with these names under `path` belong to the version
    #[serde(default)]
    pub files: Vec<String>,
    /// Format-specific values handed to the destination on upload
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Version {
    pub fn new(
        registry: impl Into<String>,
        pkg: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            pkg: pkg.into(),
            name: name.into(),
            path: normalize_uri(&path.into()),
            size: 0,
            files: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }
}

/// Registry metadata returned by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    pub name: String,
    #[serde(default)]
    pub artifact_type: Option<ArtifactType>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Outcome of one file or OCI repository transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Success,
    Failed,
    /// Already present at the destination, or not copied because of a dry run
    Skipped,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Success => "success",
            TransferStatus::Failed => "failed",
            TransferStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-file transfer record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    pub registry: String,
    pub uri: String,
    pub size: u64,
    pub status: TransferStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl FileStat {
    pub fn success(file: &File) -> Self {
        Self::from_file(file, TransferStatus::Success, None)
    }

    pub fn failed(file: &File, error: impl Into<String>) -> Self {
        Self::from_file(file, TransferStatus::Failed, Some(error.into()))
    }

    pub fn skipped(file: &File, reason: impl Into<String>) -> Self {
        Self::from_file(file, TransferStatus::Skipped, Some(reason.into()))
    }

    fn from_file(file: &File, status: TransferStatus, error: Option<String>) -> Self {
        Self {
            name: file.name.clone(),
            registry: file.registry.clone(),
            uri: file.uri.clone(),
            size: file.size,
            status,
            error,
        }
    }
}

/// Result of one mapping in a run
#[derive(Debug, Clone)]
pub struct MappingOutcome {
    pub mapping: String,
    pub error: Option<String>,
}

/// Summary of a whole migration run
#[derive(Debug, Clone)]
pub struct MigrationSummary {
    pub success: bool,
    pub dry_run: bool,
    pub mappings: Vec<MappingOutcome>,
    pub stats: Vec<FileStat>,
    pub duration_ms: u64,
}

/// Validation result
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: ValidationError) -> Self {
        self.valid = false;
        self.errors.push(error);
        self
    }

    pub fn with_warning(mut self, warning: ValidationWarning) -> Self {
        self.warnings.push(warning);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}
