//! Configuration management for regmig

use crate::error::{MigrateError, Result};
use crate::filter::unsupported_wildcard;
use crate::types::{
    Config, RegistryConfig, ValidationError, ValidationResult, ValidationWarning,
};
use crate::utils::expand_env;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Configuration file names to search for
pub const CONFIG_FILE_NAMES: &[&str] = &["regmig.yaml", "regmig.yml", "regmig.json"];

/// Configuration manager for loading and validating migration configs
pub struct ConfigManager {
    cache: HashMap<PathBuf, CachedConfig>,
}

struct CachedConfig {
    config: Config,
    modified_time: SystemTime,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Find configuration file in a directory
    pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Parse configuration text, expanding environment variables first
    pub fn parse(content: &str, json: bool) -> Result<Config> {
        let expanded = expand_env(content);
        let config = if json {
            serde_json::from_str(&expanded)?
        } else {
            serde_yaml::from_str(&expanded)?
        };
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(&mut self, config_path: &Path) -> Result<Config> {
        let metadata = std::fs::metadata(config_path)?;
        let modified_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        if let Some(cached) = self.cache.get(config_path) {
            if cached.modified_time == modified_time {
                debug!(path = %config_path.display(), "Using cached configuration");
                return Ok(cached.config.clone());
            }
        }

        let content = std::fs::read_to_string(config_path)?;
        let config = Self::parse(&content, is_json(config_path))?;

        self.cache.insert(
            config_path.to_path_buf(),
            CachedConfig {
                config: config.clone(),
                modified_time,
            },
        );

        Ok(config)
    }

    /// Load configuration from a directory (searches for config files)
    pub fn load_from_directory(&mut self, dir: &Path) -> Result<(Config, PathBuf)> {
        let config_path = Self::find_config_file(dir)
            .ok_or_else(|| MigrateError::ConfigNotFound(dir.display().to_string()))?;

        let config = self.load(&config_path)?;
        Ok((config, config_path))
    }

    /// Validate a configuration against the registry types that can be instantiated
    pub fn validate(config: &Config, supported_types: &[String]) -> ValidationResult {
        let mut result = ValidationResult::ok();

        if config.concurrency == 0 {
            result = result.with_error(ValidationError {
                field: "concurrency".to_string(),
                message: "Concurrency must be greater than 0".to_string(),
                code: "INVALID_CONCURRENCY".to_string(),
            });
        }

        for (field, registry) in [("source", &config.source), ("destination", &config.destination)] {
            result = validate_registry(result, field, registry, supported_types);
        }

        if config.mappings.is_empty() {
            result = result.with_error(ValidationError {
                field: "mappings".to_string(),
                message: "At least one mapping is required".to_string(),
                code: "NO_MAPPINGS".to_string(),
            });
        }

        let same_endpoint = config.source.endpoint.trim_end_matches('/')
            == config.destination.endpoint.trim_end_matches('/');

        for (i, mapping) in config.mappings.iter().enumerate() {
            let field = format!("mappings[{}]", i);

            if mapping.source_registry.trim().is_empty() {
                result = result.with_error(ValidationError {
                    field: format!("{}.sourceRegistry", field),
                    message: "Source registry must not be empty".to_string(),
                    code: "MISSING_REGISTRY".to_string(),
                });
            }
            if mapping.destination_registry.trim().is_empty() {
                result = result.with_error(ValidationError {
                    field: format!("{}.destinationRegistry", field),
                    message: "Destination registry must not be empty".to_string(),
                    code: "MISSING_REGISTRY".to_string(),
                });
            }
            if same_endpoint && mapping.source_registry == mapping.destination_registry {
                result = result.with_error(ValidationError {
                    field: field.clone(),
                    message: format!(
                        "Mapping copies registry '{}' onto itself",
                        mapping.source_registry
                    ),
                    code: "SELF_COPY".to_string(),
                });
            }
            if mapping.concurrency == Some(0) {
                result = result.with_error(ValidationError {
                    field: format!("{}.concurrency", field),
                    message: "Mapping concurrency must be greater than 0".to_string(),
                    code: "INVALID_CONCURRENCY".to_string(),
                });
            }

            let patterns = mapping
                .include_patterns
                .iter()
                .map(|p| ("includePatterns", p))
                .chain(mapping.exclude_patterns.iter().map(|p| ("excludePatterns", p)));
            for (key, pattern) in patterns {
                if let Some(c) = unsupported_wildcard(pattern) {
                    result = result.with_warning(ValidationWarning {
                        field: format!("{}.{}", field, key),
                        message: format!(
                            "Pattern '{}' uses unsupported wildcard '{}' and will be ignored",
                            pattern, c
                        ),
                        suggestion: Some("Use only '*' and '**' wildcards".to_string()),
                    });
                }
            }
        }

        if config.dry_run {
            result = result.with_warning(ValidationWarning {
                field: "dryRun".to_string(),
                message: "Dry run is enabled; nothing will be transferred".to_string(),
                suggestion: None,
            });
        }

        result
    }

    /// Fail with `InvalidConfig` listing every error when validation does not pass
    pub fn ensure_valid(config: &Config, supported_types: &[String]) -> Result<()> {
        let result = Self::validate(config, supported_types);
        if result.valid {
            return Ok(());
        }
        let messages: Vec<String> = result
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        Err(MigrateError::InvalidConfig(messages.join("; ")))
    }
}

fn validate_registry(
    mut result: ValidationResult,
    field: &str,
    registry: &RegistryConfig,
    supported_types: &[String],
) -> ValidationResult {
    if registry.endpoint.trim().is_empty() {
        result = result.with_error(ValidationError {
            field: format!("{}.endpoint", field),
            message: "Endpoint must not be empty".to_string(),
            code: "MISSING_ENDPOINT".to_string(),
        });
    }

    let registry_type = registry.registry_type.to_lowercase();
    if !supported_types.iter().any(|t| *t == registry_type) {
        result = result.with_error(ValidationError {
            field: format!("{}.type", field),
            message: format!(
                "Unsupported registry type '{}' (available: {})",
                registry.registry_type,
                supported_types.join(", ")
            ),
            code: "UNSUPPORTED_TYPE".to_string(),
        });
    }

    if registry.credentials.is_empty() {
        result = result.with_error(ValidationError {
            field: format!("{}.credentials", field),
            message: "Credentials must include a username or a password".to_string(),
            code: "MISSING_CREDENTIALS".to_string(),
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureMode;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
version: "1"
dryRun: false
concurrency: 4
failureMode: stop
source:
  endpoint: https://src.example.com
  type: fs
  credentials:
    username: ${REGMIG_TEST_USER}
    password: $REGMIG_TEST_UNSET_PASSWORD
destination:
  endpoint: https://dst.example.com
  type: fs
  credentials:
    password: secret
mappings:
  - artifactType: npm
    sourceRegistry: npm-local
    destinationRegistry: npm-remote
    excludePatterns: ["*-1.1.0.tgz"]
"#;

    fn types() -> Vec<String> {
        vec!["fs".to_string(), "memory".to_string()]
    }

    fn codes(result: &ValidationResult) -> Vec<&str> {
        result.errors.iter().map(|e| e.code.as_str()).collect()
    }

    #[test]
    fn test_load_expands_env_and_uses_cache() -> Result<()> {
        std::env::set_var("REGMIG_TEST_USER", "alice");
        let dir = TempDir::new()?;
        let path = dir.path().join("regmig.yaml");
        std::fs::write(&path, SAMPLE)?;

        assert_eq!(ConfigManager::find_config_file(dir.path()), Some(path.clone()));

        let mut manager = ConfigManager::new();
        let (config, found) = manager.load_from_directory(dir.path())?;
        assert_eq!(found, path);
        assert_eq!(config.source.credentials.username.as_deref(), Some("alice"));
        assert!(config.source.credentials.password.is_none());
        assert_eq!(config.failure_mode, FailureMode::Stop);
        assert_eq!(config.version_concurrency, 4);
        assert_eq!(config.mappings[0].exclude_patterns, vec!["*-1.1.0.tgz"]);

        let again = manager.load(&path)?;
        assert_eq!(again.concurrency, config.concurrency);
        Ok(())
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let err = ConfigManager::new().load_from_directory(dir.path()).unwrap_err();
        assert!(matches!(err, MigrateError::ConfigNotFound(_)));
    }

    #[test]
    fn test_valid_sample_passes() {
        let config = ConfigManager::parse(SAMPLE, false).unwrap();
        let result = ConfigManager::validate(&config, &types());
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
        assert!(ConfigManager::ensure_valid(&config, &types()).is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = ConfigManager::parse(SAMPLE, false).unwrap();
        config.concurrency = 0;
        config.source.endpoint = String::new();
        config.destination.registry_type = "artifactory".to_string();
        config.destination.credentials = Default::default();
        config.mappings[0].source_registry = String::new();

        let result = ConfigManager::validate(&config, &types());
        assert!(!result.valid);
        let found = codes(&result);
        for code in [
            "INVALID_CONCURRENCY",
            "MISSING_ENDPOINT",
            "UNSUPPORTED_TYPE",
            "MISSING_CREDENTIALS",
            "MISSING_REGISTRY",
        ] {
            assert!(found.contains(&code), "missing {} in {:?}", code, found);
        }

        let err = ConfigManager::ensure_valid(&config, &types()).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidConfig(_)));
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_no_mappings_and_self_copy() {
        let mut config = ConfigManager::parse(SAMPLE, false).unwrap();
        config.destination.endpoint = "https://src.example.com/".to_string();
        config.mappings[0].destination_registry = "npm-local".to_string();
        assert!(codes(&ConfigManager::validate(&config, &types())).contains(&"SELF_COPY"));

        config.mappings.clear();
        assert!(codes(&ConfigManager::validate(&config, &types())).contains(&"NO_MAPPINGS"));
    }

    #[test]
    fn test_warnings_for_patterns_and_dry_run() {
        let mut config = ConfigManager::parse(SAMPLE, false).unwrap();
        config.dry_run = true;
        config.mappings[0].include_patterns = vec!["lib/?.jar".to_string()];

        let result = ConfigManager::validate(&config, &types());
        assert!(result.valid);
        let fields: Vec<&str> = result.warnings.iter().map(|w| w.field.as_str()).collect();
        assert!(fields.contains(&"dryRun"));
        assert!(fields.contains(&"mappings[0].includePatterns"));
    }

    #[test]
    fn test_invalid_failure_mode_is_rejected_on_parse() {
        let broken = SAMPLE.replace("failureMode: stop", "failureMode: retry");
        assert!(ConfigManager::parse(&broken, false).is_err());
    }
}
