//! CLI commands

pub mod adapters;
pub mod migrate;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Result;
use regmig_core::{Config, ConfigManager};

/// Load the config from an explicit path or from the current directory
pub(crate) fn load_config(path: Option<&Path>) -> Result<(Config, PathBuf)> {
    let mut config_manager = ConfigManager::new();
    match path {
        Some(path) => {
            let config = config_manager
                .load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
            Ok((config, path.to_path_buf()))
        }
        None => {
            let dir = std::env::current_dir()?;
            config_manager
                .load_from_directory(&dir)
                .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
        }
    }
}
