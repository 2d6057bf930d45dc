//! Config file discovery and loading.
//!
//! Resolution order:
//! 1. An explicit path (CLI `--config`), relative paths resolved against the root dir
//! 2. The `MCP_HARNESS_CONFIG` environment variable
//! 3. The first `mcp_servers.*` file found walking up from the root dir
//! 4. Built-in defaults (no servers)

use std::path::{Path, PathBuf};

use crate::{ConfigError, ConfigLayer, HarnessConfig, Result};

/// File names searched for in each directory, in priority order.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &[
    "mcp_servers.toml",
    "mcp_servers.yaml",
    "mcp_servers.yml",
    ".mcp_servers.toml",
    ".mcp_servers.yaml",
    "mcp-servers.toml",
    "mcp-servers.yaml",
];

/// Environment variable naming a config file.
pub const CONFIG_PATH_ENV: &str = "MCP_HARNESS_CONFIG";

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The validated configuration.
    pub config: HarnessConfig,
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

/// Walk from `start` up to the filesystem root looking for a config file.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        for name in DEFAULT_CONFIG_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Load and validate configuration.
///
/// An explicit path that does not exist is an error; failing to discover
/// any file is not, and yields the defaults.
pub fn load_config(explicit: Option<&Path>, root_dir: &Path) -> Result<LoadedConfig> {
    let explicit = explicit.map(Path::to_path_buf).or_else(|| {
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    });

    let path = match explicit {
        Some(path) => {
            let path = if path.is_relative() {
                root_dir.join(path)
            } else {
                path
            };
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Some(path)
        }
        None => find_config_file(root_dir),
    };

    let mut config = match &path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading harness config");
            load_config_file(path)?
        }
        None => {
            tracing::debug!(root = %root_dir.display(), "no config file found, using defaults");
            HarnessConfig::default()
        }
    };
    config.validate()?;

    Ok(LoadedConfig {
        config,
        source: path,
    })
}

/// Load config from a specific file path (no discovery, not validated).
///
/// The syntax is chosen by extension: `.toml`, `.yaml` or `.yml`.
pub fn load_config_file(path: &Path) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::default();
    config.merge(read_layer(path)?);
    Ok(config)
}

/// Load a file as a layer and merge it on top of `base`.
pub fn merge_config_file(base: &mut HarnessConfig, path: &Path) -> Result<()> {
    base.merge(read_layer(path)?);
    Ok(())
}

/// Read and parse one config file. Extensions match case-insensitively and
/// an empty YAML file is an empty layer.
fn read_layer(path: &Path) -> Result<ConfigLayer> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("toml") => Ok(toml::from_str(&contents)?),
        Some("yaml") | Some("yml") if contents.trim().is_empty() => Ok(ConfigLayer::default()),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}
