// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::mcp::{RawServerConfig, TransportSpec};

use super::types::WorkspaceConfig;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".tether.json",
    ".tether.yaml",
    ".tether/config.json",
    ".tether/config.yaml",
    "tether.config.json",
];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".tether.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".tether";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.tether/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let Some(path) = get_global_config_path() else {
        return Ok(None);
    };
    load_optional(&path)
}

/// Load workspace configuration from the first config file found in
/// `workspace_root`, following [`CONFIG_FILES`] order.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    match find_config_file(workspace_root) {
        Some(path) => load_config_file(&path).map(Some),
        None => Ok(None),
    }
}

/// Load local configuration from .tether.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_optional(&workspace_root.join(LOCAL_CONFIG_FILE))
}

fn load_optional(path: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    tracing::debug!(path = %path.display(), "loading config file");
    load_config_file(path).map(Some)
}

/// First workspace config file present in `dir`.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Write a starter config file. Refuses to overwrite an existing one.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = find_config_file(workspace_root) {
        return Err(ConfigError::AlreadyExists(existing.display().to_string()));
    }
    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| find_config_file(dir).is_some())
        .map(Path::to_path_buf)
}

/// Get an example configuration with one stdio server.
pub fn get_example_config() -> WorkspaceConfig {
    let mut transport = TransportSpec::stdio("npx");
    if let TransportSpec::Stdio { args, .. } = &mut transport {
        *args = vec![
            "-y".to_string(),
            "@modelcontextprotocol/server-filesystem".to_string(),
            ".".to_string(),
        ];
    }

    let server = RawServerConfig {
        transport: Some(transport),
        enabled: true,
        startup_timeout_sec: 30,
        tool_timeout_sec: 300,
        ..Default::default()
    };

    WorkspaceConfig {
        mcp_servers: Some([("filesystem".to_string(), server)].into_iter().collect()),
        ..Default::default()
    }
}
