// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client configuration and path conversion.
//!
//! The configuration lives in `~/.filelink/config.json`. A missing file means
//! defaults; CLI flags override whatever was loaded.
//!
//! Local and remote paths are exchanged with the UI as `file://` URIs and
//! converted to plain filesystem paths here, at the boundary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::transfer::staging::DEFAULT_STAGING_PREFIX;
use crate::transport::TransportConfig;

/// Persistent client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Already-resolved base URI of the file service.
    #[serde(default)]
    pub service_uri: Option<String>,
    /// Remote directory the service exposes, as a path or `file://` URI.
    #[serde(default)]
    pub remote_base_path: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Zero disables the overall request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Name prefix of the per-session staging directory.
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,
}

fn default_connect_timeout_secs() -> u64 {
    TransportConfig::default().connect_timeout_secs
}

fn default_request_timeout_secs() -> u64 {
    TransportConfig::default().request_timeout_secs
}

fn default_staging_prefix() -> String {
    DEFAULT_STAGING_PREFIX.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_uri: None,
            remote_base_path: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            staging_prefix: default_staging_prefix(),
        }
    }
}

impl ClientConfig {
    /// Timeouts for the HTTP transport.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout_secs: self.connect_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}

/// `~/.filelink`, created on first use.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let dir = home.join(".filelink");
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {:?}", dir))?;
    }
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Load the user configuration, falling back to defaults.
pub fn load_config() -> Result<ClientConfig> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid configuration in {:?}", path))
}

pub fn save_config_to(config: &ClientConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

/// Convert a `file://` URI (or a plain path) to a filesystem path.
///
/// Returns `None` for empty input and for URIs with another scheme.
pub fn to_local_path(uri: &str) -> Option<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() {
        return None;
    }
    match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        // Single-letter schemes are Windows drive letters, not URIs
        Ok(url) if url.scheme().len() > 1 => None,
        _ => Some(PathBuf::from(uri)),
    }
}

/// Convert an absolute filesystem path to a `file://` URI.
pub fn to_file_uri(path: &Path) -> String {
    Url::from_file_path(path)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.service_uri.is_none());
        assert_eq!(config.staging_prefix, DEFAULT_STAGING_PREFIX);
        assert_eq!(config.transport(), TransportConfig::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "service_uri": "http://host:8080/files" }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.service_uri.as_deref(), Some("http://host:8080/files"));
        assert_eq!(config.connect_timeout_secs, default_connect_timeout_secs());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        let config = ClientConfig {
            remote_base_path: Some("/files".to_string()),
            request_timeout_secs: 0,
            ..ClientConfig::default()
        };
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_uri_conversion() {
        assert_eq!(to_local_path("file:///tmp/a.txt"), Some(PathBuf::from("/tmp/a.txt")));
        assert_eq!(to_local_path("/tmp/a.txt"), Some(PathBuf::from("/tmp/a.txt")));
        assert_eq!(to_local_path("file:///tmp/with%20space.txt"), Some(PathBuf::from("/tmp/with space.txt")));
        assert_eq!(to_local_path("http://host/a.txt"), None);
        assert_eq!(to_local_path("  "), None);

        assert_eq!(to_file_uri(Path::new("/tmp/a.txt")), "file:///tmp/a.txt");
    }
}
