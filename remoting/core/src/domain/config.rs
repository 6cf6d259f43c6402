// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Remoting Server Configuration
//
// Defines the configuration schema for a pmsync remoting server:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - HTTP endpoint binding
// - Long-poll holding behaviour
// - Diagnostics registry and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "pmsync.dev/v1";
pub const KIND: &str = "RemotingConfig";

/// Top-level Kubernetes-style remoting configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotingConfigManifest {
    /// API version (must be "pmsync.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "RemotingConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: RemotingConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable server name
    pub name: String,

    /// Optional: Configuration version for tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Remoting configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotingConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub long_poll: LongPollConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the command exchange endpoint
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongPollConfig {
    /// Hold empty exchanges open until the server has changes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound for holding one poll, in milliseconds
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Register per-session store statistics
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus exposition
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_endpoint_path() -> String {
    "/remoting".to_string()
}

fn default_max_hold_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            endpoint_path: default_endpoint_path(),
        }
    }
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hold_ms: default_max_hold_ms(),
        }
    }
}

impl LongPollConfig {
    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_ms)
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for RemotingConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "pmsync-server".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: RemotingConfigSpec::default(),
        }
    }
}

impl RemotingConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. PMSYNC_CONFIG_PATH environment variable
    /// 2. ./pmsync-config.yaml (working directory)
    /// 3. ~/.pmsync/config.yaml (user home)
    /// 4. /etc/pmsync/config.yaml (system, Unix) or C:\ProgramData\pmsync\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PMSYNC_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./pmsync-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".pmsync").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/pmsync/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\pmsync\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PMSYNC_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: PMSYNC_PORT={}", port);
                    self.spec.server.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for PMSYNC_PORT: '{}'. Ignoring.", val);
                }
            }
        }

        if let Ok(val) = std::env::var("PMSYNC_LONG_POLL") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: PMSYNC_LONG_POLL=true");
                    self.spec.long_poll.enabled = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: PMSYNC_LONG_POLL=false");
                    self.spec.long_poll.enabled = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for PMSYNC_LONG_POLL: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Effective logging settings (defaults when not configured)
    pub fn logging(&self) -> LoggingConfig {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.logging.clone())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.server.bind_address.trim().is_empty() {
            anyhow::bail!("spec.server.bind_address cannot be empty");
        }

        if !self.spec.server.endpoint_path.starts_with('/') {
            anyhow::bail!(
                "spec.server.endpoint_path must start with '/': '{}'",
                self.spec.server.endpoint_path
            );
        }

        if self.spec.long_poll.enabled && self.spec.long_poll.max_hold_ms == 0 {
            anyhow::bail!("spec.long_poll.max_hold_ms must be positive when long polling is enabled");
        }

        if let Some(logging) = self.spec.observability.as_ref().and_then(|o| o.logging.as_ref()) {
            if !matches!(logging.format.as_str(), "json" | "text") {
                anyhow::bail!("Invalid logging format: '{}'. Must be 'json' or 'text'", logging.format);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = RemotingConfigManifest::default();
        assert_eq!(manifest.api_version, "pmsync.dev/v1");
        assert_eq!(manifest.kind, "RemotingConfig");
        assert_eq!(manifest.spec.server.port, 8080);
        assert_eq!(manifest.spec.server.endpoint_path, "/remoting");
        assert!(manifest.spec.long_poll.enabled);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: pmsync.dev/v1
kind: RemotingConfig
metadata:
  name: edge
spec:
  server:
    port: 9000
  observability:
    logging:
      level: debug
"#;
        let manifest = RemotingConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.server.port, 9000);
        assert_eq!(manifest.spec.server.bind_address, "127.0.0.1");
        assert_eq!(manifest.spec.long_poll.max_hold_ms, 30_000);
        assert_eq!(manifest.logging().level, "debug");
        assert_eq!(manifest.logging().format, "text");
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pmsync-config.yaml");

        let mut manifest = RemotingConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.long_poll.max_hold_ms = 500;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = RemotingConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.long_poll.max_hold(), Duration::from_millis(500));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(RemotingConfigManifest::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_validation() {
        let mut manifest = RemotingConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "WrongKind".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.server.endpoint_path = "remoting".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.server.endpoint_path = "/remoting".to_string();

        manifest.spec.long_poll.max_hold_ms = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.long_poll.enabled = false;
        assert!(manifest.validate().is_ok());
    }
}
