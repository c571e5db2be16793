// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Mounter Configuration Types
//
// Configuration schema for a projector mounter, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Target directory and the bundle sources projected into it
// - Post-mount hook command
// - Retry queue tuning
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::bundle::ProjectionMode;
use super::projection::PermissionPolicy;

pub const API_VERSION: &str = "projector/v1";
pub const KIND: &str = "MounterConfig";

/// Top-level Kubernetes-style mounter configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MounterConfigManifest {
    /// API version (must be "projector/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "MounterConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: MounterConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Mounter name, used in logs
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Mounter configuration specification (content under spec:)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MounterConfigSpec {
    /// Directory the merged payload is projected into. Must exist.
    pub target_dir: PathBuf,

    /// Bundle files merged into the payload, later entries winning on clashes
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Command run after every mount that changed the directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookConfig>,

    #[serde(default)]
    pub permission_policy: PermissionPolicy,

    /// Seconds between polls of the bundle sources
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to a ConfigMap or Secret manifest
    pub path: PathBuf,

    /// Mode for every file of this bundle. Octal string ("0600") or integer;
    /// unset means 0777.
    #[serde(default, with = "octal_mode", skip_serializing_if = "is_zero")]
    pub mode: u32,

    #[serde(default)]
    pub projection: ProjectionMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    /// Shell command, run as `sh -c <command>`
    pub command: String,

    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,
}

impl HookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry queue tuning for the mount trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Requeues of a failing key before it is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First per-key backoff; doubles on every failure
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-key backoff ceiling
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Overall retry rate shared by all keys
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: u32,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            rate_per_second: default_rate_per_second(),
            burst: default_burst(),
        }
    }
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
    /// Serve Prometheus metrics
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_resync_interval() -> u64 {
    30
}

fn default_hook_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    1000
}

fn default_rate_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    100
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

fn is_zero(mode: &u32) -> bool {
    *mode == 0
}

/// Permission bits written as octal strings, also accepting plain integers.
mod octal_mode {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u32),
        Text(String),
    }

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0o{:o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Int(mode) => Ok(mode),
            Repr::Text(text) => {
                let digits = text.trim().trim_start_matches("0o");
                u32::from_str_radix(digits, 8)
                    .map_err(|_| de::Error::custom(format!("invalid octal mode '{}'", text)))
            }
        }
    }
}

impl Default for MounterConfigSpec {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("/var/lib/projector"),
            sources: vec![],
            hook: None,
            permission_policy: PermissionPolicy::default(),
            resync_interval_secs: default_resync_interval(),
            queue: QueueConfig::default(),
            observability: None,
        }
    }
}

impl Default for MounterConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "projector".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: MounterConfigSpec::default(),
        }
    }
}

impl MounterConfigManifest {
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

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. PROJECTOR_CONFIG_PATH environment variable
    /// 2. ./projector-config.yaml (working directory)
    /// 3. ~/.projector/config.yaml (user home)
    /// 4. /etc/projector/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PROJECTOR_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./projector-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".projector").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/projector/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
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
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("PROJECTOR_TARGET_DIR") {
            tracing::info!("Environment override: PROJECTOR_TARGET_DIR={}", val);
            self.spec.target_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("PROJECTOR_HOOK_COMMAND") {
            tracing::info!("Environment override: PROJECTOR_HOOK_COMMAND={}", val);
            match self.spec.hook.as_mut() {
                Some(hook) => hook.command = val,
                None => {
                    self.spec.hook = Some(HookConfig {
                        command: val,
                        timeout_secs: default_hook_timeout(),
                    })
                }
            }
        }

        if let Some(val) = lookup("PROJECTOR_PERMISSION_POLICY") {
            match val.parse::<PermissionPolicy>() {
                Ok(policy) => {
                    tracing::info!("Environment override: PROJECTOR_PERMISSION_POLICY={}", val);
                    self.spec.permission_policy = policy;
                }
                Err(e) => {
                    tracing::warn!("Invalid value for PROJECTOR_PERMISSION_POLICY: {}. Ignoring.", e);
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.target_dir.as_os_str().is_empty() {
            anyhow::bail!("spec.target_dir cannot be empty");
        }

        for source in &self.spec.sources {
            if source.path.as_os_str().is_empty() {
                anyhow::bail!("source path cannot be empty");
            }
            if source.mode > 0o7777 {
                anyhow::bail!(
                    "source {:?}: mode {:o} is not a permission mode",
                    source.path,
                    source.mode
                );
            }
        }

        if let Some(hook) = &self.spec.hook {
            if hook.command.trim().is_empty() {
                anyhow::bail!("spec.hook.command cannot be empty");
            }
            if hook.timeout_secs == 0 {
                anyhow::bail!("spec.hook.timeout_secs must be greater than zero");
            }
        }

        if self.spec.resync_interval_secs == 0 {
            anyhow::bail!("spec.resync_interval_secs must be greater than zero");
        }

        let queue = &self.spec.queue;
        if queue.base_delay_ms == 0 || queue.max_delay_secs == 0 {
            anyhow::bail!("spec.queue delays must be greater than zero");
        }
        if queue.rate_per_second == 0 || queue.burst == 0 {
            anyhow::bail!("spec.queue.rate_per_second and spec.queue.burst must be greater than zero");
        }

        if let Some(logging) = self.logging() {
            if !matches!(logging.format.as_str(), "text" | "json") {
                anyhow::bail!(
                    "Invalid log format: '{}'. Must be 'text' or 'json'",
                    logging.format
                );
            }
        }

        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.spec.resync_interval_secs)
    }

    pub fn logging(&self) -> Option<&LoggingConfig> {
        self.spec.observability.as_ref().and_then(|o| o.logging.as_ref())
    }

    pub fn metrics(&self) -> Option<&MetricsConfig> {
        self.spec.observability.as_ref().and_then(|o| o.metrics.as_ref())
    }
}
