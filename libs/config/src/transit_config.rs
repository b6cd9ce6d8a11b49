//! Transit Configuration Module
//!
//! Provides configuration loading for a transit controller process.
//! Supports loading from TOML files with `TRANSIT_*` environment overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// String-keyed parameters for one module
pub type ModuleParams = HashMap<String, String>;

/// Main controller configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TransitConfig {
    /// Schedule dataset; no schedule is loaded when absent
    #[serde(default)]
    pub dataset: Option<LoaderOptions>,

    /// Module selection and parameters
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Peers serving additional operations
    #[serde(default)]
    pub remotes: Vec<RemoteEndpoint>,

    /// Worker pool and transport sizing
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Expose local operations to peers
    #[serde(default)]
    pub server: Option<ServerConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dataset file format
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    #[default]
    Json,
    Toml,
}

/// Schedule loader options
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoaderOptions {
    pub path: PathBuf,

    #[serde(default)]
    pub format: DatasetFormat,

    /// Reject malformed records instead of skipping them
    #[serde(default)]
    pub strict: bool,

    /// Refuse files larger than this many bytes
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Refuse datasets with more stations than this
    #[serde(default)]
    pub max_stations: Option<usize>,
}

impl LoaderOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: DatasetFormat::default(),
            strict: false,
            max_file_size: None,
            max_stations: None,
        }
    }
}

/// Module selection
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ModulesConfig {
    /// Module ids in initialization order
    #[serde(default)]
    pub enabled: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Per-module parameters, keyed by module id
    #[serde(default)]
    pub params: HashMap<String, ModuleParams>,
}

/// Remote peer endpoint
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// `host:port` of the peer
    pub host: String,

    /// Path prefix the peer should advertise; empty means all paths
    #[serde(default)]
    pub target: String,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            target: target.into(),
        }
    }
}

impl From<(String, String)> for RemoteEndpoint {
    fn from((host, target): (String, String)) -> Self {
        Self { host, target }
    }
}

impl From<(&str, &str)> for RemoteEndpoint {
    fn from((host, target): (&str, &str)) -> Self {
        Self::new(host, target)
    }
}

/// Worker pool and transport sizing
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "defaults::num_threads")]
    pub num_threads: usize,

    #[serde(default = "default_io_threads")]
    pub io_threads: usize,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_io_threads() -> usize {
    defaults::IO_THREADS
}

fn default_call_timeout_ms() -> u64 {
    defaults::CALL_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    defaults::CONNECT_TIMEOUT_MS
}

fn default_max_frame_size() -> usize {
    defaults::MAX_FRAME_SIZE
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: defaults::num_threads(),
            io_threads: defaults::IO_THREADS,
            call_timeout_ms: defaults::CALL_TIMEOUT_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            max_frame_size: defaults::MAX_FRAME_SIZE,
        }
    }
}

/// Remote server settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:7000`
    pub bind: String,
}

/// Logging settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl TransitConfig {
    /// Load configuration from a file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = path.unwrap_or(Path::new("config/transit.toml"));
        debug!("Loading configuration from {:?}", base);

        let builder = Config::builder()
            .add_source(File::from(base).required(true))
            .add_source(
                Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.runtime.num_threads == 0 {
            bail!("runtime.num_threads must be at least 1");
        }
        if self.runtime.io_threads == 0 {
            bail!("runtime.io_threads must be at least 1");
        }
        if self.runtime.max_frame_size == 0 {
            bail!("runtime.max_frame_size must be positive");
        }
        if let Some(remote) = self.remotes.iter().find(|r| r.host.trim().is_empty()) {
            bail!("remote with target {:?} has an empty host", remote.target);
        }
        for name in &self.modules.enabled {
            if self.modules.exclude.contains(name) {
                warn!("Module {} is both enabled and excluded, it will not be loaded", name);
            }
        }
        Ok(())
    }

    /// Parameters configured for a module (empty when none)
    pub fn module_params(&self, module: &str) -> ModuleParams {
        self.modules.params.get(module).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[dataset]
path = "/data/schedule.json"
strict = true
max_stations = 5000

[modules]
enabled = ["geocoder", "photon"]
exclude = ["photon"]

[modules.params.photon]
url = "http://localhost:2322/api"

[[remotes]]
host = "10.0.0.5:7000"
target = "/ris"

[runtime]
num_threads = 4
call_timeout_ms = 1500

[logging]
level = "debug"
"#;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("transit.toml");
        fs::write(&config_path, SAMPLE).unwrap();

        let config = TransitConfig::load(Some(&config_path)).unwrap();

        let dataset = config.dataset.as_ref().unwrap();
        assert_eq!(dataset.path, PathBuf::from("/data/schedule.json"));
        assert_eq!(dataset.format, DatasetFormat::Json);
        assert!(dataset.strict);
        assert_eq!(dataset.max_stations, Some(5000));
        assert_eq!(dataset.max_file_size, None);

        assert_eq!(config.modules.enabled, vec!["geocoder", "photon"]);
        assert_eq!(config.modules.exclude, vec!["photon"]);
        assert_eq!(
            config.module_params("photon").get("url").map(String::as_str),
            Some("http://localhost:2322/api")
        );
        assert!(config.module_params("geocoder").is_empty());

        assert_eq!(config.remotes, vec![RemoteEndpoint::new("10.0.0.5:7000", "/ris")]);
        assert_eq!(config.runtime.num_threads, 4);
        assert_eq!(config.runtime.call_timeout_ms, 1500);
        assert_eq!(config.runtime.io_threads, defaults::IO_THREADS);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_defaults_from_empty_document() {
        let config = TransitConfig::from_toml_str("").unwrap();
        assert!(config.dataset.is_none());
        assert!(config.modules.enabled.is_empty());
        assert!(config.remotes.is_empty());
        assert!(config.server.is_none());
        assert_eq!(config.runtime.max_frame_size, defaults::MAX_FRAME_SIZE);
        assert!(config.runtime.num_threads >= 1);
    }

    #[test]
    fn test_rejects_zero_threads() {
        let err = TransitConfig::from_toml_str("[runtime]\nnum_threads = 0\n").unwrap_err();
        assert!(err.to_string().contains("num_threads"));
    }

    #[test]
    fn test_rejects_empty_remote_host() {
        let err = TransitConfig::from_toml_str("[[remotes]]\nhost = \"\"\ntarget = \"/x\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("empty host"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(TransitConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
