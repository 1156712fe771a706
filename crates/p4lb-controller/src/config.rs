//! Fleet configuration.
//!
//! Loads the fleet description from a TOML file:
//!
//! ```toml
//! [runtime]
//! rpc_timeout_ms = 5000
//! max_concurrency = 8
//! election_id = 1
//! dump_dir = "logs"
//!
//! [[pipelines]]
//! name = "lb"
//! p4info = "build/load_balance.p4info.json"
//! artifact = "build/load_balance.json"
//!
//! [[devices]]
//! name = "s1"
//! address = "127.0.0.1:50051"
//! device_id = 0
//! pipeline = "lb"
//! rules = ["s1-runtime.json"]
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use p4lb_pipeline::{load_rule_batch_file, PipelineError, PipelineProfile};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::device::DeviceIdentity;
use crate::fleet::{DeviceRuleSet, FleetOrchConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load pipeline '{name}': {source}")]
    Pipeline {
        name: String,
        #[source]
        source: PipelineError,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Runtime knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-RPC deadline in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Devices driven concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Election ID used for master arbitration
    #[serde(default = "default_election_id")]
    pub election_id: u64,

    /// Directory for per-device request dumps; dumping is off when unset
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

/// A compiled pipeline and its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// P4Info descriptor (JSON)
    pub p4info: PathBuf,
    /// Compiled target artifact, pushed verbatim
    pub artifact: PathBuf,
}

/// A managed switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub device_id: u64,
    pub pipeline: String,
    /// Rule batch files, applied in order
    #[serde(default)]
    pub rules: Vec<PathBuf>,
}

impl DeviceConfig {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(&self.name, &self.address, self.device_id, &self.pipeline)
    }
}

/// Complete fleet configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

fn default_max_concurrency() -> usize {
    8
}

fn default_election_id() -> u64 {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            election_id: default_election_id(),
            dump_dir: None,
        }
    }
}

impl FleetConfig {
    /// Loads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let config = Self::from_toml_str(&content, base_dir).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        info!(
            path = %path.display(),
            pipelines = config.pipelines.len(),
            devices = config.devices.len(),
            "Loaded fleet configuration"
        );
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(content: &str, base_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let mut config: FleetConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.base_dir = base_dir.into();
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line overrides and re-validates.
    pub fn apply_overrides(
        &mut self,
        rpc_timeout_ms: Option<u64>,
        max_concurrency: Option<usize>,
    ) -> ConfigResult<()> {
        if let Some(timeout) = rpc_timeout_ms {
            self.runtime.rpc_timeout_ms = timeout;
        }
        if let Some(max) = max_concurrency {
            self.runtime.max_concurrency = max;
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.runtime.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "runtime.rpc_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.runtime.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_concurrency must be greater than 0".to_string(),
            ));
        }

        let mut pipelines = HashSet::new();
        for pipeline in &self.pipelines {
            if pipeline.name.is_empty() {
                return Err(ConfigError::Invalid("pipeline with empty name".to_string()));
            }
            if !pipelines.insert(pipeline.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pipeline '{}'",
                    pipeline.name
                )));
            }
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() || device.address.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' needs a name and an address",
                    device.name
                )));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
            if !ids.insert(device.device_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device_id {} (device '{}')",
                    device.device_id, device.name
                )));
            }
            if !pipelines.contains(device.pipeline.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' uses undeclared pipeline '{}'",
                    device.name, device.pipeline
                )));
            }
        }
        Ok(())
    }

    /// Resolves a path from the config against its directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.rpc_timeout_ms)
    }

    pub fn dump_dir(&self) -> Option<PathBuf> {
        self.runtime.dump_dir.as_deref().map(|dir| self.resolve(dir))
    }

    pub fn fleet_orch_config(&self) -> FleetOrchConfig {
        FleetOrchConfig {
            rpc_timeout: self.rpc_timeout(),
            max_concurrency: self.runtime.max_concurrency,
            election_id: self.runtime.election_id,
        }
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Loads every declared pipeline profile.
    pub fn load_profiles(&self) -> ConfigResult<HashMap<String, Arc<PipelineProfile>>> {
        self.pipelines
            .iter()
            .map(|p| {
                PipelineProfile::load(&p.name, self.resolve(&p.p4info), self.resolve(&p.artifact))
                    .map(|profile| (p.name.clone(), Arc::new(profile)))
                    .map_err(|source| ConfigError::Pipeline {
                        name: p.name.clone(),
                        source,
                    })
            })
            .collect()
    }

    /// Reads every device's rule batches, in device then file order.
    /// Unreadable files are carried as per-batch errors.
    pub fn load_rule_sets(&self) -> Vec<DeviceRuleSet> {
        self.devices
            .iter()
            .flat_map(|device| {
                device.rules.iter().map(move |file| {
                    let path = self.resolve(file);
                    DeviceRuleSet {
                        device: device.name.clone(),
                        source: path.display().to_string(),
                        batch: load_rule_batch_file(&path),
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
[runtime]
rpc_timeout_ms = 2000
dump_dir = "logs"

[[pipelines]]
name = "lb"
p4info = "build/lb.p4info.json"
artifact = "/opt/p4/lb.json"

[[devices]]
name = "s1"
address = "127.0.0.1:50051"
device_id = 0
pipeline = "lb"
rules = ["s1-runtime.json"]

[[devices]]
name = "s2"
address = "127.0.0.1:50052"
device_id = 1
pipeline = "lb"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = FleetConfig::from_toml_str(CONFIG, "/etc/p4lb").unwrap();
        assert_eq!(config.runtime.rpc_timeout_ms, 2000);
        assert_eq!(config.runtime.max_concurrency, 8);
        assert_eq!(config.runtime.election_id, 1);
        assert_eq!(config.devices.len(), 2);
        assert!(config.devices[1].rules.is_empty());
        assert_eq!(config.rpc_timeout(), Duration::from_secs(2));
        assert_eq!(config.fleet_orch_config().max_concurrency, 8);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = FleetConfig::from_toml_str("", ".").unwrap();
        assert_eq!(config.runtime, RuntimeConfig::default());
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_path_resolution() {
        let config = FleetConfig::from_toml_str(CONFIG, "/etc/p4lb").unwrap();
        assert_eq!(
            config.resolve(&config.pipelines[0].p4info),
            PathBuf::from("/etc/p4lb/build/lb.p4info.json")
        );
        assert_eq!(
            config.resolve(&config.pipelines[0].artifact),
            PathBuf::from("/opt/p4/lb.json")
        );
        assert_eq!(config.dump_dir(), Some(PathBuf::from("/etc/p4lb/logs")));
    }

    #[test]
    fn test_validation_errors() {
        let duplicate_name = CONFIG.replace("name = \"s2\"", "name = \"s1\"");
        let err = FleetConfig::from_toml_str(&duplicate_name, ".").unwrap_err();
        assert!(err.to_string().contains("duplicate device name"), "{}", err);

        let duplicate_id = CONFIG.replace("device_id = 1", "device_id = 0");
        assert!(FleetConfig::from_toml_str(&duplicate_id, ".").is_err());

        let unknown_pipeline = CONFIG.replace("pipeline = \"lb\"", "pipeline = \"nat\"");
        let err = FleetConfig::from_toml_str(&unknown_pipeline, ".").unwrap_err();
        assert!(err.to_string().contains("undeclared pipeline"), "{}", err);

        let zero_timeout = CONFIG.replace("rpc_timeout_ms = 2000", "rpc_timeout_ms = 0");
        assert!(FleetConfig::from_toml_str(&zero_timeout, ".").is_err());

        let bad_toml = "[[devices]\nname = 1";
        assert!(matches!(
            FleetConfig::from_toml_str(bad_toml, "."),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = FleetConfig::from_toml_str(CONFIG, ".").unwrap();
        config.apply_overrides(Some(100), Some(2)).unwrap();
        assert_eq!(config.rpc_timeout(), Duration::from_millis(100));
        assert_eq!(config.runtime.max_concurrency, 2);
        assert!(config.apply_overrides(None, Some(0)).is_err());
    }

    #[test]
    fn test_load_from_file_and_rule_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        fs::write(&path, CONFIG).unwrap();
        fs::write(
            dir.path().join("s1-runtime.json"),
            r#"{"target": "bmv2", "table_entries": []}"#,
        )
        .unwrap();

        let config = FleetConfig::load(&path).unwrap();
        assert_eq!(config.base_dir, dir.path());

        let sets = config.load_rule_sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].device, "s1");
        assert!(sets[0].batch.as_ref().unwrap().entries.is_empty());

        // Profiles point at files that do not exist.
        let err = config.load_profiles().unwrap_err();
        assert!(matches!(err, ConfigError::Pipeline { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = FleetConfig::load("/nonexistent/fleet.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
