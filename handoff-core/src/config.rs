//! Per-unit configuration.
//!
//! Each unit directory holds a `config.yaml` whose recognized options depend
//! on the workload:
//!
//! ```yaml
//! # key-value store
//! port: 6379
//! appendonly: "no"
//! requirepass: s3cret      # optional
//!
//! # web front-end
//! webserver-key: super-secret-key
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{config_io, ConfigError};
use crate::types::WorkloadKind;

pub const DEFAULT_PORT: u16 = 6379;

/// Append-only persistence mode of the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppendOnly {
    Yes,
    #[default]
    No,
}

impl fmt::Display for AppendOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendOnly::Yes => write!(f, "yes"),
            AppendOnly::No => write!(f, "no"),
        }
    }
}

/// Options of the key-value store workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueStoreConfig {
    #[serde(default = "default_port", deserialize_with = "port_from_int_or_str")]
    pub port: u16,
    #[serde(default)]
    pub appendonly: AppendOnly,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirepass: Option<String>,
}

impl Default for KeyValueStoreConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            appendonly: AppendOnly::default(),
            requirepass: None,
        }
    }
}

/// Options of the web front-end workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WebFrontendConfig {
    #[serde(rename = "webserver-key", default)]
    pub webserver_key: String,
}

/// Configuration of one unit, shaped by its workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitConfig {
    KeyValueStore(KeyValueStoreConfig),
    WebFrontend(WebFrontendConfig),
}

impl UnitConfig {
    pub fn default_for(kind: WorkloadKind) -> Self {
        match kind {
            WorkloadKind::KeyValueStore => UnitConfig::KeyValueStore(KeyValueStoreConfig::default()),
            WorkloadKind::WebFrontend => UnitConfig::WebFrontend(WebFrontendConfig::default()),
        }
    }

    pub fn kind(&self) -> WorkloadKind {
        match self {
            UnitConfig::KeyValueStore(_) => WorkloadKind::KeyValueStore,
            UnitConfig::WebFrontend(_) => WorkloadKind::WebFrontend,
        }
    }

    /// The port this unit serves on, if it serves one.
    pub fn served_port(&self) -> Option<u16> {
        match self {
            UnitConfig::KeyValueStore(cfg) => Some(cfg.port),
            UnitConfig::WebFrontend(_) => None,
        }
    }

    /// Parse YAML for the given workload. Unknown keys are ignored.
    pub fn from_yaml(kind: WorkloadKind, yaml: &str) -> Result<Self, serde_yaml::Error> {
        let yaml = if yaml.trim().is_empty() { "{}" } else { yaml };
        Ok(match kind {
            WorkloadKind::KeyValueStore => UnitConfig::KeyValueStore(serde_yaml::from_str(yaml)?),
            WorkloadKind::WebFrontend => UnitConfig::WebFrontend(serde_yaml::from_str(yaml)?),
        })
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        match self {
            UnitConfig::KeyValueStore(cfg) => serde_yaml::to_string(cfg),
            UnitConfig::WebFrontend(cfg) => serde_yaml::to_string(cfg),
        }
    }

    /// Set a single option from its string form, validating the value.
    pub fn set_option(&mut self, option: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            option: option.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        match (self, option) {
            (UnitConfig::KeyValueStore(cfg), "port") => {
                cfg.port = parse_port(value).map_err(|reason| invalid(reason.as_str()))?;
            }
            (UnitConfig::KeyValueStore(cfg), "appendonly") => {
                cfg.appendonly = match value {
                    "yes" => AppendOnly::Yes,
                    "no" => AppendOnly::No,
                    _ => return Err(invalid("expected `yes` or `no`")),
                };
            }
            (UnitConfig::KeyValueStore(cfg), "requirepass") => {
                cfg.requirepass = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            (UnitConfig::WebFrontend(cfg), "webserver-key") => {
                cfg.webserver_key = value.to_string();
            }
            (cfg, _) => {
                return Err(ConfigError::UnknownOption {
                    workload: cfg.kind().to_string(),
                    option: option.to_string(),
                })
            }
        }
        Ok(())
    }
}

/// Load `config.yaml` for a unit of `kind`; a missing file yields defaults.
pub fn load_at(path: &Path, kind: WorkloadKind) -> Result<UnitConfig, ConfigError> {
    if !path.exists() {
        return Ok(UnitConfig::default_for(kind));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| config_io(path, e))?;
    UnitConfig::from_yaml(kind, &contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save `config.yaml` atomically.
pub fn save_at(path: &Path, config: &UnitConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| config_io(dir, e))?;
    }
    let yaml = config.to_yaml()?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| config_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| config_io(path, e))?;
    Ok(())
}

/// The user's home directory; the local host roots its files there.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn parse_port(raw: &str) -> Result<u16, String> {
    match raw.trim().parse::<u16>() {
        Ok(0) => Err("port must be between 1 and 65535".to_string()),
        Ok(port) => Ok(port),
        Err(err) => Err(format!("not a port number: {err}")),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(i64),
    Str(String),
}

/// Accept `port: 70` as well as `port: "70"`.
fn port_from_int_or_str<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(value) => match u16::try_from(value) {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(D::Error::custom(format!(
                "port {value} is outside 1-65535"
            ))),
        },
        IntOrString::Str(raw) => parse_port(&raw).map_err(D::Error::custom),
    }
}
