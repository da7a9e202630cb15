//! Local address discovery.
//!
//! The controller prefers the bind address its host reports directly. Older
//! hosts only expose a network-info document; in that case the first address
//! of the first bind entry is used:
//!
//! ```yaml
//! bind-addresses:
//! - interface-name: eth0
//!   addresses:
//!   - value: 10.1.2.3
//!     cidr: 10.1.2.0/24
//! ingress-addresses:
//! - 10.1.2.3
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{config_io, ConfigError};

/// Network-info document for one binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkInfo {
    #[serde(default)]
    pub bind_addresses: Vec<BindAddress>,
    #[serde(default)]
    pub ingress_addresses: Vec<String>,
    #[serde(default)]
    pub egress_subnets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BindAddress {
    #[serde(default)]
    pub interface_name: String,
    #[serde(default)]
    pub addresses: Vec<InterfaceAddress>,
}

/// Hosts disagree on the field name, so both `address` and `value` are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InterfaceAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub cidr: String,
}

impl NetworkInfo {
    /// First address of the first bind entry, if any.
    pub fn first_bind_address(&self) -> Option<String> {
        self.bind_addresses
            .first()?
            .addresses
            .first()
            .and_then(|a| a.address.clone().or_else(|| a.value.clone()))
            .filter(|a| !a.is_empty())
    }
}

/// Resolve this unit's host: bind address first, then the network-info
/// fallback. `None` means the endpoint is not known yet.
pub fn resolve_host(bind_address: Option<&str>, fallback: Option<&NetworkInfo>) -> Option<String> {
    if let Some(addr) = bind_address.filter(|a| !a.is_empty()) {
        return Some(addr.to_string());
    }
    match fallback.and_then(NetworkInfo::first_bind_address) {
        Some(addr) => Some(addr),
        None => {
            tracing::debug!("unable to determine host address");
            None
        }
    }
}

/// Load a network-info YAML document. A missing file yields `None`.
pub fn load_at(path: &Path) -> Result<Option<NetworkInfo>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| config_io(path, e))?;
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
