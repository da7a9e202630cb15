//! Template context: the serializable rendering payload built from a unit's
//! configuration and its cached connection.

use serde::{Deserialize, Serialize};

use handoff_core::{ConnectionFact, Slot, UnitConfig};

use crate::error::RenderError;
use crate::profile::WorkloadProfile;

pub const KEYDB_SERVER_BINARY: &str = "keydb-server";
pub const KEYDB_CONFIG_PATH: &str = "/etc/keydb/keydb.conf";

/// Rendering payload. Exactly one of `kv` / `web` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderContext {
    pub workload: WorkloadCtx,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kv: Option<KeyValueCtx>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadCtx {
    pub kind: String,
    pub container: String,
    pub service: String,
}

/// Key-value store inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueCtx {
    pub server_binary: String,
    pub config_path: String,
    pub port: u16,
    pub appendonly: String,
    /// Absent unless a non-empty credential is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirepass: Option<String>,
}

/// Web front-end inputs. Connection fields are absent while unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebCtx {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_port: Option<String>,
}

impl RenderContext {
    /// Build the context from current inputs only.
    pub fn from_inputs(config: &UnitConfig, connection: &Slot<ConnectionFact>) -> Self {
        let profile = WorkloadProfile::of(config.kind());
        let workload = WorkloadCtx {
            kind: profile.kind.to_string(),
            container: profile.container.to_string(),
            service: profile.service.to_string(),
        };
        match config {
            UnitConfig::KeyValueStore(cfg) => RenderContext {
                workload,
                kv: Some(KeyValueCtx {
                    server_binary: KEYDB_SERVER_BINARY.to_string(),
                    config_path: KEYDB_CONFIG_PATH.to_string(),
                    port: cfg.port,
                    appendonly: cfg.appendonly.to_string(),
                    requirepass: cfg.requirepass.clone().filter(|p| !p.is_empty()),
                }),
                web: None,
            },
            UnitConfig::WebFrontend(cfg) => {
                let fact = connection.as_option();
                RenderContext {
                    workload,
                    kv: None,
                    web: Some(WebCtx {
                        key: cfg.webserver_key.clone(),
                        db_host: fact.map(|f| f.host.clone()),
                        db_port: fact.map(|f| f.port.to_string()),
                    }),
                }
            }
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}
