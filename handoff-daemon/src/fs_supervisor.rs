//! File-backed process supervisor.
//!
//! Stands in for a workload container's supervisor on the local host. The
//! declared plan, the services considered running, and a log of restarts,
//! pushed files and setup commands live in `supervisor.json`; every mutation
//! is written back before the call returns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use handoff_core::{Layer, Plan, Services, Supervisor, SupervisorError};

use crate::paths::write_atomic;

/// One restart or re-plan that touched at least one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRecord {
    pub at: DateTime<Utc>,
    pub services: Vec<String>,
}

/// Contents of `supervisor.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SupervisorRecord {
    #[serde(default)]
    pub reachable: bool,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub running: Services,
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub restarts: Vec<RestartRecord>,
    /// Workload path -> SHA-256 hex digest of the pushed contents.
    #[serde(default)]
    pub pushed: BTreeMap<String, String>,
    #[serde(default)]
    pub execs: Vec<Vec<String>>,
}

impl SupervisorRecord {
    pub fn restarts_of(&self, service: &str) -> usize {
        self.restarts
            .iter()
            .filter(|r| r.services.iter().any(|s| s == service))
            .count()
    }
}

pub struct FileSupervisor {
    path: PathBuf,
    record: SupervisorRecord,
}

impl FileSupervisor {
    /// Open `path`; a missing file is an unreachable supervisor with an
    /// empty plan.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SupervisorError> {
        let path = path.into();
        let record = load_at(&path)?;
        Ok(Self { path, record })
    }

    pub fn record(&self) -> &SupervisorRecord {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_reachable(&mut self, reachable: bool) -> Result<(), SupervisorError> {
        self.record.reachable = reachable;
        self.save()
    }

    fn save(&self) -> Result<(), SupervisorError> {
        let json = serde_json::to_string_pretty(&self.record)?;
        write_atomic(&self.path, json.as_bytes()).map_err(|source| SupervisorError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn ensure_reachable(&self) -> Result<(), SupervisorError> {
        if self.record.reachable {
            Ok(())
        } else {
            Err(SupervisorError::Unreachable {
                reason: format!("{} marks the workload unreachable", self.path.display()),
            })
        }
    }

    fn record_restart(&mut self, services: Vec<String>) {
        self.record.restarts.push(RestartRecord {
            at: Utc::now(),
            services,
        });
    }
}

impl Supervisor for FileSupervisor {
    fn can_connect(&self) -> bool {
        self.record.reachable
    }

    fn plan(&self) -> Result<Plan, SupervisorError> {
        self.ensure_reachable()?;
        Ok(self.record.plan.clone())
    }

    fn add_layer(
        &mut self,
        label: &str,
        layer: &Layer,
        combine: bool,
    ) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        let exists = self.record.layers.iter().any(|l| l == label);
        if exists && !combine {
            return Err(SupervisorError::Rejected(format!(
                "layer `{label}` already exists"
            )));
        }
        self.record.plan.combine(layer);
        if !exists {
            self.record.layers.push(label.to_string());
        }
        self.save()
    }

    fn restart(&mut self, services: &[String]) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        for name in services {
            let Some(service) = self.record.plan.services.get(name) else {
                return Err(SupervisorError::Rejected(format!(
                    "service `{name}` is not in the plan"
                )));
            };
            self.record.running.insert(name.clone(), service.clone());
        }
        tracing::info!(services = ?services, path = %self.path.display(), "restarted services");
        self.record_restart(services.to_vec());
        self.save()
    }

    fn replan(&mut self) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        let changed: Vec<String> = self
            .record
            .plan
            .services
            .iter()
            .filter(|(name, def)| self.record.running.get(*name) != Some(*def))
            .map(|(name, _)| name.clone())
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        for name in &changed {
            if let Some(def) = self.record.plan.services.get(name) {
                self.record.running.insert(name.clone(), def.clone());
            }
        }
        tracing::info!(services = ?changed, path = %self.path.display(), "replanned services");
        self.record_restart(changed);
        self.save()
    }

    fn push(&mut self, path: &str, contents: &[u8]) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        let digest = hex::encode(Sha256::digest(contents));
        self.record.pushed.insert(path.to_string(), digest);
        self.save()
    }

    fn exec(&mut self, argv: &[String]) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        self.record.execs.push(argv.to_vec());
        self.save()
    }
}

/// Load `supervisor.json`, or the default record when it is absent.
pub fn load_at(path: &Path) -> Result<SupervisorRecord, SupervisorError> {
    if !path.exists() {
        return Ok(SupervisorRecord::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| SupervisorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}
