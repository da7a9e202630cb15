//! `unit.yaml`: what a unit is and how the local host treats it.
//!
//! ```yaml
//! name: keydb/0
//! kind: key-value-store
//! endpoint: db
//! leader: true
//! bind-address: 10.1.2.3   # optional; network.yaml is the fallback
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use handoff_core::{AppName, Role, UnitName, WorkloadKind};
use handoff_relation::DB_ENDPOINT;

use crate::error::{io_err, DaemonError};
use crate::paths::{units_root, write_atomic, MANIFEST_FILE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnitManifest {
    pub name: UnitName,
    pub kind: WorkloadKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Only the leader writes application relation data.
    #[serde(default = "default_leader")]
    pub leader: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
}

impl UnitManifest {
    pub fn new(name: UnitName, kind: WorkloadKind) -> Self {
        Self {
            name,
            kind,
            endpoint: default_endpoint(),
            leader: default_leader(),
            bind_address: None,
        }
    }

    pub fn app(&self) -> AppName {
        self.name.app()
    }

    pub fn role(&self) -> Role {
        self.kind.role()
    }
}

fn default_endpoint() -> String {
    DB_ENDPOINT.to_string()
}

fn default_leader() -> bool {
    true
}

pub fn load_at(path: &Path) -> Result<UnitManifest, DaemonError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| DaemonError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_at(path: &Path, manifest: &UnitManifest) -> Result<(), DaemonError> {
    let yaml = serde_yaml::to_string(manifest).map_err(|source| DaemonError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, yaml.as_bytes()).map_err(|e| io_err(path, e))
}

/// Every initialized unit under `home`, ordered by name.
pub fn list_at(home: &Path) -> Result<Vec<UnitManifest>, DaemonError> {
    let root = units_root(home);
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(&root, err)),
    };

    let mut manifests = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&root, e))?;
        let path = entry.path().join(MANIFEST_FILE);
        if path.is_file() {
            manifests.push(load_at(&path)?);
        }
    }
    manifests.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::manifest_path;
    use tempfile::TempDir;

    #[test]
    fn defaults_fill_endpoint_and_leadership() {
        let manifest: UnitManifest =
            serde_yaml::from_str("name: webserver/1\nkind: web-frontend\n").unwrap();
        assert_eq!(manifest.endpoint, "db");
        assert!(manifest.leader);
        assert_eq!(manifest.bind_address, None);
        assert_eq!(manifest.app(), AppName::from("webserver"));
        assert_eq!(manifest.role(), Role::Requirer);
    }

    #[test]
    fn list_is_sorted_and_skips_stray_dirs() {
        let home = TempDir::new().unwrap();
        for name in ["webserver/0", "keydb/1", "keydb/0"] {
            let name = UnitName::from(name);
            let manifest = UnitManifest::new(name.clone(), WorkloadKind::KeyValueStore);
            save_at(&manifest_path(home.path(), &name), &manifest).unwrap();
        }
        fs::create_dir_all(units_root(home.path()).join("scratch")).unwrap();

        let names: Vec<String> = list_at(home.path())
            .unwrap()
            .into_iter()
            .map(|m| m.name.0)
            .collect();
        assert_eq!(names, vec!["keydb/0", "keydb/1", "webserver/0"]);
    }

    #[test]
    fn empty_home_lists_nothing() {
        let home = TempDir::new().unwrap();
        assert!(list_at(home.path()).unwrap().is_empty());
    }
}
