//! File-backed relation store.
//!
//! Each relation is one JSON file, `relations/<id>.json`, holding one bag per
//! application. A [`FileRelationStore`] is one application's view: it reads
//! the remote bag and reads/writes its own.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use handoff_core::{AppName, BagError, Databag, RelationHandle, RelationId, RelationStore};

use crate::lock::{self, FileLockGuard, LOCK_TIMEOUT};
use crate::paths::{relation_path, relations_lock_path, relations_root, write_atomic};

const NEXT_ID_FILE: &str = "next-id";

/// Contents of `relations/<id>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub id: RelationId,
    pub endpoint: String,
    pub provider: AppName,
    pub requirer: AppName,
    #[serde(default)]
    pub bags: BTreeMap<AppName, Databag>,
    pub created_at: DateTime<Utc>,
}

impl RelationRecord {
    /// The other side of the relation as seen from `app`.
    pub fn remote_of(&self, app: &AppName) -> Option<&AppName> {
        if *app == self.provider {
            Some(&self.requirer)
        } else if *app == self.requirer {
            Some(&self.provider)
        } else {
            None
        }
    }

    pub fn bag(&self, app: &AppName) -> Databag {
        self.bags.get(app).cloned().unwrap_or_default()
    }
}

fn bag_io(path: &Path, source: std::io::Error) -> BagError {
    BagError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serializes read-modify-write of relation files across processes.
fn lock_relations(home: &Path) -> Result<FileLockGuard, BagError> {
    let path = relations_lock_path(home);
    lock::acquire(&path, LOCK_TIMEOUT).map_err(|e| bag_io(&path, e))
}

/// Create a relation with the next free id.
pub fn create_at(
    home: &Path,
    endpoint: &str,
    provider: &AppName,
    requirer: &AppName,
) -> Result<RelationRecord, BagError> {
    let _lock = lock_relations(home)?;
    let next = next_id(home)?;
    let record = RelationRecord {
        id: next,
        endpoint: endpoint.to_string(),
        provider: provider.clone(),
        requirer: requirer.clone(),
        bags: BTreeMap::new(),
        created_at: Utc::now(),
    };
    save_at(home, &record)?;
    Ok(record)
}

/// Allocate a relation id. Ids are never reused, even after removal.
fn next_id(home: &Path) -> Result<RelationId, BagError> {
    let path = relations_root(home).join(NEXT_ID_FILE);
    let stored = match fs::read_to_string(&path) {
        Ok(contents) => contents.trim().parse::<u32>().ok(),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(bag_io(&path, err)),
    };
    let highest = list_at(home)?.last().map(|r| r.id.0).unwrap_or(0);
    let id = stored.unwrap_or(1).max(highest.saturating_add(1));
    write_atomic(&path, id.saturating_add(1).to_string().as_bytes())
        .map_err(|e| bag_io(&path, e))?;
    Ok(RelationId(id))
}

/// Load one relation; `None` when it does not exist.
pub fn load_at(home: &Path, relation: RelationId) -> Result<Option<RelationRecord>, BagError> {
    let path = relation_path(home, relation);
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(bag_io(&path, err)),
    }
}

pub fn save_at(home: &Path, record: &RelationRecord) -> Result<(), BagError> {
    let path = relation_path(home, record.id);
    let json = serde_json::to_string_pretty(record)?;
    write_atomic(&path, json.as_bytes()).map_err(|e| bag_io(&path, e))
}

/// Delete a relation. Returns `false` if it was already gone.
pub fn remove_at(home: &Path, relation: RelationId) -> Result<bool, BagError> {
    let _lock = lock_relations(home)?;
    let path = relation_path(home, relation);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(bag_io(&path, err)),
    }
}

/// Every live relation, ordered by id.
pub fn list_at(home: &Path) -> Result<Vec<RelationRecord>, BagError> {
    let root = relations_root(home);
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(bag_io(&root, err)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| bag_io(&root, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = fs::read_to_string(&path).map_err(|e| bag_io(&path, e))?;
        records.push(serde_json::from_str::<RelationRecord>(&contents)?);
    }
    records.sort_by_key(|r| r.id);
    Ok(records)
}

/// The relation data visible to one application.
#[derive(Debug, Clone)]
pub struct FileRelationStore {
    home: PathBuf,
    app: AppName,
}

impl FileRelationStore {
    pub fn new(home: impl Into<PathBuf>, app: AppName) -> Self {
        Self {
            home: home.into(),
            app,
        }
    }

    fn record(&self, relation: RelationId) -> Result<RelationRecord, BagError> {
        load_at(&self.home, relation)?
            .filter(|r| r.remote_of(&self.app).is_some())
            .ok_or(BagError::NotFound { relation })
    }
}

impl RelationStore for FileRelationStore {
    fn relations(&self, endpoint: &str) -> Result<Vec<RelationHandle>, BagError> {
        Ok(list_at(&self.home)?
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .filter_map(|r| {
                r.remote_of(&self.app).map(|remote| RelationHandle {
                    id: r.id,
                    endpoint: r.endpoint.clone(),
                    remote_app: remote.clone(),
                })
            })
            .collect())
    }

    fn read_remote(&self, relation: RelationId) -> Result<Databag, BagError> {
        let record = self.record(relation)?;
        let remote = record
            .remote_of(&self.app)
            .cloned()
            .ok_or(BagError::NotFound { relation })?;
        Ok(record.bag(&remote))
    }

    fn read_local(&self, relation: RelationId) -> Result<Databag, BagError> {
        Ok(self.record(relation)?.bag(&self.app))
    }

    fn write_local(&mut self, relation: RelationId, data: &Databag) -> Result<(), BagError> {
        let _lock = lock_relations(&self.home)?;
        let mut record = self.record(relation)?;
        record.bags.insert(self.app.clone(), data.clone());
        save_at(&self.home, &record)?;
        tracing::debug!(relation = %relation, app = %self.app, "wrote relation data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn apps() -> (AppName, AppName) {
        (AppName::from("keydb"), AppName::from("webserver"))
    }

    #[test]
    fn ids_increase_from_one() {
        let home = TempDir::new().unwrap();
        let (kv, web) = apps();
        let first = create_at(home.path(), "db", &kv, &web).unwrap();
        let second = create_at(home.path(), "db", &kv, &web).unwrap();
        assert_eq!(first.id, RelationId(1));
        assert_eq!(second.id, RelationId(2));
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let home = TempDir::new().unwrap();
        let (kv, web) = apps();
        let first = create_at(home.path(), "db", &kv, &web).unwrap();
        remove_at(home.path(), first.id).unwrap();
        let second = create_at(home.path(), "db", &kv, &web).unwrap();
        assert_eq!(second.id, RelationId(2));
    }

    #[test]
    fn each_side_reads_the_other_bag() {
        let home = TempDir::new().unwrap();
        let (kv, web) = apps();
        let id = create_at(home.path(), "db", &kv, &web).unwrap().id;

        let mut provider = FileRelationStore::new(home.path(), kv.clone());
        let requirer = FileRelationStore::new(home.path(), web.clone());
        let bag = Databag::from([
            ("host".to_string(), "10.1.2.3".to_string()),
            ("port".to_string(), "70".to_string()),
        ]);
        provider.write_local(id, &bag).unwrap();

        assert_eq!(requirer.read_remote(id).unwrap(), bag);
        assert!(requirer.read_local(id).unwrap().is_empty());
        assert_eq!(provider.read_local(id).unwrap(), bag);

        let handles = requirer.relations("db").unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].remote_app, kv);
        assert!(requirer.relations("cache").unwrap().is_empty());
    }

    #[test]
    fn outsiders_and_removed_relations_are_not_found() {
        let home = TempDir::new().unwrap();
        let (kv, web) = apps();
        let id = create_at(home.path(), "db", &kv, &web).unwrap().id;

        let outsider = FileRelationStore::new(home.path(), AppName::from("other"));
        assert!(matches!(
            outsider.read_remote(id),
            Err(BagError::NotFound { .. })
        ));
        assert!(outsider.relations("db").unwrap().is_empty());

        assert!(remove_at(home.path(), id).unwrap());
        assert!(!remove_at(home.path(), id).unwrap());
        let requirer = FileRelationStore::new(home.path(), web);
        assert!(matches!(
            requirer.read_remote(id),
            Err(BagError::NotFound { .. })
        ));
    }

    #[test]
    fn corrupt_relation_file_surfaces_json_error() {
        let home = TempDir::new().unwrap();
        let path = relation_path(home.path(), RelationId(7));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{broken").unwrap();
        assert!(matches!(list_at(home.path()), Err(BagError::Json(_))));
    }
}
