//! On-disk layout of the local host.
//!
//! ```text
//! ~/.handoff/
//!   units/<app>-<n>/{unit.yaml, config.yaml, state.json, supervisor.json, network.yaml,
//!                    unit.lock, settings.sha256}
//!   relations/{<id>.json, next-id, relations.lock}
//!   templates/
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use handoff_core::{RelationId, UnitName};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const MANIFEST_FILE: &str = "unit.yaml";
pub const CONFIG_FILE: &str = "config.yaml";
pub const STATE_FILE: &str = "state.json";
pub const SUPERVISOR_FILE: &str = "supervisor.json";
pub const NETWORK_FILE: &str = "network.yaml";
pub const LOCK_FILE: &str = "unit.lock";
/// Digest of the settings files as of the last handled `ConfigChanged`.
pub const SETTINGS_DIGEST_FILE: &str = "settings.sha256";
const RELATIONS_LOCK_FILE: &str = "relations.lock";

pub fn handoff_root(home: &Path) -> PathBuf {
    home.join(".handoff")
}

pub fn units_root(home: &Path) -> PathBuf {
    handoff_root(home).join("units")
}

pub fn unit_dir(home: &Path, unit: &UnitName) -> PathBuf {
    units_root(home).join(unit.slug())
}

pub fn manifest_path(home: &Path, unit: &UnitName) -> PathBuf {
    unit_dir(home, unit).join(MANIFEST_FILE)
}

pub fn config_path(home: &Path, unit: &UnitName) -> PathBuf {
    unit_dir(home, unit).join(CONFIG_FILE)
}

pub fn state_path(home: &Path, unit: &UnitName) -> PathBuf {
    unit_dir(home, unit).join(STATE_FILE)
}

pub fn supervisor_path(home: &Path, unit: &UnitName) -> PathBuf {
    unit_dir(home, unit).join(SUPERVISOR_FILE)
}

pub fn network_path(home: &Path, unit: &UnitName) -> PathBuf {
    unit_dir(home, unit).join(NETWORK_FILE)
}

pub fn lock_path(home: &Path, unit: &UnitName) -> PathBuf {
    unit_dir(home, unit).join(LOCK_FILE)
}

pub fn settings_digest_path(home: &Path, unit: &UnitName) -> PathBuf {
    unit_dir(home, unit).join(SETTINGS_DIGEST_FILE)
}

pub fn relations_root(home: &Path) -> PathBuf {
    handoff_root(home).join("relations")
}

pub fn relation_path(home: &Path, relation: RelationId) -> PathBuf {
    relations_root(home).join(format!("{}.json", relation.0))
}

pub fn relations_lock_path(home: &Path) -> PathBuf {
    relations_root(home).join(RELATIONS_LOCK_FILE)
}

pub fn templates_dir(home: &Path) -> PathBuf {
    handoff_root(home).join("templates")
}

/// Write `contents` to `<path>.tmp` and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
