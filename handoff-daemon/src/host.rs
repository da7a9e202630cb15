//! The local host: many units, one event at a time.
//!
//! Units live in directories under `~/.handoff/units/`. Every event goes
//! through a FIFO queue; handling one event may enqueue more. When a unit
//! changes its application's relation data, every unit of the peer
//! application receives `RelationChanged` for that relation.
//!
//! The CLI and the daemon may both run a host over the same directory. Each
//! delivery holds the unit's lock file, so one unit sees one event at a time
//! across processes.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use handoff_core::{
    config, network, state, AppName, LifecycleEvent, RelationId, Role, UnitName, UnitState,
};
use handoff_reconcile::{diff_plan, DispatchReport, PlanDiff, Unit, UnitContext};
use handoff_renderer::Renderer;

use crate::error::{io_err, DaemonError};
use crate::fs_relations::{self, FileRelationStore, RelationRecord};
use crate::fs_supervisor::{self, FileSupervisor, SupervisorRecord};
use crate::lock::{self, FileLockGuard, LOCK_TIMEOUT};
use crate::manifest::{self, UnitManifest};
use crate::paths::{
    config_path, lock_path, manifest_path, network_path, settings_digest_path, state_path,
    supervisor_path, templates_dir, write_atomic,
};

/// One event delivered to one unit.
#[derive(Debug)]
pub struct Delivery {
    pub unit: UnitName,
    pub event: LifecycleEvent,
    /// The dispatch report, or the rendered error chain when handling failed.
    pub outcome: Result<DispatchReport, String>,
}

impl Delivery {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Everything persisted about one unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSnapshot {
    pub manifest: UnitManifest,
    pub state: UnitState,
    pub supervisor: SupervisorRecord,
}

pub struct Host {
    home: PathBuf,
    renderer: Renderer,
}

impl Host {
    /// Open the host rooted at `home`, loading template overrides from
    /// `~/.handoff/templates/`.
    pub fn open(home: &Path) -> Result<Self, DaemonError> {
        let renderer = Renderer::with_overrides(&templates_dir(home))?;
        Ok(Self {
            home: home.to_path_buf(),
            renderer,
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    // -----------------------------------------------------------------------
    // Units
    // -----------------------------------------------------------------------

    /// Create a unit directory with its manifest and default configuration.
    /// The supervisor starts out unreachable.
    pub fn init_unit(&self, manifest: &UnitManifest) -> Result<(), DaemonError> {
        let path = manifest_path(&self.home, &manifest.name);
        if path.exists() {
            return Err(DaemonError::UnitExists(manifest.name.clone()));
        }
        manifest::save_at(&path, manifest)?;
        config::save_at(
            &config_path(&self.home, &manifest.name),
            &handoff_core::UnitConfig::default_for(manifest.kind),
        )?;
        tracing::info!(unit = %manifest.name, kind = %manifest.kind, "initialized unit");
        Ok(())
    }

    pub fn unit(&self, name: &UnitName) -> Result<UnitManifest, DaemonError> {
        let path = manifest_path(&self.home, name);
        if !path.exists() {
            return Err(DaemonError::UnitNotFound(name.clone()));
        }
        manifest::load_at(&path)
    }

    pub fn units(&self) -> Result<Vec<UnitManifest>, DaemonError> {
        manifest::list_at(&self.home)
    }

    pub fn units_of(&self, app: &AppName) -> Result<Vec<UnitManifest>, DaemonError> {
        Ok(self
            .units()?
            .into_iter()
            .filter(|m| m.app() == *app)
            .collect())
    }

    pub fn relations(&self) -> Result<Vec<RelationRecord>, DaemonError> {
        Ok(fs_relations::list_at(&self.home)?)
    }

    pub fn snapshot(&self, name: &UnitName) -> Result<UnitSnapshot, DaemonError> {
        let manifest = self.unit(name)?;
        Ok(UnitSnapshot {
            state: state::load_at(&state_path(&self.home, name))?,
            supervisor: fs_supervisor::load_at(&supervisor_path(&self.home, name))?,
            manifest,
        })
    }

    /// What the next reconcile would change, against the last declared plan.
    pub fn plan_diff(&self, name: &UnitName) -> Result<Option<PlanDiff>, DaemonError> {
        let manifest = self.unit(name)?;
        let config = config::load_at(&config_path(&self.home, name), manifest.kind)?;
        let state = state::load_at(&state_path(&self.home, name))?;
        let observed = fs_supervisor::load_at(&supervisor_path(&self.home, name))?.plan;
        let unit = Unit::new(name.clone(), config, &self.renderer);
        let desired = unit.reconciler().desired_layer(unit.config(), &state)?;
        Ok(diff_plan(&observed, &desired)?)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Deliver `event` to `name`, then everything it cascades into.
    pub fn dispatch(
        &self,
        name: &UnitName,
        event: LifecycleEvent,
    ) -> Result<Vec<Delivery>, DaemonError> {
        self.unit(name)?;
        self.run([(name.clone(), event)])
    }

    /// Relate a provider application to a requirer application on the
    /// provider's endpoint. Every unit of both sides receives
    /// `RelationCreated`, providers first.
    pub fn relate(
        &self,
        provider: &AppName,
        requirer: &AppName,
    ) -> Result<(RelationRecord, Vec<Delivery>), DaemonError> {
        let providers = self.units_of(provider)?;
        let requirers = self.units_of(requirer)?;
        let invalid = |reason: &str| DaemonError::InvalidRelation {
            provider: provider.clone(),
            requirer: requirer.clone(),
            reason: reason.to_string(),
        };

        let Some(first) = providers.first() else {
            return Err(DaemonError::AppNotFound(provider.clone()));
        };
        if requirers.is_empty() {
            return Err(DaemonError::AppNotFound(requirer.clone()));
        }
        if providers.iter().any(|m| m.role() != Role::Provider) {
            return Err(invalid("first application does not provide a connection"));
        }
        if requirers.iter().any(|m| m.role() != Role::Requirer) {
            return Err(invalid("second application does not require a connection"));
        }
        let endpoint = first.endpoint.clone();
        if requirers.iter().any(|m| m.endpoint != endpoint) {
            return Err(invalid("endpoints differ"));
        }

        let record = fs_relations::create_at(&self.home, &endpoint, provider, requirer)?;
        tracing::info!(relation = %record.id, %provider, %requirer, %endpoint, "created relation");

        let relation = record.id;
        let queue = providers
            .iter()
            .chain(requirers.iter())
            .map(|m| (m.name.clone(), LifecycleEvent::RelationCreated { relation }));
        let deliveries = self.run(queue)?;
        Ok((record, deliveries))
    }

    /// Remove a relation; both sides then receive `RelationBroken`.
    pub fn unrelate(&self, relation: RelationId) -> Result<Vec<Delivery>, DaemonError> {
        let record = fs_relations::load_at(&self.home, relation)?
            .ok_or(DaemonError::RelationNotFound(relation))?;
        fs_relations::remove_at(&self.home, relation)?;
        tracing::info!(relation = %relation, "removed relation");

        let mut queue = Vec::new();
        for app in [&record.provider, &record.requirer] {
            for m in self.units_of(app)? {
                queue.push((m.name, LifecycleEvent::RelationBroken { relation }));
            }
        }
        self.run(queue)
    }

    /// Set one configuration option and deliver `ConfigChanged`.
    pub fn set_config(
        &self,
        name: &UnitName,
        option: &str,
        value: &str,
    ) -> Result<Vec<Delivery>, DaemonError> {
        let manifest = self.unit(name)?;
        let path = config_path(&self.home, name);
        let mut config = config::load_at(&path, manifest.kind)?;
        config.set_option(option, value)?;
        config::save_at(&path, &config)?;
        self.run([(name.clone(), LifecycleEvent::ConfigChanged)])
    }

    /// Mark the unit's supervisor reachable or not. Becoming reachable
    /// delivers `SupervisorReady`.
    pub fn set_supervisor_reachable(
        &self,
        name: &UnitName,
        reachable: bool,
    ) -> Result<Vec<Delivery>, DaemonError> {
        self.unit(name)?;
        {
            let _lock = self.lock_unit(name)?;
            let mut supervisor = FileSupervisor::open(supervisor_path(&self.home, name))?;
            supervisor.set_reachable(reachable)?;
        }
        if !reachable {
            tracing::info!(unit = %name, "supervisor marked unreachable");
            return Ok(Vec::new());
        }
        self.run([(name.clone(), LifecycleEvent::SupervisorReady)])
    }

    /// Deliver `ConfigChanged` unless the unit's settings files are exactly
    /// as they were when it last handled one. Edits made through
    /// [`Host::set_config`] are handled before the call returns, so a watcher
    /// noticing them afterwards has nothing to do.
    pub fn dispatch_settings_change(&self, name: &UnitName) -> Result<Vec<Delivery>, DaemonError> {
        self.unit(name)?;
        {
            // Waits out a delivery still in flight in another process.
            let _lock = self.lock_unit(name)?;
            if !self.settings_changed(name)? {
                tracing::debug!(unit = %name, "settings already handled");
                return Ok(Vec::new());
            }
        }
        self.run([(name.clone(), LifecycleEvent::ConfigChanged)])
    }

    /// Whether the settings files differ from the last handled `ConfigChanged`.
    pub fn settings_changed(&self, name: &UnitName) -> Result<bool, DaemonError> {
        let path = settings_digest_path(&self.home, name);
        let recorded = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(recorded.trim() != self.settings_digest(name)?)
    }

    /// SHA-256 over the unit's manifest, configuration and network info.
    fn settings_digest(&self, name: &UnitName) -> Result<String, DaemonError> {
        let mut hasher = Sha256::new();
        for path in [
            manifest_path(&self.home, name),
            config_path(&self.home, name),
            network_path(&self.home, name),
        ] {
            match fs::read(&path) {
                Ok(contents) => {
                    hasher.update((contents.len() as u64).to_le_bytes());
                    hasher.update(&contents);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    hasher.update(u64::MAX.to_le_bytes());
                }
                Err(err) => return Err(io_err(&path, err)),
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    fn lock_unit(&self, name: &UnitName) -> Result<FileLockGuard, DaemonError> {
        let path = lock_path(&self.home, name);
        lock::acquire(&path, LOCK_TIMEOUT).map_err(|e| io_err(&path, e))
    }

    fn run(
        &self,
        initial: impl IntoIterator<Item = (UnitName, LifecycleEvent)>,
    ) -> Result<Vec<Delivery>, DaemonError> {
        let mut queue: VecDeque<(UnitName, LifecycleEvent)> = initial.into_iter().collect();
        let mut deliveries = Vec::new();

        while let Some((unit, event)) = queue.pop_front() {
            let outcome = self.deliver(&unit, event.clone());
            let outcome = match outcome {
                Ok(report) => {
                    if report.bag_changed {
                        queue.extend(self.peer_events(&unit, &report)?);
                    }
                    tracing::info!(
                        unit = %unit,
                        event = %event,
                        phase = %report.phase,
                        status = %report.status,
                        pending = report.pending,
                        "event delivered",
                    );
                    Ok(report)
                }
                Err(err) => {
                    tracing::error!(unit = %unit, event = %event, error = %err, "event failed");
                    Err(err.to_string())
                }
            };
            deliveries.push(Delivery {
                unit,
                event,
                outcome,
            });
        }
        Ok(deliveries)
    }

    fn deliver(&self, name: &UnitName, event: LifecycleEvent) -> Result<DispatchReport, DaemonError> {
        let manifest = self.unit(name)?;
        let _lock = self.lock_unit(name)?;
        // Taken before the settings are read so a later edit is not lost.
        let settings = match event {
            LifecycleEvent::ConfigChanged => Some(self.settings_digest(name)?),
            _ => None,
        };
        let config = config::load_at(&config_path(&self.home, name), manifest.kind)?;
        let info = network::load_at(&network_path(&self.home, name))?;
        let host = network::resolve_host(manifest.bind_address.as_deref(), info.as_ref());

        let unit = Unit::new(name.clone(), config, &self.renderer)
            .with_host(host)
            .with_endpoint(manifest.endpoint.clone());

        let mut supervisor = FileSupervisor::open(supervisor_path(&self.home, name))?;
        let mut relations = FileRelationStore::new(&self.home, manifest.app());
        let mut store = handoff_core::FileStateStore::new(state_path(&self.home, name));
        let mut ctx = UnitContext {
            supervisor: &mut supervisor,
            relations: &mut relations,
            leadership: &manifest.leader,
            store: &mut store,
        };
        let report = unit.dispatch(&mut ctx, event)?;
        if let Some(digest) = settings {
            let path = settings_digest_path(&self.home, name);
            write_atomic(&path, digest.as_bytes()).map_err(|e| io_err(&path, e))?;
        }
        Ok(report)
    }

    /// `RelationChanged` for every peer unit of each relation `unit` wrote.
    fn peer_events(
        &self,
        unit: &UnitName,
        report: &DispatchReport,
    ) -> Result<Vec<(UnitName, LifecycleEvent)>, DaemonError> {
        let written: BTreeSet<RelationId> = report
            .handled
            .iter()
            .flat_map(|h| h.offers.iter())
            .filter(|(_, offer)| offer.wrote())
            .map(|(relation, _)| *relation)
            .collect();

        let app = unit.app();
        let mut events = Vec::new();
        for relation in written {
            let Some(record) = fs_relations::load_at(&self.home, relation)? else {
                continue;
            };
            let Some(peer) = record.remote_of(&app) else {
                continue;
            };
            for m in self.units_of(peer)? {
                events.push((m.name, LifecycleEvent::RelationChanged { relation }));
            }
        }
        Ok(events)
    }
}
