use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use handoff_core::{LifecycleEvent, UnitName};

use crate::error::{io_err, DaemonError};
use crate::host::{Delivery, Host};
use crate::manifest;
use crate::paths::{
    relations_root, units_root, CONFIG_FILE, DEBOUNCE_WINDOW, MANIFEST_FILE, NETWORK_FILE,
};

struct EventJob {
    unit: UnitName,
    event: LifecycleEvent,
    source: &'static str,
    /// Skip the event when the unit already handled its current settings.
    settings_edit: bool,
    respond_to: oneshot::Sender<Result<DeliverySummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliverySummary {
    pub unit: String,
    pub event: String,
    pub source: String,
    pub delivered: usize,
    pub failed: usize,
    pub restarted: Vec<String>,
    pub duration_ms: u128,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing("info");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon: a watcher over unit files and a single event processor.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let host = Arc::new(Host::open(&home)?);

    let (event_tx, event_rx) = mpsc::channel::<EventJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, event_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let host = host.clone();
        tokio::spawn(async move {
            let result = event_processor_task(host, event_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Runtime(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(home = %home.display(), "handoff daemon started");
    let (watcher_result, processor_result, signal_result) =
        tokio::join!(watcher_handle, processor_handle, signal_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("event_processor", processor_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn watcher_task(
    home: PathBuf,
    event_tx: mpsc::Sender<EventJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let units = units_root(&home);
    if !units.exists() {
        fs::create_dir_all(&units).map_err(|e| io_err(&units, e))?;
    }

    // Event paths are canonical on macOS.
    let units = fs::canonicalize(&units).unwrap_or(units);

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = notify_tx.send(event);
    })?;

    let mut watched = HashSet::new();
    watch_unit_dirs(&mut watcher, &mut watched, &units)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = notify_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if new_unit_dir(&path, &units) {
                        watch_dir(&mut watcher, &mut watched, &path)?;
                        continue;
                    }

                    if !is_unit_settings_file(&path, &units) {
                        continue;
                    }
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    let Some(unit) = unit_for_path(&path) else {
                        tracing::debug!(path = %path.display(), "no unit manifest next to changed file");
                        continue;
                    };

                    match enqueue_settings_edit(&event_tx, unit).await {
                        Ok(summary) if summary.delivered == 0 => {
                            tracing::debug!(unit = %summary.unit, "settings edit already handled");
                        }
                        Ok(summary) => {
                            tracing::info!(
                                unit = %summary.unit,
                                delivered = summary.delivered,
                                failed = summary.failed,
                                restarted = ?summary.restarted,
                                duration_ms = summary.duration_ms,
                                "watcher-triggered config-changed handled",
                            );
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "watcher-triggered config-changed failed");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// The only place events are handled while the daemon runs, so at most one
/// event is in flight at a time.
async fn event_processor_task(
    host: Arc<Host>,
    mut event_rx: mpsc::Receiver<EventJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = event_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let host = host.clone();
                let unit = job.unit.clone();
                let event = job.event.clone();
                let settings_edit = job.settings_edit;
                let result = tokio::task::spawn_blocking(move || {
                    if settings_edit {
                        host.dispatch_settings_change(&unit)
                    } else {
                        host.dispatch(&unit, event)
                    }
                })
                    .await
                    .map_err(|err| DaemonError::Runtime(format!("dispatch task join error: {err}")))?;

                let outcome = result
                    .map(|deliveries| {
                        build_summary(&job.unit, &job.event, job.source, &deliveries, started.elapsed())
                    })
                    .map_err(|err| err.to_string());
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

/// `ConfigChanged` for a settings file edit, dropped when the edit was
/// already handled by whoever made it.
async fn enqueue_settings_edit(
    event_tx: &mpsc::Sender<EventJob>,
    unit: UnitName,
) -> Result<DeliverySummary, DaemonError> {
    enqueue_event(event_tx, unit, LifecycleEvent::ConfigChanged, "watcher", true).await
}

async fn enqueue_event(
    event_tx: &mpsc::Sender<EventJob>,
    unit: UnitName,
    event: LifecycleEvent,
    source: &'static str,
    settings_edit: bool,
) -> Result<DeliverySummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    event_tx
        .send(EventJob {
            unit,
            event,
            source,
            settings_edit,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("event queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("event response"))?;
    outcome.map_err(DaemonError::Runtime)
}

fn build_summary(
    unit: &UnitName,
    event: &LifecycleEvent,
    source: &'static str,
    deliveries: &[Delivery],
    duration: Duration,
) -> DeliverySummary {
    let failed = deliveries.iter().filter(|d| !d.is_ok()).count();
    let restarted = deliveries
        .iter()
        .filter_map(|d| d.outcome.as_ref().ok())
        .flat_map(|report| {
            report
                .restarted()
                .into_iter()
                .map(move |service| format!("{}:{service}", report.unit))
        })
        .collect();

    DeliverySummary {
        unit: unit.to_string(),
        event: event.to_string(),
        source: source.to_string(),
        delivered: deliveries.len(),
        failed,
        restarted,
        duration_ms: duration.as_millis(),
    }
}

/// Watch `units/` and every unit directory directly below it. Unit
/// directories are flat, so nothing deeper is registered.
fn watch_unit_dirs(
    watcher: &mut RecommendedWatcher,
    watched: &mut HashSet<PathBuf>,
    units: &Path,
) -> Result<(), DaemonError> {
    let listing = fs::read_dir(units).map_err(|e| io_err(units, e))?;
    let mut targets = vec![units.to_path_buf()];
    for entry in listing {
        let path = entry.map_err(|e| io_err(units, e))?.path();
        if path.is_dir() {
            targets.push(path);
        }
    }
    for dir in targets {
        watch_dir(watcher, watched, &dir)?;
    }
    Ok(())
}

fn watch_dir(
    watcher: &mut RecommendedWatcher,
    watched: &mut HashSet<PathBuf>,
    dir: &Path,
) -> Result<(), DaemonError> {
    let real = match fs::canonicalize(dir) {
        Ok(real) => real,
        // Removed between the event and now.
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_err(dir, err)),
    };
    if watched.insert(real.clone()) {
        watcher.watch(&real, RecursiveMode::NonRecursive)?;
        tracing::debug!(dir = %real.display(), "watching");
    }
    Ok(())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// `units/<unit>/{config,network,unit}.yaml`: the files that change what a
/// unit should run.
fn is_unit_settings_file(path: &Path, units: &Path) -> bool {
    let in_unit_dir = path
        .parent()
        .and_then(Path::parent)
        .map(|root| root == units)
        .unwrap_or(false);
    let name = path.file_name().and_then(|n| n.to_str());
    in_unit_dir && matches!(name, Some(CONFIG_FILE | NETWORK_FILE | MANIFEST_FILE))
}

fn unit_for_path(path: &Path) -> Option<UnitName> {
    let manifest_path = path.parent()?.join(MANIFEST_FILE);
    match manifest::load_at(&manifest_path) {
        Ok(manifest) => Some(manifest.name),
        Err(err) => {
            tracing::debug!(error = %err, "unreadable unit manifest");
            None
        }
    }
}

/// A directory created directly under `units/` is a new unit to watch.
fn new_unit_dir(path: &Path, units: &Path) -> bool {
    path.parent() == Some(units) && path.is_dir()
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [units_root(home), relations_root(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Runtime(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the `tracing` subscriber on stderr. `RUST_LOG` overrides
/// `default_filter`.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
