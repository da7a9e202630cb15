//! `handoff status`: phase, status and connection of every unit.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use handoff_core::{LoopPhase, UnitName, UnitStatus};
use handoff_daemon::{Host, RelationRecord, UnitSnapshot};

/// Arguments for `handoff status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show a single unit.
    pub unit: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let host = super::open_host()?;
        let snapshots = load_snapshots(&host, self.unit.as_deref())?;
        let relations = host.relations().context("failed to load relations")?;

        if self.json {
            print_json(&snapshots, &relations)?;
            return Ok(());
        }
        print_table(&snapshots, &relations);
        Ok(())
    }
}

fn load_snapshots(host: &Host, unit: Option<&str>) -> Result<Vec<UnitSnapshot>> {
    let names: Vec<UnitName> = match unit {
        Some(unit) => vec![UnitName::from(unit)],
        None => host
            .units()
            .context("failed to list units; run `handoff init` first")?
            .into_iter()
            .map(|m| m.name)
            .collect(),
    };
    names
        .iter()
        .map(|name| {
            host.snapshot(name)
                .with_context(|| format!("failed to load status of '{name}'"))
        })
        .collect()
}

#[derive(Serialize)]
struct StatusJson {
    units: Vec<UnitStatusJson>,
    relations: Vec<RelationJson>,
}

#[derive(Serialize)]
struct UnitStatusJson {
    unit: String,
    app: String,
    kind: String,
    leader: bool,
    phase: LoopPhase,
    status: UnitStatus,
    connection: Option<ConnectionJson>,
    deferred: Vec<String>,
    restarts: usize,
    supervisor_reachable: bool,
    updated_at: String,
}

#[derive(Serialize)]
struct ConnectionJson {
    host: String,
    port: u16,
}

#[derive(Serialize)]
struct RelationJson {
    id: u32,
    endpoint: String,
    provider: String,
    requirer: String,
}

fn print_json(snapshots: &[UnitSnapshot], relations: &[RelationRecord]) -> Result<()> {
    let payload = StatusJson {
        units: snapshots
            .iter()
            .map(|s| UnitStatusJson {
                unit: s.manifest.name.to_string(),
                app: s.manifest.app().to_string(),
                kind: s.manifest.kind.to_string(),
                leader: s.manifest.leader,
                phase: s.state.phase,
                status: s.state.status.clone(),
                connection: s.state.connection.as_option().map(|fact| ConnectionJson {
                    host: fact.host.clone(),
                    port: fact.port,
                }),
                deferred: s
                    .state
                    .deferred
                    .pending()
                    .iter()
                    .map(|p| p.event.to_string())
                    .collect(),
                restarts: s.supervisor.restarts.len(),
                supervisor_reachable: s.supervisor.reachable,
                updated_at: s.state.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            })
            .collect(),
        relations: relations
            .iter()
            .map(|r| RelationJson {
                id: r.id.0,
                endpoint: r.endpoint.clone(),
                provider: r.provider.to_string(),
                requirer: r.requirer.to_string(),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
    );
    Ok(())
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "unit")]
    unit: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "phase")]
    phase: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "connection")]
    connection: String,
    #[tabled(rename = "deferred")]
    deferred: usize,
    #[tabled(rename = "restarts")]
    restarts: usize,
}

fn print_table(snapshots: &[UnitSnapshot], relations: &[RelationRecord]) {
    if snapshots.is_empty() {
        println!("No units. Run `handoff init <app>/<n> --kind ...` first.");
        return;
    }

    let rows: Vec<StatusTableRow> = snapshots
        .iter()
        .map(|s| {
            let leader = if s.manifest.leader { "*" } else { "" };
            StatusTableRow {
                unit: format!("{}{leader}", s.manifest.name),
                kind: s.manifest.kind.to_string(),
                phase: s.state.phase.to_string(),
                status: colorize_status(&s.state.status),
                connection: s
                    .state
                    .connection
                    .as_option()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string()),
                deferred: s.state.deferred.len(),
                restarts: s.supervisor.restarts.len(),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let active = snapshots
        .iter()
        .filter(|s| s.state.status.is_active())
        .count();
    println!(
        "{} unit(s), {active} active, {} relation(s)",
        snapshots.len(),
        relations.len()
    );
    for r in relations {
        println!("  relation {}: {} -> {} on `{}`", r.id, r.provider, r.requirer, r.endpoint);
    }
}

fn colorize_status(status: &UnitStatus) -> String {
    match status {
        UnitStatus::Active => status.to_string().green().to_string(),
        UnitStatus::Waiting(_) | UnitStatus::Maintenance(_) => {
            status.to_string().yellow().to_string()
        }
        UnitStatus::Blocked(_) => status.to_string().red().to_string(),
        UnitStatus::Unknown => status.to_string(),
    }
}
