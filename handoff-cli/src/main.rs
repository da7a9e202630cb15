//! handoff: run keydb and webserver units on a local host.
//!
//! # Usage
//!
//! ```text
//! handoff init <unit> --kind key-value-store|web-frontend [--bind-address <ip>] [--follower]
//! handoff dispatch <unit> <event> [--relation <id>]
//! handoff relate <provider-app> <requirer-app>
//! handoff unrelate <relation-id>
//! handoff config <unit> [<option> <value>]
//! handoff supervisor <unit> up|down
//! handoff status [<unit>] [--json]
//! handoff plan <unit>
//! handoff daemon start
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigArgs, daemon::DaemonCommand, dispatch::DispatchArgs, init::InitArgs,
    plan::PlanArgs, relate::RelateArgs, relate::UnrelateArgs, status::StatusArgs,
    supervisor::SupervisorArgs,
};
use handoff_core::WorkloadKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "handoff",
    version,
    about = "Hand a keydb connection to a webserver and keep both workloads reconciled",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a unit directory with its manifest and default config.
    Init(InitArgs),

    /// Deliver one lifecycle event to a unit.
    Dispatch(DispatchArgs),

    /// Relate a provider application to a requirer application.
    Relate(RelateArgs),

    /// Remove a relation.
    Unrelate(UnrelateArgs),

    /// Show or change a unit's configuration.
    Config(ConfigArgs),

    /// Mark a unit's supervisor reachable (up) or unreachable (down).
    Supervisor(SupervisorArgs),

    /// Show phase, status and connection of every unit.
    Status(StatusArgs),

    /// Show the unified diff the next reconcile would apply.
    Plan(PlanArgs),

    /// Run the config watcher in the foreground.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared WorkloadKind argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `WorkloadKind` from CLI args.
#[derive(Debug, Clone)]
pub struct WorkloadKindArg(pub WorkloadKind);

impl FromStr for WorkloadKindArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "key-value-store" | "keydb" => Ok(Self(WorkloadKind::KeyValueStore)),
            "web-frontend" | "webserver" => Ok(Self(WorkloadKind::WebFrontend)),
            other => Err(format!(
                "unknown workload kind '{other}'; expected: key-value-store, web-frontend"
            )),
        }
    }
}

impl fmt::Display for WorkloadKindArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<WorkloadKindArg> for WorkloadKind {
    fn from(k: WorkloadKindArg) -> Self {
        k.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        handoff_daemon::init_tracing("warn");
    }
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Dispatch(args) => args.run(),
        Commands::Relate(args) => args.run(),
        Commands::Unrelate(args) => args.run(),
        Commands::Config(args) => args.run(),
        Commands::Supervisor(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
