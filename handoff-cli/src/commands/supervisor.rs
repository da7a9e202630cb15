//! `handoff supervisor`: simulate the workload supervisor coming and going.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use handoff_core::UnitName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Reachability {
    Up,
    Down,
}

/// Arguments for `handoff supervisor`.
#[derive(Args, Debug)]
pub struct SupervisorArgs {
    pub unit: String,
    #[arg(value_enum)]
    pub state: Reachability,
}

impl SupervisorArgs {
    pub fn run(self) -> Result<()> {
        let host = super::open_host()?;
        let name = UnitName::from(self.unit.as_str());
        let reachable = self.state == Reachability::Up;
        let deliveries = host
            .set_supervisor_reachable(&name, reachable)
            .with_context(|| format!("failed to update supervisor of '{name}'"))?;
        if !reachable {
            println!("supervisor of {name} is down");
        }
        super::report_deliveries(&deliveries)
    }
}
