//! `handoff plan <unit>`: what the next reconcile would declare.

use anyhow::{Context, Result};
use clap::Args;

use handoff_core::UnitName;

/// Arguments for `handoff plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    pub unit: String,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let host = super::open_host()?;
        let name = UnitName::from(self.unit.as_str());
        let diff = host
            .plan_diff(&name)
            .with_context(|| format!("plan failed for '{name}'"))?;

        let Some(diff) = diff else {
            println!("No changes for '{name}'.");
            return Ok(());
        };
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}
