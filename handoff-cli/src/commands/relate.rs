//! `handoff relate` / `handoff unrelate`.

use anyhow::{Context, Result};
use clap::Args;

use handoff_core::{AppName, RelationId};

/// Arguments for `handoff relate`.
#[derive(Args, Debug)]
pub struct RelateArgs {
    /// Application offering the connection (key-value store).
    pub provider: String,
    /// Application consuming it (web front-end).
    pub requirer: String,
}

impl RelateArgs {
    pub fn run(self) -> Result<()> {
        let host = super::open_host()?;
        let provider = AppName::from(self.provider.as_str());
        let requirer = AppName::from(self.requirer.as_str());
        let (record, deliveries) = host
            .relate(&provider, &requirer)
            .with_context(|| format!("failed to relate '{provider}' to '{requirer}'"))?;
        println!(
            "relation {} created: {} -> {} on `{}`",
            record.id, record.provider, record.requirer, record.endpoint
        );
        super::report_deliveries(&deliveries)
    }
}

/// Arguments for `handoff unrelate`.
#[derive(Args, Debug)]
pub struct UnrelateArgs {
    pub relation: u32,
}

impl UnrelateArgs {
    pub fn run(self) -> Result<()> {
        let host = super::open_host()?;
        let relation = RelationId(self.relation);
        let deliveries = host
            .unrelate(relation)
            .with_context(|| format!("failed to remove relation {relation}"))?;
        println!("relation {relation} removed");
        super::report_deliveries(&deliveries)
    }
}
