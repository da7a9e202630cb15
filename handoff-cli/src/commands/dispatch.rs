//! `handoff dispatch`: deliver one lifecycle event by hand.

use anyhow::{Context, Result};
use clap::Args;

use handoff_core::{LifecycleEvent, RelationId, UnitName};

/// Arguments for `handoff dispatch`.
#[derive(Args, Debug)]
pub struct DispatchArgs {
    pub unit: String,

    /// supervisor-ready, config-changed, relation-created, relation-changed
    /// or relation-broken.
    pub event: String,

    /// Relation id, required by the relation-* events.
    #[arg(long)]
    pub relation: Option<u32>,
}

impl DispatchArgs {
    pub fn run(self) -> Result<()> {
        let event = LifecycleEvent::parse(&self.event, self.relation.map(RelationId))
            .with_context(|| {
                format!(
                    "unknown event '{}' (relation events need --relation)",
                    self.event
                )
            })?;
        let host = super::open_host()?;
        let name = UnitName::from(self.unit.as_str());
        let deliveries = host
            .dispatch(&name, event)
            .with_context(|| format!("failed to dispatch to '{name}'"))?;
        super::report_deliveries(&deliveries)
    }
}
