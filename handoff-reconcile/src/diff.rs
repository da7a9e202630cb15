//! Unified diff between the observed plan and a desired layer.

use std::collections::BTreeMap;

use similar::TextDiff;

use handoff_core::{Layer, Plan, Service};

/// Services that differ, with a unified YAML diff of just those services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDiff {
    pub services: Vec<String>,
    pub unified_diff: String,
}

/// Compare `observed` with `desired`. `None` when nothing would change.
pub fn diff_plan(observed: &Plan, desired: &Layer) -> Result<Option<PlanDiff>, serde_yaml::Error> {
    let services = observed.changed_services(desired);
    if services.is_empty() {
        return Ok(None);
    }

    let before: BTreeMap<&str, &Service> = services
        .iter()
        .filter_map(|name| observed.services.get(name).map(|s| (name.as_str(), s)))
        .collect();
    let after: BTreeMap<&str, &Service> = services
        .iter()
        .filter_map(|name| desired.services.get(name).map(|s| (name.as_str(), s)))
        .collect();

    let old = if before.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(&before)?
    };
    let new = serde_yaml::to_string(&after)?;
    let unified_diff = TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header("a/observed", "b/desired")
        .context_radius(3)
        .to_string();

    Ok(Some(PlanDiff {
        services,
        unified_diff,
    }))
}
