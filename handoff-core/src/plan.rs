//! Declarative service specifications exchanged with the process supervisor.
//!
//! A [`Layer`] is what the controller wants (desired); a [`Plan`] is what the
//! supervisor reports as declared (observed). Both carry the same service map
//! and are compared structurally.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a layer's service definition combines with an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    #[default]
    Replace,
    Merge,
}

/// Whether the supervisor starts a service automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    #[default]
    Enabled,
    Disabled,
}

/// Environment for a service. A `None` value is declared as an explicit null.
pub type Environment = BTreeMap<String, Option<String>>;

/// One service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "override")]
    pub override_: Override,
    pub summary: String,
    /// Full command line including derived flags.
    pub command: String,
    pub startup: Startup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
}

pub type Services = BTreeMap<String, Service>;

/// Desired service specification, recomputed from scratch on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub summary: String,
    pub description: String,
    #[serde(default)]
    pub services: Services,
}

/// Observed service specification as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub services: Services,
}

impl Plan {
    /// Apply `layer` on top of this plan.
    ///
    /// Same-named services are replaced (or field-merged for
    /// [`Override::Merge`]); services the layer does not mention are untouched.
    pub fn combine(&mut self, layer: &Layer) {
        for (name, service) in &layer.services {
            match (service.override_, self.services.get_mut(name)) {
                (Override::Merge, Some(existing)) => merge_service(existing, service),
                _ => {
                    self.services.insert(name.clone(), service.clone());
                }
            }
        }
    }

    /// Names of services in `layer` whose definition differs from this plan.
    ///
    /// Services missing from the plan count as changed. Sorted by name.
    pub fn changed_services(&self, layer: &Layer) -> Vec<String> {
        layer
            .services
            .iter()
            .filter(|(name, desired)| self.services.get(*name) != Some(*desired))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The subset of this plan's services named in `names`, as a layer that
    /// would restore them. Returns `None` when none of them exist.
    pub fn restore_layer(&self, names: &[String]) -> Option<Layer> {
        let services: Services = names
            .iter()
            .filter_map(|name| self.services.get(name).map(|s| (name.clone(), s.clone())))
            .collect();
        if services.is_empty() {
            return None;
        }
        Some(Layer {
            summary: "restore".to_string(),
            description: "previously declared services".to_string(),
            services,
        })
    }
}

fn merge_service(existing: &mut Service, incoming: &Service) {
    existing.summary = incoming.summary.clone();
    existing.command = incoming.command.clone();
    existing.startup = incoming.startup;
    if let Some(env) = &incoming.environment {
        let target = existing.environment.get_or_insert_with(Environment::new);
        for (k, v) in env {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(command: &str) -> Service {
        Service {
            override_: Override::Replace,
            summary: "svc".to_string(),
            command: command.to_string(),
            startup: Startup::Enabled,
            environment: None,
        }
    }

    fn layer(entries: &[(&str, Service)]) -> Layer {
        Layer {
            summary: "test layer".to_string(),
            description: "test".to_string(),
            services: entries
                .iter()
                .map(|(n, s)| (n.to_string(), s.clone()))
                .collect(),
        }
    }

    #[test]
    fn empty_plan_reports_every_service_changed() {
        let plan = Plan::default();
        let desired = layer(&[("a", service("run a")), ("b", service("run b"))]);
        assert_eq!(plan.changed_services(&desired), vec!["a", "b"]);
    }

    #[test]
    fn combine_replaces_same_name_and_keeps_others() {
        let mut plan = Plan::default();
        plan.combine(&layer(&[("a", service("v1")), ("other", service("keep"))]));
        plan.combine(&layer(&[("a", service("v2"))]));
        assert_eq!(plan.services["a"].command, "v2");
        assert_eq!(plan.services["other"].command, "keep");
    }

    #[test]
    fn identical_layer_has_no_changes() {
        let mut plan = Plan::default();
        let desired = layer(&[("a", service("run a"))]);
        plan.combine(&desired);
        assert!(plan.changed_services(&desired).is_empty());
    }

    #[test]
    fn environment_difference_is_a_change() {
        let mut plan = Plan::default();
        let mut with_env = service("run");
        with_env.environment = Some(Environment::from([("DB_HOST".to_string(), None)]));
        plan.combine(&layer(&[("web", with_env.clone())]));

        let mut updated = with_env;
        updated.environment = Some(Environment::from([(
            "DB_HOST".to_string(),
            Some("0.0.0.42".to_string()),
        )]));
        assert_eq!(plan.changed_services(&layer(&[("web", updated)])), vec!["web"]);
    }

    #[test]
    fn merge_override_merges_environment() {
        let mut plan = Plan::default();
        let mut base = service("run");
        base.environment = Some(Environment::from([("A".to_string(), Some("1".to_string()))]));
        plan.combine(&layer(&[("svc", base)]));

        let mut patch = service("run2");
        patch.override_ = Override::Merge;
        patch.environment = Some(Environment::from([("B".to_string(), Some("2".to_string()))]));
        plan.combine(&layer(&[("svc", patch)]));

        let env = plan.services["svc"].environment.as_ref().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(plan.services["svc"].command, "run2");
    }

    #[test]
    fn restore_layer_only_includes_known_services() {
        let mut plan = Plan::default();
        plan.combine(&layer(&[("a", service("old"))]));
        let restore = plan
            .restore_layer(&["a".to_string(), "new".to_string()])
            .unwrap();
        assert_eq!(restore.services.len(), 1);
        assert!(plan.restore_layer(&["new".to_string()]).is_none());
    }

    #[test]
    fn null_environment_values_serialize_as_null() {
        let mut svc = service("run");
        svc.environment = Some(Environment::from([("DB_PORT".to_string(), None)]));
        let yaml = serde_yaml::to_string(&svc).unwrap();
        assert!(yaml.contains("DB_PORT: null"), "{yaml}");
        assert!(yaml.contains("override: replace"), "{yaml}");
    }
}
