//! Static facts about each workload: names, restart policy, status wording.

use handoff_core::WorkloadKind;

/// How the supervisor is told to pick up a new layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart exactly the changed services.
    Restart,
    /// Re-plan; the supervisor restarts whatever changed.
    Replan,
}

/// Per-workload constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadProfile {
    pub kind: WorkloadKind,
    /// Container the supervisor runs in.
    pub container: &'static str,
    /// Name of the one service the layer declares.
    pub service: &'static str,
    /// Label the layer is declared under.
    pub layer_label: &'static str,
    pub restart: RestartPolicy,
    /// Status message while the supervisor is unreachable.
    pub waiting_message: &'static str,
    /// Tera template rendering the layer.
    pub layer_template: &'static str,
}

const KEY_VALUE_STORE: WorkloadProfile = WorkloadProfile {
    kind: WorkloadKind::KeyValueStore,
    container: "keydb",
    service: "keydb",
    layer_label: "keydb",
    restart: RestartPolicy::Restart,
    waiting_message: "waiting for supervisor in workload container",
    layer_template: "keydb/layer.yaml.tera",
};

const WEB_FRONTEND: WorkloadProfile = WorkloadProfile {
    kind: WorkloadKind::WebFrontend,
    container: "webserver",
    service: "webserver",
    layer_label: "webserver",
    restart: RestartPolicy::Replan,
    waiting_message: "pending webserver restart; waiting for workload container",
    layer_template: "webserver/layer.yaml.tera",
};

impl WorkloadProfile {
    pub fn of(kind: WorkloadKind) -> &'static WorkloadProfile {
        match kind {
            WorkloadKind::KeyValueStore => &KEY_VALUE_STORE,
            WorkloadKind::WebFrontend => &WEB_FRONTEND,
        }
    }
}
