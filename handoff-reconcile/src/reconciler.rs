//! The per-workload control loop.
//!
//! Two phases: `WaitingForSupervisor` and `Active`. Each pass recomputes the
//! desired layer from scratch, fetches the observed plan fresh, and only
//! declares and restarts when the services differ. An unreachable supervisor
//! is not an error: the unit reports waiting and drops back to
//! `WaitingForSupervisor`.

use handoff_core::{
    Layer, LoopPhase, Plan, Supervisor, SupervisorError, UnitConfig, UnitState, UnitStatus,
    WorkloadKind,
};
use handoff_renderer::{setup_steps, Renderer, RestartPolicy, SetupStep, WorkloadProfile};

use crate::diff::diff_plan;
use crate::error::ReconcileError;

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new layer was declared and these services restarted.
    Applied { services: Vec<String> },
    /// Observed services already match the desired layer.
    Unchanged,
    /// The supervisor is unreachable; nothing was applied.
    Waiting,
}

impl ReconcileOutcome {
    pub fn is_waiting(&self) -> bool {
        matches!(self, ReconcileOutcome::Waiting)
    }
}

/// Control loop for one workload.
pub struct Reconciler<'r> {
    profile: &'static WorkloadProfile,
    renderer: &'r Renderer,
}

impl<'r> Reconciler<'r> {
    pub fn new(kind: WorkloadKind, renderer: &'r Renderer) -> Self {
        Self {
            profile: WorkloadProfile::of(kind),
            renderer,
        }
    }

    pub fn profile(&self) -> &'static WorkloadProfile {
        self.profile
    }

    /// Desired layer from current inputs only.
    pub fn desired_layer(
        &self,
        config: &UnitConfig,
        state: &UnitState,
    ) -> Result<Layer, ReconcileError> {
        Ok(self.renderer.desired_layer(config, &state.connection)?)
    }

    /// Run one pass and record the resulting phase and status in `state`.
    pub fn reconcile(
        &self,
        supervisor: &mut dyn Supervisor,
        config: &UnitConfig,
        state: &mut UnitState,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !supervisor.can_connect() {
            return Ok(self.wait(state));
        }

        if !state.setup_done {
            match self.setup(supervisor) {
                Ok(()) => state.setup_done = true,
                Err(err) if err.is_unreachable() => return Ok(self.wait(state)),
                Err(err) => return Err(err.into()),
            }
        }

        let desired = self.desired_layer(config, state)?;
        let observed = match supervisor.plan() {
            Ok(plan) => plan,
            Err(err) if err.is_unreachable() => return Ok(self.wait(state)),
            Err(err) => return Err(err.into()),
        };

        let diff = diff_plan(&observed, &desired)?;
        let changed = diff.as_ref().map(|d| d.services.clone()).unwrap_or_default();
        let mut services = changed.clone();
        for name in &state.pending_restart {
            if !services.contains(name) {
                services.push(name.clone());
            }
        }
        if services.is_empty() {
            tracing::debug!(workload = %self.profile.kind, "services unchanged");
            self.activate(state);
            return Ok(ReconcileOutcome::Unchanged);
        }
        match &diff {
            Some(diff) => {
                tracing::debug!(workload = %self.profile.kind, diff = %diff.unified_diff, "plan differs")
            }
            None => tracing::info!(
                workload = %self.profile.kind,
                services = ?services,
                "restarting services declared by an earlier pass"
            ),
        }

        if let Err(err) = self.apply(supervisor, &desired, &services) {
            let restored = self.roll_back(supervisor, &observed, &changed);
            // Whatever was not put back stays declared without running.
            let still_pending: Vec<String> = services
                .into_iter()
                .filter(|name| !restored.contains(name) || state.pending_restart.contains(name))
                .collect();
            state.pending_restart = still_pending;
            if err.is_unreachable() {
                return Ok(self.wait(state));
            }
            state.status = UnitStatus::Waiting(format!(
                "{} restart failed; previous services kept",
                self.profile.service
            ));
            return Err(err.into());
        }

        state.pending_restart.clear();
        tracing::info!(
            workload = %self.profile.kind,
            label = self.profile.layer_label,
            services = ?services,
            "declared updated layer and restarted services"
        );
        self.activate(state);
        Ok(ReconcileOutcome::Applied { services })
    }

    /// Push static resources and run setup commands. Safe to repeat.
    pub fn setup(&self, supervisor: &mut dyn Supervisor) -> Result<(), SupervisorError> {
        for step in setup_steps(self.profile.kind) {
            match step {
                SetupStep::Push { path, contents } => {
                    tracing::info!(%path, "pushing workload resource");
                    supervisor.push(&path, &contents)?;
                }
                SetupStep::Exec { argv } => {
                    tracing::info!(command = %argv.join(" "), "running setup command");
                    supervisor.exec(&argv)?;
                }
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        supervisor: &mut dyn Supervisor,
        desired: &Layer,
        services: &[String],
    ) -> Result<(), SupervisorError> {
        supervisor.add_layer(self.profile.layer_label, desired, true)?;
        match self.profile.restart {
            RestartPolicy::Restart => supervisor.restart(services),
            RestartPolicy::Replan => supervisor.replan(),
        }
    }

    /// Re-declare `changed` as they were before a failed restart. Returns the
    /// services that were put back; services new in this pass cannot be.
    fn roll_back(
        &self,
        supervisor: &mut dyn Supervisor,
        observed: &Plan,
        changed: &[String],
    ) -> Vec<String> {
        if changed.is_empty() {
            return Vec::new();
        }
        let Some(previous) = observed.restore_layer(changed) else {
            tracing::warn!(services = ?changed, "no previous definition to restore");
            return Vec::new();
        };
        match supervisor.add_layer(self.profile.layer_label, &previous, true) {
            Ok(()) => previous.services.into_keys().collect(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to restore previous services");
                Vec::new()
            }
        }
    }

    fn activate(&self, state: &mut UnitState) {
        state.phase = LoopPhase::Active;
        state.status = UnitStatus::Active;
    }

    fn wait(&self, state: &mut UnitState) -> ReconcileOutcome {
        tracing::info!(workload = %self.profile.kind, "supervisor not reachable; waiting");
        state.phase = LoopPhase::WaitingForSupervisor;
        state.setup_done = false;
        state.status = UnitStatus::Waiting(self.profile.waiting_message.to_string());
        ReconcileOutcome::Waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::memory::MemorySupervisor;
    use handoff_core::{ConnectionFact, Slot};

    fn pass(
        kind: WorkloadKind,
        sup: &mut MemorySupervisor,
        state: &mut UnitState,
    ) -> ReconcileOutcome {
        let renderer = Renderer::new().unwrap();
        Reconciler::new(kind, &renderer)
            .reconcile(sup, &UnitConfig::default_for(kind), state)
            .unwrap()
    }

    #[test]
    fn unreachable_supervisor_waits_without_error() {
        let mut sup = MemorySupervisor::unreachable();
        let mut state = UnitState::default();
        let outcome = pass(WorkloadKind::KeyValueStore, &mut sup, &mut state);
        assert_eq!(outcome, ReconcileOutcome::Waiting);
        assert_eq!(state.phase, LoopPhase::WaitingForSupervisor);
        assert_eq!(
            state.status,
            UnitStatus::Waiting("waiting for supervisor in workload container".to_string())
        );
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut sup = MemorySupervisor::new();
        let mut state = UnitState::default();
        let first = pass(WorkloadKind::KeyValueStore, &mut sup, &mut state);
        assert_eq!(
            first,
            ReconcileOutcome::Applied {
                services: vec!["keydb".to_string()]
            }
        );
        let second = pass(WorkloadKind::KeyValueStore, &mut sup, &mut state);
        assert_eq!(second, ReconcileOutcome::Unchanged);
        assert_eq!(sup.restart_count(), 1);
        assert_eq!(state.status, UnitStatus::Active);
    }

    #[test]
    fn setup_runs_once_per_supervisor_session() {
        let mut sup = MemorySupervisor::new();
        let mut state = UnitState::default();
        pass(WorkloadKind::WebFrontend, &mut sup, &mut state);
        pass(WorkloadKind::WebFrontend, &mut sup, &mut state);
        assert_eq!(sup.execs().len(), 1);
        assert!(sup.pushed("/webserver.py").is_some());

        sup.set_reachable(false);
        pass(WorkloadKind::WebFrontend, &mut sup, &mut state);
        assert!(!state.setup_done);
        sup.set_reachable(true);
        pass(WorkloadKind::WebFrontend, &mut sup, &mut state);
        assert_eq!(sup.execs().len(), 2, "setup repeats after the supervisor returns");
    }

    #[test]
    fn failed_restart_restores_previous_services() {
        let renderer = Renderer::new().unwrap();
        let reconciler = Reconciler::new(WorkloadKind::WebFrontend, &renderer);
        let config = UnitConfig::default_for(WorkloadKind::WebFrontend);
        let mut sup = MemorySupervisor::new();
        let mut state = UnitState::default();
        reconciler.reconcile(&mut sup, &config, &mut state).unwrap();
        let before = sup.declared().clone();

        state.connection = Slot::Set(ConnectionFact::new("0.0.0.42", 42).unwrap());
        sup.fail_restarts(true);
        let err = reconciler.reconcile(&mut sup, &config, &mut state).unwrap_err();

        assert!(matches!(err, ReconcileError::Supervisor(_)), "got: {err}");
        assert_eq!(sup.declared(), &before);
        assert!(state.status.is_waiting());
    }

    #[test]
    fn first_declare_with_failed_restart_is_restarted_later() {
        let renderer = Renderer::new().unwrap();
        let reconciler = Reconciler::new(WorkloadKind::KeyValueStore, &renderer);
        let config = UnitConfig::default_for(WorkloadKind::KeyValueStore);
        let mut sup = MemorySupervisor::new();
        let mut state = UnitState::default();

        sup.fail_restarts(true);
        reconciler.reconcile(&mut sup, &config, &mut state).unwrap_err();
        assert!(sup.declared().services.contains_key("keydb"));
        assert_eq!(state.pending_restart, ["keydb".to_string()]);
        assert!(state.status.is_waiting());

        // Still failing: the service stays owed a restart.
        reconciler.reconcile(&mut sup, &config, &mut state).unwrap_err();
        assert_eq!(state.pending_restart, ["keydb".to_string()]);

        sup.fail_restarts(false);
        let outcome = reconciler.reconcile(&mut sup, &config, &mut state).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                services: vec!["keydb".to_string()]
            }
        );
        assert_eq!(sup.restarts_of("keydb"), 1);
        assert!(state.pending_restart.is_empty());
        assert_eq!(state.status, UnitStatus::Active);

        let again = reconciler.reconcile(&mut sup, &config, &mut state).unwrap();
        assert_eq!(again, ReconcileOutcome::Unchanged);
    }

    #[test]
    fn restored_service_is_not_owed_a_restart() {
        let renderer = Renderer::new().unwrap();
        let reconciler = Reconciler::new(WorkloadKind::WebFrontend, &renderer);
        let config = UnitConfig::default_for(WorkloadKind::WebFrontend);
        let mut sup = MemorySupervisor::new();
        let mut state = UnitState::default();
        reconciler.reconcile(&mut sup, &config, &mut state).unwrap();

        state.connection = Slot::Set(ConnectionFact::new("0.0.0.42", 42).unwrap());
        sup.fail_restarts(true);
        reconciler.reconcile(&mut sup, &config, &mut state).unwrap_err();
        assert!(state.pending_restart.is_empty());

        sup.fail_restarts(false);
        let outcome = reconciler.reconcile(&mut sup, &config, &mut state).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                services: vec!["webserver".to_string()]
            }
        );
        assert_eq!(sup.restarts_of("webserver"), 2);
    }

    #[test]
    fn supervisor_lost_after_declare_leaves_restart_owed() {
        let renderer = Renderer::new().unwrap();
        let reconciler = Reconciler::new(WorkloadKind::KeyValueStore, &renderer);
        let config = UnitConfig::default_for(WorkloadKind::KeyValueStore);
        let mut sup = MemorySupervisor::new();
        let mut state = UnitState::default();

        sup.disconnect_after_layer();
        let outcome = reconciler.reconcile(&mut sup, &config, &mut state).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Waiting);
        assert_eq!(state.phase, LoopPhase::WaitingForSupervisor);
        assert_eq!(state.pending_restart, ["keydb".to_string()]);
        assert_eq!(sup.restart_count(), 0);

        sup.set_reachable(true);
        let outcome = reconciler.reconcile(&mut sup, &config, &mut state).unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));
        assert_eq!(sup.restarts_of("keydb"), 1);
        assert!(state.pending_restart.is_empty());
    }
}
