//! The single event entry point of a unit.
//!
//! Every lifecycle event goes through [`Unit::dispatch`]: the new event is
//! queued behind any deferred ones, then the queue is drained in id order.
//! Each event runs the protocol step for the unit's role followed by the
//! reconcile step. Events that cannot make progress yet stay queued under
//! their original id and are retried on the next dispatch.

use handoff_core::{
    EventId, Leadership, LifecycleEvent, LoopPhase, RelationHandle, RelationId, RelationStore,
    Role, Slot, StateStore, Supervisor, UnitConfig, UnitName, UnitState, UnitStatus,
};
use handoff_relation::{Offer, Provider, Requirer, Signal, DB_ENDPOINT};
use handoff_renderer::Renderer;

use crate::error::ReconcileError;
use crate::reconciler::{ReconcileOutcome, Reconciler};

/// Collaborators a unit talks to while handling events.
pub struct UnitContext<'a> {
    pub supervisor: &'a mut dyn Supervisor,
    pub relations: &'a mut dyn RelationStore,
    pub leadership: &'a dyn Leadership,
    pub store: &'a mut dyn StateStore,
}

/// What happened to one event during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledEvent {
    pub id: EventId,
    pub event: LifecycleEvent,
    /// Left in the queue for a later dispatch.
    pub deferred: bool,
    pub signal: Option<Signal>,
    pub offers: Vec<(RelationId, Offer)>,
    /// `None` when the loop was not run for this event.
    pub reconcile: Option<ReconcileOutcome>,
}

/// Summary of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub unit: UnitName,
    pub handled: Vec<HandledEvent>,
    pub phase: LoopPhase,
    pub status: UnitStatus,
    /// Events still queued afterwards.
    pub pending: usize,
    /// This unit changed its application's relation data.
    pub bag_changed: bool,
}

impl DispatchReport {
    /// Services restarted across every handled event.
    pub fn restarted(&self) -> Vec<String> {
        self.handled
            .iter()
            .filter_map(|h| match &h.reconcile {
                Some(ReconcileOutcome::Applied { services }) => Some(services.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// One unit of a workload.
pub struct Unit<'r> {
    name: UnitName,
    config: UnitConfig,
    endpoint: String,
    host: Option<String>,
    reconciler: Reconciler<'r>,
}

impl<'r> Unit<'r> {
    pub fn new(name: UnitName, config: UnitConfig, renderer: &'r Renderer) -> Self {
        let reconciler = Reconciler::new(config.kind(), renderer);
        Self {
            name,
            config,
            endpoint: DB_ENDPOINT.to_string(),
            host: None,
            reconciler,
        }
    }

    /// The address this unit serves on, once known.
    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn name(&self) -> &UnitName {
        &self.name
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler<'r> {
        &self.reconciler
    }

    fn role(&self) -> Role {
        self.config.kind().role()
    }

    fn provider(&self) -> Provider {
        Provider::new(
            self.endpoint.clone(),
            self.host.clone(),
            self.config.served_port(),
        )
    }

    fn requirer(&self) -> Requirer {
        Requirer::new(self.endpoint.clone())
    }

    /// Handle `event`, replaying deferred events first.
    ///
    /// State is saved after every handled event. An event that fails is
    /// dropped from the queue and its error returned; events behind it stay
    /// queued.
    pub fn dispatch(
        &self,
        ctx: &mut UnitContext<'_>,
        event: LifecycleEvent,
    ) -> Result<DispatchReport, ReconcileError> {
        let mut state = ctx.store.load()?;
        let id = state.allocate_event_id();
        if !state.deferred.defer(id, event.clone()) {
            tracing::debug!(unit = %self.name, %event, "event already queued");
        }

        let mut handled = Vec::new();
        let was_waiting = state.phase == LoopPhase::WaitingForSupervisor;
        self.drain(ctx, &mut state, &mut handled)?;
        if was_waiting && state.phase == LoopPhase::Active && !state.deferred.is_empty() {
            tracing::debug!(unit = %self.name, "supervisor active; replaying deferred events");
            self.drain(ctx, &mut state, &mut handled)?;
        }

        let bag_changed = handled
            .iter()
            .any(|h| h.offers.iter().any(|(_, offer)| offer.wrote()));
        Ok(DispatchReport {
            unit: self.name.clone(),
            handled,
            phase: state.phase,
            status: state.status.clone(),
            pending: state.deferred.len(),
            bag_changed,
        })
    }

    /// Handle every queued event once, in id order.
    fn drain(
        &self,
        ctx: &mut UnitContext<'_>,
        state: &mut UnitState,
        handled: &mut Vec<HandledEvent>,
    ) -> Result<(), ReconcileError> {
        for pending in state.deferred.pending() {
            // An earlier broken relation may have dropped this one.
            if !state.deferred.contains(pending.id) {
                continue;
            }
            let span = tracing::info_span!(
                "event",
                unit = %self.name,
                id = %pending.id,
                event = %pending.event
            );
            let _enter = span.enter();

            match self.handle(ctx, state, pending.id, &pending.event) {
                Ok(result) => {
                    if result.deferred {
                        tracing::info!("deferred");
                    } else {
                        state.deferred.complete(pending.id);
                    }
                    ctx.store.save(state)?;
                    handled.push(result);
                }
                Err(err) => {
                    tracing::error!(error = %err, "event failed");
                    state.deferred.complete(pending.id);
                    ctx.store.save(state)?;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn handle(
        &self,
        ctx: &mut UnitContext<'_>,
        state: &mut UnitState,
        id: EventId,
        event: &LifecycleEvent,
    ) -> Result<HandledEvent, ReconcileError> {
        let mut result = HandledEvent {
            id,
            event: event.clone(),
            deferred: false,
            signal: None,
            offers: Vec::new(),
            reconcile: None,
        };

        match self.role() {
            Role::Provider => self.provider_step(ctx, event, &mut result)?,
            Role::Requirer => self.requirer_step(ctx, state, event, &mut result)?,
        }
        if let LifecycleEvent::RelationBroken { relation } = event {
            state.deferred.forget_relation(*relation);
        }

        let run_loop =
            state.phase == LoopPhase::Active || *event == LifecycleEvent::SupervisorReady;
        if run_loop {
            let outcome = self
                .reconciler
                .reconcile(&mut *ctx.supervisor, &self.config, state)?;
            if outcome.is_waiting() && result.signal.is_some() {
                result.deferred = true;
            }
            result.reconcile = Some(outcome);
        } else if result.signal.is_some() {
            // Connection recorded; the restart waits for the supervisor.
            result.deferred = true;
        }
        // A broken relation drops its own queue entry.
        result.deferred &= state.deferred.contains(id);
        Ok(result)
    }

    fn provider_step(
        &self,
        ctx: &mut UnitContext<'_>,
        event: &LifecycleEvent,
        result: &mut HandledEvent,
    ) -> Result<(), ReconcileError> {
        let provider = self.provider();
        match event {
            LifecycleEvent::RelationCreated { relation } => {
                let Some(handle) = self.find_relation(&*ctx.relations, *relation)? else {
                    tracing::debug!("relation already gone; nothing to offer");
                    return Ok(());
                };
                let offer =
                    provider.on_relation_created(&handle, &mut *ctx.relations, ctx.leadership)?;
                result.deferred = offer == Offer::Deferred;
                result.offers.push((*relation, offer));
            }
            LifecycleEvent::ConfigChanged => {
                result.offers = provider.refresh(&mut *ctx.relations, ctx.leadership)?;
            }
            LifecycleEvent::RelationBroken { relation } => {
                if ctx.leadership.is_leader()
                    && provider.retract(*relation, &mut *ctx.relations, ctx.leadership)?
                {
                    result.offers.push((*relation, Offer::Retracted));
                }
            }
            LifecycleEvent::RelationChanged { .. } | LifecycleEvent::SupervisorReady => {}
        }
        Ok(())
    }

    fn requirer_step(
        &self,
        ctx: &mut UnitContext<'_>,
        state: &mut UnitState,
        event: &LifecycleEvent,
        result: &mut HandledEvent,
    ) -> Result<(), ReconcileError> {
        let requirer = self.requirer();
        let signal = match event {
            LifecycleEvent::RelationChanged { relation } => {
                requirer.on_relation_changed(&*ctx.relations, *relation)?
            }
            LifecycleEvent::RelationBroken { relation } => requirer.on_relation_broken(*relation),
            _ => return Ok(()),
        };
        state.connection = match signal.fact() {
            Some(fact) => Slot::Set(fact.clone()),
            None => Slot::Unset,
        };
        tracing::info!(connection = ?state.connection.as_option(), "connection updated");
        result.signal = Some(signal);
        Ok(())
    }

    fn find_relation(
        &self,
        relations: &dyn RelationStore,
        relation: RelationId,
    ) -> Result<Option<RelationHandle>, ReconcileError> {
        Ok(relations
            .relations(&self.endpoint)?
            .into_iter()
            .find(|h| h.id == relation))
    }
}
