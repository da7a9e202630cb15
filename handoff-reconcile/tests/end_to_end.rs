//! Both workloads driven through `Unit::dispatch` over in-memory
//! collaborators.

use handoff_core::memory::{AppRelations, MemoryRelations, MemorySupervisor};
use handoff_core::{
    AppName, ConnectionFact, Databag, LifecycleEvent, LoopPhase, MemoryStateStore, RelationId,
    Slot, StateStore, Supervisor, UnitConfig, UnitName, UnitStatus, WorkloadKind,
};
use handoff_reconcile::{DispatchReport, ReconcileError, ReconcileOutcome, Unit, UnitContext};
use handoff_relation::{ProviderError, RequirerError, DB_ENDPOINT};
use handoff_renderer::Renderer;
use rstest::rstest;

struct Side {
    name: UnitName,
    config: UnitConfig,
    host: Option<String>,
    leader: bool,
    supervisor: MemorySupervisor,
    relations: AppRelations,
    store: MemoryStateStore,
}

impl Side {
    fn new(world: &MemoryRelations, name: &str, config: UnitConfig) -> Self {
        let name = UnitName::from(name);
        Self {
            relations: world.view(&name.app()),
            name,
            config,
            host: None,
            leader: true,
            supervisor: MemorySupervisor::new(),
            store: MemoryStateStore::default(),
        }
    }

    fn dispatch(
        &mut self,
        renderer: &Renderer,
        event: LifecycleEvent,
    ) -> Result<DispatchReport, ReconcileError> {
        let unit = Unit::new(self.name.clone(), self.config.clone(), renderer)
            .with_host(self.host.clone());
        let mut ctx = UnitContext {
            supervisor: &mut self.supervisor,
            relations: &mut self.relations,
            leadership: &self.leader,
            store: &mut self.store,
        };
        unit.dispatch(&mut ctx, event)
    }

    fn command(&self, service: &str) -> String {
        self.supervisor.declared().services[service].command.clone()
    }

    fn env(&self, key: &str) -> Option<String> {
        self.supervisor.declared().services["webserver"]
            .environment
            .as_ref()
            .and_then(|env| env.get(key).cloned())
            .flatten()
    }
}

fn keydb_config(yaml: &str) -> UnitConfig {
    UnitConfig::from_yaml(WorkloadKind::KeyValueStore, yaml).expect("keydb config")
}

fn web_config(key: &str) -> UnitConfig {
    UnitConfig::from_yaml(WorkloadKind::WebFrontend, &format!("webserver-key: {key}"))
        .expect("web config")
}

fn apps() -> (AppName, AppName) {
    (AppName::from("keydb"), AppName::from("webserver"))
}

fn bag(host: &str, port: &str) -> Databag {
    Databag::from([
        ("host".to_string(), host.to_string()),
        ("port".to_string(), port.to_string()),
    ])
}

fn changed(relation: RelationId) -> LifecycleEvent {
    LifecycleEvent::RelationChanged { relation }
}

// ---------------------------------------------------------------------------
// 1. Key-value store
// ---------------------------------------------------------------------------

#[test]
fn keydb_port_70_declares_exact_command_and_publishes() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut kv = Side::new(&world, "keydb/0", keydb_config("port: 70\nappendonly: \"no\"\n"));
    kv.host = Some("10.1.2.3".to_string());

    let report = kv.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    assert_eq!(report.phase, LoopPhase::Active);
    assert_eq!(report.status, UnitStatus::Active);
    assert_eq!(
        kv.command("keydb"),
        "keydb-server /etc/keydb/keydb.conf --port 70 --appendonly no"
    );

    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    let report = kv
        .dispatch(&renderer, LifecycleEvent::RelationCreated { relation: id })
        .unwrap();
    assert!(report.bag_changed);
    assert_eq!(world.bag(id, &kv_app), bag("10.1.2.3", "70"));
}

#[test]
fn unchanged_inputs_restart_nothing() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let mut kv = Side::new(&world, "keydb/0", keydb_config("port: 70"));
    kv.host = Some("10.1.2.3".to_string());

    kv.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    assert_eq!(kv.supervisor.restart_count(), 1);

    let report = kv.dispatch(&renderer, LifecycleEvent::ConfigChanged).unwrap();
    assert_eq!(report.handled[0].reconcile, Some(ReconcileOutcome::Unchanged));
    kv.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    assert_eq!(kv.supervisor.restart_count(), 1);
}

#[test]
fn config_change_restarts_and_republishes() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut kv = Side::new(&world, "keydb/0", keydb_config("port: 70"));
    kv.host = Some("10.1.2.3".to_string());
    kv.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    kv.dispatch(&renderer, LifecycleEvent::RelationCreated { relation: id })
        .unwrap();

    kv.config = keydb_config("port: 71\nrequirepass: pw\n");
    let report = kv.dispatch(&renderer, LifecycleEvent::ConfigChanged).unwrap();

    assert_eq!(report.restarted(), vec!["keydb".to_string()]);
    assert_eq!(
        kv.command("keydb"),
        "keydb-server /etc/keydb/keydb.conf --port 71 --appendonly no--requirepass pw"
    );
    assert_eq!(world.bag(id, &kv_app), bag("10.1.2.3", "71"));
}

#[test]
fn relation_created_before_endpoint_known_is_deferred_then_written_once() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut kv = Side::new(&world, "keydb/0", keydb_config("port: 70"));
    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);

    let report = kv
        .dispatch(&renderer, LifecycleEvent::RelationCreated { relation: id })
        .unwrap();
    assert!(report.handled[0].deferred);
    assert_eq!(report.pending, 1);
    assert_eq!(world.writes(), 0);

    kv.host = Some("10.1.2.3".to_string());
    let report = kv.dispatch(&renderer, LifecycleEvent::ConfigChanged).unwrap();
    assert_eq!(report.pending, 0);
    assert_eq!(report.handled[0].id, handoff_core::EventId(0), "original identity kept");
    assert_eq!(world.writes(), 1);
    assert_eq!(world.bag(id, &kv_app), bag("10.1.2.3", "70"));

    kv.dispatch(&renderer, LifecycleEvent::ConfigChanged).unwrap();
    assert_eq!(world.writes(), 1);
}

#[test]
fn non_leader_publish_fails_and_leaves_bag_untouched() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut kv = Side::new(&world, "keydb/1", keydb_config("port: 70"));
    kv.host = Some("10.1.2.4".to_string());
    kv.leader = false;
    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);

    let err = kv
        .dispatch(&renderer, LifecycleEvent::RelationCreated { relation: id })
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Provider(ProviderError::PermissionDenied { .. })
    ));
    assert!(world.bag(id, &kv_app).is_empty());
    assert!(kv.store.load().unwrap().deferred.is_empty(), "failed event is not retried");
}

// ---------------------------------------------------------------------------
// 2. Web front-end
// ---------------------------------------------------------------------------

#[test]
fn ready_signal_sets_environment_with_one_restart() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));

    web.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    assert_eq!(web.env("DB_HOST"), None);
    let restarts_before = web.supervisor.restart_count();

    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    world.set_bag(id, &kv_app, bag("0.0.0.42", "42"));
    web.dispatch(&renderer, changed(id)).unwrap();

    assert_eq!(web.env("DB_HOST").as_deref(), Some("0.0.0.42"));
    assert_eq!(web.env("DB_PORT").as_deref(), Some("42"));
    assert_eq!(web.supervisor.restart_count(), restarts_before + 1);
    assert_eq!(
        web.store.load().unwrap().connection,
        Slot::Set(ConnectionFact::new("0.0.0.42", 42).unwrap())
    );
}

#[rstest]
#[case::port_not_a_number("x", "notanumber")]
#[case::port_zero("x", "0")]
#[case::port_too_large("x", "65536")]
#[case::empty_host("", "70")]
fn broken_data_still_runs_with_placeholders(#[case] host: &str, #[case] port: &str) {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    world.set_bag(id, &kv_app, bag(host, port));

    web.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    let report = web.dispatch(&renderer, changed(id)).unwrap();

    assert_eq!(report.status, UnitStatus::Active);
    assert!(web.supervisor.declared().services.contains_key("webserver"));
    assert_eq!(web.env("DB_HOST"), None);
    assert_eq!(web.env("KEY").as_deref(), Some("k"));
}

#[test]
fn relation_broken_clears_connection() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    world.set_bag(id, &kv_app, bag("0.0.0.42", "42"));
    web.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    web.dispatch(&renderer, changed(id)).unwrap();

    world.remove(id);
    let report = web
        .dispatch(&renderer, LifecycleEvent::RelationBroken { relation: id })
        .unwrap();

    assert_eq!(report.restarted(), vec!["webserver".to_string()]);
    assert_eq!(web.env("DB_HOST"), None);
    assert_eq!(web.store.load().unwrap().connection, Slot::Unset);
}

#[test]
fn relation_broken_while_waiting_is_not_left_queued() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    web.supervisor.set_reachable(false);
    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    world.set_bag(id, &kv_app, bag("0.0.0.42", "42"));
    assert_eq!(web.dispatch(&renderer, changed(id)).unwrap().pending, 1);

    world.remove(id);
    let report = web
        .dispatch(&renderer, LifecycleEvent::RelationBroken { relation: id })
        .unwrap();

    let broken = report
        .handled
        .iter()
        .find(|h| matches!(h.event, LifecycleEvent::RelationBroken { .. }))
        .expect("broken event handled");
    assert!(!broken.deferred);
    assert_eq!(report.pending, 0);
    assert!(web.store.load().unwrap().deferred.is_empty());
    assert_eq!(web.store.load().unwrap().connection, Slot::Unset);
}

#[test]
fn signal_while_supervisor_unreachable_is_deferred_until_ready() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    web.supervisor.set_reachable(false);
    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    world.set_bag(id, &kv_app, bag("0.0.0.42", "42"));

    let report = web.dispatch(&renderer, changed(id)).unwrap();
    assert_eq!(report.pending, 1);
    assert_eq!(report.phase, LoopPhase::WaitingForSupervisor);
    assert_eq!(web.supervisor.restart_count(), 0);

    web.supervisor.set_reachable(true);
    let report = web.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    assert_eq!(report.pending, 0);
    assert_eq!(report.phase, LoopPhase::Active);
    assert_eq!(web.env("DB_HOST").as_deref(), Some("0.0.0.42"));
    assert_eq!(web.supervisor.restart_count(), 1);
}

#[test]
fn supervisor_ready_while_unreachable_reports_waiting() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    web.supervisor.set_reachable(false);

    let report = web.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    assert_eq!(report.phase, LoopPhase::WaitingForSupervisor);
    assert_eq!(
        report.status,
        UnitStatus::Waiting("pending webserver restart; waiting for workload container".into())
    );
    assert_eq!(report.pending, 0);
}

#[test]
fn failed_restart_keeps_previous_spec_and_waits() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    web.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    let before = web.supervisor.declared().clone();

    let id = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    world.set_bag(id, &kv_app, bag("0.0.0.42", "42"));
    web.supervisor.fail_restarts(true);
    let err = web.dispatch(&renderer, changed(id)).unwrap_err();

    assert!(matches!(err, ReconcileError::Supervisor(_)), "got: {err}");
    assert_eq!(web.supervisor.declared(), &before);
    assert!(web.store.load().unwrap().status.is_waiting());

    web.supervisor.fail_restarts(false);
    let report = web.dispatch(&renderer, LifecycleEvent::ConfigChanged).unwrap();
    assert_eq!(report.restarted(), vec!["webserver".to_string()]);
    assert_eq!(report.status, UnitStatus::Active);
    assert_eq!(web.env("DB_HOST").as_deref(), Some("0.0.0.42"));
    assert_eq!(web.supervisor.restarts_of("webserver"), 2);
}

#[test]
fn first_declare_that_fails_to_start_is_started_on_retry() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let mut kv = Side::new(&world, "keydb/0", keydb_config("port: 70"));
    kv.supervisor.fail_restarts(true);

    let err = kv.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap_err();
    assert!(matches!(err, ReconcileError::Supervisor(_)), "got: {err}");
    assert!(kv.supervisor.declared().services.contains_key("keydb"));
    assert_eq!(kv.supervisor.restart_count(), 0);
    let saved = kv.store.load().unwrap();
    assert_eq!(saved.pending_restart, ["keydb".to_string()]);
    assert!(saved.status.is_waiting());

    kv.supervisor.fail_restarts(false);
    let report = kv.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    assert_eq!(report.restarted(), vec!["keydb".to_string()]);
    assert_eq!(report.status, UnitStatus::Active);
    assert_eq!(kv.supervisor.restarts_of("keydb"), 1);
    assert_eq!(
        kv.command("keydb"),
        "keydb-server /etc/keydb/keydb.conf --port 70 --appendonly no"
    );
    assert!(kv.store.load().unwrap().pending_restart.is_empty());
}

#[test]
fn two_relations_fail_with_too_many() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    let first = world.relate(DB_ENDPOINT, &kv_app, &web_app);
    let second = world.relate(DB_ENDPOINT, &AppName::from("keydb-b"), &web_app);

    for relation in [second, first] {
        let err = web.dispatch(&renderer, changed(relation)).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Requirer(RequirerError::TooManyRelations { count: 2, .. })
        ));
    }
}

#[test]
fn state_saved_after_every_handled_event() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let mut web = Side::new(&world, "webserver/0", web_config("k"));
    web.dispatch(&renderer, LifecycleEvent::SupervisorReady).unwrap();
    web.dispatch(&renderer, LifecycleEvent::ConfigChanged).unwrap();
    assert_eq!(web.store.saves(), 2);
    assert_eq!(web.store.last_saved().map(|s| s.next_event_id), Some(2));
}

// ---------------------------------------------------------------------------
// 3. Shared supervisor: minimal diff
// ---------------------------------------------------------------------------

#[test]
fn changing_one_workload_never_restarts_the_other() {
    let renderer = Renderer::new().unwrap();
    let world = MemoryRelations::new();
    let (kv_app, web_app) = apps();
    let mut supervisor = MemorySupervisor::new();
    let mut kv_rel = world.view(&kv_app);
    let mut web_rel = world.view(&web_app);
    let mut kv_store = MemoryStateStore::default();
    let mut web_store = MemoryStateStore::default();

    let run = |sup: &mut MemorySupervisor,
                   rel: &mut AppRelations,
                   store: &mut MemoryStateStore,
                   name: &str,
                   config: UnitConfig,
                   event: LifecycleEvent| {
        let unit = Unit::new(UnitName::from(name), config, &renderer)
            .with_host(Some("10.1.2.3".to_string()));
        let mut ctx = UnitContext {
            supervisor: sup,
            relations: rel,
            leadership: &true,
            store,
        };
        unit.dispatch(&mut ctx, event).unwrap()
    };

    run(&mut supervisor, &mut kv_rel, &mut kv_store, "keydb/0", keydb_config("port: 70"), LifecycleEvent::SupervisorReady);
    run(&mut supervisor, &mut web_rel, &mut web_store, "webserver/0", web_config("a"), LifecycleEvent::SupervisorReady);
    assert_eq!(supervisor.restarts_of("keydb"), 1);
    assert_eq!(supervisor.restarts_of("webserver"), 1);

    run(&mut supervisor, &mut web_rel, &mut web_store, "webserver/0", web_config("b"), LifecycleEvent::ConfigChanged);
    assert_eq!(supervisor.restarts_of("keydb"), 1, "web credential change must not restart keydb");
    assert_eq!(supervisor.restarts_of("webserver"), 2);

    run(&mut supervisor, &mut kv_rel, &mut kv_store, "keydb/0", keydb_config("port: 71"), LifecycleEvent::ConfigChanged);
    assert_eq!(supervisor.restarts_of("keydb"), 2);
    assert_eq!(supervisor.restarts_of("webserver"), 2, "keydb change must not restart webserver");
    assert!(supervisor.can_connect());
}
