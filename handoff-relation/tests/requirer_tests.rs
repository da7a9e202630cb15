//! Requirer protocol: Ready/Broken mapping and the single-relation rule.

use handoff_core::memory::{MemoryRelations, ReadFailure};
use handoff_core::{AppName, ConnectionFact, Databag, FactError, RelationId};
use handoff_relation::{BrokenReason, Requirer, RequirerError, Signal, DB_ENDPOINT};
use rstest::rstest;

fn bag(pairs: &[(&str, &str)]) -> Databag {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn related_world(remote: Databag) -> (MemoryRelations, AppName, RelationId) {
    let kv = AppName::from("keydb");
    let web = AppName::from("webserver");
    let world = MemoryRelations::new();
    let id = world.relate(DB_ENDPOINT, &kv, &web);
    world.set_bag(id, &kv, remote);
    (world, web, id)
}

#[test]
fn complete_bag_raises_ready() {
    let (world, web, id) = related_world(bag(&[("host", "0.0.0.42"), ("port", "42")]));
    let signal = Requirer::new(DB_ENDPOINT)
        .on_relation_changed(&world.view(&web), id)
        .unwrap();
    assert_eq!(
        signal,
        Signal::Ready {
            relation: id,
            fact: ConnectionFact::new("0.0.0.42", 42).unwrap(),
        }
    );
}

#[rstest]
#[case::empty(&[], FactError::MissingKey("host"))]
#[case::port_missing(&[("host", "x")], FactError::MissingKey("port"))]
#[case::host_missing(&[("port", "42")], FactError::MissingKey("host"))]
#[case::port_out_of_range(&[("host", "x"), ("port", "70000")], FactError::PortOutOfRange(70000))]
#[case::port_zero(&[("host", "x"), ("port", "0")], FactError::PortOutOfRange(0))]
#[case::empty_host(&[("host", ""), ("port", "42")], FactError::EmptyHost)]
fn incomplete_bag_raises_broken(#[case] pairs: &[(&str, &str)], #[case] expected: FactError) {
    let (world, web, id) = related_world(bag(pairs));
    let signal = Requirer::new(DB_ENDPOINT)
        .on_relation_changed(&world.view(&web), id)
        .expect("parse failures map to Broken, never to an error");
    assert_eq!(
        signal,
        Signal::Broken {
            relation: id,
            reason: BrokenReason::Fact(expected),
        }
    );
}

#[test]
fn non_integer_port_raises_broken() {
    let (world, web, id) = related_world(bag(&[("host", "x"), ("port", "notanumber")]));
    let signal = Requirer::new(DB_ENDPOINT)
        .on_relation_changed(&world.view(&web), id)
        .unwrap();
    assert!(matches!(
        signal,
        Signal::Broken {
            reason: BrokenReason::Fact(FactError::MalformedPort { .. }),
            ..
        }
    ));
}

#[test]
fn read_timeout_raises_broken() {
    let (world, web, id) = related_world(bag(&[("host", "x"), ("port", "1")]));
    world.fail_reads(id, ReadFailure::Timeout);
    let signal = Requirer::new(DB_ENDPOINT)
        .on_relation_changed(&world.view(&web), id)
        .unwrap();
    assert_eq!(
        signal,
        Signal::Broken {
            relation: id,
            reason: BrokenReason::Timeout,
        }
    );
}

#[test]
fn store_unavailable_propagates() {
    let (world, web, id) = related_world(bag(&[("host", "x"), ("port", "1")]));
    world.fail_reads(id, ReadFailure::Unavailable);
    let err = Requirer::new(DB_ENDPOINT)
        .on_relation_changed(&world.view(&web), id)
        .unwrap_err();
    assert!(matches!(err, RequirerError::Bag(_)), "got: {err}");
}

#[test]
fn two_relations_fail_every_accessor() {
    let (world, web, first) = related_world(bag(&[("host", "x"), ("port", "1")]));
    let second = world.relate(DB_ENDPOINT, &AppName::from("keydb-b"), &web);
    let store = world.view(&web);
    let requirer = Requirer::new(DB_ENDPOINT);

    for relation in [first, second] {
        let err = requirer.on_relation_changed(&store, relation).unwrap_err();
        assert!(err.is_too_many_relations(), "got: {err}");
    }
    assert!(requirer.relation(&store).unwrap_err().is_too_many_relations());
    assert!(requirer.connection(&store).unwrap_err().is_too_many_relations());
    assert!(requirer.ready(&store).unwrap_err().is_too_many_relations());
}

#[test]
fn no_relation_is_not_ready() {
    let world = MemoryRelations::new();
    let store = world.view(&AppName::from("webserver"));
    let requirer = Requirer::new(DB_ENDPOINT);
    assert_eq!(requirer.relation(&store).unwrap(), None);
    assert_eq!(
        requirer.connection(&store).unwrap(),
        Err(BrokenReason::NotRelated)
    );
    assert!(!requirer.ready(&store).unwrap());
}

#[test]
fn relation_broken_signals_departure() {
    let signal = Requirer::new(DB_ENDPOINT).on_relation_broken(RelationId(7));
    assert_eq!(signal.relation(), RelationId(7));
    assert_eq!(signal.fact(), None);
}

#[test]
fn requirer_never_writes() {
    let (world, web, id) = related_world(bag(&[("host", "x"), ("port", "1")]));
    Requirer::new(DB_ENDPOINT)
        .on_relation_changed(&world.view(&web), id)
        .unwrap();
    assert_eq!(world.writes(), 0);
    assert!(world.bag(id, &web).is_empty());
}
