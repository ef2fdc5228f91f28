// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client/broker integration scenarios over the in-process loopback hub.

use crossbeam::channel::unbounded;
use datapond::{DataPool, Error, LoopbackHub, PoolConfig, Role};
use std::time::{Duration, Instant};

fn hub_with_broker() -> (LoopbackHub, DataPool) {
    let hub = LoopbackHub::new();
    let broker = DataPool::new(hub.server("broker").unwrap()).unwrap();
    assert_eq!(broker.role(), Role::Server);
    (hub, broker)
}

fn client(hub: &LoopbackHub, identity: &str) -> DataPool {
    let pool = DataPool::new(hub.client(identity).unwrap()).unwrap();
    assert_eq!(pool.role(), Role::Client);
    pool
}

#[test]
fn ephemeral_element_round_trip() {
    let (hub, _broker) = hub_with_broker();
    let pool = client(&hub, "fusion-service");

    let speed = pool.create_element("vehicle/speed", false, false).unwrap();
    assert!(speed.get_data().unwrap().is_empty());

    speed.set_data(b"42").unwrap();
    assert_eq!(speed.get_data().unwrap(), b"42");

    // Byte-exact for arbitrary payloads.
    let blob: Vec<u8> = (0..4096).map(|_| fastrand::u8(..)).collect();
    speed.set_data(&blob).unwrap();
    assert_eq!(speed.get_data().unwrap(), blob);
}

#[test]
fn global_element_cross_client_pubsub() {
    let (hub, _broker) = hub_with_broker();
    let publisher = client(&hub, "client-a");
    let subscriber = client(&hub, "client-b");

    publisher
        .create_element("crossing/signal", true, false)
        .unwrap();

    // Visible to the other client before any write, with an empty value.
    let seen = subscriber.get_element("crossing/signal", true).unwrap();
    assert!(seen.get_data().unwrap().is_empty());

    let (tx, rx) = unbounded::<Vec<u8>>();
    let handle = seen.add_listener(move |value| {
        tx.send(value.to_vec()).unwrap();
    })
    .unwrap();

    let signal = publisher.get_element("crossing/signal", true).unwrap();
    signal.notify(Some(b"RED")).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"RED");

    // Fan-out stops after the listener is removed.
    seen.remove_listener(handle).unwrap();
    signal.notify(Some(b"GREEN")).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(matches!(seen.remove_listener(handle), Err(Error::NotFound)));
}

#[test]
fn notify_replay_delivers_stored_value() {
    let (hub, _broker) = hub_with_broker();
    let publisher = client(&hub, "client-a");
    let subscriber = client(&hub, "client-b");

    publisher.create_element("map/version", true, false).unwrap();
    let watched = subscriber.get_element("map/version", true).unwrap();

    let (tx, rx) = unbounded::<Vec<u8>>();
    watched
        .add_listener(move |value| {
            tx.send(value.to_vec()).unwrap();
        })
        .unwrap();

    // Replay before any write delivers empty.
    let element = publisher.get_element("map/version", true).unwrap();
    element.notify(None).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"");

    // Replay after a write re-delivers the stored value exactly.
    element.set_data(b"odr-1.7/build-249").unwrap();
    element.notify(None).unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        b"odr-1.7/build-249"
    );
}

#[test]
fn remove_requires_creator_identity() {
    let (hub, _broker) = hub_with_broker();
    let creator = client(&hub, "client-a");
    let intruder = client(&hub, "client-c");

    creator.create_element("lane-model", true, false).unwrap();

    assert!(matches!(
        intruder.remove_element("lane-model", true),
        Err(Error::NotAuthorized)
    ));
    assert!(intruder.get_element("lane-model", true).is_ok());

    creator.remove_element("lane-model", true).unwrap();
    assert!(matches!(
        creator.get_element("lane-model", true),
        Err(Error::NotFound)
    ));
}

#[test]
fn get_unknown_element_fails_fast() {
    let (hub, _broker) = hub_with_broker();
    let pool = client(&hub, "client-a");

    let start = Instant::now();
    let result = pool.get_element("never-created", true);
    assert!(matches!(result, Err(Error::NotFound)));
    // A NotFound answer is a reply, not a timeout.
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn unresponsive_broker_times_out() {
    let hub = LoopbackHub::new();
    // A server endpoint exists but no store serves requests on it.
    let _mute = hub.server("broker").unwrap();

    let config = PoolConfig::default().with_reply_timeout(Duration::from_millis(100));
    let pool = DataPool::with_config(hub.client("client-a").unwrap(), config).unwrap();

    let start = Instant::now();
    let result = pool.get_element("anything", true);
    assert!(matches!(result, Err(Error::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn disconnected_broker_is_unavailable() {
    let (hub, broker) = hub_with_broker();
    let pool = client(&hub, "client-a");

    let speed = pool.create_element("vehicle/speed", false, false).unwrap();
    speed.set_data(b"42").unwrap();

    hub.disconnect("broker").unwrap();
    drop(broker);

    // Ephemeral data is untouched by the broker going away.
    assert_eq!(speed.get_data().unwrap(), b"42");
    speed.set_data(b"43").unwrap();

    // Remote scopes are out of reach.
    assert!(matches!(
        pool.get_element("anything", true),
        Err(Error::TransportUnavailable)
    ));
    // Even an ephemeral create needs the broker for its existence check.
    assert!(matches!(
        pool.create_element("vehicle/yaw", false, false),
        Err(Error::TransportUnavailable)
    ));
}

#[test]
fn broker_restart_loses_persistent_state() {
    let (hub, broker) = hub_with_broker();
    let pool = client(&hub, "client-a");

    pool.create_element("crossing/signal", true, false)
        .unwrap()
        .set_data(b"RED")
        .unwrap();
    pool.create_element("odometer", false, true)
        .unwrap()
        .set_data(b"120350")
        .unwrap();

    // "Restart": a fresh broker process with empty ponds.
    hub.disconnect("broker").unwrap();
    drop(broker);
    let restarted = LoopbackHub::new();
    let _broker = DataPool::new(restarted.server("broker").unwrap()).unwrap();
    let pool = DataPool::new(restarted.client("client-a").unwrap()).unwrap();

    assert!(matches!(
        pool.get_element("crossing/signal", true),
        Err(Error::NotFound)
    ));
    assert!(matches!(
        pool.get_element("odometer", false),
        Err(Error::NotFound)
    ));
}

#[test]
fn ephemeral_scope_is_isolated_per_client() {
    let (hub, _broker) = hub_with_broker();
    let owner = client(&hub, "client-a");
    let other = client(&hub, "client-b");

    let secret = owner.create_element("calib/offset", false, false).unwrap();
    secret.set_data(b"0.183").unwrap();

    // Not observable for another client in any non-global scope.
    assert!(matches!(
        other.get_element("calib/offset", false),
        Err(Error::NotFound)
    ));
    // And the name stays free for that client's own use.
    other.create_element("calib/offset", false, false).unwrap();
}

#[test]
fn persistent_elements_are_owner_keyed() {
    let (hub, _broker) = hub_with_broker();
    let owner = client(&hub, "client-a");
    let other = client(&hub, "client-b");

    let odometer = owner.create_element("odometer", false, true).unwrap();
    odometer.set_data(b"120350").unwrap();

    let reread = owner.get_element("odometer", false).unwrap();
    assert!(reread.is_persistent());
    assert_eq!(reread.get_data().unwrap(), b"120350");

    assert!(matches!(
        other.get_element("odometer", false),
        Err(Error::NotFound)
    ));
}

#[test]
fn ephemeral_create_checks_persistent_shadow() {
    let (hub, _broker) = hub_with_broker();
    let pool = client(&hub, "client-a");

    pool.create_element("odometer", false, true).unwrap();

    // The same name must not silently mean something else ephemerally.
    assert!(matches!(
        pool.create_element("odometer", false, false),
        Err(Error::AlreadyExists)
    ));

    // A different owner is free to use the name.
    let other = client(&hub, "client-b");
    other.create_element("odometer", false, false).unwrap();
}

#[test]
fn duplicate_global_create_rejected() {
    let (hub, _broker) = hub_with_broker();
    let first = client(&hub, "client-a");
    let second = client(&hub, "client-b");

    first.create_element("crossing/signal", true, false).unwrap();
    assert!(matches!(
        second.create_element("crossing/signal", true, false),
        Err(Error::AlreadyExists)
    ));
}

#[test]
fn set_data_on_unknown_element_not_found() {
    let (hub, _broker) = hub_with_broker();
    let pool = client(&hub, "client-a");

    pool.create_element("known", true, false).unwrap();
    pool.remove_element("known", true).unwrap();

    let stale = pool.get_element("known", true);
    assert!(matches!(stale, Err(Error::NotFound)));
}

#[test]
fn server_role_sees_global_writes_from_clients() {
    let (hub, broker) = hub_with_broker();
    let pool = client(&hub, "client-a");

    pool.create_element("crossing/signal", true, false)
        .unwrap()
        .set_data(b"AMBER")
        .unwrap();

    // The broker-side store reads the same pond without a network hop.
    let local_view = broker.get_element("crossing/signal", true).unwrap();
    assert_eq!(local_view.get_data().unwrap(), b"AMBER");

    // And broker-side notifies reach remote listeners.
    let (tx, rx) = unbounded::<Vec<u8>>();
    pool.get_element("crossing/signal", true)
        .unwrap()
        .add_listener(move |value| {
            tx.send(value.to_vec()).unwrap();
        })
        .unwrap();
    local_view.notify(Some(b"RED")).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"RED");
}
