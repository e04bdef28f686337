//! Integration tests for node reservations across conductors.
//!
//! These tests verify:
//! - Two conductors sharing a store never work on the same node at once
//! - A restarted conductor clears its stale reservations
//! - Nodes interrupted mid-operation are failed on restart
//! - Tasks on the same conductor do not share a reservation
//! - Callback timeouts leave locked nodes alone
//! - Callback timeouts only touch nodes in this conductor's group

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use mk_core::drivers::FakeInterface;
use mk_core::lock::{LockManager, RESTART_ERROR};
use mk_core::store::{MemoryNodeStore, NodeStore};
use mk_core::ConductorError;
use mk_protocol::ipc::Event;
use mk_protocol::{ConductorConfig, MaintenanceRequest, ProvisionState, ProvisionVerb, StepInterface};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_locked_node_rejects_second_operation() {
    let tc = default_conductor().await;
    let node = node_in(&tc, "node-1", ProvisionState::Manageable).await;

    let other = LockManager::new(tc.store.clone(), "conductor-2");
    let held = other.reserve(node.uuid).await.expect("reserve");

    let clean = request(ProvisionVerb::Clean)
        .with_clean_steps(vec![step(StepInterface::Bios, "factory_reset")]);
    let result = tc.conductor.provision_and_wait("node-1", clean.clone()).await;

    match result {
        Err(ConductorError::NodeLocked { holder, .. }) => assert_eq!(holder, "conductor-2"),
        other => panic!("expected NodeLocked, got {other:?}"),
    }
    assert!(tc.called().await.is_empty());

    // Deleting a locked node is refused too
    assert!(matches!(
        tc.conductor.delete_node("node-1").await,
        Err(ConductorError::NodeLocked { .. })
    ));

    held.release().await.expect("release");

    let node = tc
        .conductor
        .provision_and_wait("node-1", clean)
        .await
        .expect("clean after release");
    assert_eq!(node.provision_state, ProvisionState::Manageable);
}

#[tokio::test]
async fn test_heartbeat_on_locked_node_is_rejected() {
    let tc = default_conductor().await;
    let node = node_in(&tc, "node-1", ProvisionState::CleanWait).await;

    let other = LockManager::new(tc.store.clone(), "conductor-2");
    let held = other.reserve(node.uuid).await.expect("reserve");

    let result = tc.conductor.heartbeat_and_wait("node-1", succeeded()).await;
    assert!(matches!(result, Err(ConductorError::NodeLocked { .. })));

    held.release().await.expect("release");
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_does_not_wait_for_lock() {
    let mut config = test_config();
    config.node_locked_retry_attempts = 5;
    config.node_locked_retry_interval = 10;
    let tc = conductor_with(config, FakeInterface::new(StepInterface::Deploy)).await;
    let node = node_in(&tc, "node-1", ProvisionState::CleanWait).await;

    let other = LockManager::new(tc.store.clone(), "conductor-2");
    let held = other.reserve(node.uuid).await.expect("reserve");

    let started = tokio::time::Instant::now();
    let result = tc.conductor.heartbeat_and_wait("node-1", succeeded()).await;
    assert!(matches!(result, Err(ConductorError::NodeLocked { .. })));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    held.release().await.expect("release");
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_operation_excludes_same_host_tasks() {
    let tc = default_conductor().await;
    let node = node_in(&tc, "node-1", ProvisionState::Manageable).await;

    let clean = request(ProvisionVerb::Clean).with_clean_steps(vec![
        step(StepInterface::Power, "wait").with_arg("seconds", json!(30))
    ]);
    let started = tc.conductor.provision("node-1", clean).await.expect("clean");
    assert_eq!(started.provision_state, ProvisionState::Cleaning);

    let maintenance = MaintenanceRequest {
        maintenance: true,
        reason: Some("replacing disk".to_string()),
    };
    assert!(matches!(
        tc.conductor.set_maintenance("node-1", maintenance.clone()).await,
        Err(ConductorError::NodeLocked { .. })
    ));
    assert!(matches!(
        tc.conductor.delete_node("node-1").await,
        Err(ConductorError::NodeLocked { .. })
    ));
    assert!(matches!(
        tc.conductor.heartbeat_and_wait("node-1", bare_heartbeat()).await,
        Err(ConductorError::NodeLocked { .. })
    ));

    // The refused operations left the store reservation in place
    let during = tc.node(&node).await;
    assert_eq!(during.provision_state, ProvisionState::Cleaning);
    assert_eq!(during.reservation.as_deref(), Some(HOST));
    let other = LockManager::new(tc.store.clone(), "conductor-2");
    assert!(matches!(
        other.reserve(node.uuid).await,
        Err(ConductorError::NodeLocked { holder, .. }) if holder == HOST
    ));

    let mut finished = tc.node(&node).await;
    while finished.reservation.is_some() {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        finished = tc.node(&node).await;
    }
    assert_eq!(finished.provision_state, ProvisionState::Manageable);

    let updated = tc
        .conductor
        .set_maintenance("node-1", maintenance)
        .await
        .expect("maintenance after clean");
    assert!(updated.maintenance);
    assert!(tc.node(&node).await.maintenance);
}

#[tokio::test(start_paused = true)]
async fn test_lock_retry_waits_for_holder() {
    let mut config = test_config();
    config.node_locked_retry_attempts = 5;
    config.node_locked_retry_interval = 1;
    let tc = conductor_with(config, FakeInterface::new(StepInterface::Deploy)).await;
    let node = node_in(&tc, "node-1", ProvisionState::Enroll).await;

    let other = LockManager::new(tc.store.clone(), "conductor-2");
    let held = other.reserve(node.uuid).await.expect("reserve");
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        held.release().await.expect("release");
    });

    let node = tc
        .conductor
        .provision_and_wait("node-1", request(ProvisionVerb::Manage))
        .await
        .expect("manage after retry");
    assert_eq!(node.provision_state, ProvisionState::Manageable);
}

#[tokio::test]
async fn test_restart_clears_reservations_and_fails_interrupted_work() {
    let store = Arc::new(MemoryNodeStore::new());
    let first = conductor_on(
        store.clone(),
        test_config(),
        FakeInterface::new(StepInterface::Deploy),
    )
    .await;

    let interrupted = node_in(&first, "interrupted", ProvisionState::Cleaning).await;
    let waiting = node_in(&first, "waiting", ProvisionState::CleanWait).await;
    let foreign = node_in(&first, "foreign", ProvisionState::Deploying).await;

    // Simulate a crash: this host still holds two nodes, another host one
    store.reserve_node(interrupted.uuid, HOST).await.expect("reserve");
    store.reserve_node(waiting.uuid, HOST).await.expect("reserve");
    store
        .reserve_node(foreign.uuid, "conductor-2")
        .await
        .expect("reserve");

    let restarted = conductor_on(
        store.clone(),
        test_config(),
        FakeInterface::new(StepInterface::Deploy),
    )
    .await;

    let interrupted = restarted.node(&interrupted).await;
    assert_eq!(interrupted.provision_state, ProvisionState::CleanFailed);
    assert_eq!(interrupted.last_error.as_deref(), Some(RESTART_ERROR));
    assert!(interrupted.reservation.is_none());

    let waiting = restarted.node(&waiting).await;
    assert_eq!(waiting.provision_state, ProvisionState::CleanWait);
    assert!(waiting.reservation.is_none());

    let foreign = restarted.node(&foreign).await;
    assert_eq!(foreign.provision_state, ProvisionState::Deploying);
    assert_eq!(foreign.reservation.as_deref(), Some("conductor-2"));
}

#[tokio::test]
async fn test_start_reports_cleared_reservations() {
    let store = Arc::new(MemoryNodeStore::new());
    let first = conductor_on(
        store.clone(),
        test_config(),
        FakeInterface::new(StepInterface::Deploy),
    )
    .await;
    let node = node_in(&first, "node-1", ProvisionState::Deploying).await;
    store.reserve_node(node.uuid, HOST).await.expect("reserve");

    let mut events = first.conductor.subscribe();
    let report = first.conductor.start().await.expect("restart");

    assert_eq!(report.cleared, vec![node.uuid]);
    assert_eq!(report.failed, vec![node.uuid]);
    let events = drain(&mut events);
    assert!(matches!(
        events.first(),
        Some(Event::ReservationCleared { host, .. }) if host == HOST
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::NodeFailed { state: ProvisionState::DeployFailed, .. })));
}

#[tokio::test]
async fn test_timeout_check_skips_locked_nodes() {
    let tc = default_conductor().await;
    let mut node = node_in(&tc, "node-1", ProvisionState::CleanWait).await;
    node.provision_updated_at = Utc::now() - ChronoDuration::hours(2);
    tc.store.put_node(&node).await.expect("put");

    let other = LockManager::new(tc.store.clone(), "conductor-2");
    let held = other.reserve(node.uuid).await.expect("reserve");

    assert!(tc
        .conductor
        .check_callback_timeouts()
        .await
        .expect("check")
        .is_empty());
    assert_eq!(
        tc.node(&node).await.provision_state,
        ProvisionState::CleanWait
    );

    held.release().await.expect("release");

    let failed = tc.conductor.check_callback_timeouts().await.expect("check");
    assert_eq!(failed, vec![node.uuid]);
}

#[tokio::test]
async fn test_timeout_check_ignores_other_groups() {
    let config = ConductorConfig {
        conductor_group: "rack-a".to_string(),
        ..test_config()
    };
    let tc = conductor_with(config, FakeInterface::new(StepInterface::Deploy)).await;
    let registered = tc.store.list_conductors().await.expect("list");
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].conductor_group, "rack-a");

    let mut node = node_in(&tc, "node-1", ProvisionState::CleanWait).await;
    node.provision_updated_at = Utc::now() - ChronoDuration::hours(2);
    tc.store.put_node(&node).await.expect("put");

    // The default group has no conductor, so nobody owns the node.
    assert!(tc
        .conductor
        .check_callback_timeouts()
        .await
        .expect("check")
        .is_empty());
    assert_eq!(
        tc.node(&node).await.provision_state,
        ProvisionState::CleanWait
    );

    let mut node = tc.node(&node).await;
    node.conductor_group = "rack-a".to_string();
    tc.store.put_node(&node).await.expect("put");

    let failed = tc.conductor.check_callback_timeouts().await.expect("check");
    assert_eq!(failed, vec![node.uuid]);
}

#[tokio::test]
async fn test_stop_unregisters_conductor() {
    let tc = default_conductor().await;
    let hosts: Vec<String> = tc
        .store
        .list_conductors()
        .await
        .expect("list")
        .into_iter()
        .map(|c| c.hostname)
        .collect();
    assert_eq!(hosts, vec![HOST.to_string()]);

    tc.conductor.stop().await.expect("stop");
    assert!(tc.store.list_conductors().await.expect("list").is_empty());
}
