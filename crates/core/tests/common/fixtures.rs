//! Test fixtures for building conductors, nodes and requests.

use mk_core::drivers::fake::CallLog;
use mk_core::drivers::{DriverRegistry, FakeInterface, FakePower};
use mk_core::store::{MemoryNodeStore, NodeStore};
use mk_core::Conductor;
use mk_protocol::ipc::Event;
use mk_protocol::{
    ConductorConfig, CreateNodeRequest, HeartbeatRequest, Node, ProvisionRequest, ProvisionState,
    ProvisionVerb, Step, StepInterface, StepResult,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub const HOST: &str = "conductor-1";

/// A conductor plus handles to everything it talks to.
#[allow(dead_code)]
pub struct TestConductor {
    pub conductor: Conductor,
    pub store: Arc<MemoryNodeStore>,
    pub calls: CallLog,
}

#[allow(dead_code)]
impl TestConductor {
    /// Names of every driver call so far, e.g. `raid.create_configuration`.
    pub async fn called(&self) -> Vec<String> {
        self.calls.lock().await.iter().map(|c| c.step.clone()).collect()
    }

    pub async fn node(&self, node: &Node) -> Node {
        self.store
            .get_node(node.uuid)
            .await
            .expect("store")
            .expect("node exists")
    }
}

/// Conductor settings for tests: no lock retries and automated cleaning
/// disabled unless a test turns it on.
#[allow(dead_code)]
pub fn test_config() -> ConductorConfig {
    ConductorConfig {
        host: HOST.to_string(),
        automated_clean: false,
        node_locked_retry_attempts: 0,
        node_locked_retry_interval: 0,
        ..Default::default()
    }
}

/// Build a started conductor over the fake hardware type.
///
/// `deploy` replaces the default deploy interface so tests can change what
/// individual steps do.
#[allow(dead_code)]
pub async fn conductor_with(config: ConductorConfig, deploy: FakeInterface) -> TestConductor {
    let store = Arc::new(MemoryNodeStore::new());
    conductor_on(store, config, deploy).await
}

/// Build a started conductor over an existing store.
#[allow(dead_code)]
pub async fn conductor_on(
    store: Arc<MemoryNodeStore>,
    config: ConductorConfig,
    deploy: FakeInterface,
) -> TestConductor {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = DriverRegistry::new(Arc::new(FakePower::new().with_call_log(calls.clone())))
        .with_interface(Arc::new(deploy.with_call_log(calls.clone())));
    for interface in [
        StepInterface::Management,
        StepInterface::Bios,
        StepInterface::Raid,
    ] {
        registry = registry
            .with_interface(Arc::new(FakeInterface::new(interface).with_call_log(calls.clone())));
    }

    let registry = registry.with_enabled(config.enabled_interfaces.clone());
    let conductor = Conductor::new(config, store.clone(), registry);
    conductor.start().await.expect("conductor starts");

    TestConductor {
        conductor,
        store,
        calls,
    }
}

#[allow(dead_code)]
pub async fn default_conductor() -> TestConductor {
    conductor_with(test_config(), FakeInterface::new(StepInterface::Deploy)).await
}

/// Enroll a node and force it into `state`.
#[allow(dead_code)]
pub async fn node_in(tc: &TestConductor, name: &str, state: ProvisionState) -> Node {
    let mut node = tc
        .conductor
        .enroll(CreateNodeRequest {
            name: Some(name.to_string()),
            ..Default::default()
        })
        .await
        .expect("enroll");
    node.provision_state = state;
    tc.store.put_node(&node).await.expect("put");
    node
}

#[allow(dead_code)]
pub fn request(verb: ProvisionVerb) -> ProvisionRequest {
    ProvisionRequest::new(verb)
}

#[allow(dead_code)]
pub fn step(interface: StepInterface, name: &str) -> Step {
    Step::new(interface, name)
}

#[allow(dead_code)]
pub fn succeeded() -> HeartbeatRequest {
    HeartbeatRequest {
        agent_url: "http://10.0.0.5:9999".to_string(),
        step_result: Some(StepResult::Succeeded),
    }
}

#[allow(dead_code)]
pub fn failed(error: &str) -> HeartbeatRequest {
    HeartbeatRequest {
        agent_url: "http://10.0.0.5:9999".to_string(),
        step_result: Some(StepResult::Failed {
            error: error.to_string(),
        }),
    }
}

#[allow(dead_code)]
pub fn bare_heartbeat() -> HeartbeatRequest {
    HeartbeatRequest {
        agent_url: "http://10.0.0.5:9999".to_string(),
        step_result: None,
    }
}

/// Drain every event already sent on the channel.
#[allow(dead_code)]
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// The `(from, to)` pairs of every state change in `events`.
#[allow(dead_code)]
pub fn transitions(events: &[Event]) -> Vec<(ProvisionState, ProvisionState)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ProvisionStateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}
