//! Step execution engine.
//!
//! The StepExecutor runs the step list stored in a node's
//! `driver_internal_info`, one step at a time, starting from a given index.
//! It owns every state change that happens while a phase is in progress:
//! parking the node in a wait or hold state, failing it, and completing the
//! phase once the last step has run.

use crate::drivers::{DriverRegistry, StepOutcome};
use crate::error::{ConductorError, ConductorResult};
use crate::lock::{LockManager, NodeReservation};
use crate::state::node::{fail_node, transition};
use crate::state::ProvisionEvent;
use crate::steps::StepAction;
use crate::store::NodeStore;
use mk_protocol::ipc::Event;
use mk_protocol::{Node, PowerState, Step, StepPhase, StepStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Sender;

/// How a call to [`StepExecutor::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every step ran and the phase finished.
    Completed,
    /// An asynchronous step was handed to the agent; the node is in a wait
    /// state until the next heartbeat.
    Waiting,
    /// A `hold` step was reached.
    Held,
    /// A step failed and the node moved to the phase's failure state.
    Failed { error: String },
}

/// Runs node step lists against the driver interfaces.
#[derive(Clone)]
pub struct StepExecutor {
    registry: DriverRegistry,
    store: Arc<dyn NodeStore>,
    locks: LockManager,
    events_tx: Sender<Event>,
    max_history: usize,
}

impl StepExecutor {
    /// Create a new StepExecutor.
    ///
    /// # Arguments
    ///
    /// * `registry` - Driver interfaces steps are dispatched to
    /// * `store` - Used to list child nodes
    /// * `locks` - Reserves child nodes while a step runs against them
    /// * `events_tx` - Channel step and state events are published on
    /// * `max_history` - History entries kept per node when recording failures
    pub fn new(
        registry: DriverRegistry,
        store: Arc<dyn NodeStore>,
        locks: LockManager,
        events_tx: Sender<Event>,
        max_history: usize,
    ) -> Self {
        Self {
            registry,
            store,
            locks,
            events_tx,
            max_history,
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Run the node's step list from `start_index`.
    ///
    /// The node must be reserved by the caller and already be in the
    /// phase's working state (`cleaning`, `deploying` or `servicing`).
    /// `step_index` is persisted before each step starts, so a step that
    /// completed is never started again.
    ///
    /// # Errors
    ///
    /// Step failures are not errors: they move the node to its failure
    /// state and return [`ExecutionOutcome::Failed`]. Errors are returned
    /// for store failures and when the node has no step list.
    pub async fn run(
        &self,
        reservation: &mut NodeReservation,
        start_index: usize,
    ) -> ConductorResult<ExecutionOutcome> {
        let node_state = reservation.node().provision_state;
        let phase = reservation
            .node()
            .driver_internal_info
            .step_phase
            .ok_or_else(|| {
                ConductorError::invalid_state(reservation.node().ident(), node_state, "run steps")
            })?;

        let steps = reservation.node().driver_internal_info.steps.clone();
        for (index, step) in steps.iter().enumerate().skip(start_index) {
            reservation.node_mut().driver_internal_info.step_index = Some(index);
            reservation.save().await?;

            if step.is_disabled() {
                tracing::debug!(node = %reservation.id(), step = %step, "step disabled, skipping");
                let _ = self.events_tx.send(Event::StepSkipped {
                    node_id: reservation.id(),
                    step_index: index,
                    step: step.to_string(),
                });
                continue;
            }

            self.emit_status(reservation.node(), phase, index, step, StepStatus::Running);
            tracing::info!(node = %reservation.id(), step = %step, index, "executing step");

            match self.execute(reservation, step).await {
                Ok(StepProgress::Done) => {
                    self.emit_status(reservation.node(), phase, index, step, StepStatus::Succeeded);
                }
                Ok(StepProgress::Async) => {
                    transition(reservation.node_mut(), ProvisionEvent::Wait, &self.events_tx)?;
                    reservation.save().await?;
                    return Ok(ExecutionOutcome::Waiting);
                }
                Ok(StepProgress::Hold) => {
                    self.emit_status(reservation.node(), phase, index, step, StepStatus::Held);
                    transition(reservation.node_mut(), ProvisionEvent::Hold, &self.events_tx)?;
                    reservation.save().await?;
                    return Ok(ExecutionOutcome::Held);
                }
                Err(e) => {
                    self.emit_status(reservation.node(), phase, index, step, StepStatus::Failed);
                    return self.fail(reservation, &e.to_string()).await;
                }
            }
        }

        self.complete(reservation).await
    }

    /// Finish the asynchronous step the node is waiting on and continue
    /// with the next one.
    ///
    /// The node must be in a wait state of a step phase. A `hold` step that
    /// was released by `unhold` counts as finished.
    pub async fn resume(&self, reservation: &mut NodeReservation) -> ConductorResult<ExecutionOutcome> {
        let (phase, index, step) = self.current(reservation.node())?;

        transition(reservation.node_mut(), ProvisionEvent::Resume, &self.events_tx)?;
        self.emit_status(reservation.node(), phase, index, &step, StepStatus::Succeeded);
        reservation.save().await?;

        self.run(reservation, index + 1).await
    }

    /// Fail the asynchronous step the node is waiting on.
    pub async fn fail_current(
        &self,
        reservation: &mut NodeReservation,
        error: &str,
    ) -> ConductorResult<ExecutionOutcome> {
        let (phase, index, step) = self.current(reservation.node())?;
        self.emit_status(reservation.node(), phase, index, &step, StepStatus::Failed);

        let error = ConductorError::StepFailed {
            step: step.to_string(),
            reason: error.to_string(),
        };
        self.fail(reservation, &error.to_string()).await
    }

    fn current(&self, node: &Node) -> ConductorResult<(StepPhase, usize, Step)> {
        let info = &node.driver_internal_info;
        match (info.step_phase, info.step_index, info.current_step()) {
            (Some(phase), Some(index), Some(step)) => Ok((phase, index, step.clone())),
            _ => Err(ConductorError::invalid_state(
                node.ident(),
                node.provision_state,
                "resume steps",
            )),
        }
    }

    async fn complete(&self, reservation: &mut NodeReservation) -> ConductorResult<ExecutionOutcome> {
        let node = reservation.node_mut();
        node.driver_internal_info.clear_steps();
        transition(node, ProvisionEvent::Done, &self.events_tx)?;
        reservation.save().await?;
        tracing::info!(node = %reservation.id(), state = %reservation.node().provision_state, "steps completed");
        Ok(ExecutionOutcome::Completed)
    }

    async fn fail(
        &self,
        reservation: &mut NodeReservation,
        error: &str,
    ) -> ConductorResult<ExecutionOutcome> {
        let host = self.locks.host().to_string();
        fail_node(reservation.node_mut(), error, &host, self.max_history, &self.events_tx)?;
        reservation.save().await?;
        Ok(ExecutionOutcome::Failed {
            error: error.to_string(),
        })
    }

    async fn execute(
        &self,
        reservation: &mut NodeReservation,
        step: &Step,
    ) -> ConductorResult<StepProgress> {
        let action = StepAction::resolve(step);

        if step.execute_on_child_nodes {
            if !action.supports_child_nodes() {
                return Err(ConductorError::invalid_step(
                    step.to_string(),
                    "cannot be executed on child nodes",
                ));
            }
            self.execute_on_children(reservation.node(), step, &action).await?;
            return Ok(StepProgress::Done);
        }

        match action {
            StepAction::Hold => Ok(StepProgress::Hold),
            StepAction::Interface { interface, .. } => {
                let driver = self.registry.get(interface).ok_or_else(|| ConductorError::StepFailed {
                    step: step.to_string(),
                    reason: format!("interface {interface} is not enabled"),
                })?;
                let outcome = driver
                    .execute_step(reservation.node(), step)
                    .await
                    .map_err(|e| ConductorError::StepFailed {
                        step: step.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(match outcome {
                    StepOutcome::Done => StepProgress::Done,
                    StepOutcome::Async => StepProgress::Async,
                })
            }
            builtin => {
                self.execute_builtin(reservation.node_mut(), step, &builtin).await?;
                Ok(StepProgress::Done)
            }
        }
    }

    /// Run a power or wait step against one node, updating its power state.
    async fn execute_builtin(
        &self,
        node: &mut Node,
        step: &Step,
        action: &StepAction,
    ) -> ConductorResult<()> {
        let power = self.registry.power();
        let result = match action {
            StepAction::Wait { seconds } => {
                tokio::time::sleep(Duration::from_secs(*seconds)).await;
                Ok(())
            }
            StepAction::PowerOn => power
                .set_power_state(node, PowerState::On)
                .await
                .map(|()| node.power_state = PowerState::On),
            StepAction::PowerOff => power
                .set_power_state(node, PowerState::Off)
                .await
                .map(|()| node.power_state = PowerState::Off),
            StepAction::Reboot => power
                .reboot(node)
                .await
                .map(|()| node.power_state = PowerState::On),
            StepAction::Hold | StepAction::Interface { .. } => Ok(()),
        };

        result.map_err(|e| ConductorError::StepFailed {
            step: step.to_string(),
            reason: e.to_string(),
        })
    }

    /// Run a built-in step against the node's children.
    ///
    /// Each child is reserved for the duration of its part of the step.
    async fn execute_on_children(
        &self,
        parent: &Node,
        step: &Step,
        action: &StepAction,
    ) -> ConductorResult<()> {
        let mut children = self.store.list_children(parent.uuid).await?;

        if let Some(limit) = &step.limit_child_node_execution {
            for wanted in limit {
                let is_child = children
                    .iter()
                    .any(|c| c.uuid.to_string() == *wanted || c.name.as_deref() == Some(wanted));
                if !is_child {
                    return Err(ConductorError::StepFailed {
                        step: step.to_string(),
                        reason: format!("node {wanted} is not a child of node {}", parent.ident()),
                    });
                }
            }
            children.retain(|c| {
                limit
                    .iter()
                    .any(|w| c.uuid.to_string() == *w || c.name.as_deref() == Some(w))
            });
        }

        for child in children {
            let mut child_reservation = self.locks.reserve_with_retry(child.uuid).await?;
            tracing::debug!(parent = %parent.uuid, child = %child.uuid, step = %step, "executing step on child node");

            let result = self
                .execute_builtin(child_reservation.node_mut(), step, action)
                .await;
            let saved = match &result {
                Ok(()) => child_reservation.save().await,
                Err(_) => Ok(()),
            };
            child_reservation.release().await?;
            result?;
            saved?;
        }

        Ok(())
    }

    fn emit_status(&self, node: &Node, phase: StepPhase, index: usize, step: &Step, status: StepStatus) {
        let _ = self.events_tx.send(Event::StepStatusUpdate {
            node_id: node.uuid,
            phase,
            step_index: index,
            interface: step.interface,
            step: step.step.clone(),
            status,
        });
    }
}

enum StepProgress {
    Done,
    Async,
    Hold,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fake::{CallLog, FakeBehavior, FakeInterface, FakePower};
    use crate::state::node::create_node;
    use crate::store::MemoryNodeStore;
    use mk_protocol::{CreateNodeRequest, ProvisionState, StepInterface};
    use serde_json::json;
    use tokio::sync::{broadcast, Mutex};

    struct Harness {
        executor: StepExecutor,
        locks: LockManager,
        store: Arc<MemoryNodeStore>,
        calls: CallLog,
    }

    fn harness_with(deploy: FakeInterface) -> Harness {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let registry = DriverRegistry::new(Arc::new(FakePower::new().with_call_log(calls.clone())))
            .with_interface(Arc::new(deploy.with_call_log(calls.clone())))
            .with_interface(Arc::new(
                FakeInterface::new(StepInterface::Raid).with_call_log(calls.clone()),
            ))
            .with_interface(Arc::new(
                FakeInterface::new(StepInterface::Bios).with_call_log(calls.clone()),
            ));
        let store = Arc::new(MemoryNodeStore::new());
        let locks = LockManager::new(store.clone(), "conductor-1");
        let (tx, _rx) = broadcast::channel(64);
        let executor = StepExecutor::new(registry, store.clone(), locks.clone(), tx, 10);
        Harness {
            executor,
            locks,
            store,
            calls,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeInterface::new(StepInterface::Deploy))
    }

    async fn cleaning_node(h: &Harness, steps: Vec<Step>) -> NodeReservation {
        let mut node = create_node(CreateNodeRequest::default());
        node.provision_state = ProvisionState::Cleaning;
        node.target_provision_state = Some(ProvisionState::Manageable);
        node.driver_internal_info.steps = steps;
        node.driver_internal_info.step_phase = Some(StepPhase::Clean);
        h.store.put_node(&node).await.expect("put");
        h.locks.reserve(node.uuid).await.expect("reserve")
    }

    async fn called(h: &Harness) -> Vec<String> {
        h.calls.lock().await.iter().map(|c| c.step.clone()).collect()
    }

    #[tokio::test]
    async fn test_sync_steps_complete_phase() {
        let h = harness();
        let mut reservation = cleaning_node(
            &h,
            vec![
                Step::new(StepInterface::Raid, "delete_configuration").with_priority(20),
                Step::new(StepInterface::Bios, "factory_reset").with_priority(10),
            ],
        )
        .await;

        let outcome = h.executor.run(&mut reservation, 0).await.expect("run");

        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(reservation.node().provision_state, ProvisionState::Manageable);
        assert!(reservation.node().driver_internal_info.steps.is_empty());
        assert_eq!(
            called(&h).await,
            vec!["raid.delete_configuration", "bios.factory_reset"]
        );
        reservation.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_async_step_parks_node_in_wait() {
        let h = harness();
        let mut reservation = cleaning_node(
            &h,
            vec![
                Step::new(StepInterface::Deploy, "erase_devices").with_priority(10),
                Step::new(StepInterface::Bios, "factory_reset").with_priority(5),
            ],
        )
        .await;

        let outcome = h.executor.run(&mut reservation, 0).await.expect("run");

        assert_eq!(outcome, ExecutionOutcome::Waiting);
        assert_eq!(reservation.node().provision_state, ProvisionState::CleanWait);
        assert_eq!(reservation.node().driver_internal_info.step_index, Some(0));
        assert_eq!(called(&h).await, vec!["deploy.erase_devices"]);

        let outcome = h.executor.resume(&mut reservation).await.expect("resume");
        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(
            called(&h).await,
            vec!["deploy.erase_devices", "bios.factory_reset"]
        );
        reservation.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_steps() {
        let h = harness_with(
            FakeInterface::new(StepInterface::Deploy)
                .with_behavior("erase_devices", FakeBehavior::Fail("disk busy".to_string())),
        );
        let mut reservation = cleaning_node(
            &h,
            vec![
                Step::new(StepInterface::Deploy, "erase_devices").with_priority(10),
                Step::new(StepInterface::Bios, "factory_reset").with_priority(5),
            ],
        )
        .await;

        let outcome = h.executor.run(&mut reservation, 0).await.expect("run");

        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
        let node = reservation.node();
        assert_eq!(node.provision_state, ProvisionState::CleanFailed);
        assert!(node.last_error.as_deref().is_some_and(|e| e.contains("disk busy")));
        assert_eq!(called(&h).await, vec!["deploy.erase_devices"]);
        reservation.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_hold_stops_execution() {
        let h = harness();
        let mut reservation = cleaning_node(
            &h,
            vec![
                Step::new(StepInterface::Deploy, "hold"),
                Step::new(StepInterface::Bios, "factory_reset"),
            ],
        )
        .await;

        let outcome = h.executor.run(&mut reservation, 0).await.expect("run");

        assert_eq!(outcome, ExecutionOutcome::Held);
        assert_eq!(reservation.node().provision_state, ProvisionState::CleanHold);
        assert!(called(&h).await.is_empty());
        reservation.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_disabled_step_is_skipped() {
        let h = harness();
        let mut reservation = cleaning_node(
            &h,
            vec![
                Step::new(StepInterface::Raid, "delete_configuration").with_priority(0),
                Step::new(StepInterface::Bios, "factory_reset").with_priority(5),
            ],
        )
        .await;

        h.executor.run(&mut reservation, 0).await.expect("run");

        assert_eq!(called(&h).await, vec!["bios.factory_reset"]);
        reservation.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_power_step_updates_power_state() {
        let h = harness();
        let mut reservation =
            cleaning_node(&h, vec![Step::new(StepInterface::Power, "power_off")]).await;

        h.executor.run(&mut reservation, 0).await.expect("run");

        assert_eq!(reservation.node().power_state, PowerState::Off);
        assert_eq!(called(&h).await, vec!["power.power_off"]);
        reservation.release().await.expect("release");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_step_sleeps() {
        let h = harness();
        let mut reservation = cleaning_node(
            &h,
            vec![Step::new(StepInterface::Deploy, "wait").with_arg("seconds", json!(30))],
        )
        .await;

        let started = tokio::time::Instant::now();
        h.executor.run(&mut reservation, 0).await.expect("run");

        assert!(started.elapsed() >= Duration::from_secs(30));
        reservation.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_child_node_fan_out_respects_limit() {
        let h = harness();
        let mut parent_reservation = cleaning_node(&h, Vec::new()).await;
        let parent_id = parent_reservation.id();

        let mut children = Vec::new();
        for name in ["dpu-0", "dpu-1"] {
            let child = create_node(CreateNodeRequest {
                name: Some(name.to_string()),
                parent_node: Some(parent_id),
                ..Default::default()
            });
            h.store.put_node(&child).await.expect("put");
            children.push(child);
        }

        parent_reservation.node_mut().driver_internal_info.steps = vec![
            Step::new(StepInterface::Power, "power_on")
                .on_child_nodes(Some(vec!["dpu-1".to_string()])),
        ];
        h.executor.run(&mut parent_reservation, 0).await.expect("run");

        let calls = h.calls.lock().await.clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].node, children[1].uuid);

        let child = h.store.get_node(children[1].uuid).await.expect("get").expect("exists");
        assert_eq!(child.power_state, PowerState::On);
        assert!(child.reservation.is_none());
        parent_reservation.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_child_limit_naming_non_child_fails() {
        let h = harness();
        let mut reservation = cleaning_node(
            &h,
            vec![Step::new(StepInterface::Power, "reboot")
                .on_child_nodes(Some(vec!["stranger".to_string()]))],
        )
        .await;

        let outcome = h.executor.run(&mut reservation, 0).await.expect("run");

        match outcome {
            ExecutionOutcome::Failed { error } => assert!(error.contains("not a child")),
            other => panic!("expected failure, got {other:?}"),
        }
        reservation.release().await.expect("release");
    }
}
