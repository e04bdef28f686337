//! Conductor service.
//!
//! The Conductor is the entry point for every node operation. Each
//! operation runs in two halves: a synchronous half that reserves the node,
//! validates the request and persists the first state change, and a
//! continuation that does the actual work while still holding the
//! reservation. [`Conductor::provision`] spawns the continuation as a tokio
//! task; [`Conductor::provision_and_wait`] runs it inline.

use crate::drivers::DriverRegistry;
use crate::engine::{ExecutionOutcome, StepExecutor};
use crate::error::{ConductorError, ConductorResult};
use crate::lock::{HashRing, LockManager, NodeReservation, ReconcileReport, RingRefresher};
use crate::state::node::{create_node, fail_node, record_history, transition};
use crate::state::{is_deletable, ProvisionEvent};
use crate::steps::{StepAction, StepCollector, StepSource};
use crate::store::NodeStore;
use chrono::{DateTime, Utc};
use mk_protocol::ipc::Event;
use mk_protocol::{
    ConductorConfig, CreateNodeRequest, DeployTemplate, HeartbeatRequest, MaintenanceRequest, Node,
    PowerState, ProvisionRequest, ProvisionState, ProvisionVerb, Runbook, Step, StepPhase,
    StepResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Work left to do after the synchronous half of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Continuation {
    /// Nothing; the state change was the whole operation.
    None,
    /// Read the power state, then finish verification.
    Verify,
    /// Run the collected step list from the first step.
    Steps,
    /// Power off, then run automated cleaning.
    Undeploy,
    /// Boot the rescue ramdisk and wait for it.
    Rescue,
    Unrescue,
    Adopt,
    /// Complete the step the node waits on and run the rest.
    Resume,
    /// Fail the step the node waits on.
    FailStep(String),
    /// The rescue ramdisk came up.
    FinishRescue,
    /// Fail the node with the given error.
    Fail(String),
}

/// Manages nodes on behalf of one conductor host.
///
/// Cheap to clone; clones share the store, the event channel and the hash
/// ring.
#[derive(Clone)]
pub struct Conductor {
    config: Arc<ConductorConfig>,
    store: Arc<dyn NodeStore>,
    locks: LockManager,
    executor: StepExecutor,
    events_tx: broadcast::Sender<Event>,
    ring: watch::Receiver<Arc<HashRing>>,
    refresher: Arc<RingRefresher>,
}

impl Conductor {
    /// Create a new Conductor.
    ///
    /// # Arguments
    ///
    /// * `config` - Conductor settings from `conductor.toml`
    /// * `store` - Node store, possibly shared with other conductors
    /// * `registry` - Driver interfaces for the configured hardware type
    pub fn new(config: ConductorConfig, store: Arc<dyn NodeStore>, registry: DriverRegistry) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let locks = LockManager::new(Arc::clone(&store), config.host.clone()).with_retry(
            config.node_locked_retry_attempts,
            Duration::from_secs(config.node_locked_retry_interval),
        );
        let executor = StepExecutor::new(
            registry,
            Arc::clone(&store),
            locks.clone(),
            events_tx.clone(),
            config.max_history_entries,
        );
        let (refresher, ring) = RingRefresher::new(
            Arc::clone(&store),
            config.hash_partition_exponent,
            config.hash_distribution_replicas,
            Duration::from_secs(config.hash_ring_reset_interval.max(1)),
        );

        Self {
            config: Arc::new(config),
            store,
            locks,
            executor,
            events_tx,
            ring,
            refresher: Arc::new(refresher),
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// The current hash ring snapshot.
    pub fn ring(&self) -> Arc<HashRing> {
        Arc::clone(&self.ring.borrow())
    }

    /// Register this host, recover from an unclean shutdown and build the
    /// first hash ring.
    pub async fn start(&self) -> ConductorResult<ReconcileReport> {
        self.store
            .register_conductor(self.host(), &self.config.conductor_group)
            .await?;
        let report = self
            .locks
            .reconcile_on_startup(&self.events_tx, self.config.max_history_entries)
            .await?;
        self.refresher.refresh().await?;
        tracing::info!(host = %self.host(), "conductor started");
        Ok(report)
    }

    /// Remove this host from the live conductor list.
    pub async fn stop(&self) -> ConductorResult<()> {
        self.store.unregister_conductor(self.host()).await?;
        tracing::info!(host = %self.host(), "conductor stopped");
        Ok(())
    }

    /// Spawn the callback timeout check and the hash ring refresher.
    pub fn spawn_periodic_tasks(&self) -> Vec<JoinHandle<()>> {
        let conductor = self.clone();
        let interval = Duration::from_secs(self.config.sync_interval.max(1));
        let timeouts = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = conductor.check_callback_timeouts().await {
                    tracing::warn!(error = %e, "callback timeout check failed");
                }
            }
        });

        vec![timeouts, Arc::clone(&self.refresher).spawn()]
    }

    /// Store runbooks and deploy templates loaded from configuration.
    pub async fn register_definitions(
        &self,
        runbooks: &[Runbook],
        templates: &[DeployTemplate],
    ) -> ConductorResult<()> {
        for runbook in runbooks {
            self.store.put_runbook(runbook).await?;
        }
        for template in templates {
            self.store.put_deploy_template(template).await?;
        }
        Ok(())
    }

    // Nodes

    /// Enroll a new node.
    pub async fn enroll(&self, request: CreateNodeRequest) -> ConductorResult<Node> {
        if let Some(parent) = request.parent_node {
            if self.store.get_node(parent).await?.is_none() {
                return Err(ConductorError::NodeNotFound(parent.to_string()));
            }
        }

        let node = create_node(request);
        self.store.put_node(&node).await?;
        tracing::info!(node = %node.uuid, name = ?node.name, "node enrolled");
        Ok(node)
    }

    /// Look up a node by UUID or name.
    pub async fn get_node(&self, ident: &str) -> ConductorResult<Node> {
        let node = match Uuid::parse_str(ident) {
            Ok(id) => self.store.get_node(id).await?,
            Err(_) => self.store.get_node_by_name(ident).await?,
        };
        node.ok_or_else(|| ConductorError::NodeNotFound(ident.to_string()))
    }

    pub async fn list_nodes(&self) -> ConductorResult<Vec<Node>> {
        self.store.list_nodes().await
    }

    /// Delete a node record.
    ///
    /// # Errors
    ///
    /// `NodeLocked` if any conductor holds the node, `InvalidState` unless
    /// the node is in a deletable state or in maintenance.
    pub async fn delete_node(&self, ident: &str) -> ConductorResult<()> {
        let id = self.get_node(ident).await?.uuid;
        let reservation = self.locks.reserve(id).await?;
        let node = reservation.node();

        if !is_deletable(node.provision_state) && !node.maintenance {
            let error = ConductorError::invalid_state(node.ident(), node.provision_state, "delete");
            reservation.release().await?;
            return Err(error);
        }

        self.store.delete_node(id).await?;
        reservation.release().await?;
        tracing::info!(node = %id, "node deleted");
        Ok(())
    }

    /// Set or clear maintenance mode.
    pub async fn set_maintenance(
        &self,
        ident: &str,
        request: MaintenanceRequest,
    ) -> ConductorResult<Node> {
        let id = self.get_node(ident).await?.uuid;
        let mut reservation = self.locks.reserve_with_retry(id).await?;

        let node = reservation.node_mut();
        node.maintenance = request.maintenance;
        node.maintenance_reason = if request.maintenance {
            request.reason
        } else {
            None
        };
        tracing::info!(node = %id, maintenance = request.maintenance, "maintenance updated");

        reservation.save().await?;
        let node = reservation.node().clone();
        reservation.release().await?;
        Ok(node)
    }

    // Runbooks

    pub async fn list_runbooks(&self) -> ConductorResult<Vec<Runbook>> {
        self.store.list_runbooks().await
    }

    /// Look up a runbook by name or UUID.
    pub async fn get_runbook(&self, name_or_id: &str) -> ConductorResult<Runbook> {
        self.store
            .get_runbook(name_or_id)
            .await?
            .ok_or_else(|| ConductorError::RunbookNotFound(name_or_id.to_string()))
    }

    // Provisioning

    /// Start a provisioning operation and return once the first state
    /// change is persisted.
    ///
    /// The rest of the operation runs in a background task that holds the
    /// node's reservation until it finishes.
    pub async fn provision(&self, ident: &str, request: ProvisionRequest) -> ConductorResult<Node> {
        let (reservation, continuation) = self.begin(ident, &request).await?;
        let node = reservation.node().clone();
        self.spawn_continuation(reservation, continuation);
        Ok(node)
    }

    /// Run a provisioning operation to its next resting point.
    ///
    /// Returns the node once it is stable, waiting for a heartbeat, or held.
    pub async fn provision_and_wait(
        &self,
        ident: &str,
        request: ProvisionRequest,
    ) -> ConductorResult<Node> {
        let (reservation, continuation) = self.begin(ident, &request).await?;
        self.finish(reservation, continuation).await
    }

    /// Handle an agent heartbeat in the background.
    pub async fn heartbeat(&self, ident: &str, request: HeartbeatRequest) -> ConductorResult<Node> {
        let (reservation, continuation) = self.begin_heartbeat(ident, request).await?;
        let node = reservation.node().clone();
        self.spawn_continuation(reservation, continuation);
        Ok(node)
    }

    /// Handle an agent heartbeat inline.
    pub async fn heartbeat_and_wait(
        &self,
        ident: &str,
        request: HeartbeatRequest,
    ) -> ConductorResult<Node> {
        let (reservation, continuation) = self.begin_heartbeat(ident, request).await?;
        self.finish(reservation, continuation).await
    }

    /// Fail nodes whose wait state outlived its callback timeout.
    ///
    /// The timeout counts from the later of the last state change and the
    /// last agent heartbeat, so an agent that keeps heartbeating through a
    /// long in-band step is not failed. Nodes in maintenance, nodes held by
    /// another task or conductor and nodes the hash ring maps elsewhere are
    /// skipped. Hold states never time out. Returns the nodes that were
    /// failed.
    pub async fn check_callback_timeouts(&self) -> ConductorResult<Vec<Uuid>> {
        let ring = self.ring();
        let now = Utc::now();
        let mut failed = Vec::new();

        for node in self.store.list_nodes().await? {
            let state = node.provision_state;
            if !state.is_wait() || node.maintenance || !ring.is_mapped(self.host(), &node) {
                continue;
            }
            let Some(timeout) = self.config.callback_timeout(state) else {
                continue;
            };
            if !timed_out(&node, timeout, now) {
                continue;
            }

            let mut reservation = match self.locks.reserve(node.uuid).await {
                Ok(reservation) => reservation,
                Err(ConductorError::NodeLocked { .. }) => continue,
                Err(e) => return Err(e),
            };
            // A heartbeat may have landed since the node list was read
            if reservation.node().provision_state != state
                || !timed_out(reservation.node(), timeout, now)
            {
                reservation.release().await?;
                continue;
            }

            let error = ConductorError::CallbackTimeout(format!("{} the node", wait_activity(state)));
            tracing::warn!(node = %node.uuid, %state, timeout, "callback timeout reached");
            let result = self.fail(&mut reservation, &error.to_string()).await;
            reservation.release().await?;
            result?;
            failed.push(node.uuid);
        }

        Ok(failed)
    }

    async fn begin(
        &self,
        ident: &str,
        request: &ProvisionRequest,
    ) -> ConductorResult<(NodeReservation, Continuation)> {
        let id = self.get_node(ident).await?.uuid;
        let mut reservation = self.locks.reserve_with_retry(id).await?;

        let prepared = self.prepare(&mut reservation, request).await;
        match prepared {
            Ok(continuation) => {
                tracing::info!(
                    node = %id,
                    verb = %request.target,
                    state = %reservation.node().provision_state,
                    "provisioning started"
                );
                Ok((reservation, continuation))
            }
            Err(e) => {
                if let Err(release_error) = reservation.release().await {
                    tracing::warn!(node = %id, error = %release_error, "failed to release node");
                }
                Err(e)
            }
        }
    }

    /// Validate a provisioning request and persist its first state change.
    async fn prepare(
        &self,
        reservation: &mut NodeReservation,
        request: &ProvisionRequest,
    ) -> ConductorResult<Continuation> {
        let verb = request.target;
        let node = reservation.node();
        let state = node.provision_state;

        if node.maintenance && !matches!(verb, ProvisionVerb::Abort | ProvisionVerb::Unhold) {
            return Err(ConductorError::invalid_state(
                node.ident(),
                state,
                format!("{verb} while in maintenance"),
            ));
        }

        match verb {
            ProvisionVerb::Manage => {
                let to = self.apply(reservation, ProvisionEvent::Manage).await?;
                Ok(if to == ProvisionState::Verifying {
                    Continuation::Verify
                } else {
                    Continuation::None
                })
            }
            ProvisionVerb::Provide => {
                let automated = self.config.automated_clean;
                self.start_steps(reservation, ProvisionEvent::Provide, StepPhase::Clean, |c| {
                    if automated {
                        c.collect(StepPhase::Clean, StepSource::Defaults { overrides: &[] })
                    } else {
                        Ok(Vec::new())
                    }
                })
                .await
            }
            ProvisionVerb::Clean => {
                self.check_transition(node, ProvisionEvent::Clean)?;
                let steps = self
                    .requested_steps(node, StepPhase::Clean, request.clean_steps.as_deref(), request)
                    .await?;
                self.start_steps(reservation, ProvisionEvent::Clean, StepPhase::Clean, |c| {
                    c.collect(StepPhase::Clean, StepSource::Explicit(&steps))
                })
                .await
            }
            ProvisionVerb::Service => {
                self.check_transition(node, ProvisionEvent::Service)?;
                let steps = self
                    .requested_steps(
                        node,
                        StepPhase::Service,
                        request.service_steps.as_deref(),
                        request,
                    )
                    .await?;
                self.start_steps(reservation, ProvisionEvent::Service, StepPhase::Service, |c| {
                    c.collect(StepPhase::Service, StepSource::Explicit(&steps))
                })
                .await
            }
            ProvisionVerb::Deploy | ProvisionVerb::Rebuild => {
                let event = if verb == ProvisionVerb::Deploy {
                    ProvisionEvent::Deploy
                } else {
                    ProvisionEvent::Rebuild
                };
                self.check_transition(node, event)?;

                let templates: Vec<DeployTemplate> = self
                    .store
                    .list_deploy_templates()
                    .await?
                    .into_iter()
                    .filter(|t| node.traits.contains(&t.name))
                    .collect();
                let runbook = match &request.runbook {
                    Some(name) => Some(self.usable_runbook(node, name, StepPhase::Deploy).await?),
                    None => None,
                };

                let mut overrides: Vec<&[Step]> =
                    templates.iter().map(|t| t.steps.as_slice()).collect();
                if let Some(runbook) = &runbook {
                    overrides.push(&runbook.steps);
                }
                if let Some(steps) = &request.deploy_steps {
                    overrides.push(steps);
                }

                self.start_steps(reservation, event, StepPhase::Deploy, |c| {
                    c.collect(StepPhase::Deploy, StepSource::Defaults { overrides: &overrides })
                })
                .await
            }
            ProvisionVerb::Undeploy => {
                self.apply(reservation, ProvisionEvent::Delete).await?;
                Ok(Continuation::Undeploy)
            }
            ProvisionVerb::Rescue => {
                self.apply(reservation, ProvisionEvent::Rescue).await?;
                Ok(Continuation::Rescue)
            }
            ProvisionVerb::Unrescue => {
                self.apply(reservation, ProvisionEvent::Unrescue).await?;
                Ok(Continuation::Unrescue)
            }
            ProvisionVerb::Adopt => {
                self.apply(reservation, ProvisionEvent::Adopt).await?;
                Ok(Continuation::Adopt)
            }
            ProvisionVerb::Abort => {
                self.abort(reservation).await?;
                Ok(Continuation::None)
            }
            ProvisionVerb::Unhold => {
                self.apply(reservation, ProvisionEvent::Unhold).await?;
                Ok(Continuation::None)
            }
        }
    }

    async fn begin_heartbeat(
        &self,
        ident: &str,
        request: HeartbeatRequest,
    ) -> ConductorResult<(NodeReservation, Continuation)> {
        let id = self.get_node(ident).await?.uuid;
        // The agent heartbeats again on its own interval
        let mut reservation = self.locks.reserve(id).await?;

        let node = reservation.node_mut();
        node.driver_internal_info.agent_url = Some(request.agent_url.clone());
        node.driver_internal_info.agent_last_heartbeat = Some(Utc::now());
        if let Err(e) = reservation.save().await {
            if let Err(release_error) = reservation.release().await {
                tracing::warn!(node = %id, error = %release_error, "failed to release node");
            }
            return Err(e);
        }

        let _ = self.events_tx.send(Event::HeartbeatReceived {
            node_id: id,
            agent_url: request.agent_url,
        });

        let node = reservation.node();
        let state = node.provision_state;
        let continuation = if node.maintenance {
            Continuation::None
        } else if state == ProvisionState::RescueWait {
            match request.step_result {
                Some(StepResult::Failed { error }) => Continuation::Fail(error),
                _ => Continuation::FinishRescue,
            }
        } else if state.is_wait() && state.phase().is_some() {
            match request.step_result {
                Some(StepResult::Succeeded) => Continuation::Resume,
                Some(StepResult::Failed { error }) => Continuation::FailStep(error),
                None => {
                    let released_hold = node
                        .driver_internal_info
                        .current_step()
                        .is_some_and(|s| StepAction::resolve(s) == StepAction::Hold);
                    if released_hold {
                        Continuation::Resume
                    } else {
                        Continuation::None
                    }
                }
            }
        } else {
            Continuation::None
        };

        tracing::debug!(node = %id, %state, ?continuation, "heartbeat received");
        Ok((reservation, continuation))
    }

    fn spawn_continuation(&self, reservation: NodeReservation, continuation: Continuation) {
        if continuation == Continuation::None {
            let id = reservation.id();
            tokio::spawn(async move {
                if let Err(e) = reservation.release().await {
                    tracing::warn!(node = %id, error = %e, "failed to release node");
                }
            });
            return;
        }

        let conductor = self.clone();
        tokio::spawn(async move {
            let id = reservation.id();
            if let Err(e) = conductor.finish(reservation, continuation).await {
                tracing::error!(node = %id, error = %e, "node operation failed");
            }
        });
    }

    /// Run the continuation and release the node whatever the outcome.
    async fn finish(
        &self,
        mut reservation: NodeReservation,
        continuation: Continuation,
    ) -> ConductorResult<Node> {
        let result = self.run_continuation(&mut reservation, continuation).await;
        let node = reservation.node().clone();
        let released = reservation.release().await;
        result?;
        released?;
        Ok(node)
    }

    async fn run_continuation(
        &self,
        reservation: &mut NodeReservation,
        continuation: Continuation,
    ) -> ConductorResult<()> {
        let power = self.executor.registry().power();

        match continuation {
            Continuation::None => Ok(()),
            Continuation::Steps => self.run_steps(reservation, 0).await,
            Continuation::Resume => {
                let outcome = self.executor.resume(reservation).await?;
                self.log_outcome(reservation.node(), &outcome);
                Ok(())
            }
            Continuation::FailStep(error) => {
                let outcome = self.executor.fail_current(reservation, &error).await?;
                self.log_outcome(reservation.node(), &outcome);
                Ok(())
            }
            Continuation::Fail(error) => self.fail(reservation, &error).await,
            Continuation::Verify => self.sync_power_state(reservation, "verify").await,
            Continuation::Adopt => self.sync_power_state(reservation, "adopt").await,
            Continuation::Undeploy => {
                let result = power.set_power_state(reservation.node(), PowerState::Off).await;
                if let Err(e) = result {
                    return self
                        .fail(reservation, &format!("Failed to power off node: {e}"))
                        .await;
                }
                reservation.node_mut().power_state = PowerState::Off;

                let automated = self.config.automated_clean;
                self.start_steps(reservation, ProvisionEvent::Clean, StepPhase::Clean, |c| {
                    if automated {
                        c.collect(StepPhase::Clean, StepSource::Defaults { overrides: &[] })
                    } else {
                        Ok(Vec::new())
                    }
                })
                .await?;
                self.run_steps(reservation, 0).await
            }
            Continuation::Rescue => {
                let result = power.reboot(reservation.node()).await;
                if let Err(e) = result {
                    return self
                        .fail(reservation, &format!("Failed to boot rescue ramdisk: {e}"))
                        .await;
                }
                reservation.node_mut().power_state = PowerState::On;
                self.apply(reservation, ProvisionEvent::Wait).await.map(drop)
            }
            Continuation::FinishRescue => {
                self.apply(reservation, ProvisionEvent::Done).await.map(drop)
            }
            Continuation::Unrescue => {
                let result = power.reboot(reservation.node()).await;
                if let Err(e) = result {
                    return self
                        .fail(reservation, &format!("Failed to reboot node: {e}"))
                        .await;
                }
                reservation.node_mut().power_state = PowerState::On;
                self.apply(reservation, ProvisionEvent::Done).await.map(drop)
            }
        }
    }

    /// Read the power state and finish the operation, or fail the node.
    async fn sync_power_state(
        &self,
        reservation: &mut NodeReservation,
        action: &str,
    ) -> ConductorResult<()> {
        let power = self.executor.registry().power();
        let result = power.get_power_state(reservation.node()).await;
        match result {
            Ok(state) => {
                reservation.node_mut().power_state = state;
                self.apply(reservation, ProvisionEvent::Done).await.map(drop)
            }
            Err(e) => self.fail(reservation, &format!("Failed to {action} node: {e}")).await,
        }
    }

    async fn run_steps(&self, reservation: &mut NodeReservation, start: usize) -> ConductorResult<()> {
        let outcome = self.executor.run(reservation, start).await?;
        self.log_outcome(reservation.node(), &outcome);
        Ok(())
    }

    fn log_outcome(&self, node: &Node, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Failed { error } => {
                tracing::warn!(node = %node.uuid, state = %node.provision_state, error, "steps failed");
            }
            other => {
                tracing::info!(node = %node.uuid, state = %node.provision_state, outcome = ?other, "steps stopped");
            }
        }
    }

    /// Abort the operation the node is waiting on.
    async fn abort(&self, reservation: &mut NodeReservation) -> ConductorResult<()> {
        let node = reservation.node();
        let state = node.provision_state;

        if state.is_hold() {
            return Err(ConductorError::invalid_state(
                node.ident(),
                state,
                "abort (unhold the node first)",
            ));
        }

        let current = node.driver_internal_info.current_step().cloned();
        if let (Some(phase), Some(step)) = (state.phase(), &current) {
            if state.is_wait() && !self.is_abortable(phase, step) {
                return Err(ConductorError::invalid_state(
                    node.ident(),
                    state,
                    format!("abort non-abortable step {step}"),
                ));
            }
        }

        let to = self.apply(reservation, ProvisionEvent::Abort).await?;
        if to.is_failed() {
            let message = match &current {
                Some(step) => format!("{} aborted by operator during step {step}", phase_name(state)),
                None => format!("{} aborted by operator", phase_name(state)),
            };
            let node = reservation.node_mut();
            node.last_error = Some(message.clone());
            node.driver_internal_info.clear_steps();
            record_history(
                node,
                &message,
                "provisioning",
                "ERROR",
                &self.config.host,
                self.config.max_history_entries,
            );
            reservation.save().await?;
        }
        Ok(())
    }

    /// Built-in steps are always abortable; driver steps say so in their spec.
    fn is_abortable(&self, phase: StepPhase, step: &Step) -> bool {
        if StepAction::resolve(step).is_builtin() {
            return true;
        }
        self.executor
            .registry()
            .find_spec(phase, step)
            .is_some_and(|spec| spec.abortable)
    }

    /// Steps requested for manual cleaning or servicing: either an explicit
    /// list or the steps of a runbook, never both.
    async fn requested_steps(
        &self,
        node: &Node,
        phase: StepPhase,
        steps: Option<&[Step]>,
        request: &ProvisionRequest,
    ) -> ConductorResult<Vec<Step>> {
        match (steps, &request.runbook) {
            (Some(_), Some(_)) => Err(ConductorError::invalid_step(
                format!("{phase} steps"),
                "specify either steps or a runbook, not both",
            )),
            (Some(steps), None) => Ok(steps.to_vec()),
            (None, Some(name)) => Ok(self.usable_runbook(node, name, phase).await?.steps),
            (None, None) => Err(ConductorError::invalid_step(
                format!("{phase} steps"),
                format!("{phase}_steps or a runbook is required for {}", request.target),
            )),
        }
    }

    /// Look up a runbook the node is allowed to run.
    async fn usable_runbook(
        &self,
        node: &Node,
        name_or_id: &str,
        phase: StepPhase,
    ) -> ConductorResult<Runbook> {
        let runbook = self.get_runbook(name_or_id).await?;

        if !node.traits.contains(&runbook.name) {
            return Err(ConductorError::invalid_step(
                runbook.name.clone(),
                format!("node {} does not have trait {}", node.ident(), runbook.name),
            ));
        }
        if !runbook.is_usable_by(node.owner.as_deref()) {
            return Err(ConductorError::invalid_step(
                runbook.name.clone(),
                format!("runbook is not available to node {}", node.ident()),
            ));
        }
        if runbook.disable_ramdisk {
            let registry = self.executor.registry();
            if let Some(step) = runbook.steps.iter().find(|s| {
                registry
                    .find_spec(phase, s)
                    .is_some_and(|spec| spec.requires_ramdisk)
            }) {
                return Err(ConductorError::invalid_step(
                    step.to_string(),
                    format!("requires the ramdisk but runbook {} disables it", runbook.name),
                ));
            }
        }

        Ok(runbook)
    }

    fn check_transition(&self, node: &Node, event: ProvisionEvent) -> ConductorResult<()> {
        crate::state::next_state(
            &node.ident(),
            node.provision_state,
            event,
            node.target_provision_state,
        )
        .map(drop)
    }

    /// Apply a state change and persist it.
    async fn apply(
        &self,
        reservation: &mut NodeReservation,
        event: ProvisionEvent,
    ) -> ConductorResult<ProvisionState> {
        let to = transition(reservation.node_mut(), event, &self.events_tx)?;
        reservation.save().await?;
        Ok(to)
    }

    /// Move the node into a step phase and store its step list.
    ///
    /// Collection errors fail the node before any step runs.
    async fn start_steps<F>(
        &self,
        reservation: &mut NodeReservation,
        event: ProvisionEvent,
        phase: StepPhase,
        collect: F,
    ) -> ConductorResult<Continuation>
    where
        F: FnOnce(&StepCollector<'_>) -> ConductorResult<Vec<Step>>,
    {
        self.apply(reservation, event).await?;

        let collector = StepCollector::new(
            self.executor.registry(),
            &self.config.step_priority_overrides,
        );
        match collect(&collector) {
            Ok(steps) => {
                tracing::debug!(node = %reservation.id(), %phase, count = steps.len(), "steps collected");
                let info = &mut reservation.node_mut().driver_internal_info;
                info.steps = steps;
                info.step_phase = Some(phase);
                info.step_index = None;
                reservation.save().await?;
                Ok(Continuation::Steps)
            }
            Err(e) => {
                self.fail(reservation, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn fail(&self, reservation: &mut NodeReservation, error: &str) -> ConductorResult<()> {
        fail_node(
            reservation.node_mut(),
            error,
            &self.config.host,
            self.config.max_history_entries,
            &self.events_tx,
        )?;
        reservation.save().await
    }
}

/// Whether a node's callback timer has run past `timeout` seconds.
fn timed_out(node: &Node, timeout: u64, now: DateTime<Utc>) -> bool {
    let started = match node.driver_internal_info.agent_last_heartbeat {
        Some(heartbeat) if heartbeat > node.provision_updated_at => heartbeat,
        _ => node.provision_updated_at,
    };
    u64::try_from((now - started).num_seconds()).unwrap_or(0) > timeout
}

fn wait_activity(state: ProvisionState) -> &'static str {
    match state {
        ProvisionState::CleanWait => "cleaning",
        ProvisionState::DeployWait => "waiting for deploy callback from",
        ProvisionState::ServiceWait => "servicing",
        ProvisionState::RescueWait => "rescuing",
        _ => "waiting for",
    }
}

fn phase_name(state: ProvisionState) -> &'static str {
    match state.phase() {
        Some(StepPhase::Clean) => "Cleaning",
        Some(StepPhase::Deploy) => "Deployment",
        Some(StepPhase::Service) => "Servicing",
        None => "Rescue",
    }
}
