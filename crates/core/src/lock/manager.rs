//! Exclusive per-node reservations.
//!
//! A conductor must hold a node's reservation for the whole of any
//! state-changing operation. Reservations live in the node store so they
//! are visible to every conductor sharing it.
//!
//! The store only knows which host holds a node, so the `LockManager` also
//! tracks the nodes held by tasks in this process. A second task on the same
//! host is refused just like another host would be.

use crate::error::{ConductorError, ConductorResult};
use crate::state::node::fail_node;
use crate::store::NodeStore;
use mk_protocol::ipc::Event;
use mk_protocol::Node;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::Sender;
use uuid::Uuid;

/// Error recorded on nodes failed by startup reconciliation.
pub const RESTART_ERROR: &str = "Conductor restarted during operation";

/// Acquires and releases node reservations for one conductor host.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn NodeStore>,
    host: String,
    held: HeldNodes,
    retry_attempts: u32,
    retry_interval: Duration,
}

impl LockManager {
    /// Create a lock manager that does not retry.
    pub fn new(store: Arc<dyn NodeStore>, host: impl Into<String>) -> Self {
        Self {
            store,
            host: host.into(),
            held: HeldNodes::default(),
            retry_attempts: 0,
            retry_interval: Duration::from_secs(1),
        }
    }

    /// Retry `NodeLocked` up to `attempts` more times, `interval` apart.
    pub fn with_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_interval = interval;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Reserve a node for this host.
    ///
    /// # Errors
    ///
    /// `NodeLocked` if another host or another task on this host holds the
    /// node, `NodeNotFound` if it does not exist.
    pub async fn reserve(&self, id: Uuid) -> ConductorResult<NodeReservation> {
        if !self.held.claim(id) {
            return Err(ConductorError::NodeLocked {
                node: id.to_string(),
                holder: self.host.clone(),
            });
        }

        let node = match self.store.reserve_node(id, &self.host).await {
            Ok(node) => node,
            Err(e) => {
                self.held.unclaim(id);
                return Err(e);
            }
        };
        tracing::debug!(node = %id, host = %self.host, "node reserved");
        Ok(NodeReservation {
            node,
            store: Arc::clone(&self.store),
            host: self.host.clone(),
            held: self.held.clone(),
            released: false,
        })
    }

    /// Whether a task in this process currently holds the node.
    pub fn is_held(&self, id: Uuid) -> bool {
        self.held.contains(id)
    }

    /// Reserve a node, retrying while another host holds it.
    pub async fn reserve_with_retry(&self, id: Uuid) -> ConductorResult<NodeReservation> {
        let mut attempt = 0;
        loop {
            match self.reserve(id).await {
                Err(ConductorError::NodeLocked { node, holder }) if attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::debug!(
                        node = %node,
                        holder = %holder,
                        attempt,
                        "node locked, retrying"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
                result => return result,
            }
        }
    }

    /// Recover from an unclean shutdown of this host.
    ///
    /// Every reservation held by this host is cleared, since no operation
    /// survives a restart. Nodes it was actively working on ("-ing" states)
    /// are moved to their failure state with [`RESTART_ERROR`]. Wait states
    /// are left as they are because the agent callback may still arrive.
    pub async fn reconcile_on_startup(
        &self,
        events_tx: &Sender<Event>,
        max_history: usize,
    ) -> ConductorResult<ReconcileReport> {
        let cleared = self.store.clear_reservations(&self.host).await?;
        let mut failed = Vec::new();

        for id in &cleared {
            let _ = events_tx.send(Event::ReservationCleared {
                node_id: *id,
                host: self.host.clone(),
            });

            let Some(mut node) = self.store.get_node(*id).await? else {
                continue;
            };
            if !node.provision_state.is_active_work() {
                continue;
            }

            fail_node(&mut node, RESTART_ERROR, &self.host, max_history, events_tx)?;
            self.store.put_node(&node).await?;
            failed.push(*id);
        }

        if !cleared.is_empty() {
            tracing::warn!(
                host = %self.host,
                cleared = cleared.len(),
                failed = failed.len(),
                "cleared stale reservations on startup"
            );
        }

        Ok(ReconcileReport { cleared, failed })
    }
}

/// Node ids reserved by tasks in this process.
///
/// Shared by every clone of a `LockManager`. An id is removed only after the
/// store reservation is released, so a new holder never has its store
/// reservation cleared by the previous one.
#[derive(Clone, Default)]
struct HeldNodes(Arc<Mutex<HashSet<Uuid>>>);

impl HeldNodes {
    fn claim(&self, id: Uuid) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).insert(id)
    }

    fn unclaim(&self, id: Uuid) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }

    fn contains(&self, id: Uuid) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).contains(&id)
    }
}

/// Outcome of [`LockManager::reconcile_on_startup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Nodes whose reservation was cleared.
    pub cleared: Vec<Uuid>,
    /// Nodes moved to a failure state.
    pub failed: Vec<Uuid>,
}

/// A held node reservation.
///
/// Call [`NodeReservation::release`] when the operation ends. A guard that
/// is dropped unreleased logs a warning and releases in a background task.
pub struct NodeReservation {
    node: Node,
    store: Arc<dyn NodeStore>,
    host: String,
    held: HeldNodes,
    released: bool,
}

impl NodeReservation {
    pub fn id(&self) -> Uuid {
        self.node.uuid
    }

    /// The node as it was when reserved, plus local changes.
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    /// Persist the local copy of the node.
    pub async fn save(&self) -> ConductorResult<()> {
        self.store.put_node(&self.node).await
    }

    /// Reload the node from the store.
    pub async fn refresh(&mut self) -> ConductorResult<()> {
        self.node = self
            .store
            .get_node(self.node.uuid)
            .await?
            .ok_or_else(|| ConductorError::NodeNotFound(self.node.uuid.to_string()))?;
        Ok(())
    }

    pub async fn release(mut self) -> ConductorResult<()> {
        self.released = true;
        let result = self.store.release_node(self.node.uuid, &self.host).await;
        self.held.unclaim(self.node.uuid);
        result?;
        tracing::debug!(node = %self.node.uuid, host = %self.host, "node released");
        Ok(())
    }
}

impl Drop for NodeReservation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(
            node = %self.node.uuid,
            host = %self.host,
            "reservation dropped without release"
        );
        let id = self.node.uuid;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                let held = self.held.clone();
                let host = self.host.clone();
                handle.spawn(async move {
                    if let Err(e) = store.release_node(id, &host).await {
                        tracing::error!(node = %id, error = %e, "failed to release reservation");
                    }
                    held.unclaim(id);
                });
            }
            Err(_) => self.held.unclaim(id),
        }
    }
}
