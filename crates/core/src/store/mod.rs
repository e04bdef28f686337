//! Node persistence.
//!
//! This module defines the trait the conductor uses to persist nodes,
//! runbooks, deploy templates and the live conductor list. Implementations
//! may be backed by a database shared between conductors; the in-memory
//! store is used by `metal serve` and the test suite.
//!
//! Reservations are only changed through [`NodeStore::reserve_node`] and
//! [`NodeStore::release_node`], which must be atomic compare-and-set
//! operations. [`NodeStore::put_node`] never overwrites the stored
//! reservation of an existing node.

use crate::error::{ConductorError, ConductorResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mk_protocol::{DeployTemplate, Node, Runbook};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A conductor process registered as alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConductorRecord {
    pub hostname: String,
    pub conductor_group: String,
    pub registered_at: DateTime<Utc>,
}

/// Trait for node state persistence.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Get a node by UUID.
    async fn get_node(&self, id: Uuid) -> ConductorResult<Option<Node>>;

    /// Get a node by name.
    async fn get_node_by_name(&self, name: &str) -> ConductorResult<Option<Node>>;

    /// List all nodes.
    async fn list_nodes(&self) -> ConductorResult<Vec<Node>>;

    /// List the nodes whose `parent_node` is `parent`.
    async fn list_children(&self, parent: Uuid) -> ConductorResult<Vec<Node>>;

    /// Save a node. The stored reservation of an existing node is kept.
    async fn put_node(&self, node: &Node) -> ConductorResult<()>;

    /// Delete a node record.
    async fn delete_node(&self, id: Uuid) -> ConductorResult<()>;

    /// Atomically set the node's reservation to `host`.
    ///
    /// Succeeds when the node is unreserved or already reserved by `host`
    /// and returns the node as stored after the update. Fails with
    /// `NodeLocked` when another host holds it.
    async fn reserve_node(&self, id: Uuid, host: &str) -> ConductorResult<Node>;

    /// Clear the node's reservation if `host` holds it.
    ///
    /// Returns `false` when the node is unreserved or reserved by another
    /// host, in which case nothing changes.
    async fn release_node(&self, id: Uuid, host: &str) -> ConductorResult<bool>;

    /// Clear every reservation held by `host`. Returns the affected nodes.
    async fn clear_reservations(&self, host: &str) -> ConductorResult<Vec<Uuid>>;

    async fn get_runbook(&self, name_or_id: &str) -> ConductorResult<Option<Runbook>>;

    async fn list_runbooks(&self) -> ConductorResult<Vec<Runbook>>;

    async fn put_runbook(&self, runbook: &Runbook) -> ConductorResult<()>;

    async fn list_deploy_templates(&self) -> ConductorResult<Vec<DeployTemplate>>;

    async fn put_deploy_template(&self, template: &DeployTemplate) -> ConductorResult<()>;

    /// Register a conductor as alive, replacing any previous record.
    async fn register_conductor(&self, hostname: &str, group: &str) -> ConductorResult<()>;

    async fn unregister_conductor(&self, hostname: &str) -> ConductorResult<()>;

    async fn list_conductors(&self) -> ConductorResult<Vec<ConductorRecord>>;
}

/// In-memory node store.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<Uuid, Node>>,
    runbooks: RwLock<HashMap<Uuid, Runbook>>,
    templates: RwLock<HashMap<String, DeployTemplate>>,
    conductors: RwLock<HashMap<String, ConductorRecord>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get_node(&self, id: Uuid) -> ConductorResult<Option<Node>> {
        Ok(self.nodes.read().await.get(&id).cloned())
    }

    async fn get_node_by_name(&self, name: &str) -> ConductorResult<Option<Node>> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .find(|n| n.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_nodes(&self) -> ConductorResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by_key(|n| n.uuid);
        Ok(nodes)
    }

    async fn list_children(&self, parent: Uuid) -> ConductorResult<Vec<Node>> {
        let mut children: Vec<Node> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.parent_node == Some(parent))
            .cloned()
            .collect();
        children.sort_by_key(|n| n.uuid);
        Ok(children)
    }

    async fn put_node(&self, node: &Node) -> ConductorResult<()> {
        let mut nodes = self.nodes.write().await;
        let mut stored = node.clone();
        if let Some(existing) = nodes.get(&node.uuid) {
            stored.reservation = existing.reservation.clone();
        }
        nodes.insert(node.uuid, stored);
        Ok(())
    }

    async fn delete_node(&self, id: Uuid) -> ConductorResult<()> {
        self.nodes.write().await.remove(&id);
        Ok(())
    }

    async fn reserve_node(&self, id: Uuid, host: &str) -> ConductorResult<Node> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| ConductorError::NodeNotFound(id.to_string()))?;

        match node.reservation.as_deref() {
            Some(holder) if holder != host => Err(ConductorError::NodeLocked {
                node: node.ident(),
                holder: holder.to_string(),
            }),
            _ => {
                node.reservation = Some(host.to_string());
                Ok(node.clone())
            }
        }
    }

    async fn release_node(&self, id: Uuid, host: &str) -> ConductorResult<bool> {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(&id) else {
            return Ok(false);
        };

        if node.reservation.as_deref() == Some(host) {
            node.reservation = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear_reservations(&self, host: &str) -> ConductorResult<Vec<Uuid>> {
        let mut nodes = self.nodes.write().await;
        let mut cleared = Vec::new();
        for node in nodes.values_mut() {
            if node.reservation.as_deref() == Some(host) {
                node.reservation = None;
                cleared.push(node.uuid);
            }
        }
        cleared.sort();
        Ok(cleared)
    }

    async fn get_runbook(&self, name_or_id: &str) -> ConductorResult<Option<Runbook>> {
        let runbooks = self.runbooks.read().await;
        if let Ok(id) = Uuid::parse_str(name_or_id) {
            if let Some(runbook) = runbooks.get(&id) {
                return Ok(Some(runbook.clone()));
            }
        }
        Ok(runbooks.values().find(|r| r.name == name_or_id).cloned())
    }

    async fn list_runbooks(&self) -> ConductorResult<Vec<Runbook>> {
        let mut runbooks: Vec<Runbook> = self.runbooks.read().await.values().cloned().collect();
        runbooks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(runbooks)
    }

    async fn put_runbook(&self, runbook: &Runbook) -> ConductorResult<()> {
        self.runbooks
            .write()
            .await
            .insert(runbook.uuid, runbook.clone());
        Ok(())
    }

    async fn list_deploy_templates(&self) -> ConductorResult<Vec<DeployTemplate>> {
        let mut templates: Vec<DeployTemplate> =
            self.templates.read().await.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn put_deploy_template(&self, template: &DeployTemplate) -> ConductorResult<()> {
        self.templates
            .write()
            .await
            .insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn register_conductor(&self, hostname: &str, group: &str) -> ConductorResult<()> {
        self.conductors.write().await.insert(
            hostname.to_string(),
            ConductorRecord {
                hostname: hostname.to_string(),
                conductor_group: group.to_string(),
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn unregister_conductor(&self, hostname: &str) -> ConductorResult<()> {
        self.conductors.write().await.remove(hostname);
        Ok(())
    }

    async fn list_conductors(&self) -> ConductorResult<Vec<ConductorRecord>> {
        let mut conductors: Vec<ConductorRecord> =
            self.conductors.read().await.values().cloned().collect();
        conductors.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(conductors)
    }
}
