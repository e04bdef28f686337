//! Consistent hash ring mapping nodes to conductors.
//!
//! Each live conductor owns `2^partition_exponent` points on a ring of md5
//! hashes, one ring per conductor group. A node maps to the first
//! `replicas` distinct conductors found walking clockwise from its own hash.
//!
//! A [`HashRing`] is an immutable snapshot. [`RingRefresher`] rebuilds it
//! from the store on an interval and publishes each new version through a
//! `watch` channel; readers clone the current `Arc` and keep using it for
//! the duration of their work.

use crate::error::ConductorResult;
use crate::store::{ConductorRecord, NodeStore};
use mk_protocol::Node;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

fn hash_key(data: &str) -> u64 {
    let digest = md5::compute(data.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);
    u64::from_be_bytes(bytes)
}

/// Versioned snapshot of the conductor hash ring.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    version: u64,
    replicas: usize,
    rings: HashMap<String, BTreeMap<u64, String>>,
    hosts: HashMap<String, Vec<String>>,
}

impl HashRing {
    /// Build a ring from the live conductor list.
    pub fn new(
        conductors: &[ConductorRecord],
        partition_exponent: u32,
        replicas: usize,
        version: u64,
    ) -> Self {
        let partitions = 1u64 << partition_exponent.min(16);
        let mut rings: HashMap<String, BTreeMap<u64, String>> = HashMap::new();
        let mut hosts: HashMap<String, Vec<String>> = HashMap::new();

        for conductor in conductors {
            let ring = rings.entry(conductor.conductor_group.clone()).or_default();
            for partition in 0..partitions {
                let key = hash_key(&format!("{}-{partition}", conductor.hostname));
                ring.insert(key, conductor.hostname.clone());
            }
            hosts
                .entry(conductor.conductor_group.clone())
                .or_default()
                .push(conductor.hostname.clone());
        }

        for group in hosts.values_mut() {
            group.sort();
            group.dedup();
        }

        Self {
            version,
            replicas: replicas.max(1),
            rings,
            hosts,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Hosts in the node's conductor group.
    pub fn hosts(&self, group: &str) -> &[String] {
        self.hosts.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Conductors responsible for a node, primary first.
    pub fn conductors_for(&self, node: &Node) -> Vec<String> {
        self.conductors_for_key(&node.conductor_group, node.uuid)
    }

    fn conductors_for_key(&self, group: &str, node: Uuid) -> Vec<String> {
        let Some(ring) = self.rings.get(group) else {
            return Vec::new();
        };
        let wanted = self.replicas.min(self.hosts(group).len());
        let key = hash_key(&node.to_string());

        let mut found: Vec<String> = Vec::with_capacity(wanted);
        for (_, host) in ring.range(key..).chain(ring.range(..key)) {
            if found.len() == wanted {
                break;
            }
            if !found.contains(host) {
                found.push(host.clone());
            }
        }
        found
    }

    /// Whether `host` should take work for the node.
    ///
    /// Always true before any conductor has registered. A node whose group
    /// has no live conductor is mapped to nobody and stays untouched until
    /// one joins that group.
    pub fn is_mapped(&self, host: &str, node: &Node) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        self.conductors_for(node).iter().any(|h| h == host)
    }
}

/// Periodically rebuilds the hash ring from the store.
pub struct RingRefresher {
    store: Arc<dyn NodeStore>,
    partition_exponent: u32,
    replicas: usize,
    interval: Duration,
    tx: watch::Sender<Arc<HashRing>>,
}

impl RingRefresher {
    /// Create a refresher and the receiver its snapshots are published on.
    pub fn new(
        store: Arc<dyn NodeStore>,
        partition_exponent: u32,
        replicas: usize,
        interval: Duration,
    ) -> (Self, watch::Receiver<Arc<HashRing>>) {
        let (tx, rx) = watch::channel(Arc::new(HashRing::default()));
        (
            Self {
                store,
                partition_exponent,
                replicas,
                interval,
                tx,
            },
            rx,
        )
    }

    /// Rebuild and publish the ring once.
    pub async fn refresh(&self) -> ConductorResult<Arc<HashRing>> {
        let conductors = self.store.list_conductors().await?;
        let version = self.tx.borrow().version() + 1;
        let ring = Arc::new(HashRing::new(
            &conductors,
            self.partition_exponent,
            self.replicas,
            version,
        ));
        self.tx.send_replace(Arc::clone(&ring));
        tracing::debug!(version, conductors = conductors.len(), "hash ring rebuilt");
        Ok(ring)
    }

    /// Rebuild the ring every interval until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    tracing::warn!(error = %e, "failed to rebuild hash ring");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::node::create_node;
    use crate::store::MemoryNodeStore;
    use chrono::Utc;
    use mk_protocol::CreateNodeRequest;

    fn record(host: &str) -> ConductorRecord {
        ConductorRecord {
            hostname: host.to_string(),
            conductor_group: String::new(),
            registered_at: Utc::now(),
        }
    }

    fn nodes(count: usize) -> Vec<Node> {
        (0..count)
            .map(|_| create_node(CreateNodeRequest::default()))
            .collect()
    }

    #[test]
    fn test_single_conductor_takes_everything() {
        let ring = HashRing::new(&[record("conductor-1")], 5, 1, 1);
        for node in nodes(20) {
            assert!(ring.is_mapped("conductor-1", &node));
            assert_eq!(ring.conductors_for(&node), vec!["conductor-1"]);
        }
    }

    #[test]
    fn test_empty_ring_maps_every_host() {
        let ring = HashRing::default();
        let node = create_node(CreateNodeRequest::default());
        assert!(ring.is_mapped("anything", &node));
        assert!(ring.conductors_for(&node).is_empty());
    }

    #[test]
    fn test_each_node_has_one_primary() {
        let ring = HashRing::new(&[record("c1"), record("c2"), record("c3")], 5, 1, 1);

        let mut seen = HashMap::new();
        for node in nodes(200) {
            let mapped: Vec<&str> = ["c1", "c2", "c3"]
                .into_iter()
                .filter(|host| ring.is_mapped(host, &node))
                .collect();
            assert_eq!(mapped.len(), 1);
            *seen.entry(mapped[0]).or_insert(0) += 1;
        }

        assert_eq!(seen.len(), 3, "every conductor should own some nodes");
    }

    #[test]
    fn test_mapping_is_stable_across_rebuilds() {
        let hosts = [record("c1"), record("c2")];
        let first = HashRing::new(&hosts, 5, 1, 1);
        let second = HashRing::new(&hosts, 5, 1, 2);

        for node in nodes(50) {
            assert_eq!(first.conductors_for(&node), second.conductors_for(&node));
        }
    }

    #[test]
    fn test_replicas_are_distinct() {
        let ring = HashRing::new(&[record("c1"), record("c2"), record("c3")], 4, 2, 1);
        for node in nodes(20) {
            let hosts = ring.conductors_for(&node);
            assert_eq!(hosts.len(), 2);
            assert_ne!(hosts[0], hosts[1]);
        }
    }

    #[test]
    fn test_groups_are_separate() {
        let mut other = record("c2");
        other.conductor_group = "rack-b".to_string();
        let ring = HashRing::new(&[record("c1"), other], 3, 1, 1);

        let mut node = create_node(CreateNodeRequest::default());
        node.conductor_group = "rack-b".to_string();
        assert_eq!(ring.conductors_for(&node), vec!["c2"]);
        assert!(ring.is_mapped("c2", &node));
        assert!(!ring.is_mapped("c1", &node));
    }

    #[test]
    fn test_group_without_conductor_is_unmapped() {
        let ring = HashRing::new(&[record("c1")], 3, 1, 1);

        let mut node = create_node(CreateNodeRequest::default());
        node.conductor_group = "rack-b".to_string();
        assert!(ring.conductors_for(&node).is_empty());
        assert!(!ring.is_mapped("c1", &node));
    }

    #[test]
    fn test_lone_conductor_only_maps_its_own_group() {
        let mut only = record("c2");
        only.conductor_group = "rack-b".to_string();
        let ring = HashRing::new(&[only], 3, 1, 1);

        let mut node = create_node(CreateNodeRequest::default());
        assert!(!ring.is_mapped("c2", &node));
        node.conductor_group = "rack-b".to_string();
        assert!(ring.is_mapped("c2", &node));
    }

    #[tokio::test]
    async fn test_refresher_publishes_new_versions() {
        let store = Arc::new(MemoryNodeStore::new());
        store.register_conductor("c1", "").await.expect("register");

        let (refresher, rx) = RingRefresher::new(store.clone(), 3, 1, Duration::from_secs(15));
        assert_eq!(rx.borrow().version(), 0);

        refresher.refresh().await.expect("refresh");
        assert_eq!(rx.borrow().version(), 1);
        assert_eq!(rx.borrow().hosts(""), ["c1".to_string()]);

        store.register_conductor("c2", "").await.expect("register");
        refresher.refresh().await.expect("refresh");
        assert_eq!(rx.borrow().version(), 2);
        assert_eq!(rx.borrow().hosts("").len(), 2);
    }
}
