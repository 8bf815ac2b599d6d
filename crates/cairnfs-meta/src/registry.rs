//! Storage node registry.
//!
//! Authoritative table of known storage nodes. Alive/dead is never stored on
//! the entry; it is derived on every query from the [`LivenessTracker`].
//! Dead nodes stay registered until explicitly decommissioned so recovery
//! and logs can still name them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::liveness::LivenessTracker;
use crate::types::{MetaError, NodeEntry, NodeId};

/// Table of registered storage nodes.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    liveness: Arc<LivenessTracker>,
}

impl NodeRegistry {
    /// Creates an empty registry backed by `liveness`.
    pub fn new(liveness: Arc<LivenessTracker>) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            liveness,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<NodeId, NodeEntry>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<NodeId, NodeEntry>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the liveness tracker this registry consults.
    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    /// Registers `node_id` or refreshes its address, and marks it alive.
    ///
    /// Returns true if the node was not previously known.
    pub fn register_node(&self, node_id: NodeId, address: String, port: u16) -> bool {
        let mut nodes = self.write();
        let entry = NodeEntry {
            node_id: node_id.clone(),
            address,
            port,
        };
        let is_new = nodes.insert(node_id.clone(), entry).is_none();
        drop(nodes);
        self.liveness.record_success(&node_id);

        if is_new {
            tracing::info!(node_id = %node_id, "storage node registered");
        } else {
            tracing::debug!(node_id = %node_id, "storage node re-registered");
        }
        is_new
    }

    /// Records a heartbeat from a registered node.
    ///
    /// Heartbeats from unknown nodes are dropped and return false.
    pub fn record_heartbeat(&self, node_id: &NodeId) -> bool {
        if !self.is_registered(node_id) {
            tracing::debug!(node_id = %node_id, "heartbeat from unregistered node dropped");
            return false;
        }
        self.liveness.record_success(node_id);
        true
    }

    /// Looks up a registered node.
    pub fn get_node(&self, node_id: &NodeId) -> Result<NodeEntry, MetaError> {
        self.read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| MetaError::NodeNotFound(node_id.clone()))
    }

    /// Returns true if `node_id` is registered, regardless of liveness.
    pub fn is_registered(&self, node_id: &NodeId) -> bool {
        self.read().contains_key(node_id)
    }

    /// Returns true if `node_id` is registered and currently alive.
    pub fn is_alive(&self, node_id: &NodeId) -> bool {
        self.is_registered(node_id) && !self.liveness.is_node_dead(node_id)
    }

    /// All registered nodes, sorted by id.
    pub fn all_nodes(&self) -> Vec<NodeEntry> {
        let mut nodes: Vec<NodeEntry> = self.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Registered nodes that are currently alive, sorted by id.
    pub fn alive_nodes(&self) -> Vec<NodeId> {
        self.all_nodes()
            .into_iter()
            .map(|n| n.node_id)
            .filter(|id| !self.liveness.is_node_dead(id))
            .collect()
    }

    /// Registered nodes that are currently dead, sorted by id.
    pub fn dead_nodes(&self) -> Vec<NodeId> {
        self.all_nodes()
            .into_iter()
            .map(|n| n.node_id)
            .filter(|id| self.liveness.is_node_dead(id))
            .collect()
    }

    /// Number of registered nodes, dead ones included.
    pub fn node_count(&self) -> usize {
        self.read().len()
    }

    /// Removes a node from the registry and forgets its liveness record.
    ///
    /// Files that still list the node are not touched here; the recovery
    /// loop treats unregistered replicas as lost and re-places them.
    pub fn decommission_node(&self, node_id: &NodeId) -> bool {
        let existed = self.write().remove(node_id).is_some();
        if existed {
            self.liveness.forget(node_id);
            tracing::info!(node_id = %node_id, "storage node decommissioned");
        }
        existed
    }

    /// Snapshot of every entry for persistence, sorted by id.
    pub fn export_nodes(&self) -> Vec<NodeEntry> {
        self.all_nodes()
    }

    /// Replaces the whole table, e.g. after loading persisted state.
    ///
    /// Loaded nodes get a fresh liveness record, so a node that never comes
    /// back is declared dead one threshold after the load.
    pub fn replace_all(&self, entries: Vec<NodeEntry>) {
        let loaded: Vec<NodeId> = entries.iter().map(|e| e.node_id.clone()).collect();
        let previous: Vec<NodeId> = {
            let mut nodes = self.write();
            let previous = nodes.drain().map(|(id, _)| id).collect();
            nodes.extend(entries.into_iter().map(|e| (e.node_id.clone(), e)));
            previous
        };
        for old in &previous {
            self.liveness.forget(old);
        }
        for id in &loaded {
            self.liveness.record_success(id);
        }
    }
}
