//! Replica placement.
//!
//! Chooses which alive, registered nodes hold a file's replicas. Preferred
//! nodes are taken first in caller order; the remainder is filled from the
//! other alive nodes in ascending id order. Placement is all-or-nothing.

use std::collections::HashSet;
use std::sync::Arc;

use crate::registry::NodeRegistry;
use crate::types::{MetaError, NodeId};

/// Selects target nodes from the alive subset of the registry.
pub struct PlacementEngine {
    registry: Arc<NodeRegistry>,
}

impl PlacementEngine {
    /// Creates a placement engine over `registry`.
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Picks `replication_factor` distinct alive nodes.
    ///
    /// # Arguments
    /// * `preferred` - Nodes to use first, in order; unknown or dead entries are skipped
    /// * `replication_factor` - Number of nodes required
    ///
    /// # Returns
    /// The selected nodes, or `InsufficientReplicas` with nothing selected
    pub fn place(
        &self,
        preferred: &[NodeId],
        replication_factor: usize,
    ) -> Result<Vec<NodeId>, MetaError> {
        self.select(preferred, &[], replication_factor)
    }

    /// Picks one alive node not already holding a replica of the file.
    ///
    /// Used by recovery to fill a single vacated slot. Returns None when no
    /// eligible node exists.
    pub fn place_one(&self, current_replicas: &[NodeId]) -> Option<NodeId> {
        self.select(&[], current_replicas, 1)
            .ok()
            .and_then(|mut nodes| nodes.pop())
    }

    fn select(
        &self,
        preferred: &[NodeId],
        exclude: &[NodeId],
        count: usize,
    ) -> Result<Vec<NodeId>, MetaError> {
        let alive = self.registry.alive_nodes();
        let alive_set: HashSet<&NodeId> = alive.iter().collect();
        let mut taken: HashSet<&NodeId> = exclude.iter().collect();
        let mut selected: Vec<NodeId> = Vec::with_capacity(count);

        for candidate in preferred.iter().chain(alive.iter()) {
            if selected.len() == count {
                break;
            }
            if alive_set.contains(candidate) && taken.insert(candidate) {
                selected.push(candidate.clone());
            }
        }

        if selected.len() < count {
            tracing::debug!(
                needed = count,
                available = selected.len(),
                "placement cannot satisfy replica count"
            );
            return Err(MetaError::InsufficientReplicas {
                needed: count,
                available: selected.len(),
            });
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::{LivenessTracker, ManualClock};
    use std::time::Duration;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    struct Fixture {
        registry: Arc<NodeRegistry>,
        clock: Arc<ManualClock>,
    }

    fn setup(ids: &[&str]) -> (Fixture, PlacementEngine) {
        let clock = Arc::new(ManualClock::new());
        let liveness = LivenessTracker::with_clock(Duration::from_secs(30), clock.clone());
        let registry = Arc::new(NodeRegistry::new(Arc::new(liveness)));
        for (i, id) in ids.iter().enumerate() {
            registry.register_node(node(id), format!("10.0.0.{}", i + 1), 7000);
        }
        let engine = PlacementEngine::new(registry.clone());
        (Fixture { registry, clock }, engine)
    }

    // Lets a threshold elapse, then heartbeats every node except `id`.
    fn kill(fx: &Fixture, id: &str) {
        fx.clock.advance(Duration::from_secs(31));
        for entry in fx.registry.all_nodes() {
            if entry.node_id.as_str() != id {
                fx.registry.record_heartbeat(&entry.node_id);
            }
        }
    }

    #[test]
    fn test_fill_in_id_order() {
        let (_reg, engine) = setup(&["N3", "N1", "N2", "N4"]);
        let picked = engine.place(&[], 3).unwrap();
        assert_eq!(picked, vec![node("N1"), node("N2"), node("N3")]);
    }

    #[test]
    fn test_preferred_first_in_caller_order() {
        let (_reg, engine) = setup(&["N1", "N2", "N3", "N4"]);
        let picked = engine.place(&[node("N4"), node("N2")], 3).unwrap();
        assert_eq!(picked, vec![node("N4"), node("N2"), node("N1")]);
    }

    #[test]
    fn test_unknown_preferred_skipped() {
        let (_reg, engine) = setup(&["N1", "N2"]);
        let picked = engine.place(&[node("ghost"), node("N2")], 2).unwrap();
        assert_eq!(picked, vec![node("N2"), node("N1")]);
    }

    #[test]
    fn test_duplicate_preferred_counted_once() {
        let (_reg, engine) = setup(&["N1", "N2", "N3"]);
        let picked = engine.place(&[node("N2"), node("N2")], 2).unwrap();
        assert_eq!(picked, vec![node("N2"), node("N1")]);
    }

    #[test]
    fn test_dead_nodes_excluded() {
        let (fx, engine) = setup(&["N1", "N2", "N3", "N4"]);
        kill(&fx, "N1");
        let picked = engine.place(&[node("N1")], 3).unwrap();
        assert_eq!(picked, vec![node("N2"), node("N3"), node("N4")]);
    }

    #[test]
    fn test_insufficient_is_all_or_nothing() {
        let (_reg, engine) = setup(&["N1", "N2"]);
        match engine.place(&[], 3) {
            Err(MetaError::InsufficientReplicas { needed, available }) => {
                assert_eq!(needed, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientReplicas, got {:?}", other),
        }
    }

    #[test]
    fn test_no_nodes_registered() {
        let (_reg, engine) = setup(&[]);
        assert!(matches!(
            engine.place(&[], 1),
            Err(MetaError::InsufficientReplicas { available: 0, .. })
        ));
    }

    #[test]
    fn test_zero_replicas_is_empty_success() {
        let (_reg, engine) = setup(&[]);
        assert!(engine.place(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn test_place_one_excludes_current_replicas() {
        let (_reg, engine) = setup(&["N1", "N2", "N3", "N4"]);
        let target = engine.place_one(&[node("N1"), node("N2"), node("N3")]);
        assert_eq!(target, Some(node("N4")));
    }

    #[test]
    fn test_place_one_none_when_exhausted() {
        let (_reg, engine) = setup(&["N1", "N2"]);
        assert_eq!(engine.place_one(&[node("N1"), node("N2")]), None);
    }

    #[test]
    fn test_place_one_skips_dead() {
        let (fx, engine) = setup(&["N1", "N2", "N3", "N4"]);
        kill(&fx, "N4");
        assert_eq!(engine.place_one(&[node("N1"), node("N2"), node("N3")]), None);
    }
}
