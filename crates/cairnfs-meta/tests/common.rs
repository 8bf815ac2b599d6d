//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cairnfs_meta::{
    ControlPlane, ManualClock, MetaConfig, MetaError, NodeId, ReplicationDispatcher,
    ReplicationPlan,
};
use cairnfs_transport::{ControlMessage, Heartbeat, RegisterNode};
use tokio::sync::Notify;

type Hook = Box<dyn Fn(&ReplicationPlan) + Send + Sync>;

/// Dispatcher that records every plan and confirms it unless told otherwise.
#[derive(Default)]
pub struct RecordingDispatcher {
    plans: Mutex<Vec<ReplicationPlan>>,
    fail: AtomicBool,
    hold: AtomicBool,
    entered: Notify,
    release: Notify,
    before_confirm: Mutex<Option<Hook>>,
}

impl RecordingDispatcher {
    /// Plans seen so far, in dispatch order.
    pub fn plans(&self) -> Vec<ReplicationPlan> {
        self.plans.lock().unwrap().clone()
    }

    /// Makes every later dispatch fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Parks each dispatch until [`RecordingDispatcher::release_one`].
    pub fn set_holding(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Waits until a held dispatch has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets one held dispatch continue.
    pub fn release_one(&self) {
        self.release.notify_one();
    }

    /// Runs `hook` after the transfer "completes" but before it is confirmed.
    pub fn before_confirm(&self, hook: impl Fn(&ReplicationPlan) + Send + Sync + 'static) {
        *self.before_confirm.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl ReplicationDispatcher for RecordingDispatcher {
    async fn replicate(&self, plan: &ReplicationPlan) -> Result<(), MetaError> {
        self.plans.lock().unwrap().push(plan.clone());
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if let Some(hook) = self.before_confirm.lock().unwrap().as_ref() {
            hook(plan);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MetaError::Dispatch("simulated transfer failure".into()));
        }
        Ok(())
    }
}

/// In-process control plane with simulated storage nodes and a manual clock.
pub struct TestCluster {
    pub plane: Arc<ControlPlane>,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<RecordingDispatcher>,
    stopped: Mutex<HashSet<String>>,
}

/// Threshold used by [`TestCluster`]; heartbeats every `HEARTBEAT` keep nodes alive.
pub const THRESHOLD: Duration = Duration::from_secs(30);
pub const HEARTBEAT: Duration = Duration::from_secs(10);

impl TestCluster {
    /// Control plane with `replication_factor`, nodes named in `ids` registered.
    pub fn new(ids: &[&str], replication_factor: usize) -> Self {
        let config = MetaConfig {
            replication_factor,
            dead_node_threshold_ms: THRESHOLD.as_millis() as u64,
            ..MetaConfig::default()
        };
        Self::with_config(ids, config)
    }

    /// Like [`TestCluster::new`] with a full config.
    pub fn with_config(ids: &[&str], config: MetaConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let plane = Arc::new(ControlPlane::with_clock(
            config,
            dispatcher.clone(),
            clock.clone(),
        ));
        let cluster = Self {
            plane,
            clock,
            dispatcher,
            stopped: Mutex::new(HashSet::new()),
        };
        for id in ids {
            cluster.register(id);
        }
        cluster
    }

    /// Sends a RegisterNode message for `id`.
    pub fn register(&self, id: &str) {
        let index = self.plane.registry().node_count() + 1;
        let reply = self.plane.handle_message(ControlMessage::RegisterNode(RegisterNode {
            node_id: id.to_string(),
            address: format!("10.0.0.{}", index),
            port: 7000,
        }));
        assert_eq!(reply, ControlMessage::Ack);
        self.stopped.lock().unwrap().remove(id);
    }

    /// Stops heartbeats from `id`.
    pub fn stop_node(&self, id: &str) {
        self.stopped.lock().unwrap().insert(id.to_string());
    }

    /// Resumes heartbeats from `id`.
    pub fn start_node(&self, id: &str) {
        self.stopped.lock().unwrap().remove(id);
    }

    /// Advances the clock by `total` in heartbeat-sized steps; running nodes heartbeat each step.
    pub fn run_for(&self, total: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let step = HEARTBEAT.min(total - elapsed);
            self.clock.advance(step);
            elapsed += step;
            let stopped = self.stopped.lock().unwrap().clone();
            for entry in self.plane.registry().all_nodes() {
                if !stopped.contains(entry.node_id.as_str()) {
                    self.plane.handle_message(ControlMessage::Heartbeat(Heartbeat {
                        node_id: entry.node_id.to_string(),
                    }));
                }
            }
        }
    }

    /// Runs long enough for every stopped node to be declared dead.
    pub fn expire_stopped(&self) {
        self.run_for(THRESHOLD + HEARTBEAT);
    }

    /// Replica list of `filename`.
    pub fn nodes_of(&self, filename: &str) -> Vec<NodeId> {
        self.plane.store().get_file_nodes(filename).unwrap()
    }
}

/// Shorthand for a NodeId.
pub fn node(id: &str) -> NodeId {
    NodeId::new(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_creation() {
        let cluster = TestCluster::new(&["N1", "N2", "N3"], 3);
        assert_eq!(cluster.plane.registry().alive_nodes().len(), 3);
    }

    #[test]
    fn test_stopped_node_expires() {
        let cluster = TestCluster::new(&["N1", "N2", "N3"], 3);
        cluster.stop_node("N2");
        cluster.expire_stopped();
        assert_eq!(cluster.plane.registry().dead_nodes(), vec![node("N2")]);

        cluster.start_node("N2");
        cluster.run_for(HEARTBEAT);
        assert!(cluster.plane.registry().dead_nodes().is_empty());
    }
}
