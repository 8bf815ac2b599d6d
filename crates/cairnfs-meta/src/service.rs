//! Control plane facade.
//!
//! `ControlPlane` wires the liveness tracker, node registry, placement
//! engine, metadata store and recovery loop together from one
//! [`MetaConfig`], and applies node lifecycle messages arriving over the
//! wire. Client-facing file operations go straight to [`ControlPlane::store`].

use std::sync::Arc;

use cairnfs_transport::{ControlMessage, ErrorReply};

use crate::config::MetaConfig;
use crate::dispatch::{ReplicationDispatcher, TcpDispatcher};
use crate::liveness::{Clock, LivenessTracker, SystemClock};
use crate::persist::{self, LoadReport};
use crate::placement::PlacementEngine;
use crate::recovery::RecoveryLoop;
use crate::registry::NodeRegistry;
use crate::store::MetadataStore;
use crate::types::{MetaError, NodeId};

/// The metadata and replica-placement control plane.
pub struct ControlPlane {
    config: MetaConfig,
    liveness: Arc<LivenessTracker>,
    registry: Arc<NodeRegistry>,
    placement: Arc<PlacementEngine>,
    store: Arc<MetadataStore>,
    recovery: Arc<RecoveryLoop>,
}

impl ControlPlane {
    /// Builds every component from `config`, repairing replicas through `dispatcher`.
    pub fn new(config: MetaConfig, dispatcher: Arc<dyn ReplicationDispatcher>) -> Self {
        Self::with_clock(config, dispatcher, Arc::new(SystemClock))
    }

    /// Like [`ControlPlane::new`] with liveness read from `clock`.
    pub fn with_clock(
        config: MetaConfig,
        dispatcher: Arc<dyn ReplicationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let liveness = Arc::new(LivenessTracker::with_clock(
            config.dead_node_threshold(),
            clock,
        ));
        let registry = Arc::new(NodeRegistry::new(liveness.clone()));
        let placement = Arc::new(PlacementEngine::new(registry.clone()));
        let store = Arc::new(MetadataStore::new(
            placement.clone(),
            config.replication_factor,
        ));
        let recovery = Arc::new(RecoveryLoop::new(
            store.clone(),
            registry.clone(),
            placement.clone(),
            dispatcher,
            config.recovery_interval(),
        ));

        Self {
            config,
            liveness,
            registry,
            placement,
            store,
            recovery,
        }
    }

    /// Builds a control plane that dispatches replication over TCP.
    pub fn with_tcp_dispatch(config: MetaConfig) -> Self {
        let dispatcher = Arc::new(TcpDispatcher::new(config.dispatch_timeout()));
        Self::new(config, dispatcher)
    }

    /// Startup configuration.
    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    /// Liveness tracker shared by the registry.
    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    /// Storage node table.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Replica placement.
    pub fn placement(&self) -> &Arc<PlacementEngine> {
        &self.placement
    }

    /// File metadata table.
    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    /// Recovery loop; spawn [`RecoveryLoop::run`] to start it.
    pub fn recovery(&self) -> &Arc<RecoveryLoop> {
        &self.recovery
    }

    /// Applies a node lifecycle message and returns the reply to send.
    ///
    /// Heartbeats from unregistered nodes are dropped and answered with
    /// `ENOENT` so the node knows to register. Messages the metadata server
    /// never receives are answered with `EINVAL`.
    pub fn handle_message(&self, msg: ControlMessage) -> ControlMessage {
        match msg {
            ControlMessage::RegisterNode(m) => {
                self.registry
                    .register_node(NodeId::new(m.node_id), m.address, m.port);
                ControlMessage::Ack
            }
            ControlMessage::Heartbeat(m) => {
                let node_id = NodeId::new(m.node_id);
                if self.registry.record_heartbeat(&node_id) {
                    ControlMessage::Ack
                } else {
                    error_reply(&MetaError::NodeNotFound(node_id))
                }
            }
            other => {
                tracing::debug!(opcode = ?other.opcode(), "unexpected message at metadata server");
                ControlMessage::Error(ErrorReply {
                    errno: libc::EINVAL,
                    message: format!("{:?} is not accepted here", other.opcode()),
                })
            }
        }
    }

    /// Loads both tables from the configured snapshot paths.
    pub fn load(&self) -> LoadReport {
        persist::load_metadata(
            &self.store,
            &self.registry,
            &self.config.file_metadata_path,
            &self.config.node_registry_path,
        )
    }

    /// Saves both tables to the configured snapshot paths.
    pub fn save(&self) -> Result<(), MetaError> {
        persist::save_metadata(
            &self.store,
            &self.registry,
            &self.config.file_metadata_path,
            &self.config.node_registry_path,
        )
    }
}

fn error_reply(err: &MetaError) -> ControlMessage {
    ControlMessage::Error(ErrorReply {
        errno: err.errno(),
        message: err.to_string(),
    })
}
