//! Replication command dispatch.
//!
//! Recovery hands a [`ReplicationPlan`] to a [`ReplicationDispatcher`] and
//! commits the new replica only once the dispatcher reports the transfer
//! confirmed. [`TcpDispatcher`] speaks the control protocol to the nodes.

use std::time::Duration;

use async_trait::async_trait;
use cairnfs_transport::{
    ControlMessage, ReceiveFileCommand, ReplicateFileCommand, TcpTransport, TcpTransportConfig,
};

use crate::types::{MetaError, NodeEntry, NodeId};

/// One replica repair: copy `filename` from `source` to `target`, replacing `dead_node`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationPlan {
    /// File being repaired
    pub filename: String,
    /// Replica slot being vacated
    pub dead_node: NodeId,
    /// Alive replica holder that sends the data
    pub source: NodeEntry,
    /// Newly chosen node that receives the data
    pub target: NodeEntry,
}

impl ReplicationPlan {
    /// Command for the source: push the file to the target's address.
    pub fn replicate_command(&self) -> ReplicateFileCommand {
        ReplicateFileCommand {
            filename: self.filename.clone(),
            target_address: self.target.socket_addr(),
            source_node_id: self.source.node_id.to_string(),
        }
    }

    /// Command for the target: expect the file from the source's address.
    pub fn receive_command(&self) -> ReceiveFileCommand {
        ReceiveFileCommand {
            filename: self.filename.clone(),
            source_address: self.source.socket_addr(),
            target_node_id: self.target.node_id.to_string(),
        }
    }
}

/// Delivers replication commands to storage nodes.
#[async_trait]
pub trait ReplicationDispatcher: Send + Sync {
    /// Issues the command pair for `plan`.
    ///
    /// Returns `Ok` only after the transfer is confirmed complete; any other
    /// outcome leaves the file's replica set untouched.
    async fn replicate(&self, plan: &ReplicationPlan) -> Result<(), MetaError>;
}

/// Dispatcher that sends control frames over TCP.
pub struct TcpDispatcher {
    transport: TcpTransport,
    timeout: Duration,
}

impl TcpDispatcher {
    /// Creates a dispatcher whose connects and calls are each bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let config = TcpTransportConfig {
            connect_timeout_ms: timeout.as_millis() as u64,
            ..TcpTransportConfig::default()
        };
        Self {
            transport: TcpTransport::new(config),
            timeout,
        }
    }

    async fn call(&self, node: &NodeEntry, msg: ControlMessage) -> Result<ControlMessage, MetaError> {
        let conn = self.transport.connect(&node.socket_addr()).await?;
        Ok(conn.call(&msg, self.timeout).await?)
    }
}

#[async_trait]
impl ReplicationDispatcher for TcpDispatcher {
    async fn replicate(&self, plan: &ReplicationPlan) -> Result<(), MetaError> {
        // Target first, so it is listening before the source starts pushing.
        match self
            .call(&plan.target, ControlMessage::ReceiveFile(plan.receive_command()))
            .await?
        {
            ControlMessage::Ack => {}
            ControlMessage::Error(e) => {
                return Err(MetaError::Dispatch(format!(
                    "target {} refused {}: {} (errno {})",
                    plan.target.node_id, plan.filename, e.message, e.errno
                )));
            }
            other => {
                return Err(MetaError::Dispatch(format!(
                    "target {} sent unexpected {:?}",
                    plan.target.node_id,
                    other.opcode()
                )));
            }
        }

        tracing::debug!(
            filename = %plan.filename,
            source = %plan.source.node_id,
            target = %plan.target.node_id,
            "target ready, starting transfer"
        );

        match self
            .call(&plan.source, ControlMessage::ReplicateFile(plan.replicate_command()))
            .await?
        {
            ControlMessage::TransferComplete(done) if done.success => Ok(()),
            ControlMessage::TransferComplete(done) => Err(MetaError::Dispatch(format!(
                "transfer of {} to {} failed: {}",
                plan.filename, plan.target.node_id, done.message
            ))),
            ControlMessage::Error(e) => Err(MetaError::Dispatch(format!(
                "source {} refused {}: {} (errno {})",
                plan.source.node_id, plan.filename, e.message, e.errno
            ))),
            other => Err(MetaError::Dispatch(format!(
                "source {} sent unexpected {:?}",
                plan.source.node_id,
                other.opcode()
            ))),
        }
    }
}
