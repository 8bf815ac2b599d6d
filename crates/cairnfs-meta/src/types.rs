//! Core types shared across the control plane: identifiers, table entries and errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};

use cairnfs_transport::TransportError;

/// Identifier of a storage node, as announced in its registration message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a NodeId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Metadata record for one file, keyed by filename in the metadata store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// POSIX permission and type bits
    pub mode: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Logical size in bytes, authoritative at this layer
    pub size: u64,
    /// Nodes assigned to hold the file's data, in placement order, no duplicates
    pub replica_nodes: Vec<NodeId>,
    /// Opaque timestamp blob owned by the client collaborator (currently never populated)
    pub timestamps: Vec<u8>,
}

impl FileEntry {
    /// Creates a freshly placed file owned by root with size 0
    pub fn new(mode: u32, replica_nodes: Vec<NodeId>) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            size: 0,
            replica_nodes,
            timestamps: Vec::new(),
        }
    }

    /// Returns true if `node` is one of the file's replica holders
    pub fn has_replica(&self, node: &NodeId) -> bool {
        self.replica_nodes.contains(node)
    }

    /// Projects the stat-style attributes
    pub fn attr(&self) -> FileAttr {
        FileAttr {
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size: self.size,
        }
    }
}

/// Registry record for one storage node. Liveness lives in the tracker, not here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node identifier
    pub node_id: NodeId,
    /// Host name or IP address
    pub address: String,
    /// Data-plane port
    pub port: u16,
}

impl NodeEntry {
    /// Returns the `address:port` string used to reach the node.
    ///
    /// IPv6 literals are bracketed (`[::1]:7000`).
    pub fn socket_addr(&self) -> String {
        match self.address.parse::<Ipv6Addr>() {
            Ok(ip) => SocketAddr::from((ip, self.port)).to_string(),
            Err(_) => format!("{}:{}", self.address, self.port),
        }
    }
}

/// Result of `getattr`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Permission and type bits
    pub mode: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Size in bytes
    pub size: u64,
}

/// Result of `statx`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatx {
    /// Permission and type bits
    pub mode: u32,
    /// Size in bytes
    pub size: u64,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Timestamp blob; always empty until timestamp semantics are defined
    pub timestamps: Vec<u8>,
}

/// Error types for control-plane operations
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// The named file has no metadata entry.
    #[error("file '{0}' not found")]
    FileNotFound(String),

    /// The node is not registered.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// A file with this name already exists.
    #[error("file '{0}' already exists")]
    FileExists(String),

    /// The file exists but carries no extended attribute with this name.
    #[error("xattr '{name}' not set on '{filename}'")]
    XattrNotFound {
        /// File the lookup targeted
        filename: String,
        /// Attribute name
        name: String,
    },

    /// Not enough alive nodes to satisfy the replication factor.
    #[error("insufficient replicas: need {needed}, {available} alive nodes eligible")]
    InsufficientReplicas {
        /// Replicas requested
        needed: usize,
        /// Eligible alive nodes found
        available: usize,
    },

    /// A persisted table could not be parsed.
    #[error("malformed {table} state: {reason}")]
    MalformedState {
        /// Which table failed to load
        table: &'static str,
        /// Parse failure detail
        reason: String,
    },

    /// A replication command could not be delivered or was not confirmed.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl MetaError {
    /// POSIX errno a filesystem client should see for this error.
    pub fn errno(&self) -> i32 {
        match self {
            MetaError::FileNotFound(_) | MetaError::NodeNotFound(_) => libc::ENOENT,
            MetaError::FileExists(_) => libc::EEXIST,
            MetaError::XattrNotFound { .. } => libc::ENODATA,
            MetaError::InsufficientReplicas { .. } => libc::ENOSPC,
            MetaError::MalformedState { .. } | MetaError::Dispatch(_) => libc::EIO,
            MetaError::IoError(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<TransportError> for MetaError {
    fn from(e: TransportError) -> Self {
        MetaError::Dispatch(e.to_string())
    }
}

/// Converts an operation outcome into the return code a FUSE-style client expects:
/// `0` on success, the positive errno otherwise.
pub fn errno_of<T>(result: &Result<T, MetaError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.errno(),
    }
}
