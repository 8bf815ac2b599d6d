#![warn(missing_docs)]

//! CairnFS metadata subsystem: file metadata, node registry, liveness, replica placement and failure recovery

pub mod config;
pub mod dispatch;
pub mod liveness;
pub mod logging;
pub mod persist;
pub mod placement;
pub mod recovery;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod types;

pub use config::MetaConfig;
pub use dispatch::{ReplicationDispatcher, ReplicationPlan, TcpDispatcher};
pub use liveness::{Clock, LivenessTracker, ManualClock, SystemClock};
pub use logging::{init_logging, LogConfig};
pub use persist::{load_metadata, save_metadata, LoadReport};
pub use placement::PlacementEngine;
pub use recovery::{RecoveryEvent, RecoveryLoop, RecoveryReport};
pub use registry::NodeRegistry;
pub use service::ControlPlane;
pub use store::{FileRecord, MetadataStore};
pub use types::{errno_of, FileAttr, FileEntry, FileStatx, MetaError, NodeEntry, NodeId};
