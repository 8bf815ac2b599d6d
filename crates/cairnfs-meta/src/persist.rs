//! Snapshot persistence for the file table and the node registry.
//!
//! Each table lives in its own file as a bincode snapshot tagged with a magic
//! number and a format version. Saves write a sibling `.tmp` file, fsync it
//! and rename it over the target. Loads are all-or-nothing per table: a table
//! is replaced only after its whole snapshot parsed and validated.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::registry::NodeRegistry;
use crate::store::{FileRecord, MetadataStore};
use crate::types::{MetaError, NodeEntry};

const FILE_TABLE_MAGIC: u32 = 0xCA1F_F11E;
const NODE_TABLE_MAGIC: u32 = 0xCA1F_40DE;
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct FileTableSnapshot {
    magic: u32,
    version: u32,
    files: Vec<FileRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeTableSnapshot {
    magic: u32,
    version: u32,
    nodes: Vec<NodeEntry>,
}

/// What `load_metadata` managed to restore.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Files restored; 0 when the file table was missing or rejected
    pub files_loaded: usize,
    /// Nodes restored; 0 when the node table was missing or rejected
    pub nodes_loaded: usize,
    /// Why the file table was rejected, if it was
    pub file_error: Option<MetaError>,
    /// Why the node table was rejected, if it was
    pub node_error: Option<MetaError>,
}

impl LoadReport {
    /// True when neither table was rejected.
    pub fn is_clean(&self) -> bool {
        self.file_error.is_none() && self.node_error.is_none()
    }
}

/// Restores both tables from their snapshot files.
///
/// A missing or empty snapshot leaves its table as it is, which on a fresh
/// process means empty. A malformed snapshot also leaves its table untouched
/// and is reported in the returned [`LoadReport`]; this never fails outright.
pub fn load_metadata(
    store: &MetadataStore,
    registry: &NodeRegistry,
    file_metadata_path: &Path,
    node_registry_path: &Path,
) -> LoadReport {
    let mut report = LoadReport::default();

    match read_file_table(file_metadata_path) {
        Ok(Some(files)) => {
            report.files_loaded = files.len();
            store.replace_all(files);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(path = %file_metadata_path.display(), error = %e, "file table rejected");
            report.file_error = Some(e);
        }
    }

    match read_node_table(node_registry_path) {
        Ok(Some(nodes)) => {
            report.nodes_loaded = nodes.len();
            registry.replace_all(nodes);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(path = %node_registry_path.display(), error = %e, "node table rejected");
            report.node_error = Some(e);
        }
    }

    tracing::info!(
        files = report.files_loaded,
        nodes = report.nodes_loaded,
        "metadata loaded"
    );
    report
}

/// Writes both tables to their snapshot files.
pub fn save_metadata(
    store: &MetadataStore,
    registry: &NodeRegistry,
    file_metadata_path: &Path,
    node_registry_path: &Path,
) -> Result<(), MetaError> {
    let files = FileTableSnapshot {
        magic: FILE_TABLE_MAGIC,
        version: SNAPSHOT_VERSION,
        files: store.export_entries(),
    };
    let nodes = NodeTableSnapshot {
        magic: NODE_TABLE_MAGIC,
        version: SNAPSHOT_VERSION,
        nodes: registry.export_nodes(),
    };

    write_snapshot(file_metadata_path, &files, "file")?;
    write_snapshot(node_registry_path, &nodes, "node")?;

    tracing::debug!(
        files = files.files.len(),
        nodes = nodes.nodes.len(),
        "metadata saved"
    );
    Ok(())
}

fn read_file_table(path: &Path) -> Result<Option<Vec<FileRecord>>, MetaError> {
    let Some(snapshot) = read_snapshot::<FileTableSnapshot>(path, "file")? else {
        return Ok(None);
    };
    check_header("file", snapshot.magic, FILE_TABLE_MAGIC, snapshot.version)?;

    let mut names = HashSet::new();
    for record in &snapshot.files {
        if !names.insert(record.filename.as_str()) {
            return Err(malformed("file", format!("duplicate file '{}'", record.filename)));
        }
        let mut replicas = HashSet::new();
        if !record.entry.replica_nodes.iter().all(|n| replicas.insert(n)) {
            return Err(malformed(
                "file",
                format!("duplicate replica in '{}'", record.filename),
            ));
        }
    }
    Ok(Some(snapshot.files))
}

fn read_node_table(path: &Path) -> Result<Option<Vec<NodeEntry>>, MetaError> {
    let Some(snapshot) = read_snapshot::<NodeTableSnapshot>(path, "node")? else {
        return Ok(None);
    };
    check_header("node", snapshot.magic, NODE_TABLE_MAGIC, snapshot.version)?;

    let mut ids = HashSet::new();
    for node in &snapshot.nodes {
        if !ids.insert(&node.node_id) {
            return Err(malformed("node", format!("duplicate node {}", node.node_id)));
        }
    }
    Ok(Some(snapshot.nodes))
}

fn read_snapshot<T: DeserializeOwned>(
    path: &Path,
    table: &'static str,
) -> Result<Option<T>, MetaError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MetaError::IoError(e)),
    };
    if contents.is_empty() {
        return Ok(None);
    }
    bincode::deserialize(&contents)
        .map(Some)
        .map_err(|e| malformed(table, e.to_string()))
}

fn check_header(table: &'static str, magic: u32, expected: u32, version: u32) -> Result<(), MetaError> {
    if magic != expected {
        return Err(malformed(table, format!("bad magic {:#010x}", magic)));
    }
    if version != SNAPSHOT_VERSION {
        return Err(malformed(table, format!("unsupported version {}", version)));
    }
    Ok(())
}

fn write_snapshot<T: Serialize>(path: &Path, snapshot: &T, table: &'static str) -> Result<(), MetaError> {
    let encoded = bincode::serialize(snapshot).map_err(|e| MetaError::MalformedState {
        table,
        reason: format!("failed to serialize: {}", e),
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_path = path.to_path_buf();
    tmp_path.set_extension("tmp");
    {
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(&encoded)?;
        tmp_file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn malformed(table: &'static str, reason: String) -> MetaError {
    MetaError::MalformedState { table, reason }
}
