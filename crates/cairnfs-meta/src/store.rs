//! File metadata store.
//!
//! Authoritative filename -> [`FileEntry`] table plus per-file extended
//! attributes. Every operation runs inside one acquisition of a single
//! `RwLock`, so rename, delete and attribute reads on the same filename are
//! linearizable. Placement is consulted before the lock is taken; no other
//! table's lock is ever held together with this one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::placement::PlacementEngine;
use crate::types::{FileAttr, FileEntry, FileStatx, MetaError, NodeId};

type Xattrs = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct StoreInner {
    files: HashMap<String, FileEntry>,
    xattrs: HashMap<String, Xattrs>,
}

/// One file as exported for persistence: the entry plus its xattrs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Key in the store
    pub filename: String,
    /// Attributes and replica set
    pub entry: FileEntry,
    /// Extended attributes, possibly empty
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

/// Filename-keyed metadata table.
pub struct MetadataStore {
    inner: RwLock<StoreInner>,
    placement: Arc<PlacementEngine>,
    replication_factor: usize,
}

impl MetadataStore {
    /// Creates an empty store placing new files on `replication_factor` nodes.
    pub fn new(placement: Arc<PlacementEngine>, replication_factor: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            placement,
            replication_factor,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured replica count for new files.
    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Creates a file and assigns its replicas.
    ///
    /// Nothing is created when placement fails.
    pub fn add_file(
        &self,
        filename: &str,
        preferred: &[NodeId],
        mode: u32,
    ) -> Result<Vec<NodeId>, MetaError> {
        if self.read().files.contains_key(filename) {
            return Err(MetaError::FileExists(filename.to_string()));
        }

        let replicas = self.placement.place(preferred, self.replication_factor)?;

        let mut inner = self.write();
        // A concurrent create may have won while placement ran.
        if inner.files.contains_key(filename) {
            return Err(MetaError::FileExists(filename.to_string()));
        }
        inner
            .files
            .insert(filename.to_string(), FileEntry::new(mode, replicas.clone()));
        drop(inner);

        tracing::debug!(filename, replicas = ?replicas, "file created");
        Ok(replicas)
    }

    /// Returns the file's replica holders in placement order.
    pub fn get_file_nodes(&self, filename: &str) -> Result<Vec<NodeId>, MetaError> {
        self.with_entry(filename, |e| e.replica_nodes.clone())
    }

    /// Returns mode, owner and size.
    pub fn get_file_attributes(&self, filename: &str) -> Result<FileAttr, MetaError> {
        self.with_entry(filename, FileEntry::attr)
    }

    /// Returns the statx projection. `timestamps` is always empty for now.
    pub fn get_file_statx(&self, filename: &str) -> Result<FileStatx, MetaError> {
        self.with_entry(filename, |e| FileStatx {
            mode: e.mode,
            size: e.size,
            uid: e.uid,
            gid: e.gid,
            timestamps: Vec::new(),
        })
    }

    /// Accepts a timestamp update. Only existence is validated; the blob is
    /// dropped until timestamp semantics are defined.
    pub fn update_file_timestamps(&self, filename: &str, _timestamps: &[u8]) -> Result<(), MetaError> {
        self.with_entry(filename, |_| ())
    }

    /// Access check. Mask evaluation belongs to the RBAC layer; this only
    /// validates existence.
    pub fn check_access(&self, filename: &str, _mask: u32) -> Result<(), MetaError> {
        self.with_entry(filename, |_| ())
    }

    /// Open check. Flags are not interpreted here.
    pub fn open_file(&self, filename: &str, _flags: u32) -> Result<(), MetaError> {
        self.with_entry(filename, |_| ())
    }

    /// Removes the file and its xattrs. Returns false if it did not exist.
    pub fn remove_file(&self, filename: &str) -> bool {
        let mut inner = self.write();
        let existed = inner.files.remove(filename).is_some();
        inner.xattrs.remove(filename);
        drop(inner);

        if existed {
            tracing::debug!(filename, "file removed");
        }
        existed
    }

    /// Atomically re-keys a file, carrying its attributes, replicas and xattrs.
    pub fn rename_file_entry(&self, old_name: &str, new_name: &str) -> Result<(), MetaError> {
        let mut inner = self.write();
        if !inner.files.contains_key(old_name) {
            return Err(MetaError::FileNotFound(old_name.to_string()));
        }
        if inner.files.contains_key(new_name) {
            return Err(MetaError::FileExists(new_name.to_string()));
        }

        if let Some(entry) = inner.files.remove(old_name) {
            inner.files.insert(new_name.to_string(), entry);
        }
        if let Some(xattrs) = inner.xattrs.remove(old_name) {
            inner.xattrs.insert(new_name.to_string(), xattrs);
        }
        drop(inner);

        tracing::debug!(from = old_name, to = new_name, "file renamed");
        Ok(())
    }

    /// Every filename currently present, in no particular order.
    pub fn get_all_file_names(&self) -> Vec<String> {
        self.read().files.keys().cloned().collect()
    }

    /// Number of files.
    pub fn file_count(&self) -> usize {
        self.read().files.len()
    }

    /// Sets the logical size after a write.
    pub fn update_file_size(&self, filename: &str, size: u64) -> Result<(), MetaError> {
        self.with_entry_mut(filename, |e| e.size = size)
    }

    /// chmod/chown-style update; `None` leaves a field unchanged.
    pub fn set_file_attributes(
        &self,
        filename: &str,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), MetaError> {
        self.with_entry_mut(filename, |e| {
            if let Some(mode) = mode {
                e.mode = mode;
            }
            if let Some(uid) = uid {
                e.uid = uid;
            }
            if let Some(gid) = gid {
                e.gid = gid;
            }
        })
    }

    /// Sets an extended attribute, replacing any previous value.
    pub fn set_xattr(&self, filename: &str, name: &str, value: &[u8]) -> Result<(), MetaError> {
        let mut inner = self.write();
        if !inner.files.contains_key(filename) {
            return Err(MetaError::FileNotFound(filename.to_string()));
        }
        inner
            .xattrs
            .entry(filename.to_string())
            .or_default()
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    /// Reads an extended attribute.
    pub fn get_xattr(&self, filename: &str, name: &str) -> Result<Vec<u8>, MetaError> {
        let inner = self.read();
        if !inner.files.contains_key(filename) {
            return Err(MetaError::FileNotFound(filename.to_string()));
        }
        inner
            .xattrs
            .get(filename)
            .and_then(|attrs| attrs.get(name))
            .cloned()
            .ok_or_else(|| MetaError::XattrNotFound {
                filename: filename.to_string(),
                name: name.to_string(),
            })
    }

    /// Lists xattr names in sorted order.
    pub fn list_xattrs(&self, filename: &str) -> Result<Vec<String>, MetaError> {
        let inner = self.read();
        if !inner.files.contains_key(filename) {
            return Err(MetaError::FileNotFound(filename.to_string()));
        }
        Ok(inner
            .xattrs
            .get(filename)
            .map(|attrs| attrs.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Removes an extended attribute.
    pub fn remove_xattr(&self, filename: &str, name: &str) -> Result<(), MetaError> {
        let mut guard = self.write();
        let inner = &mut *guard;
        if !inner.files.contains_key(filename) {
            return Err(MetaError::FileNotFound(filename.to_string()));
        }
        let removed = match inner.xattrs.get_mut(filename) {
            Some(attrs) => {
                let removed = attrs.remove(name).is_some();
                if attrs.is_empty() {
                    inner.xattrs.remove(filename);
                }
                removed
            }
            None => false,
        };
        if removed {
            Ok(())
        } else {
            Err(MetaError::XattrNotFound {
                filename: filename.to_string(),
                name: name.to_string(),
            })
        }
    }

    /// Every node named by at least one file, sorted and de-duplicated.
    pub fn referenced_nodes(&self) -> Vec<NodeId> {
        let inner = self.read();
        let mut nodes: Vec<NodeId> = inner
            .files
            .values()
            .flat_map(|e| e.replica_nodes.iter().cloned())
            .collect();
        drop(inner);
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Snapshot of `(filename, replicas)` for every file listing any node in
    /// `nodes`, sorted by filename. The lock is released on return.
    pub fn files_referencing(&self, nodes: &[NodeId]) -> Vec<(String, Vec<NodeId>)> {
        let inner = self.read();
        let mut hits: Vec<(String, Vec<NodeId>)> = inner
            .files
            .iter()
            .filter(|(_, e)| e.replica_nodes.iter().any(|r| nodes.contains(r)))
            .map(|(name, e)| (name.clone(), e.replica_nodes.clone()))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        hits
    }

    /// Replaces `dead` with `replacement` in the file's replica set, in place.
    ///
    /// Re-validates under the lock that the file still exists, still lists
    /// `dead`, and does not already list `replacement`. Returns false without
    /// mutating anything when any check fails.
    pub fn replace_replica(&self, filename: &str, dead: &NodeId, replacement: &NodeId) -> bool {
        let mut inner = self.write();
        let Some(entry) = inner.files.get_mut(filename) else {
            return false;
        };
        if entry.has_replica(replacement) {
            return false;
        }
        match entry.replica_nodes.iter().position(|n| n == dead) {
            Some(slot) => {
                entry.replica_nodes[slot] = replacement.clone();
                true
            }
            None => false,
        }
    }

    /// Every file with its xattrs, sorted by filename.
    pub fn export_entries(&self) -> Vec<FileRecord> {
        let inner = self.read();
        let mut records: Vec<FileRecord> = inner
            .files
            .iter()
            .map(|(name, entry)| FileRecord {
                filename: name.clone(),
                entry: entry.clone(),
                xattrs: inner.xattrs.get(name).cloned().unwrap_or_default(),
            })
            .collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        records
    }

    /// Replaces the whole table in one step.
    pub fn replace_all(&self, records: Vec<FileRecord>) {
        let mut fresh = StoreInner::default();
        for record in records {
            if !record.xattrs.is_empty() {
                fresh.xattrs.insert(record.filename.clone(), record.xattrs);
            }
            fresh.files.insert(record.filename, record.entry);
        }
        *self.write() = fresh;
    }

    fn with_entry<T>(&self, filename: &str, f: impl FnOnce(&FileEntry) -> T) -> Result<T, MetaError> {
        self.read()
            .files
            .get(filename)
            .map(f)
            .ok_or_else(|| MetaError::FileNotFound(filename.to_string()))
    }

    fn with_entry_mut<T>(
        &self,
        filename: &str,
        f: impl FnOnce(&mut FileEntry) -> T,
    ) -> Result<T, MetaError> {
        self.write()
            .files
            .get_mut(filename)
            .map(f)
            .ok_or_else(|| MetaError::FileNotFound(filename.to_string()))
    }
}
