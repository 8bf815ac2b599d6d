//! Failure recovery loop.
//!
//! Periodically finds files whose replica set names a dead or unregistered
//! node and restores the replica count by copying from a surviving holder to
//! a newly placed node. Each scan works from short-lived snapshots of the registry and the
//! store; no lock is held across a dispatch. The new node replaces the dead
//! one only after the dispatcher confirms the transfer, and the commit
//! re-validates the file so a concurrent rename or delete simply causes the
//! slot to be retried (or dropped) on a later scan.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::dispatch::{ReplicationDispatcher, ReplicationPlan};
use crate::placement::PlacementEngine;
use crate::registry::NodeRegistry;
use crate::store::MetadataStore;
use crate::types::{NodeEntry, NodeId};

const MAX_BUFFERED_EVENTS: usize = 1024;

/// Outcome of one repair attempt, recorded for callers to drain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// The dead slot now points at `new_node`.
    ReplicaRestored {
        /// Repaired file
        filename: String,
        /// Node that was replaced
        dead_node: NodeId,
        /// Node now holding the copy
        new_node: NodeId,
    },
    /// Every alive node already holds the file; retried next scan.
    NoEligibleTarget {
        /// Affected file
        filename: String,
        /// Unrepaired slot
        dead_node: NodeId,
    },
    /// None of the file's replicas is alive to copy from.
    NoLiveSource {
        /// Affected file
        filename: String,
        /// Unrepaired slot
        dead_node: NodeId,
    },
    /// The transfer could not be confirmed; retried next scan.
    DispatchFailed {
        /// Affected file
        filename: String,
        /// Unrepaired slot
        dead_node: NodeId,
        /// Node the copy was headed to
        target: NodeId,
        /// Dispatcher error text
        reason: String,
    },
    /// The transfer succeeded but the file changed underneath (renamed,
    /// deleted, or already repaired), so nothing was committed.
    CommitSkipped {
        /// File name as seen by the scan
        filename: String,
        /// Slot the scan meant to replace
        dead_node: NodeId,
        /// Node that received the copy
        target: NodeId,
    },
}

/// Counters for one scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Referenced nodes that are dead or no longer registered, sorted
    pub dead_nodes: Vec<NodeId>,
    /// Files naming at least one of them
    pub files_affected: usize,
    /// Replication plans handed to the dispatcher
    pub dispatched: usize,
    /// Replica sets updated after a confirmed transfer
    pub committed: usize,
    /// Slots left alone because no replica was alive
    pub skipped_no_source: usize,
    /// Slots left alone because no eligible target existed
    pub skipped_no_target: usize,
    /// Slots already being repaired by an overlapping scan
    pub skipped_in_flight: usize,
    /// Slots repaired, renamed away or deleted after the snapshot was taken
    pub skipped_changed: usize,
    /// Dispatches that were not confirmed
    pub failed: usize,
    /// Confirmed transfers whose commit found the file changed
    pub stale: usize,
}

impl RecoveryReport {
    /// True when the scan found nothing to repair.
    pub fn is_idle(&self) -> bool {
        self.files_affected == 0
    }
}

// Removes the (filename, dead node) claim when the repair attempt ends,
// including when the scan future is dropped mid-dispatch.
struct InFlightClaim<'a> {
    map: &'a DashMap<(String, NodeId), ()>,
    key: (String, NodeId),
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Periodic scanner that re-replicates files off dead nodes.
pub struct RecoveryLoop {
    store: Arc<MetadataStore>,
    registry: Arc<NodeRegistry>,
    placement: Arc<PlacementEngine>,
    dispatcher: Arc<dyn ReplicationDispatcher>,
    interval: Duration,
    in_flight: DashMap<(String, NodeId), ()>,
    events: Mutex<VecDeque<RecoveryEvent>>,
}

impl RecoveryLoop {
    /// Creates a loop that scans every `interval`.
    pub fn new(
        store: Arc<MetadataStore>,
        registry: Arc<NodeRegistry>,
        placement: Arc<PlacementEngine>,
        dispatcher: Arc<dyn ReplicationDispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            placement,
            dispatcher,
            interval,
            in_flight: DashMap::new(),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Scan period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of repairs currently awaiting confirmation.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns and clears the buffered events, oldest first.
    ///
    /// Only the most recent events are kept if nobody drains.
    pub fn drain_events(&self) -> Vec<RecoveryEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.drain(..).collect()
    }

    fn emit(&self, event: RecoveryEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == MAX_BUFFERED_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Runs one full scan and returns what it did.
    ///
    /// A replica is lost when its node is dead or no longer registered, so
    /// references left behind by a decommission or a rejected node snapshot
    /// are repaired too. Failures for one file never stop the scan of the
    /// others.
    pub async fn scan_once(&self) -> RecoveryReport {
        let mut report = RecoveryReport {
            dead_nodes: self
                .store
                .referenced_nodes()
                .into_iter()
                .filter(|n| !self.registry.is_alive(n))
                .collect(),
            ..RecoveryReport::default()
        };
        if report.dead_nodes.is_empty() {
            return report;
        }

        let affected = self.store.files_referencing(&report.dead_nodes);
        report.files_affected = affected.len();

        for (filename, replicas) in affected {
            let dead_slots: Vec<NodeId> = replicas
                .iter()
                .filter(|n| report.dead_nodes.contains(n))
                .cloned()
                .collect();
            // Targets chosen for earlier slots of this file are off-limits for later ones.
            let mut chosen = Vec::new();

            for dead_node in dead_slots {
                self.repair_slot(&filename, dead_node, &mut chosen, &mut report)
                    .await;
            }
        }

        if !report.is_idle() {
            tracing::info!(
                dead_nodes = report.dead_nodes.len(),
                files_affected = report.files_affected,
                committed = report.committed,
                failed = report.failed,
                "recovery scan finished"
            );
        }
        report
    }

    async fn repair_slot(
        &self,
        filename: &str,
        dead_node: NodeId,
        chosen: &mut Vec<NodeId>,
        report: &mut RecoveryReport,
    ) {
        let key = (filename.to_string(), dead_node.clone());
        let claim = match self.in_flight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                report.skipped_in_flight += 1;
                return;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                InFlightClaim {
                    map: &self.in_flight,
                    key,
                }
            }
        };

        // The scan's snapshot may be stale by now: another scan can have
        // repaired this slot, or a client renamed or deleted the file.
        let replicas = match self.store.get_file_nodes(filename) {
            Ok(replicas) if replicas.contains(&dead_node) && !self.registry.is_alive(&dead_node) => {
                replicas
            }
            _ => {
                tracing::debug!(filename, dead_node = %dead_node, "slot changed since snapshot, skipped");
                report.skipped_changed += 1;
                return;
            }
        };

        let Some(source) = self.live_source(&replicas) else {
            tracing::warn!(filename, dead_node = %dead_node, "no live replica to copy from");
            report.skipped_no_source += 1;
            self.emit(RecoveryEvent::NoLiveSource {
                filename: filename.to_string(),
                dead_node,
            });
            return;
        };

        let mut exclude = replicas;
        exclude.extend(chosen.iter().cloned());
        let target = self
            .placement
            .place_one(&exclude)
            .and_then(|id| self.registry.get_node(&id).ok());
        let Some(target) = target else {
            tracing::debug!(filename, dead_node = %dead_node, "no eligible target, retrying next scan");
            report.skipped_no_target += 1;
            self.emit(RecoveryEvent::NoEligibleTarget {
                filename: filename.to_string(),
                dead_node,
            });
            return;
        };
        chosen.push(target.node_id.clone());

        let plan = ReplicationPlan {
            filename: filename.to_string(),
            dead_node: dead_node.clone(),
            source,
            target: target.clone(),
        };
        report.dispatched += 1;
        let outcome = self.dispatcher.replicate(&plan).await;

        match outcome {
            Ok(()) => {
                if self.store.replace_replica(filename, &dead_node, &target.node_id) {
                    tracing::info!(
                        filename,
                        dead_node = %dead_node,
                        target = %target.node_id,
                        "replica restored"
                    );
                    report.committed += 1;
                    self.emit(RecoveryEvent::ReplicaRestored {
                        filename: filename.to_string(),
                        dead_node,
                        new_node: target.node_id,
                    });
                } else {
                    tracing::debug!(filename, dead_node = %dead_node, "file changed during transfer, commit skipped");
                    report.stale += 1;
                    self.emit(RecoveryEvent::CommitSkipped {
                        filename: filename.to_string(),
                        dead_node,
                        target: target.node_id,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(
                    filename,
                    dead_node = %dead_node,
                    target = %target.node_id,
                    error = %e,
                    "replica transfer failed, retrying next scan"
                );
                report.failed += 1;
                self.emit(RecoveryEvent::DispatchFailed {
                    filename: filename.to_string(),
                    dead_node,
                    target: target.node_id,
                    reason: e.to_string(),
                });
            }
        }
        drop(claim);
    }

    fn live_source(&self, replicas: &[NodeId]) -> Option<NodeEntry> {
        replicas
            .iter()
            .filter(|n| self.registry.is_alive(n))
            .find_map(|n| self.registry.get_node(n).ok())
    }

    /// Scans every interval until `shutdown` turns true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "recovery loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("recovery loop stopped");
    }
}
