//! Heartbeat-based liveness tracking for storage nodes.
//!
//! Records the instant of the last successful contact with each node and
//! derives dead/alive at query time against a threshold that can change at
//! runtime. Nothing is cached: lowering the threshold takes effect on the
//! very next query.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::types::NodeId;

/// Source of "now" for liveness decisions.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Used by simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct LivenessState {
    last_success: HashMap<NodeId, Instant>,
    threshold: Duration,
}

/// Tracks last-success instants per node under a single lock.
pub struct LivenessTracker {
    state: Mutex<LivenessState>,
    clock: Arc<dyn Clock>,
}

impl LivenessTracker {
    /// Creates a tracker that declares a node dead after `threshold` of silence.
    pub fn new(threshold: Duration) -> Self {
        Self::with_clock(threshold, Arc::new(SystemClock))
    }

    /// Creates a tracker reading time from `clock`.
    pub fn with_clock(threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LivenessState {
                last_success: HashMap::new(),
                threshold,
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LivenessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a successful contact with `node_id` now.
    pub fn record_success(&self, node_id: &NodeId) {
        self.record_success_at(node_id, self.clock.now());
    }

    /// Records a successful contact at an explicit instant.
    pub fn record_success_at(&self, node_id: &NodeId, at: Instant) {
        let mut state = self.lock();
        state.last_success.insert(node_id.clone(), at);
    }

    /// Returns true if `node_id` has been silent for at least the threshold.
    ///
    /// Nodes that were never recorded are presumed alive.
    pub fn is_node_dead(&self, node_id: &NodeId) -> bool {
        self.is_node_dead_at(node_id, self.clock.now())
    }

    /// Liveness query evaluated at an explicit instant.
    pub fn is_node_dead_at(&self, node_id: &NodeId, now: Instant) -> bool {
        let state = self.lock();
        match state.last_success.get(node_id) {
            Some(last) => now.saturating_duration_since(*last) >= state.threshold,
            None => false,
        }
    }

    /// Replaces the threshold used by every later query.
    pub fn set_threshold(&self, threshold: Duration) {
        let mut state = self.lock();
        tracing::debug!(threshold_ms = threshold.as_millis() as u64, "dead-node threshold changed");
        state.threshold = threshold;
    }

    /// Returns the current threshold.
    pub fn threshold(&self) -> Duration {
        self.lock().threshold
    }

    /// Instant of the last recorded success, if any.
    pub fn last_success(&self, node_id: &NodeId) -> Option<Instant> {
        self.lock().last_success.get(node_id).copied()
    }

    /// Drops the record for `node_id`; it reverts to presumed-alive.
    pub fn forget(&self, node_id: &NodeId) -> bool {
        self.lock().last_success.remove(node_id).is_some()
    }
}
