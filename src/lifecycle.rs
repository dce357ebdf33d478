//! Lifecycle Manager
//!
//! Owns admission control and idle/age eviction, independent of the
//! Runner Manager's own `task_id -> Runner` registry: this module only
//! ever sees `RunnerId`s and a small bookkeeping record per runner, the
//! same split the counter/registry pair in the bot module keeps between
//! "what exists" and "how many of it."

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::OrchestratorError;
use crate::runner::RunnerId;

#[derive(Debug, Clone, Copy)]
struct RunnerBookkeeping {
    start_time: Instant,
    last_activity: Instant,
    is_idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Idle,
    Age,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleStats {
    pub active: usize,
    pub idle: usize,
}

pub struct LifecycleManager {
    entries: RwLock<HashMap<RunnerId, RunnerBookkeeping>>,
    max_concurrent: usize,
    idle_timeout: Duration,
    max_runtime: Duration,
    terminated_by_idle: AtomicU64,
    terminated_by_max: AtomicU64,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(max_concurrent: usize, idle_timeout: Duration, max_runtime: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_concurrent,
            idle_timeout,
            max_runtime,
            terminated_by_idle: AtomicU64::new(0),
            terminated_by_max: AtomicU64::new(0),
        }
    }

    /// Admit a newly-constructed runner, or reject it if the
    /// concurrency cap is already full.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::MaxContainersReached` if the active
    /// runner count already equals `max_concurrent`.
    pub async fn register(&self, runner_id: RunnerId) -> Result<(), OrchestratorError> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_concurrent {
            return Err(OrchestratorError::MaxContainersReached(self.max_concurrent));
        }
        let now = Instant::now();
        entries.insert(
            runner_id,
            RunnerBookkeeping {
                start_time: now,
                last_activity: now,
                is_idle: false,
            },
        );
        Ok(())
    }

    /// Remove a runner's bookkeeping, freeing its concurrency slot.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::NotFound` if the runner was never
    /// registered (or was already unregistered).
    pub async fn unregister(&self, runner_id: RunnerId) -> Result<(), OrchestratorError> {
        let mut entries = self.entries.write().await;
        entries
            .remove(&runner_id)
            .map(|_| ())
            .ok_or(OrchestratorError::NotFound(runner_id))
    }

    /// Record that a runner just did something; clears its idle flag.
    /// Unknown runner ids are silently ignored.
    pub async fn notify_activity(&self, runner_id: RunnerId) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&runner_id) {
            entry.last_activity = Instant::now();
            entry.is_idle = false;
        }
    }

    #[must_use]
    pub async fn stats(&self) -> LifecycleStats {
        let entries = self.entries.read().await;
        let idle = entries.values().filter(|e| e.is_idle).count();
        LifecycleStats {
            active: entries.len(),
            idle,
        }
    }

    #[must_use]
    pub fn terminated_by_idle(&self) -> u64 {
        self.terminated_by_idle.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn terminated_by_max(&self) -> u64 {
        self.terminated_by_max.load(Ordering::Relaxed)
    }

    /// Find runners to evict. `ready_ids` is the subset of registered
    /// runners currently in the `Ready` state — idle eviction only ever
    /// applies to a `Ready` runner; age eviction applies regardless of
    /// state. Marks the idle flag and increments the matching counter
    /// inline, then releases the lock before returning candidates so
    /// the caller can stop each one without holding it.
    pub async fn sweep(&self, ready_ids: &HashSet<RunnerId>) -> Vec<(RunnerId, EvictionReason)> {
        let now = Instant::now();
        let mut candidates = Vec::new();
        let mut entries = self.entries.write().await;

        for (runner_id, entry) in entries.iter_mut() {
            if now.duration_since(entry.last_activity) > self.idle_timeout {
                entry.is_idle = true;
                if ready_ids.contains(runner_id) {
                    candidates.push((*runner_id, EvictionReason::Idle));
                    self.terminated_by_idle.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            if now.duration_since(entry.start_time) > self.max_runtime {
                candidates.push((*runner_id, EvictionReason::Age));
                self.terminated_by_max.fetch_add(1, Ordering::Relaxed);
            }
        }

        candidates
    }
}
