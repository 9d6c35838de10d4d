//! Bounded cache of idle workers.
//!
//! Workers that finish a job cleanly are parked here, keyed by protocol,
//! so the next job for the same target can skip the process spawn. Each
//! protocol's idle set is bounded; inserting past the bound evicts the
//! entry that has been idle the longest, destroying its process.
//!
//! Matching prefers a worker bound to the exact (protocol, host, user,
//! credential) tuple. When none is idle, the default policy falls back to
//! any worker of the same protocol, which is sound for protocols whose
//! workers are stateless per request. Protocols that keep a logged-in
//! session alive between commands should be given
//! [`ReusePolicy::ExactBinding`] so a worker carrying one user's session
//! is never handed to another.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::worker::{Worker, WorkerBinding};

/// Default bound on idle workers per protocol.
pub const DEFAULT_MAX_IDLE_PER_PROTOCOL: usize = 6;

/// How aggressively idle workers may be reused across bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// Any idle worker of the protocol may serve any binding.
    #[default]
    ProtocolWide,
    /// Only a worker whose binding matches exactly may be reused.
    ExactBinding,
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bound on idle workers per protocol, checked on every insert.
    pub max_idle_per_protocol: usize,
    /// Policy applied to protocols not listed in `reuse_overrides`.
    pub default_reuse: ReusePolicy,
    /// Per-protocol policy overrides.
    pub reuse_overrides: HashMap<String, ReusePolicy>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_protocol: DEFAULT_MAX_IDLE_PER_PROTOCOL,
            default_reuse: ReusePolicy::ProtocolWide,
            reuse_overrides: HashMap::new(),
        }
    }
}

impl PoolConfig {
    /// Effective reuse policy for a protocol.
    pub fn reuse_for(&self, protocol: &str) -> ReusePolicy {
        self.reuse_overrides
            .get(protocol)
            .copied()
            .unwrap_or(self.default_reuse)
    }
}

struct IdleEntry {
    worker: Worker,
    parked_at: Instant,
}

/// Thread-safe pool of idle workers.
///
/// Take and put are short, never-awaiting critical sections; the pool is
/// the only structure shared between concurrent jobs.
pub struct WorkerPool {
    idle: Mutex<HashMap<String, Vec<IdleEntry>>>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Removes and returns an idle worker usable for `binding`.
    ///
    /// An exact binding match always wins; the protocol-wide fallback
    /// applies only under [`ReusePolicy::ProtocolWide`].
    pub fn take(&self, binding: &WorkerBinding) -> Option<Worker> {
        let mut idle = self.idle.lock();
        let list = idle.get_mut(&binding.protocol)?;

        let exact = list.iter().position(|e| e.worker.binding() == binding);
        let position = exact.or_else(|| match self.config.reuse_for(&binding.protocol) {
            ReusePolicy::ProtocolWide => (!list.is_empty()).then_some(0),
            ReusePolicy::ExactBinding => None,
        })?;

        let entry = list.remove(position);
        if list.is_empty() {
            idle.remove(&binding.protocol);
        }

        tracing::debug!(
            protocol = %binding.protocol,
            exact_match = exact.is_some(),
            idle_for_ms = entry.parked_at.elapsed().as_millis() as u64,
            "reusing idle worker"
        );
        Some(entry.worker)
    }

    /// Parks a worker as idle under its binding.
    ///
    /// A dead worker's stream state is undefined; it is dropped here
    /// instead of parked. When the protocol's idle set is full, the
    /// longest-idle entry is evicted and destroyed first.
    pub fn put(&self, worker: Worker) {
        if !worker.is_alive() {
            tracing::debug!(
                protocol = %worker.binding().protocol,
                "dropping dead worker instead of pooling"
            );
            return;
        }

        let protocol = worker.binding().protocol.clone();
        let mut idle = self.idle.lock();
        let list = idle.entry(protocol.clone()).or_default();

        if list.len() >= self.config.max_idle_per_protocol {
            let oldest = list
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.parked_at)
                .map(|(i, _)| i);
            if let Some(index) = oldest {
                let evicted = list.remove(index);
                tracing::debug!(
                    protocol = %protocol,
                    idle_for_ms = evicted.parked_at.elapsed().as_millis() as u64,
                    "evicting oldest idle worker"
                );
            }
        }

        list.push(IdleEntry {
            worker,
            parked_at: Instant::now(),
        });
    }

    /// Number of idle workers for a protocol.
    pub fn idle_count(&self, protocol: &str) -> usize {
        self.idle
            .lock()
            .get(protocol)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total idle workers across all protocols.
    pub fn total_idle(&self) -> usize {
        self.idle.lock().values().map(Vec::len).sum()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
