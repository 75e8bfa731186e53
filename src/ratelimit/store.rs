//! Window stores: where per-key counters live.
//!
//! `WindowStore` is the seam between the limiter and its counter backend. The
//! in-process `MemoryStore` is the only implementation shipped here; a
//! deployment running several instances swaps in a store with a shared,
//! atomically incremented counter and nothing else changes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

use super::key::RateLimitKey;
use super::window::{Clock, RateLimitConfig, RateLimitResult, SystemClock, WindowEntry};
use crate::error::{Result, TollgateError};

/// Counter backend used by the limiter.
#[async_trait]
pub trait WindowStore: Send + Sync + 'static {
    /// Record one request for `key` and report where it stands in its window.
    async fn check(&self, key: &RateLimitKey, config: RateLimitConfig) -> Result<RateLimitResult>;

    /// Current count for `key` without recording anything. Unknown keys count zero.
    async fn get(&self, key: &RateLimitKey) -> Result<u64>;

    /// Forget everything about `key`.
    async fn reset(&self, key: &RateLimitKey) -> Result<()>;
}

/// In-process window store.
///
/// Each key maps to one `WindowEntry`. Checks go through the map's entry API,
/// which holds the shard lock for the whole read-decide-write, so two
/// concurrent requests for the same key can never both see the same count.
pub struct MemoryStore {
    entries: DashMap<String, WindowEntry>,
    clock: Arc<dyn Clock>,
    max_retention: Duration,
}

impl MemoryStore {
    /// Create a store on the system clock.
    ///
    /// `max_retention` must be at least as long as the longest window checked
    /// against this store, otherwise the sweep could evict a live window.
    pub fn new(max_retention: Duration) -> Self {
        Self::with_clock(max_retention, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(max_retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_retention,
        }
    }

    /// Record one request for `key`.
    pub fn check_now(&self, key: &RateLimitKey, config: RateLimitConfig) -> RateLimitResult {
        let now = self.clock.now_ms();

        match self.entries.entry(key.as_str().to_string()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().record(now, config),
            Entry::Vacant(vacant) => {
                debug!(
                    key = %key,
                    limit = config.limit(),
                    window_ms = config.window_ms(),
                    "Opening rate limit window"
                );
                let entry = WindowEntry::open(now);
                let result = entry.result(now, config);
                vacant.insert(entry);
                result
            }
        }
    }

    /// Current count for `key`, zero if unknown.
    pub fn count(&self, key: &RateLimitKey) -> u64 {
        self.entries
            .get(key.as_str())
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Snapshot of the entry for `key`.
    pub fn entry(&self, key: &RateLimitKey) -> Option<WindowEntry> {
        self.entries.get(key.as_str()).map(|entry| *entry)
    }

    /// Remove the entry for `key`.
    pub fn remove(&self, key: &RateLimitKey) {
        self.entries.remove(key.as_str());
    }

    /// Delete every entry older than the retention bound.
    ///
    /// An entry is judged by the age of its window start only; an elapsed
    /// window that is still younger than the bound stays put.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let retention_ms = self.max_retention.as_millis() as u64;
        let mut removed = 0;

        self.entries.retain(|key, entry| {
            let keep = entry.age(now) <= retention_ms;
            if !keep {
                trace!(key = %key, count = entry.count, "Evicting stale window");
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.entries.len(),
                "Swept stale rate limit windows"
            );
        }
        removed
    }

    /// Start a background task that sweeps every `interval`.
    ///
    /// The first sweep happens one interval after the call. A zero interval
    /// is rejected.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> Result<Sweeper> {
        if interval.is_zero() {
            return Err(TollgateError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let store = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        info!(
            interval_secs = interval.as_secs(),
            max_retention_secs = self.max_retention.as_secs(),
            "Starting rate limit sweeper"
        );

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticks = IntervalStream::new(tokio::time::interval_at(start, interval));

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    tick = ticks.next() => {
                        if tick.is_none() {
                            break;
                        }
                        store.sweep();
                    }
                }
            }
        });

        Ok(Sweeper {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The retention bound used by the sweep.
    pub fn max_retention(&self) -> Duration {
        self.max_retention
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn check(&self, key: &RateLimitKey, config: RateLimitConfig) -> Result<RateLimitResult> {
        Ok(self.check_now(key, config))
    }

    async fn get(&self, key: &RateLimitKey) -> Result<u64> {
        Ok(self.count(key))
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<()> {
        self.remove(key);
        Ok(())
    }
}

/// Handle to a running sweep task.
///
/// `stop` ends the task and waits for it. Dropping the handle aborts the task,
/// so a sweeper never outlives its owner. Neither touches stored entries.
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Stop sweeping and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Rate limit sweeper ended abnormally");
            }
        }
        info!("Rate limit sweeper stopped");
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
