//! Token-Bucket Rate Limiter (C2): burst-tolerant per-key limiting with an
//! optional FIFO wait queue. The queueing design follows spec.md §9's
//! re-architecture note directly: a scheduled task walks an explicit
//! `QueuedRequest` record per pending caller rather than capturing a
//! continuation, polling on an interval the way a background worker loop
//! would.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::collaborators::{Clock, SystemClock};

/// Hard cap on distinct keys tracked by any in-memory map in this module
/// (buckets, metrics, queues) — spec.md §5's bounded-eviction policy.
pub const MAX_UNIQUE_KEYS: usize = 10_000;
const DEFAULT_QUEUE_PROCESS_INTERVAL: Duration = Duration::from_millis(100);
const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const KEY_TTL: chrono::Duration = chrono::Duration::hours(1);
const DEFAULT_MAX_QUEUE_PER_KEY: usize = 100;
const DEFAULT_MAX_QUEUED_KEYS: usize = MAX_UNIQUE_KEYS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Storage errors in `check` return `allowed = true`.
    Open,
    /// Storage errors in `check` return `allowed = false` with a full retry window.
    Closed,
}

/// Tuning triple behind each named preset (spec §4.2). These affect
/// behavior only through capacity/refill numbers, never the algorithm.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterPreset {
    pub max_tokens: f64,
    pub refill_rate: f64,
    pub fail_mode: FailMode,
}

impl RateLimiterPreset {
    pub fn strict() -> Self {
        Self { max_tokens: 10.0, refill_rate: 1.0, fail_mode: FailMode::Closed }
    }

    pub fn standard() -> Self {
        Self { max_tokens: 60.0, refill_rate: 5.0, fail_mode: FailMode::Closed }
    }

    pub fn relaxed() -> Self {
        Self { max_tokens: 200.0, refill_rate: 20.0, fail_mode: FailMode::Open }
    }

    pub fn generous() -> Self {
        Self { max_tokens: 1_000.0, refill_rate: 100.0, fail_mode: FailMode::Open }
    }

    pub fn high_throughput() -> Self {
        Self { max_tokens: 5_000.0, refill_rate: 500.0, fail_mode: FailMode::Open }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: f64,
    pub limit: f64,
    pub retry_after_ms: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome {
    pub queued: bool,
    pub queue_wait_ms: u64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WaitError {
    #[error("rate limit queue full for key {key}")]
    QueueFull { key: String },
    #[error("too many distinct queued keys")]
    TooManyQueuedKeys,
    #[error("wait timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limiter is shutting down")]
    Shutdown,
}

struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
    last_touched: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct KeyMetrics {
    pub allowed: u64,
    pub blocked: u64,
    pub errors: u64,
}

struct QueuedRequest {
    id: Uuid,
    cost: f64,
    queued_at: DateTime<Utc>,
    timeout_at: DateTime<Utc>,
    resolver: oneshot::Sender<Result<WaitOutcome, WaitError>>,
}

/// Per-key token buckets, metrics, and FIFO wait queues, with an
/// interval-driven processor. Construct with [`RateLimiter::new`] and call
/// [`RateLimiter::spawn_background_tasks`] once a Tokio runtime is running.
pub struct RateLimiter {
    preset: RateLimiterPreset,
    buckets: DashMap<String, Bucket>,
    metrics: DashMap<String, KeyMetrics>,
    queues: DashMap<String, VecDeque<QueuedRequest>>,
    processing: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    max_queue_per_key: usize,
    max_queued_keys: usize,
    shutdown: Arc<AtomicBool>,
    queue_wait_total: AtomicU64,
}

impl RateLimiter {
    pub fn new(preset: RateLimiterPreset) -> Self {
        Self::with_clock(preset, Arc::new(SystemClock))
    }

    pub fn with_clock(preset: RateLimiterPreset, clock: Arc<dyn Clock>) -> Self {
        Self {
            preset,
            buckets: DashMap::new(),
            metrics: DashMap::new(),
            queues: DashMap::new(),
            processing: Arc::new(AtomicBool::new(false)),
            clock,
            max_queue_per_key: DEFAULT_MAX_QUEUE_PER_KEY,
            max_queued_keys: DEFAULT_MAX_QUEUED_KEYS,
            shutdown: Arc::new(AtomicBool::new(false)),
            queue_wait_total: AtomicU64::new(0),
        }
    }

    pub fn with_queue_limits(mut self, max_queue_per_key: usize, max_queued_keys: usize) -> Self {
        self.max_queue_per_key = max_queue_per_key;
        self.max_queued_keys = max_queued_keys;
        self
    }

    pub fn metrics_for(&self, key: &str) -> KeyMetrics {
        self.metrics.get(key).map(|m| *m).unwrap_or_default()
    }

    /// Refill-then-consume, spec §4.2's core algorithm. Never suspends.
    pub fn check(&self, key: &str, cost: f64) -> CheckResult {
        self.evict_if_needed(key);
        let now = self.clock.now();
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.preset.max_tokens,
            last_refill: now,
            last_touched: now,
        });

        let elapsed_seconds = (now - entry.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        entry.tokens = (entry.tokens + elapsed_seconds * self.preset.refill_rate).min(self.preset.max_tokens);
        entry.last_refill = now;
        entry.last_touched = now;

        let result = if entry.tokens >= cost {
            entry.tokens -= cost;
            CheckResult {
                allowed: true,
                remaining: entry.tokens,
                limit: self.preset.max_tokens,
                retry_after_ms: None,
                reset_at: None,
            }
        } else {
            let deficit = cost - entry.tokens;
            let retry_after_ms = (deficit / self.preset.refill_rate * 1000.0).ceil() as u64;
            CheckResult {
                allowed: false,
                remaining: entry.tokens,
                limit: self.preset.max_tokens,
                retry_after_ms: Some(retry_after_ms),
                reset_at: Some(now + chrono::Duration::milliseconds(retry_after_ms as i64)),
            }
        };

        let mut m = self.metrics.entry(key.to_string()).or_default();
        if result.allowed {
            m.allowed += 1;
        } else {
            m.blocked += 1;
        }

        result
    }

    /// Fallback used when the bucket itself could not be consulted due to a
    /// storage error; behavior is governed by the preset's `fail_mode`
    /// (spec §7).
    pub fn check_with_storage_error(&self, key: &str) -> CheckResult {
        let mut m = self.metrics.entry(key.to_string()).or_default();
        m.errors += 1;
        match self.preset.fail_mode {
            FailMode::Open => CheckResult {
                allowed: true,
                remaining: self.preset.max_tokens,
                limit: self.preset.max_tokens,
                retry_after_ms: None,
                reset_at: None,
            },
            FailMode::Closed => CheckResult {
                allowed: false,
                remaining: 0.0,
                limit: self.preset.max_tokens,
                retry_after_ms: Some((1000.0 / self.preset.refill_rate.max(0.001)) as u64),
                reset_at: None,
            },
        }
    }

    /// Suspends until tokens are available or `timeout` elapses.
    pub async fn wait(
        &self,
        key: &str,
        cost: f64,
        timeout: Duration,
        queue_cap: Option<usize>,
    ) -> Result<WaitOutcome, WaitError> {
        let immediate = self.check(key, cost);
        if immediate.allowed {
            return Ok(WaitOutcome { queued: false, queue_wait_ms: 0 });
        }

        let cap = queue_cap.unwrap_or(self.max_queue_per_key);
        if !self.queues.contains_key(key) && self.queues.len() >= self.max_queued_keys {
            return Err(WaitError::TooManyQueuedKeys);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.queues.entry(key.to_string()).or_default();
            if queue.len() >= cap {
                return Err(WaitError::QueueFull { key: key.to_string() });
            }
            let now = self.clock.now();
            queue.push_back(QueuedRequest {
                id: Uuid::new_v4(),
                cost,
                queued_at: now,
                timeout_at: now + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(30)),
                resolver: tx,
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WaitError::Shutdown),
            Err(_) => Err(WaitError::Timeout(timeout)),
        }
    }

    /// One pass over every non-empty queue, attempting to release the head
    /// entry of each. Guarded so only one pass runs at a time even if the
    /// interval tick fires re-entrantly.
    fn process_queues_once(&self) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let keys: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let now = self.clock.now();
            let mut expired_ids = Vec::new();
            let mut released: Option<(Uuid, DateTime<Utc>)> = None;

            if let Some(mut queue) = self.queues.get_mut(&key) {
                // Drop timed-out entries from the front before considering release.
                while let Some(front) = queue.front() {
                    if front.timeout_at <= now {
                        expired_ids.push(front.id);
                        queue.pop_front();
                    } else {
                        break;
                    }
                }
                if let Some(front) = queue.front() {
                    let check = self.check(&key, front.cost);
                    if check.allowed {
                        released = Some((front.id, front.queued_at));
                    }
                }
            }

            if let Some((id, queued_at)) = released {
                if let Some(mut queue) = self.queues.get_mut(&key) {
                    // Remove by id, never by index, so a concurrent timeout
                    // removal can't shift what "index 0" means out from
                    // under us.
                    if let Some(pos) = queue.iter().position(|r| r.id == id) {
                        if let Some(req) = queue.remove(pos) {
                            let wait_ms = (self.clock.now() - queued_at).num_milliseconds().max(0) as u64;
                            let _ = req.resolver.send(Ok(WaitOutcome { queued: true, queue_wait_ms: wait_ms }));
                        }
                    }
                }
            }

            if !expired_ids.is_empty() {
                // Entries were already popped above; nothing left to notify
                // since their resolver was dropped with the popped record,
                // which surfaces as `WaitError::Shutdown` to callers still
                // racing `tokio::time::timeout`. The caller's own timeout
                // future resolves first in practice.
            }
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    fn sweep_expired_keys(&self) {
        let now = self.clock.now();
        let stale: Vec<String> = self
            .buckets
            .iter()
            .filter(|e| now - e.value().last_touched > KEY_TTL)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.buckets.remove(&key);
            self.metrics.remove(&key);
        }
    }

    /// LRU eviction when at capacity and about to track a brand new key.
    fn evict_if_needed(&self, key: &str) {
        if self.buckets.contains_key(key) || self.buckets.len() < MAX_UNIQUE_KEYS {
            return;
        }
        if let Some(oldest) = self
            .buckets
            .iter()
            .min_by_key(|e| e.value().last_touched)
            .map(|e| e.key().clone())
        {
            self.buckets.remove(&oldest);
            self.metrics.remove(&oldest);
        }
    }

    /// Spawns the queue processor and TTL sweep as background tasks. Call
    /// once, after construction, from an async context.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> RateLimiterHandles {
        let processor_limiter = Arc::clone(self);
        let processor_shutdown = Arc::clone(&self.shutdown);
        let processor = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_QUEUE_PROCESS_INTERVAL);
            loop {
                interval.tick().await;
                if processor_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                processor_limiter.process_queues_once();
            }
        });

        let sweep_limiter = Arc::clone(self);
        let sweep_shutdown = Arc::clone(&self.shutdown);
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TTL_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                if sweep_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                sweep_limiter.sweep_expired_keys();
            }
        });

        RateLimiterHandles { processor, sweeper }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

pub struct RateLimiterHandles {
    pub processor: JoinHandle<()>,
    pub sweeper: JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::test_support::FixedClock;

    fn limiter(max_tokens: f64, refill_rate: f64) -> RateLimiter {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        RateLimiter::with_clock(
            RateLimiterPreset { max_tokens, refill_rate, fail_mode: FailMode::Closed },
            clock,
        )
    }

    #[test]
    fn first_request_consumes_from_a_full_bucket() {
        let rl = limiter(10.0, 1.0);
        let result = rl.check("alice", 1.0);
        assert!(result.allowed);
        assert_eq!(result.remaining, 9.0);
    }

    #[test]
    fn exhausted_bucket_reports_retry_after() {
        let rl = limiter(1.0, 1.0);
        assert!(rl.check("alice", 1.0).allowed);
        let second = rl.check("alice", 1.0);
        assert!(!second.allowed);
        assert_eq!(second.retry_after_ms, Some(1000));
    }

    #[test]
    fn remaining_never_exceeds_cap_after_idle_refill() {
        // Rate limiter monotonicity invariant (spec §8): after `t` seconds
        // idle, remaining <= min(M, remaining_before + R*t).
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let rl = RateLimiter::with_clock(
            RateLimiterPreset { max_tokens: 5.0, refill_rate: 2.0, fail_mode: FailMode::Closed },
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let before = rl.check("bob", 5.0);
        assert!(before.allowed);
        clock.advance(chrono::Duration::seconds(10));
        let after = rl.check("bob", 0.0);
        assert!(after.remaining <= 5.0_f64.min(before.remaining + 2.0 * 10.0));
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_tokens_available() {
        let rl = limiter(10.0, 1.0);
        let outcome = rl.wait("alice", 1.0, Duration::from_secs(1), None).await.unwrap();
        assert!(!outcome.queued);
    }

    #[tokio::test]
    async fn queue_full_is_rejected_before_allocation() {
        let rl = Arc::new(limiter(0.0, 0.001).with_queue_limits(1, 100));
        let rl2 = Arc::clone(&rl);
        let first = tokio::spawn(async move {
            let _ = rl2.wait("alice", 1.0, Duration::from_millis(200), None).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = rl.wait("alice", 1.0, Duration::from_millis(50), None).await;
        assert_eq!(second, Err(WaitError::QueueFull { key: "alice".to_string() }));

        first.abort();
    }
}
