//! Bounded, TTL'd cache over normalized `(query, filters, sort)` tuples
//! (spec §4.6). Grounded on the same bounded-map discipline
//! `skillsmith_core::ratelimit` uses for its metrics maps, scaled down to a
//! single eviction pass on insert rather than a background sweeper, since
//! search-cache entries are cheap and short-lived (typically invalidated by
//! the next sync commit well before their TTL expires).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::SearchResponse;

pub const DEFAULT_CAPACITY: usize = 512;
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct Entry {
    response: SearchResponse,
    inserted_at_ms: i64,
}

pub struct SearchCache {
    entries: DashMap<String, Entry>,
    capacity: usize,
    ttl: Duration,
    generation: AtomicU64,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str, now_ms: i64) -> Option<SearchResponse> {
        let entry = self.entries.get(key)?;
        if now_ms - entry.inserted_at_ms > self.ttl.as_millis() as i64 {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.response.clone())
    }

    pub fn put(&self, key: String, response: SearchResponse, now_ms: i64) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at_ms)
                .map(|e| e.key().clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            Entry {
                response,
                inserted_at_ms: now_ms,
            },
        );
    }

    /// Invalidated wholesale whenever a sync run commits (spec §4.6).
    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn normalize_key(query: &str, filters_json: &str, sort_json: &str) -> String {
        format!("{}|{}|{}", query.trim().to_lowercase(), filters_json, sort_json)
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
