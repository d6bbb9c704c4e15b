pub mod fingerprint;

pub use fingerprint::{content_hash, Fingerprint};

use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::Decision;

/// Cache sizing and freshness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Freshness window
    pub ttl: Duration,
    /// Maximum number of entries held
    pub max_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: true,
            ttl: Duration::from_secs(3600),
            max_size: 1000,
        }
    }
}

/// A stored decision.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub decision: Arc<Decision>,
    pub inserted_at: Instant,
    /// Insertion sequence; smallest is evicted first
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: AHashMap<Fingerprint, CacheEntry>,
    /// Insertion order index: seq -> key
    order: BTreeMap<u64, Fingerprint>,
    next_seq: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<Fingerprint> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Bounded decision cache with TTL and oldest-inserted eviction.
///
/// Entries are fresh while `now - inserted_at < ttl`. A stale entry reads
/// as a miss and is dropped. When an insert would exceed `max_size`, the
/// entry with the smallest insertion sequence goes first; reads do not
/// refresh an entry's position. All access goes through one mutex, and
/// decisions are shared as `Arc` so the critical section never copies
/// decision bodies.
#[derive(Debug)]
pub struct DecisionCache {
    settings: CacheSettings,
    inner: Mutex<CacheInner>,
}

impl DecisionCache {
    pub fn new(settings: CacheSettings) -> Self {
        DecisionCache {
            settings,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Create a cache that never stores anything.
    pub fn disabled() -> Self {
        DecisionCache::new(CacheSettings {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    #[inline]
    fn is_active(&self) -> bool {
        self.settings.enabled && self.settings.max_size > 0
    }

    /// Look up a fresh decision.
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<Decision>> {
        self.get_at(key, Instant::now())
    }

    /// Look up a fresh decision as of `now`.
    pub fn get_at(&self, key: &Fingerprint, now: Instant) -> Option<Arc<Decision>> {
        if !self.is_active() {
            return None;
        }

        let mut inner = self.inner.lock();
        let entry = inner.entries.get(key)?;

        if now.saturating_duration_since(entry.inserted_at) < self.settings.ttl {
            return Some(entry.decision.clone());
        }

        inner.remove(key);
        None
    }

    /// Store a decision.
    pub fn put(&self, key: Fingerprint, decision: Arc<Decision>) {
        self.put_at(key, decision, Instant::now());
    }

    /// Store a decision as inserted at `now`.
    ///
    /// Overwriting a key re-inserts it as the newest entry.
    pub fn put_at(&self, key: Fingerprint, decision: Arc<Decision>, now: Instant) {
        if !self.is_active() {
            return;
        }

        let mut inner = self.inner.lock();

        if inner.remove(&key).is_none() {
            while inner.entries.len() >= self.settings.max_size {
                if inner.evict_oldest().is_none() {
                    break;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key);
        inner.entries.insert(
            key,
            CacheEntry {
                decision,
                inserted_at: now,
                seq,
            },
        );
    }

    /// Check presence without regard to freshness.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        DecisionCache::new(CacheSettings::default())
    }
}
