//! Response cache and single-flight coalescing (spec §4.5).
//!
//! `Slot` encodes the "in-flight xor entry xor absent" invariant in the type
//! itself rather than by convention — a map entry can never be both waiting
//! and settled at once.

use ahash::AHasher;
use dashmap::DashMap;
use modelgate_kernel::capability::CapabilityRequest;
use modelgate_kernel::job::Fingerprint;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const SEED_A: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_B: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Compute a 128-bit fingerprint from a request's canonical fields by
/// hashing them with two differently-seeded `ahash` instances and folding
/// the results into a `u128`.
pub fn fingerprint(request: &CapabilityRequest) -> Fingerprint {
    let fields = request.canonical_fields();

    let mut ha = AHasher::default();
    SEED_A.hash(&mut ha);
    request.capability().as_str().hash(&mut ha);
    for (k, v) in &fields {
        k.hash(&mut ha);
        v.hash(&mut ha);
    }

    let mut hb = AHasher::default();
    SEED_B.hash(&mut hb);
    request.capability().as_str().hash(&mut hb);
    for (k, v) in &fields {
        k.hash(&mut hb);
        v.hash(&mut hb);
    }

    let hi = ha.finish() as u128;
    let lo = hb.finish() as u128;
    Fingerprint((hi << 64) | lo)
}

#[derive(Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub refcount: Arc<AtomicUsize>,
    inserted_at: Instant,
}

enum Slot {
    InFlight(broadcast::Sender<Result<Value, String>>),
    Entry(CacheEntry),
}

pub struct ResponseCache {
    slots: DashMap<Fingerprint, Slot>,
    order: Mutex<VecDeque<Fingerprint>>,
    max_entries: usize,
    /// Per-entry TTL (spec §4.5), checked lazily on lookup. `Duration::ZERO`
    /// disables expiry entirely, matching `cache_ttl_seconds=0`.
    ttl: Duration,
}

/// What a caller should do after probing the cache for a fingerprint.
pub enum CacheLookup {
    /// A settled value is available immediately.
    Hit(Value),
    /// Another caller is already computing this value; subscribe and await it.
    Join(broadcast::Receiver<Result<Value, String>>),
    /// Nothing known about this fingerprint; caller becomes the leader and
    /// must call [`ResponseCache::settle`] or [`ResponseCache::abandon`].
    Lead,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self::with_ttl(max_entries, Duration::ZERO)
    }

    pub fn with_ttl(max_entries: usize, ttl: Duration) -> Self {
        ResponseCache {
            slots: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_entries,
            ttl,
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        !self.ttl.is_zero() && entry.inserted_at.elapsed() >= self.ttl
    }

    /// Probe the cache, registering this caller as the leader if nobody else
    /// is working on `fp`.
    ///
    /// Uses `DashMap::entry`, which holds the shard lock for the duration of
    /// the match, so two concurrent callers can never both observe an empty
    /// slot and both become leader — a plain get-then-insert would race. An
    /// entry whose TTL has lazily expired is treated the same as a vacant
    /// slot: this caller becomes the new leader rather than serving stale
    /// data.
    pub fn lookup_or_lead(&self, fp: Fingerprint) -> CacheLookup {
        match self.slots.entry(fp) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let expired = match occupied.get() {
                    Slot::Entry(e) => self.is_expired(e),
                    Slot::InFlight(_) => false,
                };
                if expired {
                    let (tx, _rx) = broadcast::channel(1);
                    occupied.insert(Slot::InFlight(tx));
                    return CacheLookup::Lead;
                }
                match occupied.get() {
                    Slot::Entry(e) => {
                        e.refcount.fetch_add(1, Ordering::Relaxed);
                        CacheLookup::Hit(e.value.clone())
                    }
                    Slot::InFlight(tx) => CacheLookup::Join(tx.subscribe()),
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(Slot::InFlight(tx));
                CacheLookup::Lead
            }
        }
    }

    /// Leader settles a fingerprint with a computed value, waking every
    /// joined waiter and admitting the entry into the LRU. The entry starts
    /// with `refcount == 0`: the leader itself does not hold a reference to
    /// what it just published, only callers that later observe it via
    /// `CacheLookup::Hit` do (and must `release` it when done).
    pub fn settle(&self, fp: Fingerprint, value: Value) {
        let refcount = Arc::new(AtomicUsize::new(0));
        let waiters = match self.slots.get(&fp) {
            Some(slot) => match &*slot {
                Slot::InFlight(tx) => Some(tx.clone()),
                Slot::Entry(_) => None,
            },
            None => None,
        };
        if let Some(tx) = waiters {
            let _ = tx.send(Ok(value.clone()));
        }
        self.slots.insert(
            fp,
            Slot::Entry(CacheEntry {
                value,
                refcount,
                inserted_at: Instant::now(),
            }),
        );
        self.order.lock().push_back(fp);
        self.evict_if_needed();
    }

    /// Leader failed; clear the in-flight slot so the next caller starts fresh.
    pub fn abandon(&self, fp: Fingerprint, reason: String) {
        if let Some((_, Slot::InFlight(tx))) = self.slots.remove(&fp) {
            let _ = tx.send(Err(reason));
        }
    }

    /// Release a reference taken by [`CacheLookup::Hit`], making the entry
    /// eligible for eviction again. Saturating, so a stray double-release
    /// can never wrap the counter around.
    pub fn release(&self, fp: Fingerprint) {
        if let Some(slot) = self.slots.get(&fp) {
            if let Slot::Entry(e) = &*slot {
                let _ = e.refcount.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
            }
        }
    }

    /// Evict oldest-first until at or under capacity, skipping entries with
    /// `refcount > 0`. Scans at most one full pass over the current ledger:
    /// once every candidate has been revisited without being removed (all
    /// remaining entries are referenced or in flight), it bails rather than
    /// looping forever re-pushing the same unevictable candidates.
    fn evict_if_needed(&self) {
        let mut order = self.order.lock();
        let mut scanned = 0;
        let total = order.len();
        while self.slots.len() > self.max_entries && scanned < total {
            let Some(candidate) = order.pop_front() else { break };
            let evictable = self
                .slots
                .get(&candidate)
                .map(|s| matches!(&*s, Slot::Entry(e) if e.refcount.load(Ordering::Relaxed) == 0))
                .unwrap_or(false);
            if evictable {
                self.slots.remove(&candidate);
            } else if self.slots.contains_key(&candidate) {
                order.push_back(candidate);
                scanned += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_kernel::capability::LlmCompletionRequest;

    fn req(prompt: &str) -> CapabilityRequest {
        CapabilityRequest::LlmCompletion(LlmCompletionRequest {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: Some(0.0),
            model: None,
        })
    }

    #[test]
    fn identical_requests_fingerprint_identically() {
        assert_eq!(fingerprint(&req("hello")), fingerprint(&req("hello")));
    }

    #[test]
    fn different_prompts_fingerprint_differently() {
        assert_ne!(fingerprint(&req("hello")), fingerprint(&req("world")));
    }

    #[test]
    fn second_lookup_is_a_hit_after_settle() {
        let cache = ResponseCache::new(10);
        let fp = fingerprint(&req("hello"));
        assert!(matches!(cache.lookup_or_lead(fp), CacheLookup::Lead));
        cache.settle(fp, serde_json::json!({"text": "hi"}));
        assert!(matches!(cache.lookup_or_lead(fp), CacheLookup::Hit(_)));
    }

    #[test]
    fn concurrent_lookup_joins_in_flight_leader() {
        let cache = ResponseCache::new(10);
        let fp = fingerprint(&req("hello"));
        assert!(matches!(cache.lookup_or_lead(fp), CacheLookup::Lead));
        assert!(matches!(cache.lookup_or_lead(fp), CacheLookup::Join(_)));
    }

    #[test]
    fn eviction_respects_capacity() {
        let cache = ResponseCache::new(1);
        let fp1 = fingerprint(&req("a"));
        let fp2 = fingerprint(&req("b"));
        cache.settle(fp1, serde_json::json!("a"));
        cache.settle(fp2, serde_json::json!("b"));
        assert!(cache.len() <= 1);
    }

    #[test]
    fn referenced_entry_is_not_evicted() {
        let cache = ResponseCache::new(1);
        let fp1 = fingerprint(&req("a"));
        let fp2 = fingerprint(&req("b"));
        cache.settle(fp1, serde_json::json!("a"));
        assert!(matches!(cache.lookup_or_lead(fp1), CacheLookup::Hit(_))); // refcount -> 1
        cache.settle(fp2, serde_json::json!("b"));
        // fp1 is still referenced, so fp2 is evicted to make room instead.
        assert!(matches!(cache.lookup_or_lead(fp1), CacheLookup::Hit(_)));
        cache.release(fp1);
        cache.release(fp1);
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let cache = ResponseCache::with_ttl(10, Duration::from_millis(10));
        let fp = fingerprint(&req("hello"));
        assert!(matches!(cache.lookup_or_lead(fp), CacheLookup::Lead));
        cache.settle(fp, serde_json::json!({"text": "hi"}));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(cache.lookup_or_lead(fp), CacheLookup::Lead));
    }

    #[test]
    fn zero_ttl_never_expires() {
        let cache = ResponseCache::with_ttl(10, Duration::ZERO);
        let fp = fingerprint(&req("hello"));
        cache.settle(fp, serde_json::json!({"text": "hi"}));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(cache.lookup_or_lead(fp), CacheLookup::Hit(_)));
    }
}
