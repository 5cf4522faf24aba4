//! Dual-quota response cache.
//!
//! Positive and negative answers share one key space (name, qtype, qclass)
//! but are evicted against separate quotas. Storage is an arena of slots
//! plus an intrusive doubly linked list for LRU order, so eviction never
//! needs to walk a `HashMap` or fight the borrow checker over a
//! `LinkedList` iterator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dns_wire::types::DomainName;
use tokio::sync::Mutex;

const MUTEX_POISON_MESSAGE: &str = "cache mutex poisoned";

/// Default quota for positive cache entries.
pub const DEFAULT_POSITIVE_CAPACITY: usize = 50;
/// Default quota for negative cache entries.
pub const DEFAULT_NEGATIVE_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: DomainName,
    pub qtype: u16,
    pub qclass: u16,
}

impl CacheKey {
    pub fn new(name: DomainName, qtype: u16, qclass: u16) -> Self {
        Self {
            name,
            qtype,
            qclass,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositiveEntry {
    pub records: Vec<dns_wire::types::ResourceRecord>,
    pub wire: bytes::Bytes,
}

#[derive(Debug, Clone)]
pub struct NegativeEntry {
    pub is_nxdomain: bool,
}

#[derive(Debug, Clone)]
enum Value {
    Positive(PositiveEntry),
    Negative(NegativeEntry),
}

impl Value {
    fn kind(&self) -> Kind {
        match self {
            Value::Positive(_) => Kind::Positive,
            Value::Negative(_) => Kind::Negative,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Positive,
    Negative,
}

const NIL: usize = usize::MAX;

/// `max(0, expires_at - now)`, rounded up to the next whole second so a
/// caller never reports a TTL of zero for an entry that has not actually
/// expired yet.
fn remaining_ttl_secs(expires_at: Instant, now: Instant) -> u32 {
    let remaining = expires_at.saturating_duration_since(now);
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

#[derive(Debug)]
struct Slot {
    key: CacheKey,
    value: Value,
    expires_at: Instant,
    prev: usize,
    next: usize,
}

/// The dual-quota LRU itself. Not `Sync` on its own; wrap in [`SharedCache`]
/// for use across connections.
#[derive(Debug)]
pub struct Cache {
    positive_capacity: usize,
    negative_capacity: usize,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<CacheKey, usize>,
    head: usize,
    tail: usize,
    positive_count: usize,
    negative_count: usize,
}

impl Cache {
    #[must_use]
    pub fn new(positive_capacity: usize, negative_capacity: usize) -> Self {
        Self {
            positive_capacity,
            negative_capacity,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
            positive_count: 0,
            negative_count: 0,
        }
    }

    pub fn positive_capacity(&self) -> usize {
        self.positive_capacity
    }

    pub fn negative_capacity(&self) -> usize {
        self.negative_capacity
    }

    pub fn positive_count(&self) -> usize {
        self.positive_count
    }

    pub fn negative_count(&self) -> usize {
        self.negative_count
    }

    /// Removes every entry whose `expires_at` has already passed.
    pub fn purge_expired(&mut self, now: Instant) {
        let mut idx = self.head;
        while idx != NIL {
            let next = self.slots[idx].as_ref().unwrap().next;
            if self.slots[idx].as_ref().unwrap().expires_at <= now {
                self.erase_node(idx);
            }
            idx = next;
        }
    }

    /// Returns the cached positive entry together with its remaining TTL
    /// (rounded up to the next whole second), or `None` on a miss or an
    /// expired entry.
    pub fn get_positive(&mut self, key: &CacheKey, now: Instant) -> Option<(PositiveEntry, u32)> {
        let idx = *self.index.get(key)?;
        let slot = self.slots[idx].as_ref().unwrap();
        if slot.expires_at <= now {
            self.erase_node(idx);
            return None;
        }
        let ttl = remaining_ttl_secs(slot.expires_at, now);
        match &self.slots[idx].as_ref().unwrap().value {
            Value::Positive(entry) => {
                let entry = entry.clone();
                self.touch(idx);
                Some((entry, ttl))
            }
            Value::Negative(_) => None,
        }
    }

    /// Returns the cached negative entry together with its remaining TTL
    /// (rounded up to the next whole second), or `None` on a miss or an
    /// expired entry.
    pub fn get_negative(&mut self, key: &CacheKey, now: Instant) -> Option<(NegativeEntry, u32)> {
        let idx = *self.index.get(key)?;
        let slot = self.slots[idx].as_ref().unwrap();
        if slot.expires_at <= now {
            self.erase_node(idx);
            return None;
        }
        let ttl = remaining_ttl_secs(slot.expires_at, now);
        match &self.slots[idx].as_ref().unwrap().value {
            Value::Negative(entry) => {
                let entry = entry.clone();
                self.touch(idx);
                Some((entry, ttl))
            }
            Value::Positive(_) => None,
        }
    }

    pub fn put_positive(&mut self, key: CacheKey, entry: PositiveEntry, ttl: Duration, now: Instant) {
        self.put(key, Value::Positive(entry), ttl, now);
    }

    pub fn put_negative(&mut self, key: CacheKey, entry: NegativeEntry, ttl: Duration, now: Instant) {
        self.put(key, Value::Negative(entry), ttl, now);
    }

    fn put(&mut self, key: CacheKey, value: Value, ttl: Duration, now: Instant) {
        let expires_at = now + ttl;
        if let Some(&idx) = self.index.get(&key) {
            // Overwriting may change the entry's kind (e.g. NXDOMAIN
            // superseded by a fresh answer), so the quota counters must
            // follow the sign change.
            let old_kind = self.slots[idx].as_ref().unwrap().value.kind();
            let new_kind = value.kind();
            if old_kind != new_kind {
                self.dec_count(old_kind);
                self.inc_count(new_kind);
            }
            let slot = self.slots[idx].as_mut().unwrap();
            slot.value = value;
            slot.expires_at = expires_at;
            self.touch(idx);
            return;
        }

        self.inc_count(value.kind());
        let idx = self.alloc_slot(Slot {
            key: key.clone(),
            value,
            expires_at,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key, idx);
        self.push_front(idx);
        self.evict_if_needed();
    }

    fn inc_count(&mut self, kind: Kind) {
        match kind {
            Kind::Positive => self.positive_count += 1,
            Kind::Negative => self.negative_count += 1,
        }
    }

    fn dec_count(&mut self, kind: Kind) {
        match kind {
            Kind::Positive => self.positive_count -= 1,
            Kind::Negative => self.negative_count -= 1,
        }
    }

    fn alloc_slot(&mut self, slot: Slot) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slots[idx].as_mut().unwrap();
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            self.slots[old_head].as_mut().unwrap().prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().unwrap();
            (slot.prev, slot.next)
        };
        if prev != NIL {
            self.slots[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn erase_node(&mut self, idx: usize) {
        self.unlink(idx);
        let slot = self.slots[idx].take().unwrap();
        self.index.remove(&slot.key);
        self.dec_count(slot.value.kind());
        self.free.push(idx);
    }

    /// Walks back from the LRU tail, evicting the first node whose kind is
    /// still over quota, until both quotas are satisfied.
    fn evict_if_needed(&mut self) {
        while self.positive_count > self.positive_capacity
            || self.negative_count > self.negative_capacity
        {
            let mut idx = self.tail;
            let mut victim = NIL;
            while idx != NIL {
                let kind = self.slots[idx].as_ref().unwrap().value.kind();
                let over = match kind {
                    Kind::Positive => self.positive_count > self.positive_capacity,
                    Kind::Negative => self.negative_count > self.negative_capacity,
                };
                if over {
                    victim = idx;
                    break;
                }
                idx = self.slots[idx].as_ref().unwrap().prev;
            }
            match victim {
                NIL => break,
                idx => self.erase_node(idx),
            }
        }
    }
}

/// Thread-safe handle shared between the daemon's connection tasks (or an
/// in-process engine that does not use the daemon at all).
#[derive(Debug, Clone)]
pub struct SharedCache(Arc<Mutex<Cache>>);

impl SharedCache {
    #[must_use]
    pub fn new(positive_capacity: usize, negative_capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(Cache::new(
            positive_capacity,
            negative_capacity,
        ))))
    }

    pub async fn get_positive(&self, key: &CacheKey, now: Instant) -> Option<(PositiveEntry, u32)> {
        self.0.lock().await.get_positive(key, now)
    }

    pub async fn get_negative(&self, key: &CacheKey, now: Instant) -> Option<(NegativeEntry, u32)> {
        self.0.lock().await.get_negative(key, now)
    }

    pub async fn put_positive(
        &self,
        key: CacheKey,
        entry: PositiveEntry,
        ttl: Duration,
        now: Instant,
    ) {
        self.0.lock().await.put_positive(key, entry, ttl, now);
    }

    pub async fn put_negative(
        &self,
        key: CacheKey,
        entry: NegativeEntry,
        ttl: Duration,
        now: Instant,
    ) {
        self.0.lock().await.put_negative(key, entry, ttl, now);
    }

    pub async fn purge_expired(&self, now: Instant) {
        self.0.lock().await.purge_expired(now);
    }

    pub async fn caps(&self) -> (usize, usize) {
        let cache = self.0.lock().await;
        (cache.positive_capacity(), cache.negative_capacity())
    }

    /// Panics if the mutex is poisoned; only reachable if a holder panicked
    /// mid-lock, which would indicate a bug elsewhere.
    pub fn blocking_caps(&self) -> (usize, usize) {
        let cache = self.0.try_lock().expect(MUTEX_POISON_MESSAGE);
        (cache.positive_capacity(), cache.negative_capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(DomainName::new(name), 1, 1)
    }

    fn positive() -> PositiveEntry {
        PositiveEntry {
            records: Vec::new(),
            wire: bytes::Bytes::new(),
        }
    }

    fn negative() -> NegativeEntry {
        NegativeEntry { is_nxdomain: true }
    }

    #[test]
    fn respects_positive_quota() {
        let mut cache = Cache::new(2, 2);
        let now = Instant::now();
        for i in 0..5 {
            cache.put_positive(
                key(&format!("host{i}.example.")),
                positive(),
                Duration::from_secs(60),
                now,
            );
        }
        assert_eq!(cache.positive_count(), 2);
        assert!(cache.positive_count() <= cache.positive_capacity());
    }

    #[test]
    fn respects_negative_quota_independently_of_positive() {
        let mut cache = Cache::new(2, 2);
        let now = Instant::now();
        cache.put_positive(key("a.example."), positive(), Duration::from_secs(60), now);
        cache.put_positive(key("b.example."), positive(), Duration::from_secs(60), now);
        for i in 0..5 {
            cache.put_negative(
                key(&format!("n{i}.example.")),
                negative(),
                Duration::from_secs(60),
                now,
            );
        }
        assert_eq!(cache.positive_count(), 2);
        assert_eq!(cache.negative_count(), 2);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let mut cache = Cache::new(10, 10);
        let now = Instant::now();
        cache.put_positive(key("a.example."), positive(), Duration::from_secs(1), now);
        let later = now + Duration::from_secs(2);
        assert!(cache.get_positive(&key("a.example."), later).is_none());
        assert_eq!(cache.positive_count(), 0);
    }

    #[test]
    fn remaining_ttl_rounds_up_to_the_next_whole_second() {
        let mut cache = Cache::new(10, 10);
        let now = Instant::now();
        cache.put_positive(key("a.example."), positive(), Duration::from_secs(300), now);
        let (_, ttl) = cache
            .get_positive(&key("a.example."), now + Duration::from_millis(1))
            .unwrap();
        assert_eq!(ttl, 300);
    }

    #[test]
    fn overwrite_changes_kind_counts() {
        let mut cache = Cache::new(10, 10);
        let now = Instant::now();
        cache.put_negative(key("a.example."), negative(), Duration::from_secs(60), now);
        assert_eq!(cache.negative_count(), 1);
        assert_eq!(cache.positive_count(), 0);
        cache.put_positive(key("a.example."), positive(), Duration::from_secs(60), now);
        assert_eq!(cache.negative_count(), 0);
        assert_eq!(cache.positive_count(), 1);
    }

    #[test]
    fn eviction_prefers_lru_within_the_over_quota_kind() {
        let mut cache = Cache::new(1, 10);
        let now = Instant::now();
        cache.put_positive(key("old.example."), positive(), Duration::from_secs(60), now);
        cache.put_positive(key("new.example."), positive(), Duration::from_secs(60), now);
        assert!(cache.get_positive(&key("old.example."), now).is_none());
        assert!(cache.get_positive(&key("new.example."), now).is_some());
    }

    #[test]
    fn purge_expired_removes_only_past_entries() {
        let mut cache = Cache::new(10, 10);
        let now = Instant::now();
        cache.put_positive(key("a.example."), positive(), Duration::from_secs(1), now);
        cache.put_positive(key("b.example."), positive(), Duration::from_secs(100), now);
        cache.purge_expired(now + Duration::from_secs(2));
        assert!(cache.get_positive(&key("a.example."), now).is_none());
        assert!(cache.get_positive(&key("b.example."), now).is_some());
    }
}
