use moka::Expiry;
use moka::sync::Cache;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// A value held by the in-process store, with its own expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct FallbackEntry {
    pub value: Arc<str>,
    pub ttl: Duration,
    pub expires_at: Instant,
}

impl FallbackEntry {
    fn new(value: Arc<str>, ttl: Duration) -> Self {
        Self {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Per-entry TTL: each write carries its own lifetime.
struct EntryExpiry;

impl Expiry<String, FallbackEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &FallbackEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &FallbackEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub type FallbackCache = Cache<String, FallbackEntry>;

/// In-process keyed store used whenever the remote cache cannot serve a call.
pub struct FallbackStore {
    cache: FallbackCache,
}

impl FallbackStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = FallbackCache::builder()
            .max_capacity(max_capacity.max(1))
            .expire_after(EntryExpiry)
            .build();

        Self { cache }
    }

    /// Expired entries read as a miss and are dropped on the spot.
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        let entry = self.cache.get(key)?;
        if entry.is_expired(Instant::now()) {
            self.cache.invalidate(key);
            return None;
        }
        Some(entry.value)
    }

    pub fn set(&self, key: &str, value: Arc<str>, ttl: Duration) {
        self.cache
            .insert(key.to_string(), FallbackEntry::new(value, ttl));
    }

    pub fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Removes every key containing `pattern` once `*` wildcards are stripped.
    /// This is substring matching, not glob matching. Returns how many keys went.
    pub fn delete_matching(&self, pattern: &str) -> usize {
        let needle = pattern.replace('*', "");
        let doomed: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| key.contains(needle.as_str()))
            .map(|(key, _)| key)
            .collect();

        for key in &doomed {
            self.cache.invalidate(key.as_str());
        }
        doomed.len()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_when_key_absent() {
        let store = FallbackStore::new(16);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn get_hits_when_present() {
        let store = FallbackStore::new(16);
        store.set("agency:1", Arc::from("\"hello\""), Duration::from_secs(60));

        assert_eq!(store.get("agency:1").as_deref(), Some("\"hello\""));
    }

    #[test]
    fn expired_entry_reads_as_miss() {
        let store = FallbackStore::new(16);
        store.set("short", Arc::from("1"), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(60));

        assert!(store.get("short").is_none());
    }

    #[test]
    fn delete_matching_strips_wildcards_and_matches_substrings() {
        let store = FallbackStore::new(16);
        let ttl = Duration::from_secs(60);
        store.set("inventory:agency_a:items", Arc::from("1"), ttl);
        store.set("inventory:agency_b:items", Arc::from("2"), ttl);
        store.set("invoices:agency_a", Arc::from("3"), ttl);

        let removed = store.delete_matching("inventory:*");

        assert_eq!(removed, 2);
        assert!(store.get("inventory:agency_a:items").is_none());
        assert!(store.get("inventory:agency_b:items").is_none());
        assert_eq!(store.get("invoices:agency_a").as_deref(), Some("3"));
    }
}
