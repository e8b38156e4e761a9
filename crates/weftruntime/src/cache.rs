//! Node result caching.
//!
//! Results of cacheable nodes are stored under a fingerprint of the node
//! type and its resolved inputs. The in-memory backend bounds itself with
//! TTL expiry plus least-recently-used eviction; the remote backend shares
//! entries across engine processes and degrades to a miss on any failure.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;
use weftcore::SlotValues;

/// Namespace for result fingerprints; never reuse it for other ids.
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x4b9c6f512a3e4c789d108f6a3b2d1e05);

/// Deterministic cache key for a node's work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(Uuid);

impl Fingerprint {
    /// UUIDv5 over the canonical JSON of the node type and resolved inputs.
    /// Canonical means object keys are sorted, so the same inputs yield the
    /// same fingerprint in every process and on every host.
    pub fn compute(node_type: &str, inputs: &SlotValues) -> weftcore::Result<Self> {
        let canonical = serde_json::to_value((node_type, inputs))?;
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(Self(Uuid::new_v5(&FINGERPRINT_NAMESPACE, &bytes)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Pluggable fingerprint-to-value store shared across concurrent runs
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Option<SlotValues>;
    async fn set(&self, fingerprint: &Fingerprint, value: SlotValues, ttl: Duration);
    async fn clear(&self);
}

struct CacheEntry {
    value: SlotValues,
    expires_at: Instant,
    last_used: u64,
}

struct MemoryCacheInner {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Monotonic use counter backing the LRU order.
    clock: u64,
}

/// In-process cache with TTL expiry and LRU eviction
pub struct MemoryCache {
    max_entries: usize,
    inner: Mutex<MemoryCacheInner>,
}

impl MemoryCache {
    pub const DEFAULT_MAX_ENTRIES: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(MemoryCacheInner {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .entries
                    .values()
                    .filter(|e| e.expires_at > now)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Option<SlotValues> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        let now = Instant::now();
        let expired = matches!(
            inner.entries.get(fingerprint),
            Some(entry) if entry.expires_at <= now
        );
        if expired {
            inner.entries.remove(fingerprint);
            return None;
        }
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.entries.get_mut(fingerprint)?;
        entry.last_used = clock;
        Some(entry.value.clone())
    }

    async fn set(&self, fingerprint: &Fingerprint, value: SlotValues, ttl: Duration) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let now = Instant::now();
        if !inner.entries.contains_key(fingerprint) && inner.entries.len() >= self.max_entries {
            // Prefer dropping something already expired; otherwise the
            // least recently used entry goes.
            let victim = inner
                .entries
                .iter()
                .find(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| *k)
                .or_else(|| {
                    inner
                        .entries
                        .iter()
                        .min_by_key(|(_, e)| e.last_used)
                        .map(|(k, _)| *k)
                });
            if let Some(victim) = victim {
                inner.entries.remove(&victim);
            }
        }
        inner.clock += 1;
        let clock = inner.clock;
        inner.entries.insert(
            *fingerprint,
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_used: clock,
            },
        );
    }

    async fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
        }
    }
}

/// Shared cache service spoken to over HTTP. Any transport or protocol
/// failure degrades to a miss so caching never blocks execution.
pub struct RemoteCache {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteCache {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn entry_url(&self, fingerprint: &Fingerprint) -> String {
        format!("{}/cache/{}", self.base_url, fingerprint)
    }
}

#[async_trait]
impl ResultCache for RemoteCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Option<SlotValues> {
        let response = match self.client.get(self.entry_url(fingerprint)).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Remote cache unreachable: {}", e);
                return None;
            }
        };
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return None;
        }
        if !response.status().is_success() {
            tracing::warn!("Remote cache get failed: {}", response.status());
            return None;
        }
        match response.json::<SlotValues>().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Remote cache returned an invalid body: {}", e);
                None
            }
        }
    }

    async fn set(&self, fingerprint: &Fingerprint, value: SlotValues, ttl: Duration) {
        let url = format!("{}?ttl_secs={}", self.entry_url(fingerprint), ttl.as_secs());
        match self.client.put(url).json(&value).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!("Remote cache store failed: {}", response.status());
            }
            Err(e) => {
                tracing::warn!("Remote cache store failed: {}", e);
            }
            _ => {}
        }
    }

    async fn clear(&self) {
        let url = format!("{}/cache", self.base_url);
        if let Err(e) = self.client.delete(url).send().await {
            tracing::warn!("Remote cache clear failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weftcore::Value;

    fn inputs(pairs: &[(&str, f64)]) -> SlotValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Number(*v)))
            .collect()
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let mut a = SlotValues::new();
        a.insert("x".to_string(), Value::Number(1.0));
        a.insert("y".to_string(), Value::from("s"));
        let mut b = SlotValues::new();
        b.insert("y".to_string(), Value::from("s"));
        b.insert("x".to_string(), Value::Number(1.0));
        assert_eq!(
            Fingerprint::compute("math.add", &a).unwrap(),
            Fingerprint::compute("math.add", &b).unwrap()
        );
    }

    #[test]
    fn fingerprint_separates_types_and_values() {
        let base = inputs(&[("value", 5.0)]);
        let fp = Fingerprint::compute("math.add", &base).unwrap();
        assert_ne!(fp, Fingerprint::compute("math.mul", &base).unwrap());
        assert_ne!(
            fp,
            Fingerprint::compute("math.add", &inputs(&[("value", 6.0)])).unwrap()
        );
    }

    #[tokio::test]
    async fn memory_cache_round_trips() {
        let cache = MemoryCache::new();
        let fp = Fingerprint::compute("t", &inputs(&[("a", 1.0)])).unwrap();
        assert!(cache.get(&fp).await.is_none());
        cache.set(&fp, inputs(&[("out", 2.0)]), Duration::from_secs(60)).await;
        assert_eq!(cache.get(&fp).await, Some(inputs(&[("out", 2.0)])));
        cache.clear().await;
        assert!(cache.get(&fp).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        let fp = Fingerprint::compute("t", &inputs(&[("a", 1.0)])).unwrap();
        cache.set(&fp, inputs(&[("out", 2.0)]), Duration::from_secs(10)).await;
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get(&fp).await.is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&fp).await.is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted_at_capacity() {
        let cache = MemoryCache::with_capacity(2);
        let ttl = Duration::from_secs(60);
        let first = Fingerprint::compute("t", &inputs(&[("a", 1.0)])).unwrap();
        let second = Fingerprint::compute("t", &inputs(&[("a", 2.0)])).unwrap();
        let third = Fingerprint::compute("t", &inputs(&[("a", 3.0)])).unwrap();

        cache.set(&first, inputs(&[("out", 1.0)]), ttl).await;
        cache.set(&second, inputs(&[("out", 2.0)]), ttl).await;
        // Touch the first entry so the second becomes least recently used.
        assert!(cache.get(&first).await.is_some());
        cache.set(&third, inputs(&[("out", 3.0)]), ttl).await;

        assert!(cache.get(&first).await.is_some());
        assert!(cache.get(&second).await.is_none());
        assert!(cache.get(&third).await.is_some());
    }
}
