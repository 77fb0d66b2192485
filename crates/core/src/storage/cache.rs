use crate::fingerprint::Fingerprint;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_entries");

/// A cached tool result as it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, payload: serde_json::Value, ttl: Duration) -> Self {
        Self {
            fingerprint,
            payload,
            created_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    /// A TTL too large to express in milliseconds never expires
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at).num_milliseconds();
        if age < 0 {
            return true;
        }
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(1000))
            .is_some_and(|ttl_ms| age >= ttl_ms)
    }

    /// Decode a stored record; anything unreadable or filed under the wrong key is a miss
    fn decode(fingerprint: &Fingerprint, bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<CacheEntry>(bytes) {
            Ok(entry) if &entry.fingerprint == fingerprint => Some(entry),
            Ok(_) => {
                tracing::warn!(fingerprint = %fingerprint, "Cache entry filed under a different key, ignoring");
                None
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Unreadable cache entry, ignoring");
                None
            }
        }
    }
}

/// Response cache keyed by invocation fingerprint
///
/// Expiry is lazy: `get` reports expired entries as absent and the next `put`
/// for the same key overwrites them.
pub trait CacheStore: Send + Sync {
    /// Look up a live entry
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<serde_json::Value>>;

    /// Store a payload for `ttl`
    fn put(&self, fingerprint: &Fingerprint, payload: &serde_json::Value, ttl: Duration) -> Result<()>;
}

/// Cache store backed by a redb file
#[derive(Clone)]
pub struct RedbCacheStore {
    db: Arc<Database>,
}

impl RedbCacheStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _cache_table = write_txn
                .open_table(CACHE_TABLE)
                .context("Failed to open cache table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn read_raw(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn.open_table(CACHE_TABLE).context("Failed to open table")?;

        let value = table
            .get(fingerprint.as_str())
            .context("Failed to get cache entry")?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Write raw bytes under a key (one transaction per entry)
    fn write_raw(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(CACHE_TABLE)
                .context("Failed to open table")?;
            table
                .insert(fingerprint.as_str(), bytes)
                .context("Failed to insert cache entry")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }
}

impl CacheStore for RedbCacheStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<serde_json::Value>> {
        let Some(bytes) = self.read_raw(fingerprint)? else {
            return Ok(None);
        };

        Ok(CacheEntry::decode(fingerprint, &bytes)
            .filter(|entry| !entry.is_expired(Utc::now()))
            .map(|entry| entry.payload))
    }

    fn put(&self, fingerprint: &Fingerprint, payload: &serde_json::Value, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(fingerprint.clone(), payload.clone(), ttl);
        let bytes = serde_json::to_vec(&entry).context("Failed to serialize cache entry")?;
        self.write_raw(fingerprint, &bytes)
    }
}

/// In-process cache store, used for `cache.backend = "memory"` and in tests
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<serde_json::Value>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("Cache lock poisoned"))?;

        Ok(entries
            .get(fingerprint)
            .filter(|entry| !entry.is_expired(Utc::now()))
            .map(|entry| entry.payload.clone()))
    }

    fn put(&self, fingerprint: &Fingerprint, payload: &serde_json::Value, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(fingerprint.clone(), payload.clone(), ttl);
        self.entries
            .write()
            .map_err(|_| anyhow::anyhow!("Cache lock poisoned"))?
            .insert(fingerprint.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fingerprint(tool: &str) -> Fingerprint {
        Fingerprint::compute(tool, &BTreeMap::new())
    }

    #[test]
    fn test_redb_cache_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbCacheStore::new(temp_dir.path().join("cache/cache.redb")).unwrap();
        let fp = fingerprint("get_trending_coins");

        assert!(store.get(&fp).unwrap().is_none());

        let payload = json!([{"coin_id": "bitcoin", "price": 1.0}]);
        store.put(&fp, &payload, Duration::from_secs(60)).unwrap();

        assert_eq!(store.get(&fp).unwrap(), Some(payload));
    }

    #[test]
    fn test_redb_cache_zero_ttl_is_expired() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbCacheStore::new(temp_dir.path().join("cache.redb")).unwrap();
        let fp = fingerprint("get_global_market_data");

        store.put(&fp, &json!({"coin_id": "global"}), Duration::ZERO).unwrap();
        assert!(store.get(&fp).unwrap().is_none());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let entry = CacheEntry::new(
            fingerprint("get_trending_coins"),
            json!([]),
            Duration::from_secs(u64::MAX),
        );
        assert_eq!(entry.ttl_secs, u64::MAX);
        assert!(!entry.is_expired(Utc::now()));
        assert!(!entry.is_expired(entry.created_at + chrono::Duration::days(365 * 100)));

        let temp_dir = TempDir::new().unwrap();
        let store = RedbCacheStore::new(temp_dir.path().join("cache.redb")).unwrap();
        let fp = fingerprint("get_trending_coins");
        store.put(&fp, &json!([]), Duration::from_secs(u64::MAX)).unwrap();
        assert_eq!(store.get(&fp).unwrap(), Some(json!([])));
    }

    #[test]
    fn test_redb_cache_overwrites_stale_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbCacheStore::new(temp_dir.path().join("cache.redb")).unwrap();
        let fp = fingerprint("get_global_market_data");

        store.put(&fp, &json!({"v": 1}), Duration::ZERO).unwrap();
        store.put(&fp, &json!({"v": 2}), Duration::from_secs(60)).unwrap();
        assert_eq!(store.get(&fp).unwrap(), Some(json!({"v": 2})));
    }

    #[test]
    fn test_redb_cache_torn_record_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbCacheStore::new(temp_dir.path().join("cache.redb")).unwrap();
        let fp = fingerprint("get_coin_price");

        store.write_raw(&fp, b"{\"fingerprint\":\"abc\",\"payl").unwrap();
        assert!(store.get(&fp).unwrap().is_none());
    }

    #[test]
    fn test_redb_cache_rejects_entry_under_wrong_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbCacheStore::new(temp_dir.path().join("cache.redb")).unwrap();
        let fp = fingerprint("get_coin_price");
        let other = fingerprint("get_coin_detail");

        let entry = CacheEntry::new(other, json!({"coin_id": "bitcoin"}), Duration::from_secs(60));
        store
            .write_raw(&fp, &serde_json::to_vec(&entry).unwrap())
            .unwrap();
        assert!(store.get(&fp).unwrap().is_none());
    }

    #[test]
    fn test_redb_cache_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.redb");
        let fp = fingerprint("get_trending_coins");

        {
            let store = RedbCacheStore::new(path.clone()).unwrap();
            store.put(&fp, &json!([]), Duration::from_secs(60)).unwrap();
        }

        let reopened = RedbCacheStore::new(path).unwrap();
        assert_eq!(reopened.get(&fp).unwrap(), Some(json!([])));
    }

    #[test]
    fn test_in_memory_cache() {
        let store = InMemoryCacheStore::new();
        let fp = fingerprint("get_trending_coins");

        assert!(store.is_empty());
        store.put(&fp, &json!([1, 2]), Duration::from_secs(60)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&fp).unwrap(), Some(json!([1, 2])));

        store.put(&fp, &json!([3]), Duration::ZERO).unwrap();
        assert!(store.get(&fp).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redb_concurrent_writers_keep_entries_whole() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RedbCacheStore::new(temp_dir.path().join("cache.redb")).unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let fp = Fingerprint::compute(&format!("tool_{}", i % 2), &BTreeMap::new());
                store
                    .put(&fp, &json!({"writer": i}), Duration::from_secs(60))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for tool in ["tool_0", "tool_1"] {
            let value = store.get(&Fingerprint::compute(tool, &BTreeMap::new())).unwrap().unwrap();
            assert!(value["writer"].is_i64());
        }
    }
}
