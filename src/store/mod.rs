pub mod backend;
pub mod entry;

pub use backend::{KvBackend, MemoryKv};
pub use entry::{
    canonicalize_proxy_url, normalize_host, now_ts, redact_credentials, HostRecord, PoolEntry,
};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared pool state: the durable mapping from upstream URL to entry.
///
/// Every mutation of one URL serializes through a per-URL async mutex, so a
/// read-modify-write of one entry is atomic with respect to concurrent
/// writers of the same entry while writers of different entries proceed in
/// parallel. Snapshots (`list`) are not mutually consistent across entries;
/// each entry is internally consistent because it is one backend record.
///
/// Cheaply cloneable — hand a clone to the dispatcher, the probe engine and
/// the admin surface instead of sharing ambient globals.
#[derive(Clone)]
pub struct PoolStore {
    backend: KvBackend,
    prefix: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PoolStore {
    pub fn new(backend: KvBackend, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            backend,
            prefix: prefix.trim_end_matches('/').to_string(),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// A store over the in-process backend. Used by tests and when no
    /// durable endpoints are configured.
    pub fn in_memory() -> Self {
        Self::new(KvBackend::Memory(MemoryKv::new()), "/iris/proxies")
    }

    fn key(&self, url: &str) -> String {
        format!("{}/{}", self.prefix, url)
    }

    fn lock_for(&self, url: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Snapshot of all entries. Records that fail to parse are skipped with
    /// a warning rather than poisoning the whole snapshot.
    pub async fn list(&self) -> anyhow::Result<Vec<PoolEntry>> {
        let values = self.backend.list_values(&self.prefix).await?;
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_str::<PoolEntry>(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("store: skipping unparsable entry: {}", e),
            }
        }
        Ok(entries)
    }

    /// Atomic read of one entry.
    pub async fn get(&self, url: &str) -> anyhow::Result<Option<PoolEntry>> {
        match self.backend.get(&self.key(url)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Atomic insert. Returns `false` without writing when the URL is
    /// already present.
    pub async fn put_if_absent(&self, entry: PoolEntry) -> anyhow::Result<bool> {
        let lock = self.lock_for(&entry.url);
        let _guard = lock.lock().await;

        if self.backend.get(&self.key(&entry.url)).await?.is_some() {
            return Ok(false);
        }
        let value = serde_json::to_string(&entry)?;
        self.backend.put(&self.key(&entry.url), &value).await?;
        Ok(true)
    }

    /// Atomic delete. Returns whether the entry existed.
    pub async fn delete(&self, url: &str) -> anyhow::Result<bool> {
        let lock = self.lock_for(url);
        let existed = {
            let _guard = lock.lock().await;
            self.backend.delete(&self.key(url)).await?
        };
        if existed {
            self.locks.remove(url);
        }
        Ok(existed)
    }

    /// Atomic read-modify-write of one entry. When the entry is absent the
    /// mutation is dropped — an entry removed mid-flight simply loses the
    /// update, matching the affinity state machine's removal edge.
    pub async fn update<F>(&self, url: &str, mutate: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut PoolEntry),
    {
        let lock = self.lock_for(url);
        let _guard = lock.lock().await;

        let Some(value) = self.backend.get(&self.key(url)).await? else {
            debug!(
                "store: update dropped, entry absent, url={}",
                entry::redact_credentials(url)
            );
            return Ok(());
        };

        let mut entry: PoolEntry = serde_json::from_str(&value)?;
        mutate(&mut entry);
        let value = serde_json::to_string(&entry)?;
        self.backend.put(&self.key(url), &value).await?;
        Ok(())
    }

    /// One greater than the current maximum id, or 0 when the pool is empty.
    /// Racy by design — ids are informational, callers tolerate a brief
    /// window where two adds observe the same maximum.
    pub async fn next_id(&self) -> anyhow::Result<u64> {
        let entries = self.list().await?;
        Ok(entries.iter().map(|e| e.id + 1).max().unwrap_or(0))
    }

    /// Number of entries currently in the pool.
    pub async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.backend.list_keys(&self.prefix).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, id: u64) -> PoolEntry {
        PoolEntry::new(url, id)
    }

    #[tokio::test]
    async fn test_put_if_absent_and_get() {
        let store = PoolStore::in_memory();
        assert!(store.put_if_absent(entry("http://a:3128/", 0)).await.unwrap());
        assert!(!store.put_if_absent(entry("http://a:3128/", 7)).await.unwrap());

        let got = store.get("http://a:3128/").await.unwrap().unwrap();
        assert_eq!(got.id, 0);
        assert!(!got.alive);
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let store = PoolStore::in_memory();
        store.put_if_absent(entry("http://a:3128/", 0)).await.unwrap();
        assert!(store.delete("http://a:3128/").await.unwrap());
        assert!(!store.delete("http://a:3128/").await.unwrap());
        assert!(store.get("http://a:3128/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_absent_is_dropped() {
        let store = PoolStore::in_memory();
        store
            .update("http://missing:3128/", |e| e.alive = true)
            .await
            .unwrap();
        assert!(store.get("http://missing:3128/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_id_is_dense() {
        let store = PoolStore::in_memory();
        assert_eq!(store.next_id().await.unwrap(), 0);

        store.put_if_absent(entry("http://a:3128/", 0)).await.unwrap();
        store.put_if_absent(entry("http://b:3128/", 1)).await.unwrap();
        assert_eq!(store.next_id().await.unwrap(), 2);

        // Deleting a lower id must not lead to reuse of the maximum.
        store.delete("http://a:3128/").await.unwrap();
        assert_eq!(store.next_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize_per_entry() {
        let store = PoolStore::in_memory();
        store.put_if_absent(entry("http://a:3128/", 0)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("http://a:3128/", |e| e.record_success("x.test", i as f64))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let got = store.get("http://a:3128/").await.unwrap().unwrap();
        assert_eq!(got.host_record("x.test").unwrap().usage_count, 50);
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let store = PoolStore::in_memory();
        store.put_if_absent(entry("http://a:3128/", 0)).await.unwrap();
        store.put_if_absent(entry("http://b:3128/", 1)).await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
