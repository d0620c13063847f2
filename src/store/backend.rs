use crate::etcd::client::{
    b64_decode, b64_encode, prefix_range_end, DeleteRangeRequest, PutRequest, RangeRequest,
};
use crate::etcd::EtcdClient;
use dashmap::DashMap;
use std::sync::Arc;

/// Key/value backend for the pool store. Enum-based — no trait objects.
///
/// `Etcd` is the durable production backend; `Memory` backs tests and
/// store-less deployments, where the pool does not survive restarts.
#[derive(Clone)]
pub enum KvBackend {
    Etcd(EtcdClient),
    Memory(MemoryKv),
}

impl KvBackend {
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match self {
            Self::Etcd(client) => {
                let resp = client
                    .range(&RangeRequest {
                        key: b64_encode(key),
                        range_end: String::new(),
                        keys_only: None,
                    })
                    .await?;
                match resp.kvs.into_iter().next() {
                    Some(kv) => Ok(Some(b64_decode(&kv.value)?)),
                    None => Ok(None),
                }
            }
            Self::Memory(kv) => Ok(kv.map.get(key).map(|v| v.value().clone())),
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        match self {
            Self::Etcd(client) => {
                client
                    .put(&PutRequest {
                        key: b64_encode(key),
                        value: b64_encode(value),
                    })
                    .await
            }
            Self::Memory(kv) => {
                kv.map.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    /// Delete one key. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        match self {
            Self::Etcd(client) => {
                let deleted = client
                    .delete_range(&DeleteRangeRequest {
                        key: b64_encode(key),
                        range_end: String::new(),
                    })
                    .await?;
                Ok(deleted > 0)
            }
            Self::Memory(kv) => Ok(kv.map.remove(key).is_some()),
        }
    }

    pub async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        match self {
            Self::Etcd(client) => {
                let resp = client
                    .range(&RangeRequest {
                        key: b64_encode(prefix),
                        range_end: prefix_range_end(prefix),
                        keys_only: Some(true),
                    })
                    .await?;
                resp.kvs.iter().map(|kv| b64_decode(&kv.key)).collect()
            }
            Self::Memory(kv) => Ok(kv
                .map
                .iter()
                .filter(|e| e.key().starts_with(prefix))
                .map(|e| e.key().clone())
                .collect()),
        }
    }

    pub async fn list_values(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        match self {
            Self::Etcd(client) => {
                let resp = client
                    .range(&RangeRequest {
                        key: b64_encode(prefix),
                        range_end: prefix_range_end(prefix),
                        keys_only: None,
                    })
                    .await?;
                resp.kvs.iter().map(|kv| b64_decode(&kv.value)).collect()
            }
            Self::Memory(kv) => Ok(kv
                .map
                .iter()
                .filter(|e| e.key().starts_with(prefix))
                .map(|e| e.value().clone())
                .collect()),
        }
    }
}

/// In-process map with the same surface as the durable backend.
#[derive(Clone, Default)]
pub struct MemoryKv {
    map: Arc<DashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}
