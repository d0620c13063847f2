use crate::config::ProbeConfig;
use crate::error::GatewayError;
use crate::pool::probe;
use crate::store::{canonicalize_proxy_url, redact_credentials, PoolEntry, PoolStore};
use std::time::Duration;
use tracing::info;

/// Add an upstream to the pool: validate the URL, reject duplicates, then
/// run one synchronous reachability probe before writing anything.
pub async fn add_proxy(
    store: &PoolStore,
    cfg: &ProbeConfig,
    raw: &str,
) -> Result<PoolEntry, GatewayError> {
    let url = canonicalize_proxy_url(raw)?;
    let key = url.to_string();

    // Cheap duplicate check up front; a racing add is still caught by
    // put_if_absent below.
    match store.get(&key).await {
        Ok(Some(_)) => return Err(GatewayError::DuplicateProxy),
        Ok(None) => {}
        Err(e) => return Err(GatewayError::Store(e.to_string())),
    }

    let timeout = Duration::from_secs(cfg.admin_timeout_secs);
    let Some(latency) = probe::probe_upstream(&url, &cfg.targets, timeout).await else {
        metrics::counter!("gateway_admin_ops_total", "op" => "add", "result" => "unreachable")
            .increment(1);
        return Err(GatewayError::ProxyUnreachable);
    };

    let id = store
        .next_id()
        .await
        .map_err(|e| GatewayError::Store(e.to_string()))?;

    let mut entry = PoolEntry::new(key.clone(), id);
    entry.alive = true;
    entry.last_probe_latency = Some(latency);

    let inserted = store
        .put_if_absent(entry.clone())
        .await
        .map_err(|e| GatewayError::Store(e.to_string()))?;
    if !inserted {
        return Err(GatewayError::DuplicateProxy);
    }

    info!("admin: proxy added, url={}, id={}", redact_credentials(&key), id);
    metrics::counter!("gateway_admin_ops_total", "op" => "add", "result" => "success")
        .increment(1);
    Ok(entry)
}

/// Remove an upstream. Idempotent beyond the first call: a second removal
/// reports not-found.
pub async fn remove_proxy(store: &PoolStore, raw: &str) -> Result<(), GatewayError> {
    // Accept both the canonical form and whatever the operator pasted.
    let key = match canonicalize_proxy_url(raw) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    };

    match store.delete(&key).await {
        Ok(true) => {
            info!("admin: proxy removed, url={}", redact_credentials(&key));
            metrics::counter!("gateway_admin_ops_total", "op" => "remove", "result" => "success")
                .increment(1);
            Ok(())
        }
        Ok(false) => {
            metrics::counter!("gateway_admin_ops_total", "op" => "remove", "result" => "not_found")
                .increment(1);
            Err(GatewayError::ProxyNotFound)
        }
        Err(e) => Err(GatewayError::Store(e.to_string())),
    }
}

/// Full snapshot of the pool.
pub async fn list_proxies(store: &PoolStore) -> Result<Vec<PoolEntry>, GatewayError> {
    store
        .list()
        .await
        .map_err(|e| GatewayError::Store(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_rejects_invalid_url() {
        let store = PoolStore::in_memory();
        let cfg = ProbeConfig::default();

        let err = add_proxy(&store, &cfg, "not a url").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidProxyUrl(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_before_probing() {
        let store = PoolStore::in_memory();
        store
            .put_if_absent(PoolEntry::new("http://10.0.0.1:3128/", 0))
            .await
            .unwrap();
        let cfg = ProbeConfig::default();

        let err = add_proxy(&store, &cfg, "http://10.0.0.1:3128")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateProxy));
    }

    #[tokio::test]
    async fn test_remove_unknown_reports_not_found() {
        let store = PoolStore::in_memory();
        let err = remove_proxy(&store, "http://10.0.0.1:3128")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ProxyNotFound));
    }

    #[tokio::test]
    async fn test_remove_then_remove_again() {
        let store = PoolStore::in_memory();
        store
            .put_if_absent(PoolEntry::new("http://10.0.0.1:3128/", 0))
            .await
            .unwrap();

        assert!(remove_proxy(&store, "http://10.0.0.1:3128").await.is_ok());
        assert!(matches!(
            remove_proxy(&store, "http://10.0.0.1:3128").await,
            Err(GatewayError::ProxyNotFound)
        ));
    }
}
