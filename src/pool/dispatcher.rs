use crate::pool::selector;
use crate::store::{normalize_host, now_ts, redact_credentials, PoolStore};
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, warn};
use url::Url;

/// Upper bound on upstream candidates tried for one client request.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 10;

/// Outcome of one dispatch: a connected upstream, or the fail-open signal
/// telling the proxy engine to open the connection itself.
pub enum Dispatch<T> {
    Via { upstream: Url, conn: T },
    Direct,
}

/// Select-and-connect loop, run once per client request before the engine
/// opens the upstream connection. Safe to call concurrently.
///
/// `connect` performs the actual connection attempt for a chosen upstream;
/// the engine owns the socket, the dispatcher owns the bookkeeping. Every
/// failure marks the (upstream, host) pair dead *before* the next
/// selection, so one request never retries a just-failed upstream. After
/// `MAX_DISPATCH_ATTEMPTS` failures, or with no candidate left, the
/// request proceeds direct.
pub async fn dispatch<T, E, F, Fut>(store: &PoolStore, host: &str, mut connect: F) -> Dispatch<T>
where
    F: FnMut(Url) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let host = normalize_host(host);

    let mut attempts = MAX_DISPATCH_ATTEMPTS;
    while attempts > 0 {
        let entries = match store.list().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("dispatch: pool snapshot failed, going direct: {}", e);
                break;
            }
        };

        let Some(entry) = selector::select(&entries, &host) else {
            debug!("dispatch: no candidate upstream, host={}", host);
            break;
        };
        let entry_url = entry.url.clone();

        let upstream = match Url::parse(&entry_url) {
            Ok(u) => u,
            Err(e) => {
                warn!(
                    "dispatch: unparsable upstream url, url={}, error={}",
                    redact_credentials(&entry_url),
                    e
                );
                record_failure(store, &entry_url, &host).await;
                attempts -= 1;
                continue;
            }
        };

        match connect(upstream.clone()).await {
            Ok(conn) => {
                metrics::counter!("gateway_dispatch_attempts_total", "result" => "success")
                    .increment(1);
                let h = host.clone();
                if let Err(e) = store
                    .update(&entry_url, move |e| e.record_success(&h, now_ts()))
                    .await
                {
                    warn!(
                        "dispatch: usage write failed, url={}, error={}",
                        redact_credentials(&entry_url),
                        e
                    );
                }
                return Dispatch::Via { upstream, conn };
            }
            Err(e) => {
                metrics::counter!("gateway_dispatch_attempts_total", "result" => "failure")
                    .increment(1);
                warn!(
                    "dispatch: connect failed, upstream={}, host={}, error={}",
                    redact_credentials(&entry_url),
                    host,
                    e
                );
                record_failure(store, &entry_url, &host).await;
                attempts -= 1;
            }
        }
    }

    metrics::counter!("gateway_dispatch_direct_total").increment(1);
    debug!("dispatch: proceeding direct, host={}", host);
    Dispatch::Direct
}

async fn record_failure(store: &PoolStore, url: &str, host: &str) {
    let h = host.to_string();
    if let Err(e) = store.update(url, move |e| e.record_failure(&h)).await {
        warn!(
            "dispatch: failure write failed, url={}, error={}",
            redact_credentials(url),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PoolEntry;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn seeded_store(urls: &[&str]) -> PoolStore {
        let store = PoolStore::in_memory();
        for (i, url) in urls.iter().enumerate() {
            store
                .put_if_absent(PoolEntry::new(*url, i as u64))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_success_records_usage() {
        let store = seeded_store(&["http://a:3128/"]).await;

        let outcome = dispatch(&store, "X.test", |u| async move { Ok::<_, String>(u) }).await;
        let Dispatch::Via { upstream, .. } = outcome else {
            panic!("expected Via");
        };
        assert_eq!(upstream.as_str(), "http://a:3128/");

        let entry = store.get("http://a:3128/").await.unwrap().unwrap();
        let rec = entry.host_record("x.test").unwrap();
        assert_eq!(rec.usage_count, 1);
        assert!(rec.alive_for_host);
        assert!(rec.last_usage.is_some());
    }

    #[tokio::test]
    async fn test_failover_marks_dead_and_uses_next() {
        let store = seeded_store(&["http://a:3128/", "http://b:3128/"]).await;

        let outcome = dispatch(&store, "y.test", |u| async move {
            if u.host_str() == Some("a") {
                Err("connection refused".to_string())
            } else {
                Ok(u)
            }
        })
        .await;

        let Dispatch::Via { upstream, .. } = outcome else {
            panic!("expected Via");
        };
        assert_eq!(upstream.host_str(), Some("b"));

        let a = store.get("http://a:3128/").await.unwrap().unwrap();
        assert!(!a.host_record("y.test").unwrap().alive_for_host);
        let b = store.get("http://b:3128/").await.unwrap().unwrap();
        assert!(b.host_record("y.test").unwrap().alive_for_host);
    }

    #[tokio::test]
    async fn test_failed_upstream_not_retried_within_one_dispatch() {
        let store = seeded_store(&["http://a:3128/", "http://b:3128/", "http://c:3128/"]).await;

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let outcome = dispatch(&store, "x.test", move |u| {
            let seen = seen_in.clone();
            async move {
                seen.lock().unwrap().push(u.host_str().unwrap().to_string());
                Err::<(), _>("refused".to_string())
            }
        })
        .await;

        assert!(matches!(outcome, Dispatch::Direct));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_pool_goes_direct_without_connect() {
        let store = PoolStore::in_memory();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let outcome = dispatch(&store, "x.test", move |_| {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok::<_, String>(())
            }
        })
        .await;

        assert!(matches!(outcome, Dispatch::Direct));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        // Twelve broken upstreams: the dispatcher must stop at the bound.
        let urls: Vec<String> = (0..12).map(|i| format!("http://u{}:3128/", i)).collect();
        let refs: Vec<&str> = urls.iter().map(|s| s.as_str()).collect();
        let store = seeded_store(&refs).await;

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let outcome = dispatch(&store, "x.test", move |_| {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err::<(), _>("refused".to_string())
            }
        })
        .await;

        assert!(matches!(outcome, Dispatch::Direct));
        assert_eq!(calls.load(Ordering::Relaxed), MAX_DISPATCH_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_single_broken_upstream_exhausts_after_one_attempt() {
        // Once the only entry is marked dead for the host, no candidate is
        // left and the dispatcher fails open immediately.
        let store = seeded_store(&["http://a:3128/"]).await;

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let outcome = dispatch(&store, "x.test", move |_| {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err::<(), _>("refused".to_string())
            }
        })
        .await;

        assert!(matches!(outcome, Dispatch::Direct));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        let a = store.get("http://a:3128/").await.unwrap().unwrap();
        assert!(!a.host_record("x.test").unwrap().alive_for_host);
    }
}
