use crate::config::GatewayConfig;
use crate::etcd::EtcdClient;
use crate::metrics::Metrics;
use crate::pool;
use crate::server;
use crate::store::{canonicalize_proxy_url, redact_credentials, KvBackend, MemoryKv, PoolEntry, PoolStore};
use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How long background tasks (probe loop, admin server) get to finish
/// in-flight work after shutdown before being aborted.
const TASK_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: Option<String>,
    pub admin_listen: Option<String>,
}

/// Gateway lifecycle: init → store → seed → probe loop → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    // Phase 1: configuration. A broken config is the only fatal error.
    let config = GatewayConfig::load(&args.config_path)?;
    let listen = args.listen.unwrap_or_else(|| config.proxy_listen());
    let admin_listen = args.admin_listen.unwrap_or_else(|| config.admin_listen());

    // Phase 2: durable backing — blocks until reachable.
    let store = connect_store(&config).await;
    let metrics = Metrics::install();
    let state = server::GatewayState::new(config, store, metrics);

    // Phase 3: bootstrap pool.
    seed_initial_proxies(&state).await;

    // Phase 4: background loops — all loop ownership lives here; the pool
    // modules only expose single-shot operations. The token is latched, so
    // a cancel that lands while a probe round is in flight is still seen.
    let shutdown = CancellationToken::new();
    let probe_handle = start_probe_loop(&state, &shutdown);
    let admin_handle = start_admin_server(&state, &admin_listen, &shutdown);

    tracing::info!("server: starting gateway, listen={}", listen);

    let proxy_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    // Phase 5: block until signal, then drain everything.
    wait_for_shutdown(&shutdown).await;

    match proxy_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("server: proxy error: {}", e),
        Err(e) => tracing::error!("server: proxy task error: {}", e),
    }

    // In-flight probes and admin connections get a bounded grace period.
    join_with_grace("probe", probe_handle).await;
    join_with_grace("admin", admin_handle).await;

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

/// Build the pool store. With endpoints configured, block until the
/// backing answers, retrying every 5 seconds; transient per-operation
/// failures later are handled at each call site.
async fn connect_store(config: &GatewayConfig) -> PoolStore {
    if config.store.endpoints.is_empty() {
        tracing::warn!("store: no endpoints configured, pool will not survive restarts");
        return PoolStore::new(
            KvBackend::Memory(MemoryKv::new()),
            config.store.prefix.clone(),
        );
    }

    loop {
        match EtcdClient::connect(&config.store).await {
            Ok(client) => {
                tracing::info!("store: connected to {}", client.base_url());
                let store =
                    PoolStore::new(KvBackend::Etcd(client), config.store.prefix.clone());
                match store.count().await {
                    Ok(n) => tracing::info!("store: {} pool entries present", n),
                    Err(e) => tracing::warn!("store: key listing failed: {}", e),
                }
                return store;
            }
            Err(e) => {
                tracing::error!("store: connection failed: {}", e);
                tracing::info!("store: retrying in 5 seconds...");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

/// Insert the configured bootstrap proxies. Entries start dead until the
/// first probe round; already-persisted entries keep their state.
async fn seed_initial_proxies(state: &server::GatewayState) {
    let config = state.config.load();
    if config.initial_proxies.is_empty() {
        tracing::info!("pool: no initial proxies configured");
        return;
    }

    for raw in &config.initial_proxies {
        let url = match canonicalize_proxy_url(raw) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!("pool: skipping bad initial proxy: {}", e);
                continue;
            }
        };

        let id = match state.store.next_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("pool: id allocation failed: {}", e);
                continue;
            }
        };

        match state.store.put_if_absent(PoolEntry::new(url.clone(), id)).await {
            Ok(true) => tracing::info!(
                "pool: seeded proxy, url={}, id={}",
                redact_credentials(&url),
                id
            ),
            Ok(false) => tracing::debug!(
                "pool: initial proxy already present, url={}",
                redact_credentials(&url)
            ),
            Err(e) => tracing::warn!(
                "pool: seeding failed, url={}, error={}",
                redact_credentials(&url),
                e
            ),
        }
    }
}

/// Sleep for `duration`, but return `true` immediately if shutdown was
/// requested — `cancelled()` is latched, so a cancel delivered while the
/// caller was doing other work is still observed here.
/// Returns `false` if the full duration elapsed normally.
async fn sleep_or_shutdown(duration: std::time::Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.cancelled() => true,
    }
}

fn start_probe_loop(
    state: &server::GatewayState,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let store = state.store.clone();
    let probe_cfg = state.config.load().probe.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(probe_cfg.interval_secs);
        loop {
            if sleep_or_shutdown(interval, &shutdown).await {
                return;
            }
            pool::run_probe_round(&store, &probe_cfg).await;
        }
    })
}

fn start_admin_server(
    state: &server::GatewayState,
    admin_listen: &str,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let s = state.clone();
    let admin_addr = admin_listen.to_string();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, s, shutdown).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    })
}

/// Join a background task, aborting it if it outlives the grace period.
async fn join_with_grace(name: &str, handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(TASK_GRACE, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            if !e.is_cancelled() {
                tracing::error!("server: {} task error: {}", name, e);
            }
        }
        Err(_) => {
            tracing::warn!(
                "server: {} task still running after {}s, aborting",
                name,
                TASK_GRACE.as_secs()
            );
            abort.abort();
        }
    }
}

async fn wait_for_shutdown(shutdown: &CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    // Latched: every loop sees this, even if it is mid-round right now.
    shutdown.cancel();
}
