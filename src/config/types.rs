use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Upstream proxy URLs loaded into the pool at startup. Seeded entries
    /// start with `alive = false` until the first probe round.
    #[serde(default)]
    pub initial_proxies: Vec<String>,
}

/// Downstream proxy listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_hostname")]
    pub hostname: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// `user:pass` credentials required from downstream clients via
    /// `Proxy-Authorization`. Unset means no client authentication.
    #[serde(default)]
    pub basic_auth: Option<String>,

    /// Tokio worker thread count. Unset means container CPU-limit detection.
    #[serde(default)]
    pub num_workers: Option<usize>,

    /// Timeout for one TCP connect attempt to a chosen upstream (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname: default_proxy_hostname(),
            port: default_proxy_port(),
            basic_auth: None,
            num_workers: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_proxy_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_proxy_port() -> u16 {
    8181
}

fn default_connect_timeout() -> u64 {
    5
}

/// Admin REST listener settings. Endpoints that mutate the pool require
/// HTTP Basic credentials; with no credentials configured they always
/// answer 401.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            port: default_admin_port(),
            username: None,
            password: None,
        }
    }
}

fn default_admin_port() -> u16 {
    5550
}

/// Durable backing for the pool store (etcd v3 HTTP/JSON API).
/// An empty endpoint list selects the in-memory backend — the pool then
/// does not survive restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_endpoints")]
    pub endpoints: Vec<String>,

    #[serde(default = "default_store_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: default_store_endpoints(),
            prefix: default_store_prefix(),
            username: None,
            password: None,
        }
    }
}

fn default_store_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_store_prefix() -> String {
    "/iris/proxies".to_string()
}

/// Liveness probing of pool entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Ordered reachability targets; the first success wins.
    #[serde(default = "default_probe_targets")]
    pub targets: Vec<String>,

    /// Seconds between probe rounds.
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Per-target timeout for background probes (seconds).
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Per-target timeout for the synchronous probe run by admin add (seconds).
    #[serde(default = "default_admin_probe_timeout")]
    pub admin_timeout_secs: u64,

    /// How many entries are probed concurrently within one round.
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            targets: default_probe_targets(),
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
            admin_timeout_secs: default_admin_probe_timeout(),
            concurrency: default_probe_concurrency(),
        }
    }
}

fn default_probe_targets() -> Vec<String> {
    vec![
        "https://ifconfig.me/ip".to_string(),
        "https://www.google.com".to_string(),
        "https://ya.ru".to_string(),
    ]
}

fn default_probe_interval() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_admin_probe_timeout() -> u64 {
    2
}

fn default_probe_concurrency() -> usize {
    8
}
