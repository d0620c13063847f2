pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — allowing the gateway to start with zero configuration for
    /// local development.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            GatewayConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!("loaded gateway configuration");
        Ok(config)
    }

    /// Apply environment variable overrides. These are the knobs operators
    /// set in container deployments; the file is the long-form equivalent.
    fn apply_env_overrides(&mut self) {
        // Downstream proxy listener
        if let Ok(v) = std::env::var("HOSTNAME") {
            self.proxy.hostname = v;
        }
        if let Ok(v) = std::env::var("PROXY_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.proxy.port = n;
            }
        }
        if let Ok(v) = std::env::var("BASIC_AUTH") {
            self.proxy.basic_auth = Some(v);
        }
        if let Ok(v) = std::env::var("NUM_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                self.proxy.num_workers = Some(n);
            }
        }

        // Admin surface
        if let Ok(v) = std::env::var("FLASK_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.admin.port = n;
            }
        }
        if let Ok(v) = std::env::var("FLASK_USER") {
            self.admin.username = Some(v);
        }
        if let Ok(v) = std::env::var("FLASK_PASS") {
            self.admin.password = Some(v);
        }

        // Durable backing
        if let Ok(host) = std::env::var("STORE_HOST") {
            let port = std::env::var("STORE_PORT")
                .ok()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(2379);
            self.store.endpoints = vec![format!("http://{}:{}", host, port)];
        }

        // Bootstrap pool
        if let Ok(v) = std::env::var("INITIAL_PROXIES") {
            self.initial_proxies = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn validate(&self) -> Result<()> {
        for ep in &self.store.endpoints {
            if ep.is_empty() {
                anyhow::bail!("store endpoint cannot be empty");
            }
        }
        if self.probe.targets.is_empty() {
            anyhow::bail!("probe target list cannot be empty");
        }
        if let Some(auth) = &self.proxy.basic_auth {
            if !auth.contains(':') {
                anyhow::bail!("basic_auth must be user:pass");
            }
        }
        Ok(())
    }

    /// Listener address of the downstream proxy engine.
    pub fn proxy_listen(&self) -> String {
        format!("{}:{}", self.proxy.hostname, self.proxy.port)
    }

    /// Listener address of the admin surface.
    pub fn admin_listen(&self) -> String {
        format!("{}:{}", self.proxy.hostname, self.admin.port)
    }
}
