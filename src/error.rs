use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    InvalidProxyUrl(String),
    DuplicateProxy,
    ProxyUnreachable,
    ProxyNotFound,
    Store(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::InvalidProxyUrl(msg) => write!(f, "invalid proxy url: {}", msg),
            GatewayError::DuplicateProxy => write!(f, "proxy already exists"),
            GatewayError::ProxyUnreachable => write!(f, "proxy is not reachable"),
            GatewayError::ProxyNotFound => write!(f, "proxy not found"),
            GatewayError::Store(msg) => write!(f, "store error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}
