use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::store::PoolStore;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared gateway state, cheaply cloneable.
///
/// The pool store is the only shared mutable resource; it travels as an
/// explicit handle inside this struct — the dispatcher, probe engine and
/// admin surface all receive it from here rather than through globals.
/// Config reads go through `ArcSwap::load` and stay lock-free.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub store: PoolStore,
    pub metrics: Metrics,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, store: PoolStore, metrics: Metrics) -> Self {
        Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            store,
            metrics,
        }
    }
}
