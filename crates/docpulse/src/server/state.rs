//! Application state for the front service

use std::sync::Arc;

use crate::collab::CollabHub;
use crate::config::Config;
use crate::events::EventBus;
use crate::rpc::ProcessingRpc;
use crate::storage::{ObjectStore, Store};

/// Shared application state. Per-process resources (store pool, bus
/// connections, RPC client) are injected once here and never mutated.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    objects: Arc<dyn ObjectStore>,
    rpc: Arc<dyn ProcessingRpc>,
    collab: Arc<CollabHub>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        objects: Arc<dyn ObjectStore>,
        rpc: Arc<dyn ProcessingRpc>,
    ) -> Self {
        let collab = CollabHub::new(bus.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                bus,
                objects,
                rpc,
                collab,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.inner.bus
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.objects
    }

    pub fn rpc(&self) -> &Arc<dyn ProcessingRpc> {
        &self.inner.rpc
    }

    pub fn collab(&self) -> &Arc<CollabHub> {
        &self.inner.collab
    }
}
