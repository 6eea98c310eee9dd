//! Process-local event bus
//!
//! Same contract as the cross-process bus, without the wire: publishes
//! fan out directly through the shared registry. Used by tests and by
//! single-process deployments.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::{EventBus, Registry, Subscription};

pub struct LocalEventBus {
    registry: Arc<Registry>,
    buffer: usize,
}

impl LocalEventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Registry::new(),
            buffer: buffer.max(64),
        }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        Ok(self.registry.dispatch(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (subscription, _first) = Registry::attach(&self.registry, channel, self.buffer, None);
        Ok(subscription)
    }
}
