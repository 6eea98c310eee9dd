//! Redis-backed cross-process event bus
//!
//! Redis pub/sub requires a dedicated connection for the subscriber role
//! that cannot carry regular commands, so the bus holds two: a
//! multiplexed publisher connection and one exclusive subscriber
//! connection driven by a background pump task. Callers only see the
//! `EventBus` trait; local subscribers on the same channel share the
//! single upstream subscription through the fan-out registry.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink, PubSubStream};
use redis::AsyncCommands;
use tokio::sync::mpsc;

use crate::config::EventBusConfig;
use crate::error::Result;

use super::{BusCommand, EventBus, Registry, Subscription};

pub struct RedisEventBus {
    publisher: ConnectionManager,
    registry: Arc<Registry>,
    commands: mpsc::UnboundedSender<BusCommand>,
    buffer: usize,
}

impl RedisEventBus {
    /// Open both connections and start the subscriber pump.
    pub async fn connect(config: &EventBusConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;

        let publisher = client.get_connection_manager().await?;
        let pubsub = client.get_async_pubsub().await?;
        let (sink, stream) = pubsub.split();

        let registry = Registry::new();
        let (commands, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(pump(sink, stream, command_rx, registry.clone()));

        tracing::info!(url = %config.redis_url, "event bus connected");

        Ok(Self {
            publisher,
            registry,
            commands,
            buffer: config.buffer(),
        })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (subscription, first) =
            Registry::attach(&self.registry, channel, self.buffer, Some(self.commands.clone()));

        // Only the first local subscriber opens the upstream channel;
        // the guard of the last one closes it again.
        if first {
            self.commands
                .send(BusCommand::Subscribe(channel.to_string()))
                .map_err(|_| crate::Error::Bus("subscriber connection is gone".to_string()))?;
        }

        Ok(subscription)
    }
}

/// Drives the exclusive subscriber connection: applies subscribe and
/// unsubscribe commands from the guards and fans incoming messages out
/// to the local slots.
async fn pump(
    mut sink: PubSubSink,
    mut stream: PubSubStream,
    mut commands: mpsc::UnboundedReceiver<BusCommand>,
    registry: Arc<Registry>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(BusCommand::Subscribe(channel)) => {
                    if let Err(err) = sink.subscribe(&channel).await {
                        tracing::warn!(channel, error = %err, "upstream subscribe failed");
                    }
                }
                Some(BusCommand::Unsubscribe(channel)) => {
                    if let Err(err) = sink.unsubscribe(&channel).await {
                        tracing::warn!(channel, error = %err, "upstream unsubscribe failed");
                    }
                }
                None => break,
            },
            message = stream.next() => match message {
                Some(message) => {
                    let channel = message.get_channel_name().to_string();
                    registry.dispatch(&channel, message.get_payload_bytes());
                }
                None => {
                    // Subscriber connection died; every local subscriber
                    // observes end of stream and can reconcile from the
                    // durable store.
                    tracing::error!("event bus subscriber connection closed");
                    registry.close_all();
                    break;
                }
            },
        }
    }
}
