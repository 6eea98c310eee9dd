//! Ephemeral named-channel pub/sub
//!
//! Best-effort, at-most-once, in-order per publisher. Messages published
//! while no subscriber is attached are dropped; there is no persistence
//! and no replay. A slow subscriber never blocks the others on the same
//! channel: each subscriber gets a bounded buffer and is terminated with
//! an overflow error when it falls too far behind.

mod local;
mod redis_bus;

pub use local::LocalEventBus;
pub use redis_bus::RedisEventBus;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;

/// Terminal conditions a subscriber can observe besides a clean end.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The subscriber fell behind the bounded buffer and was detached.
    #[error("subscriber buffer overflowed; events were lost")]
    Overflowed,
}

/// Pub/sub facility over named string channels.
///
/// Implementations: [`LocalEventBus`] (process-local, used by tests and
/// single-process runs) and [`RedisEventBus`] (cross-process).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver `payload` to every currently-attached subscriber of
    /// `channel`; returns the number of receivers at dispatch time.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize>;

    /// Attach a new subscriber. Each subscriber receives every message
    /// published after it attached, until it is dropped, the upstream
    /// connection dies, or its buffer overflows.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// Commands sent from subscription guards to a bus I/O task.
#[derive(Debug)]
pub(crate) enum BusCommand {
    Subscribe(String),
    Unsubscribe(String),
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<Vec<u8>>,
    overflowed: Arc<AtomicBool>,
}

/// Process-local fan-out table shared by a bus front and its I/O task.
/// One upstream subscription per channel is multiplexed to N local slots.
#[derive(Default)]
pub(crate) struct Registry {
    channels: Mutex<HashMap<String, Vec<Slot>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a slot; returns the subscriber half and whether this was
    /// the first slot on the channel.
    pub(crate) fn attach(
        registry: &Arc<Self>,
        channel: &str,
        buffer: usize,
        commands: Option<mpsc::UnboundedSender<BusCommand>>,
    ) -> (Subscription, bool) {
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(buffer);
        let overflowed = Arc::new(AtomicBool::new(false));

        let mut channels = registry.channels.lock();
        let slots = channels.entry(channel.to_string()).or_default();
        let first = slots.is_empty();
        slots.push(Slot {
            id,
            tx,
            overflowed: overflowed.clone(),
        });
        drop(channels);

        let subscription = Subscription {
            rx,
            overflowed,
            overflow_reported: false,
            _guard: SlotGuard {
                registry: Arc::clone(registry),
                channel: channel.to_string(),
                id,
                commands,
            },
        };
        (subscription, first)
    }

    /// Remove a slot; returns true when the channel has no slots left.
    fn detach(&self, channel: &str, id: u64) -> bool {
        let mut channels = self.channels.lock();
        if let Some(slots) = channels.get_mut(channel) {
            slots.retain(|slot| slot.id != id);
            if slots.is_empty() {
                channels.remove(channel);
                return true;
            }
        }
        false
    }

    /// Fan a payload out to every slot on the channel. Slots that cannot
    /// keep up are marked overflowed and detached; entire events are
    /// delivered or dropped, never partial ones. Returns the number of
    /// slots attached at dispatch time.
    pub(crate) fn dispatch(&self, channel: &str, payload: &[u8]) -> usize {
        let mut channels = self.channels.lock();
        let Some(slots) = channels.get_mut(channel) else {
            return 0;
        };
        let attached = slots.len();

        // Empty channel entries are left in place: the last guard to
        // drop removes the entry and triggers the upstream unsubscribe.
        slots.retain(|slot| match slot.tx.try_send(payload.to_vec()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                slot.overflowed.store(true, Ordering::Release);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        attached
    }

    /// Drop every slot. Subscribers observe a clean end of stream; the
    /// caller uses this when the upstream connection dies.
    pub(crate) fn close_all(&self) {
        self.channels.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

/// Handle to one attached subscriber. Dropping it detaches the slot
/// synchronously, before the next scheduler turn.
pub struct Subscription {
    rx: mpsc::Receiver<Vec<u8>>,
    overflowed: Arc<AtomicBool>,
    overflow_reported: bool,
    _guard: SlotGuard,
}

impl Subscription {
    /// Receive the next payload. Yields `Err(BusError::Overflowed)` once
    /// after the buffered backlog drains if this subscriber was detached
    /// for falling behind, then `None`. A plain `None` means the channel
    /// ended (unsubscribe or upstream connection death).
    pub async fn recv(&mut self) -> Option<std::result::Result<Vec<u8>, BusError>> {
        match self.rx.recv().await {
            Some(payload) => Some(Ok(payload)),
            None => {
                if self.overflowed.load(Ordering::Acquire) && !self.overflow_reported {
                    self.overflow_reported = true;
                    Some(Err(BusError::Overflowed))
                } else {
                    None
                }
            }
        }
    }
}

struct SlotGuard {
    registry: Arc<Registry>,
    channel: String,
    id: u64,
    commands: Option<mpsc::UnboundedSender<BusCommand>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let last = self.registry.detach(&self.channel, self.id);
        if last {
            if let Some(commands) = &self.commands {
                let _ = commands.send(BusCommand::Unsubscribe(self.channel.clone()));
            }
        }
    }
}

/// Serialize and publish a progress event, tolerating channel failures.
/// The durable store is authoritative, so a failed publish is only worth
/// a warning.
pub async fn publish_event(bus: &dyn EventBus, channel: &str, event: &crate::ProgressEvent) {
    let payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(channel, error = %err, "failed to serialize progress event");
            return;
        }
    };

    match bus.publish(channel, &payload).await {
        Ok(receivers) => {
            tracing::debug!(channel, receivers, "published progress event");
        }
        Err(err) => {
            tracing::warn!(channel, error = %err, "failed to publish progress event");
        }
    }
}
