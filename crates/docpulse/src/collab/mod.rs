//! Real-time collaboration fan-out
//!
//! Room-scoped message bus for per-document cursors and annotations.
//! Room membership is process-local; cross-instance delivery rides the
//! event channel with one topic per room, so a publish on one bridge
//! instance reaches sockets joined on the others without sticky
//! routing. Nothing here is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::EventBus;
use crate::server::state::AppState;
use crate::types::room_channel;

/// Messages a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinDocument { document_id: String },
    #[serde(rename_all = "camelCase")]
    CursorMove { document_id: String, x: f64, y: f64 },
    #[serde(rename_all = "camelCase")]
    AddAnnotation { document_id: String, content: String },
}

/// Messages fanned out to room members.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    CursorChanged { client_id: Uuid, x: f64, y: f64 },
    #[serde(rename_all = "camelCase")]
    AnnotationAdded {
        client_id: Uuid,
        document_id: String,
        content: String,
    },
}

/// Envelope carried on the room topic. The origin instance id lets each
/// hub drop its own echoes.
#[derive(Debug, Serialize, Deserialize)]
struct RoomFrame {
    origin: Uuid,
    sender: Uuid,
    message: ServerMessage,
}

struct Room {
    members: HashMap<Uuid, mpsc::UnboundedSender<String>>,
    forwarder: tokio::task::JoinHandle<()>,
}

impl Drop for Room {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Hub for one bridge instance. Membership mutations are serialized per
/// room by the map's entry locks.
pub struct CollabHub {
    instance_id: Uuid,
    bus: Arc<dyn EventBus>,
    rooms: DashMap<String, Room>,
}

impl CollabHub {
    pub fn new(bus: Arc<dyn EventBus>) -> Arc<Self> {
        Arc::new(Self {
            instance_id: Uuid::new_v4(),
            bus,
            rooms: DashMap::new(),
        })
    }

    /// Place a client connection into a document room, starting the
    /// room's cross-instance forwarder when it is the first local member.
    pub async fn join(
        self: &Arc<Self>,
        document_id: &str,
        client_id: Uuid,
        outbound: mpsc::UnboundedSender<String>,
    ) {
        let key = room_channel(document_id);

        if !self.rooms.contains_key(&key) {
            let forwarder = match self.bus.subscribe(&key).await {
                Ok(subscription) => {
                    let hub = Arc::clone(self);
                    let room_key = key.clone();
                    tokio::spawn(async move {
                        hub.forward(room_key, subscription).await;
                    })
                }
                Err(err) => {
                    tracing::warn!(room = %key, error = %err, "room subscription failed; cross-instance delivery disabled");
                    tokio::spawn(async {})
                }
            };

            // A concurrent join may have created the room while we
            // subscribed; abort the duplicate forwarder so the room has
            // exactly one.
            match self.rooms.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => forwarder.abort(),
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(Room {
                        members: HashMap::new(),
                        forwarder,
                    });
                }
            }
        }

        if let Some(mut room) = self.rooms.get_mut(&key) {
            room.members.insert(client_id, outbound);
            tracing::debug!(room = %key, client = %client_id, members = room.members.len(), "client joined room");
        }
    }

    /// Remove a client from a room; the last member out drops the room
    /// and its forwarder.
    pub fn leave(&self, document_id: &str, client_id: Uuid) {
        let key = room_channel(document_id);
        let empty = {
            let Some(mut room) = self.rooms.get_mut(&key) else {
                return;
            };
            room.members.remove(&client_id);
            room.members.is_empty()
        };
        if empty {
            self.rooms.remove(&key);
            tracing::debug!(room = %key, "room closed");
        }
    }

    /// Fan a message out to every local room member except the sender,
    /// then publish it for the other bridge instances.
    pub async fn broadcast(&self, document_id: &str, sender: Uuid, message: ServerMessage) {
        let key = room_channel(document_id);

        self.deliver_local(&key, Some(sender), &message);

        let frame = RoomFrame {
            origin: self.instance_id,
            sender,
            message,
        };
        match serde_json::to_vec(&frame) {
            Ok(payload) => {
                if let Err(err) = self.bus.publish(&key, &payload).await {
                    tracing::warn!(room = %key, error = %err, "room publish failed");
                }
            }
            Err(err) => tracing::warn!(room = %key, error = %err, "room frame serialization failed"),
        }
    }

    fn deliver_local(&self, key: &str, exclude: Option<Uuid>, message: &ServerMessage) {
        let Some(room) = self.rooms.get(key) else {
            return;
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "collab message serialization failed");
                return;
            }
        };
        for (member, outbound) in &room.members {
            if Some(*member) == exclude {
                continue;
            }
            let _ = outbound.send(text.clone());
        }
    }

    /// Deliver frames published by other instances to local members.
    async fn forward(self: Arc<Self>, key: String, mut subscription: crate::events::Subscription) {
        while let Some(received) = subscription.recv().await {
            let payload = match received {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(room = %key, error = %err, "room subscription terminated");
                    break;
                }
            };
            let frame: RoomFrame = match serde_json::from_slice(&payload) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!(room = %key, error = %err, "skipping malformed room frame");
                    continue;
                }
            };
            // Local members already got this one directly.
            if frame.origin == self.instance_id {
                continue;
            }
            self.deliver_local(&key, Some(frame.sender), &frame.message);
        }
    }
}

/// GET /collab (WebSocket upgrade)
pub async fn collab_socket(
    State(state): State<AppState>,
    _user: crate::auth::AuthenticatedUser,
    upgrade: WebSocketUpgrade,
) -> Response {
    let hub = state.collab().clone();
    upgrade.on_upgrade(move |socket| handle_socket(hub, socket))
}

async fn handle_socket(hub: Arc<CollabHub>, socket: WebSocket) {
    let client_id = Uuid::new_v4();
    let (mut sink, mut source) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut joined: HashSet<String> = HashSet::new();

    while let Some(Ok(message)) = source.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(client = %client_id, error = %err, "ignoring malformed collab message");
                continue;
            }
        };

        match parsed {
            ClientMessage::JoinDocument { document_id } => {
                hub.join(&document_id, client_id, outbound.clone()).await;
                joined.insert(document_id);
            }
            ClientMessage::CursorMove { document_id, x, y } => {
                hub.broadcast(
                    &document_id,
                    client_id,
                    ServerMessage::CursorChanged { client_id, x, y },
                )
                .await;
            }
            ClientMessage::AddAnnotation {
                document_id,
                content,
            } => {
                hub.broadcast(
                    &document_id,
                    client_id,
                    ServerMessage::AnnotationAdded {
                        client_id,
                        document_id: document_id.clone(),
                        content,
                    },
                )
                .await;
            }
        }
    }

    // Transport closed: clean teardown, never surfaced as an error.
    for document_id in joined {
        hub.leave(&document_id, client_id);
    }
    writer.abort();
    tracing::debug!(client = %client_id, "collab socket closed");
}
