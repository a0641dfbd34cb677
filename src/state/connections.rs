//! Live websocket connections and the outbound fan-out used by the state layer.

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{dto::packet::Packet, state::models::ClientType};

/// Who is talking on a connection, derived from the token attached to a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// `None` for connections that presented no valid token.
    pub client_type: Option<ClientType>,
    /// Primary identity key.
    pub platform_id: String,
    /// Display name carried by the token.
    pub name: String,
    /// Secondary identity key, when the account is linked to a chat platform.
    pub discord_id: Option<String>,
}

impl Identity {
    /// Identity of a connection without a valid token.
    pub fn anonymous() -> Self {
        Self {
            client_type: None,
            platform_id: String::new(),
            name: String::new(),
            discord_id: None,
        }
    }

    /// Identity granted by the literal read-only token.
    pub fn read_only() -> Self {
        Self {
            client_type: Some(ClientType::ReadOnly),
            ..Self::anonymous()
        }
    }

    /// Whether a token was verified for this identity.
    pub fn is_authenticated(&self) -> bool {
        self.client_type.is_some()
    }

    /// Non-empty keys under which roster rows may be filed.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(2);
        if !self.platform_id.is_empty() {
            keys.push(self.platform_id.as_str());
        }
        if let Some(discord_id) = self.discord_id.as_deref().filter(|id| !id.is_empty()) {
            keys.push(discord_id);
        }
        keys
    }
}

/// Outbound side of the transport as seen by the state layer.
///
/// Sends never block: connections own an unbounded writer queue.
pub trait PacketSink: Send + Sync {
    /// Deliver to the listed connections, skipping unknown ones.
    fn send_to(&self, recipients: &[Uuid], packet: &Packet);
    /// Deliver to every live connection.
    fn send_to_all(&self, packet: &Packet);
}

#[derive(Clone)]
/// Handle used to push frames to a connected client.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Registry of live connections keyed by connection guid.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub fn register(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id, handle);
    }

    /// Forget a connection. Returns false when it was already gone.
    pub fn unregister(&self, id: Uuid) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether `id` is connected.
    pub fn contains(&self, id: Uuid) -> bool {
        self.connections.contains_key(&id)
    }

    fn encode(packet: &Packet) -> Option<Message> {
        match packet.to_json_string() {
            Ok(payload) => Some(Message::Text(payload.into())),
            Err(err) => {
                warn!(error = %err, packet_id = %packet.id, "failed to serialize outbound packet");
                None
            }
        }
    }

    fn deliver(handle: &ConnectionHandle, message: Message) {
        if handle.tx.send(message).is_err() {
            debug!(connection = %handle.id, "dropping frame for closing connection");
        }
    }
}

impl PacketSink for ConnectionRegistry {
    fn send_to(&self, recipients: &[Uuid], packet: &Packet) {
        if recipients.is_empty() {
            return;
        }
        let Some(message) = Self::encode(packet) else {
            return;
        };
        for id in recipients {
            // Clone the sender so no map shard stays locked while sending.
            let Some(handle) = self.connections.get(id).map(|entry| entry.clone()) else {
                continue;
            };
            Self::deliver(&handle, message.clone());
        }
    }

    fn send_to_all(&self, packet: &Packet) {
        let Some(message) = Self::encode(packet) else {
            return;
        };
        let handles: Vec<ConnectionHandle> =
            self.connections.iter().map(|entry| entry.clone()).collect();
        for handle in handles {
            Self::deliver(&handle, message.clone());
        }
    }
}
