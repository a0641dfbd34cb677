pub mod connections;
pub mod manager;
pub mod models;
pub mod permissions;
pub mod storage;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    dao::tournament_store::TournamentStore,
    dto::packet::Packet,
    services::{
        authorization::TokenService,
        dispatcher::Registry,
        mesh::{PeerProbe, WebsocketProbe},
        messaging::MessageSink,
    },
};

use self::{connections::ConnectionRegistry, manager::StateManager, storage::StorageHandle};

pub type SharedState = Arc<AppState>;

const REPLY_CAPACITY: usize = 256;

/// Central application state: live connections, the tournament graph and the collaborators handlers use.
pub struct AppState {
    config: Arc<ServerConfig>,
    connections: Arc<ConnectionRegistry>,
    storage: Arc<StorageHandle>,
    manager: StateManager,
    tokens: TokenService,
    messaging: Arc<dyn MessageSink>,
    probe: Arc<dyn PeerProbe>,
    registry: Registry,
    replies: broadcast::Sender<Packet>,
    score_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: ServerConfig, messaging: Arc<dyn MessageSink>) -> SharedState {
        Self::build(config, Arc::new(StorageHandle::new()), messaging, Arc::new(WebsocketProbe))
    }

    /// State backed by an already connected store.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<dyn TournamentStore>,
        messaging: Arc<dyn MessageSink>,
    ) -> SharedState {
        Self::with_store_and_probe(config, store, messaging, Arc::new(WebsocketProbe))
    }

    /// State backed by a connected store that reaches peers through `probe`.
    pub fn with_store_and_probe(
        config: ServerConfig,
        store: Arc<dyn TournamentStore>,
        messaging: Arc<dyn MessageSink>,
        probe: Arc<dyn PeerProbe>,
    ) -> SharedState {
        Self::build(config, Arc::new(StorageHandle::with_store(store)), messaging, probe)
    }

    fn build(
        config: ServerConfig,
        storage: Arc<StorageHandle>,
        messaging: Arc<dyn MessageSink>,
        probe: Arc<dyn PeerProbe>,
    ) -> SharedState {
        let connections = Arc::new(ConnectionRegistry::new());
        let manager = StateManager::new(Uuid::new_v4(), storage.clone(), connections.clone());
        let tokens = TokenService::new(&config.token_secret);
        let (replies, _rx) = broadcast::channel(REPLY_CAPACITY);
        Arc::new(Self {
            config: Arc::new(config),
            connections,
            storage,
            manager,
            tokens,
            messaging,
            probe,
            registry: Registry::standard(),
            replies,
            score_locks: DashMap::new(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    /// Live websocket connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Durable storage slot.
    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    /// Tournament graph and mesh directory.
    pub fn manager(&self) -> &StateManager {
        &self.manager
    }

    /// Token issuer and verifier.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Chat collaborator for qualifier announcements.
    pub fn messaging(&self) -> Arc<dyn MessageSink> {
        self.messaging.clone()
    }

    /// Handshake used to reach peer servers.
    pub fn probe(&self) -> Arc<dyn PeerProbe> {
        self.probe.clone()
    }

    /// Handler registry used by the dispatcher.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Sender id stamped on server-originated packets.
    pub fn server_id(&self) -> Uuid {
        self.manager.server_id()
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        self.storage.is_degraded()
    }

    /// Hand an inbound acknowledgement or response to local observers.
    pub fn publish_reply(&self, packet: Packet) {
        let _ = self.replies.send(packet);
    }

    /// Stream of inbound acknowledgements and responses.
    pub fn subscribe_replies(&self) -> BroadcastStream<Packet> {
        BroadcastStream::new(self.replies.subscribe())
    }

    /// Lock serializing read-modify-write sequences on one map's scores.
    pub fn score_lock(&self, map_id: Uuid) -> Arc<Mutex<()>> {
        self.score_locks
            .entry(map_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the score locks of maps that no longer exist.
    pub fn release_score_locks(&self, map_ids: impl IntoIterator<Item = Uuid>) {
        for map_id in map_ids {
            self.score_locks.remove(&map_id);
        }
    }

    /// Number of maps currently holding a score lock.
    pub fn score_lock_count(&self) -> usize {
        self.score_locks.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{dao::tournament_store::memory::MemoryStore, services::messaging::LogSink};

    /// Fully wired state over an in-memory store.
    pub(crate) fn app_state() -> (SharedState, MemoryStore) {
        app_state_with(ServerConfig::default())
    }

    /// Same as [`app_state`] with a caller-provided configuration.
    pub(crate) fn app_state_with(config: ServerConfig) -> (SharedState, MemoryStore) {
        let store = MemoryStore::new();
        let config = ServerConfig {
            token_secret: "test-secret".into(),
            ..config
        };
        let state = AppState::with_store(config, Arc::new(store.clone()), Arc::new(LogSink));
        (state, store)
    }

    #[tokio::test]
    async fn score_locks_are_shared_per_map() {
        let (state, _) = app_state();
        let map = Uuid::new_v4();
        let first = state.score_lock(map);
        let second = state.score_lock(map);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &state.score_lock(Uuid::new_v4())));
        assert!(!state.is_degraded());
    }

    #[tokio::test]
    async fn released_score_locks_are_forgotten() {
        let (state, _) = app_state();
        let kept = Uuid::new_v4();
        let retired = Uuid::new_v4();
        let held = state.score_lock(kept);
        state.score_lock(retired);
        assert_eq!(state.score_lock_count(), 2);

        state.release_score_locks([retired, Uuid::new_v4()]);
        assert_eq!(state.score_lock_count(), 1);
        assert!(Arc::ptr_eq(&held, &state.score_lock(kept)));
    }
}
