//! Canonical in-memory tournament graph.
//!
//! Every collection lives behind its own guard (one per tournament and
//! collection, plus one for the server directory). Guards are only held for the
//! in-memory edit itself; persistence and fan-out happen after release.

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{QualifierEntity, TournamentEntity},
    dto::{event::Event, packet::Packet},
    error::ServiceError,
    state::{
        connections::PacketSink,
        models::{CoreServer, Match, QualifierEvent, RowStatus, Tournament, TournamentSettings, User},
        permissions::{AuthorizedUser, Permission, permissions_of},
        storage::StorageHandle,
    },
};

const OBSERVER_CAPACITY: usize = 256;

/// One tournament, split into independently guarded partitions.
struct TournamentSlot {
    guid: Uuid,
    server: Option<CoreServer>,
    settings: Mutex<TournamentSettings>,
    users: Mutex<Vec<User>>,
    matches: Mutex<Vec<Match>>,
    qualifiers: Mutex<Vec<QualifierEvent>>,
    roster: Mutex<Vec<AuthorizedUser>>,
    /// Serializes persist-then-apply sequences on settings, roster and qualifiers.
    write_gate: Mutex<()>,
}

impl TournamentSlot {
    fn new(tournament: Tournament) -> Self {
        Self {
            guid: tournament.guid,
            server: tournament.server,
            settings: Mutex::new(tournament.settings.unwrap_or_default()),
            users: Mutex::new(tournament.users),
            matches: Mutex::new(tournament.matches),
            qualifiers: Mutex::new(tournament.qualifiers),
            roster: Mutex::new(Vec::new()),
            write_gate: Mutex::new(()),
        }
    }

    async fn snapshot(&self) -> Tournament {
        let settings = self.settings.lock().await.clone();
        let users = self.users.lock().await.clone();
        let matches = self.matches.lock().await.clone();
        let qualifiers = self.qualifiers.lock().await.clone();
        Tournament {
            guid: self.guid,
            settings: Some(settings),
            users,
            matches,
            qualifiers,
            server: self.server.clone(),
        }
    }

    async fn member_ids(&self) -> Vec<Uuid> {
        self.users.lock().await.iter().map(|user| user.guid).collect()
    }
}

/// Owner of the tournament graph and the mesh directory.
pub struct StateManager {
    server_id: Uuid,
    tournaments: DashMap<Uuid, Arc<TournamentSlot>>,
    servers: Mutex<Vec<CoreServer>>,
    storage: Arc<StorageHandle>,
    sink: Arc<dyn PacketSink>,
    observers: broadcast::Sender<Event>,
}

impl StateManager {
    /// Empty graph. `server_id` is used as sender of every broadcast.
    pub fn new(server_id: Uuid, storage: Arc<StorageHandle>, sink: Arc<dyn PacketSink>) -> Self {
        let (observers, _rx) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            server_id,
            tournaments: DashMap::new(),
            servers: Mutex::new(Vec::new()),
            storage,
            sink,
            observers,
        }
    }

    /// Sender id stamped on server-originated packets.
    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    /// Stream of every event published after subscription, for in-process observers.
    pub fn subscribe(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.observers.subscribe())
    }

    /// Rebuild tournaments, qualifiers and rosters from durable storage. Called once at startup.
    pub async fn load_saved(&self) -> Result<usize, ServiceError> {
        let store = self.storage.store().await?;
        let tournaments = store.list_tournaments().await?;
        let qualifiers = store.list_qualifiers().await?;

        for entity in tournaments {
            let roster = store.list_authorized_users(entity.id).await?;
            let slot = TournamentSlot::new(entity.into_tournament());
            *slot.roster.lock().await = roster;
            self.tournaments.insert(slot.guid, Arc::new(slot));
        }

        for QualifierEntity {
            tournament_id,
            event,
            ..
        } in qualifiers
        {
            match self.slot(tournament_id) {
                Ok(slot) => slot.qualifiers.lock().await.push(event),
                Err(_) => warn!(
                    tournament = %tournament_id,
                    qualifier = %event.guid,
                    "skipping saved qualifier of unknown tournament"
                ),
            }
        }

        let count = self.tournaments.len();
        info!(tournaments = count, "loaded saved tournaments");
        Ok(count)
    }

    fn slot(&self, tournament_id: Uuid) -> Result<Arc<TournamentSlot>, ServiceError> {
        self.tournaments
            .get(&tournament_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("tournament {tournament_id}")))
    }

    fn slots(&self) -> Vec<Arc<TournamentSlot>> {
        self.tournaments
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn publish_to(&self, recipients: &[Uuid], event: Event) {
        let packet = Packet::event(self.server_id, event.clone());
        self.sink.send_to(recipients, &packet);
        let _ = self.observers.send(event);
    }

    fn publish_all(&self, event: Event) {
        let packet = Packet::event(self.server_id, event.clone());
        self.sink.send_to_all(&packet);
        let _ = self.observers.send(event);
    }

    async fn publish_tournament(&self, slot: &TournamentSlot, event: Event) {
        let members = slot.member_ids().await;
        self.publish_to(&members, event);
    }

    /// Snapshot of one tournament.
    pub async fn tournament(&self, tournament_id: Uuid) -> Option<Tournament> {
        let slot = self.slot(tournament_id).ok()?;
        Some(slot.snapshot().await)
    }

    /// Snapshot of every tournament.
    pub async fn tournaments(&self) -> Vec<Tournament> {
        let mut tournaments = Vec::with_capacity(self.tournaments.len());
        for slot in self.slots() {
            tournaments.push(slot.snapshot().await);
        }
        tournaments
    }

    /// Settings of one tournament.
    pub async fn settings(&self, tournament_id: Uuid) -> Option<TournamentSettings> {
        let slot = self.slot(tournament_id).ok()?;
        let settings = slot.settings.lock().await.clone();
        Some(settings)
    }

    /// Persist and register a new tournament, then announce it to everyone.
    pub async fn create_tournament(&self, tournament: Tournament) -> Result<Tournament, ServiceError> {
        if self.tournaments.contains_key(&tournament.guid) {
            return Err(ServiceError::Conflict(format!(
                "tournament {} already exists",
                tournament.guid
            )));
        }

        let store = self.storage.store().await?;
        store
            .save_tournament(TournamentEntity::from_tournament(&tournament))
            .await?;

        let slot = Arc::new(TournamentSlot::new(tournament));
        self.tournaments.insert(slot.guid, slot.clone());
        let snapshot = slot.snapshot().await;
        debug!(tournament = %snapshot.guid, "tournament created");

        self.publish_all(Event::TournamentCreated {
            tournament: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Apply `edit` to a copy of the settings, persist it, then commit and announce.
    pub async fn update_settings<F>(&self, tournament_id: Uuid, edit: F) -> Result<Tournament, ServiceError>
    where
        F: FnOnce(&mut TournamentSettings) -> Result<(), ServiceError>,
    {
        let slot = self.slot(tournament_id)?;
        let _gate = slot.write_gate.lock().await;

        let mut settings = slot.settings.lock().await.clone();
        edit(&mut settings)?;

        let mut draft = slot.snapshot().await;
        draft.settings = Some(settings.clone());
        let store = self.storage.store().await?;
        store
            .save_tournament(TournamentEntity::from_tournament(&draft))
            .await?;

        *slot.settings.lock().await = settings;
        let snapshot = slot.snapshot().await;
        debug!(tournament = %tournament_id, "tournament settings updated");

        self.publish_all(Event::TournamentUpdated {
            tournament: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Delete a tournament and retire its qualifiers.
    pub async fn delete_tournament(&self, tournament_id: Uuid) -> Result<Tournament, ServiceError> {
        let slot = self.slot(tournament_id)?;
        let _gate = slot.write_gate.lock().await;

        let store = self.storage.store().await?;
        let qualifier_ids: Vec<Uuid> = slot.qualifiers.lock().await.iter().map(|q| q.guid).collect();
        for qualifier_id in qualifier_ids {
            store.remove_qualifier(qualifier_id).await?;
        }
        store.delete_tournament(tournament_id).await?;

        let snapshot = slot.snapshot().await;
        self.tournaments.remove(&tournament_id);
        debug!(tournament = %tournament_id, "tournament deleted");

        self.publish_all(Event::TournamentDeleted {
            tournament: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Users currently joined to a tournament.
    pub async fn users(&self, tournament_id: Uuid) -> Vec<User> {
        match self.slot(tournament_id) {
            Ok(slot) => slot.users.lock().await.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// One joined user.
    pub async fn user(&self, tournament_id: Uuid, user_id: Uuid) -> Option<User> {
        let slot = self.slot(tournament_id).ok()?;
        let users = slot.users.lock().await;
        users.iter().find(|user| user.guid == user_id).cloned()
    }

    /// Connection guids of the users joined to a tournament.
    pub async fn member_ids(&self, tournament_id: Uuid) -> Vec<Uuid> {
        match self.slot(tournament_id) {
            Ok(slot) => slot.member_ids().await,
            Err(_) => Vec::new(),
        }
    }

    /// Join a user to a tournament. A user with the same guid is replaced.
    pub async fn add_user(&self, tournament_id: Uuid, user: User) -> Result<(), ServiceError> {
        let slot = self.slot(tournament_id)?;
        {
            let mut users = slot.users.lock().await;
            users.retain(|existing| existing.guid != user.guid);
            users.push(user.clone());
        }
        debug!(tournament = %tournament_id, user = %user.guid, "user added");

        self.publish_tournament(&slot, Event::UserAdded {
            tournament_id,
            user,
        })
        .await;
        Ok(())
    }

    /// Replace a joined user. Returns false, without broadcasting, when the user is gone.
    pub async fn update_user(&self, tournament_id: Uuid, user: User) -> Result<bool, ServiceError> {
        let slot = self.slot(tournament_id)?;
        {
            let mut users = slot.users.lock().await;
            let Some(position) = users.iter().position(|existing| existing.guid == user.guid) else {
                return Ok(false);
            };
            users.remove(position);
            users.push(user.clone());
        }

        self.publish_tournament(&slot, Event::UserUpdated {
            tournament_id,
            user,
        })
        .await;
        Ok(true)
    }

    /// Remove a user and strip it from every match of the tournament.
    ///
    /// Removing an absent user is a silent no-op.
    pub async fn remove_user(&self, tournament_id: Uuid, user_id: Uuid) -> Result<bool, ServiceError> {
        let slot = self.slot(tournament_id)?;
        let removed = {
            let mut users = slot.users.lock().await;
            match users.iter().position(|user| user.guid == user_id) {
                Some(position) => users.remove(position),
                None => return Ok(false),
            }
        };
        debug!(tournament = %tournament_id, user = %user_id, "user removed");

        let mut recipients = slot.member_ids().await;
        recipients.push(user_id);
        self.publish_to(&recipients, Event::UserLeft {
            tournament_id,
            user: removed,
        });

        let touched: Vec<Match> = {
            let mut matches = slot.matches.lock().await;
            matches
                .iter_mut()
                .filter(|game_match| game_match.associated_users.contains(&user_id))
                .map(|game_match| {
                    game_match.associated_users.retain(|guid| *guid != user_id);
                    game_match.clone()
                })
                .collect()
        };
        for game_match in touched {
            self.publish_tournament(&slot, Event::MatchUpdated {
                tournament_id,
                game_match,
            })
            .await;
        }
        Ok(true)
    }

    /// Remove a disconnected user from every tournament it joined.
    pub async fn remove_user_everywhere(&self, user_id: Uuid) -> usize {
        let mut count = 0;
        for slot in self.slots() {
            if let Ok(true) = self.remove_user(slot.guid, user_id).await {
                count += 1;
            }
        }
        count
    }

    /// Matches of a tournament.
    pub async fn matches(&self, tournament_id: Uuid) -> Vec<Match> {
        match self.slot(tournament_id) {
            Ok(slot) => slot.matches.lock().await.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Register a match.
    pub async fn create_match(&self, tournament_id: Uuid, game_match: Match) -> Result<Match, ServiceError> {
        let slot = self.slot(tournament_id)?;
        {
            let mut matches = slot.matches.lock().await;
            if matches.iter().any(|existing| existing.guid == game_match.guid) {
                return Err(ServiceError::Conflict(format!(
                    "match {} already exists",
                    game_match.guid
                )));
            }
            matches.push(game_match.clone());
        }
        debug!(tournament = %tournament_id, game_match = %game_match.guid, "match created");

        self.publish_tournament(&slot, Event::MatchCreated {
            tournament_id,
            game_match: game_match.clone(),
        })
        .await;
        Ok(game_match)
    }

    /// Edit a match in place. `None` when the match no longer exists.
    pub async fn update_match<F>(
        &self,
        tournament_id: Uuid,
        match_id: Uuid,
        edit: F,
    ) -> Result<Option<Match>, ServiceError>
    where
        F: FnOnce(&mut Match),
    {
        let slot = self.slot(tournament_id)?;
        let updated = {
            let mut matches = slot.matches.lock().await;
            let Some(position) = matches.iter().position(|m| m.guid == match_id) else {
                return Ok(None);
            };
            let mut game_match = matches.remove(position);
            edit(&mut game_match);
            game_match.guid = match_id;
            matches.push(game_match.clone());
            game_match
        };

        self.publish_tournament(&slot, Event::MatchUpdated {
            tournament_id,
            game_match: updated.clone(),
        })
        .await;
        Ok(Some(updated))
    }

    /// Delete a match. `None` when it was already gone.
    pub async fn delete_match(&self, tournament_id: Uuid, match_id: Uuid) -> Result<Option<Match>, ServiceError> {
        let slot = self.slot(tournament_id)?;
        let removed = {
            let mut matches = slot.matches.lock().await;
            match matches.iter().position(|m| m.guid == match_id) {
                Some(position) => matches.remove(position),
                None => return Ok(None),
            }
        };
        debug!(tournament = %tournament_id, game_match = %match_id, "match deleted");

        self.publish_tournament(&slot, Event::MatchDeleted {
            tournament_id,
            game_match: removed.clone(),
        })
        .await;
        Ok(Some(removed))
    }

    /// Qualifier events of a tournament.
    pub async fn qualifiers(&self, tournament_id: Uuid) -> Vec<QualifierEvent> {
        match self.slot(tournament_id) {
            Ok(slot) => slot.qualifiers.lock().await.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// One qualifier event.
    pub async fn qualifier(&self, tournament_id: Uuid, qualifier_id: Uuid) -> Option<QualifierEvent> {
        let slot = self.slot(tournament_id).ok()?;
        let qualifiers = slot.qualifiers.lock().await;
        qualifiers.iter().find(|q| q.guid == qualifier_id).cloned()
    }

    /// Persist a new qualifier, then register and announce it.
    pub async fn create_qualifier(
        &self,
        tournament_id: Uuid,
        qualifier: QualifierEvent,
    ) -> Result<QualifierEvent, ServiceError> {
        let slot = self.slot(tournament_id)?;
        let _gate = slot.write_gate.lock().await;

        if slot.qualifiers.lock().await.iter().any(|q| q.guid == qualifier.guid) {
            return Err(ServiceError::Conflict(format!(
                "qualifier {} already exists",
                qualifier.guid
            )));
        }

        let store = self.storage.store().await?;
        store
            .save_qualifier(QualifierEntity::active(tournament_id, qualifier.clone()))
            .await?;

        slot.qualifiers.lock().await.push(qualifier.clone());
        debug!(tournament = %tournament_id, qualifier = %qualifier.guid, "qualifier created");

        self.publish_tournament(&slot, Event::QualifierCreated {
            tournament_id,
            qualifier: qualifier.clone(),
        })
        .await;
        Ok(qualifier)
    }

    /// Apply `edit` to a copy of the qualifier, persist it, then commit and announce.
    pub async fn update_qualifier<F>(
        &self,
        tournament_id: Uuid,
        qualifier_id: Uuid,
        edit: F,
    ) -> Result<QualifierEvent, ServiceError>
    where
        F: FnOnce(&mut QualifierEvent) -> Result<(), ServiceError>,
    {
        let slot = self.slot(tournament_id)?;
        let _gate = slot.write_gate.lock().await;

        let mut qualifier = {
            let qualifiers = slot.qualifiers.lock().await;
            qualifiers
                .iter()
                .find(|q| q.guid == qualifier_id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("qualifier {qualifier_id}")))?
        };
        edit(&mut qualifier)?;
        qualifier.guid = qualifier_id;

        let store = self.storage.store().await?;
        store
            .save_qualifier(QualifierEntity::active(tournament_id, qualifier.clone()))
            .await?;

        {
            let mut qualifiers = slot.qualifiers.lock().await;
            let Some(position) = qualifiers.iter().position(|q| q.guid == qualifier_id) else {
                return Err(ServiceError::Conflict(format!(
                    "qualifier {qualifier_id} was removed concurrently"
                )));
            };
            qualifiers.remove(position);
            qualifiers.push(qualifier.clone());
        }
        debug!(tournament = %tournament_id, qualifier = %qualifier_id, "qualifier updated");

        self.publish_tournament(&slot, Event::QualifierUpdated {
            tournament_id,
            qualifier: qualifier.clone(),
        })
        .await;
        Ok(qualifier)
    }

    /// Retire a qualifier in storage, then drop and announce it.
    pub async fn delete_qualifier(
        &self,
        tournament_id: Uuid,
        qualifier_id: Uuid,
    ) -> Result<QualifierEvent, ServiceError> {
        let slot = self.slot(tournament_id)?;
        let _gate = slot.write_gate.lock().await;

        if !slot.qualifiers.lock().await.iter().any(|q| q.guid == qualifier_id) {
            return Err(ServiceError::NotFound(format!("qualifier {qualifier_id}")));
        }

        let store = self.storage.store().await?;
        store.remove_qualifier(qualifier_id).await?;

        let removed = {
            let mut qualifiers = slot.qualifiers.lock().await;
            match qualifiers.iter().position(|q| q.guid == qualifier_id) {
                Some(position) => qualifiers.remove(position),
                None => return Err(ServiceError::NotFound(format!("qualifier {qualifier_id}"))),
            }
        };
        debug!(tournament = %tournament_id, qualifier = %qualifier_id, "qualifier deleted");

        self.publish_tournament(&slot, Event::QualifierDeleted {
            tournament_id,
            qualifier: removed.clone(),
        })
        .await;
        Ok(removed)
    }

    /// Active roster rows of a tournament.
    pub async fn authorized_users(&self, tournament_id: Uuid) -> Result<Vec<AuthorizedUser>, ServiceError> {
        let slot = self.slot(tournament_id)?;
        let roster = slot.roster.lock().await;
        Ok(roster
            .iter()
            .filter(|row| row.status == RowStatus::Active)
            .cloned()
            .collect())
    }

    /// Persist then cache a roster row, keyed by (tournament, identity).
    pub async fn save_authorized_user(&self, user: AuthorizedUser) -> Result<(), ServiceError> {
        let slot = self.slot(user.tournament_id)?;
        let _gate = slot.write_gate.lock().await;

        let store = self.storage.store().await?;
        store.save_authorized_user(user.clone()).await?;

        let mut roster = slot.roster.lock().await;
        roster.retain(|row| row.identity != user.identity);
        roster.push(user);
        Ok(())
    }

    /// Soft-remove a roster row. Returns false when no active row existed.
    pub async fn remove_authorized_user(&self, tournament_id: Uuid, identity: &str) -> Result<bool, ServiceError> {
        let slot = self.slot(tournament_id)?;
        let _gate = slot.write_gate.lock().await;

        let existing = {
            let roster = slot.roster.lock().await;
            roster
                .iter()
                .find(|row| row.identity == identity && row.status == RowStatus::Active)
                .cloned()
        };
        let Some(mut row) = existing else {
            return Ok(false);
        };
        row.status = RowStatus::Removed;

        let store = self.storage.store().await?;
        store.save_authorized_user(row.clone()).await?;

        let mut roster = slot.roster.lock().await;
        if let Some(cached) = roster.iter_mut().find(|cached| cached.identity == row.identity) {
            *cached = row;
        }
        Ok(true)
    }

    /// Union of the permissions held by any of `keys` in a tournament.
    pub async fn permissions(&self, tournament_id: Uuid, keys: &[&str]) -> HashSet<Permission> {
        let Ok(slot) = self.slot(tournament_id) else {
            return HashSet::new();
        };
        let role_ids: Vec<String> = {
            let roster = slot.roster.lock().await;
            roster
                .iter()
                .filter(|row| row.status == RowStatus::Active && keys.contains(&row.identity.as_str()))
                .flat_map(|row| row.role_ids.iter().cloned())
                .collect()
        };
        if role_ids.is_empty() {
            return HashSet::new();
        }
        let settings = slot.settings.lock().await;
        permissions_of(&settings.roles, &role_ids)
    }

    /// Current mesh directory.
    pub async fn servers(&self) -> Vec<CoreServer> {
        self.servers.lock().await.clone()
    }

    /// Add a server unless one with the same endpoint is known.
    pub async fn add_server(&self, server: CoreServer) -> bool {
        {
            let mut servers = self.servers.lock().await;
            if servers.contains(&server) {
                return false;
            }
            servers.push(server.clone());
        }
        debug!(server = %server.endpoint(), "server added");
        self.publish_all(Event::ServerAdded { server });
        true
    }

    /// Replace the directory with `servers`, deduplicated by endpoint, announcing the difference.
    pub async fn replace_servers(&self, servers: Vec<CoreServer>) -> Vec<CoreServer> {
        let mut seen = HashSet::new();
        let next: Vec<CoreServer> = servers
            .into_iter()
            .filter(|server| seen.insert(server.clone()))
            .collect();

        let (added, removed) = {
            let mut current = self.servers.lock().await;
            let added: Vec<CoreServer> = next.iter().filter(|s| !current.contains(s)).cloned().collect();
            let removed: Vec<CoreServer> = current.iter().filter(|s| !next.contains(s)).cloned().collect();
            *current = next.clone();
            (added, removed)
        };

        for server in removed {
            self.publish_all(Event::ServerDeleted { server });
        }
        for server in added {
            self.publish_all(Event::ServerAdded { server });
        }
        next
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;

    use futures::StreamExt;

    use super::*;
    use crate::{
        dao::tournament_store::memory::MemoryStore,
        dto::packet::PacketBody,
        state::models::ClientType,
    };

    /// Sink recording every delivery.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: StdMutex<Vec<(Option<Vec<Uuid>>, Packet)>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<Event> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(_, packet)| match &packet.packet {
                    PacketBody::Event(event) => Some(event.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl PacketSink for RecordingSink {
        fn send_to(&self, recipients: &[Uuid], packet: &Packet) {
            self.sent
                .lock()
                .unwrap()
                .push((Some(recipients.to_vec()), packet.clone()));
        }

        fn send_to_all(&self, packet: &Packet) {
            self.sent.lock().unwrap().push((None, packet.clone()));
        }
    }

    pub(crate) fn manager() -> (StateManager, Arc<RecordingSink>, MemoryStore) {
        let store = MemoryStore::new();
        let sink = Arc::new(RecordingSink::default());
        let manager = StateManager::new(
            Uuid::new_v4(),
            Arc::new(StorageHandle::with_store(Arc::new(store.clone()))),
            sink.clone(),
        );
        (manager, sink, store)
    }

    pub(crate) fn tournament(name: &str) -> Tournament {
        Tournament {
            guid: Uuid::new_v4(),
            settings: Some(TournamentSettings {
                tournament_name: name.into(),
                ..TournamentSettings::default()
            }),
            users: Vec::new(),
            matches: Vec::new(),
            qualifiers: Vec::new(),
            server: None,
        }
    }

    fn qualifier(name: &str) -> QualifierEvent {
        QualifierEvent {
            guid: Uuid::new_v4(),
            name: name.into(),
            image: None,
            info_channel: None,
            flags: Default::default(),
            sort: Default::default(),
            maps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn remove_user_cascades_to_matches() {
        let (manager, sink, _) = manager();
        let t = manager.create_tournament(tournament("Cup")).await.unwrap();
        let player = User::new(Uuid::new_v4(), "player", ClientType::Player);
        let coordinator = User::new(Uuid::new_v4(), "coord", ClientType::WebsocketConnection);
        manager.add_user(t.guid, player.clone()).await.unwrap();
        manager.add_user(t.guid, coordinator.clone()).await.unwrap();
        manager
            .create_match(t.guid, Match {
                guid: Uuid::new_v4(),
                leader: coordinator.guid,
                associated_users: vec![coordinator.guid, player.guid],
                selected_map: None,
            })
            .await
            .unwrap();

        assert!(manager.remove_user(t.guid, player.guid).await.unwrap());
        let matches = manager.matches(t.guid).await;
        assert_eq!(matches[0].associated_users, vec![coordinator.guid]);

        let events = sink.events();
        assert!(matches!(events[events.len() - 2], Event::UserLeft { .. }));
        assert!(matches!(events[events.len() - 1], Event::MatchUpdated { .. }));
    }

    #[tokio::test]
    async fn removing_absent_user_is_silent() {
        let (manager, sink, _) = manager();
        let t = manager.create_tournament(tournament("Cup")).await.unwrap();
        let before = sink.sent.lock().unwrap().len();

        assert!(!manager.remove_user(t.guid, Uuid::new_v4()).await.unwrap());
        assert_eq!(sink.sent.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn update_after_remove_is_a_noop() {
        let (manager, _, _) = manager();
        let t = manager.create_tournament(tournament("Cup")).await.unwrap();
        let user = User::new(Uuid::new_v4(), "player", ClientType::Player);
        manager.add_user(t.guid, user.clone()).await.unwrap();
        manager.remove_user(t.guid, user.guid).await.unwrap();

        assert!(!manager.update_user(t.guid, user).await.unwrap());
        assert!(manager.users(t.guid).await.is_empty());
    }

    #[tokio::test]
    async fn user_events_only_reach_members() {
        let (manager, sink, _) = manager();
        let t = manager.create_tournament(tournament("Cup")).await.unwrap();
        let user = User::new(Uuid::new_v4(), "player", ClientType::Player);
        manager.add_user(t.guid, user.clone()).await.unwrap();

        let sent = sink.sent.lock().unwrap();
        let (recipients, _) = sent.last().unwrap();
        assert_eq!(recipients.as_deref(), Some(&[user.guid][..]));
    }

    #[tokio::test]
    async fn qualifier_is_not_applied_when_persistence_fails() {
        let (manager, sink, store) = manager();
        let t = manager.create_tournament(tournament("Cup")).await.unwrap();
        let before = sink.sent.lock().unwrap().len();

        store.set_offline(true);
        let result = manager.create_qualifier(t.guid, qualifier("Week 1")).await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
        assert!(manager.qualifiers(t.guid).await.is_empty());
        assert_eq!(sink.sent.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn qualifier_update_persists_before_memory() {
        let (manager, _, store) = manager();
        let t = manager.create_tournament(tournament("Cup")).await.unwrap();
        let q = manager.create_qualifier(t.guid, qualifier("Week 1")).await.unwrap();

        manager
            .update_qualifier(t.guid, q.guid, |event| {
                event.name = "Week 2".into();
                Ok(())
            })
            .await
            .unwrap();

        use crate::dao::tournament_store::TournamentStore;
        let saved = store.list_qualifiers().await.unwrap();
        assert_eq!(saved[0].event.name, "Week 2");
        assert_eq!(manager.qualifier(t.guid, q.guid).await.unwrap().name, "Week 2");
    }

    #[tokio::test]
    async fn saved_state_reloads() {
        let (manager, _, store) = manager();
        let t = manager.create_tournament(tournament("Cup")).await.unwrap();
        manager.create_qualifier(t.guid, qualifier("Week 1")).await.unwrap();
        manager
            .save_authorized_user(AuthorizedUser {
                tournament_id: t.guid,
                identity: "42".into(),
                role_ids: vec!["admin".into()],
                status: RowStatus::Active,
            })
            .await
            .unwrap();

        let fresh = StateManager::new(
            Uuid::new_v4(),
            Arc::new(StorageHandle::with_store(Arc::new(store))),
            Arc::new(RecordingSink::default()),
        );
        assert_eq!(fresh.load_saved().await.unwrap(), 1);
        assert_eq!(fresh.qualifiers(t.guid).await.len(), 1);
        assert_eq!(fresh.authorized_users(t.guid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permissions_union_over_identity_keys() {
        let (manager, _, _) = manager();
        let mut t = tournament("Cup");
        t.settings.as_mut().unwrap().roles = crate::state::permissions::default_roles_for(t.guid);
        let t = manager.create_tournament(t).await.unwrap();
        manager
            .save_authorized_user(AuthorizedUser {
                tournament_id: t.guid,
                identity: "discord-1".into(),
                role_ids: vec!["coordinator".into()],
                status: RowStatus::Active,
            })
            .await
            .unwrap();

        let granted = manager.permissions(t.guid, &["steam-1", "discord-1"]).await;
        assert!(granted.contains(&Permission::CreateMatch));
        assert!(manager.permissions(t.guid, &["steam-1"]).await.is_empty());

        assert!(manager.remove_authorized_user(t.guid, "discord-1").await.unwrap());
        assert!(manager.permissions(t.guid, &["discord-1"]).await.is_empty());
    }

    #[tokio::test]
    async fn server_directory_deduplicates() {
        let (manager, _, _) = manager();
        let server = CoreServer {
            name: "a".into(),
            address: "a.example".into(),
            port: 8675,
            websocket_port: 8676,
        };
        let mut renamed = server.clone();
        renamed.name = "b".into();

        assert!(manager.add_server(server.clone()).await);
        assert!(!manager.add_server(renamed.clone()).await);
        let list = manager.replace_servers(vec![server.clone(), renamed]).await;
        assert_eq!(list.len(), 1);
        assert!(manager.replace_servers(Vec::new()).await.is_empty());
        assert!(manager.servers().await.is_empty());
    }

    #[tokio::test]
    async fn observers_see_published_events() {
        let (manager, _, _) = manager();
        let mut stream = manager.subscribe();
        manager.create_tournament(tournament("Cup")).await.unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert!(matches!(event, Event::TournamentCreated { .. }));
    }

    #[tokio::test]
    async fn user_roster_matches_a_replay_of_random_operations() {
        use std::collections::HashMap;

        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(0x7a11);
        for _ in 0..20 {
            let (manager, _, _) = manager();
            let cup = tournament("Cup");
            let tournament_id = cup.guid;
            manager.create_tournament(cup).await.unwrap();

            let guids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
            let mut expected: HashMap<Uuid, String> = HashMap::new();

            for step in 0..40 {
                let guid = guids[rng.random_range(0..guids.len())];
                let name = format!("user-{step}");
                match rng.random_range(0..3) {
                    0 => {
                        let user = User::new(guid, &name, ClientType::Player);
                        manager.add_user(tournament_id, user).await.unwrap();
                        expected.insert(guid, name);
                    }
                    1 => {
                        let user = User::new(guid, &name, ClientType::Player);
                        let applied = manager.update_user(tournament_id, user).await.unwrap();
                        assert_eq!(applied, expected.contains_key(&guid));
                        if applied {
                            expected.insert(guid, name);
                        }
                    }
                    _ => {
                        let removed = manager.remove_user(tournament_id, guid).await.unwrap();
                        assert_eq!(removed, expected.remove(&guid).is_some());
                    }
                }
            }

            let actual: HashMap<Uuid, String> = manager
                .users(tournament_id)
                .await
                .into_iter()
                .map(|user| (user.guid, user.name))
                .collect();
            assert_eq!(actual.len(), manager.users(tournament_id).await.len());
            assert_eq!(actual, expected);
        }
    }
}
