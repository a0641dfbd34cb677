use std::{
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    dao::{
        models::{QualifierEntity, ScoreEntity, TournamentEntity},
        storage::{StorageError, StorageResult},
        tournament_store::TournamentStore,
    },
    state::{models::RowStatus, permissions::AuthorizedUser},
};

/// Process-local store used when no database is configured, and by tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

#[derive(Default)]
struct Tables {
    tournaments: HashMap<Uuid, TournamentEntity>,
    qualifiers: HashMap<Uuid, QualifierEntity>,
    scores: Vec<ScoreEntity>,
    roster: Vec<AuthorizedUser>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backend went away.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store is offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "offline"),
            ));
        }
        Ok(())
    }

    fn run<T, F>(&self, op: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> T + Send + 'static,
    {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            let mut tables = store.inner.tables.lock().await;
            Ok(op(&mut tables))
        })
    }
}

impl TournamentStore for MemoryStore {
    fn save_tournament(&self, tournament: TournamentEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |tables| {
            tables.tournaments.insert(tournament.id, tournament);
        })
    }

    fn list_tournaments(&self) -> BoxFuture<'static, StorageResult<Vec<TournamentEntity>>> {
        self.run(|tables| tables.tournaments.values().cloned().collect())
    }

    fn delete_tournament(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |tables| tables.tournaments.remove(&id).is_some())
    }

    fn save_qualifier(&self, qualifier: QualifierEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |tables| {
            tables.qualifiers.insert(qualifier.event.guid, qualifier);
        })
    }

    fn list_qualifiers(&self) -> BoxFuture<'static, StorageResult<Vec<QualifierEntity>>> {
        self.run(|tables| {
            tables
                .qualifiers
                .values()
                .filter(|q| q.status == RowStatus::Active)
                .cloned()
                .collect()
        })
    }

    fn remove_qualifier(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |tables| match tables.qualifiers.get_mut(&id) {
            Some(row) if row.status == RowStatus::Active => {
                row.status = RowStatus::Removed;
                true
            }
            _ => false,
        })
    }

    fn list_scores(&self, map_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ScoreEntity>>> {
        self.run(move |tables| {
            let mut rows: Vec<ScoreEntity> = tables
                .scores
                .iter()
                .filter(|row| row.score.map_id == map_id)
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.seq);
            rows
        })
    }

    fn insert_score(&self, score: ScoreEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |tables| tables.scores.push(score))
    }

    fn update_scores(&self, scores: Vec<ScoreEntity>) -> BoxFuture<'static, StorageResult<()>> {
        let pending = self.run(move |tables| {
            for updated in scores {
                let Some(row) = tables.scores.iter_mut().find(|row| row.id == updated.id) else {
                    return Err(StorageError::missing("score", updated.id));
                };
                *row = updated;
            }
            Ok(())
        });
        Box::pin(async move { pending.await? })
    }

    fn delete_scores(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<u64>> {
        self.run(move |tables| {
            let before = tables.scores.len();
            tables.scores.retain(|row| !ids.contains(&row.id));
            (before - tables.scores.len()) as u64
        })
    }

    fn save_authorized_user(&self, user: AuthorizedUser) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |tables| {
            match tables
                .roster
                .iter_mut()
                .find(|row| row.tournament_id == user.tournament_id && row.identity == user.identity)
            {
                Some(row) => *row = user,
                None => tables.roster.push(user),
            }
        })
    }

    fn list_authorized_users(
        &self,
        tournament_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AuthorizedUser>>> {
        self.run(move |tables| {
            tables
                .roster
                .iter()
                .filter(|row| row.tournament_id == tournament_id)
                .cloned()
                .collect()
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::{QualifierEvent, QualifierScore, ScoreStatus};

    fn score(map_id: Uuid, platform_id: &str, value: i64) -> QualifierScore {
        QualifierScore {
            map_id,
            platform_id: platform_id.into(),
            modified_score: value,
            ..QualifierScore::default()
        }
    }

    #[tokio::test]
    async fn scores_come_back_in_submission_order() {
        let store = MemoryStore::new();
        let map_id = Uuid::new_v4();
        store.insert_score(ScoreEntity::new(2, score(map_id, "p", 20))).await.unwrap();
        store.insert_score(ScoreEntity::new(1, score(map_id, "p", 10))).await.unwrap();
        store.insert_score(ScoreEntity::new(1, score(Uuid::new_v4(), "p", 99))).await.unwrap();

        let rows = store.list_scores(map_id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].score.modified_score, 10);
        assert_eq!(rows[1].score.modified_score, 20);
    }

    #[tokio::test]
    async fn update_and_delete_scores_by_id() {
        let store = MemoryStore::new();
        let map_id = Uuid::new_v4();
        let mut row = ScoreEntity::new(1, score(map_id, "p", 10));
        store.insert_score(row.clone()).await.unwrap();

        row.status = ScoreStatus::Superseded;
        store.update_scores(vec![row.clone()]).await.unwrap();
        assert_eq!(
            store.list_scores(map_id).await.unwrap()[0].status,
            ScoreStatus::Superseded
        );

        assert_eq!(store.delete_scores(vec![row.id]).await.unwrap(), 1);
        assert!(store.list_scores(map_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_qualifiers_are_hidden() {
        let store = MemoryStore::new();
        let event = QualifierEvent {
            guid: Uuid::new_v4(),
            name: "Week 1".into(),
            image: None,
            info_channel: None,
            flags: Default::default(),
            sort: Default::default(),
            maps: Vec::new(),
        };
        store
            .save_qualifier(QualifierEntity::active(Uuid::new_v4(), event.clone()))
            .await
            .unwrap();
        assert_eq!(store.list_qualifiers().await.unwrap().len(), 1);

        assert!(store.remove_qualifier(event.guid).await.unwrap());
        assert!(!store.remove_qualifier(event.guid).await.unwrap());
        assert!(store.list_qualifiers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(store.health_check().await.is_err());
        assert!(store.list_tournaments().await.is_err());
        store.set_offline(false);
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn updating_an_unknown_score_is_reported() {
        let store = MemoryStore::new();
        let stray = ScoreEntity::new(0, score(Uuid::new_v4(), "p", 1));
        let err = store.update_scores(vec![stray.clone()]).await.unwrap_err();
        assert!(matches!(err, StorageError::Missing { kind: "score", id } if id == stray.id));
    }
}
