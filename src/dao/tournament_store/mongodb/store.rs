use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::open_database,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoAuthorizedUserDocument, MongoQualifierDocument, MongoScoreDocument,
        MongoTournamentDocument, doc_id, roster_key, uuid_as_binary,
    },
};
use crate::{
    dao::{
        models::{QualifierEntity, ScoreEntity, TournamentEntity},
        storage::StorageResult,
        tournament_store::TournamentStore,
    },
    state::permissions::AuthorizedUser,
};

const TOURNAMENT_COLLECTION: &str = "tournaments";
const QUALIFIER_COLLECTION: &str = "qualifiers";
const SCORE_COLLECTION: &str = "scores";
const ROSTER_COLLECTION: &str = "authorized_users";

#[derive(Clone)]
pub struct MongoTournamentStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = open_database(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoTournamentStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = open_database(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let scores = database.collection::<Document>(SCORE_COLLECTION);
        let score_index = IndexModel::builder()
            .keys(doc! {"map_id": 1, "seq": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("score_map_seq_idx".to_owned()))
                    .build(),
            )
            .build();
        scores
            .create_index(score_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SCORE_COLLECTION,
                index: "map_id,seq",
                source,
            })?;

        let roster = database.collection::<Document>(ROSTER_COLLECTION);
        let roster_index = IndexModel::builder()
            .keys(doc! {"tournament_id": 1, "identity": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("roster_identity_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        roster
            .create_index(roster_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROSTER_COLLECTION,
                index: "tournament_id,identity",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<T>(name)
    }

    async fn save_tournament(&self, tournament: TournamentEntity) -> MongoResult<()> {
        let id = tournament.id;
        let document: MongoTournamentDocument = tournament.into();
        self.collection::<MongoTournamentDocument>(TOURNAMENT_COLLECTION)
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveTournament { id, source })?;
        Ok(())
    }

    async fn list_tournaments(&self) -> MongoResult<Vec<TournamentEntity>> {
        let documents: Vec<MongoTournamentDocument> = self
            .collection(TOURNAMENT_COLLECTION)
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListTournaments { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListTournaments { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn delete_tournament(&self, id: Uuid) -> MongoResult<bool> {
        let result = self
            .collection::<MongoTournamentDocument>(TOURNAMENT_COLLECTION)
            .await
            .delete_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::DeleteTournament { id, source })?;
        Ok(result.deleted_count > 0)
    }

    async fn save_qualifier(&self, qualifier: QualifierEntity) -> MongoResult<()> {
        let id = qualifier.event.guid;
        let document: MongoQualifierDocument = qualifier.into();
        self.collection::<MongoQualifierDocument>(QUALIFIER_COLLECTION)
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveQualifier { id, source })?;
        Ok(())
    }

    async fn list_qualifiers(&self) -> MongoResult<Vec<QualifierEntity>> {
        let documents: Vec<MongoQualifierDocument> = self
            .collection(QUALIFIER_COLLECTION)
            .await
            .find(doc! {"status": "active"})
            .await
            .map_err(|source| MongoDaoError::ListQualifiers { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListQualifiers { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn remove_qualifier(&self, id: Uuid) -> MongoResult<bool> {
        let mut filter = doc_id(id);
        filter.insert("status", "active");
        let result = self
            .collection::<MongoQualifierDocument>(QUALIFIER_COLLECTION)
            .await
            .update_one(filter, doc! {"$set": {"status": "removed"}})
            .await
            .map_err(|source| MongoDaoError::SaveQualifier { id, source })?;
        Ok(result.modified_count > 0)
    }

    async fn list_scores(&self, map_id: Uuid) -> MongoResult<Vec<ScoreEntity>> {
        let documents: Vec<MongoScoreDocument> = self
            .collection(SCORE_COLLECTION)
            .await
            .find(doc! {"map_id": uuid_as_binary(map_id)})
            .sort(doc! {"seq": 1})
            .await
            .map_err(|source| MongoDaoError::ListScores { map_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListScores { map_id, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn insert_score(&self, score: ScoreEntity) -> MongoResult<()> {
        let id = score.id;
        let document: MongoScoreDocument = score.into();
        self.collection::<MongoScoreDocument>(SCORE_COLLECTION)
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::WriteScore { id, source })?;
        Ok(())
    }

    async fn update_scores(&self, scores: Vec<ScoreEntity>) -> MongoResult<()> {
        let collection = self
            .collection::<MongoScoreDocument>(SCORE_COLLECTION)
            .await;
        for score in scores {
            let id = score.id;
            let document: MongoScoreDocument = score.into();
            let result = collection
                .replace_one(doc_id(id), &document)
                .await
                .map_err(|source| MongoDaoError::WriteScore { id, source })?;
            if result.matched_count == 0 {
                return Err(MongoDaoError::MissingScore { id });
            }
        }
        Ok(())
    }

    async fn delete_scores(&self, ids: Vec<Uuid>) -> MongoResult<u64> {
        let count = ids.len();
        let ids: Vec<_> = ids.into_iter().map(uuid_as_binary).collect();
        let result = self
            .collection::<MongoScoreDocument>(SCORE_COLLECTION)
            .await
            .delete_many(doc! {"_id": {"$in": ids}})
            .await
            .map_err(|source| MongoDaoError::DeleteScores { count, source })?;
        Ok(result.deleted_count)
    }

    async fn save_authorized_user(&self, user: AuthorizedUser) -> MongoResult<()> {
        let tournament_id = user.tournament_id;
        let identity = user.identity.clone();
        let document: MongoAuthorizedUserDocument = user.into();
        self.collection::<MongoAuthorizedUserDocument>(ROSTER_COLLECTION)
            .await
            .replace_one(roster_key(tournament_id, &identity), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveAuthorizedUser {
                tournament_id,
                identity,
                source,
            })?;
        Ok(())
    }

    async fn list_authorized_users(&self, tournament_id: Uuid) -> MongoResult<Vec<AuthorizedUser>> {
        let documents: Vec<MongoAuthorizedUserDocument> = self
            .collection(ROSTER_COLLECTION)
            .await
            .find(doc! {"tournament_id": uuid_as_binary(tournament_id)})
            .await
            .map_err(|source| MongoDaoError::ListAuthorizedUsers {
                tournament_id,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListAuthorizedUsers {
                tournament_id,
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }
}

impl TournamentStore for MongoTournamentStore {
    fn save_tournament(&self, tournament: TournamentEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_tournament(tournament).await.map_err(Into::into) })
    }

    fn list_tournaments(&self) -> BoxFuture<'static, StorageResult<Vec<TournamentEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_tournaments().await.map_err(Into::into) })
    }

    fn delete_tournament(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_tournament(id).await.map_err(Into::into) })
    }

    fn save_qualifier(&self, qualifier: QualifierEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_qualifier(qualifier).await.map_err(Into::into) })
    }

    fn list_qualifiers(&self) -> BoxFuture<'static, StorageResult<Vec<QualifierEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_qualifiers().await.map_err(Into::into) })
    }

    fn remove_qualifier(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.remove_qualifier(id).await.map_err(Into::into) })
    }

    fn list_scores(&self, map_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ScoreEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_scores(map_id).await.map_err(Into::into) })
    }

    fn insert_score(&self, score: ScoreEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_score(score).await.map_err(Into::into) })
    }

    fn update_scores(&self, scores: Vec<ScoreEntity>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_scores(scores).await.map_err(Into::into) })
    }

    fn delete_scores(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.delete_scores(ids).await.map_err(Into::into) })
    }

    fn save_authorized_user(&self, user: AuthorizedUser) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_authorized_user(user).await.map_err(Into::into) })
    }

    fn list_authorized_users(
        &self,
        tournament_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AuthorizedUser>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_authorized_users(tournament_id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
