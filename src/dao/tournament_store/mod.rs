pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        models::{QualifierEntity, ScoreEntity, TournamentEntity},
        storage::StorageResult,
    },
    state::permissions::AuthorizedUser,
};

/// Abstraction over the durable layer holding tournaments, qualifiers, scores and rosters.
///
/// Rows are soft-deleted where the model has a status tag; [`delete_scores`](Self::delete_scores)
/// is the only physical deletion and only refunds use it.
pub trait TournamentStore: Send + Sync {
    fn save_tournament(&self, tournament: TournamentEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_tournaments(&self) -> BoxFuture<'static, StorageResult<Vec<TournamentEntity>>>;
    fn delete_tournament(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    /// Upsert a qualifier by event guid.
    fn save_qualifier(&self, qualifier: QualifierEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Active qualifiers only.
    fn list_qualifiers(&self) -> BoxFuture<'static, StorageResult<Vec<QualifierEntity>>>;
    /// Flag the qualifier as removed. Returns false when it was not active.
    fn remove_qualifier(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    /// Every row recorded for a map, current and superseded, in submission order.
    fn list_scores(&self, map_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ScoreEntity>>>;
    fn insert_score(&self, score: ScoreEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Overwrite existing rows matched by id.
    fn update_scores(&self, scores: Vec<ScoreEntity>) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_scores(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<u64>>;

    /// Upsert a roster row keyed by (tournament, identity).
    fn save_authorized_user(&self, user: AuthorizedUser) -> BoxFuture<'static, StorageResult<()>>;
    /// Roster rows of a tournament, removed ones included.
    fn list_authorized_users(
        &self,
        tournament_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AuthorizedUser>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
