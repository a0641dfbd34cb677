use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB database `{database}` did not answer the initial ping")]
    InitialPing {
        database: String,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save tournament `{id}`")]
    SaveTournament {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete tournament `{id}`")]
    DeleteTournament {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list tournaments")]
    ListTournaments {
        #[source]
        source: MongoError,
    },
    #[error("failed to save qualifier `{id}`")]
    SaveQualifier {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list qualifiers")]
    ListQualifiers {
        #[source]
        source: MongoError,
    },
    #[error("failed to list scores of map `{map_id}`")]
    ListScores {
        map_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write score `{id}`")]
    WriteScore {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("score `{id}` is not stored")]
    MissingScore { id: Uuid },
    #[error("failed to delete {count} score(s)")]
    DeleteScores {
        count: usize,
        #[source]
        source: MongoError,
    },
    #[error("failed to save authorized user `{identity}` of tournament `{tournament_id}`")]
    SaveAuthorizedUser {
        tournament_id: Uuid,
        identity: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list authorized users of tournament `{tournament_id}`")]
    ListAuthorizedUsers {
        tournament_id: Uuid,
        #[source]
        source: MongoError,
    },
}
