use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::models::{QualifierEntity, ScoreEntity, TournamentEntity},
    state::{
        models::{CoreServer, QualifierEvent, QualifierScore, RowStatus, ScoreStatus, Team},
        permissions::{AuthorizedUser, Role},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTournamentDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    name: String,
    image: Option<String>,
    password_hash: String,
    enable_teams: bool,
    allow_unauthorized_view: bool,
    teams: Vec<Team>,
    roles: Vec<Role>,
    server: Option<CoreServer>,
    updated_at: DateTime,
}

impl From<TournamentEntity> for MongoTournamentDocument {
    fn from(value: TournamentEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            image: value.image,
            password_hash: value.password_hash,
            enable_teams: value.enable_teams,
            allow_unauthorized_view: value.allow_unauthorized_view,
            teams: value.teams,
            roles: value.roles,
            server: value.server,
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoTournamentDocument> for TournamentEntity {
    fn from(value: MongoTournamentDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
            image: value.image,
            password_hash: value.password_hash,
            enable_teams: value.enable_teams,
            allow_unauthorized_view: value.allow_unauthorized_view,
            teams: value.teams,
            roles: value.roles,
            server: value.server,
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQualifierDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    tournament_id: Uuid,
    event: QualifierEvent,
    status: RowStatus,
    updated_at: DateTime,
}

impl From<QualifierEntity> for MongoQualifierDocument {
    fn from(value: QualifierEntity) -> Self {
        Self {
            id: value.event.guid,
            tournament_id: value.tournament_id,
            event: value.event,
            status: value.status,
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoQualifierDocument> for QualifierEntity {
    fn from(value: MongoQualifierDocument) -> Self {
        Self {
            tournament_id: value.tournament_id,
            event: value.event,
            status: value.status,
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

/// Score row. `map_id` is lifted out of the payload so it can be indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    map_id: Uuid,
    seq: i64,
    status: ScoreStatus,
    score: QualifierScore,
    submitted_at: DateTime,
}

impl From<ScoreEntity> for MongoScoreDocument {
    fn from(value: ScoreEntity) -> Self {
        Self {
            id: value.id,
            map_id: value.score.map_id,
            seq: i64::try_from(value.seq).unwrap_or(i64::MAX),
            status: value.status,
            score: value.score,
            submitted_at: DateTime::from_system_time(value.submitted_at),
        }
    }
}

impl From<MongoScoreDocument> for ScoreEntity {
    fn from(value: MongoScoreDocument) -> Self {
        Self {
            id: value.id,
            seq: u64::try_from(value.seq).unwrap_or_default(),
            status: value.status,
            score: value.score,
            submitted_at: value.submitted_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAuthorizedUserDocument {
    tournament_id: Uuid,
    identity: String,
    role_ids: Vec<String>,
    status: RowStatus,
}

impl From<AuthorizedUser> for MongoAuthorizedUserDocument {
    fn from(value: AuthorizedUser) -> Self {
        Self {
            tournament_id: value.tournament_id,
            identity: value.identity,
            role_ids: value.role_ids,
            status: value.status,
        }
    }
}

impl From<MongoAuthorizedUserDocument> for AuthorizedUser {
    fn from(value: MongoAuthorizedUserDocument) -> Self {
        Self {
            tournament_id: value.tournament_id,
            identity: value.identity,
            role_ids: value.role_ids,
            status: value.status,
        }
    }
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}

pub fn roster_key(tournament_id: Uuid, identity: &str) -> Document {
    doc! {"tournament_id": uuid_as_binary(tournament_id), "identity": identity}
}
