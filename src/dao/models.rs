use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::{
    models::{CoreServer, QualifierEvent, QualifierScore, RowStatus, ScoreStatus, Team, Tournament, TournamentSettings},
    permissions::Role,
};

/// Tournament row as persisted. Unlike the wire model it keeps the password digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TournamentEntity {
    /// Stable identifier for the tournament.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Banner file key.
    pub image: Option<String>,
    /// Hex SHA-256 digest of the join password, empty when open.
    pub password_hash: String,
    /// Whether players are grouped in teams.
    pub enable_teams: bool,
    /// Let identities without roles see the tournament.
    pub allow_unauthorized_view: bool,
    /// Declared teams.
    pub teams: Vec<Team>,
    /// Roles defined for the tournament.
    pub roles: Vec<Role>,
    /// Host owning the tournament.
    pub server: Option<CoreServer>,
    /// Last time this row was written.
    pub updated_at: SystemTime,
}

impl TournamentEntity {
    /// Capture the persistent part of a live tournament.
    pub fn from_tournament(tournament: &Tournament) -> Self {
        let settings = tournament.settings.clone().unwrap_or_default();
        Self {
            id: tournament.guid,
            name: settings.tournament_name,
            image: settings.tournament_image,
            password_hash: settings.password_hash,
            enable_teams: settings.enable_teams,
            allow_unauthorized_view: settings.allow_unauthorized_view,
            teams: settings.teams,
            roles: settings.roles,
            server: tournament.server.clone(),
            updated_at: SystemTime::now(),
        }
    }

    /// Rebuild an empty live tournament. Users and matches are never persisted.
    pub fn into_tournament(self) -> Tournament {
        Tournament {
            guid: self.id,
            settings: Some(TournamentSettings {
                tournament_name: self.name,
                tournament_image: self.image,
                password_hash: self.password_hash,
                enable_teams: self.enable_teams,
                allow_unauthorized_view: self.allow_unauthorized_view,
                teams: self.teams,
                roles: self.roles,
                my_permissions: Vec::new(),
            }),
            users: Vec::new(),
            matches: Vec::new(),
            qualifiers: Vec::new(),
            server: self.server,
        }
    }
}

/// Qualifier event row, maps included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualifierEntity {
    /// Owning tournament.
    pub tournament_id: Uuid,
    /// Event definition.
    pub event: QualifierEvent,
    /// Deleted events stay behind as `Removed`.
    pub status: RowStatus,
    /// Last time this row was written.
    pub updated_at: SystemTime,
}

impl QualifierEntity {
    /// Active row for `event`.
    pub fn active(tournament_id: Uuid, event: QualifierEvent) -> Self {
        Self {
            tournament_id,
            event,
            status: RowStatus::Active,
            updated_at: SystemTime::now(),
        }
    }
}

/// One recorded qualifier attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreEntity {
    /// Row identity. Reused when a placeholder is replaced in place.
    pub id: Uuid,
    /// Submission order within the map, used for tie-breaks and refunds.
    pub seq: u64,
    /// Current or superseded.
    pub status: ScoreStatus,
    /// Submitted performance.
    pub score: QualifierScore,
    /// When the row was recorded.
    pub submitted_at: SystemTime,
}

impl ScoreEntity {
    /// Fresh current row.
    pub fn new(seq: u64, score: QualifierScore) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            status: ScoreStatus::Current,
            score,
            submitted_at: SystemTime::now(),
        }
    }

    /// Whether the row ranks on the leaderboard.
    pub fn is_current(&self) -> bool {
        self.status == ScoreStatus::Current
    }
}
