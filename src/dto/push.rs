use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::models::{Beatmap, LeaderboardEntry, Map, QualifierEvent, QualifierScore, User};

/// Push sub-union: fire-and-forget data without a reply channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Push {
    /// A player finished a song inside a match.
    SongFinished {
        tournament_id: Uuid,
        player: User,
        beatmap: Beatmap,
        score: i64,
        accuracy: f64,
    },
    /// Dashboard notification of a new qualifier score with the refreshed slice.
    QualifierScoreSubmitted {
        tournament_id: Uuid,
        event: QualifierEvent,
        map: Map,
        score: QualifierScore,
        leaderboard: Vec<LeaderboardEntry>,
    },
}

/// Discriminator of [`Push`] used as handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    SongFinished,
    QualifierScoreSubmitted,
}

impl Push {
    /// Registry discriminator of this push.
    pub fn kind(&self) -> PushKind {
        match self {
            Push::SongFinished { .. } => PushKind::SongFinished,
            Push::QualifierScoreSubmitted { .. } => PushKind::QualifierScoreSubmitted,
        }
    }

    /// Tournament this push is scoped to.
    pub fn tournament_id(&self) -> Uuid {
        match self {
            Push::SongFinished { tournament_id, .. }
            | Push::QualifierScoreSubmitted { tournament_id, .. } => *tournament_id,
        }
    }
}
