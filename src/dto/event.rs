use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    models::{
        Channel, CoreServer, LeaderboardSort, Map, Match, QualifierEvent, QualifierFlags, Team, Tournament, User,
    },
    permissions::Role,
};

/// Event sub-union.
///
/// Past-tense variants are notifications emitted by the server after a state
/// change. Imperative variants are mutation requests sent by dashboards; the
/// server answers those with a Response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    UserAdded { tournament_id: Uuid, user: User },
    UserUpdated { tournament_id: Uuid, user: User },
    UserLeft { tournament_id: Uuid, user: User },
    MatchCreated { tournament_id: Uuid, #[serde(rename = "match")] game_match: Match },
    MatchUpdated { tournament_id: Uuid, #[serde(rename = "match")] game_match: Match },
    MatchDeleted { tournament_id: Uuid, #[serde(rename = "match")] game_match: Match },
    QualifierCreated { tournament_id: Uuid, qualifier: QualifierEvent },
    QualifierUpdated { tournament_id: Uuid, qualifier: QualifierEvent },
    QualifierDeleted { tournament_id: Uuid, qualifier: QualifierEvent },
    TournamentCreated { tournament: Tournament },
    TournamentUpdated { tournament: Tournament },
    TournamentDeleted { tournament: Tournament },
    ServerAdded { server: CoreServer },
    ServerDeleted { server: CoreServer },

    UpdateUser { tournament_id: Uuid, user: User },
    CreateMatch { tournament_id: Uuid, #[serde(rename = "match")] game_match: Match },
    AddUserToMatch { tournament_id: Uuid, match_id: Uuid, user_id: Uuid },
    RemoveUserFromMatch { tournament_id: Uuid, match_id: Uuid, user_id: Uuid },
    SetMatchLeader { tournament_id: Uuid, match_id: Uuid, user_id: Uuid },
    SetMatchMap { tournament_id: Uuid, match_id: Uuid, map: Map },
    DeleteMatch { tournament_id: Uuid, match_id: Uuid },
    CreateQualifierEvent { tournament_id: Uuid, qualifier: QualifierEvent },
    SetQualifierName { tournament_id: Uuid, qualifier_id: Uuid, name: String },
    SetQualifierImage { tournament_id: Uuid, qualifier_id: Uuid, image: String },
    SetQualifierInfoChannel { tournament_id: Uuid, qualifier_id: Uuid, info_channel: Channel },
    SetQualifierFlags { tournament_id: Uuid, qualifier_id: Uuid, flags: QualifierFlags },
    SetQualifierLeaderboardSort { tournament_id: Uuid, qualifier_id: Uuid, sort: LeaderboardSort },
    AddQualifierMaps { tournament_id: Uuid, qualifier_id: Uuid, maps: Vec<Map> },
    UpdateQualifierMap { tournament_id: Uuid, qualifier_id: Uuid, map: Map },
    RemoveQualifierMap { tournament_id: Uuid, qualifier_id: Uuid, map_id: Uuid },
    DeleteQualifierEvent { tournament_id: Uuid, qualifier_id: Uuid },
    CreateTournament { tournament: Tournament },
    SetTournamentName { tournament_id: Uuid, name: String },
    SetTournamentImage { tournament_id: Uuid, image: String },
    SetTournamentPassword { tournament_id: Uuid, password: String },
    SetTournamentEnableTeams { tournament_id: Uuid, enable_teams: bool },
    SetTournamentAllowUnauthorizedView { tournament_id: Uuid, allow_unauthorized_view: bool },
    AddTournamentTeam { tournament_id: Uuid, team: Team },
    SetTournamentTeamName { tournament_id: Uuid, team_id: Uuid, name: String },
    SetTournamentTeamImage { tournament_id: Uuid, team_id: Uuid, image: String },
    RemoveTournamentTeam { tournament_id: Uuid, team_id: Uuid },
    AddTournamentRole { tournament_id: Uuid, role: Role },
    RemoveTournamentRole { tournament_id: Uuid, role_id: String },
    DeleteTournament { tournament_id: Uuid },
}

/// Discriminator of [`Event`] used as handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UserAdded,
    UserUpdated,
    UserLeft,
    MatchCreated,
    MatchUpdated,
    MatchDeleted,
    QualifierCreated,
    QualifierUpdated,
    QualifierDeleted,
    TournamentCreated,
    TournamentUpdated,
    TournamentDeleted,
    ServerAdded,
    ServerDeleted,
    UpdateUser,
    CreateMatch,
    AddUserToMatch,
    RemoveUserFromMatch,
    SetMatchLeader,
    SetMatchMap,
    DeleteMatch,
    CreateQualifierEvent,
    SetQualifierName,
    SetQualifierImage,
    SetQualifierInfoChannel,
    SetQualifierFlags,
    SetQualifierLeaderboardSort,
    AddQualifierMaps,
    UpdateQualifierMap,
    RemoveQualifierMap,
    DeleteQualifierEvent,
    CreateTournament,
    SetTournamentName,
    SetTournamentImage,
    SetTournamentPassword,
    SetTournamentEnableTeams,
    SetTournamentAllowUnauthorizedView,
    AddTournamentTeam,
    SetTournamentTeamName,
    SetTournamentTeamImage,
    RemoveTournamentTeam,
    AddTournamentRole,
    RemoveTournamentRole,
    DeleteTournament,
}

impl Event {
    /// Registry discriminator of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::UserAdded { .. } => EventKind::UserAdded,
            Event::UserUpdated { .. } => EventKind::UserUpdated,
            Event::UserLeft { .. } => EventKind::UserLeft,
            Event::MatchCreated { .. } => EventKind::MatchCreated,
            Event::MatchUpdated { .. } => EventKind::MatchUpdated,
            Event::MatchDeleted { .. } => EventKind::MatchDeleted,
            Event::QualifierCreated { .. } => EventKind::QualifierCreated,
            Event::QualifierUpdated { .. } => EventKind::QualifierUpdated,
            Event::QualifierDeleted { .. } => EventKind::QualifierDeleted,
            Event::TournamentCreated { .. } => EventKind::TournamentCreated,
            Event::TournamentUpdated { .. } => EventKind::TournamentUpdated,
            Event::TournamentDeleted { .. } => EventKind::TournamentDeleted,
            Event::ServerAdded { .. } => EventKind::ServerAdded,
            Event::ServerDeleted { .. } => EventKind::ServerDeleted,
            Event::UpdateUser { .. } => EventKind::UpdateUser,
            Event::CreateMatch { .. } => EventKind::CreateMatch,
            Event::AddUserToMatch { .. } => EventKind::AddUserToMatch,
            Event::RemoveUserFromMatch { .. } => EventKind::RemoveUserFromMatch,
            Event::SetMatchLeader { .. } => EventKind::SetMatchLeader,
            Event::SetMatchMap { .. } => EventKind::SetMatchMap,
            Event::DeleteMatch { .. } => EventKind::DeleteMatch,
            Event::CreateQualifierEvent { .. } => EventKind::CreateQualifierEvent,
            Event::SetQualifierName { .. } => EventKind::SetQualifierName,
            Event::SetQualifierImage { .. } => EventKind::SetQualifierImage,
            Event::SetQualifierInfoChannel { .. } => EventKind::SetQualifierInfoChannel,
            Event::SetQualifierFlags { .. } => EventKind::SetQualifierFlags,
            Event::SetQualifierLeaderboardSort { .. } => EventKind::SetQualifierLeaderboardSort,
            Event::AddQualifierMaps { .. } => EventKind::AddQualifierMaps,
            Event::UpdateQualifierMap { .. } => EventKind::UpdateQualifierMap,
            Event::RemoveQualifierMap { .. } => EventKind::RemoveQualifierMap,
            Event::DeleteQualifierEvent { .. } => EventKind::DeleteQualifierEvent,
            Event::CreateTournament { .. } => EventKind::CreateTournament,
            Event::SetTournamentName { .. } => EventKind::SetTournamentName,
            Event::SetTournamentImage { .. } => EventKind::SetTournamentImage,
            Event::SetTournamentPassword { .. } => EventKind::SetTournamentPassword,
            Event::SetTournamentEnableTeams { .. } => EventKind::SetTournamentEnableTeams,
            Event::SetTournamentAllowUnauthorizedView { .. } => EventKind::SetTournamentAllowUnauthorizedView,
            Event::AddTournamentTeam { .. } => EventKind::AddTournamentTeam,
            Event::SetTournamentTeamName { .. } => EventKind::SetTournamentTeamName,
            Event::SetTournamentTeamImage { .. } => EventKind::SetTournamentTeamImage,
            Event::RemoveTournamentTeam { .. } => EventKind::RemoveTournamentTeam,
            Event::AddTournamentRole { .. } => EventKind::AddTournamentRole,
            Event::RemoveTournamentRole { .. } => EventKind::RemoveTournamentRole,
            Event::DeleteTournament { .. } => EventKind::DeleteTournament,
        }
    }

    /// Tournament this event is scoped to, if any.
    pub fn tournament_id(&self) -> Option<Uuid> {
        match self {
            Event::UserAdded { tournament_id, .. }
            | Event::UserUpdated { tournament_id, .. }
            | Event::UserLeft { tournament_id, .. }
            | Event::MatchCreated { tournament_id, .. }
            | Event::MatchUpdated { tournament_id, .. }
            | Event::MatchDeleted { tournament_id, .. }
            | Event::QualifierCreated { tournament_id, .. }
            | Event::QualifierUpdated { tournament_id, .. }
            | Event::QualifierDeleted { tournament_id, .. }
            | Event::UpdateUser { tournament_id, .. }
            | Event::CreateMatch { tournament_id, .. }
            | Event::AddUserToMatch { tournament_id, .. }
            | Event::RemoveUserFromMatch { tournament_id, .. }
            | Event::SetMatchLeader { tournament_id, .. }
            | Event::SetMatchMap { tournament_id, .. }
            | Event::DeleteMatch { tournament_id, .. }
            | Event::CreateQualifierEvent { tournament_id, .. }
            | Event::SetQualifierName { tournament_id, .. }
            | Event::SetQualifierImage { tournament_id, .. }
            | Event::SetQualifierInfoChannel { tournament_id, .. }
            | Event::SetQualifierFlags { tournament_id, .. }
            | Event::SetQualifierLeaderboardSort { tournament_id, .. }
            | Event::AddQualifierMaps { tournament_id, .. }
            | Event::UpdateQualifierMap { tournament_id, .. }
            | Event::RemoveQualifierMap { tournament_id, .. }
            | Event::DeleteQualifierEvent { tournament_id, .. }
            | Event::SetTournamentName { tournament_id, .. }
            | Event::SetTournamentImage { tournament_id, .. }
            | Event::SetTournamentPassword { tournament_id, .. }
            | Event::SetTournamentEnableTeams { tournament_id, .. }
            | Event::SetTournamentAllowUnauthorizedView { tournament_id, .. }
            | Event::AddTournamentTeam { tournament_id, .. }
            | Event::SetTournamentTeamName { tournament_id, .. }
            | Event::SetTournamentTeamImage { tournament_id, .. }
            | Event::RemoveTournamentTeam { tournament_id, .. }
            | Event::AddTournamentRole { tournament_id, .. }
            | Event::RemoveTournamentRole { tournament_id, .. }
            | Event::DeleteTournament { tournament_id } => Some(*tournament_id),
            Event::TournamentCreated { tournament }
            | Event::TournamentUpdated { tournament }
            | Event::TournamentDeleted { tournament } => Some(tournament.guid),
            Event::ServerAdded { .. } | Event::ServerDeleted { .. } | Event::CreateTournament { .. } => {
                None
            }
        }
    }
}
