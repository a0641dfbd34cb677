//! Permission vocabulary, roles and authorized-user roster entries.

use std::{borrow::Cow, collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::{
    PartialSchema, ToSchema,
    openapi::{
        RefOr,
        schema::{ObjectBuilder, Schema, Type},
    },
};
use uuid::Uuid;

use crate::state::models::RowStatus;

/// Fine-grained capability granted through tournament roles.
///
/// Serialized as its wire name, see [`Permission::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Permission {
    ViewTournamentInList,
    JoinTournament,

    AddAuthorizedUsers,
    UpdateAuthorizedUserRoles,
    RemoveAuthorizedUsers,
    GetAuthorizedUsers,

    GetQualifierScores,
    SubmitQualifierScores,
    SeeHiddenQualifierScores,
    GetRemainingAttempts,
    RefundAttempts,

    ReturnToMenu,
    PlaySong,
    PlayWithStreamSync,
    ModifyGameplay,
    LoadSong,

    CreateMatch,
    AddUserToMatch,
    RemoveUserFromMatch,
    SetMatchLeader,
    SetMatchMap,
    DeleteMatch,

    CreateQualifier,
    SetQualifierName,
    SetQualifierImage,
    SetQualifierInfoChannel,
    SetQualifierFlags,
    SetQualifierLeaderboardSort,
    AddQualifierMaps,
    UpdateQualifierMap,
    RemoveQualifierMap,
    DeleteQualifier,

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

impl Permission {
    /// Every permission, in declaration order.
    pub const ALL: &'static [Permission] = &[
        Permission::ViewTournamentInList,
        Permission::JoinTournament,
        Permission::AddAuthorizedUsers,
        Permission::UpdateAuthorizedUserRoles,
        Permission::RemoveAuthorizedUsers,
        Permission::GetAuthorizedUsers,
        Permission::GetQualifierScores,
        Permission::SubmitQualifierScores,
        Permission::SeeHiddenQualifierScores,
        Permission::GetRemainingAttempts,
        Permission::RefundAttempts,
        Permission::ReturnToMenu,
        Permission::PlaySong,
        Permission::PlayWithStreamSync,
        Permission::ModifyGameplay,
        Permission::LoadSong,
        Permission::CreateMatch,
        Permission::AddUserToMatch,
        Permission::RemoveUserFromMatch,
        Permission::SetMatchLeader,
        Permission::SetMatchMap,
        Permission::DeleteMatch,
        Permission::CreateQualifier,
        Permission::SetQualifierName,
        Permission::SetQualifierImage,
        Permission::SetQualifierInfoChannel,
        Permission::SetQualifierFlags,
        Permission::SetQualifierLeaderboardSort,
        Permission::AddQualifierMaps,
        Permission::UpdateQualifierMap,
        Permission::RemoveQualifierMap,
        Permission::DeleteQualifier,
        Permission::SetTournamentName,
        Permission::SetTournamentImage,
        Permission::SetTournamentPassword,
        Permission::SetTournamentEnableTeams,
        Permission::SetTournamentAllowUnauthorizedView,
        Permission::AddTournamentTeam,
        Permission::SetTournamentTeamName,
        Permission::SetTournamentTeamImage,
        Permission::RemoveTournamentTeam,
        Permission::AddTournamentRole,
        Permission::RemoveTournamentRole,
        Permission::DeleteTournament,
    ];

    /// Wire name of the permission.
    pub fn as_str(self) -> &'static str {
        use Permission::*;
        match self {
            ViewTournamentInList => "tournament:view_tournament_in_list",
            JoinTournament => "tournament:join",
            AddAuthorizedUsers => "tournament:settings:add_authorized_users",
            UpdateAuthorizedUserRoles => "tournament:settings:update_authorized_user_roles",
            RemoveAuthorizedUsers => "tournament:settings:remove_authorized_users",
            GetAuthorizedUsers => "tournament:settings:get_authorized_users",
            GetQualifierScores => "tournament:qualifier:get_qualifier_scores",
            SubmitQualifierScores => "tournament:qualifier:submit_qualifier_scores",
            SeeHiddenQualifierScores => "tournament:qualifier:see_hidden_qualifier_scores",
            GetRemainingAttempts => "tournament:qualifier:get_remaining_attempts",
            RefundAttempts => "tournament:qualifier:refund_attempts",
            ReturnToMenu => "tournament:player:return_to_menu",
            PlaySong => "tournament:player:play_song",
            PlayWithStreamSync => "tournament:player:play_with_stream_sync",
            ModifyGameplay => "tournament:player:modify_gameplay",
            LoadSong => "tournament:player:load_song",
            CreateMatch => "tournament:match:create_match",
            AddUserToMatch => "tournament:match:add_user_to_match",
            RemoveUserFromMatch => "tournament:match:remove_user_from_match",
            SetMatchLeader => "tournament:match:set_match_leader",
            SetMatchMap => "tournament:match:set_match_map",
            DeleteMatch => "tournament:match:delete_match",
            CreateQualifier => "tournament:qualifier:create",
            SetQualifierName => "tournament:qualifier:set_name",
            SetQualifierImage => "tournament:qualifier:set_image",
            SetQualifierInfoChannel => "tournament:qualifier:set_info_channel",
            SetQualifierFlags => "tournament:qualifier:set_flags",
            SetQualifierLeaderboardSort => "tournament:qualifier:set_leaderboard_sort",
            AddQualifierMaps => "tournament:qualifier:add_maps",
            UpdateQualifierMap => "tournament:qualifier:update_map",
            RemoveQualifierMap => "tournament:qualifier:remove_map",
            DeleteQualifier => "tournament:qualifier:delete",
            SetTournamentName => "tournament:settings:set_name",
            SetTournamentImage => "tournament:settings:set_image",
            SetTournamentPassword => "tournament:settings:set_password",
            SetTournamentEnableTeams => "tournament:settings:set_enable_teams",
            SetTournamentAllowUnauthorizedView => "tournament:settings:set_allow_unauthorized_view",
            AddTournamentTeam => "tournament:settings:add_team",
            SetTournamentTeamName => "tournament:settings:set_team_name",
            SetTournamentTeamImage => "tournament:settings:set_team_image",
            RemoveTournamentTeam => "tournament:settings:remove_team",
            AddTournamentRole => "tournament:settings:add_role",
            RemoveTournamentRole => "tournament:settings:remove_role",
            DeleteTournament => "tournament:settings:delete",
        }
    }
}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|permission| permission.as_str() == name)
            .ok_or_else(|| UnknownPermission(name.to_string()))
    }
}

impl TryFrom<String> for Permission {
    type Error = UnknownPermission;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.as_str().to_string()
    }
}

impl PartialSchema for Permission {
    fn schema() -> RefOr<Schema> {
        ObjectBuilder::new()
            .schema_type(Type::String)
            .enum_values(Some(Permission::ALL.iter().map(|permission| permission.as_str())))
            .into()
    }
}

impl ToSchema for Permission {
    fn name() -> Cow<'static, str> {
        Cow::Borrowed("Permission")
    }
}

/// Wire name outside the permission vocabulary.
#[derive(Debug, Error)]
#[error("unknown permission `{0}`")]
pub struct UnknownPermission(pub String);

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named bundle of permissions scoped to one tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub role_id: String,
    pub name: String,
    pub tournament_id: Uuid,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Roster entry granting roles to an identity within a tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthorizedUser {
    pub tournament_id: Uuid,
    /// Platform id or linked chat id.
    pub identity: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub status: RowStatus,
}

/// Identifiers of the roles seeded into every new tournament.
pub mod default_roles {
    /// Can see the tournament and its qualifiers.
    pub const VIEW_ONLY: &str = "view_only";
    /// Can play.
    pub const PLAYER: &str = "player";
    /// Can run matches.
    pub const COORDINATOR: &str = "coordinator";
    /// Everything.
    pub const ADMIN: &str = "admin";
}

fn role(tournament_id: Uuid, role_id: &str, name: &str, permissions: Vec<Permission>) -> Role {
    Role {
        role_id: role_id.to_string(),
        name: name.to_string(),
        tournament_id,
        permissions,
    }
}

/// Build the four roles every tournament starts with.
pub fn default_roles_for(tournament_id: Uuid) -> Vec<Role> {
    use Permission::*;

    let view_only = vec![ViewTournamentInList, JoinTournament, GetQualifierScores];

    let mut player = view_only.clone();
    player.extend([SubmitQualifierScores, GetRemainingAttempts]);

    let mut coordinator = player.clone();
    coordinator.extend([
        SeeHiddenQualifierScores,
        ReturnToMenu,
        PlaySong,
        PlayWithStreamSync,
        ModifyGameplay,
        LoadSong,
        CreateMatch,
        AddUserToMatch,
        RemoveUserFromMatch,
        SetMatchLeader,
        SetMatchMap,
        DeleteMatch,
    ]);

    vec![
        role(tournament_id, default_roles::VIEW_ONLY, "View Only", view_only),
        role(tournament_id, default_roles::PLAYER, "Player", player),
        role(tournament_id, default_roles::COORDINATOR, "Coordinator", coordinator),
        role(tournament_id, default_roles::ADMIN, "Admin", Permission::ALL.to_vec()),
    ]
}

/// Union of the permissions carried by `role_ids` among `roles`.
pub fn permissions_of(roles: &[Role], role_ids: &[String]) -> HashSet<Permission> {
    roles
        .iter()
        .filter(|role| role_ids.contains(&role.role_id))
        .flat_map(|role| role.permissions.iter().copied())
        .collect()
}
