use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::models::{CoreServer, QualifierScore};

/// Request sub-union. Every request is answered with exactly one Response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Handshake carrying the client protocol version.
    Connect { client_version: u32 },
    /// Enter a tournament, optionally password protected.
    Join {
        tournament_id: Uuid,
        #[serde(default)]
        password: String,
        #[serde(default)]
        mod_list: Vec<String>,
    },
    /// Ranked rows of a qualifier, optionally narrowed to one map.
    GetQualifierScores {
        tournament_id: Uuid,
        qualifier_id: Uuid,
        #[serde(default)]
        map_id: Option<Uuid>,
    },
    /// Record a qualifier performance.
    SubmitQualifierScore {
        tournament_id: Uuid,
        score: QualifierScore,
    },
    /// Attempts left for the requester on a map.
    RemainingAttempts { tournament_id: Uuid, map_id: Uuid },
    /// Physically delete the latest attempts of a player on a map.
    RefundAttempts {
        tournament_id: Uuid,
        map_id: Uuid,
        platform_id: String,
        count: u32,
    },
    /// Grant roles to an identity.
    AddAuthorizedUser {
        tournament_id: Uuid,
        identity: String,
        role_ids: Vec<String>,
    },
    /// Replace the roles of an identity.
    UpdateAuthorizedUserRoles {
        tournament_id: Uuid,
        identity: String,
        role_ids: Vec<String>,
    },
    /// Revoke an identity.
    RemoveAuthorizedUser { tournament_id: Uuid, identity: String },
    /// Active roster of a tournament.
    GetAuthorizedUsers { tournament_id: Uuid },
    /// Tournaments visible to the requester.
    GetTournaments,
    /// Current mesh directory.
    GetServers,
    /// List a peer server after checking that it answers a handshake.
    AddServer {
        server: CoreServer,
        /// Token presented to the peer instead of the read-only one.
        #[serde(default)]
        auth_token: Option<String>,
    },
    /// Exchange the connection's websocket token for a REST token.
    ConvertWebsocketToken,
    /// Ask players to download a song ahead of time.
    LoadSong {
        tournament_id: Uuid,
        level_id: String,
        forward_to: Vec<Uuid>,
    },
    /// Ask players to cache an uploaded image for stream sync.
    PreloadImageForStreamSync {
        tournament_id: Uuid,
        file_id: String,
        forward_to: Vec<Uuid>,
    },
}

/// Discriminator of [`Request`] used as handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Connect,
    Join,
    GetQualifierScores,
    SubmitQualifierScore,
    RemainingAttempts,
    RefundAttempts,
    AddAuthorizedUser,
    UpdateAuthorizedUserRoles,
    RemoveAuthorizedUser,
    GetAuthorizedUsers,
    GetTournaments,
    GetServers,
    AddServer,
    ConvertWebsocketToken,
    LoadSong,
    PreloadImageForStreamSync,
}

impl RequestKind {
    /// Parse the snake_case name used by the REST mirror routes.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "connect" => Self::Connect,
            "join" => Self::Join,
            "get_qualifier_scores" => Self::GetQualifierScores,
            "submit_qualifier_score" => Self::SubmitQualifierScore,
            "remaining_attempts" => Self::RemainingAttempts,
            "refund_attempts" => Self::RefundAttempts,
            "add_authorized_user" => Self::AddAuthorizedUser,
            "update_authorized_user_roles" => Self::UpdateAuthorizedUserRoles,
            "remove_authorized_user" => Self::RemoveAuthorizedUser,
            "get_authorized_users" => Self::GetAuthorizedUsers,
            "get_tournaments" => Self::GetTournaments,
            "get_servers" => Self::GetServers,
            "add_server" => Self::AddServer,
            "convert_websocket_token" => Self::ConvertWebsocketToken,
            "load_song" => Self::LoadSong,
            "preload_image_for_stream_sync" => Self::PreloadImageForStreamSync,
            _ => return None,
        })
    }
}

impl Request {
    /// Registry discriminator of this request.
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Connect { .. } => RequestKind::Connect,
            Request::Join { .. } => RequestKind::Join,
            Request::GetQualifierScores { .. } => RequestKind::GetQualifierScores,
            Request::SubmitQualifierScore { .. } => RequestKind::SubmitQualifierScore,
            Request::RemainingAttempts { .. } => RequestKind::RemainingAttempts,
            Request::RefundAttempts { .. } => RequestKind::RefundAttempts,
            Request::AddAuthorizedUser { .. } => RequestKind::AddAuthorizedUser,
            Request::UpdateAuthorizedUserRoles { .. } => RequestKind::UpdateAuthorizedUserRoles,
            Request::RemoveAuthorizedUser { .. } => RequestKind::RemoveAuthorizedUser,
            Request::GetAuthorizedUsers { .. } => RequestKind::GetAuthorizedUsers,
            Request::GetTournaments => RequestKind::GetTournaments,
            Request::GetServers => RequestKind::GetServers,
            Request::AddServer { .. } => RequestKind::AddServer,
            Request::ConvertWebsocketToken => RequestKind::ConvertWebsocketToken,
            Request::LoadSong { .. } => RequestKind::LoadSong,
            Request::PreloadImageForStreamSync { .. } => RequestKind::PreloadImageForStreamSync,
        }
    }

    /// Tournament the permission gate resolves against.
    pub fn tournament_id(&self) -> Option<Uuid> {
        match self {
            Request::Join { tournament_id, .. }
            | Request::GetQualifierScores { tournament_id, .. }
            | Request::SubmitQualifierScore { tournament_id, .. }
            | Request::RemainingAttempts { tournament_id, .. }
            | Request::RefundAttempts { tournament_id, .. }
            | Request::AddAuthorizedUser { tournament_id, .. }
            | Request::UpdateAuthorizedUserRoles { tournament_id, .. }
            | Request::RemoveAuthorizedUser { tournament_id, .. }
            | Request::GetAuthorizedUsers { tournament_id }
            | Request::LoadSong { tournament_id, .. }
            | Request::PreloadImageForStreamSync { tournament_id, .. } => Some(*tournament_id),
            Request::Connect { .. }
            | Request::GetTournaments
            | Request::GetServers
            | Request::AddServer { .. }
            | Request::ConvertWebsocketToken => None,
        }
    }
}
