use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    models::{CoreServer, LeaderboardEntry, State, Tournament},
    permissions::AuthorizedUser,
};

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Success,
    Fail,
}

/// Machine-readable cause attached to a failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    IncorrectVersion,
    IncorrectPassword,
    Unauthorized,
    PermissionDenied,
    NotFound,
    InvalidInput,
    Conflict,
    StorageUnavailable,
    Timeout,
    Internal,
}

/// Payload of a response, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseDetails {
    /// Nothing beyond the outcome and message.
    Empty,
    /// Handshake result.
    Connect {
        server_version: u32,
        #[serde(default)]
        state: Option<State>,
    },
    /// Successful join.
    Join {
        self_guid: Uuid,
        tournament_id: Uuid,
        state: State,
    },
    /// Ranked qualifier rows.
    LeaderboardEntries { scores: Vec<LeaderboardEntry> },
    /// Attempts left on a map.
    RemainingAttempts { remaining_attempts: i64 },
    /// Roster of a tournament.
    AuthorizedUsers { users: Vec<AuthorizedUser> },
    /// Tournaments visible to the requester.
    Tournaments { tournaments: Vec<Tournament> },
    /// Mesh directory.
    Servers { servers: Vec<CoreServer> },
    /// Token for the REST surface.
    RestToken { token: String },
}

/// Answer to a request, correlated by `responding_to_packet_id`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Response {
    pub responding_to_packet_id: Uuid,
    #[serde(rename = "type")]
    pub outcome: ResponseType,
    pub reason: Option<FailReason>,
    pub message: Option<String>,
    pub details: ResponseDetails,
}

impl Response {
    /// Successful response with a payload.
    pub fn success(responding_to: Uuid, details: ResponseDetails) -> Self {
        Self {
            responding_to_packet_id: responding_to,
            outcome: ResponseType::Success,
            reason: None,
            message: None,
            details,
        }
    }

    /// Successful response carrying only a message.
    pub fn success_message(responding_to: Uuid, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(responding_to, ResponseDetails::Empty)
        }
    }

    /// Failed response with a reason and a human readable message.
    pub fn fail(responding_to: Uuid, reason: FailReason, message: impl Into<String>) -> Self {
        Self {
            responding_to_packet_id: responding_to,
            outcome: ResponseType::Fail,
            reason: Some(reason),
            message: Some(message.into()),
            details: ResponseDetails::Empty,
        }
    }

    /// Attach a payload to the response.
    pub fn with_details(mut self, details: ResponseDetails) -> Self {
        self.details = details;
        self
    }

    /// Attach a human readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// True for success responses.
    pub fn is_success(&self) -> bool {
        self.outcome == ResponseType::Success
    }
}
