use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        packet::{Packet, PacketBody},
        request::Request,
        response::{FailReason, Response, ResponseDetails},
    },
    error::ServiceError,
    services::{
        authorization::{self, password_matches},
        dispatcher::{Context, HandlerResult, Transport, VERSION_CODE},
        mesh::{self, MeshError},
        scoring,
    },
    state::{
        AppState, SharedState,
        connections::{Identity, PacketSink},
        models::{DiscordInfo, State, Tournament, TournamentSettings, User},
        permissions::{AuthorizedUser, Permission},
    },
};

use super::unexpected;

/// Tournaments as seen by `identity`.
///
/// Tournaments the identity may not list are skipped. Without the join
/// permission only the name and image are disclosed.
pub(crate) async fn visible_tournaments(state: &AppState, identity: &Identity) -> Vec<Tournament> {
    let mut visible = Vec::new();
    for tournament in state.manager().tournaments().await {
        let permissions = authorization::resolve_permissions(state, tournament.guid, identity).await;
        if !permissions.contains(&Permission::ViewTournamentInList) {
            continue;
        }

        let mut my_permissions: Vec<String> = permissions.iter().map(|p| p.as_str().to_string()).collect();
        my_permissions.sort();
        let settings = tournament.settings.clone().unwrap_or_default();

        if permissions.contains(&Permission::JoinTournament) {
            visible.push(Tournament {
                settings: Some(TournamentSettings {
                    my_permissions,
                    ..settings
                }),
                ..tournament
            });
        } else {
            visible.push(Tournament {
                guid: tournament.guid,
                settings: Some(TournamentSettings {
                    tournament_name: settings.tournament_name,
                    tournament_image: settings.tournament_image,
                    my_permissions,
                    ..TournamentSettings::default()
                }),
                users: Vec::new(),
                matches: Vec::new(),
                qualifiers: Vec::new(),
                server: tournament.server,
            });
        }
    }
    visible
}

/// Snapshot handed out on connect and join.
pub(crate) async fn visible_state(state: &AppState, identity: &Identity) -> State {
    State {
        tournaments: visible_tournaments(state, identity).await,
        known_servers: state.manager().servers().await,
    }
}

pub async fn connect(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::Connect { client_version }) = packet.packet else {
        return Err(unexpected(&packet));
    };

    if client_version != VERSION_CODE {
        let err = ServiceError::VersionMismatch {
            expected: VERSION_CODE,
            actual: client_version,
        };
        return Ok(Some(
            Response::fail(packet.id, FailReason::IncorrectVersion, err.to_string()).with_details(
                ResponseDetails::Connect {
                    server_version: VERSION_CODE,
                    state: None,
                },
            ),
        ));
    }

    let snapshot = visible_state(&state, &ctx.identity).await;
    debug!(connection = %ctx.connection_id, tournaments = snapshot.tournaments.len(), "client connected");
    Ok(Some(Response::success(
        packet.id,
        ResponseDetails::Connect {
            server_version: VERSION_CODE,
            state: Some(snapshot),
        },
    )))
}

pub async fn join(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::Join {
        tournament_id,
        password,
        mod_list,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };
    let client_type = ctx.client_type()?;

    let Some(settings) = state.manager().settings(tournament_id).await else {
        return Err(ServiceError::NotFound(format!("tournament {tournament_id}")));
    };
    if !password_matches(&settings.password_hash, &password) {
        return Err(ServiceError::IncorrectPassword(settings.tournament_name));
    }

    let identity = &ctx.identity;
    let mut user = User::new(ctx.connection_id, identity.name.clone(), client_type);
    user.platform_id = identity.platform_id.clone();
    user.mod_list = mod_list;
    user.discord_info = identity.discord_id.clone().map(|user_id| DiscordInfo {
        user_id,
        username: identity.name.clone(),
        avatar_url: None,
    });
    state.manager().add_user(tournament_id, user).await?;
    info!(
        connection = %ctx.connection_id,
        tournament = %tournament_id,
        client_type = ?client_type,
        "user joined tournament"
    );

    let snapshot = visible_state(&state, identity).await;
    Ok(Some(
        Response::success(
            packet.id,
            ResponseDetails::Join {
                self_guid: ctx.connection_id,
                tournament_id,
                state: snapshot,
            },
        )
        .with_message(format!("Connected to {}!", settings.tournament_name)),
    ))
}

pub async fn get_tournaments(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let tournaments = visible_tournaments(&state, &ctx.identity).await;
    Ok(Some(Response::success(
        packet.id,
        ResponseDetails::Tournaments { tournaments },
    )))
}

pub async fn get_servers(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let servers = state.manager().servers().await;
    Ok(Some(Response::success(packet.id, ResponseDetails::Servers { servers })))
}

pub async fn add_server(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::AddServer { server, auth_token }) = packet.packet else {
        return Err(unexpected(&packet));
    };

    let endpoint = server.endpoint();
    let response = match mesh::admit(&state, server, auth_token).await {
        Ok(true) => Response::success_message(packet.id, "Server added to the master list!"),
        Ok(false) => Response::success_message(packet.id, "Server is already on the master list"),
        Err(MeshError::Rejected { .. }) => Response::fail(
            packet.id,
            FailReason::Unauthorized,
            "Could not connect to your server due to an authorization error. Try adding an auth token to the add_server request",
        ),
        Err(err) => {
            warn!(server = %endpoint, error = %err, "refusing to list unreachable server");
            Response::fail(
                packet.id,
                FailReason::NotFound,
                "Could not connect to your server. Check that it accepts connections from outside your network",
            )
        }
    };
    Ok(Some(response))
}

pub async fn get_qualifier_scores(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::GetQualifierScores {
        tournament_id,
        qualifier_id,
        map_id,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };

    let (mut scores, hidden) = scoring::leaderboard(&state, tournament_id, qualifier_id, map_id).await?;
    if hidden
        && !authorization::has_permission(
            &state,
            tournament_id,
            &ctx.identity,
            Permission::SeeHiddenQualifierScores,
        )
        .await
    {
        scores.clear();
    }
    Ok(Some(Response::success(
        packet.id,
        ResponseDetails::LeaderboardEntries { scores },
    )))
}

pub async fn submit_qualifier_score(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::SubmitQualifierScore {
        tournament_id,
        mut score,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };

    // Scores are filed under the verified identity, never under a claimed one.
    if !ctx.identity.platform_id.is_empty() {
        score.platform_id = ctx.identity.platform_id.clone();
    }
    if score.platform_id.is_empty() {
        return Err(ServiceError::InvalidInput("score has no platform id".into()));
    }

    let outcome = scoring::submit_score(&state, tournament_id, score).await?;
    let mut scores = outcome.leaderboard;
    if outcome.hidden
        && !authorization::has_permission(
            &state,
            tournament_id,
            &ctx.identity,
            Permission::SeeHiddenQualifierScores,
        )
        .await
    {
        scores.clear();
    }
    Ok(Some(Response::success(
        packet.id,
        ResponseDetails::LeaderboardEntries { scores },
    )))
}

pub async fn remaining_attempts(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::RemainingAttempts { tournament_id, map_id }) = packet.packet else {
        return Err(unexpected(&packet));
    };

    let remaining_attempts =
        scoring::remaining_attempts(&state, tournament_id, map_id, &ctx.identity.platform_id).await?;
    Ok(Some(Response::success(
        packet.id,
        ResponseDetails::RemainingAttempts { remaining_attempts },
    )))
}

pub async fn refund_attempts(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::RefundAttempts {
        tournament_id,
        map_id,
        ref platform_id,
        count,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };

    match scoring::refund_attempts(&state, tournament_id, map_id, platform_id, count).await {
        Ok(message) => Ok(Some(Response::success_message(packet.id, message))),
        Err(ServiceError::InvalidInput(message)) => {
            Ok(Some(Response::fail(packet.id, FailReason::InvalidInput, message)))
        }
        Err(err) => Err(err),
    }
}

async fn check_roles(state: &AppState, tournament_id: Uuid, role_ids: &[String]) -> Result<(), ServiceError> {
    let settings = state
        .manager()
        .settings(tournament_id)
        .await
        .ok_or_else(|| ServiceError::NotFound(format!("tournament {tournament_id}")))?;
    match role_ids
        .iter()
        .find(|id| !settings.roles.iter().any(|role| &role.role_id == *id))
    {
        Some(unknown) => Err(ServiceError::InvalidInput(format!("unknown role `{unknown}`"))),
        None => Ok(()),
    }
}

pub async fn add_authorized_user(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::AddAuthorizedUser {
        tournament_id,
        identity,
        role_ids,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };
    if identity.is_empty() {
        return Err(ServiceError::InvalidInput("identity must not be empty".into()));
    }
    check_roles(&state, tournament_id, &role_ids).await?;

    state
        .manager()
        .save_authorized_user(AuthorizedUser {
            tournament_id,
            identity: identity.clone(),
            role_ids,
            status: Default::default(),
        })
        .await?;
    Ok(Some(Response::success_message(
        packet.id,
        format!("Added {identity} to the tournament"),
    )))
}

pub async fn update_authorized_user_roles(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::UpdateAuthorizedUserRoles {
        tournament_id,
        identity,
        role_ids,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };
    check_roles(&state, tournament_id, &role_ids).await?;

    let known = state
        .manager()
        .authorized_users(tournament_id)
        .await?
        .into_iter()
        .any(|row| row.identity == identity);
    if !known {
        return Err(ServiceError::NotFound(format!("authorized user {identity}")));
    }

    state
        .manager()
        .save_authorized_user(AuthorizedUser {
            tournament_id,
            identity: identity.clone(),
            role_ids,
            status: Default::default(),
        })
        .await?;
    Ok(Some(Response::success_message(
        packet.id,
        format!("Updated roles of {identity}"),
    )))
}

pub async fn remove_authorized_user(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::RemoveAuthorizedUser {
        tournament_id,
        ref identity,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };

    if !state.manager().remove_authorized_user(tournament_id, identity).await? {
        return Err(ServiceError::NotFound(format!("authorized user {identity}")));
    }
    Ok(Some(Response::success_message(
        packet.id,
        format!("Removed {identity} from the tournament"),
    )))
}

pub async fn get_authorized_users(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Request(Request::GetAuthorizedUsers { tournament_id }) = packet.packet else {
        return Err(unexpected(&packet));
    };
    let users = state.manager().authorized_users(tournament_id).await?;
    Ok(Some(Response::success(packet.id, ResponseDetails::AuthorizedUsers { users })))
}

pub async fn convert_websocket_token(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let token = packet
        .token
        .as_deref()
        .ok_or_else(|| ServiceError::Unauthorized("no token to convert".into()))?;
    let token = state.tokens().convert_websocket_token(token)?;
    Ok(Some(Response::success(packet.id, ResponseDetails::RestToken { token })))
}

/// Relay a player-bound request to its recipients. Players answer the sender directly.
pub async fn forward_request(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let recipients = match &packet.packet {
        PacketBody::Request(Request::LoadSong { forward_to, .. })
        | PacketBody::Request(Request::PreloadImageForStreamSync { forward_to, .. }) => forward_to.clone(),
        _ => return Err(unexpected(&packet)),
    };

    let packet_id = packet.id;
    let relayed = Packet {
        from: ctx.connection_id,
        token: None,
        ..packet
    };
    state.connections().send_to(&recipients, &relayed);
    debug!(connection = %ctx.connection_id, recipients = recipients.len(), "request forwarded");

    Ok(match ctx.transport {
        Transport::Websocket => None,
        Transport::Rest => Some(Response::success_message(packet_id, "forwarded")),
    })
}
