use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{
        event::Event,
        packet::{Packet, PacketBody},
        response::Response,
        validation::validate_display_name,
    },
    error::ServiceError,
    services::{
        authorization::hash_password,
        dispatcher::{Context, HandlerResult},
    },
    state::{
        SharedState,
        models::{ClientType, Map, Match, QualifierEvent, Team, TournamentSettings},
        permissions::{AuthorizedUser, default_roles, default_roles_for},
    },
};

use super::unexpected;

type MatchEdit = Box<dyn FnOnce(&mut Match) + Send>;
type QualifierEdit = Box<dyn FnOnce(&mut QualifierEvent) -> Result<(), ServiceError> + Send>;
type SettingsEdit = Box<dyn FnOnce(&mut TournamentSettings) -> Result<(), ServiceError> + Send>;

fn display_name(name: &str) -> Result<(), ServiceError> {
    validate_display_name(name).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.to_string())
                .unwrap_or_else(|| err.code.to_string()),
        )
    })
}

fn with_identities(mut maps: Vec<Map>) -> Vec<Map> {
    for map in &mut maps {
        if map.guid.is_nil() {
            map.guid = Uuid::new_v4();
        }
    }
    maps
}

pub async fn update_user(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Event(Event::UpdateUser {
        tournament_id,
        mut user,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };

    if ctx.client_type()? == ClientType::Player && user.guid != ctx.connection_id {
        return Err(ServiceError::PermissionDenied("players may only update themselves".into()));
    }

    let gone = || ServiceError::Conflict("user left before the update applied".into());
    let existing = state.manager().user(tournament_id, user.guid).await.ok_or_else(gone)?;
    user.client_type = existing.client_type;
    user.platform_id = existing.platform_id;

    if !state.manager().update_user(tournament_id, user).await? {
        return Err(gone());
    }
    Ok(Some(Response::success_message(packet.id, "User updated")))
}

pub async fn create_match(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Event(Event::CreateMatch {
        tournament_id,
        mut game_match,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };
    if game_match.guid.is_nil() {
        game_match.guid = Uuid::new_v4();
    }

    let created = state.manager().create_match(tournament_id, game_match).await?;
    Ok(Some(Response::success_message(
        packet.id,
        format!("Created match {}", created.guid),
    )))
}

/// Add/remove user, set leader and set map share the same update path.
pub async fn edit_match(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let (tournament_id, match_id, member, edit): (Uuid, Uuid, Option<Uuid>, MatchEdit) = match packet.packet {
        PacketBody::Event(Event::AddUserToMatch {
            tournament_id,
            match_id,
            user_id,
        }) => (
            tournament_id,
            match_id,
            Some(user_id),
            Box::new(move |game_match: &mut Match| {
                if !game_match.associated_users.contains(&user_id) {
                    game_match.associated_users.push(user_id);
                }
            }),
        ),
        PacketBody::Event(Event::RemoveUserFromMatch {
            tournament_id,
            match_id,
            user_id,
        }) => (
            tournament_id,
            match_id,
            None,
            Box::new(move |game_match: &mut Match| game_match.associated_users.retain(|guid| *guid != user_id)),
        ),
        PacketBody::Event(Event::SetMatchLeader {
            tournament_id,
            match_id,
            user_id,
        }) => (
            tournament_id,
            match_id,
            Some(user_id),
            Box::new(move |game_match: &mut Match| game_match.leader = user_id),
        ),
        PacketBody::Event(Event::SetMatchMap {
            tournament_id,
            match_id,
            map,
        }) => (
            tournament_id,
            match_id,
            None,
            Box::new(move |game_match: &mut Match| game_match.selected_map = Some(map)),
        ),
        _ => return Err(unexpected(&packet)),
    };

    if let Some(user_id) = member {
        if state.manager().user(tournament_id, user_id).await.is_none() {
            return Err(ServiceError::NotFound(format!("user {user_id}")));
        }
    }

    match state.manager().update_match(tournament_id, match_id, edit).await? {
        Some(_) => Ok(Some(Response::success_message(packet.id, "Match updated"))),
        None => Err(ServiceError::NotFound(format!("match {match_id}"))),
    }
}

pub async fn delete_match(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Event(Event::DeleteMatch {
        tournament_id,
        match_id,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };

    match state.manager().delete_match(tournament_id, match_id).await? {
        Some(_) => Ok(Some(Response::success_message(packet.id, "Match deleted"))),
        None => Err(ServiceError::NotFound(format!("match {match_id}"))),
    }
}

pub async fn create_qualifier(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Event(Event::CreateQualifierEvent {
        tournament_id,
        mut qualifier,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };
    display_name(&qualifier.name)?;
    if qualifier.guid.is_nil() {
        qualifier.guid = Uuid::new_v4();
    }
    qualifier.maps = with_identities(qualifier.maps);

    let created = state.manager().create_qualifier(tournament_id, qualifier).await?;
    Ok(Some(Response::success_message(
        packet.id,
        format!("Created qualifier {}", created.name),
    )))
}

/// Every qualifier setter, persisted then applied through the manager.
pub async fn edit_qualifier(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let retired_map = match &packet.packet {
        PacketBody::Event(Event::RemoveQualifierMap { map_id, .. }) => Some(*map_id),
        _ => None,
    };
    let (tournament_id, qualifier_id, edit): (Uuid, Uuid, QualifierEdit) = match packet.packet {
        PacketBody::Event(Event::SetQualifierName {
            tournament_id,
            qualifier_id,
            name,
        }) => {
            display_name(&name)?;
            (
                tournament_id,
                qualifier_id,
                Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                    qualifier.name = name;
                    Ok(())
                }),
            )
        }
        PacketBody::Event(Event::SetQualifierImage {
            tournament_id,
            qualifier_id,
            image,
        }) => (
            tournament_id,
            qualifier_id,
            Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                qualifier.image = Some(image).filter(|image| !image.is_empty());
                Ok(())
            }),
        ),
        PacketBody::Event(Event::SetQualifierInfoChannel {
            tournament_id,
            qualifier_id,
            info_channel,
        }) => (
            tournament_id,
            qualifier_id,
            Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                qualifier.info_channel = Some(info_channel).filter(|channel| !channel.id.is_empty());
                Ok(())
            }),
        ),
        PacketBody::Event(Event::SetQualifierFlags {
            tournament_id,
            qualifier_id,
            flags,
        }) => (
            tournament_id,
            qualifier_id,
            Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                qualifier.flags = flags;
                Ok(())
            }),
        ),
        PacketBody::Event(Event::SetQualifierLeaderboardSort {
            tournament_id,
            qualifier_id,
            sort,
        }) => (
            tournament_id,
            qualifier_id,
            Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                qualifier.sort = sort;
                Ok(())
            }),
        ),
        PacketBody::Event(Event::AddQualifierMaps {
            tournament_id,
            qualifier_id,
            maps,
        }) => (
            tournament_id,
            qualifier_id,
            Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                for map in with_identities(maps) {
                    if qualifier.map(map.guid).is_some() {
                        return Err(ServiceError::Conflict(format!("map {} already exists", map.guid)));
                    }
                    qualifier.maps.push(map);
                }
                Ok(())
            }),
        ),
        PacketBody::Event(Event::UpdateQualifierMap {
            tournament_id,
            qualifier_id,
            mut map,
        }) => (
            tournament_id,
            qualifier_id,
            Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                let existing = qualifier
                    .maps
                    .iter_mut()
                    .find(|candidate| candidate.guid == map.guid)
                    .ok_or_else(|| ServiceError::NotFound(format!("map {}", map.guid)))?;
                if map.leaderboard_message_id.is_none() {
                    map.leaderboard_message_id = existing.leaderboard_message_id.take();
                }
                *existing = map;
                Ok(())
            }),
        ),
        PacketBody::Event(Event::RemoveQualifierMap {
            tournament_id,
            qualifier_id,
            map_id,
        }) => (
            tournament_id,
            qualifier_id,
            Box::new(move |qualifier: &mut QualifierEvent| -> Result<(), ServiceError> {
                let before = qualifier.maps.len();
                qualifier.maps.retain(|map| map.guid != map_id);
                if qualifier.maps.len() == before {
                    return Err(ServiceError::NotFound(format!("map {map_id}")));
                }
                Ok(())
            }),
        ),
        _ => return Err(unexpected(&packet)),
    };

    state.manager().update_qualifier(tournament_id, qualifier_id, edit).await?;
    state.release_score_locks(retired_map);
    Ok(Some(Response::success_message(packet.id, "Qualifier updated")))
}

pub async fn delete_qualifier(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Event(Event::DeleteQualifierEvent {
        tournament_id,
        qualifier_id,
    }) = packet.packet
    else {
        return Err(unexpected(&packet));
    };

    let removed = state.manager().delete_qualifier(tournament_id, qualifier_id).await?;
    state.release_score_locks(removed.maps.iter().map(|map| map.guid));
    Ok(Some(Response::success_message(
        packet.id,
        format!("Deleted qualifier {}", removed.name),
    )))
}

/// Create a tournament owned by the sender.
///
/// Default roles are seeded when none are supplied and the creator is granted admin.
/// An incoming password is plaintext and is stored as a digest.
pub async fn create_tournament(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Event(Event::CreateTournament { mut tournament }) = packet.packet else {
        return Err(unexpected(&packet));
    };
    if tournament.guid.is_nil() {
        tournament.guid = Uuid::new_v4();
    }
    let tournament_id = tournament.guid;

    let mut settings = tournament.settings.take().unwrap_or_default();
    display_name(&settings.tournament_name)?;
    settings.password_hash = hash_password(&settings.password_hash);
    settings.my_permissions.clear();
    for role in &mut settings.roles {
        role.tournament_id = tournament_id;
    }
    let seed_all = settings.roles.is_empty();
    for role in default_roles_for(tournament_id) {
        let wanted = seed_all || role.role_id == default_roles::ADMIN;
        if wanted && !settings.roles.iter().any(|existing| existing.role_id == role.role_id) {
            settings.roles.push(role);
        }
    }

    tournament.settings = Some(settings);
    tournament.users.clear();
    tournament.matches.clear();
    tournament.qualifiers.clear();
    tournament.server = Some(state.config().self_server());

    let created = state.manager().create_tournament(tournament).await?;
    let name = created
        .settings
        .as_ref()
        .map(|settings| settings.tournament_name.clone())
        .unwrap_or_default();

    if !ctx.identity.platform_id.is_empty() {
        state
            .manager()
            .save_authorized_user(AuthorizedUser {
                tournament_id,
                identity: ctx.identity.platform_id.clone(),
                role_ids: vec![default_roles::ADMIN.to_string()],
                status: Default::default(),
            })
            .await?;
    }
    info!(tournament = %tournament_id, %name, "tournament created");

    Ok(Some(Response::success_message(packet.id, format!("Created tournament {name}"))))
}

/// Every tournament setting setter.
pub async fn edit_tournament(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let (tournament_id, edit): (Uuid, SettingsEdit) = match packet.packet {
        PacketBody::Event(Event::SetTournamentName { tournament_id, name }) => {
            display_name(&name)?;
            (
                tournament_id,
                Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                    settings.tournament_name = name;
                    Ok(())
                }),
            )
        }
        PacketBody::Event(Event::SetTournamentImage { tournament_id, image }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                settings.tournament_image = Some(image).filter(|image| !image.is_empty());
                Ok(())
            }),
        ),
        PacketBody::Event(Event::SetTournamentPassword { tournament_id, password }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                settings.password_hash = hash_password(&password);
                Ok(())
            }),
        ),
        PacketBody::Event(Event::SetTournamentEnableTeams {
            tournament_id,
            enable_teams,
        }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                settings.enable_teams = enable_teams;
                Ok(())
            }),
        ),
        PacketBody::Event(Event::SetTournamentAllowUnauthorizedView {
            tournament_id,
            allow_unauthorized_view,
        }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                settings.allow_unauthorized_view = allow_unauthorized_view;
                Ok(())
            }),
        ),
        PacketBody::Event(Event::AddTournamentTeam { tournament_id, mut team }) => {
            display_name(&team.name)?;
            if team.guid.is_nil() {
                team.guid = Uuid::new_v4();
            }
            (
                tournament_id,
                Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                    settings.teams.retain(|existing| existing.guid != team.guid);
                    settings.teams.push(team);
                    Ok(())
                }),
            )
        }
        PacketBody::Event(Event::SetTournamentTeamName {
            tournament_id,
            team_id,
            name,
        }) => {
            display_name(&name)?;
            (
                tournament_id,
                Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                    team_mut(settings, team_id)?.name = name;
                    Ok(())
                }),
            )
        }
        PacketBody::Event(Event::SetTournamentTeamImage {
            tournament_id,
            team_id,
            image,
        }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                team_mut(settings, team_id)?.image = Some(image).filter(|image| !image.is_empty());
                Ok(())
            }),
        ),
        PacketBody::Event(Event::RemoveTournamentTeam { tournament_id, team_id }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                let before = settings.teams.len();
                settings.teams.retain(|team| team.guid != team_id);
                if settings.teams.len() == before {
                    return Err(ServiceError::NotFound(format!("team {team_id}")));
                }
                Ok(())
            }),
        ),
        PacketBody::Event(Event::AddTournamentRole {
            tournament_id,
            mut role,
        }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                role.tournament_id = tournament_id;
                settings.roles.retain(|existing| existing.role_id != role.role_id);
                settings.roles.push(role);
                Ok(())
            }),
        ),
        PacketBody::Event(Event::RemoveTournamentRole { tournament_id, role_id }) => (
            tournament_id,
            Box::new(move |settings: &mut TournamentSettings| -> Result<(), ServiceError> {
                if role_id == default_roles::ADMIN {
                    return Err(ServiceError::InvalidInput("the admin role cannot be removed".into()));
                }
                let before = settings.roles.len();
                settings.roles.retain(|role| role.role_id != role_id);
                if settings.roles.len() == before {
                    return Err(ServiceError::NotFound(format!("role {role_id}")));
                }
                Ok(())
            }),
        ),
        _ => return Err(unexpected(&packet)),
    };

    state.manager().update_settings(tournament_id, edit).await?;
    Ok(Some(Response::success_message(packet.id, "Tournament updated")))
}

fn team_mut(settings: &mut TournamentSettings, team_id: Uuid) -> Result<&mut Team, ServiceError> {
    settings
        .teams
        .iter_mut()
        .find(|team| team.guid == team_id)
        .ok_or_else(|| ServiceError::NotFound(format!("team {team_id}")))
}

pub async fn delete_tournament(state: SharedState, _ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Event(Event::DeleteTournament { tournament_id }) = packet.packet else {
        return Err(unexpected(&packet));
    };
    let removed = state.manager().delete_tournament(tournament_id).await?;
    state.release_score_locks(
        removed
            .qualifiers
            .iter()
            .flat_map(|qualifier| qualifier.maps.iter().map(|map| map.guid)),
    );
    Ok(Some(Response::success_message(packet.id, "Tournament deleted")))
}
