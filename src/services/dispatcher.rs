//! Packet routing: a startup-time registry keyed by (case, sub-case) and the authorization gate.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::{
        event::EventKind,
        packet::{CommandCase, Packet, PacketBody, PacketCase, SubCase},
        push::PushKind,
        request::RequestKind,
        response::Response,
    },
    error::ServiceError,
    services::{
        authorization,
        handlers::{events, relay, requests},
    },
    state::{SharedState, connections::Identity, models::ClientType, permissions::Permission},
};

/// Protocol version spoken by this server.
pub const VERSION_CODE: u32 = 1;

/// Outcome of a handler: an optional reply for the sender.
pub type HandlerResult = Result<Option<Response>, ServiceError>;

/// Registered handler.
pub type Handler = fn(SharedState, Context, Packet) -> BoxFuture<'static, HandlerResult>;

/// Surface a packet arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Websocket,
    Rest,
}

/// Per-packet context handed to handlers.
#[derive(Debug, Clone)]
pub struct Context {
    /// Connection guid; doubles as the user guid once joined.
    pub connection_id: Uuid,
    /// Identity verified from the packet token.
    pub identity: Identity,
    pub transport: Transport,
}

impl Context {
    /// Client type of the sender, `Unauthorized` for anonymous senders.
    pub fn client_type(&self) -> Result<ClientType, ServiceError> {
        self.identity
            .client_type
            .ok_or_else(|| ServiceError::Unauthorized("missing or invalid token".into()))
    }
}

/// Permission a handler requires.
#[derive(Clone, Copy)]
pub enum PermissionRule {
    Fixed(Permission),
    /// Resolved from the packet payload.
    PerPacket(fn(&Packet) -> Permission),
}

impl PermissionRule {
    fn resolve(&self, packet: &Packet) -> Permission {
        match self {
            PermissionRule::Fixed(permission) => *permission,
            PermissionRule::PerPacket(resolve) => resolve(packet),
        }
    }
}

/// Registry entry.
#[derive(Clone)]
pub struct HandlerSpec {
    pub allowed: &'static [ClientType],
    pub permission: Option<PermissionRule>,
    /// Skip the whole gate, for handshakes and replies.
    pub allow_unauthorized: bool,
    pub handler: Handler,
}

type RegistryKey = (PacketCase, Option<SubCase>);

const PLAYERS: &[ClientType] = &[ClientType::Player];
const DASHBOARDS: &[ClientType] = &[ClientType::WebsocketConnection];
const CLIENTS: &[ClientType] = &[ClientType::Player, ClientType::WebsocketConnection];
const VIEWERS: &[ClientType] = &[
    ClientType::Player,
    ClientType::WebsocketConnection,
    ClientType::ReadOnly,
];
const EVERYONE: &[ClientType] = &[
    ClientType::Player,
    ClientType::WebsocketConnection,
    ClientType::TemporaryConnection,
    ClientType::ReadOnly,
];

/// Handler table built once at startup.
pub struct Registry {
    handlers: HashMap<RegistryKey, HandlerSpec>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `spec` for a (case, sub-case) pair, replacing any previous entry.
    pub fn register(&mut self, case: PacketCase, sub_case: Option<SubCase>, spec: HandlerSpec) -> &mut Self {
        self.handlers.insert((case, sub_case), spec);
        self
    }

    fn request(&mut self, kind: RequestKind, allowed: &'static [ClientType], permission: Option<Permission>, handler: Handler) {
        self.register(
            PacketCase::Request,
            Some(SubCase::Request(kind)),
            HandlerSpec {
                allowed,
                permission: permission.map(PermissionRule::Fixed),
                allow_unauthorized: false,
                handler,
            },
        );
    }

    fn event(&mut self, kind: EventKind, allowed: &'static [ClientType], permission: Option<Permission>, handler: Handler) {
        self.register(
            PacketCase::Event,
            Some(SubCase::Event(kind)),
            HandlerSpec {
                allowed,
                permission: permission.map(PermissionRule::Fixed),
                allow_unauthorized: false,
                handler,
            },
        );
    }

    fn command(&mut self, case: CommandCase, permission: PermissionRule) {
        self.register(
            PacketCase::Command,
            Some(SubCase::Command(case)),
            HandlerSpec {
                allowed: DASHBOARDS,
                permission: Some(permission),
                allow_unauthorized: false,
                handler: |s, c, p| Box::pin(relay::command(s, c, p)),
            },
        );
    }

    /// Every handler the server understands.
    pub fn standard() -> Self {
        use Permission as P;
        use RequestKind as R;

        let mut registry = Self::new();

        registry.register(
            PacketCase::Request,
            Some(SubCase::Request(R::Connect)),
            HandlerSpec {
                allowed: EVERYONE,
                permission: None,
                allow_unauthorized: true,
                handler: |s, c, p| Box::pin(requests::connect(s, c, p)),
            },
        );
        registry.register(
            PacketCase::Request,
            Some(SubCase::Request(R::GetServers)),
            HandlerSpec {
                allowed: EVERYONE,
                permission: None,
                allow_unauthorized: true,
                handler: |s, c, p| Box::pin(requests::get_servers(s, c, p)),
            },
        );
        registry.request(R::Join, VIEWERS, Some(P::JoinTournament), |s, c, p| {
            Box::pin(requests::join(s, c, p))
        });
        registry.request(R::GetTournaments, VIEWERS, None, |s, c, p| {
            Box::pin(requests::get_tournaments(s, c, p))
        });
        registry.request(R::GetQualifierScores, VIEWERS, Some(P::GetQualifierScores), |s, c, p| {
            Box::pin(requests::get_qualifier_scores(s, c, p))
        });
        registry.request(R::SubmitQualifierScore, PLAYERS, Some(P::SubmitQualifierScores), |s, c, p| {
            Box::pin(requests::submit_qualifier_score(s, c, p))
        });
        registry.request(R::RemainingAttempts, PLAYERS, Some(P::GetRemainingAttempts), |s, c, p| {
            Box::pin(requests::remaining_attempts(s, c, p))
        });
        registry.request(R::RefundAttempts, DASHBOARDS, Some(P::RefundAttempts), |s, c, p| {
            Box::pin(requests::refund_attempts(s, c, p))
        });
        registry.request(R::AddAuthorizedUser, DASHBOARDS, Some(P::AddAuthorizedUsers), |s, c, p| {
            Box::pin(requests::add_authorized_user(s, c, p))
        });
        registry.request(
            R::UpdateAuthorizedUserRoles,
            DASHBOARDS,
            Some(P::UpdateAuthorizedUserRoles),
            |s, c, p| Box::pin(requests::update_authorized_user_roles(s, c, p)),
        );
        registry.request(R::RemoveAuthorizedUser, DASHBOARDS, Some(P::RemoveAuthorizedUsers), |s, c, p| {
            Box::pin(requests::remove_authorized_user(s, c, p))
        });
        registry.request(R::GetAuthorizedUsers, DASHBOARDS, Some(P::GetAuthorizedUsers), |s, c, p| {
            Box::pin(requests::get_authorized_users(s, c, p))
        });
        registry.request(R::AddServer, DASHBOARDS, None, |s, c, p| {
            Box::pin(requests::add_server(s, c, p))
        });
        registry.request(R::ConvertWebsocketToken, CLIENTS, None, |s, c, p| {
            Box::pin(requests::convert_websocket_token(s, c, p))
        });
        registry.request(R::LoadSong, DASHBOARDS, Some(P::LoadSong), |s, c, p| {
            Box::pin(requests::forward_request(s, c, p))
        });
        registry.request(
            R::PreloadImageForStreamSync,
            DASHBOARDS,
            Some(P::PlayWithStreamSync),
            |s, c, p| Box::pin(requests::forward_request(s, c, p)),
        );

        register_events(&mut registry);

        registry.command(
            CommandCase::PlaySong,
            PermissionRule::PerPacket(relay::play_song_permission),
        );
        registry.command(CommandCase::ReturnToMenu, PermissionRule::Fixed(P::ReturnToMenu));
        registry.command(CommandCase::ModifyGameplay, PermissionRule::Fixed(P::ModifyGameplay));
        registry.command(CommandCase::DelayTestFinish, PermissionRule::Fixed(P::PlayWithStreamSync));
        registry.command(
            CommandCase::ShowColorForStreamSync,
            PermissionRule::Fixed(P::PlayWithStreamSync),
        );
        registry.command(
            CommandCase::StreamSyncShowImage,
            PermissionRule::Fixed(P::PlayWithStreamSync),
        );

        registry.register(
            PacketCase::Push,
            Some(SubCase::Push(PushKind::SongFinished)),
            HandlerSpec {
                allowed: PLAYERS,
                permission: None,
                allow_unauthorized: false,
                handler: |s, c, p| Box::pin(relay::song_finished(s, c, p)),
            },
        );
        registry.register(
            PacketCase::ForwardingPacket,
            None,
            HandlerSpec {
                allowed: CLIENTS,
                permission: None,
                allow_unauthorized: false,
                handler: |s, c, p| Box::pin(relay::forwarding_packet(s, c, p)),
            },
        );
        for case in [PacketCase::Acknowledgement, PacketCase::Response] {
            registry.register(
                case,
                None,
                HandlerSpec {
                    allowed: EVERYONE,
                    permission: None,
                    allow_unauthorized: true,
                    handler: |s, c, p| Box::pin(relay::reply(s, c, p)),
                },
            );
        }

        registry
    }

    /// Entry for a packet, if any.
    pub fn lookup(&self, packet: &Packet) -> Option<&HandlerSpec> {
        self.handlers.get(&(packet.case(), packet.sub_case()))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

fn register_events(registry: &mut Registry) {
    use EventKind as E;
    use Permission as P;

    registry.event(E::UpdateUser, CLIENTS, None, |s, c, p| Box::pin(events::update_user(s, c, p)));
    registry.event(E::CreateMatch, DASHBOARDS, Some(P::CreateMatch), |s, c, p| {
        Box::pin(events::create_match(s, c, p))
    });
    registry.event(E::AddUserToMatch, DASHBOARDS, Some(P::AddUserToMatch), |s, c, p| {
        Box::pin(events::edit_match(s, c, p))
    });
    registry.event(E::RemoveUserFromMatch, DASHBOARDS, Some(P::RemoveUserFromMatch), |s, c, p| {
        Box::pin(events::edit_match(s, c, p))
    });
    registry.event(E::SetMatchLeader, DASHBOARDS, Some(P::SetMatchLeader), |s, c, p| {
        Box::pin(events::edit_match(s, c, p))
    });
    registry.event(E::SetMatchMap, DASHBOARDS, Some(P::SetMatchMap), |s, c, p| {
        Box::pin(events::edit_match(s, c, p))
    });
    registry.event(E::DeleteMatch, DASHBOARDS, Some(P::DeleteMatch), |s, c, p| {
        Box::pin(events::delete_match(s, c, p))
    });

    registry.event(E::CreateQualifierEvent, DASHBOARDS, Some(P::CreateQualifier), |s, c, p| {
        Box::pin(events::create_qualifier(s, c, p))
    });
    for (kind, permission) in [
        (E::SetQualifierName, P::SetQualifierName),
        (E::SetQualifierImage, P::SetQualifierImage),
        (E::SetQualifierInfoChannel, P::SetQualifierInfoChannel),
        (E::SetQualifierFlags, P::SetQualifierFlags),
        (E::SetQualifierLeaderboardSort, P::SetQualifierLeaderboardSort),
        (E::AddQualifierMaps, P::AddQualifierMaps),
        (E::UpdateQualifierMap, P::UpdateQualifierMap),
        (E::RemoveQualifierMap, P::RemoveQualifierMap),
    ] {
        registry.event(kind, DASHBOARDS, Some(permission), |s, c, p| {
            Box::pin(events::edit_qualifier(s, c, p))
        });
    }
    registry.event(E::DeleteQualifierEvent, DASHBOARDS, Some(P::DeleteQualifier), |s, c, p| {
        Box::pin(events::delete_qualifier(s, c, p))
    });

    registry.event(E::CreateTournament, DASHBOARDS, None, |s, c, p| {
        Box::pin(events::create_tournament(s, c, p))
    });
    for (kind, permission) in [
        (E::SetTournamentName, P::SetTournamentName),
        (E::SetTournamentImage, P::SetTournamentImage),
        (E::SetTournamentPassword, P::SetTournamentPassword),
        (E::SetTournamentEnableTeams, P::SetTournamentEnableTeams),
        (E::SetTournamentAllowUnauthorizedView, P::SetTournamentAllowUnauthorizedView),
        (E::AddTournamentTeam, P::AddTournamentTeam),
        (E::SetTournamentTeamName, P::SetTournamentTeamName),
        (E::SetTournamentTeamImage, P::SetTournamentTeamImage),
        (E::RemoveTournamentTeam, P::RemoveTournamentTeam),
        (E::AddTournamentRole, P::AddTournamentRole),
        (E::RemoveTournamentRole, P::RemoveTournamentRole),
    ] {
        registry.event(kind, DASHBOARDS, Some(permission), |s, c, p| {
            Box::pin(events::edit_tournament(s, c, p))
        });
    }
    registry.event(E::DeleteTournament, DASHBOARDS, Some(P::DeleteTournament), |s, c, p| {
        Box::pin(events::delete_tournament(s, c, p))
    });
}

/// Run the gate for `spec` against the sender.
async fn authorize(state: &SharedState, spec: &HandlerSpec, ctx: &Context, packet: &Packet) -> Result<(), ServiceError> {
    if spec.allow_unauthorized {
        return Ok(());
    }

    let client_type = ctx.client_type()?;
    if !spec.allowed.contains(&client_type) {
        return Err(ServiceError::Unauthorized(format!(
            "{client_type:?} clients may not send this packet"
        )));
    }

    let Some(rule) = spec.permission else {
        return Ok(());
    };
    let permission = rule.resolve(packet);
    let Some(tournament_id) = packet.tournament_id() else {
        return Err(ServiceError::PermissionDenied(format!("{permission} needs a tournament")));
    };
    if authorization::has_permission(state, tournament_id, &ctx.identity, permission).await {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(permission.to_string()))
    }
}

/// Route one inbound packet. Returns the reply owed to the sender, if any.
///
/// Failures become Fail responses for packets that expect one; everything else
/// is logged and dropped.
pub async fn dispatch(state: &SharedState, ctx: Context, packet: Packet) -> Option<Response> {
    if matches!(packet.packet, PacketBody::Heartbeat) {
        return None;
    }

    let Some(spec) = state.registry().lookup(&packet).cloned() else {
        warn!(
            connection = %ctx.connection_id,
            case = ?packet.case(),
            sub_case = ?packet.sub_case(),
            "dropping packet without handler"
        );
        return None;
    };

    let packet_id = packet.id;
    let expects_response = packet.expects_response();

    if let Err(err) = authorize(state, &spec, &ctx, &packet).await {
        warn!(
            connection = %ctx.connection_id,
            case = ?packet.case(),
            sub_case = ?packet.sub_case(),
            error = %err,
            "packet rejected by authorization gate"
        );
        return expects_response.then(|| Response::fail(packet_id, err.fail_reason(), err.to_string()));
    }

    debug!(connection = %ctx.connection_id, case = ?packet.case(), sub_case = ?packet.sub_case(), "dispatching packet");
    let connection_id = ctx.connection_id;
    match (spec.handler)(state.clone(), ctx, packet).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(connection = %connection_id, error = %err, "handler failed");
            expects_response.then(|| Response::fail(packet_id, err.fail_reason(), err.to_string()))
        }
    }
}
