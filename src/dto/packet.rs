//! Wire envelope exchanged over websockets and mirrored by the REST surface.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{
        event::{Event, EventKind},
        push::{Push, PushKind},
        request::{Request, RequestKind},
        response::Response,
    },
    state::models::GameplayParameters,
};

/// Top-level envelope. Exactly one body variant is active.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Packet {
    pub id: Uuid,
    /// Sender identity. Rewritten by the server before relaying.
    pub from: Uuid,
    /// Bearer token identifying the sender, verified per packet.
    pub token: Option<String>,
    #[schema(value_type = Object)]
    pub packet: PacketBody,
}

/// Active variant of a [`Packet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketBody {
    Request(Request),
    Response(Response),
    Event(Event),
    Push(Push),
    ForwardingPacket(ForwardingPacket),
    Acknowledgement(Acknowledgement),
    Command(Command),
    Heartbeat,
}

/// Relay wrapper: the inner packet is delivered to `forward_to` unchanged apart from `from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForwardingPacket {
    pub forward_to: Vec<Uuid>,
    #[schema(value_type = Object)]
    pub packet: Box<Packet>,
}

/// Receipt confirmation for a previously sent packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Acknowledgement {
    pub packet_id: Uuid,
    #[serde(rename = "type")]
    pub kind: AcknowledgementType,
}

/// What is being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgementType {
    MessageReceived,
    FileDownloaded,
}

/// Instruction relayed to players after a permission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Command {
    pub tournament_id: Uuid,
    #[serde(default)]
    pub forward_to: Vec<Uuid>,
    pub command: CommandKind,
}

/// Command sub-union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    PlaySong { gameplay_parameters: GameplayParameters },
    ReturnToMenu,
    ModifyGameplay { modifiers: u32 },
    DelayTestFinish,
    ShowColorForStreamSync { color: String },
    StreamSyncShowImage,
}

/// Top-level discriminator of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketCase {
    Request,
    Response,
    Event,
    Push,
    ForwardingPacket,
    Acknowledgement,
    Command,
    Heartbeat,
}

/// Sub-case discriminator, present for sub-unions with registered handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubCase {
    Request(RequestKind),
    Event(EventKind),
    Push(PushKind),
    Command(CommandCase),
}

/// Discriminator of [`CommandKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCase {
    PlaySong,
    ReturnToMenu,
    ModifyGameplay,
    DelayTestFinish,
    ShowColorForStreamSync,
    StreamSyncShowImage,
}

impl CommandKind {
    /// Registry discriminator of this command.
    pub fn case(&self) -> CommandCase {
        match self {
            CommandKind::PlaySong { .. } => CommandCase::PlaySong,
            CommandKind::ReturnToMenu => CommandCase::ReturnToMenu,
            CommandKind::ModifyGameplay { .. } => CommandCase::ModifyGameplay,
            CommandKind::DelayTestFinish => CommandCase::DelayTestFinish,
            CommandKind::ShowColorForStreamSync { .. } => CommandCase::ShowColorForStreamSync,
            CommandKind::StreamSyncShowImage => CommandCase::StreamSyncShowImage,
        }
    }
}

impl Packet {
    /// New packet with a fresh id.
    pub fn new(from: Uuid, packet: PacketBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            token: None,
            packet,
        }
    }

    /// Wrap a response.
    pub fn response(from: Uuid, response: Response) -> Self {
        Self::new(from, PacketBody::Response(response))
    }

    /// Wrap an event.
    pub fn event(from: Uuid, event: Event) -> Self {
        Self::new(from, PacketBody::Event(event))
    }

    /// Wrap a push.
    pub fn push(from: Uuid, push: Push) -> Self {
        Self::new(from, PacketBody::Push(push))
    }

    /// Decode a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode into a text frame.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Top-level discriminator.
    pub fn case(&self) -> PacketCase {
        match &self.packet {
            PacketBody::Request(_) => PacketCase::Request,
            PacketBody::Response(_) => PacketCase::Response,
            PacketBody::Event(_) => PacketCase::Event,
            PacketBody::Push(_) => PacketCase::Push,
            PacketBody::ForwardingPacket(_) => PacketCase::ForwardingPacket,
            PacketBody::Acknowledgement(_) => PacketCase::Acknowledgement,
            PacketBody::Command(_) => PacketCase::Command,
            PacketBody::Heartbeat => PacketCase::Heartbeat,
        }
    }

    /// Sub-case discriminator, `None` for unions routed by top-level case only.
    pub fn sub_case(&self) -> Option<SubCase> {
        match &self.packet {
            PacketBody::Request(request) => Some(SubCase::Request(request.kind())),
            PacketBody::Event(event) => Some(SubCase::Event(event.kind())),
            PacketBody::Push(push) => Some(SubCase::Push(push.kind())),
            PacketBody::Command(command) => Some(SubCase::Command(command.command.case())),
            PacketBody::Response(_)
            | PacketBody::ForwardingPacket(_)
            | PacketBody::Acknowledgement(_)
            | PacketBody::Heartbeat => None,
        }
    }

    /// Tournament named by the packet, used for permission resolution.
    pub fn tournament_id(&self) -> Option<Uuid> {
        match &self.packet {
            PacketBody::Request(request) => request.tournament_id(),
            PacketBody::Event(event) => event.tournament_id(),
            PacketBody::Push(push) => Some(push.tournament_id()),
            PacketBody::Command(command) => Some(command.tournament_id),
            PacketBody::ForwardingPacket(forwarding) => forwarding.packet.tournament_id(),
            PacketBody::Response(_) | PacketBody::Acknowledgement(_) | PacketBody::Heartbeat => None,
        }
    }

    /// Whether the sender waits for a Response to this packet.
    pub fn expects_response(&self) -> bool {
        match &self.packet {
            PacketBody::Request(_) => true,
            PacketBody::Event(event) => event.kind().is_mutation(),
            _ => false,
        }
    }
}

impl EventKind {
    /// Imperative events are mutation requests and are answered with a Response.
    pub fn is_mutation(self) -> bool {
        !matches!(
            self,
            EventKind::UserAdded
                | EventKind::UserUpdated
                | EventKind::UserLeft
                | EventKind::MatchCreated
                | EventKind::MatchUpdated
                | EventKind::MatchDeleted
                | EventKind::QualifierCreated
                | EventKind::QualifierUpdated
                | EventKind::QualifierDeleted
                | EventKind::TournamentCreated
                | EventKind::TournamentUpdated
                | EventKind::TournamentDeleted
                | EventKind::ServerAdded
                | EventKind::ServerDeleted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dto::response::{FailReason, ResponseDetails},
        state::{
            models::{
                ClientType, CoreServer, LeaderboardEntry, Map, Match, QualifierEvent, QualifierScore,
                State, Team, User,
            },
            permissions::{AuthorizedUser, Permission, Role},
        },
    };

    fn user() -> User {
        let mut user = User::new(Uuid::new_v4(), "Player One", ClientType::Player);
        user.platform_id = "76561198000000000".into();
        user
    }

    fn score() -> QualifierScore {
        QualifierScore {
            event_id: Uuid::new_v4(),
            map_id: Uuid::new_v4(),
            platform_id: "76561198000000000".into(),
            username: "Player One".into(),
            modified_score: 812_345,
            accuracy: 0.9731,
            full_combo: true,
            ..Default::default()
        }
    }

    fn qualifier() -> QualifierEvent {
        QualifierEvent {
            guid: Uuid::new_v4(),
            name: "Week 1".into(),
            image: None,
            info_channel: None,
            flags: Default::default(),
            sort: Default::default(),
            maps: vec![Map::new(GameplayParameters::default())],
        }
    }

    fn hub() -> CoreServer {
        CoreServer {
            name: "hub".into(),
            address: "hub.example.net".into(),
            port: 8675,
            websocket_port: 8676,
        }
    }

    fn every_variant() -> Vec<Packet> {
        let sender = Uuid::new_v4();
        let tournament_id = Uuid::new_v4();
        let inner = Packet::new(sender, PacketBody::Heartbeat);
        vec![
            Packet::new(sender, PacketBody::Request(Request::Connect { client_version: 1 })),
            Packet::new(
                sender,
                PacketBody::Request(Request::SubmitQualifierScore {
                    tournament_id,
                    score: score(),
                }),
            ),
            Packet::response(
                sender,
                Response::success(
                    inner.id,
                    ResponseDetails::Connect {
                        server_version: 1,
                        state: Some(State {
                            tournaments: vec![],
                            known_servers: vec![hub()],
                        }),
                    },
                ),
            ),
            Packet::new(
                sender,
                PacketBody::Request(Request::RemainingAttempts {
                    tournament_id,
                    map_id: Uuid::new_v4(),
                }),
            ),
            Packet::new(
                sender,
                PacketBody::Request(Request::RefundAttempts {
                    tournament_id,
                    map_id: Uuid::new_v4(),
                    platform_id: "76561198000000000".into(),
                    count: 2,
                }),
            ),
            Packet::new(
                sender,
                PacketBody::Request(Request::AddAuthorizedUser {
                    tournament_id,
                    identity: "76561198000000000".into(),
                    role_ids: vec!["player".into()],
                }),
            ),
            Packet::new(
                sender,
                PacketBody::Request(Request::UpdateAuthorizedUserRoles {
                    tournament_id,
                    identity: "76561198000000000".into(),
                    role_ids: vec!["player".into(), "coordinator".into()],
                }),
            ),
            Packet::new(
                sender,
                PacketBody::Request(Request::RemoveAuthorizedUser {
                    tournament_id,
                    identity: "76561198000000000".into(),
                }),
            ),
            Packet::new(sender, PacketBody::Request(Request::GetAuthorizedUsers { tournament_id })),
            Packet::new(
                sender,
                PacketBody::Request(Request::AddServer {
                    server: hub(),
                    auth_token: Some("peer-token".into()),
                }),
            ),
            Packet::response(
                sender,
                Response::fail(inner.id, FailReason::IncorrectPassword, "nope"),
            ),
            Packet::response(
                sender,
                Response::success(inner.id, ResponseDetails::RemainingAttempts { remaining_attempts: 3 }),
            ),
            Packet::response(
                sender,
                Response::success(
                    inner.id,
                    ResponseDetails::AuthorizedUsers {
                        users: vec![AuthorizedUser {
                            tournament_id,
                            identity: "76561198000000000".into(),
                            role_ids: vec!["admin".into()],
                            status: Default::default(),
                        }],
                    },
                ),
            ),
            Packet::event(
                sender,
                Event::AddTournamentRole {
                    tournament_id,
                    role: Role {
                        role_id: "judge".into(),
                        name: "Judge".into(),
                        tournament_id,
                        permissions: vec![Permission::SeeHiddenQualifierScores, Permission::RefundAttempts],
                    },
                },
            ),
            Packet::event(
                sender,
                Event::AddTournamentTeam {
                    tournament_id,
                    team: Team {
                        guid: Uuid::new_v4(),
                        name: "Red".into(),
                        image: Some("red.png".into()),
                    },
                },
            ),
            Packet::event(
                sender,
                Event::SetTournamentAllowUnauthorizedView {
                    tournament_id,
                    allow_unauthorized_view: true,
                },
            ),
            Packet::event(sender, Event::ServerAdded { server: hub() }),
            Packet::response(
                sender,
                Response::success(
                    inner.id,
                    ResponseDetails::LeaderboardEntries {
                        scores: vec![LeaderboardEntry {
                            score: score(),
                            color: "#ffffff".into(),
                        }],
                    },
                ),
            ),
            Packet::event(
                sender,
                Event::UserAdded {
                    tournament_id,
                    user: user(),
                },
            ),
            Packet::event(
                sender,
                Event::CreateMatch {
                    tournament_id,
                    game_match: Match {
                        guid: Uuid::new_v4(),
                        leader: sender,
                        associated_users: vec![sender],
                        selected_map: None,
                    },
                },
            ),
            Packet::push(
                sender,
                Push::QualifierScoreSubmitted {
                    tournament_id,
                    event: qualifier(),
                    map: Map::new(GameplayParameters::default()),
                    score: score(),
                    leaderboard: vec![],
                },
            ),
            Packet::new(
                sender,
                PacketBody::ForwardingPacket(ForwardingPacket {
                    forward_to: vec![Uuid::new_v4()],
                    packet: Box::new(inner.clone()),
                }),
            ),
            Packet::new(
                sender,
                PacketBody::Acknowledgement(Acknowledgement {
                    packet_id: inner.id,
                    kind: AcknowledgementType::FileDownloaded,
                }),
            ),
            Packet::new(
                sender,
                PacketBody::Command(Command {
                    tournament_id,
                    forward_to: vec![Uuid::new_v4()],
                    command: CommandKind::ShowColorForStreamSync {
                        color: "#00ff00".into(),
                    },
                }),
            ),
            inner,
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        for packet in every_variant() {
            let text = packet.to_json_string().unwrap();
            let decoded = Packet::from_json_str(&text).unwrap();
            assert_eq!(decoded, packet, "round trip failed for {text}");
        }
    }

    #[test]
    fn request_wire_shape_is_tagged() {
        let packet = Packet::new(Uuid::nil(), PacketBody::Request(Request::GetServers));
        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(value["packet"]["request"]["type"], "get_servers");
        assert!(value.get("token").is_none());
    }

    #[test]
    fn registry_keys() {
        let packet = Packet::new(
            Uuid::nil(),
            PacketBody::Request(Request::Join {
                tournament_id: Uuid::nil(),
                password: String::new(),
                mod_list: vec![],
            }),
        );
        assert_eq!(packet.case(), PacketCase::Request);
        assert_eq!(packet.sub_case(), Some(SubCase::Request(RequestKind::Join)));
        assert_eq!(packet.tournament_id(), Some(Uuid::nil()));
        assert!(packet.expects_response());

        let heartbeat = Packet::new(Uuid::nil(), PacketBody::Heartbeat);
        assert_eq!(heartbeat.sub_case(), None);
        assert!(!heartbeat.expects_response());
    }

    #[test]
    fn notification_events_expect_no_response() {
        let packet = Packet::event(
            Uuid::nil(),
            Event::UserLeft {
                tournament_id: Uuid::nil(),
                user: user(),
            },
        );
        assert!(!packet.expects_response());
    }

    #[test]
    fn unknown_shapes_fail_to_decode() {
        let text = r#"{"id":"00000000-0000-0000-0000-000000000000","from":"00000000-0000-0000-0000-000000000000","packet":{"request":{"type":"teleport"}}}"#;
        assert!(Packet::from_json_str(text).is_err());
    }
}
