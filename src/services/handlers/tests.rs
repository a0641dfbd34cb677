//! End-to-end handler checks through the dispatcher.

use std::{sync::Arc, time::Duration};

use futures::{FutureExt, StreamExt, future::BoxFuture};
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    dao::tournament_store::memory::MemoryStore,
    dto::{
        event::Event,
        packet::{Packet, PacketBody},
        request::Request,
        response::{FailReason, Response, ResponseDetails},
    },
    services::{
        authorization,
        dispatcher::{self, Context, Transport},
        mesh::{MeshError, PeerProbe, load_directory, tests as mesh_tests},
        messaging::LogSink,
    },
    state::{
        AppState, SharedState,
        connections::Identity,
        models::{
            ClientType, CoreServer, GameplayParameters, Map, Match, QualifierEvent, QualifierFlags,
            QualifierScore, State, Team, Tournament, TournamentSettings, User,
        },
        permissions::{Permission, default_roles},
        tests::app_state,
    },
};

fn identity(client_type: ClientType, platform_id: &str) -> Identity {
    Identity {
        client_type: Some(client_type),
        platform_id: platform_id.into(),
        name: platform_id.into(),
        discord_id: None,
    }
}

fn dashboard() -> Identity {
    identity(ClientType::WebsocketConnection, "admin-1")
}

fn player(platform_id: &str) -> Identity {
    identity(ClientType::Player, platform_id)
}

async fn send(state: &SharedState, connection_id: Uuid, identity: Identity, body: PacketBody) -> Option<Response> {
    let ctx = Context {
        connection_id,
        identity,
        transport: Transport::Websocket,
    };
    dispatcher::dispatch(state, ctx, Packet::new(connection_id, body)).await
}

/// Create a tournament as the dashboard and return its id.
async fn create_tournament(state: &SharedState, name: &str, password: &str) -> Uuid {
    let tournament = Tournament {
        guid: Uuid::new_v4(),
        settings: Some(TournamentSettings {
            tournament_name: name.into(),
            password_hash: password.into(),
            ..TournamentSettings::default()
        }),
        users: Vec::new(),
        matches: Vec::new(),
        qualifiers: Vec::new(),
        server: None,
    };
    let tournament_id = tournament.guid;
    let reply = send(
        state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::CreateTournament { tournament }),
    )
    .await
    .unwrap();
    assert!(reply.is_success(), "{reply:?}");
    tournament_id
}

async fn grant(state: &SharedState, tournament_id: Uuid, platform_id: &str, role: &str) {
    let reply = send(
        state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Request(Request::AddAuthorizedUser {
            tournament_id,
            identity: platform_id.into(),
            role_ids: vec![role.into()],
        }),
    )
    .await
    .unwrap();
    assert!(reply.is_success(), "{reply:?}");
}

#[tokio::test]
async fn join_checks_the_tournament_password() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Locked Cup", "abc123").await;
    grant(&state, tournament_id, "p1", default_roles::PLAYER).await;
    let connection = Uuid::new_v4();

    let join = |password: &str| {
        PacketBody::Request(Request::Join {
            tournament_id,
            password: password.into(),
            mod_list: Vec::new(),
        })
    };

    let reply = send(&state, connection, player("p1"), join("wrong")).await.unwrap();
    assert_eq!(reply.reason, Some(FailReason::IncorrectPassword));
    assert!(state.manager().users(tournament_id).await.is_empty());

    let reply = send(&state, connection, player("p1"), join("abc123")).await.unwrap();
    assert!(reply.is_success());
    assert_eq!(reply.message.as_deref(), Some("Connected to Locked Cup!"));
    let ResponseDetails::Join { self_guid, .. } = reply.details else {
        panic!("expected join details");
    };
    assert_eq!(self_guid, connection);

    let users = state.manager().users(tournament_id).await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].guid, connection);
    assert_eq!(users[0].platform_id, "p1");
}

#[tokio::test]
async fn match_created_then_deleted_leaves_nothing_behind() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    let mut events = state.manager().subscribe();

    let game_match = Match {
        guid: Uuid::new_v4(),
        leader: Uuid::new_v4(),
        associated_users: Vec::new(),
        selected_map: None,
    };
    let match_id = game_match.guid;

    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::CreateMatch {
            tournament_id,
            game_match,
        }),
    )
    .await
    .unwrap();
    assert!(reply.is_success());

    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::DeleteMatch {
            tournament_id,
            match_id,
        }),
    )
    .await
    .unwrap();
    assert!(reply.is_success());

    assert!(state.manager().matches(tournament_id).await.is_empty());
    assert!(matches!(
        events.next().await,
        Some(Ok(Event::MatchCreated { game_match, .. })) if game_match.guid == match_id
    ));
    assert!(matches!(
        events.next().await,
        Some(Ok(Event::MatchDeleted { game_match, .. })) if game_match.guid == match_id
    ));
    assert!(events.next().now_or_never().is_none());
}

#[tokio::test]
async fn deleting_an_unknown_match_fails() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::DeleteMatch {
            tournament_id,
            match_id: Uuid::new_v4(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(reply.reason, Some(FailReason::NotFound));
}

#[tokio::test]
async fn creator_administers_the_new_tournament() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "secret").await;

    let settings = state.manager().settings(tournament_id).await.unwrap();
    assert_ne!(settings.password_hash, "secret");
    assert!(settings.roles.iter().any(|role| role.role_id == default_roles::ADMIN));
    assert!(settings.roles.iter().any(|role| role.role_id == default_roles::PLAYER));

    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Request(Request::GetAuthorizedUsers { tournament_id }),
    )
    .await
    .unwrap();
    let ResponseDetails::AuthorizedUsers { users } = reply.details else {
        panic!("expected roster");
    };
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].identity, "admin-1");
    assert_eq!(users[0].role_ids, vec![default_roles::ADMIN.to_string()]);
}

#[tokio::test]
async fn unknown_roles_are_refused() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Request(Request::AddAuthorizedUser {
            tournament_id,
            identity: "p9".into(),
            role_ids: vec!["emperor".into()],
        }),
    )
    .await
    .unwrap();
    assert_eq!(reply.reason, Some(FailReason::InvalidInput));
}

#[tokio::test]
async fn tournament_list_only_shows_permitted_tournaments() {
    let (state, _) = app_state();
    let open = create_tournament(&state, "Open Cup", "").await;
    let hidden = create_tournament(&state, "Hidden Cup", "").await;
    grant(&state, open, "p1", default_roles::PLAYER).await;

    let reply = send(
        &state,
        Uuid::new_v4(),
        player("p1"),
        PacketBody::Request(Request::GetTournaments),
    )
    .await
    .unwrap();
    let ResponseDetails::Tournaments { tournaments } = reply.details else {
        panic!("expected tournaments");
    };
    assert_eq!(tournaments.len(), 1);
    assert_eq!(tournaments[0].guid, open);
    assert!(tournaments.iter().all(|tournament| tournament.guid != hidden));
    let permissions = &tournaments[0].settings.as_ref().unwrap().my_permissions;
    assert!(permissions.iter().any(|permission| permission == "tournament:join"));
}

#[tokio::test]
async fn players_only_update_themselves() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    let me = Uuid::new_v4();
    let other = Uuid::new_v4();
    for guid in [me, other] {
        state
            .manager()
            .add_user(tournament_id, User::new(guid, "someone", ClientType::Player))
            .await
            .unwrap();
    }

    let rename = |guid: Uuid| {
        let mut user = User::new(guid, "renamed", ClientType::WebsocketConnection);
        user.platform_id = "forged".into();
        PacketBody::Event(Event::UpdateUser { tournament_id, user })
    };

    let reply = send(&state, me, player("p1"), rename(other)).await.unwrap();
    assert_eq!(reply.reason, Some(FailReason::PermissionDenied));

    let reply = send(&state, me, player("p1"), rename(me)).await.unwrap();
    assert!(reply.is_success());
    let updated = state.manager().user(tournament_id, me).await.unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.client_type, ClientType::Player);
    assert!(updated.platform_id.is_empty());
}

#[tokio::test]
async fn update_after_leaving_is_a_conflict() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    let gone = Uuid::new_v4();
    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::UpdateUser {
            tournament_id,
            user: User::new(gone, "ghost", ClientType::Player),
        }),
    )
    .await
    .unwrap();
    assert_eq!(reply.reason, Some(FailReason::Conflict));
    assert!(state.manager().user(tournament_id, gone).await.is_none());
}

#[tokio::test]
async fn rest_forwarding_is_acknowledged() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    let ctx = Context {
        connection_id: Uuid::new_v4(),
        identity: dashboard(),
        transport: Transport::Rest,
    };
    let packet = Packet::new(
        ctx.connection_id,
        PacketBody::Request(Request::LoadSong {
            tournament_id,
            level_id: "custom_level_1".into(),
            forward_to: vec![Uuid::new_v4()],
        }),
    );
    let reply = dispatcher::dispatch(&state, ctx, packet).await.unwrap();
    assert!(reply.is_success());
    assert_eq!(reply.message.as_deref(), Some("forwarded"));
}

/// Qualifier with one map, returning (qualifier id, map id).
async fn create_qualifier(state: &SharedState, tournament_id: Uuid, hide_scores_from_players: bool) -> (Uuid, Uuid) {
    let map = Map::new(GameplayParameters::default());
    let map_id = map.guid;
    let event = QualifierEvent {
        guid: Uuid::new_v4(),
        name: "Week 1".into(),
        image: None,
        info_channel: None,
        flags: QualifierFlags {
            hide_scores_from_players,
            ..QualifierFlags::default()
        },
        sort: Default::default(),
        maps: vec![map],
    };
    let qualifier_id = event.guid;
    state.manager().create_qualifier(tournament_id, event).await.unwrap();
    (qualifier_id, map_id)
}

fn submission(tournament_id: Uuid, qualifier_id: Uuid, map_id: Uuid, modified_score: i64) -> PacketBody {
    PacketBody::Request(Request::SubmitQualifierScore {
        tournament_id,
        score: QualifierScore {
            event_id: qualifier_id,
            map_id,
            username: "someone".into(),
            modified_score,
            ..QualifierScore::default()
        },
    })
}

fn leaderboard_len(reply: Response) -> usize {
    assert!(reply.is_success(), "{reply:?}");
    let ResponseDetails::LeaderboardEntries { scores } = reply.details else {
        panic!("expected leaderboard entries");
    };
    scores.len()
}

#[tokio::test]
async fn hidden_scores_are_withheld_from_players() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    grant(&state, tournament_id, "p1", default_roles::PLAYER).await;
    grant(&state, tournament_id, "p2", default_roles::PLAYER).await;
    let (qualifier_id, map_id) = create_qualifier(&state, tournament_id, true).await;

    let reply = send(&state, Uuid::new_v4(), player("p1"), submission(tournament_id, qualifier_id, map_id, 90))
        .await
        .unwrap();
    assert_eq!(leaderboard_len(reply), 0);
    let reply = send(&state, Uuid::new_v4(), player("p2"), submission(tournament_id, qualifier_id, map_id, 80))
        .await
        .unwrap();
    assert_eq!(leaderboard_len(reply), 0);

    let scores = PacketBody::Request(Request::GetQualifierScores {
        tournament_id,
        qualifier_id,
        map_id: Some(map_id),
    });
    let reply = send(&state, Uuid::new_v4(), player("p1"), scores.clone()).await.unwrap();
    assert_eq!(leaderboard_len(reply), 0);

    let reply = send(&state, Uuid::new_v4(), dashboard(), scores).await.unwrap();
    assert_eq!(leaderboard_len(reply), 2);
}

#[tokio::test]
async fn visible_scores_reach_players() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    grant(&state, tournament_id, "p1", default_roles::PLAYER).await;
    let (qualifier_id, map_id) = create_qualifier(&state, tournament_id, false).await;

    let reply = send(&state, Uuid::new_v4(), player("p1"), submission(tournament_id, qualifier_id, map_id, 90))
        .await
        .unwrap();
    assert_eq!(leaderboard_len(reply), 1);

    let reply = send(
        &state,
        Uuid::new_v4(),
        player("p1"),
        PacketBody::Request(Request::GetQualifierScores {
            tournament_id,
            qualifier_id,
            map_id: Some(map_id),
        }),
    )
    .await
    .unwrap();
    assert_eq!(leaderboard_len(reply), 1);
}

#[tokio::test]
async fn removed_maps_release_their_score_locks() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Cup", "").await;
    grant(&state, tournament_id, "p1", default_roles::PLAYER).await;
    let (first_qualifier, first_map) = create_qualifier(&state, tournament_id, false).await;
    let (second_qualifier, second_map) = create_qualifier(&state, tournament_id, false).await;

    for (qualifier_id, map_id) in [(first_qualifier, first_map), (second_qualifier, second_map)] {
        let reply = send(&state, Uuid::new_v4(), player("p1"), submission(tournament_id, qualifier_id, map_id, 70))
            .await
            .unwrap();
        assert!(reply.is_success(), "{reply:?}");
    }
    assert_eq!(state.score_lock_count(), 2);

    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::RemoveQualifierMap {
            tournament_id,
            qualifier_id: first_qualifier,
            map_id: first_map,
        }),
    )
    .await
    .unwrap();
    assert!(reply.is_success(), "{reply:?}");
    assert_eq!(state.score_lock_count(), 1);

    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::DeleteQualifierEvent {
            tournament_id,
            qualifier_id: second_qualifier,
        }),
    )
    .await
    .unwrap();
    assert!(reply.is_success(), "{reply:?}");
    assert_eq!(state.score_lock_count(), 0);
}

#[tokio::test]
async fn unauthorized_view_opens_the_player_role_to_strangers() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Open Cup", "").await;
    let stranger = player("stranger");
    assert!(!authorization::has_permission(&state, tournament_id, &stranger, Permission::JoinTournament).await);

    let allow = |allow_unauthorized_view| {
        PacketBody::Event(Event::SetTournamentAllowUnauthorizedView {
            tournament_id,
            allow_unauthorized_view,
        })
    };
    let reply = send(&state, Uuid::new_v4(), dashboard(), allow(true)).await.unwrap();
    assert!(reply.is_success(), "{reply:?}");
    assert!(state.manager().settings(tournament_id).await.unwrap().allow_unauthorized_view);
    assert!(authorization::has_permission(&state, tournament_id, &stranger, Permission::JoinTournament).await);
    assert!(!authorization::has_permission(&state, tournament_id, &stranger, Permission::DeleteMatch).await);

    let reply = send(&state, Uuid::new_v4(), player("stranger"), allow(false)).await.unwrap();
    assert_eq!(reply.reason, Some(FailReason::Unauthorized));

    let reply = send(&state, Uuid::new_v4(), dashboard(), allow(false)).await.unwrap();
    assert!(reply.is_success());
    assert!(!authorization::has_permission(&state, tournament_id, &stranger, Permission::JoinTournament).await);
}

#[tokio::test]
async fn teams_are_added_renamed_and_removed() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Team Cup", "").await;
    let mut events = state.manager().subscribe();
    let teams = move |state: SharedState| async move {
        state.manager().settings(tournament_id).await.unwrap().teams
    };

    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::SetTournamentEnableTeams {
            tournament_id,
            enable_teams: true,
        }),
    )
    .await
    .unwrap();
    assert!(reply.is_success());
    assert!(state.manager().settings(tournament_id).await.unwrap().enable_teams);

    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::AddTournamentTeam {
            tournament_id,
            team: Team {
                guid: Uuid::nil(),
                name: "Red".into(),
                image: None,
            },
        }),
    )
    .await
    .unwrap();
    assert!(reply.is_success(), "{reply:?}");
    let added = teams(state.clone()).await;
    assert_eq!(added.len(), 1);
    let team_id = added[0].guid;
    assert!(!team_id.is_nil());

    for body in [
        Event::SetTournamentTeamName {
            tournament_id,
            team_id,
            name: "Blue".into(),
        },
        Event::SetTournamentTeamImage {
            tournament_id,
            team_id,
            image: "blue.png".into(),
        },
    ] {
        let reply = send(&state, Uuid::new_v4(), dashboard(), PacketBody::Event(body)).await.unwrap();
        assert!(reply.is_success(), "{reply:?}");
    }
    assert_eq!(
        teams(state.clone()).await,
        vec![Team {
            guid: team_id,
            name: "Blue".into(),
            image: Some("blue.png".into()),
        }]
    );

    let remove = PacketBody::Event(Event::RemoveTournamentTeam { tournament_id, team_id });
    let reply = send(&state, Uuid::new_v4(), dashboard(), remove.clone()).await.unwrap();
    assert!(reply.is_success());
    assert!(teams(state.clone()).await.is_empty());
    let reply = send(&state, Uuid::new_v4(), dashboard(), remove).await.unwrap();
    assert_eq!(reply.reason, Some(FailReason::NotFound));

    let mut updates = 0;
    while let Some(Some(Ok(event))) = events.next().now_or_never() {
        assert!(matches!(event, Event::TournamentUpdated { .. }));
        updates += 1;
    }
    assert_eq!(updates, 5);
}

#[tokio::test]
async fn renaming_an_unknown_team_fails() {
    let (state, _) = app_state();
    let tournament_id = create_tournament(&state, "Team Cup", "").await;
    let reply = send(
        &state,
        Uuid::new_v4(),
        dashboard(),
        PacketBody::Event(Event::SetTournamentTeamName {
            tournament_id,
            team_id: Uuid::new_v4(),
            name: "Ghost".into(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(reply.reason, Some(FailReason::NotFound));
}

/// Peer that turns the handshake down.
struct RejectingProbe;

impl PeerProbe for RejectingProbe {
    fn fetch_state(&self, server: CoreServer, _token: Option<String>) -> BoxFuture<'static, Result<State, MeshError>> {
        Box::pin(async move {
            Err(MeshError::Rejected {
                endpoint: server.endpoint(),
                message: "token required".into(),
            })
        })
    }
}

fn mesh_state(probe: Arc<dyn PeerProbe>, known_hosts: &std::path::Path) -> SharedState {
    let mut config = ServerConfig::default();
    config.token_secret = "test-secret".into();
    config.known_hosts_path = known_hosts.join("knownHosts.json");
    config.discovery.peer_timeout = Duration::from_millis(200);
    AppState::with_store_and_probe(config, Arc::new(MemoryStore::new()), Arc::new(LogSink), probe)
}

fn add_server_request(server: &CoreServer) -> PacketBody {
    PacketBody::Request(Request::AddServer {
        server: server.clone(),
        auth_token: None,
    })
}

#[tokio::test]
async fn reachable_server_is_listed_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let peer = mesh_tests::server("peer.example");
    let state = mesh_state(Arc::new(mesh_tests::FakeProbe::new([(peer.clone(), vec![])])), dir.path());
    let mut events = state.manager().subscribe();

    let reply = send(&state, Uuid::new_v4(), dashboard(), add_server_request(&peer)).await.unwrap();
    assert!(reply.is_success(), "{reply:?}");
    assert_eq!(reply.message.as_deref(), Some("Server added to the master list!"));
    assert_eq!(state.manager().servers().await, vec![peer.clone()]);
    assert_eq!(load_directory(&state.config().known_hosts_path).await.unwrap(), vec![peer.clone()]);
    assert!(matches!(
        events.next().await,
        Some(Ok(Event::ServerAdded { server })) if server == peer
    ));

    let reply = send(&state, Uuid::new_v4(), dashboard(), add_server_request(&peer)).await.unwrap();
    assert!(reply.is_success());
    assert_eq!(state.manager().servers().await.len(), 1);
}

#[tokio::test]
async fn rejected_or_silent_servers_are_not_listed() {
    let dir = tempfile::tempdir().unwrap();
    let peer = mesh_tests::server("peer.example");

    let state = mesh_state(Arc::new(RejectingProbe), dir.path());
    let reply = send(&state, Uuid::new_v4(), dashboard(), add_server_request(&peer)).await.unwrap();
    assert_eq!(reply.reason, Some(FailReason::Unauthorized));
    assert!(state.manager().servers().await.is_empty());

    let state = mesh_state(Arc::new(mesh_tests::FakeProbe::default()), dir.path());
    let reply = send(&state, Uuid::new_v4(), dashboard(), add_server_request(&peer)).await.unwrap();
    assert_eq!(reply.reason, Some(FailReason::NotFound));
    assert!(state.manager().servers().await.is_empty());
    assert!(load_directory(&state.config().known_hosts_path).await.unwrap().is_empty());
}
