//! Packets the server only relays: commands, forwarding wrappers, pushes and replies.

use tracing::{debug, warn};

use crate::{
    dto::{
        packet::{Command, CommandKind, Packet, PacketBody},
        push::Push,
    },
    error::ServiceError,
    services::dispatcher::{Context, HandlerResult},
    state::{SharedState, connections::PacketSink, permissions::Permission},
};

use super::unexpected;

/// Playing with stream sync needs its own permission.
pub fn play_song_permission(packet: &Packet) -> Permission {
    match &packet.packet {
        PacketBody::Command(Command {
            command: CommandKind::PlaySong { gameplay_parameters },
            ..
        }) if gameplay_parameters.use_sync => Permission::PlayWithStreamSync,
        _ => Permission::PlaySong,
    }
}

/// Copy of `packet` as relayed on behalf of `ctx`: sender rewritten, credentials stripped.
fn relayed(ctx: &Context, packet: Packet) -> Packet {
    Packet {
        from: ctx.connection_id,
        token: None,
        ..packet
    }
}

pub async fn command(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Command(Command { ref forward_to, .. }) = packet.packet else {
        return Err(unexpected(&packet));
    };
    let recipients = forward_to.clone();
    if recipients.is_empty() {
        debug!(connection = %ctx.connection_id, "command without recipients");
        return Ok(None);
    }

    let packet = relayed(&ctx, packet);
    state.connections().send_to(&recipients, &packet);
    debug!(connection = %ctx.connection_id, recipients = recipients.len(), "command relayed");
    Ok(None)
}

pub async fn forwarding_packet(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::ForwardingPacket(forwarding) = packet.packet else {
        return Err(unexpected(&packet));
    };
    let inner = relayed(&ctx, *forwarding.packet);
    state.connections().send_to(&forwarding.forward_to, &inner);
    Ok(None)
}

/// Fan a player's song result out to the rest of the tournament.
pub async fn song_finished(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    let PacketBody::Push(Push::SongFinished { tournament_id, .. }) = &packet.packet else {
        return Err(unexpected(&packet));
    };
    let tournament_id = *tournament_id;

    let members = state.manager().member_ids(tournament_id).await;
    if !members.contains(&ctx.connection_id) {
        return Err(ServiceError::PermissionDenied(format!(
            "connection is not part of tournament {tournament_id}"
        )));
    }
    let recipients: Vec<_> = members.into_iter().filter(|id| *id != ctx.connection_id).collect();
    state.connections().send_to(&recipients, &relayed(&ctx, packet));
    Ok(None)
}

/// Hand inbound responses and acknowledgements to local observers.
pub async fn reply(state: SharedState, ctx: Context, packet: Packet) -> HandlerResult {
    if !matches!(
        packet.packet,
        PacketBody::Response(_) | PacketBody::Acknowledgement(_)
    ) {
        warn!(connection = %ctx.connection_id, "reply handler got another packet shape");
        return Ok(None);
    }
    state.publish_reply(relayed(&ctx, packet));
    Ok(None)
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        dto::packet::{Acknowledgement, AcknowledgementType, ForwardingPacket},
        services::dispatcher::Transport,
        state::{
            connections::{ConnectionHandle, Identity},
            models::{ClientType, GameplayParameters},
            tests::app_state,
        },
    };

    fn context() -> Context {
        Context {
            connection_id: Uuid::new_v4(),
            identity: Identity {
                client_type: Some(ClientType::WebsocketConnection),
                platform_id: "dash".into(),
                name: "Dashboard".into(),
                discord_id: None,
            },
            transport: Transport::Websocket,
        }
    }

    fn play_song(use_sync: bool) -> Packet {
        Packet::new(
            Uuid::nil(),
            PacketBody::Command(Command {
                tournament_id: Uuid::nil(),
                forward_to: vec![],
                command: CommandKind::PlaySong {
                    gameplay_parameters: GameplayParameters {
                        use_sync,
                        ..Default::default()
                    },
                },
            }),
        )
    }

    #[test]
    fn stream_sync_changes_required_permission() {
        assert_eq!(play_song_permission(&play_song(false)), Permission::PlaySong);
        assert_eq!(play_song_permission(&play_song(true)), Permission::PlayWithStreamSync);
    }

    #[tokio::test]
    async fn forwarding_rewrites_sender_and_strips_token() {
        let (state, _) = app_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let target = Uuid::new_v4();
        state.connections().register(ConnectionHandle { id: target, tx });

        let ctx = context();
        let mut inner = Packet::new(Uuid::new_v4(), PacketBody::Heartbeat);
        inner.token = Some("secret".into());
        let packet = Packet::new(
            ctx.connection_id,
            PacketBody::ForwardingPacket(ForwardingPacket {
                forward_to: vec![target],
                packet: Box::new(inner),
            }),
        );
        forwarding_packet(state.clone(), ctx.clone(), packet).await.unwrap();

        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("nothing forwarded");
        };
        let delivered = Packet::from_json_str(text.as_str()).unwrap();
        assert_eq!(delivered.from, ctx.connection_id);
        assert!(delivered.token.is_none());
    }

    #[tokio::test]
    async fn acknowledgements_reach_observers() {
        let (state, _) = app_state();
        let mut replies = state.subscribe_replies();
        let packet = Packet::new(
            Uuid::nil(),
            PacketBody::Acknowledgement(Acknowledgement {
                packet_id: Uuid::new_v4(),
                kind: AcknowledgementType::MessageReceived,
            }),
        );
        reply(state.clone(), context(), packet).await.unwrap();
        let observed = replies.next().await.unwrap().unwrap();
        assert!(matches!(observed.packet, PacketBody::Acknowledgement(_)));
    }
}
