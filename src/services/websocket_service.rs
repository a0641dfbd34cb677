use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::packet::Packet,
    services::{
        authorization::TokenKind,
        dispatcher::{self, Context, Transport},
    },
    state::{SharedState, connections::ConnectionHandle},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Decode, authenticate and dispatch one text frame. Returns the reply packet owed to the sender.
pub async fn handle_text(state: &SharedState, connection_id: Uuid, text: &str) -> Option<Packet> {
    let packet = match Packet::from_json_str(text) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(connection = %connection_id, error = %err, "failed to decode packet");
            return None;
        }
    };

    let identity = state
        .tokens()
        .identify(packet.token.as_deref(), &[TokenKind::Websocket]);
    let ctx = Context {
        connection_id,
        identity,
        transport: Transport::Websocket,
    };

    dispatcher::dispatch(state, ctx, packet)
        .await
        .map(|response| Packet::response(state.server_id(), response))
}

/// Queue a reply on the connection writer. False once the writer is gone.
fn send_reply(tx: &mpsc::UnboundedSender<Message>, reply: &Packet) -> bool {
    let payload = match reply.to_json_string() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize reply");
            return true;
        }
    };
    tx.send(Message::Text(payload.into())).is_ok()
}

/// Handle the full lifecycle of one client connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps broadcasts flowing while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let first_frame = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    state.connections().register(ConnectionHandle {
        id: connection_id,
        tx: outbound_tx.clone(),
    });
    info!(connection = %connection_id, "client connected");

    let mut open = match handle_text(&state, connection_id, first_frame.as_str()).await {
        Some(reply) => send_reply(&outbound_tx, &reply),
        None => true,
    };

    while open {
        let Some(message) = receiver.next().await else {
            break;
        };
        match message {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handle_text(&state, connection_id, text.as_str()).await {
                    open = send_reply(&outbound_tx, &reply);
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                debug!(connection = %connection_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                debug!(connection = %connection_id, "ignoring binary frame");
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.connections().unregister(connection_id);
    let left = state.manager().remove_user_everywhere(connection_id).await;
    info!(connection = %connection_id, tournaments = left, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
