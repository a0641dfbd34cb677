//! Outbound handshake with a peer server.

use futures::{SinkExt, StreamExt, future::BoxFuture};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use uuid::Uuid;

use crate::{
    dto::{
        packet::{Packet, PacketBody},
        request::Request,
        response::ResponseDetails,
    },
    services::{authorization::READONLY_TOKEN, dispatcher::VERSION_CODE},
    state::models::{CoreServer, State},
};

use super::MeshError;

/// Something able to ask a peer for its state snapshot.
pub trait PeerProbe: Send + Sync {
    /// Handshake with `server` and return the state it reports.
    ///
    /// Without a `token` the read-only one is presented.
    fn fetch_state(&self, server: CoreServer, token: Option<String>) -> BoxFuture<'static, Result<State, MeshError>>;
}

/// Probe speaking the packet protocol over a short-lived websocket.
#[derive(Debug, Clone, Default)]
pub struct WebsocketProbe;

impl WebsocketProbe {
    fn url(server: &CoreServer) -> String {
        let port = if server.websocket_port == 0 {
            server.port
        } else {
            server.websocket_port
        };
        format!("ws://{}:{}/ws", server.address, port)
    }
}

impl PeerProbe for WebsocketProbe {
    fn fetch_state(&self, server: CoreServer, token: Option<String>) -> BoxFuture<'static, Result<State, MeshError>> {
        Box::pin(async move {
            let endpoint = server.endpoint();
            let url = Self::url(&server);
            let (mut socket, _) =
                connect_async(url.as_str())
                    .await
                    .map_err(|source| MeshError::Connect {
                        endpoint: endpoint.clone(),
                        source,
                    })?;

            let mut hello = Packet::new(
                Uuid::nil(),
                PacketBody::Request(Request::Connect {
                    client_version: VERSION_CODE,
                }),
            );
            hello.token = Some(token.unwrap_or_else(|| READONLY_TOKEN.to_string()));
            let payload = hello.to_json_string().map_err(MeshError::Encode)?;
            socket
                .send(Message::text(payload))
                .await
                .map_err(|source| MeshError::Connect {
                    endpoint: endpoint.clone(),
                    source,
                })?;

            while let Some(frame) = socket.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(source) => return Err(MeshError::Connect { endpoint, source }),
                };
                let Ok(packet) = Packet::from_json_str(text.as_str()) else {
                    debug!(%endpoint, "ignoring undecodable frame from peer");
                    continue;
                };
                let PacketBody::Response(response) = packet.packet else {
                    continue;
                };
                if response.responding_to_packet_id != hello.id {
                    continue;
                }
                let _ = socket.close(None).await;
                return match response.details {
                    ResponseDetails::Connect {
                        state: Some(state), ..
                    } if response.is_success() => Ok(state),
                    _ => Err(MeshError::Rejected {
                        endpoint,
                        message: response.message.unwrap_or_default(),
                    }),
                };
            }

            Err(MeshError::Closed { endpoint })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_prefers_websocket_port() {
        let mut server = CoreServer {
            name: "peer".into(),
            address: "peer.example".into(),
            port: 8675,
            websocket_port: 8676,
        };
        assert_eq!(WebsocketProbe::url(&server), "ws://peer.example:8676/ws");
        server.websocket_port = 0;
        assert_eq!(WebsocketProbe::url(&server), "ws://peer.example:8675/ws");
    }
}
