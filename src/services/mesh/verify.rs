//! Reachability check of our own advertised endpoint.

use std::time::Duration;

use rand::Rng;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info};

use crate::state::models::CoreServer;

use super::MeshError;

const MAX_TOKEN_LEN: u64 = 256;

/// Stand up a temporary listener on the advertised port, dial the advertised
/// address from the outside and check that our own token comes back.
///
/// Must run before the main listener binds the same port.
pub async fn verify_reachable(server: &CoreServer, timeout: Duration) -> Result<(), MeshError> {
    let endpoint = server.endpoint();
    let nonce: u64 = rand::rng().random();
    let token = format!("{endpoint}#{nonce:016x}");

    let listener = TcpListener::bind(("0.0.0.0", server.port))
        .await
        .map_err(|err| MeshError::Unverified(format!("cannot bind port {}: {err}", server.port)))?;

    let served = token.clone();
    let acceptor = tokio::spawn(async move {
        while let Ok((mut stream, peer)) = listener.accept().await {
            debug!(%peer, "verification probe accepted");
            let _ = stream.write_all(served.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    let outcome = tokio::time::timeout(timeout, read_token(&server.address, server.port)).await;
    acceptor.abort();

    let received = match outcome {
        Ok(Ok(received)) => received,
        Ok(Err(err)) => {
            return Err(MeshError::Unverified(format!(
                "cannot reach {endpoint} from outside: {err}"
            )));
        }
        Err(_) => return Err(MeshError::Timeout { endpoint }),
    };

    if received != token {
        return Err(MeshError::Unverified(format!(
            "{endpoint} answered with another server's token"
        )));
    }

    info!(%endpoint, "advertised address verified");
    Ok(())
}

async fn read_token(address: &str, port: u16) -> std::io::Result<String> {
    let stream = TcpStream::connect((address, port)).await?;
    let mut received = String::new();
    stream
        .take(MAX_TOKEN_LEN)
        .read_to_string(&mut received)
        .await?;
    Ok(received)
}
