//! Mesh discovery: learn peer servers from seeds and keep the directory current.
//!
//! A run probes every seed once per hop, merges what reachable peers report,
//! and feeds the result to the state manager. Unreachable peers are only left
//! out of the current run; another peer's list may bring them back.

mod persistence;
mod probe;
mod verify;

use std::{collections::HashSet, path::PathBuf, time::Duration};

use futures::{StreamExt, stream::FuturesUnordered};
use indexmap::IndexSet;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::{DiscoveryConfig, ServerConfig},
    error::ServiceError,
    state::{AppState, models::CoreServer},
};

pub use persistence::{DirectoryFile, load_directory, save_directory};
pub use probe::{PeerProbe, WebsocketProbe};
pub use verify::verify_reachable;

/// Failures internal to discovery. Never surfaced to clients directly.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Websocket connect or transfer failure.
    #[error("failed to talk to {endpoint}: {source}")]
    Connect {
        /// Peer endpoint.
        endpoint: String,
        /// Underlying websocket error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    /// Peer did not answer within its budget.
    #[error("peer {endpoint} did not answer in time")]
    Timeout {
        /// Peer endpoint.
        endpoint: String,
    },
    /// Peer hung up before answering the handshake.
    #[error("peer {endpoint} closed the connection before answering")]
    Closed {
        /// Peer endpoint.
        endpoint: String,
    },
    /// Peer answered the handshake with a failure.
    #[error("peer {endpoint} refused the handshake: {message}")]
    Rejected {
        /// Peer endpoint.
        endpoint: String,
        /// Message carried by the failed response.
        message: String,
    },
    /// Handshake packet could not be encoded.
    #[error("failed to encode handshake: {0}")]
    Encode(#[source] serde_json::Error),
    /// Directory file access failed.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Directory file is not valid JSON of the expected shape.
    #[error("malformed directory file {}: {source}", .path.display())]
    Format {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Directory file written by an incompatible version.
    #[error("unsupported directory file version {0}")]
    UnsupportedVersion(u32),
    /// Our advertised address could not be confirmed.
    #[error("self verification failed: {0}")]
    Unverified(String),
}

/// Knobs of a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Rounds of probing; one asks the seeds only.
    pub hops: u32,
    /// Budget for one peer.
    pub peer_timeout: Duration,
    /// Budget for the whole run.
    pub deadline: Duration,
}

impl From<&DiscoveryConfig> for DiscoveryOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            hops: config.hops,
            peer_timeout: config.peer_timeout,
            deadline: config.deadline,
        }
    }
}

/// What a discovery run learned.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Reachable peers plus everything they reported, deduplicated by endpoint.
    pub servers: Vec<CoreServer>,
    /// Peers that failed or timed out during this run.
    pub unreachable: Vec<CoreServer>,
    /// The global deadline cut the run short.
    pub deadline_hit: bool,
}

/// Seeds for the next run: the persisted directory plus configured seeds,
/// or only the master server in hub-only mode. Never includes ourselves.
pub fn seed_servers(config: &ServerConfig, persisted: Vec<CoreServer>) -> Vec<CoreServer> {
    let this = config.self_server();
    let seeds: IndexSet<CoreServer> = if config.discovery.hub_only {
        IndexSet::from([config.discovery.master_server.clone()])
    } else {
        config
            .discovery
            .seeds
            .iter()
            .cloned()
            .chain(persisted)
            .collect()
    };
    seeds.into_iter().filter(|seed| *seed != this).collect()
}

/// Probe `seeds` for up to `options.hops` rounds.
pub async fn discover(
    probe: &dyn PeerProbe,
    seeds: Vec<CoreServer>,
    options: &DiscoveryOptions,
) -> DiscoveryReport {
    let deadline = Instant::now() + options.deadline;
    let mut directory: IndexSet<CoreServer> = IndexSet::new();
    let mut visited: HashSet<CoreServer> = HashSet::new();
    let mut report = DiscoveryReport::default();
    let mut frontier = seeds;

    for hop in 0..options.hops.max(1) {
        let mut pending = FuturesUnordered::new();
        for server in frontier.drain(..) {
            if !visited.insert(server.clone()) {
                continue;
            }
            let budget = options.peer_timeout;
            let handshake = probe.fetch_state(server.clone(), None);
            pending.push(async move {
                let result = match tokio::time::timeout(budget, handshake).await {
                    Ok(result) => result,
                    Err(_) => Err(MeshError::Timeout {
                        endpoint: server.endpoint(),
                    }),
                };
                (server, result)
            });
        }
        if pending.is_empty() {
            break;
        }
        debug!(hop, peers = pending.len(), "probing peers");

        let mut next = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((server, Ok(state)))) => {
                    debug!(
                        server = %server.endpoint(),
                        reported = state.known_servers.len(),
                        "peer answered"
                    );
                    directory.insert(server);
                    for known in state.known_servers {
                        if !visited.contains(&known) {
                            next.push(known.clone());
                        }
                        directory.insert(known);
                    }
                }
                Ok(Some((server, Err(err)))) => {
                    warn!(server = %server.endpoint(), error = %err, "peer unreachable");
                    report.unreachable.push(server);
                }
                Ok(None) => break,
                Err(_) => {
                    report.deadline_hit = true;
                    break;
                }
            }
        }
        if report.deadline_hit {
            warn!(
                deadline_ms = options.deadline.as_millis() as u64,
                "discovery deadline reached; keeping partial results"
            );
            break;
        }
        frontier = next;
    }

    report.servers = directory.into_iter().collect();
    report
}

/// Run discovery for this server, install the result and persist it.
///
/// `listed` adds this server to the directory handed out to peers. When no
/// peer answered, the current and persisted directories are left untouched.
pub async fn refresh(
    state: &AppState,
    probe: &dyn PeerProbe,
    listed: bool,
) -> Result<Vec<CoreServer>, ServiceError> {
    let config = state.config();
    let persisted = match load_directory(&config.known_hosts_path).await {
        Ok(servers) => servers,
        Err(err) => {
            warn!(error = %err, "ignoring persisted mesh directory");
            Vec::new()
        }
    };
    let seeds = seed_servers(&config, persisted);
    let options = DiscoveryOptions::from(&config.discovery);

    let report = discover(probe, seeds, &options).await;

    let this = config.self_server();
    let mut servers: Vec<CoreServer> = report
        .servers
        .into_iter()
        .filter(|server| *server != this)
        .collect();
    if servers.is_empty() {
        if report.deadline_hit {
            return Err(ServiceError::DiscoveryTimeout(
                options.deadline.as_millis() as u64,
            ));
        }
        return Err(ServiceError::PeersUnreachable(report.unreachable.len()));
    }
    if listed {
        servers.insert(0, this);
    }

    let installed = state.manager().replace_servers(servers).await;
    if let Err(err) = save_directory(&config.known_hosts_path, &installed).await {
        warn!(error = %err, "failed to persist mesh directory");
    }
    info!(
        servers = installed.len(),
        unreachable = report.unreachable.len(),
        listed,
        "mesh directory refreshed"
    );
    Ok(installed)
}

/// Handshake with `server` and list it once it answers.
///
/// Returns `false` when the server was already listed. A newly listed server is
/// announced to every connection and written to the persisted directory.
pub async fn admit(state: &AppState, server: CoreServer, token: Option<String>) -> Result<bool, MeshError> {
    let config = state.config();
    let endpoint = server.endpoint();
    let handshake = state.probe().fetch_state(server.clone(), token);
    match tokio::time::timeout(config.discovery.peer_timeout, handshake).await {
        Ok(answer) => {
            answer?;
        }
        Err(_) => return Err(MeshError::Timeout { endpoint }),
    }

    if !state.manager().add_server(server).await {
        return Ok(false);
    }
    let servers = state.manager().servers().await;
    if let Err(err) = save_directory(&config.known_hosts_path, &servers).await {
        warn!(error = %err, "failed to persist mesh directory");
    }
    info!(server = %endpoint, "peer server listed");
    Ok(true)
}

/// Decide whether this server may advertise itself, verifying the address when it can.
pub async fn self_listing(config: &ServerConfig) -> bool {
    if !config.is_listable() {
        warn!(
            address = %config.address,
            "advertised address is unset or a bare IP; running unlisted"
        );
        return false;
    }
    match verify_reachable(&config.self_server(), config.discovery.peer_timeout).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "advertised address not reachable; running unlisted");
            false
        }
    }
}
