//! Server configuration loading: identity, ports, discovery seeds and storage.

use std::{env, fs, io::ErrorKind, net::IpAddr, path::PathBuf, time::Duration};

use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::models::CoreServer;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "files/serverConfig.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TOURNEY_SYNC_CONFIG_PATH";

/// Placeholder written to fresh configs until the operator sets a public address.
pub const ADDRESS_PLACEHOLDER: &str = "[serverAddress]";
/// Placeholder written to fresh configs until the operator sets a bot token.
pub const BOT_TOKEN_PLACEHOLDER: &str = "[botToken]";

const DEFAULT_SERVER_NAME: &str = "Default Server Name";
const DEFAULT_PORT: u16 = 8675;
const DEFAULT_WEBSOCKET_PORT: u16 = 8676;
const DEFAULT_OAUTH_PORT: u16 = 8677;
const DEFAULT_MASTER_ADDRESS: &str = "server.tournamentassistant.net";
const DEFAULT_PEER_TIMEOUT_MS: u64 = 6_000;
const DEFAULT_DISCOVERY_DEADLINE_MS: u64 = 15_000;
const DEFAULT_FILES_DIR: &str = "files/FileServerContent";
const DEFAULT_KNOWN_HOSTS_PATH: &str = "files/knownHosts.json";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct ServerConfig {
    /// Name advertised to peers and clients.
    pub server_name: String,
    /// Public address advertised to peers. May be the placeholder.
    pub address: String,
    /// Port advertised in the mesh directory.
    pub port: u16,
    /// Port the websocket and REST listener binds to.
    pub websocket_port: u16,
    /// Reserved for the OAuth callback listener.
    pub oauth_port: u16,
    /// Chat bot token, `None` while unset.
    pub bot_token: Option<String>,
    /// Webhook used for score announcements.
    pub webhook_url: Option<String>,
    /// Secret signing connection tokens.
    pub token_secret: String,
    /// Directory holding uploaded files.
    pub files_dir: PathBuf,
    /// Where the mesh directory is persisted between runs.
    pub known_hosts_path: PathBuf,
    /// Try to map the listening port on the local gateway.
    pub upnp_enabled: bool,
    /// Mesh discovery tuning.
    pub discovery: DiscoveryConfig,
    /// Durable storage settings.
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
/// Mesh discovery tuning.
pub struct DiscoveryConfig {
    /// Servers queried on every discovery round.
    pub seeds: Vec<CoreServer>,
    /// Hub of the hub/spoke layout.
    pub master_server: CoreServer,
    /// Restrict seeds to the master server.
    pub hub_only: bool,
    /// Number of discovery rounds; one means ask the seeds only.
    pub hops: u32,
    /// Budget for one peer to answer.
    pub peer_timeout: Duration,
    /// Budget for a whole discovery run.
    pub deadline: Duration,
}

#[derive(Debug, Clone, Default)]
/// Durable storage settings.
pub struct StorageConfig {
    /// MongoDB connection string. In-memory storage is used when absent.
    pub mongo_uri: Option<String>,
    /// MongoDB database name.
    pub mongo_db: Option<String>,
}

impl ServerConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        name = %config.server_name,
                        port = config.port,
                        "loaded server config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(uri) = env::var("MONGO_URI") {
            self.storage.mongo_uri = Some(uri);
        }
        if let Ok(db) = env::var("MONGO_DB") {
            self.storage.mongo_db = Some(db);
        }
        if let Some(port) = env::var("PORT").ok().and_then(|value| value.parse::<u16>().ok()) {
            self.websocket_port = port;
        }
        self
    }

    /// Directory entry describing this server.
    pub fn self_server(&self) -> CoreServer {
        CoreServer {
            name: self.server_name.clone(),
            address: if self.address == ADDRESS_PLACEHOLDER {
                "127.0.0.1".to_string()
            } else {
                self.address.clone()
            },
            port: self.port,
            websocket_port: self.websocket_port,
        }
    }

    /// Whether the advertised address can be handed out to peers.
    ///
    /// The placeholder and raw IP literals keep the server unlisted.
    pub fn is_listable(&self) -> bool {
        self.address != ADDRESS_PLACEHOLDER && self.address.parse::<IpAddr>().is_err()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    server_name: Option<String>,
    server_address: Option<String>,
    port: Option<u16>,
    websocket_port: Option<u16>,
    oauth_port: Option<u16>,
    bot_token: Option<String>,
    webhook_url: Option<String>,
    token_secret: Option<String>,
    files_dir: Option<PathBuf>,
    known_hosts_path: Option<PathBuf>,
    upnp_enabled: bool,
    discovery: RawDiscovery,
    mongo_uri: Option<String>,
    mongo_db: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
/// JSON representation of the `discovery` section.
struct RawDiscovery {
    seeds: Vec<CoreServer>,
    master_server: Option<CoreServer>,
    hub_only: bool,
    hops: Option<u32>,
    peer_timeout_ms: Option<u64>,
    deadline_ms: Option<u64>,
}

impl From<RawConfig> for ServerConfig {
    fn from(value: RawConfig) -> Self {
        let token_secret = value.token_secret.unwrap_or_else(|| {
            warn!("no tokenSecret configured; issued tokens will not survive a restart");
            let bytes: [u8; 32] = rand::rng().random();
            hex::encode(bytes)
        });

        Self {
            server_name: value
                .server_name
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            address: value
                .server_address
                .unwrap_or_else(|| ADDRESS_PLACEHOLDER.to_string()),
            port: value.port.unwrap_or(DEFAULT_PORT),
            websocket_port: value.websocket_port.unwrap_or(DEFAULT_WEBSOCKET_PORT),
            oauth_port: value.oauth_port.unwrap_or(DEFAULT_OAUTH_PORT),
            bot_token: value
                .bot_token
                .filter(|token| !token.is_empty() && token != BOT_TOKEN_PLACEHOLDER),
            webhook_url: value.webhook_url.filter(|url| !url.is_empty()),
            token_secret,
            files_dir: value
                .files_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FILES_DIR)),
            known_hosts_path: value
                .known_hosts_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KNOWN_HOSTS_PATH)),
            upnp_enabled: value.upnp_enabled,
            discovery: value.discovery.into(),
            storage: StorageConfig {
                mongo_uri: value.mongo_uri,
                mongo_db: value.mongo_db,
            },
        }
    }
}

impl From<RawDiscovery> for DiscoveryConfig {
    fn from(value: RawDiscovery) -> Self {
        let master_server = value.master_server.unwrap_or_else(default_master_server);
        let seeds = if value.seeds.is_empty() {
            vec![master_server.clone()]
        } else {
            value.seeds
        };
        Self {
            seeds,
            master_server,
            hub_only: value.hub_only,
            hops: value.hops.unwrap_or(1).max(1),
            peer_timeout: Duration::from_millis(
                value.peer_timeout_ms.unwrap_or(DEFAULT_PEER_TIMEOUT_MS),
            ),
            deadline: Duration::from_millis(
                value.deadline_ms.unwrap_or(DEFAULT_DISCOVERY_DEADLINE_MS),
            ),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn default_master_server() -> CoreServer {
    CoreServer {
        name: "Moon's Server".to_string(),
        address: DEFAULT_MASTER_ADDRESS.to_string(),
        port: DEFAULT_PORT,
        websocket_port: DEFAULT_WEBSOCKET_PORT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_placeholders() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, DEFAULT_SERVER_NAME);
        assert_eq!(config.address, ADDRESS_PLACEHOLDER);
        assert_eq!(config.port, 8675);
        assert_eq!(config.websocket_port, 8676);
        assert_eq!(config.oauth_port, 8677);
        assert!(config.bot_token.is_none());
        assert_eq!(config.discovery.hops, 1);
        assert_eq!(config.discovery.peer_timeout, Duration::from_millis(6_000));
        assert_eq!(config.discovery.seeds, vec![default_master_server()]);
        assert!(!config.is_listable());
    }

    #[test]
    fn parses_camel_case_file() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "serverName": "EU Hub",
                "serverAddress": "eu.example.net",
                "port": 9000,
                "botToken": "[botToken]",
                "tokenSecret": "s3cret",
                "discovery": { "hops": 3, "peerTimeoutMs": 500, "hubOnly": true }
            }"#,
        )
        .unwrap();
        let config: ServerConfig = raw.into();
        assert_eq!(config.server_name, "EU Hub");
        assert_eq!(config.port, 9000);
        assert_eq!(config.websocket_port, DEFAULT_WEBSOCKET_PORT);
        assert!(config.bot_token.is_none());
        assert_eq!(config.token_secret, "s3cret");
        assert_eq!(config.discovery.hops, 3);
        assert!(config.discovery.hub_only);
        assert_eq!(config.discovery.peer_timeout, Duration::from_millis(500));
        assert!(config.is_listable());
    }

    #[test]
    fn ip_addresses_stay_unlisted() {
        let config = ServerConfig {
            address: "203.0.113.7".into(),
            ..ServerConfig::default()
        };
        assert!(!config.is_listable());
        assert_eq!(config.self_server().address, "203.0.113.7");
    }
}
