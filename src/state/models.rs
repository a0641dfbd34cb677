use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::permissions::Role;

/// Coarse classification of a live connection, used by the dispatcher gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// In-game plugin.
    Player,
    /// Dashboard or overlay speaking the websocket protocol.
    WebsocketConnection,
    /// Short-lived connection opened by a peer server or a verification probe.
    TemporaryConnection,
    /// Anonymous spectator authenticated with the `readonly` token.
    ReadOnly,
}

/// Peer server entry of the mesh directory.
///
/// Two entries are the same server when their `(address, port)` pair matches,
/// whatever their advertised name or websocket port.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CoreServer {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub websocket_port: u16,
}

impl CoreServer {
    /// `address:port`, the key used for logs and self-verification.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl PartialEq for CoreServer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for CoreServer {}

impl Hash for CoreServer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

/// Linked chat-platform account.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DiscordInfo {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// In-game progress reported by player clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    #[default]
    Waiting,
    InGame,
}

/// Song download progress reported by player clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    None,
    Downloading,
    Downloaded,
    DownloadError,
}

/// Connection-scoped participant of a tournament.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub guid: Uuid,
    pub name: String,
    #[serde(default)]
    pub platform_id: String,
    pub client_type: ClientType,
    pub discord_info: Option<DiscordInfo>,
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub play_state: PlayState,
    #[serde(default)]
    pub download_state: DownloadState,
    #[serde(default)]
    pub stream_delay_ms: i64,
    #[serde(default)]
    pub mod_list: Vec<String>,
}

impl User {
    /// Fresh user record for a connection that just authenticated.
    pub fn new(guid: Uuid, name: impl Into<String>, client_type: ClientType) -> Self {
        Self {
            guid,
            name: name.into(),
            platform_id: String::new(),
            client_type,
            discord_info: None,
            team_id: None,
            play_state: PlayState::default(),
            download_state: DownloadState::default(),
            stream_delay_ms: 0,
            mod_list: Vec::new(),
        }
    }

    /// Secondary identity key, when a chat account is linked.
    pub fn discord_id(&self) -> Option<&str> {
        self.discord_info.as_ref().map(|info| info.user_id.as_str())
    }
}

/// Playable chart reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Beatmap {
    pub level_id: String,
    pub name: String,
    #[serde(default)]
    pub characteristic: String,
    #[serde(default)]
    pub difficulty: i32,
}

/// How a map must be played.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GameplayParameters {
    pub beatmap: Beatmap,
    /// Maximum recorded attempts per player. Zero disables attempt accounting.
    #[serde(default)]
    pub attempts: u32,
    /// Reference value for target-relative sorts.
    #[serde(default)]
    pub target: i64,
    #[serde(default)]
    pub gameplay_options: u32,
    #[serde(default)]
    pub player_options: u32,
    #[serde(default)]
    pub show_scoreboard: bool,
    #[serde(default)]
    pub disable_pause: bool,
    #[serde(default)]
    pub disable_fail: bool,
    #[serde(default)]
    pub use_sync: bool,
}

/// A map entry of a qualifier pool or of a match selection.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Map {
    pub guid: Uuid,
    pub gameplay_parameters: GameplayParameters,
    /// Chat message carrying the edited-in-place leaderboard for this map.
    pub leaderboard_message_id: Option<String>,
}

impl Map {
    /// Map with a freshly generated identity.
    pub fn new(gameplay_parameters: GameplayParameters) -> Self {
        Self {
            guid: Uuid::new_v4(),
            gameplay_parameters,
            leaderboard_message_id: None,
        }
    }
}

/// Live grouped session between a leader and its players.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Match {
    pub guid: Uuid,
    pub leader: Uuid,
    #[serde(default)]
    pub associated_users: Vec<Uuid>,
    pub selected_map: Option<Map>,
}

/// Chat channel used for qualifier announcements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// Switches of a qualifier event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QualifierFlags {
    #[serde(default)]
    pub hide_scores_from_players: bool,
    #[serde(default)]
    pub enable_score_feed: bool,
    #[serde(default)]
    pub enable_leaderboard_message: bool,
}

/// Metric a leaderboard ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMetric {
    ModifiedScore,
    NotesMissed,
    BadCuts,
    GoodCuts,
    MaxCombo,
}

/// Ranking strategy configured on a qualifier.
///
/// Plain variants rank high values first, `*Ascending` rank low values first and
/// `*Target` rank by the distance to the map's target value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardSort {
    #[default]
    ModifiedScore,
    ModifiedScoreAscending,
    ModifiedScoreTarget,
    NotesMissed,
    NotesMissedAscending,
    NotesMissedTarget,
    BadCuts,
    BadCutsAscending,
    BadCutsTarget,
    GoodCuts,
    GoodCutsAscending,
    GoodCutsTarget,
    MaxCombo,
    MaxComboAscending,
    MaxComboTarget,
}

impl LeaderboardSort {
    /// Metric this strategy reads from a score.
    pub fn metric(self) -> SortMetric {
        use LeaderboardSort::*;
        match self {
            ModifiedScore | ModifiedScoreAscending | ModifiedScoreTarget => SortMetric::ModifiedScore,
            NotesMissed | NotesMissedAscending | NotesMissedTarget => SortMetric::NotesMissed,
            BadCuts | BadCutsAscending | BadCutsTarget => SortMetric::BadCuts,
            GoodCuts | GoodCutsAscending | GoodCutsTarget => SortMetric::GoodCuts,
            MaxCombo | MaxComboAscending | MaxComboTarget => SortMetric::MaxCombo,
        }
    }

    /// Whether the smallest value ranks first.
    pub fn ascending(self) -> bool {
        !matches!(
            self,
            LeaderboardSort::ModifiedScore
                | LeaderboardSort::NotesMissed
                | LeaderboardSort::BadCuts
                | LeaderboardSort::GoodCuts
                | LeaderboardSort::MaxCombo
        )
    }

    /// Whether the ranking value is a distance to the map target.
    pub fn uses_target(self) -> bool {
        matches!(
            self,
            LeaderboardSort::ModifiedScoreTarget
                | LeaderboardSort::NotesMissedTarget
                | LeaderboardSort::BadCutsTarget
                | LeaderboardSort::GoodCutsTarget
                | LeaderboardSort::MaxComboTarget
        )
    }
}

/// Asynchronous leaderboard-scored competition.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QualifierEvent {
    pub guid: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub info_channel: Option<Channel>,
    #[serde(default)]
    pub flags: QualifierFlags,
    #[serde(default)]
    pub sort: LeaderboardSort,
    #[serde(default)]
    pub maps: Vec<Map>,
}

impl QualifierEvent {
    /// Look up a live map of this event.
    pub fn map(&self, map_id: Uuid) -> Option<&Map> {
        self.maps.iter().find(|map| map.guid == map_id)
    }
}

/// Temporal marker of a score row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    /// The ranked row of its (map, platform) pair.
    #[default]
    Current,
    /// Kept for history and attempt accounting only.
    Superseded,
}

/// Soft-delete marker of roster and qualifier rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    #[default]
    Active,
    Removed,
}

/// Performance submitted by a player for a qualifier map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QualifierScore {
    pub event_id: Uuid,
    pub map_id: Uuid,
    pub platform_id: String,
    pub username: String,
    #[serde(default)]
    pub multiplied_score: i64,
    #[serde(default)]
    pub modified_score: i64,
    #[serde(default)]
    pub max_possible_score: i64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub notes_missed: i64,
    #[serde(default)]
    pub bad_cuts: i64,
    #[serde(default)]
    pub good_cuts: i64,
    #[serde(default)]
    pub max_combo: i64,
    #[serde(default)]
    pub full_combo: bool,
    #[serde(default)]
    pub is_placeholder: bool,
}

impl QualifierScore {
    /// Raw value of the requested metric.
    pub fn metric(&self, metric: SortMetric) -> i64 {
        match metric {
            SortMetric::ModifiedScore => self.modified_score,
            SortMetric::NotesMissed => self.notes_missed,
            SortMetric::BadCuts => self.bad_cuts,
            SortMetric::GoodCuts => self.good_cuts,
            SortMetric::MaxCombo => self.max_combo,
        }
    }
}

/// Ranked row returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    #[serde(flatten)]
    pub score: QualifierScore,
    /// Highlight color, set for the submitter's own row.
    pub color: String,
}

/// Named group of players.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Team {
    pub guid: Uuid,
    pub name: String,
    pub image: Option<String>,
}

/// Tournament-wide settings.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TournamentSettings {
    pub tournament_name: String,
    pub tournament_image: Option<String>,
    /// Hex SHA-256 digest of the join password. Empty means open.
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    #[serde(default)]
    pub enable_teams: bool,
    #[serde(default)]
    pub allow_unauthorized_view: bool,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Permissions of the requesting identity, filled per recipient.
    #[serde(default)]
    pub my_permissions: Vec<String>,
}

/// Top-level scope owning users, matches and qualifiers.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Tournament {
    pub guid: Uuid,
    /// Hidden from clients lacking the join permission.
    pub settings: Option<TournamentSettings>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub matches: Vec<Match>,
    #[serde(default)]
    pub qualifiers: Vec<QualifierEvent>,
    pub server: Option<CoreServer>,
}

/// Snapshot handed to a client on connect or join.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct State {
    #[serde(default)]
    pub tournaments: Vec<Tournament>,
    #[serde(default)]
    pub known_servers: Vec<CoreServer>,
}
