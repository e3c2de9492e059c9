//! Outbound ports: the host this gateway fronts, and the clock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    /// Milliseconds since Unix epoch
    fn now_millis(&self) -> u64;

    /// Seconds since Unix epoch
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// System time implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            // Clock before Unix epoch: report 0 rather than panic
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Failures reported by the host.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// Referenced entity does not exist; `code` is the wire code (`PLAYER_NOT_FOUND`, ...)
    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    /// Input the host rejected
    #[error("{message}")]
    BadRequest { code: &'static str, message: String },
    /// Capability not wired into this host
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// Anything unexpected; never shown to clients
    #[error("host failure: {0}")]
    Internal(String),
}

impl HostError {
    pub fn player_not_found(player: &str) -> Self {
        Self::NotFound {
            code: crate::domain::error::codes::PLAYER_NOT_FOUND,
            message: format!("Player not found: {}", player),
        }
    }

    pub fn world_not_found(world: &str) -> Self {
        Self::NotFound {
            code: crate::domain::error::codes::WORLD_NOT_FOUND,
            message: format!("World not found: {}", world),
        }
    }
}

/// Integer block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Inventory slice addressed by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventorySection {
    #[default]
    All,
    Hotbar,
    Armor,
    Storage,
    Utility,
    Tools,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitelistAction {
    Add,
    Remove,
    Enable,
    Disable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistChange {
    pub action: WhitelistAction,
    #[serde(default)]
    pub players: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiveItem {
    pub item_id: String,
    pub amount: u32,
    pub slot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teleport {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub world: Option<String>,
    pub yaw: Option<f32>,
    pub pitch: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeChange {
    pub time: i64,
    #[serde(default)]
    pub relative: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherChange {
    pub weather: String,
    /// Ticks
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChange {
    pub block_id: String,
    pub nbt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mute {
    /// `None` mutes permanently
    pub duration_minutes: Option<u32>,
    pub reason: String,
}

/// Every host operation reachable from the REST surface, already validated.
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    ServerStatus,
    ServerStats,
    Version,
    Metrics,
    Plugins,
    UpdateWhitelist(WhitelistChange),
    Save,
    ListPermissions,
    ListGroups,
    CreateGroup(GroupDefinition),
    UpdateGroup { name: String, permissions: Vec<String> },
    DeleteGroup { name: String },
    GrantOp { player: String },
    RevokeOp { player: String },

    ListPlayers,
    FindPlayer { player: String },
    Inventory { player: String, section: InventorySection },
    GiveItem { player: String, item: GiveItem },
    ClearInventory { player: String, section: InventorySection },
    PlayerStats { player: String },
    PlayerLocation { player: String },
    Teleport { player: String, target: Teleport },
    GameMode { player: String },
    SetGameMode { player: String, game_mode: String },
    PlayerPermissions { player: String },
    GrantPlayerPermission { player: String, permission: String },
    RevokePlayerPermission { player: String, permission: String },
    PlayerGroups { player: String },
    AddPlayerToGroup { player: String, group: String },
    MessagePlayer { player: String, message: String },
    MutePlayer { player: String, mute: Mute },

    ListWorlds,
    World { world: String },
    WorldStats { world: String },
    WorldTime { world: String },
    SetWorldTime { world: String, change: TimeChange },
    WorldWeather { world: String },
    SetWorldWeather { world: String, change: WeatherChange },
    WorldEntities { world: String },
    Block { world: String, pos: BlockPos },
    SetBlock { world: String, pos: BlockPos, change: BlockChange },
}

impl HostRequest {
    /// Stable operation name for logs and `NotImplemented` messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServerStatus => "server_status",
            Self::ServerStats => "server_stats",
            Self::Version => "version",
            Self::Metrics => "metrics",
            Self::Plugins => "plugins",
            Self::UpdateWhitelist(_) => "update_whitelist",
            Self::Save => "save",
            Self::ListPermissions => "list_permissions",
            Self::ListGroups => "list_groups",
            Self::CreateGroup(_) => "create_group",
            Self::UpdateGroup { .. } => "update_group",
            Self::DeleteGroup { .. } => "delete_group",
            Self::GrantOp { .. } => "grant_op",
            Self::RevokeOp { .. } => "revoke_op",
            Self::ListPlayers => "list_players",
            Self::FindPlayer { .. } => "find_player",
            Self::Inventory { .. } => "inventory",
            Self::GiveItem { .. } => "give_item",
            Self::ClearInventory { .. } => "clear_inventory",
            Self::PlayerStats { .. } => "player_stats",
            Self::PlayerLocation { .. } => "player_location",
            Self::Teleport { .. } => "teleport",
            Self::GameMode { .. } => "game_mode",
            Self::SetGameMode { .. } => "set_game_mode",
            Self::PlayerPermissions { .. } => "player_permissions",
            Self::GrantPlayerPermission { .. } => "grant_player_permission",
            Self::RevokePlayerPermission { .. } => "revoke_player_permission",
            Self::PlayerGroups { .. } => "player_groups",
            Self::AddPlayerToGroup { .. } => "add_player_to_group",
            Self::MessagePlayer { .. } => "message_player",
            Self::MutePlayer { .. } => "mute_player",
            Self::ListWorlds => "list_worlds",
            Self::World { .. } => "world",
            Self::WorldStats { .. } => "world_stats",
            Self::WorldTime { .. } => "world_time",
            Self::SetWorldTime { .. } => "set_world_time",
            Self::WorldWeather { .. } => "world_weather",
            Self::SetWorldWeather { .. } => "set_world_weather",
            Self::WorldEntities { .. } => "world_entities",
            Self::Block { .. } => "block",
            Self::SetBlock { .. } => "set_block",
        }
    }
}

/// The server process this gateway fronts.
///
/// Owns all domain state. Payloads are opaque JSON; the gateway only
/// forwards them. Operations a host does not support keep the default
/// bodies and surface as `501 FEATURE_NOT_IMPLEMENTED`.
#[async_trait]
pub trait HostFacade: Send + Sync + 'static {
    /// Look up a player by name or UUID.
    async fn find_player(&self, player: &str) -> Result<Option<Value>, HostError>;

    /// Run a console command. May complete long after dispatch.
    async fn execute_command(&self, command: &str) -> Result<String, HostError>;

    /// Message every online player; returns the recipient count.
    async fn broadcast_message(&self, message: &str) -> Result<usize, HostError>;

    async fn kick_player(&self, player: &str, reason: &str) -> Result<(), HostError>;

    /// Snapshot published on `server.status` and served by `GET /server/status`.
    async fn server_status(&self) -> Result<Value, HostError>;

    async fn ban_player(
        &self,
        _player: &str,
        _reason: &str,
        _duration: Option<Duration>,
    ) -> Result<(), HostError> {
        Err(HostError::NotImplemented("ban_player".into()))
    }

    /// Everything else on the REST surface.
    async fn query(&self, request: HostRequest) -> Result<Value, HostError> {
        Err(HostError::NotImplemented(request.name().into()))
    }
}
