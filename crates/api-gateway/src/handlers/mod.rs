//! Request handlers and the REST route table.
//!
//! Handlers receive already-authorized input and return a JSON payload or an
//! [`ApiError`]; they never write to the transport themselves.

pub mod admin;
pub mod auth;
pub mod host;

use crate::domain::error::{ApiError, ApiResult};
use crate::domain::permissions::perms;
use crate::domain::routes::{Access, AdminAction, Route, RouteHandler, RouteTable};
use crate::ports::outbound::TimeSource;
use axum::http::Method;
use serde_json::{json, Map, Value};

/// `GET /health`
pub fn health(clock: &dyn TimeSource) -> Value {
    json!({ "status": "ok", "timestamp": clock.now_millis() })
}

/// A JSON object request body with field accessors that produce the
/// gateway's 400 codes.
#[derive(Debug, Default)]
pub struct JsonBody(Map<String, Value>);

impl JsonBody {
    /// Parse a body. Empty input is an empty object.
    pub fn parse(raw: &[u8]) -> ApiResult<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        match serde_json::from_slice::<Value>(raw)? {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            _ => Err(ApiError::invalid_json("expected a JSON object")),
        }
    }

    fn present(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Non-blank string field.
    pub fn required_str(&self, field: &str) -> ApiResult<String> {
        self.optional_str(field)?
            .ok_or_else(|| ApiError::missing_field(field))
    }

    /// String field; blank counts as absent.
    pub fn optional_str(&self, field: &str) -> ApiResult<Option<String>> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ApiError::invalid_field(field, "expected a string")),
        }
    }

    pub fn optional_f64(&self, field: &str) -> ApiResult<Option<f64>> {
        match self.present(field) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| ApiError::invalid_field(field, "expected a number")),
        }
    }

    pub fn optional_i64(&self, field: &str) -> ApiResult<Option<i64>> {
        match self.present(field) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| ApiError::invalid_field(field, "expected an integer")),
        }
    }

    pub fn required_i64(&self, field: &str) -> ApiResult<i64> {
        self.optional_i64(field)?
            .ok_or_else(|| ApiError::missing_field(field))
    }

    /// Non-negative integer that fits in `u32`.
    pub fn optional_u32(&self, field: &str) -> ApiResult<Option<u32>> {
        match self.present(field) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| ApiError::out_of_bounds(format!("'{}' must be between 0 and {}", field, u32::MAX))),
        }
    }

    pub fn optional_bool(&self, field: &str) -> ApiResult<Option<bool>> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ApiError::invalid_field(field, "expected a boolean")),
        }
    }

    /// Array of strings; absent is empty.
    pub fn string_list(&self, field: &str) -> ApiResult<Vec<String>> {
        match self.present(field) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ApiError::invalid_field(field, "expected an array of strings"))
                })
                .collect(),
            Some(_) => Err(ApiError::invalid_field(field, "expected an array of strings")),
        }
    }
}

fn public(method: Method, pattern: &str, handler: RouteHandler) -> Route {
    Route::new(method, pattern, Access::Public, handler)
}

fn guarded(method: Method, pattern: &str, permission: &'static str, handler: RouteHandler) -> Route {
    Route::new(method, pattern, Access::Requires(permission), handler)
}

/// The full REST surface with the permission each route requires.
pub fn standard_routes() -> RouteTable {
    use host as h;
    use Method as M;
    use RouteHandler::{Admin, Host};

    RouteTable::new(vec![
        public(M::GET, "/health", RouteHandler::Health),
        public(M::POST, "/auth/token", RouteHandler::IssueToken),
        // server
        guarded(M::GET, "/server/status", perms::STATUS_READ, Host(h::server_status)),
        guarded(M::GET, "/server/stats", perms::STATUS_READ, Host(h::server_stats)),
        guarded(M::GET, "/server/version", perms::VERSION_READ, Host(h::version)),
        guarded(M::GET, "/server/metrics", perms::SERVER_METRICS_READ, Host(h::metrics)),
        guarded(M::GET, "/server/plugins", perms::SERVER_PLUGINS_READ, Host(h::plugins)),
        guarded(M::POST, "/server/whitelist", perms::SERVER_WHITELIST_WRITE, Host(h::update_whitelist)),
        guarded(M::POST, "/server/save", perms::SERVER_SAVE, Host(h::save)),
        guarded(M::GET, "/server/permissions", perms::SERVER_PERMISSIONS_READ, Host(h::list_permissions)),
        guarded(M::GET, "/server/permissions/groups", perms::SERVER_PERMISSIONS_READ, Host(h::list_groups)),
        guarded(M::POST, "/server/permissions/groups", perms::SERVER_PERMISSIONS_WRITE, Host(h::create_group)),
        guarded(M::PUT, "/server/permissions/groups/{name}", perms::SERVER_PERMISSIONS_WRITE, Host(h::update_group)),
        guarded(M::DELETE, "/server/permissions/groups/{name}", perms::SERVER_PERMISSIONS_WRITE, Host(h::delete_group)),
        guarded(M::POST, "/server/permissions/op", perms::SERVER_PERMISSIONS_WRITE, Host(h::grant_op)),
        guarded(M::DELETE, "/server/permissions/op/{*player}", perms::SERVER_PERMISSIONS_WRITE, Host(h::revoke_op)),
        // players
        guarded(M::GET, "/players", perms::PLAYERS_READ, Host(h::list_players)),
        guarded(M::GET, "/players/{id}", perms::PLAYERS_READ, Host(h::find_player)),
        guarded(M::GET, "/players/{id}/inventory", perms::PLAYERS_INVENTORY_READ, Host(h::inventory)),
        guarded(M::GET, "/players/{id}/inventory/hotbar", perms::PLAYERS_INVENTORY_READ, Host(h::inventory_hotbar)),
        guarded(M::GET, "/players/{id}/inventory/armor", perms::PLAYERS_INVENTORY_READ, Host(h::inventory_armor)),
        guarded(M::GET, "/players/{id}/inventory/storage", perms::PLAYERS_INVENTORY_READ, Host(h::inventory_storage)),
        guarded(M::POST, "/players/{id}/inventory/give", perms::PLAYERS_INVENTORY_WRITE, Host(h::give_item)),
        guarded(M::POST, "/players/{id}/inventory/clear", perms::PLAYERS_INVENTORY_WRITE, Host(h::clear_inventory)),
        guarded(M::GET, "/players/{id}/stats", perms::PLAYERS_STATS_READ, Host(h::player_stats)),
        guarded(M::GET, "/players/{id}/location", perms::PLAYERS_LOCATION_READ, Host(h::player_location)),
        guarded(M::POST, "/players/{id}/teleport", perms::PLAYERS_TELEPORT, Host(h::teleport)),
        guarded(M::GET, "/players/{id}/gamemode", perms::PLAYERS_GAMEMODE_READ, Host(h::game_mode)),
        guarded(M::POST, "/players/{id}/gamemode", perms::PLAYERS_GAMEMODE_WRITE, Host(h::set_game_mode)),
        guarded(M::GET, "/players/{id}/permissions", perms::PLAYERS_PERMISSIONS_READ, Host(h::player_permissions)),
        guarded(M::POST, "/players/{id}/permissions", perms::PLAYERS_PERMISSIONS_WRITE, Host(h::grant_player_permission)),
        guarded(M::DELETE, "/players/{id}/permissions/{*permission}", perms::PLAYERS_PERMISSIONS_WRITE, Host(h::revoke_player_permission)),
        guarded(M::GET, "/players/{id}/groups", perms::PLAYERS_GROUPS_READ, Host(h::player_groups)),
        guarded(M::POST, "/players/{id}/groups", perms::PLAYERS_GROUPS_WRITE, Host(h::add_player_to_group)),
        guarded(M::POST, "/players/{id}/message", perms::PLAYERS_MESSAGE, Host(h::message_player)),
        // worlds
        guarded(M::GET, "/worlds", perms::WORLDS_READ, Host(h::list_worlds)),
        guarded(M::GET, "/worlds/{id}", perms::WORLDS_READ, Host(h::world_info)),
        guarded(M::GET, "/worlds/{id}/stats", perms::WORLDS_READ, Host(h::world_stats)),
        guarded(M::GET, "/worlds/{id}/time", perms::WORLDS_TIME_READ, Host(h::world_time)),
        guarded(M::POST, "/worlds/{id}/time", perms::WORLDS_TIME_WRITE, Host(h::set_world_time)),
        guarded(M::GET, "/worlds/{id}/weather", perms::WORLDS_WEATHER_READ, Host(h::world_weather)),
        guarded(M::POST, "/worlds/{id}/weather", perms::WORLDS_WEATHER_WRITE, Host(h::set_world_weather)),
        guarded(M::GET, "/worlds/{id}/entities", perms::WORLDS_ENTITIES_READ, Host(h::world_entities)),
        guarded(M::GET, "/worlds/{id}/blocks/{x}/{y}/{z}", perms::WORLDS_BLOCKS_READ, Host(h::block)),
        guarded(M::POST, "/worlds/{id}/blocks/{x}/{y}/{z}", perms::WORLDS_BLOCKS_WRITE, Host(h::set_block)),
        // chat
        guarded(M::POST, "/chat/mute/{id}", perms::CHAT_MUTE, Host(h::mute_player)),
        // admin
        guarded(M::POST, "/admin/command", perms::ADMIN_COMMAND, Admin(AdminAction::Command)),
        guarded(M::POST, "/admin/kick", perms::ADMIN_KICK, Admin(AdminAction::Kick)),
        guarded(M::POST, "/admin/ban", perms::ADMIN_BAN, Admin(AdminAction::Ban)),
        guarded(M::POST, "/admin/broadcast", perms::ADMIN_BROADCAST, Admin(AdminAction::Broadcast)),
    ])
}
