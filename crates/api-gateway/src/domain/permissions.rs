//! Hierarchical, wildcard-capable permission strings.
//!
//! Permissions are dot-segmented (`api.players.inventory.read`). A held
//! permission ending in `.*` grants every permission below that node, and the
//! root wildcard `*` grants everything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Root wildcard.
pub const ROOT_WILDCARD: &str = "*";

/// Permission catalogue for the REST and WebSocket surfaces.
pub mod perms {
    pub const ALL: &str = "api.*";

    pub const VERSION_READ: &str = "api.version.read";
    pub const STATUS_READ: &str = "api.status.read";

    pub const SERVER_ALL: &str = "api.server.*";
    pub const SERVER_METRICS_READ: &str = "api.server.metrics.read";
    pub const SERVER_PLUGINS_READ: &str = "api.server.plugins.read";
    pub const SERVER_WHITELIST_WRITE: &str = "api.server.whitelist.write";
    pub const SERVER_SAVE: &str = "api.server.save";
    pub const SERVER_PERMISSIONS_READ: &str = "api.server.permissions.read";
    pub const SERVER_PERMISSIONS_WRITE: &str = "api.server.permissions.write";

    pub const PLAYERS_ALL: &str = "api.players.*";
    pub const PLAYERS_READ: &str = "api.players.read";
    pub const PLAYERS_INVENTORY_READ: &str = "api.players.inventory.read";
    pub const PLAYERS_INVENTORY_WRITE: &str = "api.players.inventory.write";
    pub const PLAYERS_STATS_READ: &str = "api.players.stats.read";
    pub const PLAYERS_LOCATION_READ: &str = "api.players.location.read";
    pub const PLAYERS_TELEPORT: &str = "api.players.teleport";
    pub const PLAYERS_GAMEMODE_READ: &str = "api.players.gamemode.read";
    pub const PLAYERS_GAMEMODE_WRITE: &str = "api.players.gamemode.write";
    pub const PLAYERS_MESSAGE: &str = "api.players.message";
    pub const PLAYERS_PERMISSIONS_READ: &str = "api.players.permissions.read";
    pub const PLAYERS_PERMISSIONS_WRITE: &str = "api.players.permissions.write";
    pub const PLAYERS_GROUPS_READ: &str = "api.players.groups.read";
    pub const PLAYERS_GROUPS_WRITE: &str = "api.players.groups.write";

    pub const WORLDS_ALL: &str = "api.worlds.*";
    pub const WORLDS_READ: &str = "api.worlds.read";
    pub const WORLDS_TIME_READ: &str = "api.worlds.time.read";
    pub const WORLDS_TIME_WRITE: &str = "api.worlds.time.write";
    pub const WORLDS_WEATHER_READ: &str = "api.worlds.weather.read";
    pub const WORLDS_WEATHER_WRITE: &str = "api.worlds.weather.write";
    pub const WORLDS_ENTITIES_READ: &str = "api.worlds.entities.read";
    pub const WORLDS_BLOCKS_READ: &str = "api.worlds.blocks.read";
    pub const WORLDS_BLOCKS_WRITE: &str = "api.worlds.blocks.write";

    pub const ADMIN_ALL: &str = "api.admin.*";
    pub const ADMIN_COMMAND: &str = "api.admin.command";
    pub const ADMIN_KICK: &str = "api.admin.kick";
    pub const ADMIN_BAN: &str = "api.admin.ban";
    pub const ADMIN_BROADCAST: &str = "api.admin.broadcast";

    pub const CHAT_MUTE: &str = "api.chat.mute";

    pub const WEBSOCKET_CONNECT: &str = "api.websocket.connect";
    pub const WEBSOCKET_SUBSCRIBE_PLAYERS: &str = "api.websocket.subscribe.players";
    pub const WEBSOCKET_SUBSCRIBE_CHAT: &str = "api.websocket.subscribe.chat";
    pub const WEBSOCKET_SUBSCRIBE_STATUS: &str = "api.websocket.subscribe.status";
    pub const WEBSOCKET_SUBSCRIBE_ENTITIES: &str = "api.websocket.subscribe.entities";
    pub const WEBSOCKET_SUBSCRIBE_BLOCKS: &str = "api.websocket.subscribe.blocks";
    pub const WEBSOCKET_SUBSCRIBE_INVENTORY: &str = "api.websocket.subscribe.inventory";
    pub const WEBSOCKET_SUBSCRIBE_LOGS: &str = "api.websocket.subscribe.logs";
    pub const WEBSOCKET_SUBSCRIBE_ALL: &str = "api.websocket.subscribe.*";
}

/// Check whether `held` grants `required`.
///
/// Tests the root wildcard and exact containment first, then walks the
/// segments of `required` left to right and tests `segments[..i] + ".*"` at
/// every dot boundary. Total for any input: an empty `required` is only
/// satisfied by `""` or `"*"`.
pub fn satisfies<S: AsRef<str>>(held: impl IntoIterator<Item = S> + Clone, required: &str) -> bool {
    let contains = |needle: &str| held.clone().into_iter().any(|p| p.as_ref() == needle);

    if contains(ROOT_WILDCARD) || contains(required) {
        return true;
    }

    required
        .match_indices('.')
        .any(|(idx, _)| contains(&format!("{}.*", &required[..idx])))
}

/// Immutable set of permission strings held by an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn new<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(permissions.into_iter().map(Into::into).collect())
    }

    /// Whether this set grants `required`.
    pub fn satisfies(&self, required: &str) -> bool {
        if self.0.contains(ROOT_WILDCARD) || self.0.contains(required) {
            return true;
        }
        required.match_indices('.').any(|(idx, _)| {
            let mut node = String::with_capacity(idx + 2);
            node.push_str(&required[..idx]);
            node.push_str(".*");
            self.0.contains(&node)
        })
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<String> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", joined.join(", "))
    }
}
