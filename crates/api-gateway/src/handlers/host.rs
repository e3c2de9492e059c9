//! Host-backed routes: request binding and dispatch.
//!
//! Each binder validates path parameters and the body into a typed
//! [`HostRequest`]. Dispatch is the only place the gateway awaits the host,
//! and it contains host panics so one bad call never takes a worker down.

use crate::domain::error::{ApiError, ApiResult};
use crate::domain::routes::PathParams;
use crate::handlers::JsonBody;
use crate::ports::outbound::{
    BlockChange, BlockPos, GiveItem, GroupDefinition, HostError, HostFacade, HostRequest,
    InventorySection, Mute, Teleport, TimeChange, WeatherChange, WhitelistAction,
    WhitelistChange,
};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// Default weather duration in ticks.
pub const DEFAULT_WEATHER_TICKS: u32 = 6000;

const DEFAULT_MUTE_REASON: &str = "Muted by administrator";

/// Run one host call, translating its failure or panic into an [`ApiError`].
pub async fn call_host<T, F>(operation: &'static str, call: F) -> ApiResult<T>
where
    F: Future<Output = Result<T, HostError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(host_error(operation, e)),
        Err(_) => {
            warn!(operation, "Host panicked while serving request");
            Err(ApiError::internal())
        }
    }
}

fn host_error(operation: &'static str, error: HostError) -> ApiError {
    match error {
        HostError::NotFound { code, message } => {
            debug!(operation, code, "Host reported missing entity");
            ApiError::not_found(code, message)
        }
        HostError::BadRequest { code, message } => ApiError::BadRequest { code, message },
        HostError::NotImplemented(feature) => ApiError::feature_not_implemented(&feature),
        HostError::Internal(detail) => {
            warn!(operation, error = %detail, "Host operation failed");
            ApiError::internal()
        }
    }
}

/// Execute a bound request against the host.
pub async fn dispatch(host: &dyn HostFacade, request: HostRequest) -> ApiResult<Value> {
    let operation = request.name();
    call_host(operation, async move {
        match request {
            HostRequest::FindPlayer { player } => host
                .find_player(&player)
                .await?
                .ok_or_else(|| HostError::player_not_found(&player)),
            HostRequest::ServerStatus => host.server_status().await,
            other => host.query(other).await,
        }
    })
    .await
}

fn player(params: &PathParams) -> ApiResult<String> {
    params.get("id").map(str::to_string)
}

fn world(params: &PathParams) -> ApiResult<String> {
    params.get("id").map(str::to_string)
}

fn position(params: &PathParams) -> ApiResult<BlockPos> {
    Ok(BlockPos {
        x: params.coordinate("x")?,
        y: params.coordinate("y")?,
        z: params.coordinate("z")?,
    })
}

// server

pub fn server_status(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::ServerStatus)
}

pub fn server_stats(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::ServerStats)
}

pub fn version(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::Version)
}

pub fn metrics(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::Metrics)
}

pub fn plugins(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::Plugins)
}

/// `enable`/`disable` take no players; `add`/`remove` need at least one.
pub fn update_whitelist(_: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    let action = match body.required_str("action")?.to_ascii_lowercase().as_str() {
        "add" => WhitelistAction::Add,
        "remove" => WhitelistAction::Remove,
        "enable" => WhitelistAction::Enable,
        "disable" => WhitelistAction::Disable,
        _ => {
            return Err(ApiError::invalid_field(
                "action",
                "expected one of add, remove, enable, disable",
            ))
        }
    };
    let players = body.string_list("players")?;
    if matches!(action, WhitelistAction::Add | WhitelistAction::Remove) && players.is_empty() {
        return Err(ApiError::missing_field("players"));
    }
    Ok(HostRequest::UpdateWhitelist(WhitelistChange { action, players }))
}

pub fn save(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::Save)
}

pub fn list_permissions(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::ListPermissions)
}

pub fn list_groups(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::ListGroups)
}

pub fn create_group(_: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::CreateGroup(GroupDefinition {
        name: body.required_str("name")?,
        permissions: body.string_list("permissions")?,
    }))
}

pub fn update_group(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::UpdateGroup {
        name: params.get("name")?.to_string(),
        permissions: body.string_list("permissions")?,
    })
}

pub fn delete_group(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::DeleteGroup {
        name: params.get("name")?.to_string(),
    })
}

pub fn grant_op(_: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::GrantOp {
        player: body.required_str("player")?,
    })
}

pub fn revoke_op(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::RevokeOp {
        player: params.get("player")?.to_string(),
    })
}

// players

pub fn list_players(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::ListPlayers)
}

pub fn find_player(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::FindPlayer {
        player: player(params)?,
    })
}

fn inventory_section(params: &PathParams, section: InventorySection) -> ApiResult<HostRequest> {
    Ok(HostRequest::Inventory {
        player: player(params)?,
        section,
    })
}

pub fn inventory(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    inventory_section(params, InventorySection::All)
}

pub fn inventory_hotbar(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    inventory_section(params, InventorySection::Hotbar)
}

pub fn inventory_armor(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    inventory_section(params, InventorySection::Armor)
}

pub fn inventory_storage(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    inventory_section(params, InventorySection::Storage)
}

pub fn give_item(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    let item_id = body.required_str("itemId")?;
    let amount = body.optional_u32("amount")?.unwrap_or(1);
    if amount == 0 {
        return Err(ApiError::out_of_bounds("'amount' must be greater than 0"));
    }
    Ok(HostRequest::GiveItem {
        player: player(params)?,
        item: GiveItem {
            item_id,
            amount,
            slot: body.optional_str("slot")?,
        },
    })
}

pub fn clear_inventory(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    let section = match body.optional_str("section")? {
        None => InventorySection::All,
        Some(name) => serde_json::from_value(Value::String(name.to_ascii_lowercase()))
            .map_err(|_| {
                ApiError::invalid_field(
                    "section",
                    "expected one of all, hotbar, armor, storage, utility, tools",
                )
            })?,
    };
    Ok(HostRequest::ClearInventory {
        player: player(params)?,
        section,
    })
}

pub fn player_stats(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::PlayerStats {
        player: player(params)?,
    })
}

pub fn player_location(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::PlayerLocation {
        player: player(params)?,
    })
}

/// Needs either a full `x`/`y`/`z` triple or a target `world`.
pub fn teleport(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    let (x, y, z) = (
        body.optional_f64("x")?,
        body.optional_f64("y")?,
        body.optional_f64("z")?,
    );
    let world = body.optional_str("world")?;
    let has_position = x.is_some() && y.is_some() && z.is_some();
    if !has_position && world.is_none() {
        return Err(ApiError::invalid_coordinates(
            "Teleport requires x, y and z or a target world",
        ));
    }
    Ok(HostRequest::Teleport {
        player: player(params)?,
        target: Teleport {
            x,
            y,
            z,
            world,
            yaw: body.optional_f64("yaw")?.map(|v| v as f32),
            pitch: body.optional_f64("pitch")?.map(|v| v as f32),
        },
    })
}

pub fn game_mode(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::GameMode {
        player: player(params)?,
    })
}

pub fn set_game_mode(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::SetGameMode {
        player: player(params)?,
        game_mode: body.required_str("gameMode")?,
    })
}

pub fn player_permissions(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::PlayerPermissions {
        player: player(params)?,
    })
}

pub fn grant_player_permission(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::GrantPlayerPermission {
        player: player(params)?,
        permission: body.required_str("permission")?,
    })
}

pub fn revoke_player_permission(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::RevokePlayerPermission {
        player: player(params)?,
        permission: params.get("permission")?.to_string(),
    })
}

pub fn player_groups(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::PlayerGroups {
        player: player(params)?,
    })
}

pub fn add_player_to_group(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::AddPlayerToGroup {
        player: player(params)?,
        group: body.required_str("group")?,
    })
}

pub fn message_player(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::MessagePlayer {
        player: player(params)?,
        message: body.required_str("message")?,
    })
}

/// Zero or absent `durationMinutes` mutes permanently.
pub fn mute_player(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    let duration_minutes = match body.optional_i64("durationMinutes")? {
        Some(n) if n > 0 => Some(u32::try_from(n).map_err(|_| {
            ApiError::out_of_bounds("'durationMinutes' is too large")
        })?),
        _ => None,
    };
    Ok(HostRequest::MutePlayer {
        player: player(params)?,
        mute: Mute {
            duration_minutes,
            reason: body
                .optional_str("reason")?
                .unwrap_or_else(|| DEFAULT_MUTE_REASON.to_string()),
        },
    })
}

// worlds

pub fn list_worlds(_: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::ListWorlds)
}

pub fn world_info(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::World {
        world: world(params)?,
    })
}

pub fn world_stats(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::WorldStats {
        world: world(params)?,
    })
}

pub fn world_time(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::WorldTime {
        world: world(params)?,
    })
}

pub fn set_world_time(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::SetWorldTime {
        world: world(params)?,
        change: TimeChange {
            time: body.required_i64("time")?,
            relative: body.optional_bool("relative")?.unwrap_or(false),
        },
    })
}

pub fn world_weather(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::WorldWeather {
        world: world(params)?,
    })
}

pub fn set_world_weather(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::SetWorldWeather {
        world: world(params)?,
        change: WeatherChange {
            weather: body.required_str("weather")?,
            duration: body.optional_u32("duration")?.unwrap_or(DEFAULT_WEATHER_TICKS),
        },
    })
}

pub fn world_entities(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::WorldEntities {
        world: world(params)?,
    })
}

pub fn block(params: &PathParams, _: &[u8]) -> ApiResult<HostRequest> {
    Ok(HostRequest::Block {
        world: world(params)?,
        pos: position(params)?,
    })
}

pub fn set_block(params: &PathParams, raw: &[u8]) -> ApiResult<HostRequest> {
    let pos = position(params)?;
    let body = JsonBody::parse(raw)?;
    Ok(HostRequest::SetBlock {
        world: world(params)?,
        pos,
        change: BlockChange {
            block_id: body.required_str("blockId")?,
            nbt: body.optional_str("nbt")?,
        },
    })
}
