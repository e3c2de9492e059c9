//! Administrative actions: console commands, kick, ban, broadcast.
//!
//! Every action is written to the `audit` log target with the acting client
//! before it reaches the host.

use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::Identity;
use crate::domain::routes::AdminAction;
use crate::handlers::host::call_host;
use crate::handlers::JsonBody;
use crate::ports::outbound::{HostError, HostFacade};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_KICK_REASON: &str = "Kicked by administrator";
const DEFAULT_BAN_REASON: &str = "Banned by administrator";
const AUDIT_PREVIEW_CHARS: usize = 100;

/// Strip control characters and a leading slash from a console command.
pub fn sanitize_command(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !c.is_ascii_control()).collect();
    let trimmed = cleaned.trim();
    trimmed.strip_prefix('/').unwrap_or(trimmed).trim().to_string()
}

fn preview(text: &str) -> String {
    text.chars().take(AUDIT_PREVIEW_CHARS).collect()
}

pub async fn handle(
    action: AdminAction,
    host: Arc<dyn HostFacade>,
    identity: &Identity,
    raw: &[u8],
    command_timeout: Duration,
) -> ApiResult<Value> {
    let body = JsonBody::parse(raw)?;
    match action {
        AdminAction::Command => command(host, identity, &body, command_timeout).await,
        AdminAction::Kick => kick(host.as_ref(), identity, &body).await,
        AdminAction::Ban => ban(host.as_ref(), identity, &body).await,
        AdminAction::Broadcast => broadcast(host.as_ref(), identity, &body).await,
    }
}

/// A command the host has not finished within `timeout` is reported as
/// dispatched. It runs on its own task, so it keeps going after the reply.
async fn command(
    host: Arc<dyn HostFacade>,
    identity: &Identity,
    body: &JsonBody,
    timeout: Duration,
) -> ApiResult<Value> {
    let command = sanitize_command(&body.required_str("command")?);
    if command.is_empty() {
        return Err(ApiError::invalid_field("command", "must not be empty"));
    }

    info!(
        target: "audit",
        action = "command",
        client_id = %identity.client_id,
        command = %command,
        "Admin action"
    );

    let dispatched = command.clone();
    let mut run = tokio::spawn(async move {
        call_host("execute_command", host.execute_command(&dispatched)).await
    });
    match tokio::time::timeout(timeout, &mut run).await {
        Ok(Ok(output)) => Ok(json!({
            "success": true,
            "message": format!("Command executed: {}", command),
            "output": output?,
        })),
        Ok(Err(e)) => {
            warn!(command = %command, error = %e, "Command task failed");
            Err(ApiError::internal())
        }
        Err(_) => {
            warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "Command still running");
            Ok(json!({
                "success": true,
                "message": format!("Command dispatched: {}", command),
            }))
        }
    }
}

async fn kick(host: &dyn HostFacade, identity: &Identity, body: &JsonBody) -> ApiResult<Value> {
    let player = body.required_str("player")?;
    let reason = body
        .optional_str("reason")?
        .unwrap_or_else(|| DEFAULT_KICK_REASON.to_string());

    info!(
        target: "audit",
        action = "kick",
        client_id = %identity.client_id,
        player = %player,
        reason = %reason,
        "Admin action"
    );

    call_host("kick_player", async {
        host.find_player(&player)
            .await?
            .ok_or_else(|| HostError::player_not_found(&player))?;
        host.kick_player(&player, &reason).await
    })
    .await?;

    Ok(json!({
        "success": true,
        "action": "kick",
        "target": player,
        "message": format!("Player kicked: {}", reason),
    }))
}

async fn ban(host: &dyn HostFacade, identity: &Identity, body: &JsonBody) -> ApiResult<Value> {
    let player = body.required_str("player")?;
    let reason = body
        .optional_str("reason")?
        .unwrap_or_else(|| DEFAULT_BAN_REASON.to_string());
    let minutes = body.optional_u32("durationMinutes")?.filter(|m| *m > 0);
    let duration = minutes.map(|m| Duration::from_secs(u64::from(m) * 60));

    info!(
        target: "audit",
        action = "ban",
        client_id = %identity.client_id,
        player = %player,
        reason = %reason,
        duration_minutes = minutes.unwrap_or(0),
        "Admin action"
    );

    call_host("ban_player", host.ban_player(&player, &reason, duration)).await?;

    let message = match minutes {
        Some(m) => format!("Player banned for {} minutes: {}", m, reason),
        None => format!("Player banned: {}", reason),
    };
    Ok(json!({
        "success": true,
        "action": "ban",
        "target": player,
        "message": message,
    }))
}

async fn broadcast(host: &dyn HostFacade, identity: &Identity, body: &JsonBody) -> ApiResult<Value> {
    let message = body.required_str("message")?;

    info!(
        target: "audit",
        action = "broadcast",
        client_id = %identity.client_id,
        message = %preview(&message),
        "Admin action"
    );

    let recipients = call_host("broadcast_message", host.broadcast_message(&message)).await?;

    Ok(json!({
        "success": true,
        "action": "broadcast",
        "target": "all",
        "message": format!("Broadcast sent to {} players", recipients),
        "recipients": recipients,
    }))
}
