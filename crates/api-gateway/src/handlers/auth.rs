//! `POST /auth/token`: exchange client credentials for a bearer token.

use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::ClientRegistry;
use crate::handlers::JsonBody;
use crate::security::secrets::verify_secret_blocking;
use crate::security::tokens::CredentialIssuer;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Verify `{clientId, secret}` and sign a token.
///
/// A disabled client is only reported once its secret has matched. Unknown
/// ids still pay for a bcrypt check, so timing does not reveal which ids
/// exist.
pub async fn issue_token(
    clients: &ClientRegistry,
    issuer: &CredentialIssuer,
    raw: &[u8],
) -> ApiResult<Value> {
    let body = JsonBody::parse(raw)?;
    let client_id = body.required_str("clientId")?;
    let secret = body.required_str("secret")?;

    let Some(credential) = clients.get(&client_id) else {
        if let Some(decoy) = clients.decoy_hash() {
            // result ignored: the id is unknown either way
            let _ = verify_secret_blocking(secret, decoy.to_string()).await;
        }
        info!(client_id = %client_id, "Token requested for unknown client");
        return Err(ApiError::invalid_credentials());
    };

    if !verify_secret_blocking(secret, credential.secret_hash.clone()).await {
        info!(client_id = %client_id, "Token request with wrong secret");
        return Err(ApiError::invalid_credentials());
    }

    if !credential.enabled {
        info!(client_id = %client_id, "Token requested for disabled client");
        return Err(ApiError::client_disabled());
    }

    let signed = issuer.issue(credential).map_err(|e| {
        warn!(client_id = %client_id, error = %e, "Token signing failed");
        ApiError::internal()
    })?;

    info!(client_id = %client_id, token_id = %signed.token_id, "Token issued");
    Ok(json!({
        "access_token": signed.token,
        "token_type": "Bearer",
        "expires_in": signed.expires_in,
    }))
}
