//! Client secret verification via bcrypt.
//!
//! Only bcrypt hashes are accepted. A stored value in any other format is a
//! configuration error and never compared as plaintext.

use tracing::warn;

const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];

/// Whether `hash` is in a bcrypt format we accept.
pub fn is_bcrypt_hash(hash: &str) -> bool {
    BCRYPT_PREFIXES.iter().any(|p| hash.starts_with(p))
}

/// Work factor of an accepted bcrypt hash (`$2b$12$...` is 12).
pub fn bcrypt_cost(hash: &str) -> Option<u32> {
    if !is_bcrypt_hash(hash) {
        return None;
    }
    hash.get(4..6)?.parse().ok()
}

/// Check `secret` against a stored bcrypt hash.
///
/// Returns `false` for non-bcrypt hashes and for hashes bcrypt cannot parse.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    if !is_bcrypt_hash(hash) {
        warn!("Stored client secret is not a bcrypt hash; rejecting");
        return false;
    }

    match bcrypt::verify(secret, hash) {
        Ok(matched) => matched,
        Err(e) => {
            warn!(error = %e, "Malformed bcrypt hash");
            false
        }
    }
}

/// [`verify_secret`] on the blocking pool; bcrypt is deliberately slow.
pub async fn verify_secret_blocking(secret: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_secret(&secret, &hash))
        .await
        .unwrap_or(false)
}
