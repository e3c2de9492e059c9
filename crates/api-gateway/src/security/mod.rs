//! Credential handling: client secrets and signed access tokens.

pub mod secrets;
pub mod tokens;

pub use secrets::{is_bcrypt_hash, verify_secret, verify_secret_blocking};
pub use tokens::{CredentialIssuer, KeyError, SignedToken, SigningKeys, TokenVerdict};
