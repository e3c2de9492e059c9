//! Signed access tokens.
//!
//! Tokens are EdDSA (Ed25519) JWS compact tokens. The signing key is a
//! PKCS#8 PEM file generated on first start and reloaded afterwards, so
//! tokens survive restarts. The public half is exported as a JWK.
//!
//! Verification is three-way ([`TokenVerdict`]): callers treat an expired
//! token (re-authenticate) differently from an invalid one (security event).

use crate::domain::config::JwtConfig;
use crate::domain::identity::{ClientCredential, Identity};
use crate::domain::permissions::PermissionSet;
use crate::ports::outbound::TimeSource;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::SigningKey;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha3::{Digest, Sha3_256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Key material failures
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid PKCS#8 key: {0}")]
    Pkcs8(String),
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Ed25519 signing key plus its derived key id.
pub struct SigningKeys {
    signing: SigningKey,
    key_id: String,
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl SigningKeys {
    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let digest = Sha3_256::digest(signing.verifying_key().as_bytes());
        Self {
            key_id: hex::encode(&digest[..8]),
            signing,
        }
    }

    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        SigningKey::from_pkcs8_pem(pem)
            .map(Self::from_signing_key)
            .map_err(|e| KeyError::Pkcs8(e.to_string()))
    }

    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.signing
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| KeyError::Pkcs8(e.to_string()))
    }

    /// Load the key at `path`, or generate one and write it there.
    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        let io_err = |source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let pem = fs::read_to_string(path).map_err(io_err)?;
            let keys = Self::from_pem(&pem)?;
            info!(path = %path.display(), kid = %keys.key_id, "Loaded token signing key");
            return Ok(keys);
        }

        let keys = Self::generate();
        let pem = keys.to_pem()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        write_private(path, pem.as_bytes()).map_err(io_err)?;
        info!(path = %path.display(), kid = %keys.key_id, "Generated token signing key");
        Ok(keys)
    }

    /// First 8 bytes of SHA3-256 over the public key, hex.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Public key as a JWK for third-party verification.
    pub fn public_jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(self.signing.verifying_key().as_bytes()),
            "kid": self.key_id,
            "alg": "EdDSA",
            "use": "sig",
        })
    }

    fn encoding_key(&self) -> Result<EncodingKey, KeyError> {
        let der = self
            .signing
            .to_pkcs8_der()
            .map_err(|e| KeyError::Pkcs8(e.to_string()))?;
        Ok(EncodingKey::from_ed_der(der.as_bytes()))
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_ed_der(self.signing.verifying_key().as_bytes())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(contents)
}

/// Registered JWT claims plus the permission array.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    jti: String,
    iss: String,
    aud: String,
    sub: String,
    #[serde(default)]
    permissions: Vec<String>,
    iat: u64,
    exp: Option<u64>,
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub token_id: String,
    /// Seconds
    pub expires_in: u64,
}

/// Outcome of verifying a raw token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerdict {
    Valid(Identity),
    Invalid { reason: String },
    Expired,
}

impl TokenVerdict {
    fn invalid(reason: &str) -> Self {
        Self::Invalid {
            reason: reason.to_string(),
        }
    }
}

/// Issues and verifies access tokens. Immutable after construction and
/// safe to share across tasks.
pub struct CredentialIssuer {
    keys: SigningKeys,
    encoding: EncodingKey,
    decoding: DecodingKey,
    header: Header,
    validation: Validation,
    issuer: String,
    audience: String,
    validity: Duration,
    clock: Arc<dyn TimeSource>,
}

impl CredentialIssuer {
    pub fn new(
        keys: SigningKeys,
        config: &JwtConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, KeyError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(
            config
                .key_id
                .clone()
                .unwrap_or_else(|| keys.key_id().to_string()),
        );

        // Expiry is checked against the injected clock after decoding.
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);

        Ok(Self {
            encoding: keys.encoding_key()?,
            decoding: keys.decoding_key(),
            keys,
            header,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            validity: config.token_validity,
            clock,
        })
    }

    /// Sign a token carrying the credential's id and permissions.
    pub fn issue(&self, credential: &ClientCredential) -> Result<SignedToken, KeyError> {
        let now = self.clock.now_secs();
        let expires_in = self.validity.as_secs();
        let claims = Claims {
            jti: Uuid::now_v7().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: credential.id.clone(),
            permissions: credential.permissions.to_vec(),
            iat: now,
            exp: Some(now + expires_in),
        };

        let token = jsonwebtoken::encode(&self.header, &claims, &self.encoding)
            .map_err(|e| KeyError::Signing(e.to_string()))?;

        debug!(client_id = %credential.id, jti = %claims.jti, "Issued token");
        Ok(SignedToken {
            token,
            token_id: claims.jti,
            expires_in,
        })
    }

    /// Verify signature, then issuer, audience and expiry, in that order.
    pub fn verify(&self, raw: &str) -> TokenVerdict {
        let data = match jsonwebtoken::decode::<Claims>(raw, &self.decoding, &self.validation) {
            Ok(data) => data,
            Err(e) => {
                let reason = match e.kind() {
                    ErrorKind::InvalidSignature => "Invalid signature",
                    ErrorKind::InvalidIssuer => "Invalid issuer",
                    ErrorKind::InvalidAudience => "Invalid audience",
                    ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => "Invalid issuer",
                    ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => "Invalid audience",
                    _ => "Malformed token",
                };
                debug!(reason, "Token rejected");
                return TokenVerdict::invalid(reason);
            }
        };

        let claims = data.claims;
        match claims.exp {
            Some(exp) if exp > self.clock.now_secs() => TokenVerdict::Valid(Identity {
                client_id: claims.sub,
                permissions: PermissionSet::new(claims.permissions),
                issued_at: claims.iat,
                expires_at: exp,
                token_id: claims.jti,
            }),
            _ => TokenVerdict::Expired,
        }
    }

    pub fn key_id(&self) -> &str {
        self.header.kid.as_deref().unwrap_or_else(|| self.keys.key_id())
    }

    pub fn public_jwk(&self) -> Value {
        let mut jwk = self.keys.public_jwk();
        jwk["kid"] = json!(self.key_id());
        jwk
    }

    /// Configured lifetime of new tokens.
    pub fn validity(&self) -> Duration {
        self.validity
    }
}
