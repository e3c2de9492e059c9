//! Authenticated identities and registered client credentials.

use crate::domain::config::ClientConfig;
use crate::domain::permissions::PermissionSet;
use crate::security::secrets::bcrypt_cost;
use serde::Serialize;
use std::collections::HashMap;

/// The authenticated, permission-bearing representation of a caller.
///
/// Built once from a verified token and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub client_id: String,
    pub permissions: PermissionSet,
    /// Seconds since Unix epoch
    pub issued_at: u64,
    /// Seconds since Unix epoch
    pub expires_at: u64,
    pub token_id: String,
}

impl Identity {
    pub fn has_permission(&self, required: &str) -> bool {
        self.permissions.satisfies(required)
    }

    /// Seconds left before expiry, zero once expired.
    pub fn expires_in(&self, now_secs: u64) -> u64 {
        self.expires_at.saturating_sub(now_secs)
    }
}

/// A registered caller allowed to request tokens.
#[derive(Debug, Clone)]
pub struct ClientCredential {
    pub id: String,
    pub secret_hash: String,
    pub description: String,
    pub permissions: PermissionSet,
    pub enabled: bool,
}

impl From<&ClientConfig> for ClientCredential {
    fn from(config: &ClientConfig) -> Self {
        Self {
            id: config.id.clone(),
            secret_hash: config.secret_hash.clone(),
            description: config.description.clone(),
            permissions: PermissionSet::new(config.permissions.iter().cloned()),
            enabled: config.enabled,
        }
    }
}

/// Read-only lookup of client credentials by id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientCredential>,
    decoy_hash: Option<String>,
}

impl ClientRegistry {
    pub fn new(clients: impl IntoIterator<Item = ClientCredential>) -> Self {
        let clients: HashMap<_, _> = clients.into_iter().map(|c| (c.id.clone(), c)).collect();
        let decoy_hash = clients
            .values()
            .filter_map(|c| Some((bcrypt_cost(&c.secret_hash)?, &c.secret_hash)))
            .max_by_key(|(cost, _)| *cost)
            .map(|(_, hash)| hash.clone());
        Self {
            clients,
            decoy_hash,
        }
    }

    pub fn from_config(clients: &[ClientConfig]) -> Self {
        Self::new(clients.iter().map(ClientCredential::from))
    }

    /// Look up a client regardless of its enabled flag.
    pub fn get(&self, id: &str) -> Option<&ClientCredential> {
        self.clients.get(id)
    }

    /// The most expensive registered bcrypt hash. Checked for unknown client
    /// ids so their rejection costs as much as a wrong secret.
    pub fn decoy_hash(&self) -> Option<&str> {
        self.decoy_hash.as_deref()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
