use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use subtle::ConstantTimeEq;

/// A client allowed to exchange its secret for tokens.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: String,
    secret: String,
    pub allowed_scopes: BTreeSet<String>,
}

impl std::fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRecord")
            .field("client_id", &self.client_id)
            .field("secret", &"[REDACTED]")
            .field("allowed_scopes", &self.allowed_scopes)
            .finish()
    }
}

impl ClientRecord {
    pub fn new<I, S>(client_id: impl Into<String>, secret: impl Into<String>, allowed_scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            secret: secret.into(),
            allowed_scopes: allowed_scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Compare a presented secret without short-circuiting on the first
    /// differing byte. Only the length can be observed.
    pub fn secret_matches(&self, candidate: &str) -> bool {
        self.secret.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    /// Requested scopes this client may not hold, in request order.
    pub fn disallowed_scopes<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|s| !self.allowed_scopes.contains(s.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Read-only client lookup. Absence is not an error here; the caller
/// decides what an unknown client means.
///
/// The in-memory [`StaticClientRegistry`] is the only implementation in this
/// crate; a store-backed lookup can sit behind the same trait.
pub trait ClientRegistry: Send + Sync {
    fn lookup(&self, client_id: &str) -> Option<Arc<ClientRecord>>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("cannot read clients file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid clients file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("client id must not be empty")]
    EmptyClientId,

    #[error("client {0} is registered more than once")]
    DuplicateClient(String),
}

/// Fixed client table built at start-up and never mutated afterwards, so
/// concurrent reads need no locking.
#[derive(Debug, Default)]
pub struct StaticClientRegistry {
    clients: HashMap<String, Arc<ClientRecord>>,
}

impl StaticClientRegistry {
    pub fn new(records: impl IntoIterator<Item = ClientRecord>) -> Result<Self, RegistryError> {
        let mut clients = HashMap::new();
        for record in records {
            if record.client_id.is_empty() {
                return Err(RegistryError::EmptyClientId);
            }
            if clients.contains_key(&record.client_id) {
                return Err(RegistryError::DuplicateClient(record.client_id));
            }
            clients.insert(record.client_id.clone(), Arc::new(record));
        }
        Ok(Self { clients })
    }

    /// The single demo client registered when no clients file is configured.
    pub fn demo() -> Self {
        let record = ClientRecord::new(
            "client-demo",
            "demo-secret-123",
            ["resources:read", "resources:write"],
        );
        let mut clients = HashMap::new();
        clients.insert(record.client_id.clone(), Arc::new(record));
        Self { clients }
    }

    /// Load `[{clientId, secret, allowedScopes}, ...]` from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<ClientRecord> =
            serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let registry = Self::new(records)?;

        tracing::info!(
            path = %path.display(),
            clients = registry.len(),
            "Client registry loaded"
        );
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl ClientRegistry for StaticClientRegistry {
    fn lookup(&self, client_id: &str) -> Option<Arc<ClientRecord>> {
        self.clients.get(client_id).cloned()
    }
}
