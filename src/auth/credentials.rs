//! Credential storage and management
//!
//! Handles persisting the access/refresh token pair across process
//! restarts. The store itself is an opaque key-value boundary so the file
//! implementation can be swapped for a platform secure store (or an
//! in-memory one in tests) without touching the session layer.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use crate::Result;

/// Storage key for the short-lived bearer token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the single-use-per-exchange refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the access-token expiry hint (RFC 3339)
pub const EXPIRES_AT_KEY: &str = "expires_at";

/// Credential store trait - scoped key-value secret storage
///
/// Only the session manager and refresh coordinator ever write through
/// this boundary.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}

/// Access/refresh token pair issued by the backend
///
/// The refresh token is invalidated by the backend on every successful
/// exchange, so a stored one must never be exchanged twice concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,

    /// Expiry hint for status display. The request pipeline is driven by
    /// authorization failures from the backend, never by this clock.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialPair {
    /// Create a pair from a token grant with a relative expiry
    pub fn new(access_token: String, refresh_token: String, expires_in_secs: Option<i64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Check if the access token is expired or about to expire
    ///
    /// Returns true if the token expires within the next 5 minutes
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => {
                let buffer = chrono::Duration::minutes(5);
                Utc::now() + buffer >= expires
            }
            None => false,
        }
    }
}

/// Load the stored pair, if both tokens are present
pub fn load(store: &dyn CredentialStore) -> Result<Option<CredentialPair>> {
    let access_token = match store.get(ACCESS_TOKEN_KEY)? {
        Some(token) => token,
        None => return Ok(None),
    };
    let refresh_token = match store.get(REFRESH_TOKEN_KEY)? {
        Some(token) => token,
        None => return Ok(None),
    };

    let expires_at = store
        .get(EXPIRES_AT_KEY)?
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Some(CredentialPair {
        access_token,
        refresh_token,
        expires_at,
    }))
}

/// Persist a pair, replacing whatever was stored
pub fn save(store: &dyn CredentialStore, pair: &CredentialPair) -> Result<()> {
    store.set(ACCESS_TOKEN_KEY, &pair.access_token)?;
    store.set(REFRESH_TOKEN_KEY, &pair.refresh_token)?;

    match pair.expires_at {
        Some(expires) => store.set(EXPIRES_AT_KEY, &expires.to_rfc3339())?,
        None => store.delete(EXPIRES_AT_KEY)?,
    }

    Ok(())
}

/// Delete every stored credential
pub fn clear(store: &dyn CredentialStore) -> Result<()> {
    store.delete(ACCESS_TOKEN_KEY)?;
    store.delete(REFRESH_TOKEN_KEY)?;
    store.delete(EXPIRES_AT_KEY)?;
    Ok(())
}

/// File-backed credential store
///
/// Keeps secrets in a single JSON object at the given path, created with
/// owner-only permissions on Unix.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store under the default location, `~/.bodega/credentials.json`
    pub fn at_default_path() -> Self {
        Self::new(crate::config::config_dir().join("credentials.json"))
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let map: BTreeMap<String, String> = serde_json::from_str(&content)?;
        Ok(map)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        // Create parent directory
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, content)?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// In-memory store for testing
#[derive(Default)]
pub struct InMemoryCredentialStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated with a stored pair
    pub fn with_pair(pair: &CredentialPair) -> Self {
        let store = Self::new();
        save(&store, pair).expect("in-memory save cannot fail");
        store
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }
}
