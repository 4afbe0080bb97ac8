//! Token persistence
//!
//! Tokens are persisted as three string entries: access token, refresh token
//! and expiry (epoch millis). The pair is only ever read back together.

use erp_core::{storage_error, SessionResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const TOKEN_EXPIRY_KEY: &str = "tokenExpiry";

/// Token pair as held in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Absent when the stored value is missing or not an integer
    pub expires_at_ms: Option<i64>,
}

impl StoredTokens {
    pub fn new(access_token: String, refresh_token: String, expires_at_ms: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at_ms: Some(expires_at_ms),
        }
    }

    /// Expired, or expiry unknown
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.expires_at_ms {
            Some(expires_at) => expires_at <= now_ms,
            None => true,
        }
    }

    fn to_entries(&self) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        entries.insert(ACCESS_TOKEN_KEY.to_string(), self.access_token.clone());
        entries.insert(REFRESH_TOKEN_KEY.to_string(), self.refresh_token.clone());
        if let Some(expires_at) = self.expires_at_ms {
            entries.insert(TOKEN_EXPIRY_KEY.to_string(), expires_at.to_string());
        }
        entries
    }

    /// Read the pair back; a lone access or refresh token counts as no session
    fn from_entries(entries: &BTreeMap<String, String>) -> Option<Self> {
        let access_token = entries.get(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty());
        let refresh_token = entries.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty());

        match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(Self {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
                expires_at_ms: entries
                    .get(TOKEN_EXPIRY_KEY)
                    .and_then(|value| value.trim().parse().ok()),
            }),
            (None, None) => None,
            _ => {
                warn!("Stored session has only one of access/refresh token, ignoring it");
                None
            }
        }
    }
}

/// Session-scoped key/value storage for the token pair
pub trait TokenStore: Send + Sync {
    fn load(&self) -> SessionResult<Option<StoredTokens>>;

    fn save(&self, tokens: &StoredTokens) -> SessionResult<()>;

    fn clear(&self) -> SessionResult<()>;
}

/// In-memory store, lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw entries, as if written by an earlier run
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn with_tokens(tokens: &StoredTokens) -> Self {
        Self {
            entries: Mutex::new(tokens.to_entries()),
        }
    }

    /// Raw value of a single key
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> SessionResult<Option<StoredTokens>> {
        Ok(StoredTokens::from_entries(&self.lock()))
    }

    fn save(&self, tokens: &StoredTokens) -> SessionResult<()> {
        *self.lock() = tokens.to_entries();
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        self.lock().clear();
        Ok(())
    }
}

/// JSON file store, survives restarts of the CLI
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> SessionResult<Option<BTreeMap<String, String>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            storage_error!(
                format!("Failed to read token file {}: {}", self.path.display(), e),
                "file_token_store",
                e
            )
        })?;

        let entries = serde_json::from_str(&data).map_err(|e| {
            storage_error!(
                format!("Token file {} is corrupt: {}", self.path.display(), e),
                "file_token_store",
                e
            )
        })?;

        Ok(Some(entries))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> SessionResult<Option<StoredTokens>> {
        Ok(self
            .read_entries()?
            .and_then(|entries| StoredTokens::from_entries(&entries)))
    }

    fn save(&self, tokens: &StoredTokens) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&tokens.to_entries())?;
        std::fs::write(&self.path, json).map_err(|e| {
            storage_error!(
                format!("Failed to write token file {}: {}", self.path.display(), e),
                "file_token_store",
                e
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("Saved tokens to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed token file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error!(
                format!("Failed to remove token file {}: {}", self.path.display(), e),
                "file_token_store",
                e
            )),
        }
    }
}
