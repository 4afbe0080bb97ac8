//! In-memory session state

use erp_client::StoredTokens;
use erp_core::{SessionStatus, User};
use serde::Serialize;

/// Access and refresh token, always held together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch millis; 0 when the persisted expiry was unreadable
    pub expires_at_ms: i64,
}

impl From<StoredTokens> for TokenPair {
    fn from(stored: StoredTokens) -> Self {
        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            expires_at_ms: stored.expires_at_ms.unwrap_or(0),
        }
    }
}

impl From<&TokenPair> for StoredTokens {
    fn from(pair: &TokenPair) -> Self {
        StoredTokens::new(
            pair.access_token.clone(),
            pair.refresh_token.clone(),
            pair.expires_at_ms,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub(crate) tokens: Option<TokenPair>,
    pub(crate) current_user: Option<User>,
}

/// Point-in-time copy of the session, for display and assertions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub current_user: Option<User>,
    pub cached_permissions: usize,
}

impl SessionSnapshot {
    pub(crate) fn new(state: &SessionState, status: SessionStatus, cached_permissions: usize) -> Self {
        Self {
            status,
            access_token: state.tokens.as_ref().map(|t| t.access_token.clone()),
            refresh_token: state.tokens.as_ref().map(|t| t.refresh_token.clone()),
            expires_at_ms: state.tokens.as_ref().map(|t| t.expires_at_ms),
            current_user: state.current_user.clone(),
            cached_permissions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.current_user.is_none()
    }
}
