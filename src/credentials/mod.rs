//! In-memory holder for the invoicing provider's bearer token.
//!
//! The token lives only in process memory. It is replaced wholesale on every
//! refresh and cleared when a refresh fails or the provider rejects it.

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// Bearer credential issued by the invoicing provider.
#[derive(Clone, PartialEq)]
pub struct Token {
    /// Access token attached as `Authorization: Bearer ...`
    pub access_token: String,

    /// Refresh token, when the provider issued one
    pub refresh_token: Option<String>,

    /// When the access token stops being valid (UTC)
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// True when the token is still usable at `now`, treating it as expired
    /// `skew` early.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(skew)
            .is_some_and(|stale_at| stale_at > now)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Current token slot.
///
/// Thread safety: a `RwLock` around a single optional token. Lock hold times
/// are a clone or a pointer swap, never an await.
#[derive(Default)]
pub struct CredentialStore {
    current: RwLock<Option<Token>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored token if it is still valid at `now`.
    pub fn get_valid(&self, now: DateTime<Utc>, skew: Duration) -> Option<Token> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|token| token.is_valid_at(now, skew))
            .cloned()
    }

    /// Returns the stored token regardless of expiry.
    pub fn get(&self) -> Option<Token> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replaces the stored token.
    pub fn replace(&self, token: Token) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
    }

    /// Discards the stored token only if its access token is `access_token`.
    /// Returns true if it was discarded.
    pub fn clear_if(&self, access_token: &str) -> bool {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|t| t.access_token == access_token) {
            *guard = None;
            return true;
        }
        false
    }

    /// Discards the stored token. Returns true if one was present.
    pub fn clear(&self) -> bool {
        self.current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
    }
}
