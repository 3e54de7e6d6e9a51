//! Bearer token acquisition for the provider's `/oauth/token` endpoint.
//!
//! A valid cached token is returned without any network call. Otherwise a
//! single refresh runs under an async mutex; callers that queued behind it
//! re-check the cache and reuse the token it installed. One refresh sends
//! exactly one grant: `refresh_token` when the expired token carries one,
//! `password` otherwise.

use crate::config::FactusConfig;
use crate::credentials::{CredentialStore, Token};
use crate::error::{InvoicingError, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Token endpoint response.
///
/// The provider reports lifetime as `expires_in` (seconds); some deployments
/// send an absolute `expires_at` instead.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<Value>,
}

struct PasswordGrant {
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
}

/// Acquires, caches and refreshes the provider bearer token.
pub struct TokenManager {
    http: Client,
    token_url: String,
    grant: PasswordGrant,
    ttl: Duration,
    skew: Duration,
    store: CredentialStore,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(http: Client, base_url: &str, config: &FactusConfig) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth/token", base_url.trim_end_matches('/')),
            grant: PasswordGrant {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
            },
            ttl: Duration::seconds(i64::from(config.token_ttl_seconds)),
            skew: Duration::seconds(i64::from(config.token_expiry_skew_seconds)),
            store: CredentialStore::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.store
    }

    /// Returns a valid token, contacting the auth endpoint only when needed.
    ///
    /// # Errors
    /// `InvoicingError::Auth` if the endpoint is unreachable or rejects the
    /// grant. The previously cached token is discarded in that case.
    pub async fn get_token(&self) -> Result<Token> {
        if let Some(token) = self.store.get_valid(Utc::now(), self.skew) {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.store.get_valid(Utc::now(), self.skew) {
            debug!("Reusing token installed by concurrent refresh");
            return Ok(token);
        }

        let previous = self.store.get();
        self.store.clear();

        // A rejected refresh token is gone with the cleared slot, so the next
        // call starts over with the password grant.
        if let Some(refresh_token) = previous.and_then(|t| t.refresh_token) {
            let form = [
                ("grant_type", "refresh_token"),
                ("client_id", self.grant.client_id.as_str()),
                ("client_secret", self.grant.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ];
            let token = self.request_token(&form).await.inspect_err(|e| {
                warn!(error = %e, "Refresh grant failed");
            })?;
            info!(expires_at = %token.expires_at, "Provider token refreshed");
            self.store.replace(token.clone());
            return Ok(token);
        }

        let form = [
            ("grant_type", "password"),
            ("client_id", self.grant.client_id.as_str()),
            ("client_secret", self.grant.client_secret.as_str()),
            ("username", self.grant.username.as_str()),
            ("password", self.grant.password.as_str()),
        ];
        let token = self.request_token(&form).await?;
        info!(expires_at = %token.expires_at, "Provider token acquired");
        self.store.replace(token.clone());
        Ok(token)
    }

    /// Discards the cached token so the next call re-authenticates.
    pub fn invalidate(&self) {
        if self.store.clear() {
            debug!("Cached provider token invalidated");
        }
    }

    /// Discards the cached token only if it is the one the provider rejected.
    /// A token installed by a concurrent refresh is kept.
    pub fn invalidate_rejected(&self, rejected_access_token: &str) {
        if self.store.clear_if(rejected_access_token) {
            debug!("Rejected provider token invalidated");
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<Token> {
        debug!(url = %self.token_url, "Requesting provider token");

        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| InvoicingError::Auth(format!("token endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InvoicingError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| InvoicingError::Auth(format!("invalid token response: {}", e)))?;

        if token_response.access_token.is_empty() {
            return Err(InvoicingError::Auth(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        let now = Utc::now();
        let token = Token {
            expires_at: expiry_from(&token_response, now, self.ttl),
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
        };
        if !token.is_valid_at(now, self.skew) {
            return Err(InvoicingError::Auth(format!(
                "token endpoint returned an already-expired token (expires at {})",
                token.expires_at
            )));
        }
        Ok(token)
    }
}

/// Absolute expiry for a token response.
///
/// `expires_at` wins over `expires_in`; either is capped at `now + ttl`, and
/// with neither the TTL alone applies. An `expires_in` too large to add to
/// `now` is capped the same way.
fn expiry_from(response: &TokenResponse, now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ceiling = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
    let reported = match response.expires_at.as_ref().and_then(parse_expires_at) {
        Some(at) => Some(at),
        None => response.expires_in.map(|seconds| {
            Duration::try_seconds(seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime))
                .unwrap_or(if seconds < 0 { now } else { ceiling })
        }),
    };
    match reported {
        Some(at) => at.min(ceiling),
        None => ceiling,
    }
}

fn parse_expires_at(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                s.parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
            }),
        _ => None,
    }
}
