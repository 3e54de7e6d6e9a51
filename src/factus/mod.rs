//! Client for the Factus electronic-invoicing API.
//!
//! ```text
//!  controllers ──► InvoiceGateway ──┐
//!              └─► ArtifactRetriever ┴─► FactusClient ──► TokenManager ──► CredentialStore
//!                                         (bearer, status mapping)   (single-flight refresh)
//! ```
//!
//! Every outbound call pulls a token from the [`TokenManager`] first. A 401
//! from the provider invalidates the cached token; read-only calls then retry
//! exactly once with a fresh token, invoice creation never does.

mod artifact;
mod filter;
mod invoices;
mod token;

pub use artifact::{decode_artifact, Artifact, ArtifactKind, ArtifactRetriever, DownloadPayload};
pub use filter::{normalize, normalize_params, InvoiceFilter, StatusFilter};
pub use invoices::{
    InvoiceGateway, InvoiceListPage, InvoiceStatus, InvoiceSummary, Pagination, ProviderInvoice,
};
pub use token::TokenManager;

use crate::config::FactusConfig;
use crate::error::{InvoicingError, Result};
use anyhow::Context;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

/// Shared connection to the provider: HTTP client, base URL and token source.
pub struct FactusClient {
    http: Client,
    base_url: String,
    tokens: TokenManager,
}

impl FactusClient {
    /// Build a client from configuration.
    ///
    /// The underlying HTTP client carries the configured request timeout so a
    /// stalled provider never blocks a caller indefinitely.
    pub fn new(config: &FactusConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("factus-bridge/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let tokens = TokenManager::new(http.clone(), &base_url, config);
        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send an authorized request built by `build`.
    ///
    /// `build` receives the HTTP client and the current access token and may
    /// be invoked twice when `retry_on_unauthorized` is set.
    async fn send_authorized<F>(&self, build: F, retry_on_unauthorized: bool) -> Result<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let token = self.tokens.get_token().await?;
        let response = build(&self.http, &token.access_token)
            .send()
            .await
            .map_err(InvoicingError::transport)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        self.tokens.invalidate_rejected(&token.access_token);
        if !retry_on_unauthorized {
            return Err(InvoicingError::Auth(
                "provider rejected the bearer token".to_string(),
            ));
        }

        warn!("Provider rejected bearer token, re-authenticating once");
        let token = self.tokens.get_token().await?;
        let response = build(&self.http, &token.access_token)
            .send()
            .await
            .map_err(InvoicingError::transport)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate_rejected(&token.access_token);
            return Err(InvoicingError::Auth(
                "provider rejected a freshly issued bearer token".to_string(),
            ));
        }
        Ok(response)
    }
}

/// Map non-2xx responses onto the error taxonomy.
///
/// - 404 → `NotFound(subject)`
/// - Other non-2xx → `Upstream` with status and body preserved
async fn check_status(response: Response, subject: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        debug!(subject = %subject, "Provider reported not found");
        return Err(InvoicingError::NotFound(subject.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), subject = %subject, "Provider returned error status");
    Err(InvoicingError::upstream(status.as_u16(), body))
}

/// Read a JSON body, reporting malformed JSON as an upstream failure.
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(InvoicingError::transport)?;
    serde_json::from_slice(&body).map_err(|e| InvoicingError::Upstream {
        status: Some(status),
        body: Some(String::from_utf8_lossy(&body).into_owned()),
        message: format!("invalid JSON from provider: {}", e),
    })
}

/// Provider responses wrap their payload as `{ status, message, data }`.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_data_envelope() {
        let body = json!({"status": "OK", "message": "found", "data": {"number": "SETP1"}});
        assert_eq!(unwrap_data(body), json!({"number": "SETP1"}));
    }

    #[test]
    fn test_unwrap_data_passthrough() {
        let body = json!({"number": "SETP1"});
        assert_eq!(unwrap_data(body.clone()), body);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = test_support::client_for("http://localhost:1234/");
        assert_eq!(client.base_url(), "http://localhost:1234");
        assert_eq!(client.url("/v1/bills"), "http://localhost:1234/v1/bills");
    }
}
