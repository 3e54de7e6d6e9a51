//! Error taxonomy for calls against the invoicing provider.
//!
//! Every failure surfaced by the token manager, the invoice gateway and the
//! artifact retriever is one of these kinds, so controllers can branch on the
//! kind instead of inspecting fields.

use thiserror::Error;

/// Closed set of failures for provider-facing operations.
#[derive(Debug, Error)]
pub enum InvoicingError {
    /// A bearer token could not be obtained or refreshed.
    #[error("authentication with invoicing provider failed: {0}")]
    Auth(String),

    /// The provider answered with an error status, or could not be reached
    /// at all (`status` is `None` for transport failures).
    #[error("invoicing provider error{}: {message}", status_suffix(.status))]
    Upstream {
        status: Option<u16>,
        body: Option<String>,
        message: String,
    },

    /// The provider reported 404 for a lookup.
    #[error("{0} not found")]
    NotFound(String),

    /// Download succeeded but the payload carried no document.
    #[error("artifact missing from provider response: {0}")]
    ArtifactMissing(String),

    /// Document bytes failed the format signature check.
    #[error("invalid document: {0}")]
    InvalidArtifact(String),
}

impl InvoicingError {
    /// Error for a non-2xx provider response, keeping status and body intact.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        InvoicingError::Upstream {
            status: Some(status),
            message: format!("provider returned status {}", status),
            body: if body.is_empty() { None } else { Some(body) },
        }
    }

    /// Error for a failure that never produced an HTTP response.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        InvoicingError::Upstream {
            status: None,
            body: None,
            message: err.to_string(),
        }
    }

    /// Short machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            InvoicingError::Auth(_) => "authentication_failed",
            InvoicingError::Upstream { .. } => "upstream_error",
            InvoicingError::NotFound(_) => "not_found",
            InvoicingError::ArtifactMissing(_) => "artifact_missing",
            InvoicingError::InvalidArtifact(_) => "invalid_artifact",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {})", s)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, InvoicingError>;
