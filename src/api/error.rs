use crate::error::InvoicingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_body: Option<Value>,
}

/// Application error types for API endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
    Invoicing(InvoicingError),
}

impl From<InvoicingError> for AppError {
    fn from(err: InvoicingError) -> Self {
        AppError::Invoicing(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::ServerError(format!("{:#}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, plain(msg, "bad_request")),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, plain(msg, "unauthorized")),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, plain(msg, "not_found")),
            AppError::ServerError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, plain(msg, "server_error"))
            }
            AppError::Invoicing(err) => invoicing_response(err),
        };
        (status, Json(body)).into_response()
    }
}

fn plain(error: String, kind: &'static str) -> ErrorResponse {
    ErrorResponse {
        error,
        kind,
        upstream_status: None,
        upstream_body: None,
    }
}

/// Map provider-facing failures onto HTTP.
///
/// - `Auth` → 502, the provider refused our credentials
/// - `Upstream` → provider 4xx passed through, anything else 502
/// - `NotFound` / `ArtifactMissing` → 404
/// - `InvalidArtifact` → 502 "invalid document"
fn invoicing_response(err: InvoicingError) -> (StatusCode, ErrorResponse) {
    let kind = err.kind();
    let message = err.to_string();
    match err {
        InvoicingError::Auth(_) => (StatusCode::BAD_GATEWAY, plain(message, kind)),
        InvoicingError::Upstream { status, body, .. } => {
            let code = status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let upstream_body = body.map(|b| {
                serde_json::from_str::<Value>(&b).unwrap_or(Value::String(b))
            });
            (
                code,
                ErrorResponse {
                    error: message,
                    kind,
                    upstream_status: status,
                    upstream_body,
                },
            )
        }
        InvoicingError::NotFound(_) | InvoicingError::ArtifactMissing(_) => {
            (StatusCode::NOT_FOUND, plain(message, kind))
        }
        InvoicingError::InvalidArtifact(_) => (StatusCode::BAD_GATEWAY, plain(message, kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_upstream_client_error_passes_through() {
        let (status, body) = render(InvoicingError::upstream(422, r#"{"message":"bad"}"#).into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "upstream_error");
        assert_eq!(body["upstream_status"], 422);
        assert_eq!(body["upstream_body"]["message"], "bad");
    }

    #[tokio::test]
    async fn test_upstream_server_error_is_bad_gateway() {
        let (status, body) = render(InvoicingError::upstream(500, "boom").into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["upstream_body"], "boom");

        let (status, body) = render(InvoicingError::transport("timed out").into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.get("upstream_status").is_none());
    }

    #[tokio::test]
    async fn test_invalid_artifact_is_explicit() {
        let (status, body) = render(InvoicingError::InvalidArtifact("bad signature".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "invalid_artifact");
        assert!(body["error"].as_str().unwrap().contains("invalid document"));
    }

    #[tokio::test]
    async fn test_auth_failure_is_explicit() {
        let (status, body) = render(InvoicingError::Auth("401".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "authentication_failed");
    }

    #[tokio::test]
    async fn test_not_found_kinds() {
        let (status, _) = render(InvoicingError::NotFound("invoice X".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = render(InvoicingError::ArtifactMissing("no pdf".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "artifact_missing");
    }
}
