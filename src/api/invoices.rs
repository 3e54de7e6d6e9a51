use super::error::AppError;
use crate::factus::{normalize_params, Artifact, ArtifactKind, ArtifactRetriever, InvoiceGateway};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// State for the invoice API.
#[derive(Clone)]
pub struct InvoiceAppState {
    pub gateway: InvoiceGateway,
    pub artifacts: ArtifactRetriever,
}

pub fn create_invoice_router(state: InvoiceAppState) -> Router {
    Router::new()
        .route("/api/invoices", get(list_invoices).post(create_invoice))
        .route("/api/invoices/:number", get(get_invoice))
        .route("/api/invoices/:number/status", get(get_invoice_status))
        .route("/api/invoices/:number/pdf", get(download_pdf))
        .route("/api/invoices/:number/xml", get(download_xml))
        .with_state(Arc::new(state))
}

/// GET /api/invoices?page=&status=&...: one page of invoice summaries.
async fn list_invoices(
    State(state): State<Arc<InvoiceAppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let filter = normalize_params(&params);
    let page = state.gateway.list_with_filter(&filter).await?;
    Ok(Json(serde_json::to_value(page).map_err(anyhow::Error::from)?))
}

/// POST /api/invoices: submit a payload to the provider as-is.
async fn create_invoice(
    State(state): State<Arc<InvoiceAppState>>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if !payload.is_object() {
        return Err(AppError::BadRequest(
            "Invoice payload must be a JSON object".to_string(),
        ));
    }
    let invoice = state.gateway.create_invoice(&payload).await?;
    Ok((StatusCode::CREATED, Json(invoice.0)))
}

async fn get_invoice(
    State(state): State<Arc<InvoiceAppState>>,
    Path(number): Path<String>,
) -> Result<Json<Value>, AppError> {
    let invoice = state.gateway.get_invoice_by_number(&number).await?;
    Ok(Json(invoice.0))
}

async fn get_invoice_status(
    State(state): State<Arc<InvoiceAppState>>,
    Path(number): Path<String>,
) -> Result<Json<Value>, AppError> {
    let status = state.gateway.get_invoice_status(&number).await?;
    Ok(Json(serde_json::to_value(status).map_err(anyhow::Error::from)?))
}

async fn download_pdf(
    State(state): State<Arc<InvoiceAppState>>,
    Path(number): Path<String>,
) -> Result<Response, AppError> {
    download(&state, &number, ArtifactKind::Pdf).await
}

async fn download_xml(
    State(state): State<Arc<InvoiceAppState>>,
    Path(number): Path<String>,
) -> Result<Response, AppError> {
    download(&state, &number, ArtifactKind::Xml).await
}

async fn download(
    state: &InvoiceAppState,
    number: &str,
    kind: ArtifactKind,
) -> Result<Response, AppError> {
    let artifact = state.artifacts.download_artifact(number, kind).await?;
    info!(
        number = %number,
        kind = %kind.extension(),
        bytes = artifact.bytes().len(),
        "Serving invoice artifact"
    );
    Ok(artifact_response(artifact))
}

/// Attachment response; the browser must not sniff or frame the document.
fn artifact_response(artifact: Artifact) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        safe_file_name(artifact.file_name())
    );
    let headers = [
        (header::CONTENT_TYPE, artifact.mime_type().to_string()),
        (header::CONTENT_DISPOSITION, disposition),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        (header::X_FRAME_OPTIONS, "DENY".to_string()),
    ];
    (headers, artifact.into_bytes()).into_response()
}

fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
