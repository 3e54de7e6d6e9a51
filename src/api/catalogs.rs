use super::error::AppError;
use crate::auth::verify_admin_token;
use crate::catalog::{CatalogRun, CatalogSynchronizer, CatalogType};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// State for the catalog API.
#[derive(Clone)]
pub struct CatalogAppState {
    pub synchronizer: CatalogSynchronizer,
    pub snapshot_dir: PathBuf,
    pub resolution_version: String,
    pub resolution_date: NaiveDate,
    /// Required bearer token for POST /api/admin/catalogs/sync. None = trigger disabled.
    pub admin_token: Option<String>,
}

#[derive(Deserialize)]
pub struct VersionQuery {
    pub client_version: Option<String>,
}

#[derive(Serialize)]
struct VersionResponse {
    catalog: CatalogType,
    client_version: String,
    has_newer_version: bool,
    current_version: Option<String>,
    resolution_date: Option<NaiveDate>,
}

pub fn create_catalog_router(state: CatalogAppState) -> Router {
    Router::new()
        .route("/api/catalogs/:catalog_type", get(list_entries))
        .route("/api/catalogs/:catalog_type/version", get(check_version))
        .route("/api/admin/catalogs/sync", post(trigger_sync))
        .with_state(Arc::new(state))
}

fn parse_type(raw: &str) -> Result<CatalogType, AppError> {
    raw.parse::<CatalogType>()
        .map_err(|_| AppError::NotFound(format!("Unknown catalog type '{}'", raw)))
}

/// GET /api/catalogs/:type: synced entries ordered by code.
async fn list_entries(
    State(state): State<Arc<CatalogAppState>>,
    Path(raw_type): Path<String>,
) -> Result<Json<Value>, AppError> {
    let catalog_type = parse_type(&raw_type)?;
    let entries = state.synchronizer.list_entries(catalog_type)?;
    Ok(Json(json!({
        "type": catalog_type,
        "count": entries.len(),
        "data": entries,
    })))
}

/// GET /api/catalogs/:type/version?client_version=
async fn check_version(
    State(state): State<Arc<CatalogAppState>>,
    Path(raw_type): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<VersionResponse>, AppError> {
    let catalog_type = parse_type(&raw_type)?;
    let client_version = query
        .client_version
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("client_version is required".to_string()))?;

    let has_newer_version = state
        .synchronizer
        .has_newer_version(catalog_type, &client_version)?;
    let current = state.synchronizer.current_version(catalog_type)?;

    Ok(Json(VersionResponse {
        catalog: catalog_type,
        client_version,
        has_newer_version,
        current_version: current.as_ref().map(|c| c.resolution_version.clone()),
        resolution_date: current.map(|c| c.resolution_date),
    }))
}

/// POST /api/admin/catalogs/sync: re-read snapshots and apply them.
async fn trigger_sync(
    State(state): State<Arc<CatalogAppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Catalog sync trigger is disabled",
                "kind": "forbidden",
            })),
        )
            .into_response());
    };
    if let Err(e) = verify_admin_token(&headers, expected) {
        warn!(error = %e, "Rejected catalog sync trigger");
        return Err(AppError::Unauthorized(e.to_string()));
    }

    let run_state = Arc::clone(&state);
    let run: CatalogRun = tokio::task::spawn_blocking(move || {
        run_state.synchronizer.run_from_dir(
            &run_state.snapshot_dir,
            &run_state.resolution_version,
            run_state.resolution_date,
        )
    })
    .await
    .map_err(|e| AppError::ServerError(format!("Catalog sync task failed: {}", e)))??;

    info!(
        applied = run.synced.applied(),
        failed = run.synced.failed(),
        "Catalog sync triggered by admin"
    );
    Ok(Json(run).into_response())
}
