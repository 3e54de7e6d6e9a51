use anyhow::{Context, Result};
use axum::http::HeaderValue;
use factus_bridge::api::{
    create_catalog_router, create_invoice_router, CatalogAppState, InvoiceAppState,
};
use factus_bridge::catalog::{CatalogStore, CatalogSynchronizer};
use factus_bridge::config::{load_config, BridgeConfig};
use factus_bridge::factus::{ArtifactRetriever, FactusClient, InvoiceGateway};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "factus_bridge=info".into()),
        )
        .init();

    info!("Factus bridge starting...");

    let config = match std::env::var("BRIDGE_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => BridgeConfig::default(),
    }
    .apply_env();

    info!(
        factus_base_url = %config.factus.base_url,
        database_path = %config.catalog.database_path,
        snapshot_dir = %config.catalog.snapshot_dir.display(),
        bind_address = %config.api.bind_address,
        "Configuration loaded"
    );

    if config.factus.client_id.is_empty() || config.factus.username.is_empty() {
        warn!("Factus credentials are not configured; invoice calls will fail authentication");
    }

    // Catalog store and startup sync
    let store = Arc::new(
        CatalogStore::new(&config.catalog.database_path)
            .context("Failed to initialize catalog store")?,
    );
    let synchronizer = CatalogSynchronizer::new(Arc::clone(&store));

    if config.catalog.sync_on_startup {
        let run_sync = synchronizer.clone();
        let catalog_config = config.catalog.clone();
        let result = tokio::task::spawn_blocking(move || {
            run_sync.run_from_dir(
                &catalog_config.snapshot_dir,
                &catalog_config.resolution_version,
                catalog_config.resolution_date,
            )
        })
        .await
        .context("Catalog sync task panicked")?;

        match result {
            Ok(run) => info!(
                applied = run.synced.applied(),
                failed = run.synced.failed(),
                versioned_loaded = run.versioned.loaded.len(),
                versioned_skipped = run.versioned.skipped.len(),
                "Startup catalog sync complete"
            ),
            Err(e) => warn!(error = %e, "Startup catalog sync failed; serving existing catalogs"),
        }
    }

    // Provider client
    let client = Arc::new(
        FactusClient::new(&config.factus).context("Failed to initialize Factus client")?,
    );
    let invoice_state = InvoiceAppState {
        gateway: InvoiceGateway::new(Arc::clone(&client)),
        artifacts: ArtifactRetriever::new(Arc::clone(&client)),
    };

    if config.api.admin_token.is_none() {
        warn!("BRIDGE_ADMIN_TOKEN not set; catalog sync trigger is disabled");
    }
    let catalog_state = CatalogAppState {
        synchronizer,
        snapshot_dir: config.catalog.snapshot_dir.clone(),
        resolution_version: config.catalog.resolution_version.clone(),
        resolution_date: config.catalog.resolution_date,
        admin_token: config.api.admin_token.clone(),
    };

    let cors = match &config.api.cors_allowed_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .context("cors_allowed_origin is not a valid header value")?,
            )
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    let app = create_invoice_router(invoice_state)
        .merge(create_catalog_router(catalog_state))
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_address))?;
    info!(address = %config.api.bind_address, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Factus bridge stopped");

    Ok(())
}
