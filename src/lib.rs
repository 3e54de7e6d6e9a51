// Provider-facing error taxonomy
pub mod error;

// Configuration (TOML + environment)
pub mod config;

// Provider access-token cache
pub mod credentials;

// Factus client: tokens, invoices, artifacts
pub mod factus;

// DIAN reference catalogs
pub mod catalog;

// Bearer token extraction for admin endpoints
pub mod auth;

// HTTP API
pub mod api;
