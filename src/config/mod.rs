use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub factus: FactusConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Invoicing provider connection settings
#[derive(Clone, Deserialize)]
pub struct FactusConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Upper bound on how long a token is trusted, whatever the provider says.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_seconds: u32,
    /// Tokens are treated as stale this many seconds before they expire.
    #[serde(default = "default_token_expiry_skew")]
    pub token_expiry_skew_seconds: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://api-sandbox.factus.com.co".to_string()
}

fn default_token_ttl() -> u32 {
    3600
}

fn default_token_expiry_skew() -> u32 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

impl FactusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for FactusConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            token_ttl_seconds: default_token_ttl(),
            token_expiry_skew_seconds: default_token_expiry_skew(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

// Secrets stay out of debug output.
impl std::fmt::Debug for FactusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactusConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("token_expiry_skew_seconds", &self.token_expiry_skew_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish_non_exhaustive()
    }
}

/// Catalog store and snapshot settings
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// Version tag applied to versioned catalogs on first load.
    #[serde(default = "default_resolution_version")]
    pub resolution_version: String,
    #[serde(default = "default_resolution_date")]
    pub resolution_date: NaiveDate,
    #[serde(default = "default_sync_on_startup")]
    pub sync_on_startup: bool,
}

fn default_database_path() -> String {
    "catalogs.db".to_string()
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("data/catalogs")
}

fn default_resolution_version() -> String {
    "1.0.0".to_string()
}

fn default_resolution_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

fn default_sync_on_startup() -> bool {
    true
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            snapshot_dir: default_snapshot_dir(),
            resolution_version: default_resolution_version(),
            resolution_date: default_resolution_date(),
            sync_on_startup: default_sync_on_startup(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Required bearer token for the admin sync trigger. None = trigger disabled.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Origin allowed by CORS (the admin UI). None = any origin.
    #[serde(default)]
    pub cors_allowed_origin: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            admin_token: None,
            cors_allowed_origin: None,
        }
    }
}

impl BridgeConfig {
    /// Overlay environment variables on top of file values.
    pub fn apply_env(mut self) -> Self {
        self.apply_env_with(|key| std::env::var(key).ok());
        self
    }

    fn apply_env_with<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(v) = lookup("FACTUS_BASE_URL") {
            self.factus.base_url = v;
        }
        if let Some(v) = lookup("FACTUS_CLIENT_ID") {
            self.factus.client_id = v;
        }
        if let Some(v) = lookup("FACTUS_CLIENT_SECRET") {
            self.factus.client_secret = v;
        }
        if let Some(v) = lookup("FACTUS_USERNAME") {
            self.factus.username = v;
        }
        if let Some(v) = lookup("FACTUS_PASSWORD") {
            self.factus.password = v;
        }
        if let Some(v) = lookup("FACTUS_TOKEN_TTL_SECONDS") {
            if let Ok(n) = v.parse::<u32>() {
                self.factus.token_ttl_seconds = n;
            }
        }
        if let Some(v) = lookup("BRIDGE_DATABASE_PATH") {
            self.catalog.database_path = v;
        }
        if let Some(v) = lookup("BRIDGE_ADMIN_TOKEN") {
            if !v.is_empty() {
                self.api.admin_token = Some(v);
            }
        }
        if let Some(v) = lookup("BRIDGE_BIND_ADDRESS") {
            self.api.bind_address = v;
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.factus.token_ttl_seconds, 3600);
        assert_eq!(config.factus.request_timeout_seconds, 30);
        assert_eq!(config.catalog.resolution_version, "1.0.0");
        assert!(config.catalog.sync_on_startup);
        assert_eq!(config.api.bind_address, "0.0.0.0:3000");
        assert!(config.api.admin_token.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [factus]
            base_url = "https://api.factus.com.co"
            client_id = "client"
            client_secret = "secret"
            username = "pos@example.com"
            password = "hunter2"
            token_ttl_seconds = 600

            [catalog]
            database_path = ":memory:"
            snapshot_dir = "/srv/catalogs"
            resolution_version = "2.1.0"
            resolution_date = "2024-06-30"

            [api]
            bind_address = "127.0.0.1:8080"
            admin_token = "admin"
        "#;

        let config: BridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.factus.base_url, "https://api.factus.com.co");
        assert_eq!(config.factus.token_ttl_seconds, 600);
        assert_eq!(config.factus.token_expiry_skew_seconds, 30);
        assert_eq!(config.catalog.snapshot_dir, PathBuf::from("/srv/catalogs"));
        assert_eq!(
            config.catalog.resolution_date,
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
        );
        assert_eq!(config.api.admin_token.as_deref(), Some("admin"));
    }

    #[test]
    fn test_example_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/bridge.example.toml");
        let config = load_config(path).unwrap();
        assert_eq!(config.catalog.snapshot_dir, PathBuf::from("data/catalogs"));
        assert!(config.api.admin_token.is_none());
    }

    #[test]
    fn test_token_lifetimes_out_of_range() {
        let toml = r#"
            [factus]
            token_ttl_seconds = 4294967296
        "#;
        assert!(toml::from_str::<BridgeConfig>(toml).is_err());

        let mut config = BridgeConfig::default();
        config.apply_env_with(|key| {
            (key == "FACTUS_TOKEN_TTL_SECONDS").then(|| "99999999999".to_string())
        });
        assert_eq!(config.factus.token_ttl_seconds, 3600);
    }

    #[test]
    fn test_missing_config_file() {
        assert!(load_config("/definitely/not/bridge.toml").is_err());
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [api]
            bind_address = "127.0.0.1:9000"
        "#;

        let config: BridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");
        assert_eq!(config.factus.token_ttl_seconds, 3600); // Default
        assert_eq!(config.catalog.database_path, "catalogs.db"); // Default
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("FACTUS_CLIENT_ID", "env-client"),
            ("FACTUS_PASSWORD", "env-pass"),
            ("FACTUS_TOKEN_TTL_SECONDS", "not-a-number"),
            ("BRIDGE_ADMIN_TOKEN", "env-admin"),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::default();
        config.factus.client_id = "file-client".to_string();
        config.apply_env_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.factus.client_id, "env-client");
        assert_eq!(config.factus.password, "env-pass");
        // Unparseable numbers leave the previous value in place
        assert_eq!(config.factus.token_ttl_seconds, 3600);
        assert_eq!(config.api.admin_token.as_deref(), Some("env-admin"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut config = FactusConfig::default();
        config.client_secret = "very-secret".to_string();
        config.password = "hunter2".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("hunter2"));
    }
}
