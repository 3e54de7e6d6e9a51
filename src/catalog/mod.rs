//! DIAN reference catalogs mirrored from static snapshots.
//!
//! Snapshots are JSON files, one per catalog type, shipped with the service
//! (`<type>.json` or gzip-compressed `<type>.json.gz`). Each holds an array of
//! `{ code, name, ...extra }` records, bare or wrapped as `{ "data": [...] }`.
//!
//! Two storage modes exist and are not interchangeable:
//! - synced entries are upserted on every run (`sync_catalogs`)
//! - versioned entries are inserted once into an empty type and then left
//!   alone (`load_versioned_catalogs_if_empty`)

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

mod store;
mod sync;


pub use store::CatalogStore;
pub use sync::{CatalogCounts, CatalogRun, CatalogSynchronizer, LoadReport, SyncReport};

/// Catalog types, named as the snapshots and the UI name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CatalogType {
    Paises,
    Ubicaciones,
    Tributos,
    TributosProductos,
    TiposDocumentos,
    MediosPagos,
    Medidas,
}

impl CatalogType {
    pub const ALL: [CatalogType; 7] = [
        CatalogType::Paises,
        CatalogType::Ubicaciones,
        CatalogType::Tributos,
        CatalogType::TributosProductos,
        CatalogType::TiposDocumentos,
        CatalogType::MediosPagos,
        CatalogType::Medidas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogType::Paises => "paises",
            CatalogType::Ubicaciones => "ubicaciones",
            CatalogType::Tributos => "tributos",
            CatalogType::TributosProductos => "tributosProductos",
            CatalogType::TiposDocumentos => "tiposDocumentos",
            CatalogType::MediosPagos => "mediosPagos",
            CatalogType::Medidas => "medidas",
        }
    }
}

impl fmt::Display for CatalogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CatalogType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        CatalogType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow!("unknown catalog type '{}'", s))
    }
}

/// One catalog row, unique by `(catalog_type, code)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub catalog_type: CatalogType,
    pub code: String,
    pub name: String,
    pub active: bool,
    pub extra: Value,
}

/// Catalog row tagged with the resolution it was loaded under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionedCatalogEntry {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub resolution_version: String,
    pub resolution_date: NaiveDate,
}

/// Resolution marker currently stored for a catalog type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogVersion {
    pub resolution_version: String,
    pub resolution_date: NaiveDate,
}

impl CatalogEntry {
    /// Build an entry from a raw snapshot record.
    ///
    /// `code` may be a string or number and falls back to `id`. `active` or
    /// `is_active` set the active flag (default true). Every other key lands
    /// in `extra`.
    pub fn from_record(catalog_type: CatalogType, record: &Value) -> Result<Self> {
        let Some(fields) = record.as_object() else {
            bail!("record is not an object");
        };
        let mut extra: Map<String, Value> = fields.clone();

        let code = match scalar_text(extra.remove("code")) {
            Some(code) => code,
            None => scalar_text(extra.remove("id")).context("record has no code")?,
        };
        let name = match extra.remove("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => bail!("record {} has no name", code),
        };
        let active = [extra.remove("active"), extra.remove("is_active")]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::Bool(b) => Some(b),
                Value::Number(n) => n.as_i64().map(|i| i != 0),
                _ => None,
            })
            .unwrap_or(true);

        Ok(Self {
            catalog_type,
            code,
            name,
            active,
            extra: Value::Object(extra),
        })
    }
}

fn scalar_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Static snapshot of one catalog type. Records stay raw until applied so a
/// malformed record only fails itself.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    pub catalog_type: CatalogType,
    pub records: Vec<Value>,
}

impl CatalogSnapshot {
    pub fn new(catalog_type: CatalogType, records: Vec<Value>) -> Self {
        Self {
            catalog_type,
            records,
        }
    }

    /// Parse snapshot JSON: a bare array or a `{ "data": [...] }` envelope.
    pub fn from_json(catalog_type: CatalogType, json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .with_context(|| format!("Failed to parse {} snapshot JSON", catalog_type))?;
        let records = match value {
            Value::Array(records) => records,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(records)) => records,
                _ => bail!("{} snapshot has no data array", catalog_type),
            },
            _ => bail!("{} snapshot is neither an array nor an envelope", catalog_type),
        };
        Ok(Self::new(catalog_type, records))
    }

    /// Load a snapshot file, decompressing `.gz` files.
    pub fn load_from_file(catalog_type: CatalogType, path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open snapshot file {}", path.display()))?;

        let is_compressed = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "gz")
            .unwrap_or(false);

        let mut json = String::new();
        if is_compressed {
            GzDecoder::new(file)
                .read_to_string(&mut json)
                .context("Failed to decompress snapshot file")?;
        } else {
            let mut file = file;
            file.read_to_string(&mut json)
                .context("Failed to read snapshot file")?;
        }

        Self::from_json(catalog_type, &json)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Load every catalog snapshot found in `dir`.
///
/// Looks for `<type>.json.gz`, then `<type>.json`. Types with no file, or a
/// file that cannot be parsed, are logged and skipped.
pub fn load_snapshots_from_dir(dir: &Path) -> Result<Vec<CatalogSnapshot>> {
    if !dir.is_dir() {
        bail!("snapshot directory {} does not exist", dir.display());
    }

    let mut snapshots = Vec::new();
    for catalog_type in CatalogType::ALL {
        let candidates = [
            dir.join(format!("{}.json.gz", catalog_type)),
            dir.join(format!("{}.json", catalog_type)),
        ];
        let Some(path) = candidates.iter().find(|p| p.is_file()) else {
            warn!(catalog = %catalog_type, dir = %dir.display(), "No snapshot file for catalog");
            continue;
        };

        match CatalogSnapshot::load_from_file(catalog_type, path) {
            Ok(snapshot) => {
                info!(catalog = %catalog_type, records = snapshot.len(), "Snapshot loaded");
                snapshots.push(snapshot);
            }
            Err(e) => {
                warn!(catalog = %catalog_type, path = %path.display(), error = %e, "Skipping unreadable snapshot");
            }
        }
    }
    Ok(snapshots)
}
