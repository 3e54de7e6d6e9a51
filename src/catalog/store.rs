//! Catalog persistence using SQLite.

use super::{CatalogEntry, CatalogType, CatalogVersion, VersionedCatalogEntry};
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Catalog tables backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE catalog_entries (
///     id INTEGER PRIMARY KEY,
///     catalog_type TEXT NOT NULL,
///     code TEXT NOT NULL,
///     name TEXT NOT NULL,
///     active INTEGER NOT NULL,
///     extra TEXT NOT NULL,              -- JSON object
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(catalog_type, code)
/// );
///
/// CREATE TABLE versioned_catalog_entries (
///     ...same columns...,
///     resolution_version TEXT NOT NULL,
///     resolution_date TEXT NOT NULL,    -- YYYY-MM-DD
///     UNIQUE(catalog_type, code)
/// );
/// ```
///
/// The `(catalog_type, code)` constraints make concurrent first-time loads
/// safe: a racing duplicate insert is ignored rather than stored twice.
pub struct CatalogStore {
    conn: Mutex<Connection>,
}

impl CatalogStore {
    /// Opens (or creates) the database and ensures the tables exist.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open catalog DB at {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("catalog store connection lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS catalog_entries (
                id           INTEGER PRIMARY KEY,
                catalog_type TEXT NOT NULL,
                code         TEXT NOT NULL,
                name         TEXT NOT NULL,
                active       INTEGER NOT NULL DEFAULT 1,
                extra        TEXT NOT NULL DEFAULT '{}',
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                UNIQUE(catalog_type, code)
            );
            CREATE TABLE IF NOT EXISTS versioned_catalog_entries (
                id                 INTEGER PRIMARY KEY,
                catalog_type       TEXT NOT NULL,
                code               TEXT NOT NULL,
                name               TEXT NOT NULL,
                active             INTEGER NOT NULL DEFAULT 1,
                extra              TEXT NOT NULL DEFAULT '{}',
                resolution_version TEXT NOT NULL,
                resolution_date    TEXT NOT NULL,
                created_at         TEXT NOT NULL,
                UNIQUE(catalog_type, code)
            );
            CREATE INDEX IF NOT EXISTS idx_versioned_type_date
                ON versioned_catalog_entries(catalog_type, resolution_date);",
        )
        .context("Failed to create catalog tables")?;
        Ok(())
    }

    /// Inserts or refreshes an entry keyed by `(catalog_type, code)`.
    pub fn upsert_entry(&self, entry: &CatalogEntry) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let extra = serde_json::to_string(&entry.extra).context("Failed to encode extra")?;
        self.conn()?
            .execute(
                r#"
                INSERT INTO catalog_entries (
                    catalog_type, code, name, active, extra, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(catalog_type, code) DO UPDATE SET
                    name = excluded.name,
                    active = excluded.active,
                    extra = excluded.extra,
                    updated_at = excluded.updated_at
                "#,
                params![
                    entry.catalog_type.as_str(),
                    entry.code,
                    entry.name,
                    entry.active,
                    extra,
                    now,
                    now,
                ],
            )
            .with_context(|| format!("Failed to upsert {} entry {}", entry.catalog_type, entry.code))?;
        Ok(())
    }

    pub fn get_entry(&self, catalog_type: CatalogType, code: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT code, name, active, extra FROM catalog_entries
             WHERE catalog_type = ?1 AND code = ?2",
            params![catalog_type.as_str(), code],
            |row| entry_from_row(catalog_type, row),
        )
        .optional()
        .context("Failed to query catalog entry")
    }

    /// All synced entries of a type, ordered by code.
    pub fn list_entries(&self, catalog_type: CatalogType) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT code, name, active, extra FROM catalog_entries
                 WHERE catalog_type = ?1 ORDER BY code",
            )
            .context("Failed to prepare list_entries query")?;
        let entries = stmt
            .query_map(params![catalog_type.as_str()], |row| entry_from_row(catalog_type, row))
            .context("Failed to query catalog entries")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read catalog entries")?;
        Ok(entries)
    }

    pub fn count_entries(&self, catalog_type: CatalogType) -> Result<usize> {
        self.count("catalog_entries", catalog_type)
    }

    pub fn count_versioned(&self, catalog_type: CatalogType) -> Result<usize> {
        self.count("versioned_catalog_entries", catalog_type)
    }

    fn count(&self, table: &str, catalog_type: CatalogType) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE catalog_type = ?1", table),
                params![catalog_type.as_str()],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to count {} rows", table))?;
        Ok(count as usize)
    }

    /// Inserts versioned entries in one transaction.
    ///
    /// Rows whose `(catalog_type, code)` already exists are ignored. Returns
    /// the number of rows actually inserted.
    pub fn insert_versioned(
        &self,
        entries: &[CatalogEntry],
        resolution_version: &str,
        resolution_date: NaiveDate,
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let date = resolution_date.format(DATE_FORMAT).to_string();

        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT OR IGNORE INTO versioned_catalog_entries (
                        catalog_type, code, name, active, extra,
                        resolution_version, resolution_date, created_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                )
                .context("Failed to prepare versioned insert")?;
            for entry in entries {
                let extra = serde_json::to_string(&entry.extra).context("Failed to encode extra")?;
                inserted += stmt
                    .execute(params![
                        entry.catalog_type.as_str(),
                        entry.code,
                        entry.name,
                        entry.active,
                        extra,
                        resolution_version,
                        date,
                        now,
                    ])
                    .with_context(|| format!("Failed to insert versioned entry {}", entry.code))?;
            }
        }
        tx.commit().context("Failed to commit versioned insert")?;
        Ok(inserted)
    }

    pub fn list_versioned(&self, catalog_type: CatalogType) -> Result<Vec<VersionedCatalogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT code, name, active, extra, resolution_version, resolution_date
                 FROM versioned_catalog_entries WHERE catalog_type = ?1 ORDER BY code",
            )
            .context("Failed to prepare list_versioned query")?;
        let rows = stmt
            .query_map(params![catalog_type.as_str()], |row| {
                let entry = entry_from_row(catalog_type, row)?;
                let version: String = row.get(4)?;
                let date: String = row.get(5)?;
                Ok((entry, version, date))
            })
            .context("Failed to query versioned entries")?;

        let mut entries = Vec::new();
        for row in rows {
            let (entry, resolution_version, date) = row.context("Failed to read versioned row")?;
            entries.push(VersionedCatalogEntry {
                entry,
                resolution_version,
                resolution_date: parse_date(&date)?,
            });
        }
        Ok(entries)
    }

    /// Most recent resolution marker for a type, by resolution date.
    pub fn latest_version(&self, catalog_type: CatalogType) -> Result<Option<CatalogVersion>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT resolution_version, resolution_date FROM versioned_catalog_entries
                 WHERE catalog_type = ?1
                 ORDER BY resolution_date DESC, id DESC LIMIT 1",
                params![catalog_type.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query latest resolution version")?;

        row.map(|(resolution_version, date)| {
            Ok(CatalogVersion {
                resolution_version,
                resolution_date: parse_date(&date)?,
            })
        })
        .transpose()
    }
}

fn entry_from_row(catalog_type: CatalogType, row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let extra: String = row.get(3)?;
    Ok(CatalogEntry {
        catalog_type,
        code: row.get(0)?,
        name: row.get(1)?,
        active: row.get(2)?,
        extra: serde_json::from_str(&extra).unwrap_or_default(),
    })
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .with_context(|| format!("Failed to parse resolution date '{}'", s))
}
