use super::{
    load_snapshots_from_dir, CatalogEntry, CatalogSnapshot, CatalogStore, CatalogType,
    CatalogVersion,
};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-type outcome of a synchronization run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogCounts {
    pub catalog: CatalogType,
    pub applied: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub catalogs: Vec<CatalogCounts>,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.catalogs.iter().map(|c| c.applied).sum()
    }

    pub fn failed(&self) -> usize {
        self.catalogs.iter().map(|c| c.failed).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Types that were empty and received rows, with the inserted count.
    pub loaded: Vec<(CatalogType, usize)>,
    /// Types that already held versioned rows and were left untouched.
    pub skipped: Vec<CatalogType>,
}

/// Outcome of a full run over a snapshot directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogRun {
    pub synced: SyncReport,
    pub versioned: LoadReport,
}

/// Applies catalog snapshots to the local store.
#[derive(Clone)]
pub struct CatalogSynchronizer {
    store: Arc<CatalogStore>,
}

impl CatalogSynchronizer {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Upsert every snapshot record keyed by `(type, code)`.
    ///
    /// Records are applied in snapshot order. A record that cannot be parsed
    /// or stored is logged and counted; the rest of the run continues and
    /// already-applied upserts stand.
    pub fn sync_catalogs(&self, snapshots: &[CatalogSnapshot]) -> SyncReport {
        let mut report = SyncReport::default();

        for snapshot in snapshots {
            let mut counts = CatalogCounts {
                catalog: snapshot.catalog_type,
                applied: 0,
                failed: 0,
            };

            for (index, record) in snapshot.records.iter().enumerate() {
                let result = CatalogEntry::from_record(snapshot.catalog_type, record)
                    .and_then(|entry| self.store.upsert_entry(&entry));
                match result {
                    Ok(()) => counts.applied += 1,
                    Err(e) => {
                        counts.failed += 1;
                        warn!(
                            catalog = %snapshot.catalog_type,
                            index,
                            error = %e,
                            "Skipping catalog record"
                        );
                    }
                }
            }

            info!(
                catalog = %snapshot.catalog_type,
                applied = counts.applied,
                failed = counts.failed,
                "Catalog synchronized"
            );
            report.catalogs.push(counts);
        }

        report
    }

    /// Load every snapshot in `dir`, upsert it, then seed empty versioned types.
    pub fn run_from_dir(
        &self,
        dir: &Path,
        version: &str,
        resolution_date: NaiveDate,
    ) -> Result<CatalogRun> {
        let snapshots = load_snapshots_from_dir(dir)?;
        let synced = self.sync_catalogs(&snapshots);
        let versioned = self.load_versioned_catalogs_if_empty(&snapshots, version, resolution_date)?;
        Ok(CatalogRun { synced, versioned })
    }

    /// Insert each snapshot tagged with `version`, but only into types that
    /// have no versioned rows yet. Non-empty types are skipped entirely.
    pub fn load_versioned_catalogs_if_empty(
        &self,
        snapshots: &[CatalogSnapshot],
        version: &str,
        resolution_date: NaiveDate,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for snapshot in snapshots {
            let catalog_type = snapshot.catalog_type;
            let existing = self.store.count_versioned(catalog_type)?;
            if existing > 0 {
                debug!(catalog = %catalog_type, existing, "Versioned catalog already loaded");
                report.skipped.push(catalog_type);
                continue;
            }

            let entries: Vec<CatalogEntry> = snapshot
                .records
                .iter()
                .enumerate()
                .filter_map(|(index, record)| match CatalogEntry::from_record(catalog_type, record) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(catalog = %catalog_type, index, error = %e, "Skipping versioned record");
                        None
                    }
                })
                .collect();

            let inserted = self.store.insert_versioned(&entries, version, resolution_date)?;
            info!(
                catalog = %catalog_type,
                inserted,
                version = %version,
                resolution_date = %resolution_date,
                "Versioned catalog loaded"
            );
            report.loaded.push((catalog_type, inserted));
        }

        Ok(report)
    }

    /// True iff the latest stored resolution version differs from the client's.
    /// A type with no versioned rows has nothing newer.
    pub fn has_newer_version(&self, catalog_type: CatalogType, client_version: &str) -> Result<bool> {
        Ok(self
            .store
            .latest_version(catalog_type)?
            .is_some_and(|current| current.resolution_version != client_version))
    }

    pub fn current_version(&self, catalog_type: CatalogType) -> Result<Option<CatalogVersion>> {
        self.store.latest_version(catalog_type)
    }

    pub fn list_entries(&self, catalog_type: CatalogType) -> Result<Vec<CatalogEntry>> {
        self.store.list_entries(catalog_type)
    }
}
