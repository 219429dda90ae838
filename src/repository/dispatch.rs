//! SQLite-backed dispatch record repository.
//!
//! Field maps and override columns are stored as JSON text alongside the
//! scalar columns, mirroring how record metadata travels elsewhere in the
//! system. Upsert reports are kept as an audit trail for the review
//! surface.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::models::{
    DispatchRecord, FieldSource, FieldValue, RowStatus, WarehouseMode,
};
use crate::reconcile::UpsertReport;

use super::{parse_datetime, RepositoryError, Result};

/// SQLite-backed repository for canonical dispatch records.
pub struct DispatchRepository {
    db_path: PathBuf,
}

impl DispatchRepository {
    /// Create a new repository, initializing the schema.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    /// Get the database path.
    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_records (
                dispatch_id TEXT PRIMARY KEY,
                identity_hash TEXT NOT NULL,
                auction_type TEXT NOT NULL,
                row_status TEXT NOT NULL,
                lock_all INTEGER NOT NULL DEFAULT 0,
                lock_delivery INTEGER NOT NULL DEFAULT 0,
                lock_release_notes INTEGER NOT NULL DEFAULT 0,
                warehouse_mode TEXT NOT NULL DEFAULT 'auto',
                fields TEXT NOT NULL,
                overrides TEXT NOT NULL DEFAULT '{}',
                needs_classification INTEGER NOT NULL DEFAULT 0,
                external_listing_id TEXT,
                export_etag TEXT,
                exported_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dispatch_identity
                ON dispatch_records(identity_hash);
            CREATE INDEX IF NOT EXISTS idx_dispatch_status
                ON dispatch_records(row_status);

            CREATE TABLE IF NOT EXISTS upsert_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dispatch_id TEXT NOT NULL,
                action TEXT NOT NULL,
                report TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (dispatch_id) REFERENCES dispatch_records(dispatch_id)
            );
            "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<(DispatchRecord, String, String)> {
        let fields_json: String = row.get("fields")?;
        let overrides_json: String = row.get("overrides")?;
        let status_str: String = row.get("row_status")?;
        let mode_str: String = row.get("warehouse_mode")?;
        let created: String = row.get("created_at")?;
        let updated: String = row.get("updated_at")?;
        let exported: Option<String> = row.get("exported_at")?;

        let record = DispatchRecord {
            dispatch_id: row.get("dispatch_id")?,
            identity_hash: row.get("identity_hash")?,
            auction_type: row.get("auction_type")?,
            row_status: RowStatus::from_str(&status_str).unwrap_or(RowStatus::New),
            lock_all: row.get("lock_all")?,
            lock_delivery: row.get("lock_delivery")?,
            lock_release_notes: row.get("lock_release_notes")?,
            warehouse_mode: WarehouseMode::from_str(&mode_str).unwrap_or(WarehouseMode::Auto),
            fields: BTreeMap::new(),
            overrides: BTreeMap::new(),
            needs_classification: row.get("needs_classification")?,
            external_listing_id: row.get("external_listing_id")?,
            export_etag: row.get("export_etag")?,
            exported_at: exported.map(|s| parse_datetime(&s)),
            created_at: parse_datetime(&created),
            updated_at: parse_datetime(&updated),
        };

        Ok((record, fields_json, overrides_json))
    }

    fn hydrate(parts: (DispatchRecord, String, String)) -> Result<DispatchRecord> {
        let (mut record, fields_json, overrides_json) = parts;
        record.fields = serde_json::from_str(&fields_json)?;
        record.overrides = serde_json::from_str(&overrides_json)?;
        Ok(record)
    }

    /// Get a record by dispatch id.
    pub fn get(&self, dispatch_id: &str) -> Result<Option<DispatchRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM dispatch_records WHERE dispatch_id = ?")?;
        let parts = stmt
            .query_row(params![dispatch_id], Self::row_to_record)
            .optional()?;
        parts.map(Self::hydrate).transpose()
    }

    /// Get a record by dispatch id, or fail.
    pub fn get_required(&self, dispatch_id: &str) -> Result<DispatchRecord> {
        self.get(dispatch_id)?
            .ok_or_else(|| RepositoryError::NotFound(dispatch_id.to_string()))
    }

    /// Re-resolve a record by the stable identity hash, newest first.
    ///
    /// The date portion of the dispatch id varies with ingestion day; the
    /// hash is what makes re-ingestion idempotent.
    pub fn find_by_identity_hash(&self, identity_hash: &str) -> Result<Option<DispatchRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM dispatch_records WHERE identity_hash = ?
             ORDER BY created_at DESC LIMIT 1",
        )?;
        let parts = stmt
            .query_row(params![identity_hash], Self::row_to_record)
            .optional()?;
        parts.map(Self::hydrate).transpose()
    }

    /// All records, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<RowStatus>) -> Result<Vec<DispatchRecord>> {
        let conn = self.connect()?;
        let mut records = Vec::new();

        match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM dispatch_records WHERE row_status = ?
                     ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map(params![status.as_str()], Self::row_to_record)?;
                for row in rows {
                    records.push(Self::hydrate(row?)?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM dispatch_records ORDER BY created_at DESC")?;
                let rows = stmt.query_map([], Self::row_to_record)?;
                for row in rows {
                    records.push(Self::hydrate(row?)?);
                }
            }
        }

        Ok(records)
    }

    /// Insert a new record.
    pub fn insert(&self, record: &DispatchRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"INSERT INTO dispatch_records
               (dispatch_id, identity_hash, auction_type, row_status,
                lock_all, lock_delivery, lock_release_notes, warehouse_mode,
                fields, overrides, needs_classification,
                external_listing_id, export_etag, exported_at,
                created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
            params![
                record.dispatch_id,
                record.identity_hash,
                record.auction_type,
                record.row_status.as_str(),
                record.lock_all,
                record.lock_delivery,
                record.lock_release_notes,
                record.warehouse_mode.as_str(),
                serde_json::to_string(&record.fields)?,
                serde_json::to_string(&record.overrides)?,
                record.needs_classification,
                record.external_listing_id,
                record.export_etag,
                record.exported_at.map(|d| d.to_rfc3339()),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        info!("created dispatch record {}", record.dispatch_id);
        Ok(())
    }

    /// Write back a record's business fields, flags, and audit stamps.
    ///
    /// `row_status` is intentionally not written here; status moves only
    /// through [`DispatchRepository::update_status`].
    pub fn update(&self, record: &DispatchRecord) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            r#"UPDATE dispatch_records SET
                auction_type = ?2,
                lock_all = ?3,
                lock_delivery = ?4,
                lock_release_notes = ?5,
                warehouse_mode = ?6,
                fields = ?7,
                overrides = ?8,
                needs_classification = ?9,
                updated_at = ?10
               WHERE dispatch_id = ?1"#,
            params![
                record.dispatch_id,
                record.auction_type,
                record.lock_all,
                record.lock_delivery,
                record.lock_release_notes,
                record.warehouse_mode.as_str(),
                serde_json::to_string(&record.fields)?,
                serde_json::to_string(&record.overrides)?,
                record.needs_classification,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(record.dispatch_id.clone()));
        }
        Ok(())
    }

    /// Move a record through the status state machine.
    ///
    /// Rejects transitions outside the table; READY validation is the
    /// caller's responsibility before asking for that transition.
    pub fn update_status(&self, dispatch_id: &str, to: RowStatus) -> Result<DispatchRecord> {
        let record = self.get_required(dispatch_id)?;
        if !record.row_status.can_transition(to) {
            return Err(RepositoryError::InvalidTransition {
                from: record.row_status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let conn = self.connect()?;
        conn.execute(
            "UPDATE dispatch_records SET row_status = ?2, updated_at = ?3 WHERE dispatch_id = ?1",
            params![dispatch_id, to.as_str(), Utc::now().to_rfc3339()],
        )?;
        info!(
            "dispatch {} status {} -> {}",
            dispatch_id,
            record.row_status.as_str(),
            to.as_str()
        );
        self.get_required(dispatch_id)
    }

    /// Refresh only the audit stamp, for updates where every business
    /// field was skipped.
    pub fn touch(&self, dispatch_id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE dispatch_records SET updated_at = ?2 WHERE dispatch_id = ?1",
            params![dispatch_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Set lock flags on a record.
    pub fn set_locks(
        &self,
        dispatch_id: &str,
        lock_all: Option<bool>,
        lock_delivery: Option<bool>,
        lock_release_notes: Option<bool>,
    ) -> Result<DispatchRecord> {
        let mut record = self.get_required(dispatch_id)?;
        if let Some(v) = lock_all {
            record.lock_all = v;
        }
        if let Some(v) = lock_delivery {
            record.lock_delivery = v;
        }
        if let Some(v) = lock_release_notes {
            record.lock_release_notes = v;
        }
        self.update(&record)?;
        self.get_required(dispatch_id)
    }

    /// Pin or release the warehouse selection mode.
    pub fn set_warehouse_mode(&self, dispatch_id: &str, mode: WarehouseMode) -> Result<()> {
        let mut record = self.get_required(dispatch_id)?;
        record.warehouse_mode = mode;
        self.update(&record)
    }

    /// Apply operator corrections as override columns.
    ///
    /// This is the only writer of overrides in the system; the merge
    /// policy refuses them from every other path.
    pub fn apply_corrections(
        &self,
        dispatch_id: &str,
        corrections: &[(String, String)],
    ) -> Result<Vec<FieldValue>> {
        let mut record = self.get_required(dispatch_id)?;
        let mut applied = Vec::with_capacity(corrections.len());

        for (key, value) in corrections {
            record.overrides.insert(key.clone(), value.clone());
            applied.push(FieldValue::new(
                key,
                value.clone(),
                FieldSource::UserOverride,
                1.0,
            ));
        }

        self.update(&record)?;
        info!(
            "applied {} correction(s) to {}",
            applied.len(),
            dispatch_id
        );
        Ok(applied)
    }

    /// Store the outcome of a successful export.
    pub fn record_export(
        &self,
        dispatch_id: &str,
        external_listing_id: &str,
        etag: Option<&str>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"UPDATE dispatch_records SET
                external_listing_id = ?2, export_etag = ?3,
                exported_at = ?4, updated_at = ?4
               WHERE dispatch_id = ?1"#,
            params![
                dispatch_id,
                external_listing_id,
                etag,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Persist an upsert report for the review surface.
    pub fn record_report(&self, report: &UpsertReport) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO upsert_reports (dispatch_id, action, report, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                report.dispatch_id,
                report.action.as_str(),
                serde_json::to_string(report)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent upsert reports for a record.
    pub fn reports(&self, dispatch_id: &str, limit: usize) -> Result<Vec<UpsertReport>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT report FROM upsert_reports WHERE dispatch_id = ?
             ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![dispatch_id, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(serde_json::from_str(&row?)?);
        }
        Ok(reports)
    }

    /// Record counts grouped by status, for the status overview.
    pub fn counts_by_status(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT row_status, COUNT(*) FROM dispatch_records
             GROUP BY row_status ORDER BY row_status",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::keys;

    fn repo() -> (tempfile::TempDir, DispatchRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = DispatchRepository::new(&dir.path().join("test.db")).unwrap();
        (dir, repo)
    }

    fn sample_record(id: &str, hash: &str) -> DispatchRecord {
        let mut fields = BTreeMap::new();
        fields.insert(
            keys::VEHICLE_VIN.to_string(),
            FieldValue::new(
                keys::VEHICLE_VIN,
                "1HGCM82633A123456".into(),
                FieldSource::Extracted,
                0.7,
            ),
        );
        DispatchRecord::new(id.to_string(), hash.to_string(), "COPART".into(), fields)
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let (_dir, repo) = repo();
        let record = sample_record("DC-20250304-COPART-AAAA1111", "AAAA1111");
        repo.insert(&record).unwrap();

        let loaded = repo.get("DC-20250304-COPART-AAAA1111").unwrap().unwrap();
        assert_eq!(loaded.auction_type, "COPART");
        assert_eq!(loaded.row_status, RowStatus::New);
        assert_eq!(
            loaded.fields[keys::VEHICLE_VIN].value,
            "1HGCM82633A123456"
        );
        assert!(loaded.overrides.is_empty());
    }

    #[test]
    fn test_find_by_identity_hash() {
        let (_dir, repo) = repo();
        repo.insert(&sample_record("DC-20250304-COPART-BBBB2222", "BBBB2222"))
            .unwrap();
        let found = repo.find_by_identity_hash("BBBB2222").unwrap();
        assert!(found.is_some());
        assert!(repo.find_by_identity_hash("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_status_respects_state_machine() {
        let (_dir, repo) = repo();
        repo.insert(&sample_record("DC-1", "H1")).unwrap();

        // NEW -> EXPORTED is not in the table.
        let err = repo.update_status("DC-1", RowStatus::Exported).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidTransition { .. }));

        let record = repo.update_status("DC-1", RowStatus::Hold).unwrap();
        assert_eq!(record.row_status, RowStatus::Hold);
    }

    #[test]
    fn test_apply_corrections_writes_overrides() {
        let (_dir, repo) = repo();
        repo.insert(&sample_record("DC-2", "H2")).unwrap();

        let applied = repo
            .apply_corrections(
                "DC-2",
                &[(keys::DELIVERY_CITY.to_string(), "Fort Worth".to_string())],
            )
            .unwrap();
        assert_eq!(applied[0].source, FieldSource::UserOverride);

        let record = repo.get_required("DC-2").unwrap();
        assert_eq!(record.overrides[keys::DELIVERY_CITY], "Fort Worth");
        // Base field untouched.
        assert_eq!(record.final_value(keys::DELIVERY_CITY), Some("Fort Worth"));
        assert!(record.base_value(keys::DELIVERY_CITY).is_none());
    }

    #[test]
    fn test_list_filters_by_status() {
        let (_dir, repo) = repo();
        repo.insert(&sample_record("DC-3", "H3")).unwrap();
        repo.insert(&sample_record("DC-4", "H4")).unwrap();
        repo.update_status("DC-4", RowStatus::Hold).unwrap();

        assert_eq!(repo.list(None).unwrap().len(), 2);
        assert_eq!(repo.list(Some(RowStatus::Hold)).unwrap().len(), 1);
        assert_eq!(repo.list(Some(RowStatus::New)).unwrap().len(), 1);
    }

    #[test]
    fn test_record_export_stores_audit() {
        let (_dir, repo) = repo();
        repo.insert(&sample_record("DC-5", "H5")).unwrap();
        repo.record_export("DC-5", "L-900", Some("\"etag-1\"")).unwrap();

        let record = repo.get_required("DC-5").unwrap();
        assert_eq!(record.external_listing_id.as_deref(), Some("L-900"));
        assert_eq!(record.export_etag.as_deref(), Some("\"etag-1\""));
        assert!(record.exported_at.is_some());
    }
}
