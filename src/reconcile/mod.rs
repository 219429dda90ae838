//! Reconciliation: non-destructive upsert of extracted values into
//! canonical dispatch records.
//!
//! The update-or-insert of a single dispatch identity is a critical
//! section; a per-key lock registry serializes concurrent ingestions of
//! the same document so fill-only logic never runs against a stale read.

mod merge;

pub use merge::{
    merge_fields, MergeOutcome, SkipReason, SkippedField, UpsertAction, UpsertReport,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::export::validate::{validate_ready, ValidationError};
use crate::models::{
    format_dispatch_id, DispatchRecord, FieldValue, ProtectionSnapshot, RowStatus, WarehouseMode,
};
use crate::repository::{DispatchRepository, RepositoryError};
use crate::warehouse::{WarehouseDirectory, WarehouseError};

/// Errors from reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// READY was requested but validation failed; the record keeps its
    /// previous status.
    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<ValidationError>),
}

/// Merges extraction results into persistent records.
pub struct Reconciler {
    repo: Arc<DispatchRepository>,
    /// Per-identity write locks; entries live for the process lifetime.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(repo: Arc<DispatchRepository>) -> Self {
        Self {
            repo,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<DispatchRepository> {
        &self.repo
    }

    async fn lock_for(&self, identity_hash: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(identity_hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Upsert one extraction run into the record for `identity_hash`.
    ///
    /// Insert writes every extracted field and starts the record at NEW;
    /// update applies the merge policy field by field. Audit stamps always
    /// refresh. The returned report explains every skip.
    pub async fn upsert(
        &self,
        auction_type: &str,
        identity_hash: &str,
        incoming: BTreeMap<String, FieldValue>,
        needs_classification: bool,
    ) -> Result<(DispatchRecord, UpsertReport), ReconcileError> {
        let key_lock = self.lock_for(identity_hash).await;
        let _guard = key_lock.lock().await;

        match self.repo.find_by_identity_hash(identity_hash)? {
            None => self.insert(auction_type, identity_hash, incoming, needs_classification),
            Some(record) => self.update(record, incoming),
        }
    }

    fn insert(
        &self,
        auction_type: &str,
        identity_hash: &str,
        incoming: BTreeMap<String, FieldValue>,
        needs_classification: bool,
    ) -> Result<(DispatchRecord, UpsertReport), ReconcileError> {
        let dispatch_id = format_dispatch_id(Utc::now(), auction_type, identity_hash);

        let updated_fields: Vec<String> = incoming
            .values()
            .filter(|f| !f.is_empty())
            .map(|f| f.key.clone())
            .collect();
        let skipped_fields: Vec<SkippedField> = incoming
            .values()
            .filter(|f| f.is_empty())
            .map(|f| SkippedField {
                field: f.key.clone(),
                reason: SkipReason::EmptyIncoming,
            })
            .collect();

        let mut record = DispatchRecord::new(
            dispatch_id.clone(),
            identity_hash.to_string(),
            auction_type.to_string(),
            incoming,
        );
        record.needs_classification = needs_classification;
        self.repo.insert(&record)?;

        let report = UpsertReport {
            action: UpsertAction::Insert,
            dispatch_id,
            updated_fields,
            skipped_fields,
            protection: record.protection(),
        };
        self.repo.record_report(&report)?;
        Ok((record, report))
    }

    fn update(
        &self,
        mut record: DispatchRecord,
        incoming: BTreeMap<String, FieldValue>,
    ) -> Result<(DispatchRecord, UpsertReport), ReconcileError> {
        let protection = record.protection();
        let outcome = merge_fields(&record.fields, &incoming, &protection);

        let updated_fields: Vec<String> =
            outcome.updates.iter().map(|f| f.key.clone()).collect();

        if outcome.updates.is_empty() {
            // Nothing writable; refresh the audit stamp only.
            self.repo.touch(&record.dispatch_id)?;
        } else {
            for field in outcome.updates {
                record.fields.insert(field.key.clone(), field);
            }
            self.repo.update(&record)?;
        }
        let record = self.repo.get_required(&record.dispatch_id)?;

        info!(
            "dispatch {}: {} field(s) updated, {} skipped",
            record.dispatch_id,
            updated_fields.len(),
            outcome.skipped.len()
        );

        let report = UpsertReport {
            action: UpsertAction::Update,
            dispatch_id: record.dispatch_id.clone(),
            updated_fields,
            skipped_fields: outcome.skipped,
            protection,
        };
        self.repo.record_report(&report)?;
        Ok((record, report))
    }

    /// Apply a warehouse selection to a record's delivery fields.
    ///
    /// Populates WAREHOUSE_CONST values through the merge policy. The
    /// assignment itself neutralizes fill-only and the manual-mode skip
    /// (it is the operator action that flips the mode), but lock flags
    /// still hold. `manual` pins the selection afterwards.
    pub async fn assign_warehouse(
        &self,
        dispatch_id: &str,
        warehouse_id: &str,
        directory: &dyn WarehouseDirectory,
        manual: bool,
    ) -> Result<(DispatchRecord, UpsertReport), ReconcileError> {
        let record = self.repo.get_required(dispatch_id)?;
        let key_lock = self.lock_for(&record.identity_hash).await;
        let _guard = key_lock.lock().await;
        let mut record = self.repo.get_required(dispatch_id)?;

        let warehouse = directory.get(warehouse_id)?;
        let incoming: BTreeMap<String, FieldValue> = warehouse
            .delivery_fields(warehouse_id)
            .into_iter()
            .map(|f| (f.key.clone(), f))
            .collect();

        let protection = ProtectionSnapshot {
            row_status: RowStatus::New,
            warehouse_mode: WarehouseMode::Auto,
            ..record.protection()
        };
        let outcome = merge_fields(&record.fields, &incoming, &protection);

        let updated_fields: Vec<String> =
            outcome.updates.iter().map(|f| f.key.clone()).collect();
        for field in outcome.updates {
            record.fields.insert(field.key.clone(), field);
        }
        if manual {
            record.warehouse_mode = WarehouseMode::Manual;
        }
        self.repo.update(&record)?;
        let record = self.repo.get_required(dispatch_id)?;

        let report = UpsertReport {
            action: UpsertAction::Update,
            dispatch_id: dispatch_id.to_string(),
            updated_fields,
            skipped_fields: outcome.skipped,
            protection,
        };
        self.repo.record_report(&report)?;
        Ok((record, report))
    }

    /// Move a record through the state machine.
    ///
    /// Any transition into READY re-runs full export validation first; on
    /// failure the record keeps its current status and the field-tagged
    /// errors come back to the caller.
    pub fn transition(
        &self,
        dispatch_id: &str,
        to: RowStatus,
    ) -> Result<DispatchRecord, ReconcileError> {
        if to == RowStatus::Ready {
            let record = self.repo.get_required(dispatch_id)?;
            let errors = validate_ready(&record);
            if !errors.is_empty() {
                return Err(ReconcileError::ValidationFailed(errors));
            }
        }
        Ok(self.repo.update_status(dispatch_id, to)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{keys, FieldSource};
    use crate::warehouse::Warehouse;

    struct OneWarehouse(Warehouse);

    impl WarehouseDirectory for OneWarehouse {
        fn get(&self, id: &str) -> Result<Warehouse, WarehouseError> {
            if id == "WH-1" {
                Ok(self.0.clone())
            } else {
                Err(WarehouseError::Unknown(id.to_string()))
            }
        }
    }

    fn warehouse() -> Warehouse {
        Warehouse {
            name: "DFW Consolidation".into(),
            address: "4800 Commerce St".into(),
            city: "Dallas".into(),
            state: "TX".into(),
            zip: "75226".into(),
            phone: None,
            contact_name: None,
            special_instructions: Some("dock 4".into()),
        }
    }

    fn reconciler() -> (tempfile::TempDir, Reconciler) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(DispatchRepository::new(&dir.path().join("test.db")).unwrap());
        (dir, Reconciler::new(repo))
    }

    fn field(key: &str, value: &str) -> (String, FieldValue) {
        (
            key.to_string(),
            FieldValue::new(key, value.to_string(), FieldSource::Extracted, 0.7),
        )
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let (_dir, reconciler) = reconciler();

        let incoming: BTreeMap<_, _> =
            [field(keys::VEHICLE_VIN, "VIN1"), field(keys::PICKUP_CITY, "Dallas")]
                .into_iter()
                .collect();
        let (record, report) = reconciler
            .upsert("COPART", "AAAA1111", incoming, false)
            .await
            .unwrap();
        assert_eq!(report.action, UpsertAction::Insert);
        assert_eq!(record.row_status, RowStatus::New);
        assert_eq!(record.fields[keys::VEHICLE_VIN].value, "VIN1");

        // Second ingestion of the same identity updates in place.
        let incoming: BTreeMap<_, _> = [field(keys::VEHICLE_VIN, "VIN2")].into_iter().collect();
        let (record, report) = reconciler
            .upsert("COPART", "AAAA1111", incoming, false)
            .await
            .unwrap();
        assert_eq!(report.action, UpsertAction::Update);
        assert_eq!(record.fields[keys::VEHICLE_VIN].value, "VIN2");
        assert_eq!(record.dispatch_id, report.dispatch_id);
    }

    #[tokio::test]
    async fn test_upsert_lock_all_refreshes_audit_only() {
        let (_dir, reconciler) = reconciler();
        let incoming: BTreeMap<_, _> = [field(keys::VEHICLE_VIN, "VIN1")].into_iter().collect();
        let (record, _) = reconciler
            .upsert("COPART", "BBBB2222", incoming, false)
            .await
            .unwrap();

        reconciler
            .repository()
            .set_locks(&record.dispatch_id, Some(true), None, None)
            .unwrap();
        let before = reconciler.repository().get_required(&record.dispatch_id).unwrap();

        let incoming: BTreeMap<_, _> = [field(keys::VEHICLE_VIN, "HACKED")].into_iter().collect();
        let (after, report) = reconciler
            .upsert("COPART", "BBBB2222", incoming, false)
            .await
            .unwrap();

        assert!(report.updated_fields.is_empty());
        assert_eq!(report.skipped_fields[0].reason, SkipReason::LockAll);
        // Business fields byte-identical; only updated_at moved.
        assert_eq!(after.fields[keys::VEHICLE_VIN].value, "VIN1");
        assert_eq!(
            serde_json::to_string(&after.fields).unwrap(),
            serde_json::to_string(&before.fields).unwrap()
        );
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn test_fill_only_after_leaving_new() {
        let (_dir, reconciler) = reconciler();
        let incoming: BTreeMap<_, _> = [field(keys::VEHICLE_VIN, "VIN1")].into_iter().collect();
        let (record, _) = reconciler
            .upsert("COPART", "CCCC3333", incoming, false)
            .await
            .unwrap();
        reconciler
            .repository()
            .update_status(&record.dispatch_id, RowStatus::Hold)
            .unwrap();

        let incoming: BTreeMap<_, _> = [
            field(keys::VEHICLE_VIN, "CHANGED"),
            field(keys::PICKUP_CITY, "Dallas"),
        ]
        .into_iter()
        .collect();
        let (after, report) = reconciler
            .upsert("COPART", "CCCC3333", incoming, false)
            .await
            .unwrap();

        assert_eq!(after.fields[keys::VEHICLE_VIN].value, "VIN1");
        assert_eq!(after.fields[keys::PICKUP_CITY].value, "Dallas");
        assert!(report
            .skipped_fields
            .iter()
            .any(|s| s.field == keys::VEHICLE_VIN && s.reason == SkipReason::FillOnly));
    }

    #[tokio::test]
    async fn test_assign_warehouse_populates_delivery() {
        let (_dir, reconciler) = reconciler();
        let incoming: BTreeMap<_, _> = [field(keys::VEHICLE_VIN, "VIN1")].into_iter().collect();
        let (record, _) = reconciler
            .upsert("COPART", "DDDD4444", incoming, false)
            .await
            .unwrap();

        let directory = OneWarehouse(warehouse());
        let (after, report) = reconciler
            .assign_warehouse(&record.dispatch_id, "WH-1", &directory, true)
            .await
            .unwrap();

        assert_eq!(after.warehouse_mode, WarehouseMode::Manual);
        assert_eq!(after.fields[keys::DELIVERY_CITY].value, "Dallas");
        assert_eq!(
            after.fields[keys::DELIVERY_CITY].source,
            FieldSource::WarehouseConst
        );
        assert_eq!(after.fields[keys::RELEASE_NOTES].value, "dock 4");
        assert!(report.updated_fields.contains(&keys::DELIVERY_ZIP.to_string()));

        // Delivery now pinned: a later ingestion cannot touch it.
        let incoming: BTreeMap<_, _> =
            [field(keys::DELIVERY_CITY, "Elsewhere")].into_iter().collect();
        let (after, report) = reconciler
            .upsert("COPART", "DDDD4444", incoming, false)
            .await
            .unwrap();
        assert_eq!(after.fields[keys::DELIVERY_CITY].value, "Dallas");
        assert_eq!(report.skipped_fields[0].reason, SkipReason::ManualWarehouse);
    }

    #[tokio::test]
    async fn test_assign_warehouse_respects_delivery_lock() {
        let (_dir, reconciler) = reconciler();
        let incoming: BTreeMap<_, _> = [field(keys::VEHICLE_VIN, "VIN1")].into_iter().collect();
        let (record, _) = reconciler
            .upsert("COPART", "EEEE5555", incoming, false)
            .await
            .unwrap();
        reconciler
            .repository()
            .set_locks(&record.dispatch_id, None, Some(true), None)
            .unwrap();

        let directory = OneWarehouse(warehouse());
        let (after, report) = reconciler
            .assign_warehouse(&record.dispatch_id, "WH-1", &directory, false)
            .await
            .unwrap();
        assert!(!after.fields.contains_key(keys::DELIVERY_CITY));
        assert!(report
            .skipped_fields
            .iter()
            .all(|s| s.reason == SkipReason::DeliveryLocked
                || s.reason == SkipReason::ReleaseNotesLocked));
    }

    #[tokio::test]
    async fn test_transition_to_ready_requires_validation() {
        let (_dir, reconciler) = reconciler();
        let incoming: BTreeMap<_, _> = [field(keys::VEHICLE_VIN, "VIN1")].into_iter().collect();
        let (record, _) = reconciler
            .upsert("COPART", "FFFF6666", incoming, false)
            .await
            .unwrap();

        // Far from complete: READY must be refused, status unchanged.
        let err = reconciler
            .transition(&record.dispatch_id, RowStatus::Ready)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ValidationFailed(_)));
        let record = reconciler
            .repository()
            .get_required(&record.dispatch_id)
            .unwrap();
        assert_eq!(record.row_status, RowStatus::New);

        // Non-READY transitions skip validation.
        let record = reconciler
            .transition(&record.dispatch_id, RowStatus::Hold)
            .unwrap();
        assert_eq!(record.row_status, RowStatus::Hold);
    }
}
