//! The non-destructive merge policy.
//!
//! One pure function decides, field by field, whether a newly extracted
//! value may be written into an existing record. All lock, status, and
//! override handling lives here so the rules stay testable in isolation
//! and both the reconciler and any dry-run caller get identical behavior.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{keys, FieldValue, ProtectionSnapshot, RowStatus, WarehouseMode};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Insert,
    Update,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

/// Why a field was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Record is fully locked.
    LockAll,
    /// Record left NEW; only empty fields may be filled.
    FillOnly,
    /// Delivery fields are locked.
    DeliveryLocked,
    /// Warehouse was pinned manually.
    ManualWarehouse,
    /// Release notes are locked.
    ReleaseNotesLocked,
    /// Override columns are never written by the pipeline.
    OverrideProtected,
    /// Incoming value matches what is stored.
    Unchanged,
    /// Incoming value is empty; nothing to write.
    EmptyIncoming,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockAll => "lock_all",
            Self::FillOnly => "fill_only",
            Self::DeliveryLocked => "delivery_locked",
            Self::ManualWarehouse => "manual_warehouse",
            Self::ReleaseNotesLocked => "release_notes_locked",
            Self::OverrideProtected => "override_protected",
            Self::Unchanged => "unchanged",
            Self::EmptyIncoming => "empty_incoming",
        }
    }
}

/// A field the merge refused to write, with the first applicable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedField {
    pub field: String,
    pub reason: SkipReason,
}

/// Field-level decisions for one upsert.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Values to write, in key order.
    pub updates: Vec<FieldValue>,
    pub skipped: Vec<SkippedField>,
}

/// Report returned to callers (and the review surface) after every
/// reconciliation, explaining why each field did or did not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertReport {
    pub action: UpsertAction,
    pub dispatch_id: String,
    pub updated_fields: Vec<String>,
    pub skipped_fields: Vec<SkippedField>,
    /// Protections in effect when the merge ran.
    pub protection: ProtectionSnapshot,
}

/// Decide which incoming fields may be written.
///
/// Rules run strictly in order; the first applicable rule for a field
/// wins. Pure: same inputs, same outcome, regardless of call order.
pub fn merge_fields(
    existing: &BTreeMap<String, FieldValue>,
    incoming: &BTreeMap<String, FieldValue>,
    protection: &ProtectionSnapshot,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (key, candidate) in incoming {
        let reason = skip_reason(existing, key, candidate, protection);
        match reason {
            Some(reason) => outcome.skipped.push(SkippedField {
                field: key.clone(),
                reason,
            }),
            None => outcome.updates.push(candidate.clone()),
        }
    }

    outcome
}

fn skip_reason(
    existing: &BTreeMap<String, FieldValue>,
    key: &str,
    candidate: &FieldValue,
    protection: &ProtectionSnapshot,
) -> Option<SkipReason> {
    // (e) is unconditional: override columns belong to the operator.
    if key.starts_with("override_") {
        return Some(SkipReason::OverrideProtected);
    }

    // (a) full lock: no business field moves.
    if protection.lock_all {
        return Some(SkipReason::LockAll);
    }

    let current = existing.get(key).filter(|f| !f.is_empty());

    // (b) reviewed records are fill-only: non-empty fields are preserved
    // even when the new extraction disagrees.
    if protection.row_status != RowStatus::New && current.is_some() {
        return Some(SkipReason::FillOnly);
    }

    // (c) delivery protection, from either source.
    if keys::is_delivery_protected(key) {
        if protection.lock_delivery {
            return Some(SkipReason::DeliveryLocked);
        }
        if protection.warehouse_mode == WarehouseMode::Manual {
            return Some(SkipReason::ManualWarehouse);
        }
    }

    // (d) release notes.
    if keys::is_release_notes_protected(key) && protection.lock_release_notes {
        return Some(SkipReason::ReleaseNotesLocked);
    }

    // (f) write only real changes.
    if candidate.is_empty() {
        return Some(SkipReason::EmptyIncoming);
    }
    if let Some(current) = current {
        if current.value == candidate.value {
            return Some(SkipReason::Unchanged);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldSource;

    fn field(key: &str, value: &str) -> FieldValue {
        FieldValue::new(key, value.to_string(), FieldSource::Extracted, 0.7)
    }

    fn map(fields: Vec<FieldValue>) -> BTreeMap<String, FieldValue> {
        fields.into_iter().map(|f| (f.key.clone(), f)).collect()
    }

    fn fresh() -> ProtectionSnapshot {
        ProtectionSnapshot::fresh()
    }

    #[test]
    fn test_new_record_accepts_changes() {
        let existing = map(vec![field(keys::VEHICLE_VIN, "OLDVIN")]);
        let incoming = map(vec![
            field(keys::VEHICLE_VIN, "NEWVIN"),
            field(keys::PICKUP_CITY, "Dallas"),
        ]);
        let outcome = merge_fields(&existing, &incoming, &fresh());
        assert_eq!(outcome.updates.len(), 2);
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_lock_all_skips_everything() {
        let mut protection = fresh();
        protection.lock_all = true;
        let incoming = map(vec![
            field(keys::VEHICLE_VIN, "NEWVIN"),
            field(keys::PICKUP_CITY, "Dallas"),
        ]);
        let outcome = merge_fields(&BTreeMap::new(), &incoming, &protection);
        assert!(outcome.updates.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
        assert!(outcome.skipped.iter().all(|s| s.reason == SkipReason::LockAll));
    }

    #[test]
    fn test_fill_only_preserves_reviewed_values() {
        let mut protection = fresh();
        protection.row_status = RowStatus::Ready;
        let existing = map(vec![field(keys::VEHICLE_VIN, "REVIEWED")]);
        let incoming = map(vec![
            field(keys::VEHICLE_VIN, "DIFFERENT"),
            field(keys::PICKUP_CITY, "Dallas"),
        ]);
        let outcome = merge_fields(&existing, &incoming, &protection);
        // The empty pickup_city slot still fills; the reviewed VIN stays.
        assert_eq!(outcome.updates.len(), 1);
        assert_eq!(outcome.updates[0].key, keys::PICKUP_CITY);
        assert_eq!(outcome.skipped[0].reason, SkipReason::FillOnly);
    }

    #[test]
    fn test_delivery_lock_skips_delivery_fields_only() {
        let mut protection = fresh();
        protection.lock_delivery = true;
        let incoming = map(vec![
            field(keys::DELIVERY_CITY, "Austin"),
            field(keys::WAREHOUSE_ID, "WH-9"),
            field(keys::PICKUP_CITY, "Dallas"),
        ]);
        let outcome = merge_fields(&BTreeMap::new(), &incoming, &protection);
        assert_eq!(outcome.updates.len(), 1);
        assert_eq!(outcome.updates[0].key, keys::PICKUP_CITY);
        assert!(outcome
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::DeliveryLocked));
    }

    #[test]
    fn test_manual_warehouse_protects_delivery() {
        let mut protection = fresh();
        protection.warehouse_mode = WarehouseMode::Manual;
        let incoming = map(vec![field(keys::DELIVERY_ZIP, "75201")]);
        let outcome = merge_fields(&BTreeMap::new(), &incoming, &protection);
        assert_eq!(outcome.skipped[0].reason, SkipReason::ManualWarehouse);
    }

    #[test]
    fn test_release_notes_lock() {
        let mut protection = fresh();
        protection.lock_release_notes = true;
        let incoming = map(vec![field(keys::RELEASE_NOTES, "call ahead")]);
        let outcome = merge_fields(&BTreeMap::new(), &incoming, &protection);
        assert_eq!(outcome.skipped[0].reason, SkipReason::ReleaseNotesLocked);
    }

    #[test]
    fn test_override_columns_never_written() {
        let incoming = map(vec![field("override_delivery_city", "Austin")]);
        let outcome = merge_fields(&BTreeMap::new(), &incoming, &fresh());
        assert_eq!(outcome.skipped[0].reason, SkipReason::OverrideProtected);
    }

    #[test]
    fn test_unchanged_value_skipped() {
        let existing = map(vec![field(keys::VEHICLE_VIN, "SAME")]);
        let incoming = map(vec![field(keys::VEHICLE_VIN, "SAME")]);
        let outcome = merge_fields(&existing, &incoming, &fresh());
        assert!(outcome.updates.is_empty());
        assert_eq!(outcome.skipped[0].reason, SkipReason::Unchanged);
    }

    #[test]
    fn test_empty_incoming_never_clobbers() {
        let existing = map(vec![field(keys::VEHICLE_VIN, "KEEP")]);
        let incoming = map(vec![FieldValue::empty(keys::VEHICLE_VIN)]);
        let outcome = merge_fields(&existing, &incoming, &fresh());
        assert!(outcome.updates.is_empty());
        assert_eq!(outcome.skipped[0].reason, SkipReason::EmptyIncoming);
    }

    #[test]
    fn test_rule_order_lock_all_beats_fill_only() {
        let mut protection = fresh();
        protection.lock_all = true;
        protection.row_status = RowStatus::Ready;
        let existing = map(vec![field(keys::VEHICLE_VIN, "X")]);
        let incoming = map(vec![field(keys::VEHICLE_VIN, "Y")]);
        let outcome = merge_fields(&existing, &incoming, &protection);
        assert_eq!(outcome.skipped[0].reason, SkipReason::LockAll);
    }
}
