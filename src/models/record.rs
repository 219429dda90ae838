//! Canonical dispatch records.
//!
//! A [`DispatchRecord`] is the persistent source of truth for one vehicle
//! dispatch, keyed by a deterministic [`dispatch id`](derive_identity_hash)
//! so the same source document always re-resolves to the same record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::field::{keys, FieldValue};

/// Record lifecycle state.
///
/// Transitions are restricted to the table in [`RowStatus::can_transition`];
/// ingestion never moves a record between states on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    New,
    Ready,
    Hold,
    Error,
    Exported,
    Retry,
    Cancelled,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Ready => "ready",
            Self::Hold => "hold",
            Self::Error => "error",
            Self::Exported => "exported",
            Self::Retry => "retry",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "ready" => Some(Self::Ready),
            "hold" => Some(Self::Hold),
            "error" => Some(Self::Error),
            "exported" => Some(Self::Exported),
            "retry" => Some(Self::Retry),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether `self -> to` is an allowed transition.
    pub fn can_transition(&self, to: RowStatus) -> bool {
        use RowStatus::*;
        matches!(
            (*self, to),
            (New, Ready)
                | (New, Hold)
                | (New, Cancelled)
                | (Ready, Exported)
                | (Ready, Error)
                | (Ready, Hold)
                | (Ready, Cancelled)
                | (Error, Retry)
                | (Error, Hold)
                | (Error, Cancelled)
                | (Retry, Exported)
                | (Retry, Error)
                | (Retry, Hold)
                | (Hold, Ready)
                | (Hold, Cancelled)
        )
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exported | Self::Cancelled)
    }

    /// States from which an export attempt may start.
    pub fn is_exportable(&self) -> bool {
        matches!(self, Self::Ready | Self::Retry)
    }
}

/// How the delivery warehouse was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseMode {
    /// Recommended by the pipeline, still replaceable.
    Auto,
    /// Pinned by an operator; ingestion keeps its hands off delivery.
    Manual,
}

impl WarehouseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Everything the merge policy needs to know about a record's protections.
///
/// Captured as one value object so the lock/override rules live in a single
/// pure function instead of scattered conditionals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionSnapshot {
    pub row_status: RowStatus,
    pub lock_all: bool,
    pub lock_delivery: bool,
    pub lock_release_notes: bool,
    pub warehouse_mode: WarehouseMode,
    /// Keys with a non-empty operator override.
    pub overridden_keys: BTreeSet<String>,
}

impl ProtectionSnapshot {
    /// Snapshot for a record that does not exist yet.
    pub fn fresh() -> Self {
        Self {
            row_status: RowStatus::New,
            lock_all: false,
            lock_delivery: false,
            lock_release_notes: false,
            warehouse_mode: WarehouseMode::Auto,
            overridden_keys: BTreeSet::new(),
        }
    }
}

/// The persistent canonical record for one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Primary key: `DC-{YYYYMMDD}-{AUCTION}-{8-char-hash}`.
    pub dispatch_id: String,
    /// Stable hash component of the id, used for re-resolution.
    pub identity_hash: String,
    pub auction_type: String,
    pub row_status: RowStatus,
    pub lock_all: bool,
    pub lock_delivery: bool,
    pub lock_release_notes: bool,
    pub warehouse_mode: WarehouseMode,
    /// Business fields by canonical key.
    pub fields: BTreeMap<String, FieldValue>,
    /// Operator override columns. Only the correction intake writes these.
    pub overrides: BTreeMap<String, String>,
    /// Set when classification fell back to the generic profile.
    pub needs_classification: bool,
    pub external_listing_id: Option<String>,
    pub export_etag: Option<String>,
    pub exported_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DispatchRecord {
    /// Create a fresh record from a first extraction run.
    pub fn new(
        dispatch_id: String,
        identity_hash: String,
        auction_type: String,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        let now = Utc::now();
        Self {
            dispatch_id,
            identity_hash,
            auction_type,
            row_status: RowStatus::New,
            lock_all: false,
            lock_delivery: false,
            lock_release_notes: false,
            warehouse_mode: WarehouseMode::Auto,
            fields,
            overrides: BTreeMap::new(),
            needs_classification: false,
            external_listing_id: None,
            export_etag: None,
            exported_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stored base value for a key, if non-empty.
    pub fn base_value(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|f| f.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Precedence-resolved value: override column if non-empty, else base.
    ///
    /// This is computed, never stored twice; overrides live only in the
    /// override columns and base values only in the field map.
    pub fn final_value(&self, key: &str) -> Option<&str> {
        self.overrides
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .or_else(|| self.base_value(key))
    }

    /// Protection state consumed by the merge policy.
    pub fn protection(&self) -> ProtectionSnapshot {
        ProtectionSnapshot {
            row_status: self.row_status,
            lock_all: self.lock_all,
            lock_delivery: self.lock_delivery,
            lock_release_notes: self.lock_release_notes,
            warehouse_mode: self.warehouse_mode,
            overridden_keys: self
                .overrides
                .iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }
}

/// Derive the stable hash component of a dispatch id.
///
/// The first available identity wins: gate-pass code, auction reference,
/// VIN, then the SHA-256 of the document bytes. Re-ingesting the same
/// document therefore always lands on the same hash.
pub fn derive_identity_hash(
    gate_pass_code: Option<&str>,
    auction_reference: Option<&str>,
    vin: Option<&str>,
    content_hash: &str,
) -> String {
    let identity = [gate_pass_code, auction_reference, vin]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(content_hash);

    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hex::encode(hasher.finalize())[..8].to_uppercase()
}

/// Compute the SHA-256 of raw document bytes.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Format a full dispatch id from its parts.
pub fn format_dispatch_id(date: DateTime<Utc>, auction_type: &str, identity_hash: &str) -> String {
    format!(
        "DC-{}-{}-{}",
        date.format("%Y%m%d"),
        auction_type.to_uppercase(),
        identity_hash
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::field::FieldSource;

    #[test]
    fn test_status_transitions_allowed() {
        assert!(RowStatus::New.can_transition(RowStatus::Ready));
        assert!(RowStatus::Ready.can_transition(RowStatus::Exported));
        assert!(RowStatus::Error.can_transition(RowStatus::Retry));
        assert!(RowStatus::Retry.can_transition(RowStatus::Exported));
        assert!(RowStatus::Hold.can_transition(RowStatus::Ready));
    }

    #[test]
    fn test_status_transitions_rejected() {
        // Direct NEW -> EXPORTED must go through READY.
        assert!(!RowStatus::New.can_transition(RowStatus::Exported));
        assert!(!RowStatus::Exported.can_transition(RowStatus::Ready));
        assert!(!RowStatus::Cancelled.can_transition(RowStatus::New));
        assert!(!RowStatus::Hold.can_transition(RowStatus::Exported));
    }

    #[test]
    fn test_identity_hash_priority() {
        let from_gate = derive_identity_hash(Some("GP123"), Some("LOT9"), None, "abc");
        let from_lot = derive_identity_hash(None, Some("LOT9"), None, "abc");
        let from_content = derive_identity_hash(None, None, None, "abc");
        assert_ne!(from_gate, from_lot);
        assert_ne!(from_lot, from_content);
        assert_eq!(from_gate.len(), 8);

        // Blank identities fall through to the next candidate.
        let blank = derive_identity_hash(Some("  "), Some("LOT9"), None, "abc");
        assert_eq!(blank, from_lot);
    }

    #[test]
    fn test_identity_hash_stable() {
        let a = derive_identity_hash(Some("GP123"), None, None, "x");
        let b = derive_identity_hash(Some("GP123"), None, None, "y");
        assert_eq!(a, b);
    }

    #[test]
    fn test_dispatch_id_format() {
        let date = DateTime::parse_from_rfc3339("2025-03-04T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = format_dispatch_id(date, "copart", "A1B2C3D4");
        assert_eq!(id, "DC-20250304-COPART-A1B2C3D4");
    }

    #[test]
    fn test_final_value_prefers_override() {
        let mut fields = BTreeMap::new();
        fields.insert(
            keys::DELIVERY_CITY.to_string(),
            FieldValue::new(keys::DELIVERY_CITY, "Dallas".into(), FieldSource::Extracted, 0.7),
        );
        let mut record = DispatchRecord::new(
            "DC-20250304-COPART-A1B2C3D4".into(),
            "A1B2C3D4".into(),
            "COPART".into(),
            fields,
        );
        assert_eq!(record.final_value(keys::DELIVERY_CITY), Some("Dallas"));

        record
            .overrides
            .insert(keys::DELIVERY_CITY.to_string(), "Fort Worth".into());
        assert_eq!(record.final_value(keys::DELIVERY_CITY), Some("Fort Worth"));

        // Blank override falls back to the base value.
        record
            .overrides
            .insert(keys::DELIVERY_CITY.to_string(), "   ".into());
        assert_eq!(record.final_value(keys::DELIVERY_CITY), Some("Dallas"));
    }
}
