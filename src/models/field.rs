//! Field values and the canonical dispatch field set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::BlockId;

/// Canonical field keys for a dispatch record.
///
/// Every value flowing through extraction, reconciliation, and export is
/// addressed by one of these keys.
pub mod keys {
    pub const VEHICLE_VIN: &str = "vehicle_vin";
    pub const VEHICLE_YEAR: &str = "vehicle_year";
    pub const VEHICLE_MAKE: &str = "vehicle_make";
    pub const VEHICLE_MODEL: &str = "vehicle_model";
    pub const VEHICLE_COLOR: &str = "vehicle_color";
    pub const VEHICLE_LOT_NUMBER: &str = "vehicle_lot_number";
    pub const GATE_PASS_CODE: &str = "gate_pass_code";
    pub const AUCTION_REFERENCE: &str = "auction_reference";
    pub const BUYER_NUMBER: &str = "buyer_number";
    pub const PICKUP_NAME: &str = "pickup_name";
    pub const PICKUP_ADDRESS: &str = "pickup_address";
    pub const PICKUP_CITY: &str = "pickup_city";
    pub const PICKUP_STATE: &str = "pickup_state";
    pub const PICKUP_ZIP: &str = "pickup_zip";
    pub const PICKUP_PHONE: &str = "pickup_phone";
    pub const DELIVERY_NAME: &str = "delivery_name";
    pub const DELIVERY_ADDRESS: &str = "delivery_address";
    pub const DELIVERY_CITY: &str = "delivery_city";
    pub const DELIVERY_STATE: &str = "delivery_state";
    pub const DELIVERY_ZIP: &str = "delivery_zip";
    pub const DELIVERY_PHONE: &str = "delivery_phone";
    pub const DELIVERY_CONTACT: &str = "delivery_contact";
    pub const WAREHOUSE_ID: &str = "warehouse_id";
    pub const AVAILABLE_DATE: &str = "available_date";
    pub const EXPIRATION_DATE: &str = "expiration_date";
    pub const PRICE: &str = "price";
    pub const COD_AMOUNT: &str = "cod_amount";
    pub const PAYMENT_METHOD: &str = "payment_method";
    pub const RELEASE_NOTES: &str = "release_notes";
    pub const MARKETPLACE_ID: &str = "marketplace_id";
    pub const TRAILER_TYPE: &str = "trailer_type";

    /// Every canonical key, in a stable order.
    pub const ALL: &[&str] = &[
        VEHICLE_VIN,
        VEHICLE_YEAR,
        VEHICLE_MAKE,
        VEHICLE_MODEL,
        VEHICLE_COLOR,
        VEHICLE_LOT_NUMBER,
        GATE_PASS_CODE,
        AUCTION_REFERENCE,
        BUYER_NUMBER,
        PICKUP_NAME,
        PICKUP_ADDRESS,
        PICKUP_CITY,
        PICKUP_STATE,
        PICKUP_ZIP,
        PICKUP_PHONE,
        DELIVERY_NAME,
        DELIVERY_ADDRESS,
        DELIVERY_CITY,
        DELIVERY_STATE,
        DELIVERY_ZIP,
        DELIVERY_PHONE,
        DELIVERY_CONTACT,
        WAREHOUSE_ID,
        AVAILABLE_DATE,
        EXPIRATION_DATE,
        PRICE,
        COD_AMOUNT,
        PAYMENT_METHOD,
        RELEASE_NOTES,
        MARKETPLACE_ID,
        TRAILER_TYPE,
    ];

    /// Keys protected by `lock_delivery` and a manual warehouse selection.
    pub const DELIVERY_PROTECTED: &[&str] = &[
        DELIVERY_NAME,
        DELIVERY_ADDRESS,
        DELIVERY_CITY,
        DELIVERY_STATE,
        DELIVERY_ZIP,
        DELIVERY_PHONE,
        DELIVERY_CONTACT,
        WAREHOUSE_ID,
    ];

    /// Keys protected by `lock_release_notes`.
    pub const RELEASE_NOTES_PROTECTED: &[&str] = &[RELEASE_NOTES];

    pub fn is_delivery_protected(key: &str) -> bool {
        DELIVERY_PROTECTED.contains(&key)
    }

    pub fn is_release_notes_protected(key: &str) -> bool {
        RELEASE_NOTES_PROTECTED.contains(&key)
    }
}

/// Where a field value came from.
///
/// Declaration order is the precedence order: when two candidate sources
/// compete for the same key, the earlier variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Operator-entered correction, always wins.
    UserOverride,
    /// Populated from the selected warehouse.
    WarehouseConst,
    /// Fixed value declared by the auction profile.
    AuctionConst,
    /// Extracted from the document.
    Extracted,
    /// Heuristic fallback.
    Default,
    /// No value found.
    Empty,
}

impl FieldSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserOverride => "user_override",
            Self::WarehouseConst => "warehouse_const",
            Self::AuctionConst => "auction_const",
            Self::Extracted => "extracted",
            Self::Default => "default",
            Self::Empty => "empty",
        }
    }

    /// True when this source beats `other` under the precedence order.
    pub fn outranks(&self, other: FieldSource) -> bool {
        self < &other
    }
}

/// The atomic unit produced by extraction and consumed by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub key: String,
    pub value: String,
    pub source: FieldSource,
    /// Extraction confidence in [0, 1].
    pub confidence: f32,
    /// Blocks that justify this value, for auditing and highlighting.
    #[serde(default)]
    pub evidence_block_ids: Vec<BlockId>,
    pub updated_at: DateTime<Utc>,
}

impl FieldValue {
    pub fn new(key: &str, value: String, source: FieldSource, confidence: f32) -> Self {
        Self {
            key: key.to_string(),
            value,
            source,
            confidence,
            evidence_block_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// An empty result for a field no strategy could fill.
    pub fn empty(key: &str) -> Self {
        Self::new(key, String::new(), FieldSource::Empty, 0.0)
    }

    pub fn with_evidence(mut self, blocks: Vec<BlockId>) -> Self {
        self.evidence_block_ids = blocks;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}
