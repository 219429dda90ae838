//! Data models for haulflow.

mod document;
mod field;
mod record;

pub use document::{BBox, BlockId, BlockType, DocumentStructure, TextBlock, TextMode};
pub use field::{keys, FieldSource, FieldValue};
pub use record::{
    content_hash, derive_identity_hash, format_dispatch_id, DispatchRecord, ProtectionSnapshot,
    RowStatus, WarehouseMode,
};
