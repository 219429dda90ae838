//! Export pipeline: READY validation, payload construction, and
//! submission to the freight-marketplace API.

mod client;
mod payload;
mod submitter;
pub mod validate;

pub use client::{
    backoff_delay, retry_delay, ExportError, ListingReceipt, MarketplaceClient, MAX_ATTEMPTS,
};
pub use payload::{build_payload, ListingPayload, Marketplaces, Price, Stop, Vehicle};
pub use submitter::{ExportService, SubmitError};
pub use validate::{validate_ready, ValidationError};
