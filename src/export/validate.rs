//! READY validation: the business rules a record must pass before a
//! listing payload may be built.
//!
//! All checks run over precedence-resolved `final()` values, so operator
//! overrides count. Failures are field-tagged and human-readable; nothing
//! here panics or raises.

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{keys, DispatchRecord};

/// Trailer types the marketplace accepts.
pub const TRAILER_TYPES: &[&str] = &["OPEN", "ENCLOSED", "DRIVEAWAY"];

/// Farthest-out acceptable available date, in days from today.
const MAX_AVAILABLE_DAYS: i64 = 30;

/// Maximum dispatch id length the marketplace stores.
const MAX_DISPATCH_ID_LEN: usize = 50;

/// One field-addressable validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Parse a money value, tolerating "$1,234.50" formatting.
pub fn parse_money(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok()
}

fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

fn require<'a>(
    record: &'a DispatchRecord,
    key: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<&'a str> {
    match record.final_value(key) {
        Some(value) => Some(value),
        None => {
            errors.push(ValidationError::new(key, "required"));
            None
        }
    }
}

fn validate_stop(
    record: &DispatchRecord,
    prefix: &str,
    stop_keys: [&str; 4],
    errors: &mut Vec<ValidationError>,
) {
    let [address, city, state, zip] = stop_keys;
    require(record, address, errors);
    require(record, city, errors);
    if let Some(state) = require(record, state, errors) {
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_uppercase()) {
            errors.push(ValidationError::new(
                state_key(prefix),
                "must be a 2-letter state code",
            ));
        }
    }
    if let Some(zip) = require(record, zip, errors) {
        if zip.len() != 5 || !zip.chars().all(|c| c.is_ascii_digit()) {
            errors.push(ValidationError::new(zip_key(prefix), "must be a 5-digit ZIP"));
        }
    }
}

fn state_key(prefix: &str) -> &'static str {
    if prefix == "pickup" {
        keys::PICKUP_STATE
    } else {
        keys::DELIVERY_STATE
    }
}

fn zip_key(prefix: &str) -> &'static str {
    if prefix == "pickup" {
        keys::PICKUP_ZIP
    } else {
        keys::DELIVERY_ZIP
    }
}

/// Run every export-blocking check against a record.
///
/// An empty result means the record may become READY and a payload can be
/// built from it.
pub fn validate_ready(record: &DispatchRecord) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let today = Utc::now().date_naive();

    if record.dispatch_id.trim().is_empty() {
        errors.push(ValidationError::new("dispatch_id", "required"));
    } else if record.dispatch_id.len() > MAX_DISPATCH_ID_LEN {
        errors.push(ValidationError::new(
            "dispatch_id",
            format!("must be at most {} characters", MAX_DISPATCH_ID_LEN),
        ));
    }

    if let Some(trailer) = require(record, keys::TRAILER_TYPE, &mut errors) {
        if !TRAILER_TYPES.contains(&trailer.to_uppercase().as_str()) {
            errors.push(ValidationError::new(
                keys::TRAILER_TYPE,
                format!("must be one of {}", TRAILER_TYPES.join(", ")),
            ));
        }
    }

    let available = require(record, keys::AVAILABLE_DATE, &mut errors)
        .and_then(|value| match parse_iso_date(value) {
            Some(date) => Some(date),
            None => {
                errors.push(ValidationError::new(
                    keys::AVAILABLE_DATE,
                    "must be a YYYY-MM-DD date",
                ));
                None
            }
        });
    if let Some(date) = available {
        if date < today {
            errors.push(ValidationError::new(keys::AVAILABLE_DATE, "is in the past"));
        } else if date > today + Duration::days(MAX_AVAILABLE_DAYS) {
            errors.push(ValidationError::new(
                keys::AVAILABLE_DATE,
                format!("is more than {} days out", MAX_AVAILABLE_DAYS),
            ));
        }
    }

    if let Some(value) = require(record, keys::EXPIRATION_DATE, &mut errors) {
        match parse_iso_date(value) {
            Some(expiration) => {
                if let Some(available) = available {
                    if expiration <= available {
                        errors.push(ValidationError::new(
                            keys::EXPIRATION_DATE,
                            "must be after the available date",
                        ));
                    }
                }
            }
            None => errors.push(ValidationError::new(
                keys::EXPIRATION_DATE,
                "must be a YYYY-MM-DD date",
            )),
        }
    }

    if let Some(price) = require(record, keys::PRICE, &mut errors) {
        match parse_money(price) {
            Some(amount) if amount > 0.0 => {}
            _ => errors.push(ValidationError::new(keys::PRICE, "must be greater than zero")),
        }
    }

    require(record, keys::MARKETPLACE_ID, &mut errors);

    validate_stop(
        record,
        "pickup",
        [
            keys::PICKUP_ADDRESS,
            keys::PICKUP_CITY,
            keys::PICKUP_STATE,
            keys::PICKUP_ZIP,
        ],
        &mut errors,
    );
    validate_stop(
        record,
        "delivery",
        [
            keys::DELIVERY_ADDRESS,
            keys::DELIVERY_CITY,
            keys::DELIVERY_STATE,
            keys::DELIVERY_ZIP,
        ],
        &mut errors,
    );

    if let Some(vin) = require(record, keys::VEHICLE_VIN, &mut errors) {
        let valid = vin.len() == 17
            && vin
                .chars()
                .all(|c| c.is_ascii_alphanumeric() && !matches!(c, 'I' | 'O' | 'Q' | 'i' | 'o' | 'q'));
        if !valid {
            errors.push(ValidationError::new(
                keys::VEHICLE_VIN,
                "must be 17 characters excluding I/O/Q",
            ));
        }
    }

    errors
}
