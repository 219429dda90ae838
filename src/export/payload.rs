//! Listing payload construction for the freight-marketplace API.
//!
//! Maps canonical record fields into the marketplace's nested listing
//! shape. Callers run [`validate_ready`](super::validate::validate_ready)
//! first; building from an unvalidated record produces a payload the API
//! would reject, never a panic.

use serde::{Deserialize, Serialize};

use crate::models::{keys, DispatchRecord};

use super::validate::parse_money;

/// A pickup or delivery stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    #[serde(rename = "type")]
    pub stop_type: String,
    pub sequence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
}

/// One vehicle on the listing. The marketplace accepts 1 to 12.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub vin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot_number: Option<String>,
}

/// Price and cash-on-delivery block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cod_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

/// Marketplaces the listing posts to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marketplaces {
    pub ids: Vec<String>,
}

/// The complete listing payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingPayload {
    /// Our dispatch id; the marketplace echoes it back for reconciliation.
    pub external_reference: String,
    pub trailer_type: String,
    pub available_date: String,
    pub expiration_date: String,
    /// Exactly two stops: pickup then delivery.
    pub stops: Vec<Stop>,
    pub vehicles: Vec<Vehicle>,
    pub price: Price,
    pub marketplaces: Marketplaces,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn final_string(record: &DispatchRecord, key: &str) -> String {
    record.final_value(key).unwrap_or_default().to_string()
}

fn final_opt(record: &DispatchRecord, key: &str) -> Option<String> {
    record.final_value(key).map(|v| v.to_string())
}

/// Build the listing payload from a validated record.
pub fn build_payload(record: &DispatchRecord) -> ListingPayload {
    let pickup = Stop {
        stop_type: "PICKUP".to_string(),
        sequence: 1,
        name: final_opt(record, keys::PICKUP_NAME),
        address: final_string(record, keys::PICKUP_ADDRESS),
        city: final_string(record, keys::PICKUP_CITY),
        state: final_string(record, keys::PICKUP_STATE),
        postal_code: final_string(record, keys::PICKUP_ZIP),
        country: "US".to_string(),
        phone: final_opt(record, keys::PICKUP_PHONE),
        contact_name: None,
    };
    let delivery = Stop {
        stop_type: "DELIVERY".to_string(),
        sequence: 2,
        name: final_opt(record, keys::DELIVERY_NAME),
        address: final_string(record, keys::DELIVERY_ADDRESS),
        city: final_string(record, keys::DELIVERY_CITY),
        state: final_string(record, keys::DELIVERY_STATE),
        postal_code: final_string(record, keys::DELIVERY_ZIP),
        country: "US".to_string(),
        phone: final_opt(record, keys::DELIVERY_PHONE),
        contact_name: final_opt(record, keys::DELIVERY_CONTACT),
    };

    let vehicle = Vehicle {
        vin: final_string(record, keys::VEHICLE_VIN),
        year: record
            .final_value(keys::VEHICLE_YEAR)
            .and_then(|v| v.parse().ok()),
        make: final_opt(record, keys::VEHICLE_MAKE),
        model: final_opt(record, keys::VEHICLE_MODEL),
        color: final_opt(record, keys::VEHICLE_COLOR),
        lot_number: final_opt(record, keys::VEHICLE_LOT_NUMBER),
    };

    let price = Price {
        total: record
            .final_value(keys::PRICE)
            .and_then(parse_money)
            .unwrap_or(0.0),
        cod_amount: record.final_value(keys::COD_AMOUNT).and_then(parse_money),
        payment_method: final_opt(record, keys::PAYMENT_METHOD),
    };

    ListingPayload {
        external_reference: record.dispatch_id.clone(),
        trailer_type: final_string(record, keys::TRAILER_TYPE).to_uppercase(),
        available_date: final_string(record, keys::AVAILABLE_DATE),
        expiration_date: final_string(record, keys::EXPIRATION_DATE),
        stops: vec![pickup, delivery],
        vehicles: vec![vehicle],
        price,
        marketplaces: Marketplaces {
            ids: vec![final_string(record, keys::MARKETPLACE_ID)],
        },
        notes: final_opt(record, keys::RELEASE_NOTES),
    }
}
