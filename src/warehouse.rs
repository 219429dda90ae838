//! Warehouse directory lookup.
//!
//! Warehouses are the delivery endpoints dispatches route to. The
//! directory itself is maintained outside the core; the pipeline consumes
//! it read-only to populate delivery fields and release notes when a
//! warehouse is selected.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{keys, FieldSource, FieldValue};

/// A delivery warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warehouse {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

impl Warehouse {
    /// Delivery field values for this warehouse, as WAREHOUSE_CONST.
    ///
    /// These flow through the same merge policy as extracted values; the
    /// source tag is what gives them their precedence slot.
    pub fn delivery_fields(&self, warehouse_id: &str) -> Vec<FieldValue> {
        let mut fields = vec![
            FieldValue::new(keys::WAREHOUSE_ID, warehouse_id.to_string(), FieldSource::WarehouseConst, 1.0),
            FieldValue::new(keys::DELIVERY_NAME, self.name.clone(), FieldSource::WarehouseConst, 1.0),
            FieldValue::new(keys::DELIVERY_ADDRESS, self.address.clone(), FieldSource::WarehouseConst, 1.0),
            FieldValue::new(keys::DELIVERY_CITY, self.city.clone(), FieldSource::WarehouseConst, 1.0),
            FieldValue::new(keys::DELIVERY_STATE, self.state.clone(), FieldSource::WarehouseConst, 1.0),
            FieldValue::new(keys::DELIVERY_ZIP, self.zip.clone(), FieldSource::WarehouseConst, 1.0),
        ];
        if let Some(phone) = &self.phone {
            fields.push(FieldValue::new(
                keys::DELIVERY_PHONE,
                phone.clone(),
                FieldSource::WarehouseConst,
                1.0,
            ));
        }
        if let Some(contact) = &self.contact_name {
            fields.push(FieldValue::new(
                keys::DELIVERY_CONTACT,
                contact.clone(),
                FieldSource::WarehouseConst,
                1.0,
            ));
        }
        if let Some(instructions) = &self.special_instructions {
            fields.push(FieldValue::new(
                keys::RELEASE_NOTES,
                instructions.clone(),
                FieldSource::WarehouseConst,
                1.0,
            ));
        }
        fields
    }
}

/// Errors loading the warehouse directory.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid warehouse TOML in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Unknown warehouse: {0}")]
    Unknown(String),
}

/// Read-only lookup of warehouses by id.
pub trait WarehouseDirectory {
    fn get(&self, id: &str) -> Result<Warehouse, WarehouseError>;
}

/// TOML-file-backed warehouse directory.
///
/// The file is a table of warehouses keyed by id:
///
/// ```toml
/// [WH-DFW]
/// name = "DFW Consolidation"
/// address = "4800 Commerce St"
/// city = "Dallas"
/// state = "TX"
/// zip = "75226"
/// ```
pub struct TomlWarehouseDirectory {
    warehouses: BTreeMap<String, Warehouse>,
}

impl TomlWarehouseDirectory {
    /// Load the directory from a TOML file. A missing file is an empty
    /// directory, not an error.
    pub fn load(path: &Path) -> Result<Self, WarehouseError> {
        if !path.is_file() {
            return Ok(Self {
                warehouses: BTreeMap::new(),
            });
        }
        let text = fs::read_to_string(path).map_err(|source| WarehouseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let warehouses = toml::from_str(&text).map_err(|source| WarehouseError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { warehouses })
    }

    pub fn len(&self) -> usize {
        self.warehouses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warehouses.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.warehouses.keys().map(|k| k.as_str())
    }
}

impl WarehouseDirectory for TomlWarehouseDirectory {
    fn get(&self, id: &str) -> Result<Warehouse, WarehouseError> {
        self.warehouses
            .get(id)
            .cloned()
            .ok_or_else(|| WarehouseError::Unknown(id.to_string()))
    }
}
