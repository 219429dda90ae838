//! haulflow - auction invoice ingestion and freight-marketplace export.
//!
//! The pipeline turns auction PDF invoices into canonical dispatch
//! records and validated marketplace listings:
//!
//! 1. [`structurer`] - PDF to ordered text blocks with page coordinates
//! 2. [`classifier`] - auction source classification against profiles
//! 3. [`extract`] - per-field strategy extraction with evidence
//! 4. [`reconcile`] - non-destructive upsert into canonical records
//! 5. [`export`] - READY validation, payload build, and submission

pub mod classifier;
pub mod cli;
pub mod config;
pub mod export;
pub mod extract;
pub mod models;
pub mod profiles;
pub mod reconcile;
pub mod repository;
pub mod services;
pub mod structurer;
pub mod warehouse;
