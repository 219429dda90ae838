//! End-to-end pipeline tests over synthetic documents.
//!
//! Exercises structure -> classify -> extract -> reconcile -> validate
//! against a temporary database, without touching poppler, tesseract, or
//! the network.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use haulflow::classifier::classify;
use haulflow::export::validate_ready;
use haulflow::extract::extract_fields;
use haulflow::models::{
    derive_identity_hash, keys, BBox, FieldSource, FieldValue, RowStatus,
};
use haulflow::profiles::ProfileStore;
use haulflow::reconcile::{ReconcileError, Reconciler, UpsertAction};
use haulflow::repository::DispatchRepository;
use haulflow::structurer::{build_structure, PageWords, Word};

fn word(text: &str, x0: f32, y0: f32) -> Word {
    let width = 7.0 * text.len() as f32;
    Word {
        text: text.to_string(),
        page_index: 0,
        bbox: BBox::new(x0, y0, x0 + width, y0 + 11.0),
    }
}

/// A synthetic single-page Copart invoice with a native text layer.
fn copart_invoice() -> haulflow::models::DocumentStructure {
    let mut words = Vec::new();
    let lines: &[(&str, f32)] = &[
        ("COPART Member Services", 60.0),
        ("www.copart.com", 80.0),
        ("Lot # 58291034", 110.0),
        ("VIN: 1HGCM82633A123456", 130.0),
        ("Buyer Number: 882211", 150.0),
        ("Total Due: $450.00", 180.0),
        ("Gate Pass: X9Y2-44", 210.0),
    ];
    for (line, y) in lines {
        let mut x = 54.0;
        for token in line.split_whitespace() {
            let w = word(token, x, *y);
            x = w.bbox.x1 + 4.0;
            words.push(w);
        }
    }

    build_structure(
        vec![PageWords {
            width: 612.0,
            height: 792.0,
            words,
        }],
        haulflow::models::TextMode::Native,
        false,
        3.0,
    )
}

fn reconciler() -> (tempfile::TempDir, Arc<Reconciler>) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(DispatchRepository::new(&dir.path().join("haulflow.db")).unwrap());
    (dir, Arc::new(Reconciler::new(repo)))
}

fn extracted(doc: &haulflow::models::DocumentStructure) -> BTreeMap<String, FieldValue> {
    let profiles = ProfileStore::builtin();
    let profile = profiles.get("COPART").unwrap();
    extract_fields(doc, profile, keys::ALL).fields
}

#[test]
fn test_structure_is_ordered_with_valid_boxes() {
    let doc = copart_invoice();
    assert!(doc.blocks.len() > 1);
    for window in doc.blocks.windows(2) {
        if window[0].page_index == window[1].page_index
            && window[0].column_index == window[1].column_index
        {
            assert!(window[0].reading_order < window[1].reading_order);
        }
    }
    for block in &doc.blocks {
        assert!(block.bbox.x1 > block.bbox.x0);
        assert!(block.bbox.y1 > block.bbox.y0);
    }
}

#[test]
fn test_copart_classification_scenario() {
    let doc = copart_invoice();
    let profiles = ProfileStore::builtin();
    let classification = classify(&doc.raw_text, profiles.all());

    assert_eq!(classification.auction_type, "COPART");
    assert!(classification.confidence >= 0.6);
    assert!(!classification.needs_classification);
}

#[test]
fn test_copart_extraction_scenario() {
    let doc = copart_invoice();
    let fields = extracted(&doc);

    let vin = &fields[keys::VEHICLE_VIN];
    assert_eq!(vin.value, "1HGCM82633A123456");
    assert_eq!(vin.source, FieldSource::Extracted);
    assert!(!vin.evidence_block_ids.is_empty());

    assert_eq!(fields[keys::VEHICLE_LOT_NUMBER].value, "58291034");
    assert_eq!(fields[keys::GATE_PASS_CODE].value, "X9Y2-44");
    // Profile constant arrives as AUCTION_CONST at full confidence.
    let trailer = &fields[keys::TRAILER_TYPE];
    assert_eq!(trailer.value, "OPEN");
    assert_eq!(trailer.source, FieldSource::AuctionConst);
}

#[tokio::test]
async fn test_ingest_creates_new_record() {
    let doc = copart_invoice();
    let fields = extracted(&doc);
    let (_dir, reconciler) = reconciler();

    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (record, report) = reconciler
        .upsert("COPART", &hash, fields, false)
        .await
        .unwrap();

    assert_eq!(report.action, UpsertAction::Insert);
    assert_eq!(record.row_status, RowStatus::New);
    assert!(record.dispatch_id.starts_with("DC-"));
    assert!(record.dispatch_id.contains("-COPART-"));
    assert_eq!(
        record.fields[keys::VEHICLE_VIN].value,
        "1HGCM82633A123456"
    );
}

#[tokio::test]
async fn test_reingest_same_document_is_idempotent() {
    let doc = copart_invoice();
    let (_dir, reconciler) = reconciler();

    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (first, _) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();
    let (second, report) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();

    // Same identity resolves to the same record.
    assert_eq!(first.dispatch_id, second.dispatch_id);
    assert_eq!(report.action, UpsertAction::Update);
    // Nothing changed, so nothing was written.
    assert!(report.updated_fields.is_empty());
}

#[tokio::test]
async fn test_fill_only_protects_reviewed_fields() {
    let doc = copart_invoice();
    let (_dir, reconciler) = reconciler();
    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (record, _) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();

    reconciler
        .repository()
        .update_status(&record.dispatch_id, RowStatus::Hold)
        .unwrap();

    // Re-ingest with a different VIN extracted.
    let mut fields = extracted(&doc);
    fields.insert(
        keys::VEHICLE_VIN.to_string(),
        FieldValue::new(keys::VEHICLE_VIN, "WDBRF40J43F412345".into(), FieldSource::Extracted, 0.7),
    );
    let (after, _) = reconciler
        .upsert("COPART", &hash, fields, false)
        .await
        .unwrap();

    assert_eq!(after.fields[keys::VEHICLE_VIN].value, "1HGCM82633A123456");
}

#[tokio::test]
async fn test_lock_all_leaves_fields_byte_identical() {
    let doc = copart_invoice();
    let (_dir, reconciler) = reconciler();
    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (record, _) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();
    reconciler
        .repository()
        .set_locks(&record.dispatch_id, Some(true), None, None)
        .unwrap();
    let before = reconciler
        .repository()
        .get_required(&record.dispatch_id)
        .unwrap();

    let mut fields = extracted(&doc);
    fields.insert(
        keys::VEHICLE_VIN.to_string(),
        FieldValue::new(keys::VEHICLE_VIN, "WDBRF40J43F412345".into(), FieldSource::Extracted, 0.7),
    );
    let (after, _) = reconciler
        .upsert("COPART", &hash, fields, false)
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&after.fields).unwrap(),
        serde_json::to_string(&before.fields).unwrap()
    );
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
async fn test_hold_to_ready_revalidates_and_refuses() {
    let doc = copart_invoice();
    let (_dir, reconciler) = reconciler();
    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (record, _) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();
    reconciler
        .repository()
        .update_status(&record.dispatch_id, RowStatus::Hold)
        .unwrap();

    // The synthetic invoice has no delivery stop yet.
    let err = reconciler
        .transition(&record.dispatch_id, RowStatus::Ready)
        .unwrap_err();
    match err {
        ReconcileError::ValidationFailed(errors) => {
            assert!(errors.iter().any(|e| e.field == keys::DELIVERY_ZIP));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }

    // Status must remain exactly where it was.
    let record = reconciler
        .repository()
        .get_required(&record.dispatch_id)
        .unwrap();
    assert_eq!(record.row_status, RowStatus::Hold);
}

#[tokio::test]
async fn test_corrections_win_final_resolution() {
    let doc = copart_invoice();
    let (_dir, reconciler) = reconciler();
    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (record, _) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();

    reconciler
        .repository()
        .apply_corrections(
            &record.dispatch_id,
            &[(keys::VEHICLE_VIN.to_string(), "JH4KA7561PC008269".to_string())],
        )
        .unwrap();

    let record = reconciler
        .repository()
        .get_required(&record.dispatch_id)
        .unwrap();
    // Base value intact, override wins resolution.
    assert_eq!(record.base_value(keys::VEHICLE_VIN), Some("1HGCM82633A123456"));
    assert_eq!(record.final_value(keys::VEHICLE_VIN), Some("JH4KA7561PC008269"));
}

#[tokio::test]
async fn test_new_to_exported_is_rejected() {
    let doc = copart_invoice();
    let (_dir, reconciler) = reconciler();
    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (record, _) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();

    let result = reconciler
        .repository()
        .update_status(&record.dispatch_id, RowStatus::Exported);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_completed_record_passes_validation_and_becomes_ready() {
    let doc = copart_invoice();
    let (_dir, reconciler) = reconciler();
    let hash = derive_identity_hash(Some("X9Y2-44"), None, None, "unused");
    let (record, _) = reconciler
        .upsert("COPART", &hash, extracted(&doc), false)
        .await
        .unwrap();

    // Operator completes the record via corrections.
    let today = Utc::now().date_naive();
    let corrections = vec![
        (keys::AVAILABLE_DATE.to_string(), today.format("%Y-%m-%d").to_string()),
        (
            keys::EXPIRATION_DATE.to_string(),
            (today + Duration::days(10)).format("%Y-%m-%d").to_string(),
        ),
        (keys::MARKETPLACE_ID.to_string(), "central-dispatch".to_string()),
        (keys::PICKUP_ADDRESS.to_string(), "2200 Auction Way".to_string()),
        (keys::PICKUP_CITY.to_string(), "Dallas".to_string()),
        (keys::PICKUP_STATE.to_string(), "TX".to_string()),
        (keys::PICKUP_ZIP.to_string(), "75201".to_string()),
        (keys::DELIVERY_ADDRESS.to_string(), "4800 Commerce St".to_string()),
        (keys::DELIVERY_CITY.to_string(), "Houston".to_string()),
        (keys::DELIVERY_STATE.to_string(), "TX".to_string()),
        (keys::DELIVERY_ZIP.to_string(), "77029".to_string()),
    ];
    reconciler
        .repository()
        .apply_corrections(&record.dispatch_id, &corrections)
        .unwrap();

    let record = reconciler
        .repository()
        .get_required(&record.dispatch_id)
        .unwrap();
    assert!(validate_ready(&record).is_empty());

    let record = reconciler
        .transition(&record.dispatch_id, RowStatus::Ready)
        .unwrap();
    assert_eq!(record.row_status, RowStatus::Ready);
}
