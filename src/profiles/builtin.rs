//! Compiled-in default profile catalog.
//!
//! These cover the major salvage and wholesale auctions out of the box.
//! TOML files in the profile directory override entries by auction type,
//! so sites with regional quirks can be tuned without a rebuild.

use std::collections::BTreeMap;

use crate::models::keys;

use super::{
    AuctionProfile, EvidenceStrategy, ExtractionRule, MatchRule, Strategy, Transform,
    GENERIC_AUCTION,
};

fn sub(pattern: &str, weight: f32) -> MatchRule {
    MatchRule {
        pattern: pattern.to_string(),
        regex: false,
        weight,
    }
}

fn re(pattern: &str, weight: f32) -> MatchRule {
    MatchRule {
        pattern: pattern.to_string(),
        regex: true,
        weight,
    }
}

fn regex_rule(patterns: &[&str]) -> ExtractionRule {
    ExtractionRule::new(vec![Strategy::Regex {
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        confidence: 0.7,
    }])
}

fn label_rule(labels: &[&str], evidence: EvidenceStrategy) -> ExtractionRule {
    ExtractionRule::new(vec![Strategy::LabelValue {
        label_patterns: labels.iter().map(|p| p.to_string()).collect(),
        evidence,
        confidence: 0.8,
    }])
}

/// VIN rule shared by every profile: a labelled VIN first, then any bare
/// 17-char VIN anywhere in the text.
fn vin_rule() -> ExtractionRule {
    ExtractionRule::new(vec![
        Strategy::Regex {
            patterns: vec![r"(?i)VIN[:#\s]*([A-HJ-NPR-Z0-9]{17})\b".to_string()],
            confidence: 0.7,
        },
        Strategy::Spatial {
            patterns: vec![r"\b([A-HJ-NPR-Z0-9]{17})\b".to_string()],
            confidence: 0.5,
        },
    ])
    .with_postprocess(vec![Transform::NormalizeVin])
}

fn zip_postprocess(rule: ExtractionRule) -> ExtractionRule {
    rule.with_postprocess(vec![Transform::TruncateZip])
}

fn copart() -> AuctionProfile {
    let mut field_rules = BTreeMap::new();
    field_rules.insert(keys::VEHICLE_VIN.to_string(), vin_rule());
    field_rules.insert(
        keys::VEHICLE_LOT_NUMBER.to_string(),
        regex_rule(&[r"(?i)Lot\s*(?:#|No\.?|Number)?[:\s]*(\d{8})\b"]),
    );
    field_rules.insert(
        keys::GATE_PASS_CODE.to_string(),
        ExtractionRule::new(vec![
            Strategy::Regex {
                patterns: vec![r"(?i)Gate\s*Pass(?:\s*Code)?[:#\s]*([A-Z0-9-]{4,16})\b".to_string()],
                confidence: 0.7,
            },
            Strategy::LabelValue {
                label_patterns: vec!["Gate Pass".to_string()],
                evidence: EvidenceStrategy::RightOfLabel,
                confidence: 0.8,
            },
        ])
        .with_postprocess(vec![Transform::Uppercase]),
    );
    field_rules.insert(
        keys::BUYER_NUMBER.to_string(),
        regex_rule(&[r"(?i)(?:Buyer|Member)\s*(?:#|No\.?|Number)?[:\s]*(\d{4,9})\b"]),
    );
    field_rules.insert(
        keys::PICKUP_NAME.to_string(),
        label_rule(&["Location", "Sale Location", "Yard"], EvidenceStrategy::BelowLabel),
    );
    field_rules.insert(
        keys::PICKUP_ADDRESS.to_string(),
        label_rule(&["Location Address", "Address"], EvidenceStrategy::BelowLabel),
    );
    field_rules.insert(
        keys::PICKUP_CITY.to_string(),
        regex_rule(&[r"(?m)^([A-Za-z .'-]+),\s*[A-Z]{2}\s+\d{5}"]),
    );
    field_rules.insert(
        keys::PICKUP_STATE.to_string(),
        regex_rule(&[r"(?m),\s*([A-Z]{2})\s+\d{5}(?:-\d{4})?\s*$"]),
    );
    field_rules.insert(
        keys::PICKUP_ZIP.to_string(),
        zip_postprocess(regex_rule(&[r"(?m),\s*[A-Z]{2}\s+(\d{5})(?:-\d{4})?\s*$"])),
    );
    field_rules.insert(
        keys::PICKUP_PHONE.to_string(),
        regex_rule(&[r"(?i)(?:Phone|Tel)[:\s]*(\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4})"]),
    );
    field_rules.insert(
        keys::VEHICLE_YEAR.to_string(),
        regex_rule(&[r"\b(19\d{2}|20[0-4]\d)\b\s+[A-Z][A-Za-z]+"]),
    );
    field_rules.insert(
        keys::AVAILABLE_DATE.to_string(),
        ExtractionRule::new(vec![Strategy::LabelValue {
            label_patterns: vec!["Available".to_string(), "Release Date".to_string()],
            evidence: EvidenceStrategy::SameLine,
            confidence: 0.8,
        }])
        .with_postprocess(vec![Transform::ParseDate]),
    );
    field_rules.insert(
        keys::PRICE.to_string(),
        regex_rule(&[r"(?i)(?:Total|Amount)\s*Due[:\s]*\$?([\d,]+\.?\d{0,2})"]),
    );

    let mut constants = BTreeMap::new();
    constants.insert(keys::PAYMENT_METHOD.to_string(), "PREPAID".to_string());
    constants.insert(keys::TRAILER_TYPE.to_string(), "OPEN".to_string());

    AuctionProfile {
        auction_type: "COPART".to_string(),
        version: 3,
        confidence_threshold: 0.6,
        match_rules: vec![
            sub("copart", 3.0),
            sub("copart.com", 2.0),
            sub("member services", 1.0),
            re(r"(?i)lot\s*#?\s*\d{8}", 2.0),
            sub("gate pass", 1.0),
        ],
        field_rules,
        constants,
        guaranteed_fields: [keys::VEHICLE_VIN, keys::VEHICLE_LOT_NUMBER]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

fn iaa() -> AuctionProfile {
    let mut field_rules = BTreeMap::new();
    field_rules.insert(keys::VEHICLE_VIN.to_string(), vin_rule());
    field_rules.insert(
        keys::VEHICLE_LOT_NUMBER.to_string(),
        regex_rule(&[r"(?i)Stock\s*(?:#|No\.?)?[:\s]*(\d{6,9})\b"]),
    );
    field_rules.insert(
        keys::BUYER_NUMBER.to_string(),
        regex_rule(&[r"(?i)Buyer\s*ID[:\s]*(\d{4,9})\b"]),
    );
    field_rules.insert(
        keys::PICKUP_NAME.to_string(),
        label_rule(&["Branch", "Selling Branch"], EvidenceStrategy::RightOfLabel),
    );
    field_rules.insert(
        keys::PICKUP_ADDRESS.to_string(),
        label_rule(&["Branch Address"], EvidenceStrategy::BelowLabel),
    );
    field_rules.insert(
        keys::PICKUP_STATE.to_string(),
        regex_rule(&[r"(?m),\s*([A-Z]{2})\s+\d{5}(?:-\d{4})?\s*$"]),
    );
    field_rules.insert(
        keys::PICKUP_ZIP.to_string(),
        zip_postprocess(regex_rule(&[r"(?m),\s*[A-Z]{2}\s+(\d{5})(?:-\d{4})?\s*$"])),
    );
    field_rules.insert(
        keys::AVAILABLE_DATE.to_string(),
        ExtractionRule::new(vec![Strategy::LabelValue {
            label_patterns: vec!["Pickup After".to_string(), "Clear for Pickup".to_string()],
            evidence: EvidenceStrategy::SameLine,
            confidence: 0.8,
        }])
        .with_postprocess(vec![Transform::ParseDate]),
    );
    field_rules.insert(
        keys::PRICE.to_string(),
        regex_rule(&[r"(?i)Total\s*(?:Sale)?\s*Price[:\s]*\$?([\d,]+\.?\d{0,2})"]),
    );

    let mut constants = BTreeMap::new();
    constants.insert(keys::TRAILER_TYPE.to_string(), "OPEN".to_string());

    AuctionProfile {
        auction_type: "IAA".to_string(),
        version: 2,
        confidence_threshold: 0.6,
        match_rules: vec![
            sub("insurance auto auctions", 3.0),
            sub("iaai.com", 2.0),
            re(r"(?i)\bIAA\b", 1.5),
            re(r"(?i)stock\s*#?\s*\d{6,9}", 1.5),
            sub("selling branch", 1.0),
        ],
        field_rules,
        constants,
        guaranteed_fields: [keys::VEHICLE_VIN, keys::VEHICLE_LOT_NUMBER]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

fn manheim() -> AuctionProfile {
    let mut field_rules = BTreeMap::new();
    field_rules.insert(keys::VEHICLE_VIN.to_string(), vin_rule());
    field_rules.insert(
        keys::AUCTION_REFERENCE.to_string(),
        regex_rule(&[r"(?i)(?:Work\s*Order|WO)[:#\s]*(\d{6,10})\b"]),
    );
    field_rules.insert(
        keys::GATE_PASS_CODE.to_string(),
        regex_rule(&[r"(?i)Gate\s*Release[:#\s]*([A-Z0-9-]{4,16})\b"]),
    );
    field_rules.insert(
        keys::PICKUP_NAME.to_string(),
        label_rule(&["Auction", "Location"], EvidenceStrategy::BelowLabel),
    );
    field_rules.insert(
        keys::PICKUP_STATE.to_string(),
        regex_rule(&[r"(?m),\s*([A-Z]{2})\s+\d{5}(?:-\d{4})?\s*$"]),
    );
    field_rules.insert(
        keys::PICKUP_ZIP.to_string(),
        zip_postprocess(regex_rule(&[r"(?m),\s*[A-Z]{2}\s+(\d{5})(?:-\d{4})?\s*$"])),
    );
    field_rules.insert(
        keys::PRICE.to_string(),
        regex_rule(&[r"(?i)(?:Vehicle|Sale)\s*Price[:\s]*\$?([\d,]+\.?\d{0,2})"]),
    );

    AuctionProfile {
        auction_type: "MANHEIM".to_string(),
        version: 2,
        confidence_threshold: 0.6,
        match_rules: vec![
            sub("manheim", 3.0),
            sub("manheim.com", 2.0),
            sub("gate release", 1.5),
            re(r"(?i)work\s*order", 1.0),
        ],
        field_rules,
        constants: BTreeMap::new(),
        guaranteed_fields: [keys::VEHICLE_VIN].iter().map(|s| s.to_string()).collect(),
    }
}

fn adesa() -> AuctionProfile {
    let mut field_rules = BTreeMap::new();
    field_rules.insert(keys::VEHICLE_VIN.to_string(), vin_rule());
    field_rules.insert(
        keys::AUCTION_REFERENCE.to_string(),
        regex_rule(&[r"(?i)(?:Run|Lane/Run)[:#\s]*([A-Z]?\d{1,3}[-/]\d{1,4})\b"]),
    );
    field_rules.insert(
        keys::PICKUP_NAME.to_string(),
        label_rule(&["Auction Location", "ADESA"], EvidenceStrategy::BelowLabel),
    );
    field_rules.insert(
        keys::PICKUP_STATE.to_string(),
        regex_rule(&[r"(?m),\s*([A-Z]{2})\s+\d{5}(?:-\d{4})?\s*$"]),
    );
    field_rules.insert(
        keys::PICKUP_ZIP.to_string(),
        zip_postprocess(regex_rule(&[r"(?m),\s*[A-Z]{2}\s+(\d{5})(?:-\d{4})?\s*$"])),
    );
    field_rules.insert(
        keys::PRICE.to_string(),
        regex_rule(&[r"(?i)Total[:\s]*\$?([\d,]+\.?\d{0,2})"]),
    );

    AuctionProfile {
        auction_type: "ADESA".to_string(),
        version: 1,
        confidence_threshold: 0.6,
        match_rules: vec![
            sub("adesa", 3.0),
            sub("adesa.com", 2.0),
            re(r"(?i)lane/run", 1.5),
        ],
        field_rules,
        constants: BTreeMap::new(),
        guaranteed_fields: [keys::VEHICLE_VIN].iter().map(|s| s.to_string()).collect(),
    }
}

/// Fallback profile used when classification comes back UNKNOWN.
///
/// Only carries rules that work on any invoice-shaped document.
fn generic() -> AuctionProfile {
    let mut field_rules = BTreeMap::new();
    field_rules.insert(keys::VEHICLE_VIN.to_string(), vin_rule());
    field_rules.insert(
        keys::PICKUP_STATE.to_string(),
        regex_rule(&[r"(?m),\s*([A-Z]{2})\s+\d{5}(?:-\d{4})?\s*$"]),
    );
    field_rules.insert(
        keys::PICKUP_ZIP.to_string(),
        zip_postprocess(regex_rule(&[r"(?m),\s*[A-Z]{2}\s+(\d{5})(?:-\d{4})?\s*$"])),
    );
    field_rules.insert(
        keys::PRICE.to_string(),
        regex_rule(&[r"(?i)(?:Total|Amount\s*Due|Balance)[:\s]*\$?([\d,]+\.?\d{0,2})"]),
    );
    field_rules.insert(
        keys::AVAILABLE_DATE.to_string(),
        ExtractionRule::new(vec![Strategy::Regex {
            patterns: vec![r"(?i)(?:Available|Release)[:\s]*(\d{1,2}/\d{1,2}/\d{2,4})".to_string()],
            confidence: 0.7,
        }])
        .with_postprocess(vec![Transform::ParseDate]),
    );

    AuctionProfile {
        auction_type: GENERIC_AUCTION.to_string(),
        version: 1,
        // Never wins classification; only reachable as the fallback.
        confidence_threshold: 1.1,
        match_rules: Vec::new(),
        field_rules,
        constants: BTreeMap::new(),
        guaranteed_fields: Default::default(),
    }
}

/// Default catalog in declaration order. Order matters: classification
/// ties break in favor of the earlier profile.
pub fn default_profiles() -> Vec<AuctionProfile> {
    vec![copart(), iaa(), manheim(), adesa(), generic()]
}
