//! Field extraction engine.
//!
//! Runs each field's strategy chain against the structured document and
//! produces [`FieldValue`]s with confidence, source, and evidence block
//! references. A failing field never aborts the run; it surfaces as an
//! empty value plus a diagnostic.

mod postprocess;

pub use postprocess::{apply_all, apply_transform};

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::models::{keys, BlockId, DocumentStructure, FieldSource, FieldValue, TextBlock};
use crate::profiles::{AuctionProfile, EvidenceStrategy, ExtractionRule, Strategy};

/// Two adjacent candidates closer than this, in points, make a label
/// ambiguous.
const AMBIGUITY_MARGIN: f32 = 6.0;

/// Confidence multiplier when more than one adjacent block qualifies.
const AMBIGUITY_PENALTY: f32 = 0.75;

/// A per-field problem recorded during extraction.
#[derive(Debug, Clone)]
pub struct FieldDiagnostic {
    pub key: String,
    pub message: String,
}

/// Result of one extraction run. Disposable; recomputed per ingestion.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub fields: BTreeMap<String, FieldValue>,
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl ExtractionOutcome {
    /// The non-empty value for a key, if extraction found one.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .filter(|f| !f.is_empty())
            .map(|f| f.value.as_str())
    }
}

struct StrategyHit {
    value: String,
    confidence: f32,
    source: FieldSource,
    evidence: Vec<BlockId>,
}

/// Extract the requested fields from a structured document.
///
/// Strategy order within each rule is first-success-wins; profile-level
/// constants resolve before any rule runs.
pub fn extract_fields(
    doc: &DocumentStructure,
    profile: &AuctionProfile,
    field_keys: &[&str],
) -> ExtractionOutcome {
    let mut fields = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for &key in field_keys {
        let hit = resolve_field(doc, profile, key, &mut diagnostics);

        let field = match hit {
            Some(hit) => {
                let rule = profile.field_rules.get(key);
                let value = match rule {
                    Some(rule) => apply_all(&rule.postprocess, &hit.value),
                    None => hit.value.trim().to_string(),
                };
                if value.is_empty() {
                    FieldValue::empty(key)
                } else {
                    FieldValue::new(key, value, hit.source, hit.confidence)
                        .with_evidence(hit.evidence)
                }
            }
            None => FieldValue::empty(key),
        };

        if field.is_empty() && profile.guaranteed_fields.contains(key) {
            diagnostics.push(FieldDiagnostic {
                key: key.to_string(),
                message: format!(
                    "guaranteed field missing for auction type {}",
                    profile.auction_type
                ),
            });
        }

        fields.insert(key.to_string(), field);
    }

    ExtractionOutcome {
        fields,
        diagnostics,
    }
}

fn resolve_field(
    doc: &DocumentStructure,
    profile: &AuctionProfile,
    key: &str,
    diagnostics: &mut Vec<FieldDiagnostic>,
) -> Option<StrategyHit> {
    if let Some(value) = profile.constants.get(key) {
        if !value.trim().is_empty() {
            return Some(StrategyHit {
                value: value.clone(),
                confidence: 1.0,
                source: FieldSource::AuctionConst,
                evidence: Vec::new(),
            });
        }
    }

    let rule = profile.field_rules.get(key)?;
    run_rule(doc, rule, key, diagnostics)
}

fn run_rule(
    doc: &DocumentStructure,
    rule: &ExtractionRule,
    key: &str,
    diagnostics: &mut Vec<FieldDiagnostic>,
) -> Option<StrategyHit> {
    for strategy in &rule.strategies {
        let hit = match strategy {
            Strategy::Constant { value } => Some(StrategyHit {
                value: value.clone(),
                confidence: 1.0,
                source: FieldSource::AuctionConst,
                evidence: Vec::new(),
            }),
            Strategy::Regex {
                patterns,
                confidence,
            } => run_regex(doc, patterns, *confidence, key, diagnostics),
            Strategy::LabelValue {
                label_patterns,
                evidence,
                confidence,
            } => run_label_value(doc, label_patterns, *evidence, *confidence, key, diagnostics),
            Strategy::Spatial {
                patterns,
                confidence,
            } => run_spatial(doc, patterns, *confidence, key, diagnostics),
        };

        if let Some(hit) = hit {
            if !hit.value.trim().is_empty() {
                return Some(hit);
            }
        }
    }
    None
}

fn compile(pattern: &str, key: &str, diagnostics: &mut Vec<FieldDiagnostic>) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            diagnostics.push(FieldDiagnostic {
                key: key.to_string(),
                message: format!("invalid pattern {:?}: {}", pattern, err),
            });
            None
        }
    }
}

/// Blocks whose text contains the given snippet, for evidence attribution.
fn blocks_containing(doc: &DocumentStructure, snippet: &str) -> Vec<BlockId> {
    let trimmed = snippet.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    doc.blocks
        .iter()
        .filter(|b| b.text.contains(trimmed))
        .map(|b| b.id)
        .take(1)
        .collect()
}

fn run_regex(
    doc: &DocumentStructure,
    patterns: &[String],
    confidence: f32,
    key: &str,
    diagnostics: &mut Vec<FieldDiagnostic>,
) -> Option<StrategyHit> {
    for pattern in patterns {
        let re = match compile(pattern, key, diagnostics) {
            Some(re) => re,
            None => continue,
        };
        if let Some(caps) = re.captures(&doc.raw_text) {
            let value = caps
                .get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())?;
            let evidence = blocks_containing(doc, &value);
            return Some(StrategyHit {
                value,
                confidence,
                source: FieldSource::Extracted,
                evidence,
            });
        }
    }
    None
}

fn run_spatial(
    doc: &DocumentStructure,
    patterns: &[String],
    confidence: f32,
    key: &str,
    diagnostics: &mut Vec<FieldDiagnostic>,
) -> Option<StrategyHit> {
    for pattern in patterns {
        let re = match compile(pattern, key, diagnostics) {
            Some(re) => re,
            None => continue,
        };
        // Blocks are walked in reading order; the first hit wins.
        for block in &doc.blocks {
            if let Some(caps) = re.captures(&block.text) {
                let value = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())?;
                return Some(StrategyHit {
                    value,
                    confidence,
                    source: FieldSource::Default,
                    evidence: vec![block.id],
                });
            }
        }
    }
    None
}

fn run_label_value(
    doc: &DocumentStructure,
    label_patterns: &[String],
    evidence: EvidenceStrategy,
    confidence: f32,
    key: &str,
    diagnostics: &mut Vec<FieldDiagnostic>,
) -> Option<StrategyHit> {
    for pattern in label_patterns {
        let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(err) => {
                diagnostics.push(FieldDiagnostic {
                    key: key.to_string(),
                    message: format!("invalid label pattern {:?}: {}", pattern, err),
                });
                continue;
            }
        };

        let Some(label) = doc.blocks.iter().find(|b| re.is_match(&b.text)) else {
            continue;
        };

        // Same-line values live inside the label block itself.
        if evidence == EvidenceStrategy::SameLine {
            if let Some(m) = re.find(&label.text) {
                let rest = label.text[m.end()..]
                    .trim_start_matches([':', '#', ' ', '\t'])
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim();
                if !rest.is_empty() {
                    return Some(StrategyHit {
                        value: rest.to_string(),
                        confidence,
                        source: FieldSource::Extracted,
                        evidence: vec![label.id],
                    });
                }
            }
            continue;
        }

        let mut candidates = adjacent_candidates(doc, label, evidence);
        if candidates.is_empty() {
            debug!("label {:?} matched but no adjacent block for {}", pattern, key);
            continue;
        }
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

        let ambiguous = candidates.len() > 1
            && candidates[1].1 - candidates[0].1 < AMBIGUITY_MARGIN;
        let effective = if ambiguous {
            confidence * AMBIGUITY_PENALTY
        } else {
            confidence
        };

        let block = candidates[0].0;
        let value = block.text.replace('\n', " ").trim().to_string();
        if value.is_empty() {
            continue;
        }
        return Some(StrategyHit {
            value,
            confidence: effective,
            source: FieldSource::Extracted,
            evidence: vec![label.id, block.id],
        });
    }
    None
}

/// Blocks adjacent to a label under the given evidence strategy, paired
/// with their distance from it.
fn adjacent_candidates<'a>(
    doc: &'a DocumentStructure,
    label: &TextBlock,
    evidence: EvidenceStrategy,
) -> Vec<(&'a TextBlock, f32)> {
    let peers = doc
        .blocks
        .iter()
        .filter(|b| b.id != label.id && b.page_index == label.page_index);

    match evidence {
        EvidenceStrategy::BelowLabel => peers
            .filter(|b| b.bbox.y0 >= label.bbox.y1 - 1.0 && b.bbox.x_overlap(&label.bbox) > 0.0)
            .map(|b| (b, b.bbox.y0 - label.bbox.y1))
            .collect(),
        EvidenceStrategy::RightOfLabel => peers
            .filter(|b| b.bbox.x0 >= label.bbox.x1 - 1.0 && b.bbox.y_overlap(&label.bbox) > 0.0)
            .map(|b| (b, b.bbox.x0 - label.bbox.x1))
            .collect(),
        EvidenceStrategy::NearestBlock => peers
            .map(|b| {
                let (cx, cy) = b.bbox.center();
                let (lx, ly) = label.bbox.center();
                (b, ((cx - lx).powi(2) + (cy - ly).powi(2)).sqrt())
            })
            .collect(),
        // Handled inline by the caller.
        EvidenceStrategy::SameLine => Vec::new(),
    }
}
