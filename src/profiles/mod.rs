//! Auction profile configuration types.
//!
//! Profiles define the TOML-configurable behavior for classifying and
//! extracting one auction source: weighted match indicators, per-field
//! extraction rules, and fixed constants. The pipeline treats profiles as
//! read-only data; authoring happens outside the core.

mod builtin;
mod store;

pub use store::{ProfileStore, ProfileStoreError};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Auction type used when no profile matched.
pub const UNKNOWN_AUCTION: &str = "UNKNOWN";

/// Auction type of the generic fallback profile.
pub const GENERIC_AUCTION: &str = "GENERIC";

/// A weighted text indicator for source classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    /// Substring (case-insensitive) or regex to look for.
    pub pattern: String,
    /// Treat `pattern` as a regex instead of a substring.
    #[serde(default)]
    pub regex: bool,
    #[serde(default = "default_match_weight")]
    pub weight: f32,
}

fn default_match_weight() -> f32 {
    1.0
}

/// Where to look for the value once a label block is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStrategy {
    /// Block directly under the label with horizontal overlap.
    BelowLabel,
    /// Block to the right on the same line band.
    RightOfLabel,
    /// Remainder of the label block's own text after the label.
    SameLine,
    /// Closest block by center distance.
    #[default]
    NearestBlock,
}

/// Named value transform applied after strategy resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Strip non-alphanumerics and uppercase.
    NormalizeVin,
    /// Full state name to USPS two-letter abbreviation.
    NormalizeState,
    /// Keep the leading five digits.
    TruncateZip,
    /// Parse common date formats to YYYY-MM-DD.
    ParseDate,
    Uppercase,
    Lowercase,
    TitleCase,
    CollapseWhitespace,
}

/// Extraction strategy for one field.
///
/// A closed tagged variant evaluated by a single dispatcher; profiles stay
/// data-driven without virtual rule objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    /// Fixed value for this auction type.
    Constant { value: String },
    /// Pattern match against the whole raw text; first capture group wins.
    Regex {
        patterns: Vec<String>,
        #[serde(default = "default_regex_confidence")]
        confidence: f32,
    },
    /// Locate a label block, take an adjacent block's text.
    LabelValue {
        label_patterns: Vec<String>,
        #[serde(default)]
        evidence: EvidenceStrategy,
        #[serde(default = "default_label_confidence")]
        confidence: f32,
    },
    /// Field-specific fallback patterns scanned block by block.
    Spatial {
        patterns: Vec<String>,
        #[serde(default = "default_spatial_confidence")]
        confidence: f32,
    },
}

fn default_regex_confidence() -> f32 {
    0.7
}

fn default_label_confidence() -> f32 {
    0.8
}

fn default_spatial_confidence() -> f32 {
    0.5
}

/// Full extraction rule for one field: a strategy chain plus postprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    /// Strategies tried in order; the first non-empty result wins.
    pub strategies: Vec<Strategy>,
    /// Ordered transforms applied to the winning value.
    #[serde(default)]
    pub postprocess: Vec<Transform>,
}

impl ExtractionRule {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies,
            postprocess: Vec::new(),
        }
    }

    pub fn with_postprocess(mut self, transforms: Vec<Transform>) -> Self {
        self.postprocess = transforms;
        self
    }
}

/// Classification and extraction profile for one auction source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionProfile {
    /// Auction type key, e.g. "COPART".
    pub auction_type: String,
    /// Profile version; travels with the profile through the call chain.
    #[serde(default = "default_profile_version")]
    pub version: u32,
    /// Minimum classification score for this profile to win.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub match_rules: Vec<MatchRule>,
    /// Extraction rules by canonical field key.
    #[serde(default)]
    pub field_rules: BTreeMap<String, ExtractionRule>,
    /// Fixed values written as AUCTION_CONST before any extraction runs.
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    /// Fields this auction's documents are expected to always carry.
    #[serde(default)]
    pub guaranteed_fields: BTreeSet<String>,
}

fn default_profile_version() -> u32 {
    1
}

fn default_confidence_threshold() -> f32 {
    0.6
}

impl AuctionProfile {
    /// Sum of all indicator weights, the classification denominator.
    pub fn total_match_weight(&self) -> f32 {
        self.match_rules.iter().map(|r| r.weight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_toml_round_trip() {
        let toml_src = r#"
            [field_rules.vehicle_vin]
            postprocess = ["normalize_vin"]

            [[field_rules.vehicle_vin.strategies]]
            strategy = "regex"
            patterns = ['\bVIN[:#]?\s*([A-HJ-NPR-Z0-9]{17})\b']

            [[field_rules.vehicle_vin.strategies]]
            strategy = "label_value"
            label_patterns = ["VIN"]
            evidence = "right_of_label"
        "#;

        #[derive(Deserialize)]
        struct Wrapper {
            field_rules: BTreeMap<String, ExtractionRule>,
        }

        let parsed: Wrapper = toml::from_str(toml_src).unwrap();
        let rule = &parsed.field_rules["vehicle_vin"];
        assert_eq!(rule.strategies.len(), 2);
        assert_eq!(rule.postprocess, vec![Transform::NormalizeVin]);
        match &rule.strategies[0] {
            Strategy::Regex { confidence, .. } => assert_eq!(*confidence, 0.7),
            other => panic!("expected regex strategy, got {:?}", other),
        }
        match &rule.strategies[1] {
            Strategy::LabelValue { evidence, confidence, .. } => {
                assert_eq!(*evidence, EvidenceStrategy::RightOfLabel);
                assert_eq!(*confidence, 0.8);
            }
            other => panic!("expected label_value strategy, got {:?}", other),
        }
    }

    #[test]
    fn test_total_match_weight() {
        let profile = AuctionProfile {
            auction_type: "X".into(),
            version: 1,
            confidence_threshold: 0.5,
            match_rules: vec![
                MatchRule {
                    pattern: "a".into(),
                    regex: false,
                    weight: 2.0,
                },
                MatchRule {
                    pattern: "b".into(),
                    regex: false,
                    weight: 3.0,
                },
            ],
            field_rules: BTreeMap::new(),
            constants: BTreeMap::new(),
            guaranteed_fields: BTreeSet::new(),
        };
        assert_eq!(profile.total_match_weight(), 5.0);
    }
}
