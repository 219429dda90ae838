//! Auction source classification.
//!
//! Scores a document's raw text against every profile's weighted match
//! indicators and picks the best profile above its own threshold. Falls
//! back to UNKNOWN when nothing clears the bar, which routes extraction to
//! the generic profile instead of failing the run.

use regex::RegexBuilder;
use tracing::debug;

use crate::profiles::{AuctionProfile, UNKNOWN_AUCTION};

/// Classification outcome for one document.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Winning auction type, or [`UNKNOWN_AUCTION`].
    pub auction_type: String,
    /// Profile version of the winner, 0 when unknown.
    pub profile_version: u32,
    /// Normalized score in [0, 1].
    pub confidence: f32,
    /// Indicators that were present in the text, for diagnostics.
    pub matched_patterns: Vec<String>,
    /// True when no profile cleared its threshold.
    pub needs_classification: bool,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            auction_type: UNKNOWN_AUCTION.to_string(),
            profile_version: 0,
            confidence: 0.0,
            matched_patterns: Vec::new(),
            needs_classification: true,
        }
    }
}

/// Score one profile against the text.
///
/// Score is the weight sum of present indicators normalized by the total
/// declared weight, bounded to [0, 1]. Substring indicators match
/// case-insensitively; regex indicators are compiled case-insensitive too.
fn score_profile(text_lower: &str, text: &str, profile: &AuctionProfile) -> (f32, Vec<String>) {
    let total = profile.total_match_weight();
    if total <= 0.0 {
        return (0.0, Vec::new());
    }

    let mut hit_weight = 0.0;
    let mut matched = Vec::new();

    for rule in &profile.match_rules {
        let present = if rule.regex {
            match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(text),
                Err(err) => {
                    debug!(
                        "profile {}: bad match regex {:?}: {}",
                        profile.auction_type, rule.pattern, err
                    );
                    false
                }
            }
        } else {
            text_lower.contains(&rule.pattern.to_lowercase())
        };

        if present {
            hit_weight += rule.weight;
            matched.push(rule.pattern.clone());
        }
    }

    ((hit_weight / total).clamp(0.0, 1.0), matched)
}

/// Classify a document against a profile catalog.
///
/// The catalog's declaration order is the tie-break: when two profiles
/// score equally above threshold, the earlier one wins. Strictly-greater
/// comparison on the running best keeps that deterministic.
pub fn classify(raw_text: &str, profiles: &[AuctionProfile]) -> Classification {
    let text_lower = raw_text.to_lowercase();

    let mut best: Option<Classification> = None;

    for profile in profiles {
        let (score, matched) = score_profile(&text_lower, raw_text, profile);
        if score < profile.confidence_threshold {
            continue;
        }
        debug!(
            "classifier: {} scored {:.2} ({} indicators)",
            profile.auction_type,
            score,
            matched.len()
        );
        let better = match &best {
            Some(b) => score > b.confidence,
            None => true,
        };
        if better {
            best = Some(Classification {
                auction_type: profile.auction_type.clone(),
                profile_version: profile.version,
                confidence: score,
                matched_patterns: matched,
                needs_classification: false,
            });
        }
    }

    best.unwrap_or_else(Classification::unknown)
}
