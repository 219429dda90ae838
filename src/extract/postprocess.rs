//! Named value transforms applied after strategy resolution.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::profiles::Transform;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").unwrap());
static ZIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{5}").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Full state names to USPS abbreviations.
const STATES: &[(&str, &str)] = &[
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("hawaii", "HI"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
    ("district of columbia", "DC"),
];

/// Date formats seen on auction paperwork, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y", "%m/%d/%y", "%Y-%m-%d", "%m-%d-%Y", "%b %d, %Y", "%B %d, %Y", "%b %d %Y",
];

fn normalize_vin(value: &str) -> String {
    NON_ALNUM.replace_all(value, "").to_uppercase()
}

fn normalize_state(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return trimmed.to_uppercase();
    }
    let lower = trimmed.to_lowercase();
    for (name, abbrev) in STATES {
        if lower == *name {
            return abbrev.to_string();
        }
    }
    trimmed.to_string()
}

fn truncate_zip(value: &str) -> String {
    ZIP_RE
        .find(value)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| value.trim().to_string())
}

fn parse_date(value: &str) -> String {
    let trimmed = value.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    trimmed.to_string()
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_whitespace(value: &str) -> String {
    WHITESPACE_RE.replace_all(value.trim(), " ").to_string()
}

/// Apply one transform.
pub fn apply_transform(transform: Transform, value: &str) -> String {
    match transform {
        Transform::NormalizeVin => normalize_vin(value),
        Transform::NormalizeState => normalize_state(value),
        Transform::TruncateZip => truncate_zip(value),
        Transform::ParseDate => parse_date(value),
        Transform::Uppercase => value.trim().to_uppercase(),
        Transform::Lowercase => value.trim().to_lowercase(),
        Transform::TitleCase => title_case(value.trim()),
        Transform::CollapseWhitespace => collapse_whitespace(value),
    }
}

/// Apply an ordered transform chain.
pub fn apply_all(transforms: &[Transform], value: &str) -> String {
    transforms
        .iter()
        .fold(value.trim().to_string(), |v, t| apply_transform(*t, &v))
}
