//! Phone number normalization and line-type classification.
//!
//! `classify()` is pure: it strips formatting, infers the country code for
//! domestic (NANP) numbers, and guesses the line type from known number ranges.
//! `Unknown` is a normal answer; callers decide whether it is messageable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Inferred line type of a phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Mobile,
    Landline,
    Voip,
    Unknown,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::Mobile => "mobile",
            LineKind::Landline => "landline",
            LineKind::Voip => "voip",
            LineKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one raw phone string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneClassification {
    /// `+<digits>` for valid numbers; best-effort stripped input otherwise.
    pub canonical: String,
    pub kind: LineKind,
    pub valid: bool,
}

const FORMATTING_CHARS: &[char] = &[' ', '-', '.', '(', ')', '/', '\t', '\u{a0}'];
const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

/// Toll-free NANP area codes.
const TOLL_FREE: &[&str] = &["800", "833", "844", "855", "866", "877", "888"];

/// NANP personal-communications-service codes, mostly virtual numbers.
const PERSONAL_SERVICE: &[&str] = &[
    "500", "521", "522", "523", "524", "525", "526", "527", "528", "529", "533", "544", "566",
    "577", "588",
];

/// Country calling code → leading digits of the national number that mark mobile ranges.
/// Countries listed with no mobile prefixes do not distinguish mobile numbers.
const MOBILE_RANGES: &[(&str, &[&str])] = &[
    ("234", &["70", "80", "81", "90", "91"]),
    ("33", &["6", "7"]),
    ("34", &["6", "7"]),
    ("39", &["3"]),
    ("44", &["7"]),
    ("49", &["15", "16", "17"]),
    ("52", &[]),
    ("61", &["4"]),
    ("63", &["9"]),
    ("91", &["6", "7", "8", "9"]),
];

/// Classify a raw phone string.
pub fn classify(raw: &str) -> PhoneClassification {
    let trimmed = raw.trim();
    let (explicit_plus, body) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let stripped: String = body
        .chars()
        .filter(|c| !FORMATTING_CHARS.contains(c))
        .collect();

    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit()) {
        return invalid(if explicit_plus {
            format!("+{stripped}")
        } else {
            stripped
        });
    }

    let digits = if explicit_plus {
        stripped
    } else if stripped.len() == 10 {
        format!("1{stripped}")
    } else if stripped.len() == 11 && stripped.starts_with('1') {
        stripped
    } else {
        // Anything that is not domestic needs an explicit country code.
        return invalid(stripped);
    };

    if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
        return invalid(format!("+{digits}"));
    }

    PhoneClassification {
        kind: infer_kind(&digits),
        canonical: format!("+{digits}"),
        valid: true,
    }
}

/// Canonical form of a valid number, `None` otherwise.
pub fn canonicalize(raw: &str) -> Option<String> {
    let c = classify(raw);
    c.valid.then_some(c.canonical)
}

fn invalid(canonical: String) -> PhoneClassification {
    PhoneClassification {
        canonical,
        kind: LineKind::Unknown,
        valid: false,
    }
}

/// `digits` is the full international number without the `+`.
fn infer_kind(digits: &str) -> LineKind {
    if let Some(national) = digits.strip_prefix('1') {
        return if national.len() == 10 {
            nanp_kind(national)
        } else {
            LineKind::Unknown
        };
    }

    for (country, mobile_prefixes) in MOBILE_RANGES {
        if let Some(national) = digits.strip_prefix(country) {
            if mobile_prefixes.is_empty() {
                return LineKind::Unknown;
            }
            return if mobile_prefixes.iter().any(|p| national.starts_with(p)) {
                LineKind::Mobile
            } else {
                LineKind::Landline
            };
        }
    }

    LineKind::Unknown
}

fn nanp_kind(national: &str) -> LineKind {
    let area = &national[..3];
    let exchange = &national[3..6];

    // Area codes and exchanges never start with 0 or 1; N11 codes are services.
    if area.starts_with(['0', '1']) || exchange.starts_with(['0', '1']) || &area[1..] == "11" {
        return LineKind::Unknown;
    }
    if TOLL_FREE.contains(&area) || PERSONAL_SERVICE.contains(&area) {
        return LineKind::Voip;
    }
    if area == "555" || area == "900" {
        return LineKind::Landline;
    }

    // Most geographic numbers are portable to mobile carriers; treat as mobile.
    LineKind::Mobile
}
