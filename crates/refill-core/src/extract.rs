//! Guarantee-duration extraction from free-text service names.
//!
//! Panels annotate service names in wildly inconsistent ways ("30 Days ♻️",
//! "Refill 30 Days", "R30", "♻️ 30"). Extraction runs an ordered chain and
//! the first hit wins:
//!
//! 1. The user's custom patterns, in configured order (each validated by
//!    [`crate::safe_regex`]; unsafe/invalid ones are skipped silently)
//! 2. The builtin annotation library below
//! 3. Keyword containment (configured or default list) at the default duration
//! 4. Emoji containment at the default duration

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::GuaranteeConfig;
use crate::safe_regex::safe_capture_u32;

/// Builtin annotation patterns, in precedence order.
///
/// Each has exactly one capture group for the day count. The bare "R30"
/// short form is last: it is the most false-positive-prone.
const BUILTIN_PATTERNS: [&str; 12] = [
    r"(\d+)\s*days?\s*♻️",
    r"♻️\s*(\d+)\s*days?",
    r"(\d+)\s*days?\s*🔄",
    r"🔄\s*(\d+)\s*days?",
    r"(\d+)\s*days?\s*guarantee",
    r"guarantee\s*(\d+)\s*days?",
    r"(\d+)\s*days?\s*warranty",
    r"warranty\s*(\d+)\s*days?",
    r"(\d+)\s*d\s*refill",
    r"refill\s*(\d+)\s*days?",
    r"(\d+)\s*days?\s*refill",
    r"\br(\d+)\b",
];

/// Negation phrases that disarm the keyword/emoji fallback tiers.
///
/// "Premium Likes No Refill" contains the keyword "refill", but treating it
/// as guaranteed would invert the panel's meaning. Explicit numeric
/// annotations (tiers 1-2) are not gated: a name that both promises
/// "30 Days ♻️" and says "No Refill" is contradictory, and the explicit
/// day count wins.
const NEGATION_PHRASES: [&str; 7] = [
    "no refill",
    "non refill",
    "no guarantee",
    "non guarantee",
    "without guarantee",
    "without refill",
    "no warranty",
];

static BUILTIN_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .expect("builtin patterns are static and valid")
        })
        .collect()
});

/// Which extraction tier produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// One of the user's custom patterns (index into the configured list)
    CustomPattern(usize),
    /// The builtin annotation library
    Builtin,
    /// Keyword containment fallback
    Keyword,
    /// Emoji containment fallback
    Emoji,
}

/// A successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    /// Extracted (or default) guarantee duration in days
    pub days: u32,
    /// Tier that produced the hit
    pub tier: ExtractionTier,
}

/// Extract a guarantee duration from a service name.
///
/// Returns `None` when the name carries no recognizable guarantee
/// annotation. Empty names return `None` immediately.
#[must_use]
pub fn extract_guarantee_days(service_name: &str, config: &GuaranteeConfig) -> Option<u32> {
    extract(service_name, config).map(|e| e.days)
}

/// Extract a guarantee duration, reporting which tier matched.
///
/// Used by status displays that attribute the result ("matched your pattern
/// #2" vs "matched builtin annotation").
#[must_use]
pub fn extract(service_name: &str, config: &GuaranteeConfig) -> Option<Extraction> {
    if service_name.trim().is_empty() {
        return None;
    }

    for (idx, pattern) in config.custom_patterns.iter().enumerate() {
        if let Some(days) = safe_capture_u32(pattern, service_name) {
            return Some(Extraction {
                days,
                tier: ExtractionTier::CustomPattern(idx),
            });
        }
    }

    for re in BUILTIN_REGEXES.iter() {
        if let Some(caps) = re.captures(service_name) {
            if let Some(days) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                return Some(Extraction {
                    days,
                    tier: ExtractionTier::Builtin,
                });
            }
        }
    }

    if contains_any(service_name, &NEGATION_PHRASES) {
        return None;
    }

    if contains_any(service_name, &config.effective_keywords()) {
        return Some(Extraction {
            days: config.default_days,
            tier: ExtractionTier::Keyword,
        });
    }

    if contains_any(service_name, &config.effective_emojis()) {
        return Some(Extraction {
            days: config.default_days,
            tier: ExtractionTier::Emoji,
        });
    }

    None
}

/// Case-insensitive containment check of any needle in the haystack.
///
/// Both sides are Unicode-lowercased before the Aho-Corasick scan, so "NO
/// REFILL" and "No Refill" behave identically.
fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    if needles.is_empty() {
        return false;
    }
    let lowered: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
    match AhoCorasick::new(&lowered) {
        Ok(matcher) => matcher.is_match(&haystack.to_lowercase()),
        Err(e) => {
            // Bounded lists make this unreachable in practice; degrade to
            // non-match like every other evaluation-time failure.
            tracing::warn!(error = %e, "failed to build keyword matcher");
            false
        }
    }
}

/// Case-insensitive single-keyword containment, shared with the rule engine.
#[must_use]
pub(crate) fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    haystack.to_lowercase().contains(&keyword.to_lowercase())
}
