//! Bounded, panic-free regex evaluation over tenant-supplied patterns.
//!
//! Custom extraction patterns come from per-user configuration, which means
//! another tenant's typo runs on the shared evaluation path. Everything here
//! is bounded: pattern length, subject length, compiled program size. An
//! unsafe or invalid pattern is treated identically to "did not match" and
//! never surfaced as an error.
//!
//! The shape heuristic in [`is_pattern_safe`] rejects known
//! catastrophic-backtracking constructions. It is not a proof of linear-time
//! matching; the execution backstop is the `regex` crate itself, whose NFA
//! engine never backtracks.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

/// Maximum accepted pattern length in characters.
pub const MAX_PATTERN_LEN: usize = 500;

/// Subjects are truncated to this many bytes before matching.
pub const MAX_SUBJECT_LEN: usize = 10_000;

/// Compiled-program size cap (bytes) for tenant patterns.
const COMPILED_SIZE_LIMIT: usize = 1 << 20;

/// Shapes known to cause catastrophic backtracking in backtracking engines.
///
/// Matched against the *pattern text*, not the subject. False positives are
/// acceptable: rejecting a harmless pattern degrades to "did not match".
static DANGEROUS_SHAPES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Nested quantifier: (x+)+, (x*)+, (x+)*
        r"\([^()]*[+*]\)\s*[+*]",
        // Quantified group followed by a repetition bound: (x+){2,}
        r"\([^()]*[+*]\)\s*\{",
        // Quantifier immediately followed by a repetition bound: a+{2}
        r"[+*]\{",
        // Doubled quantifier tokens: ++, **, +*, *+
        r"[+*][+*]",
        // Two greedy wildcard spans in sequence: .*.* or .+.+
        r"\.[*+]\.[*+]",
    ]
    .iter()
    .map(|shape| Regex::new(shape).expect("danger shape patterns are static and valid"))
    .collect()
});

/// Heuristically decide whether a tenant pattern is safe to compile.
///
/// Returns false for over-long patterns and for patterns matching any known
/// catastrophic-backtracking shape.
#[must_use]
pub fn is_pattern_safe(pattern: &str) -> bool {
    if pattern.chars().count() > MAX_PATTERN_LEN {
        return false;
    }
    !DANGEROUS_SHAPES.iter().any(|shape| shape.is_match(pattern))
}

/// Compile a tenant pattern, case-insensitively and size-bounded.
///
/// Returns `None` when the pattern is unsafe or fails to compile. The reject
/// is logged at debug level only; one tenant's bad pattern is routine, not an
/// incident.
#[must_use]
pub fn safe_compile(pattern: &str) -> Option<Regex> {
    if !is_pattern_safe(pattern) {
        tracing::debug!(pattern_len = pattern.len(), "rejected unsafe pattern");
        return None;
    }
    match RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(COMPILED_SIZE_LIMIT)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::debug!(error = %e, "tenant pattern failed to compile");
            None
        }
    }
}

/// Test a tenant pattern against an input. Never errors.
///
/// Unsafe and invalid patterns behave exactly like a non-match. The input is
/// truncated to [`MAX_SUBJECT_LEN`] bytes before testing.
#[must_use]
pub fn safe_match(pattern: &str, input: &str) -> bool {
    let Some(re) = safe_compile(pattern) else {
        return false;
    };
    re.is_match(truncate_subject(input))
}

/// Run a tenant pattern and parse its first capture group as an integer.
///
/// Same contract as [`safe_match`]: unsafe/invalid patterns, missing capture
/// groups, and unparseable captures all yield `None`.
#[must_use]
pub fn safe_capture_u32(pattern: &str, input: &str) -> Option<u32> {
    let re = safe_compile(pattern)?;
    let caps = re.captures(truncate_subject(input))?;
    caps.get(1)?.as_str().trim().parse().ok()
}

/// Truncate a subject to [`MAX_SUBJECT_LEN`] bytes on a char boundary.
fn truncate_subject(input: &str) -> &str {
    if input.len() <= MAX_SUBJECT_LEN {
        return input;
    }
    let mut end = MAX_SUBJECT_LEN;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn long_patterns_rejected() {
        let long = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(!is_pattern_safe(&long));
        let exact = "a".repeat(MAX_PATTERN_LEN);
        assert!(is_pattern_safe(&exact));
    }

    #[test]
    fn nested_quantifiers_rejected() {
        for pattern in ["(x+)+", "(a*)+", "(x+)*", "([a-z]+)+$", "(x+){2,}"] {
            assert!(!is_pattern_safe(pattern), "'{pattern}' should be rejected");
        }
    }

    #[test]
    fn doubled_quantifiers_rejected() {
        for pattern in ["a++", "b**", "c+*", "d*+", "a+{2}"] {
            assert!(!is_pattern_safe(pattern), "'{pattern}' should be rejected");
        }
    }

    #[test]
    fn sequential_wildcards_rejected() {
        assert!(!is_pattern_safe(".*.*"));
        assert!(!is_pattern_safe("^.+.+$"));
    }

    #[test]
    fn ordinary_patterns_accepted() {
        for pattern in [
            r"(\d+)\s*days",
            r"refill\s+(\d+)",
            r"^premium",
            "lifetime",
            "",
        ] {
            assert!(is_pattern_safe(pattern), "'{pattern}' should be accepted");
        }
    }

    #[test]
    fn safe_match_is_case_insensitive() {
        assert!(safe_match(r"(\d+) days", "30 DAYS Guarantee"));
    }

    #[test]
    fn unsafe_pattern_behaves_like_non_match() {
        assert!(!safe_match("(x+)+", "xxxx"));
        assert_eq!(safe_capture_u32("(x+)+", "xxxx"), None);
    }

    #[test]
    fn invalid_pattern_behaves_like_non_match() {
        assert!(!safe_match("([unclosed", "anything"));
        assert_eq!(safe_capture_u32("([unclosed", "anything"), None);
    }

    #[test]
    fn capture_parses_first_group() {
        assert_eq!(safe_capture_u32(r"(\d+)\s*days", "30 days refill"), Some(30));
        assert_eq!(safe_capture_u32(r"refill", "refill"), None);
    }

    #[test]
    fn subject_truncated_on_char_boundary() {
        let mut input = "é".repeat(MAX_SUBJECT_LEN / 2 + 10);
        input.push_str("30 days");
        // The tail is past the truncation point, so the capture must miss.
        assert_eq!(safe_capture_u32(r"(\d+) days", &input), None);
        // And matching near the front still works.
        let front = format!("30 days {}", "x".repeat(MAX_SUBJECT_LEN * 2));
        assert_eq!(safe_capture_u32(r"(\d+) days", &front), Some(30));
    }

    proptest! {
        #[test]
        fn safe_match_never_panics(pattern in ".{0,60}", input in ".{0,200}") {
            let _ = safe_match(&pattern, &input);
            let _ = safe_capture_u32(&pattern, &input);
        }

        #[test]
        fn nested_quantifier_shapes_always_rejected(inner in "[a-z]{1,5}") {
            let pattern = format!("({inner}+)+");
            prop_assert!(!is_pattern_safe(&pattern));
        }
    }
}
