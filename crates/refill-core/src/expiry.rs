//! Guarantee window arithmetic.
//!
//! A guarantee is either a finite day count or lifetime. Lifetime is a
//! distinct variant, not a sentinel day count, so the window arithmetic
//! below never sees it.
//!
//! All evaluation takes an explicit `now` so the orchestrator passes
//! `Utc::now()` and tests pass fixed instants.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A guarantee duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuaranteeDuration {
    /// Finite window in calendar days
    Days(u32),
    /// Never expires
    Lifetime,
}

impl std::fmt::Display for GuaranteeDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Days(d) => write!(f, "{d} days"),
            Self::Lifetime => write!(f, "lifetime"),
        }
    }
}

/// Outcome of evaluating a guarantee window at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Lifetime guarantee, no expiry
    Lifetime,
    /// Window still open (the boundary instant counts as open)
    Valid {
        expires_at: DateTime<Utc>,
        /// `ceil((expires_at - now) / 1 day)`; 0 exactly at the boundary
        days_remaining: i64,
    },
    /// Window closed
    Expired {
        expired_at: DateTime<Utc>,
        /// `ceil((now - expired_at) / 1 day)`
        days_overdue: i64,
    },
}

impl ExpiryOutcome {
    /// Whether the guarantee is still honorable at the evaluated instant.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Expired { .. })
    }
}

/// Evaluate a guarantee window.
///
/// `expires_at = completed_at + days`; expired iff `now > expires_at`.
#[must_use]
pub fn evaluate(
    completed_at: DateTime<Utc>,
    duration: GuaranteeDuration,
    now: DateTime<Utc>,
) -> ExpiryOutcome {
    let days = match duration {
        GuaranteeDuration::Lifetime => return ExpiryOutcome::Lifetime,
        GuaranteeDuration::Days(d) => d,
    };

    // Day counts from text extraction are unvalidated; a window too large
    // to represent cannot close, so treat it as lifetime.
    let Some(window) = Duration::try_days(i64::from(days)) else {
        return ExpiryOutcome::Lifetime;
    };
    let Some(expires_at) = completed_at.checked_add_signed(window) else {
        return ExpiryOutcome::Lifetime;
    };
    if now > expires_at {
        ExpiryOutcome::Expired {
            expired_at: expires_at,
            days_overdue: ceil_days((now - expires_at).num_milliseconds()),
        }
    } else {
        ExpiryOutcome::Valid {
            expires_at,
            days_remaining: ceil_days((expires_at - now).num_milliseconds()),
        }
    }
}

/// Ceiling division of a non-negative millisecond count into days.
fn ceil_days(ms: i64) -> i64 {
    (ms + 86_399_999).div_euclid(86_400_000)
}
