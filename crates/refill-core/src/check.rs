//! Decision orchestrator: one authoritative refill-eligibility outcome.
//!
//! The check is an ordered, short-circuiting chain of tiers:
//!
//! ```text
//! Order + user config
//!     → per-user opt-out
//!     → order status gate
//!     → provider-reported signal (api / both)
//!     → stored rules → text extraction fallback
//!     → expiry window
//! ```
//!
//! Each tier either produces the final [`CheckResult`] or passes to the
//! next. Evaluation-time failures inside the rule lookup are caught and
//! degrade to the extraction fallback; a check always returns a result. The
//! default posture when nothing matches is the user's
//! [`NoGuaranteeAction`], which defaults to deny.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DetectionMethod, GuaranteeConfig, NoGuaranteeAction};
use crate::error::Result;
use crate::expiry::{self, ExpiryOutcome, GuaranteeDuration};
use crate::rules::{Classification, MatchSource, RuleEngine, classify_by_pattern};
use crate::storage::Store;

/// Order lifecycle status as reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Processing,
    Completed,
    Partial,
    Canceled,
    Refunded,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }
}

/// A completed (or not) order, as supplied by the external order source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Provider-side order identifier
    pub external_order_id: String,
    /// Free-text service name the panel sold
    pub service_name: String,
    pub status: OrderStatus,
    /// When the order completed, if known
    pub completed_at: Option<DateTime<Utc>>,
    /// Last provider-side update; completion fallback timestamp
    pub updated_at: Option<DateTime<Utc>>,
    /// Provider-reported refillability (tri-state; `None` = unreported)
    pub can_refill: Option<bool>,
    /// Panel this order belongs to, for rule scoping
    pub panel_id: Option<i64>,
}

/// Why a check came out the way it did. Closed enum; the external
/// message-formatting layer renders these into user-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckReason {
    /// Per-user opt-out: guarantee checking is disabled
    ValidationDisabled,
    /// Only completed orders are eligible
    NotCompleted,
    /// Provider explicitly reports no refill
    ApiNoRefill,
    /// Provider explicitly reports refill available (api mode only)
    ApiRefillAllowed,
    /// No guarantee found; user posture is allow
    NoGuaranteeAllow,
    /// No guarantee found; user posture is ask
    NoGuaranteeAsk,
    /// No guarantee found; user posture is deny
    NoGuarantee,
    /// Guarantee found but the order has no usable completion timestamp
    NoCompletionDate,
    /// Guarantee window has closed
    Expired,
    /// Guarantee window is open
    Valid,
}

/// Structured detail fields accompanying a [`CheckResult`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckDetails {
    /// Short operator-facing summary
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guarantee: Option<GuaranteeDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_overdue: Option<i64>,
    /// Which tier decided (rule / pattern / none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<MatchSource>,
    /// Keyword of the matched rule, when a rule decided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Set for ask-posture outcomes: an operator must confirm
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_confirmation: bool,
}

/// Outcome of a guarantee check. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the refill request may be forwarded
    pub valid: bool,
    pub reason: CheckReason,
    pub details: CheckDetails,
}

impl CheckResult {
    fn new(valid: bool, reason: CheckReason, details: CheckDetails) -> Self {
        Self {
            valid,
            reason,
            details,
        }
    }
}

/// The decision orchestrator.
pub struct GuaranteeChecker<'a> {
    store: &'a Store,
}

impl<'a> GuaranteeChecker<'a> {
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Decide refill eligibility for an order, evaluated at the current
    /// instant.
    pub fn check_guarantee(&self, order: &Order, user_id: i64) -> Result<CheckResult> {
        self.check_guarantee_at(order, user_id, Utc::now())
    }

    /// Decide refill eligibility at an explicit instant.
    ///
    /// Only a configuration-store failure errors; everything downstream of
    /// the config fetch degrades tier by tier and always yields a result.
    pub fn check_guarantee_at(
        &self,
        order: &Order,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CheckResult> {
        let config = self.store.get_or_create_config(user_id)?;

        // Tier a: per-user opt-out overrides everything.
        if !config.enabled {
            return Ok(CheckResult::new(
                true,
                CheckReason::ValidationDisabled,
                CheckDetails {
                    message: "guarantee checking is disabled".to_string(),
                    ..CheckDetails::default()
                },
            ));
        }

        // Tier b: only completed orders are ever eligible.
        if order.status != OrderStatus::Completed {
            return Ok(CheckResult::new(
                false,
                CheckReason::NotCompleted,
                CheckDetails {
                    message: format!("order is not completed (status: {})", order.status.as_str()),
                    ..CheckDetails::default()
                },
            ));
        }

        // Tier c: provider-reported signal.
        if config.detection_method.consults_api() {
            if order.can_refill == Some(false) {
                // Provider veto is authoritative in both api and both modes.
                return Ok(CheckResult::new(
                    false,
                    CheckReason::ApiNoRefill,
                    CheckDetails {
                        message: "provider reports refill unavailable".to_string(),
                        ..CheckDetails::default()
                    },
                ));
            }
            if config.detection_method == DetectionMethod::Api && order.can_refill == Some(true) {
                // api mode trusts the positive signal outright; both mode
                // continues to corroborate with rules.
                return Ok(CheckResult::new(
                    true,
                    CheckReason::ApiRefillAllowed,
                    CheckDetails {
                        message: "provider reports refill available".to_string(),
                        ..CheckDetails::default()
                    },
                ));
            }
        }

        // Tier d: stored rules, falling back to text extraction. A failed
        // rule lookup must not fail the check; it degrades to extraction
        // alone.
        let engine = RuleEngine::new(self.store);
        let classification =
            match engine.match_rules(&order.service_name, user_id, order.panel_id, &config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        order = %order.external_order_id,
                        error = %e,
                        "rule lookup failed; falling back to pattern extraction"
                    );
                    classify_by_pattern(&order.service_name, &config)
                }
            };

        Ok(Self::resolve(order, &config, &classification, now))
    }

    /// Tier e: turn a classification into the final outcome.
    fn resolve(
        order: &Order,
        config: &GuaranteeConfig,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> CheckResult {
        let matched_rule = match &classification.source {
            MatchSource::Rule { keyword, .. } => Some(keyword.clone()),
            _ => None,
        };

        let Some(duration) = classification.duration else {
            return Self::no_guarantee(config.no_guarantee_action, classification, matched_rule);
        };

        // A guarantee with no usable completion timestamp cannot be
        // evaluated; default-allow rather than blocking a legitimate refill.
        let Some(completed_at) = order.completed_at.or(order.updated_at) else {
            return CheckResult::new(
                true,
                CheckReason::NoCompletionDate,
                CheckDetails {
                    message: "guarantee found but order has no completion date".to_string(),
                    guarantee: Some(duration),
                    source: Some(classification.source.clone()),
                    matched_rule,
                    ..CheckDetails::default()
                },
            );
        };

        match expiry::evaluate(completed_at, duration, now) {
            ExpiryOutcome::Lifetime => CheckResult::new(
                true,
                CheckReason::Valid,
                CheckDetails {
                    message: "lifetime guarantee".to_string(),
                    guarantee: Some(duration),
                    completed_at: Some(completed_at),
                    source: Some(classification.source.clone()),
                    matched_rule,
                    ..CheckDetails::default()
                },
            ),
            ExpiryOutcome::Valid {
                expires_at,
                days_remaining,
            } => CheckResult::new(
                true,
                CheckReason::Valid,
                CheckDetails {
                    message: format!("guarantee valid for {days_remaining} more day(s)"),
                    guarantee: Some(duration),
                    completed_at: Some(completed_at),
                    expires_at: Some(expires_at),
                    days_remaining: Some(days_remaining),
                    source: Some(classification.source.clone()),
                    matched_rule,
                    ..CheckDetails::default()
                },
            ),
            ExpiryOutcome::Expired {
                expired_at,
                days_overdue,
            } => CheckResult::new(
                false,
                CheckReason::Expired,
                CheckDetails {
                    message: format!("guarantee expired {days_overdue} day(s) ago"),
                    guarantee: Some(duration),
                    completed_at: Some(completed_at),
                    expired_at: Some(expired_at),
                    days_overdue: Some(days_overdue),
                    source: Some(classification.source.clone()),
                    matched_rule,
                    ..CheckDetails::default()
                },
            ),
        }
    }

    fn no_guarantee(
        action: NoGuaranteeAction,
        classification: &Classification,
        matched_rule: Option<String>,
    ) -> CheckResult {
        let source = Some(classification.source.clone());
        match action {
            NoGuaranteeAction::Allow => CheckResult::new(
                true,
                CheckReason::NoGuaranteeAllow,
                CheckDetails {
                    message: "no guarantee found; configured to allow".to_string(),
                    source,
                    matched_rule,
                    ..CheckDetails::default()
                },
            ),
            NoGuaranteeAction::Ask => CheckResult::new(
                false,
                CheckReason::NoGuaranteeAsk,
                CheckDetails {
                    message: "no guarantee found; confirmation required".to_string(),
                    source,
                    matched_rule,
                    requires_confirmation: true,
                    ..CheckDetails::default()
                },
            ),
            NoGuaranteeAction::Deny => CheckResult::new(
                false,
                CheckReason::NoGuarantee,
                CheckDetails {
                    message: "no guarantee found for this service".to_string(),
                    source,
                    matched_rule,
                    ..CheckDetails::default()
                },
            ),
        }
    }

    /// Read-only classification for status displays, independent of any
    /// refill attempt.
    pub fn guarantee_info(
        &self,
        service_name: &str,
        user_id: i64,
        panel_id: Option<i64>,
    ) -> Result<Classification> {
        let config = self.store.get_or_create_config(user_id)?;
        RuleEngine::new(self.store).match_rules(service_name, user_id, panel_id, &config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuaranteeConfigPatch;
    use crate::rules::{NewRule, RuleAction};
    use chrono::Duration;

    const USER: i64 = 1;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn order(service_name: &str, completed_days_ago: i64) -> Order {
        Order {
            external_order_id: "12345".to_string(),
            service_name: service_name.to_string(),
            status: OrderStatus::Completed,
            completed_at: Some(Utc::now() - Duration::days(completed_days_ago)),
            updated_at: None,
            can_refill: None,
            panel_id: None,
        }
    }

    fn check(store: &Store, order: &Order) -> CheckResult {
        GuaranteeChecker::new(store)
            .check_guarantee(order, USER)
            .unwrap()
    }

    // =========================================================================
    // Tier gates
    // =========================================================================

    #[test]
    fn disabled_config_allows_everything() {
        let store = store();
        store
            .update_config(
                USER,
                &GuaranteeConfigPatch {
                    enabled: Some(false),
                    ..GuaranteeConfigPatch::default()
                },
            )
            .unwrap();

        // Even a non-completed order passes when checking is disabled.
        let mut pending = order("Followers 30 Days ♻️", 100);
        pending.status = OrderStatus::Pending;
        let result = check(&store, &pending);
        assert!(result.valid);
        assert_eq!(result.reason, CheckReason::ValidationDisabled);
    }

    #[test]
    fn non_completed_order_rejected_even_with_guarantee() {
        let store = store();
        let mut o = order("Followers 30 Days ♻️", 1);
        o.status = OrderStatus::InProgress;
        let result = check(&store, &o);
        assert!(!result.valid);
        assert_eq!(result.reason, CheckReason::NotCompleted);
    }

    // =========================================================================
    // Provider signal (api / both)
    // =========================================================================

    fn set_method(store: &Store, method: DetectionMethod) {
        store
            .update_config(
                USER,
                &GuaranteeConfigPatch {
                    detection_method: Some(method),
                    ..GuaranteeConfigPatch::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn provider_veto_is_authoritative() {
        for method in [DetectionMethod::Api, DetectionMethod::Both] {
            let store = store();
            set_method(&store, method);
            let mut o = order("Followers 30 Days ♻️", 1);
            o.can_refill = Some(false);
            let result = check(&store, &o);
            assert!(!result.valid);
            assert_eq!(result.reason, CheckReason::ApiNoRefill);
        }
    }

    #[test]
    fn api_mode_trusts_positive_signal() {
        let store = store();
        set_method(&store, DetectionMethod::Api);
        let mut o = order("Plain Likes", 500);
        o.can_refill = Some(true);
        let result = check(&store, &o);
        assert!(result.valid);
        assert_eq!(result.reason, CheckReason::ApiRefillAllowed);
    }

    #[test]
    fn both_mode_corroborates_positive_signal_with_rules() {
        let store = store();
        set_method(&store, DetectionMethod::Both);
        // Provider says yes but the window expired: both mode still checks.
        let mut o = order("Followers 30 Days ♻️", 40);
        o.can_refill = Some(true);
        let result = check(&store, &o);
        assert!(!result.valid);
        assert_eq!(result.reason, CheckReason::Expired);
    }

    #[test]
    fn pattern_mode_ignores_provider_signal() {
        let store = store();
        let mut o = order("Followers 30 Days ♻️", 1);
        o.can_refill = Some(false);
        let result = check(&store, &o);
        assert!(result.valid, "pattern mode must not consult can_refill");
        assert_eq!(result.reason, CheckReason::Valid);
    }

    // =========================================================================
    // Spec scenarios
    // =========================================================================

    #[test]
    fn scenario_a_within_window() {
        let store = store();
        let result = check(&store, &order("Instagram Followers 30 Days ♻️", 10));
        assert!(result.valid);
        assert_eq!(result.reason, CheckReason::Valid);
        assert_eq!(result.details.guarantee, Some(GuaranteeDuration::Days(30)));
        let remaining = result.details.days_remaining.unwrap();
        assert!((19..=20).contains(&remaining), "got {remaining}");
    }

    #[test]
    fn scenario_b_past_window() {
        let store = store();
        let result = check(&store, &order("Instagram Followers 30 Days ♻️", 40));
        assert!(!result.valid);
        assert_eq!(result.reason, CheckReason::Expired);
        let overdue = result.details.days_overdue.unwrap();
        assert!((10..=11).contains(&overdue), "got {overdue}");
    }

    #[test]
    fn scenario_c_no_refill_denied_by_default() {
        let store = store();
        let result = check(&store, &order("TikTok Views No Refill", 1));
        assert!(!result.valid);
        assert_eq!(result.reason, CheckReason::NoGuarantee);
        assert!(!result.details.requires_confirmation);
    }

    #[test]
    fn scenario_d_high_priority_rule_preempts_pattern() {
        let store = store();
        store
            .create_rule(
                USER,
                &NewRule {
                    panel_id: None,
                    keyword: "No Refill".to_string(),
                    action: RuleAction::NoGuarantee,
                    priority: 10,
                    is_active: true,
                },
            )
            .unwrap();

        // Service name also contains a valid 30-day annotation.
        let result = check(&store, &order("Members 30 Days ♻️ No Refill", 1));
        assert!(!result.valid);
        assert_eq!(result.reason, CheckReason::NoGuarantee);
        assert_eq!(result.details.matched_rule.as_deref(), Some("No Refill"));
        assert!(matches!(
            result.details.source,
            Some(MatchSource::Rule { .. })
        ));
    }

    // =========================================================================
    // No-guarantee postures
    // =========================================================================

    fn set_action(store: &Store, action: NoGuaranteeAction) {
        store
            .update_config(
                USER,
                &GuaranteeConfigPatch {
                    no_guarantee_action: Some(action),
                    ..GuaranteeConfigPatch::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn allow_posture_permits_unguaranteed_service() {
        let store = store();
        set_action(&store, NoGuaranteeAction::Allow);
        let result = check(&store, &order("Plain Likes 10K", 1));
        assert!(result.valid);
        assert_eq!(result.reason, CheckReason::NoGuaranteeAllow);
    }

    #[test]
    fn ask_posture_flags_confirmation() {
        let store = store();
        set_action(&store, NoGuaranteeAction::Ask);
        let result = check(&store, &order("Plain Likes 10K", 1));
        assert!(!result.valid);
        assert_eq!(result.reason, CheckReason::NoGuaranteeAsk);
        assert!(result.details.requires_confirmation);
    }

    // =========================================================================
    // Timestamps and durations
    // =========================================================================

    #[test]
    fn missing_completion_date_defaults_to_allow() {
        let store = store();
        let mut o = order("Followers 30 Days ♻️", 1);
        o.completed_at = None;
        o.updated_at = None;
        let result = check(&store, &o);
        assert!(result.valid);
        assert_eq!(result.reason, CheckReason::NoCompletionDate);
    }

    #[test]
    fn updated_at_used_when_completed_at_missing() {
        let store = store();
        let mut o = order("Followers 30 Days ♻️", 0);
        o.completed_at = None;
        o.updated_at = Some(Utc::now() - Duration::days(40));
        let result = check(&store, &o);
        assert!(!result.valid);
        assert_eq!(result.reason, CheckReason::Expired);
    }

    #[test]
    fn huge_extracted_day_count_still_returns_a_result() {
        let store = store();
        // An oversized rule duration is rejected at the admin boundary.
        let err = store.create_rule(
            USER,
            &NewRule {
                panel_id: None,
                keyword: "Mega".to_string(),
                action: RuleAction::Guarantee(GuaranteeDuration::Days(u32::MAX)),
                priority: 50,
                is_active: true,
            },
        );
        assert!(err.is_err());

        // Extraction is unvalidated: a service name can still carry an
        // absurd day count, and the check must produce a result.
        let result = check(&store, &order("Members 4294967295 Days ♻️", 1));
        assert!(result.valid);
        assert_eq!(result.reason, CheckReason::Valid);
        assert_eq!(
            result.details.guarantee,
            Some(GuaranteeDuration::Days(u32::MAX))
        );
        assert!(result.details.expires_at.is_none());
    }

    #[test]
    fn lifetime_rule_is_always_valid() {
        let store = store();
        store
            .create_rule(
                USER,
                &NewRule {
                    panel_id: None,
                    keyword: "Lifetime".to_string(),
                    action: RuleAction::Guarantee(GuaranteeDuration::Lifetime),
                    priority: 50,
                    is_active: true,
                },
            )
            .unwrap();
        let result = check(&store, &order("Members Lifetime ♻️", 5000));
        assert!(result.valid);
        assert_eq!(result.reason, CheckReason::Valid);
        assert_eq!(result.details.guarantee, Some(GuaranteeDuration::Lifetime));
        assert!(result.details.expires_at.is_none());
    }

    #[test]
    fn panel_scoped_rule_only_applies_to_its_panel() {
        let store = store();
        store
            .create_rule(
                USER,
                &NewRule {
                    panel_id: Some(10),
                    keyword: "Special".to_string(),
                    action: RuleAction::Guarantee(GuaranteeDuration::Days(90)),
                    priority: 10,
                    is_active: true,
                },
            )
            .unwrap();

        let mut o = order("Special Offer Likes", 1);
        o.panel_id = Some(10);
        assert_eq!(check(&store, &o).reason, CheckReason::Valid);

        o.panel_id = Some(20);
        assert_eq!(check(&store, &o).reason, CheckReason::NoGuarantee);
    }

    #[test]
    fn guarantee_info_reports_classification_without_order() {
        let store = store();
        let checker = GuaranteeChecker::new(&store);
        let info = checker
            .guarantee_info("Followers 30 Days ♻️", USER, None)
            .unwrap();
        assert_eq!(info.duration, Some(GuaranteeDuration::Days(30)));
        assert!(matches!(info.source, MatchSource::Pattern { .. }));

        let miss = checker.guarantee_info("Plain Likes", USER, None).unwrap();
        assert!(!miss.has_guarantee());
        assert_eq!(miss.source, MatchSource::None);
    }
}
