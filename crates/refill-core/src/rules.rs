//! User-defined keyword rules and the rule matching engine.
//!
//! Rules pre-empt text extraction: a priority-10 "No Refill" exclusion wins
//! over a "30 Days ♻️" annotation in the same service name. Rules are owned
//! by a user and optionally scoped to one panel (`panel_id = None` means
//! global).
//!
//! The no-guarantee/duration invariant is structural: a
//! [`RuleAction::NoGuarantee`] cannot carry a duration because the duration
//! lives inside [`RuleAction::Guarantee`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GuaranteeConfig;
use crate::error::{Result, ValidationError};
use crate::expiry::GuaranteeDuration;
use crate::extract::{self, ExtractionTier, contains_keyword};
use crate::storage::Store;

/// Maximum accepted rule keyword length in characters.
pub const MAX_KEYWORD_LEN: usize = 200;

/// Accepted range for a finite rule guarantee duration, in days.
pub const MIN_RULE_DAYS: u32 = 1;
pub const MAX_RULE_DAYS: u32 = 3650;

/// Priority of seeded exclusion rules ("No Refill" etc.).
pub const SEED_EXCLUSION_PRIORITY: i64 = 10;

/// Priority of seeded inclusion rules ("30 Days ♻️" ladder).
pub const SEED_INCLUSION_PRIORITY: i64 = 50;

/// Day counts covered by the seeded inclusion ladder.
const SEED_DAY_LADDER: [u32; 7] = [7, 15, 20, 30, 60, 90, 365];

/// Seeded exclusion keywords.
const SEED_EXCLUSIONS: [&str; 4] = ["No Refill", "No Guarantee", "Non Refill", "Without Guarantee"];

/// What a matched rule says about the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "duration")]
pub enum RuleAction {
    /// Service explicitly carries no guarantee
    NoGuarantee,
    /// Service is guaranteed for the given duration
    Guarantee(GuaranteeDuration),
}

impl RuleAction {
    /// Stored string form of the action kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoGuarantee => "no_guarantee",
            Self::Guarantee(_) => "guarantee",
        }
    }
}

/// A stored guarantee rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeRule {
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Panel scope; `None` applies to every panel
    pub panel_id: Option<i64>,
    /// Case-insensitive substring matcher
    pub keyword: String,
    pub action: RuleAction,
    /// Lower sorts first
    pub priority: i64,
    pub is_active: bool,
    /// Tie-break within equal priority
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub panel_id: Option<i64>,
    pub keyword: String,
    pub action: RuleAction,
    pub priority: i64,
    pub is_active: bool,
}

impl NewRule {
    /// Validate administrative input bounds.
    pub fn validate(&self) -> Result<()> {
        let keyword = self.keyword.trim();
        if keyword.is_empty() || keyword.chars().count() > MAX_KEYWORD_LEN {
            return Err(ValidationError::InvalidKeyword(format!(
                "keyword must be non-empty and at most {MAX_KEYWORD_LEN} chars"
            ))
            .into());
        }
        if let RuleAction::Guarantee(GuaranteeDuration::Days(days)) = self.action {
            if !(MIN_RULE_DAYS..=MAX_RULE_DAYS).contains(&days) {
                return Err(ValidationError::RuleDaysOutOfRange {
                    min: MIN_RULE_DAYS,
                    max: MAX_RULE_DAYS,
                    got: days,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Partial update for a rule. `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePatch {
    pub keyword: Option<String>,
    pub action: Option<RuleAction>,
    pub priority: Option<i64>,
    pub is_active: Option<bool>,
}

/// Where a classification came from, for decision attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum MatchSource {
    /// A stored rule matched
    Rule { rule_id: i64, keyword: String },
    /// Text extraction matched
    Pattern { tier: ExtractionTier },
    /// Nothing matched
    None,
}

/// What the classifier concluded about a service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// `None` means no guarantee (explicitly excluded, or simply not found)
    pub duration: Option<GuaranteeDuration>,
    pub source: MatchSource,
}

impl Classification {
    #[must_use]
    pub fn has_guarantee(&self) -> bool {
        self.duration.is_some()
    }
}

/// Pick the first active rule whose keyword is contained in the service
/// name, in (priority, created_at, id) order.
///
/// Sorting happens here so the result is independent of the input slice
/// order.
#[must_use]
pub fn first_matching_rule<'a>(
    rules: &'a [GuaranteeRule],
    service_name: &str,
) -> Option<&'a GuaranteeRule> {
    let mut ordered: Vec<&GuaranteeRule> = rules.iter().filter(|r| r.is_active).collect();
    ordered.sort_by_key(|r| (r.priority, r.created_at, r.id));
    ordered
        .into_iter()
        .find(|rule| contains_keyword(service_name, &rule.keyword))
}

/// Rule evaluation engine over a configuration store.
pub struct RuleEngine<'a> {
    store: &'a Store,
}

impl<'a> RuleEngine<'a> {
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Classify a service name for a user within a panel scope.
    ///
    /// Tries stored rules first; on no rule hit, delegates to the text
    /// extraction engine with the user's configuration.
    pub fn match_rules(
        &self,
        service_name: &str,
        user_id: i64,
        panel_id: Option<i64>,
        config: &GuaranteeConfig,
    ) -> Result<Classification> {
        let rules = self.store.active_rules(user_id, panel_id)?;

        if let Some(rule) = first_matching_rule(&rules, service_name) {
            let duration = match rule.action {
                RuleAction::NoGuarantee => None,
                RuleAction::Guarantee(d) => Some(d),
            };
            return Ok(Classification {
                duration,
                source: MatchSource::Rule {
                    rule_id: rule.id,
                    keyword: rule.keyword.clone(),
                },
            });
        }

        Ok(classify_by_pattern(service_name, config))
    }

    /// Seed the starter rule set for a user with no rules yet.
    ///
    /// Runs as a single immediate transaction so two concurrent first-time
    /// callers cannot both seed. Returns the number of rules inserted (0
    /// when the user already has rules).
    pub fn seed_default_rules(&self, user_id: i64) -> Result<usize> {
        self.store.seed_rules_if_empty(user_id, &default_seed_rules())
    }
}

/// Classify via text extraction alone (no store access).
///
/// Used both as the rule engine's fallback and as the orchestrator's last
/// tier when the rule lookup itself fails.
#[must_use]
pub fn classify_by_pattern(service_name: &str, config: &GuaranteeConfig) -> Classification {
    match extract::extract(service_name, config) {
        Some(hit) => Classification {
            duration: Some(GuaranteeDuration::Days(hit.days)),
            source: MatchSource::Pattern { tier: hit.tier },
        },
        None => Classification {
            duration: None,
            source: MatchSource::None,
        },
    }
}

/// The starter rule set: high-precedence exclusions, then an inclusion
/// ladder for common day counts plus a lifetime entry.
#[must_use]
pub fn default_seed_rules() -> Vec<NewRule> {
    let mut seeds: Vec<NewRule> = SEED_EXCLUSIONS
        .iter()
        .map(|keyword| NewRule {
            panel_id: None,
            keyword: (*keyword).to_string(),
            action: RuleAction::NoGuarantee,
            priority: SEED_EXCLUSION_PRIORITY,
            is_active: true,
        })
        .collect();

    for days in SEED_DAY_LADDER {
        seeds.push(NewRule {
            panel_id: None,
            keyword: format!("{days} Days ♻️"),
            action: RuleAction::Guarantee(GuaranteeDuration::Days(days)),
            priority: SEED_INCLUSION_PRIORITY,
            is_active: true,
        });
    }
    seeds.push(NewRule {
        panel_id: None,
        keyword: "Lifetime ♻️".to_string(),
        action: RuleAction::Guarantee(GuaranteeDuration::Lifetime),
        priority: SEED_INCLUSION_PRIORITY,
        is_active: true,
    });

    seeds
}
