//! Per-user guarantee detection configuration.
//!
//! Exactly one [`GuaranteeConfig`] exists per user; the store creates it
//! lazily with defaults on first read. Partial updates go through
//! [`GuaranteeConfigPatch::apply_to`] so unspecified fields keep their
//! current values.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::safe_regex::MAX_PATTERN_LEN;

/// Default fallback duration (days) when a keyword or emoji hit carries no
/// explicit day count.
pub const DEFAULT_GUARANTEE_DAYS: u32 = 30;

/// Accepted range for the default fallback duration.
pub const MIN_DEFAULT_DAYS: u32 = 1;
pub const MAX_DEFAULT_DAYS: u32 = 3650;

/// Bounds on configured lists.
pub const MAX_CUSTOM_PATTERNS: usize = 50;
pub const MAX_KEYWORDS: usize = 100;
pub const MAX_EMOJIS: usize = 100;

/// Default guarantee keywords checked when a user has not configured any.
pub const DEFAULT_KEYWORDS: [&str; 6] =
    ["guarantee", "refill", "♻️", "🔄", "warranty", "lifetime"];

/// Default guarantee emojis checked when a user has not configured any.
pub const DEFAULT_EMOJIS: [&str; 3] = ["♻️", "🔄", "✅"];

/// What to do when a matched rule says a service has no guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoGuaranteeAction {
    /// Forward the refill request anyway
    Allow,
    /// Block the refill request (default posture)
    #[default]
    Deny,
    /// Block, but flag the result for operator confirmation
    Ask,
}

impl NoGuaranteeAction {
    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "ask" => Some(Self::Ask),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
        }
    }
}

/// Which signal source the orchestrator trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Rules and text patterns only
    #[default]
    Pattern,
    /// Provider-reported refillability only
    Api,
    /// Provider signal first, corroborated by rules/patterns
    Both,
}

impl DetectionMethod {
    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pattern" => Some(Self::Pattern),
            "api" => Some(Self::Api),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Api => "api",
            Self::Both => "both",
        }
    }

    /// Whether the provider-reported signal participates at all.
    #[must_use]
    pub fn consults_api(self) -> bool {
        matches!(self, Self::Api | Self::Both)
    }
}

/// Per-user guarantee detection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeConfig {
    /// Owning user
    pub user_id: i64,
    /// Ordered custom extraction patterns (regex with one capture group)
    pub custom_patterns: Vec<String>,
    /// Keyword fallback list (empty = use defaults)
    pub keywords: Vec<String>,
    /// Emoji fallback list (empty = use defaults)
    pub emojis: Vec<String>,
    /// Fallback duration when a keyword/emoji hit carries no day count
    pub default_days: u32,
    /// Per-user opt-out: when false, every check is allowed through
    pub enabled: bool,
    /// Posture for no-guarantee rule matches
    pub no_guarantee_action: NoGuaranteeAction,
    /// Which signal source to trust
    pub detection_method: DetectionMethod,
}

impl GuaranteeConfig {
    /// Default configuration for a user, as created lazily on first read.
    #[must_use]
    pub fn default_for(user_id: i64) -> Self {
        Self {
            user_id,
            custom_patterns: Vec::new(),
            keywords: Vec::new(),
            emojis: Vec::new(),
            default_days: DEFAULT_GUARANTEE_DAYS,
            enabled: true,
            no_guarantee_action: NoGuaranteeAction::default(),
            detection_method: DetectionMethod::default(),
        }
    }

    /// Effective keyword list: configured, or defaults when empty.
    #[must_use]
    pub fn effective_keywords(&self) -> Vec<&str> {
        if self.keywords.is_empty() {
            DEFAULT_KEYWORDS.to_vec()
        } else {
            self.keywords.iter().map(String::as_str).collect()
        }
    }

    /// Effective emoji list: configured, or defaults when empty.
    #[must_use]
    pub fn effective_emojis(&self) -> Vec<&str> {
        if self.emojis.is_empty() {
            DEFAULT_EMOJIS.to_vec()
        } else {
            self.emojis.iter().map(String::as_str).collect()
        }
    }

    /// Validate administrative input bounds.
    ///
    /// Pattern syntax and safety are not checked here; invalid or unsafe
    /// custom patterns are skipped at evaluation time.
    pub fn validate(&self) -> Result<()> {
        if self.custom_patterns.len() > MAX_CUSTOM_PATTERNS {
            return Err(ValidationError::ListTooLong {
                list: "custom pattern",
                max: MAX_CUSTOM_PATTERNS,
            }
            .into());
        }
        if self.keywords.len() > MAX_KEYWORDS {
            return Err(ValidationError::ListTooLong {
                list: "keyword",
                max: MAX_KEYWORDS,
            }
            .into());
        }
        if self.emojis.len() > MAX_EMOJIS {
            return Err(ValidationError::ListTooLong {
                list: "emoji",
                max: MAX_EMOJIS,
            }
            .into());
        }
        for pattern in &self.custom_patterns {
            if pattern.trim().is_empty() || pattern.chars().count() > MAX_PATTERN_LEN {
                return Err(ValidationError::InvalidPattern(format!(
                    "pattern must be non-empty and at most {MAX_PATTERN_LEN} chars"
                ))
                .into());
            }
        }
        if !(MIN_DEFAULT_DAYS..=MAX_DEFAULT_DAYS).contains(&self.default_days) {
            return Err(ValidationError::DefaultDaysOutOfRange {
                min: MIN_DEFAULT_DAYS,
                max: MAX_DEFAULT_DAYS,
                got: self.default_days,
            }
            .into());
        }
        Ok(())
    }
}

/// Partial update for a [`GuaranteeConfig`].
///
/// `None` fields keep the base value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuaranteeConfigPatch {
    pub custom_patterns: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
    pub emojis: Option<Vec<String>>,
    pub default_days: Option<u32>,
    pub enabled: Option<bool>,
    pub no_guarantee_action: Option<NoGuaranteeAction>,
    pub detection_method: Option<DetectionMethod>,
}

impl GuaranteeConfigPatch {
    /// Merge this patch over a base configuration.
    #[must_use]
    pub fn apply_to(&self, base: &GuaranteeConfig) -> GuaranteeConfig {
        let mut merged = base.clone();

        if let Some(patterns) = &self.custom_patterns {
            merged.custom_patterns.clone_from(patterns);
        }
        if let Some(keywords) = &self.keywords {
            merged.keywords.clone_from(keywords);
        }
        if let Some(emojis) = &self.emojis {
            merged.emojis.clone_from(emojis);
        }
        if let Some(days) = self.default_days {
            merged.default_days = days;
        }
        if let Some(enabled) = self.enabled {
            merged.enabled = enabled;
        }
        if let Some(action) = self.no_guarantee_action {
            merged.no_guarantee_action = action;
        }
        if let Some(method) = self.detection_method {
            merged.detection_method = method;
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GuaranteeConfig::default_for(1);
        assert!(config.validate().is_ok());
        assert!(config.enabled);
        assert_eq!(config.no_guarantee_action, NoGuaranteeAction::Deny);
        assert_eq!(config.detection_method, DetectionMethod::Pattern);
    }

    #[test]
    fn patch_apply_preserves_base_when_none() {
        let base = GuaranteeConfig {
            default_days: 15,
            ..GuaranteeConfig::default_for(1)
        };
        let merged = GuaranteeConfigPatch::default().apply_to(&base);
        assert_eq!(merged, base);
    }

    #[test]
    fn patch_apply_overrides_selected_fields() {
        let base = GuaranteeConfig::default_for(1);
        let patch = GuaranteeConfigPatch {
            enabled: Some(false),
            default_days: Some(60),
            no_guarantee_action: Some(NoGuaranteeAction::Ask),
            ..GuaranteeConfigPatch::default()
        };
        let merged = patch.apply_to(&base);
        assert!(!merged.enabled);
        assert_eq!(merged.default_days, 60);
        assert_eq!(merged.no_guarantee_action, NoGuaranteeAction::Ask);
        assert_eq!(merged.keywords, base.keywords);
    }

    #[test]
    fn out_of_range_default_days_rejected() {
        let mut config = GuaranteeConfig::default_for(1);
        config.default_days = 0;
        assert!(config.validate().is_err());
        config.default_days = MAX_DEFAULT_DAYS + 1;
        assert!(config.validate().is_err());
        config.default_days = MAX_DEFAULT_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_pattern_entry_rejected() {
        let mut config = GuaranteeConfig::default_for(1);
        config.custom_patterns = vec!["   ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_pattern_list_rejected() {
        let mut config = GuaranteeConfig::default_for(1);
        config.custom_patterns = vec![r"(\d+)".to_string(); MAX_CUSTOM_PATTERNS + 1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn effective_lists_fall_back_to_defaults() {
        let config = GuaranteeConfig::default_for(1);
        assert_eq!(config.effective_keywords(), DEFAULT_KEYWORDS.to_vec());
        assert_eq!(config.effective_emojis(), DEFAULT_EMOJIS.to_vec());

        let configured = GuaranteeConfig {
            keywords: vec!["garantie".to_string()],
            ..config
        };
        assert_eq!(configured.effective_keywords(), vec!["garantie"]);
    }

    #[test]
    fn action_and_method_round_trip_strings() {
        for action in [
            NoGuaranteeAction::Allow,
            NoGuaranteeAction::Deny,
            NoGuaranteeAction::Ask,
        ] {
            assert_eq!(NoGuaranteeAction::parse(action.as_str()), Some(action));
        }
        for method in [
            DetectionMethod::Pattern,
            DetectionMethod::Api,
            DetectionMethod::Both,
        ] {
            assert_eq!(DetectionMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(NoGuaranteeAction::parse("bogus"), None);
    }
}
