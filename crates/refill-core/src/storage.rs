//! SQLite-backed configuration store.
//!
//! # Schema Design
//!
//! WAL mode for concurrent reads and single-writer semantics. All timestamps
//! are epoch milliseconds (i64). List-valued config fields are stored as
//! JSON TEXT.
//!
//! # Tables
//!
//! - `guarantee_configs`: one row per user (PRIMARY KEY enforces the
//!   uniqueness invariant; lazy creation races collapse into one row)
//! - `guarantee_rules`: user-owned keyword rules, indexed by scope and
//!   priority
//!
//! Every mutation is ownership-checked in SQL: a rule id belonging to
//! another user is indistinguishable from a missing one.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::config::{DetectionMethod, GuaranteeConfig, GuaranteeConfigPatch, NoGuaranteeAction};
use crate::error::{ConfigError, Result, StorageError, ValidationError};
use crate::expiry::GuaranteeDuration;
use crate::rules::{GuaranteeRule, NewRule, RuleAction, RulePatch};

/// Current schema version, tracked via PRAGMA user_version.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema initialization SQL
///
/// Convention notes:
/// - Timestamps: epoch milliseconds (i64)
/// - JSON columns: TEXT containing JSON
pub const SCHEMA_SQL: &str = r#"
-- Enable WAL mode for concurrent reads and single-writer semantics
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA synchronous = NORMAL;

-- Per-user guarantee detection configuration (exactly one row per user)
CREATE TABLE IF NOT EXISTS guarantee_configs (
    user_id INTEGER PRIMARY KEY,
    custom_patterns TEXT NOT NULL DEFAULT '[]',   -- JSON array of pattern strings
    keywords TEXT NOT NULL DEFAULT '[]',          -- JSON array ([] = defaults)
    emojis TEXT NOT NULL DEFAULT '[]',            -- JSON array ([] = defaults)
    default_days INTEGER NOT NULL DEFAULT 30,
    enabled INTEGER NOT NULL DEFAULT 1,           -- bool
    no_guarantee_action TEXT NOT NULL DEFAULT 'deny',   -- allow | deny | ask
    detection_method TEXT NOT NULL DEFAULT 'pattern',   -- pattern | api | both
    created_at INTEGER NOT NULL,  -- epoch ms
    updated_at INTEGER NOT NULL   -- epoch ms
);

-- User-owned keyword rules, optionally scoped to one panel
CREATE TABLE IF NOT EXISTS guarantee_rules (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    panel_id INTEGER,                 -- NULL = global
    keyword TEXT NOT NULL,
    action TEXT NOT NULL,             -- no_guarantee | guarantee
    days INTEGER,                     -- NULL unless action=guarantee and finite
    is_lifetime INTEGER NOT NULL DEFAULT 0,  -- bool
    priority INTEGER NOT NULL DEFAULT 100,   -- lower sorts first
    is_active INTEGER NOT NULL DEFAULT 1,    -- bool
    created_at INTEGER NOT NULL       -- epoch ms, tie-break within priority
);

CREATE INDEX IF NOT EXISTS idx_rules_user_scope
    ON guarantee_rules(user_id, panel_id, priority, created_at);
"#;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ensure_user(user_id: i64) -> Result<()> {
    if user_id <= 0 {
        return Err(ConfigError::MissingIdentifier("user_id").into());
    }
    Ok(())
}

/// Synchronous SQLite store.
///
/// Every engine call fetches fresh data; no state is cached between calls,
/// so checks for different orders and users are independent.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Database(format!("failed to open database: {e}")))?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Database(format!("failed to open database: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StorageError::Database(format!("schema init failed: {e}")))?;
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()).into())
    }

    // =========================================================================
    // Config
    // =========================================================================

    /// Fetch a user's configuration, creating the default row on first read.
    pub fn get_or_create_config(&self, user_id: i64) -> Result<GuaranteeConfig> {
        ensure_user(user_id)?;
        let conn = self.conn()?;
        // INSERT OR IGNORE makes concurrent first reads collapse onto the
        // primary key instead of racing.
        let now = now_ms();
        conn.execute(
            "INSERT OR IGNORE INTO guarantee_configs (user_id, created_at, updated_at)
             VALUES (?1, ?2, ?2)",
            params![user_id, now],
        )?;
        Self::select_config(&conn, user_id)?
            .ok_or_else(|| StorageError::NotFound("config").into())
    }

    /// Apply a partial update to a user's configuration.
    ///
    /// The merged result is validated before being written; an invalid patch
    /// leaves the stored row untouched.
    pub fn update_config(
        &self,
        user_id: i64,
        patch: &GuaranteeConfigPatch,
    ) -> Result<GuaranteeConfig> {
        let merged = patch.apply_to(&self.get_or_create_config(user_id)?);
        merged.validate()?;

        let conn = self.conn()?;
        conn.execute(
            "UPDATE guarantee_configs
             SET custom_patterns = ?2, keywords = ?3, emojis = ?4, default_days = ?5,
                 enabled = ?6, no_guarantee_action = ?7, detection_method = ?8,
                 updated_at = ?9
             WHERE user_id = ?1",
            params![
                user_id,
                encode_list(&merged.custom_patterns)?,
                encode_list(&merged.keywords)?,
                encode_list(&merged.emojis)?,
                merged.default_days,
                merged.enabled,
                merged.no_guarantee_action.as_str(),
                merged.detection_method.as_str(),
                now_ms(),
            ],
        )?;
        Ok(merged)
    }

    fn select_config(conn: &Connection, user_id: i64) -> Result<Option<GuaranteeConfig>> {
        conn.query_row(
            "SELECT user_id, custom_patterns, keywords, emojis, default_days,
                    enabled, no_guarantee_action, detection_method
             FROM guarantee_configs WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?
        .map(
            |(user_id, patterns, keywords, emojis, default_days, enabled, action, method)| {
                Ok(GuaranteeConfig {
                    user_id,
                    custom_patterns: decode_list(&patterns)?,
                    keywords: decode_list(&keywords)?,
                    emojis: decode_list(&emojis)?,
                    default_days,
                    enabled,
                    no_guarantee_action: NoGuaranteeAction::parse(&action).ok_or_else(|| {
                        StorageError::Database(format!("bad no_guarantee_action '{action}'"))
                    })?,
                    detection_method: DetectionMethod::parse(&method).ok_or_else(|| {
                        StorageError::Database(format!("bad detection_method '{method}'"))
                    })?,
                })
            },
        )
        .transpose()
    }

    // =========================================================================
    // Rules
    // =========================================================================

    /// List a user's rules in a panel scope (global rules plus rules scoped
    /// to the given panel), ordered by priority then creation time.
    ///
    /// Includes inactive rules; this is the administrative listing.
    pub fn list_rules(&self, user_id: i64, panel_id: Option<i64>) -> Result<Vec<GuaranteeRule>> {
        self.query_rules(user_id, panel_id, false)
    }

    /// Active rules in a panel scope, in evaluation order.
    pub fn active_rules(&self, user_id: i64, panel_id: Option<i64>) -> Result<Vec<GuaranteeRule>> {
        self.query_rules(user_id, panel_id, true)
    }

    fn query_rules(
        &self,
        user_id: i64,
        panel_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<GuaranteeRule>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT id, user_id, panel_id, keyword, action, days, is_lifetime,
                    priority, is_active, created_at
             FROM guarantee_rules
             WHERE user_id = ?1 AND (panel_id IS NULL OR panel_id = ?2){}
             ORDER BY priority ASC, created_at ASC, id ASC",
            if active_only { " AND is_active = 1" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, panel_id], decode_rule_row)?;

        let mut rules = Vec::new();
        for row in rows {
            rules.push(row??);
        }
        Ok(rules)
    }

    /// Create a rule owned by `user_id`.
    pub fn create_rule(&self, user_id: i64, rule: &NewRule) -> Result<GuaranteeRule> {
        ensure_user(user_id)?;
        rule.validate()?;
        let conn = self.conn()?;
        let id = Self::insert_rule(&conn, user_id, rule, now_ms())?;
        Self::select_rule(&conn, user_id, id)?
            .ok_or_else(|| StorageError::NotFound("rule").into())
    }

    /// Apply a partial update to a rule.
    ///
    /// A rule id not owned by `user_id` surfaces as not-found.
    pub fn update_rule(&self, user_id: i64, rule_id: i64, patch: &RulePatch) -> Result<GuaranteeRule> {
        let conn = self.conn()?;
        let current = Self::select_rule(&conn, user_id, rule_id)?
            .ok_or(StorageError::NotFound("rule"))?;

        let merged = NewRule {
            panel_id: current.panel_id,
            keyword: patch.keyword.clone().unwrap_or(current.keyword),
            action: patch.action.unwrap_or(current.action),
            priority: patch.priority.unwrap_or(current.priority),
            is_active: patch.is_active.unwrap_or(current.is_active),
        };
        merged.validate()?;

        let (days, is_lifetime) = encode_action(merged.action);
        let updated = conn.execute(
            "UPDATE guarantee_rules
             SET keyword = ?3, action = ?4, days = ?5, is_lifetime = ?6,
                 priority = ?7, is_active = ?8
             WHERE id = ?1 AND user_id = ?2",
            params![
                rule_id,
                user_id,
                merged.keyword,
                merged.action.kind(),
                days,
                is_lifetime,
                merged.priority,
                merged.is_active,
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound("rule").into());
        }
        Self::select_rule(&conn, user_id, rule_id)?
            .ok_or_else(|| StorageError::NotFound("rule").into())
    }

    /// Delete a rule. Not-found covers both missing and foreign rules.
    pub fn delete_rule(&self, user_id: i64, rule_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM guarantee_rules WHERE id = ?1 AND user_id = ?2",
            params![rule_id, user_id],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound("rule").into());
        }
        Ok(())
    }

    /// Insert the seed set iff the user has no rules, atomically.
    ///
    /// The count-then-insert runs inside one immediate transaction, so two
    /// concurrent first-time callers serialize and only one seeds.
    pub fn seed_rules_if_empty(&self, user_id: i64, seeds: &[NewRule]) -> Result<usize> {
        ensure_user(user_id)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM guarantee_rules WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(0);
        }

        let now = now_ms();
        for (idx, seed) in seeds.iter().enumerate() {
            seed.validate()?;
            // Stagger created_at so the seeded order is the tie-break order.
            Self::insert_rule(&tx, user_id, seed, now + idx as i64)?;
        }
        tx.commit()?;
        Ok(seeds.len())
    }

    fn insert_rule(
        conn: &Connection,
        user_id: i64,
        rule: &NewRule,
        created_at: i64,
    ) -> Result<i64> {
        let (days, is_lifetime) = encode_action(rule.action);
        conn.execute(
            "INSERT INTO guarantee_rules
                 (user_id, panel_id, keyword, action, days, is_lifetime,
                  priority, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                rule.panel_id,
                rule.keyword.trim(),
                rule.action.kind(),
                days,
                is_lifetime,
                rule.priority,
                rule.is_active,
                created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn select_rule(conn: &Connection, user_id: i64, rule_id: i64) -> Result<Option<GuaranteeRule>> {
        conn.query_row(
            "SELECT id, user_id, panel_id, keyword, action, days, is_lifetime,
                    priority, is_active, created_at
             FROM guarantee_rules WHERE id = ?1 AND user_id = ?2",
            params![rule_id, user_id],
            decode_rule_row,
        )
        .optional()?
        .transpose()
    }
}

type RawRuleRow = (
    i64,
    i64,
    Option<i64>,
    String,
    String,
    Option<u32>,
    bool,
    i64,
    bool,
    i64,
);

fn decode_rule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<GuaranteeRule>> {
    let raw: RawRuleRow = (
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    );
    Ok(decode_rule(raw))
}

fn decode_rule(raw: RawRuleRow) -> Result<GuaranteeRule> {
    let (id, user_id, panel_id, keyword, action, days, is_lifetime, priority, is_active, created) =
        raw;

    // Decode enforces the action/duration invariant at the storage boundary.
    let action = match action.as_str() {
        "no_guarantee" => {
            if days.is_some() || is_lifetime {
                return Err(ValidationError::NoGuaranteeWithDuration.into());
            }
            RuleAction::NoGuarantee
        }
        "guarantee" => {
            if is_lifetime {
                RuleAction::Guarantee(GuaranteeDuration::Lifetime)
            } else {
                let days = days.ok_or(ValidationError::GuaranteeWithoutDuration)?;
                RuleAction::Guarantee(GuaranteeDuration::Days(days))
            }
        }
        other => {
            return Err(StorageError::Database(format!("bad rule action '{other}'")).into());
        }
    };

    let created_at = Utc
        .timestamp_millis_opt(created)
        .single()
        .ok_or_else(|| StorageError::Database(format!("bad created_at {created}")))?;

    Ok(GuaranteeRule {
        id,
        user_id,
        panel_id,
        keyword,
        action,
        priority,
        is_active,
        created_at,
    })
}

fn encode_action(action: RuleAction) -> (Option<u32>, bool) {
    match action {
        RuleAction::NoGuarantee => (None, false),
        RuleAction::Guarantee(GuaranteeDuration::Days(d)) => (Some(d), false),
        RuleAction::Guarantee(GuaranteeDuration::Lifetime) => (None, true),
    }
}

fn encode_list(list: &[String]) -> Result<String> {
    serde_json::to_string(list)
        .map_err(|e| StorageError::Database(format!("failed to encode list: {e}")).into())
}

fn decode_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Database(format!("failed to decode list: {e}")).into())
}
