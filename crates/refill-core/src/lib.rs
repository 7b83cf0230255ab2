//! refill-core: Guarantee and refill-eligibility engine for SMM panel orders
//!
//! This crate decides whether a completed order is still inside its refill
//! guarantee window, working only from the free-text service name the panel
//! sold, per-user configuration, and stored keyword rules.
//!
//! # Architecture
//!
//! ```text
//! Order + service name → GuaranteeChecker
//!                             ↓
//!              Rule Engine (stored rules, priority-ordered)
//!                             ↓ (no rule match)
//!              Pattern Extraction (built-ins → keywords → emojis)
//!                             ↓
//!              Expiry Calculator → CheckResult
//! ```
//!
//! # Modules
//!
//! - `check`: Decision orchestrator producing one authoritative `CheckResult`
//! - `rules`: Stored keyword rules, priority matching, default rule seeding
//! - `extract`: Tiered guarantee extraction from untrusted service names
//! - `expiry`: Guarantee duration and window arithmetic
//! - `safe_regex`: ReDoS-screened compilation of user-supplied patterns
//! - `config`: Per-user guarantee configuration and partial updates
//! - `storage`: SQLite persistence for configs and rules
//! - `logging`: Optional tracing subscriber bootstrap for embedders
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod check;
pub mod config;
pub mod error;
pub mod expiry;
pub mod extract;
pub mod logging;
pub mod rules;
pub mod safe_regex;
pub mod storage;

pub use check::{CheckReason, CheckResult, GuaranteeChecker, Order, OrderStatus};
pub use config::{DetectionMethod, GuaranteeConfig, GuaranteeConfigPatch, NoGuaranteeAction};
pub use error::{Error, Result, StorageError, ValidationError};
pub use expiry::GuaranteeDuration;
pub use rules::{Classification, GuaranteeRule, MatchSource, NewRule, RuleAction, RuleEngine};
pub use storage::Store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
