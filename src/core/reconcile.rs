//! Check / dry-run / apply reconciliation of a single declared rule
//!
//! One pass per call:
//!
//! ```text
//! build ─▶ check ─┬─ present ─────────────────────────────▶ NoOp
//!                 └─ absent ─▶ list ─▶ resolve ─┬─ dry run ─▶ WouldApply
//!                                               └─ insert ──▶ Applied | Failed
//! ```
//!
//! Only `insert` mutates the backend. Nothing is retried.

use crate::core::args::build_rule_text;
use crate::core::backend::Backend;
use crate::core::error::Result;
use crate::core::ordering::resolve_rulenum;
use crate::core::rule::RuleSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Key under which an applied rule's identity is recorded in `changes`
pub const CHANGE_KEY: &str = "rule";

/// How a reconciliation pass ended
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Rule already present, nothing done
    #[strum(serialize = "unchanged")]
    NoOp,
    /// Dry run: the rule would have been inserted
    #[strum(serialize = "would apply")]
    WouldApply,
    #[strum(serialize = "applied")]
    Applied,
    #[strum(serialize = "failed")]
    Failed,
}

/// Caller-controlled reconciliation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Report what would change without inserting anything
    pub dry_run: bool,
}

impl ReconcileOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// Result of reconciling one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub name: String,
    pub changes: BTreeMap<String, String>,
    pub outcome: Outcome,
    /// `None` while the change is only pending (dry run)
    pub success: Option<bool>,
    pub message: String,
    pub rule_text: String,
    pub rulenum: Option<usize>,
}

impl ReconcileResult {
    fn no_op(name: &str, rule_text: String) -> Self {
        Self {
            name: name.to_string(),
            changes: BTreeMap::new(),
            outcome: Outcome::NoOp,
            success: Some(true),
            message: format!("iptables rule for '{name}' already set ({rule_text})"),
            rule_text,
            rulenum: None,
        }
    }

    fn would_apply(name: &str, rule_text: String, rulenum: usize) -> Self {
        Self {
            name: name.to_string(),
            changes: BTreeMap::new(),
            outcome: Outcome::WouldApply,
            success: None,
            message: format!(
                "iptables rule for '{name}' needs to be set as rulenum {rulenum} ({rule_text})"
            ),
            rule_text,
            rulenum: Some(rulenum),
        }
    }

    fn applied(name: &str, rule_text: String, rulenum: usize) -> Self {
        Self {
            name: name.to_string(),
            changes: BTreeMap::from([(CHANGE_KEY.to_string(), name.to_string())]),
            outcome: Outcome::Applied,
            success: Some(true),
            message: format!("Set iptables rule for '{name}' as rulenum {rulenum}: {rule_text}"),
            rule_text,
            rulenum: Some(rulenum),
        }
    }

    fn failed(name: &str, rule_text: String, rulenum: Option<usize>, message: String) -> Self {
        Self {
            name: name.to_string(),
            changes: BTreeMap::new(),
            outcome: Outcome::Failed,
            success: Some(false),
            message,
            rule_text,
            rulenum,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// Ensures the rule declared by `spec` exists in its table and chain.
///
/// Backend query and insert failures are reported as [`Outcome::Failed`]
/// results rather than errors, so a caller working through several
/// declarations can carry on with the next one.
///
/// # Errors
///
/// Returns [`Error::InvalidSpec`](crate::Error::InvalidSpec) if `spec` cannot
/// be turned into rule text. No backend call is made in that case.
pub fn reconcile<B: Backend + ?Sized>(
    spec: &RuleSpec,
    backend: &B,
    options: &ReconcileOptions,
) -> Result<ReconcileResult> {
    let name = spec.name.as_str();
    let (table, chain) = (spec.table(), spec.chain());

    let rule_text = build_rule_text(spec)?;
    debug!(rule = name, table, chain, %rule_text, "Built rule text");

    match backend.check(table, chain, &rule_text) {
        Ok(true) => {
            debug!(rule = name, "Rule already present");
            return Ok(ReconcileResult::no_op(name, rule_text));
        }
        Ok(false) => {}
        Err(e) => {
            warn!(rule = name, "Presence check failed: {e}");
            let message = format!(
                "Failed to check iptables rule for '{name}' in {table}/{chain} ({})",
                e.backend_message()
            );
            return Ok(ReconcileResult::failed(name, rule_text, None, message));
        }
    }

    let existing = match backend.list_rules(table, chain) {
        Ok(existing) => existing,
        Err(e) => {
            warn!(rule = name, "Listing {table}/{chain} failed: {e}");
            let message = format!(
                "Failed to list iptables rules for '{name}' in {table}/{chain} ({})",
                e.backend_message()
            );
            return Ok(ReconcileResult::failed(name, rule_text, None, message));
        }
    };

    let rulenum = resolve_rulenum(name, &existing);
    debug!(rule = name, rulenum, existing = existing.len(), "Resolved insert position");

    if options.dry_run {
        info!(rule = name, rulenum, "Dry run, rule would be inserted");
        return Ok(ReconcileResult::would_apply(name, rule_text, rulenum));
    }

    match backend.insert(table, chain, rulenum, &rule_text) {
        Ok(()) => {
            info!(rule = name, table, chain, rulenum, "Inserted rule");
            Ok(ReconcileResult::applied(name, rule_text, rulenum))
        }
        Err(e) => {
            warn!(rule = name, rulenum, "Insert failed: {e}");
            let message = format!(
                "Failed to set iptables rule for '{name}' ({})",
                e.backend_message()
            );
            Ok(ReconcileResult::failed(name, rule_text, Some(rulenum), message))
        }
    }
}
