//! Canonical rule text generation
//!
//! Turns a [`RuleSpec`] into the exact token sequence handed to iptables. The
//! output is used verbatim for `iptables -C` presence checks, so it has to be
//! byte-for-byte stable: clauses are always emitted in the same order and every
//! value is wrapped in single quotes.
//!
//! Clause order:
//!
//! 1. `-p` protocol
//! 2. `-m multiport` followed by `--ports` then `--dports`
//! 3. `-m comment --comment` carrying the rule name (always present)
//! 4. `--in-interface`
//! 5. `-m state --state`
//! 6. `-j` target, upper-cased
//! 7. `--reject-with`

use crate::core::error::{Error, Result};
use crate::core::rule::{FieldValue, RawValue, RuleSpec, split_negation};

/// A [`RuleSpec`] with every field normalized, ready for emission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRule {
    pub name: String,
    pub protocol: FieldValue,
    pub ports: FieldValue,
    pub dports: FieldValue,
    pub in_interface: FieldValue,
    pub conn_state: FieldValue,
    pub action: FieldValue,
    pub reject_with: FieldValue,
}

impl CanonicalRule {
    /// Normalizes every field of `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if the action is missing or empty, the name
    /// is unusable as a comment, or any field fails normalization.
    pub fn from_spec(spec: &RuleSpec) -> Result<Self> {
        crate::validators::validate_name(&spec.name)
            .map_err(|message| Error::invalid_spec("name", message))?;
        crate::validators::validate_table(spec.table())
            .map_err(|message| Error::invalid_spec("table", message))?;
        crate::validators::validate_chain(spec.chain())
            .map_err(|message| Error::invalid_spec("chain", message))?;

        let action = match spec.action.as_deref().map(str::trim) {
            Some(action) if !split_negation(action).0.is_empty() => action.to_uppercase(),
            _ => return Err(Error::invalid_spec("action", "an action is required")),
        };
        let action = FieldValue::normalize("action", Some(&RawValue::Text(action)))?;

        let in_interface = FieldValue::normalize("inInterface", spec.in_interface.as_ref())?;
        if let FieldValue::Scalar { value, .. } = &in_interface {
            crate::validators::validate_interface(value)
                .map_err(|message| Error::invalid_spec("inInterface", message))?;
        }

        Ok(Self {
            name: spec.name.clone(),
            protocol: FieldValue::normalize("protocol", spec.protocol.as_ref())?,
            ports: FieldValue::normalize("ports", spec.ports.as_ref())?,
            dports: FieldValue::normalize("dports", spec.dports.as_ref())?,
            in_interface,
            conn_state: FieldValue::normalize("connState", spec.conn_state.as_ref())?,
            action,
            reject_with: FieldValue::normalize("rejectWith", spec.reject_with.as_ref())?,
        })
    }

    /// Emits the canonical token sequence
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(16);

        push_clause(&mut tokens, "-p", &self.protocol);

        if self.ports.is_present() || self.dports.is_present() {
            tokens.extend(["-m".to_string(), "multiport".to_string()]);
            push_clause(&mut tokens, "--ports", &self.ports);
            push_clause(&mut tokens, "--dports", &self.dports);
        }

        tokens.extend(["-m".to_string(), "comment".to_string()]);
        tokens.extend(["--comment".to_string(), quote(&self.name)]);

        push_clause(&mut tokens, "--in-interface", &self.in_interface);

        if self.conn_state.is_present() {
            tokens.extend(["-m".to_string(), "state".to_string()]);
            push_clause(&mut tokens, "--state", &self.conn_state);
        }

        push_clause(&mut tokens, "-j", &self.action);
        push_clause(&mut tokens, "--reject-with", &self.reject_with);

        tokens
    }
}

/// Builds the canonical rule text for `spec`.
///
/// # Errors
///
/// See [`CanonicalRule::from_spec`].
pub fn build_rule_text(spec: &RuleSpec) -> Result<String> {
    Ok(CanonicalRule::from_spec(spec)?.to_tokens().join(" "))
}

fn push_clause(tokens: &mut Vec<String>, flag: &str, value: &FieldValue) {
    match value {
        FieldValue::Absent => {}
        FieldValue::Flag(true) => tokens.push(flag.to_string()),
        FieldValue::Flag(false) => tokens.extend(["!".to_string(), flag.to_string()]),
        FieldValue::Scalar { value, negated } => push_value(tokens, flag, value, *negated),
        FieldValue::List { values, negated } => {
            push_value(tokens, flag, &values.join(","), *negated);
        }
    }
}

fn push_value(tokens: &mut Vec<String>, flag: &str, value: &str, negated: bool) {
    if negated {
        tokens.push("!".to_string());
    }
    tokens.push(flag.to_string());
    tokens.push(quote(value));
}

fn quote(value: &str) -> String {
    format!("'{value}'")
}
