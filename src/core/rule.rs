//! Rule declarations and their normalized field values
//!
//! A [`RuleSpec`] is what a user declares: a unique name, a table and chain, a
//! target and a handful of optional match clauses. Clause values arrive loosely
//! typed (a port may be `80`, `"80"` or `["80", "443"]`), so every value is
//! normalized once into a [`FieldValue`] before any token is emitted.
//!
//! # Negation
//!
//! A leading `!` on a value means "match anything except this". It is parsed into
//! the `negated` flag of [`FieldValue`] at normalization time and never inspected
//! again downstream.
//!
//! # Example
//!
//! ```
//! use fwrule::core::rule::RuleSpec;
//!
//! let spec = RuleSpec::new("httpd", "accept")
//!     .protocol("tcp")
//!     .dports(80)
//!     .conn_state(vec!["NEW"]);
//! assert_eq!(spec.table(), "filter");
//! assert_eq!(spec.chain(), "INPUT");
//! ```

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Table used when a declaration does not name one
pub const DEFAULT_TABLE: &str = "filter";

/// Chain used when a declaration does not name one
pub const DEFAULT_CHAIN: &str = "INPUT";

/// Marker that negates a match value
pub const NEGATION_MARKER: char = '!';

/// A clause value as written in a declaration, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Flag(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<serde_json::Value>),
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

macro_rules! raw_number_from {
    ($($int:ty),*) => {
        $(
            impl From<$int> for RawValue {
                fn from(value: $int) -> Self {
                    Self::Number(value.into())
                }
            }
        )*
    };
}

// i32 included so bare literals (`.dports(80)`) infer
raw_number_from!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl<T: Into<serde_json::Value>> From<Vec<T>> for RawValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A declared firewall rule.
///
/// `name` is the rule's identity: it is written into the rule as a comment,
/// used to detect the rule later, and used to order managed rules within a chain.
/// It must be unique per table and chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, alias = "jump", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, alias = "proto", skip_serializing_if = "Option::is_none")]
    pub protocol: Option<RawValue>,
    #[serde(default, alias = "port", skip_serializing_if = "Option::is_none")]
    pub ports: Option<RawValue>,
    #[serde(default, alias = "dport", skip_serializing_if = "Option::is_none")]
    pub dports: Option<RawValue>,
    #[serde(default, alias = "in_interface", skip_serializing_if = "Option::is_none")]
    pub in_interface: Option<RawValue>,
    #[serde(
        default,
        alias = "connstate",
        alias = "conn_state",
        skip_serializing_if = "Option::is_none"
    )]
    pub conn_state: Option<RawValue>,
    #[serde(default, alias = "reject_with", skip_serializing_if = "Option::is_none")]
    pub reject_with: Option<RawValue>,
}

impl RuleSpec {
    /// Creates a spec with only the required fields set
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            chain: None,
            action: Some(action.into()),
            protocol: None,
            ports: None,
            dports: None,
            in_interface: None,
            conn_state: None,
            reject_with: None,
        }
    }

    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(DEFAULT_TABLE)
    }

    pub fn chain(&self) -> &str {
        self.chain.as_deref().unwrap_or(DEFAULT_CHAIN)
    }

    pub fn in_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn in_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }

    pub fn protocol(mut self, value: impl Into<RawValue>) -> Self {
        self.protocol = Some(value.into());
        self
    }

    pub fn ports(mut self, value: impl Into<RawValue>) -> Self {
        self.ports = Some(value.into());
        self
    }

    pub fn dports(mut self, value: impl Into<RawValue>) -> Self {
        self.dports = Some(value.into());
        self
    }

    pub fn in_interface(mut self, value: impl Into<RawValue>) -> Self {
        self.in_interface = Some(value.into());
        self
    }

    pub fn conn_state(mut self, value: impl Into<RawValue>) -> Self {
        self.conn_state = Some(value.into());
        self
    }

    pub fn reject_with(mut self, value: impl Into<RawValue>) -> Self {
        self.reject_with = Some(value.into());
        self
    }
}

/// A clause value after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Absent,
    Flag(bool),
    Scalar { value: String, negated: bool },
    List { values: Vec<String>, negated: bool },
}

impl FieldValue {
    /// Normalizes a raw declaration value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for empty values, empty lists, list items that
    /// are not strings or numbers, a negation marker on any list item but the first,
    /// and values containing quotes or control characters.
    ///
    /// A `!` on a later list item (`["80", "!443"]`) is rejected rather than
    /// passed through as `'80,!443'`: iptables can only negate a whole clause.
    pub fn normalize(field: &str, raw: Option<&RawValue>) -> Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::Absent);
        };

        match raw {
            RawValue::Flag(flag) => Ok(Self::Flag(*flag)),
            RawValue::Number(number) => Ok(Self::Scalar {
                value: number.to_string(),
                negated: false,
            }),
            RawValue::Text(text) => {
                let (value, negated) = split_negation(text);
                check_value(field, value)?;
                Ok(Self::Scalar {
                    value: value.to_string(),
                    negated,
                })
            }
            RawValue::List(items) => {
                if items.is_empty() {
                    return Err(Error::invalid_spec(field, "list must not be empty"));
                }

                let mut values = Vec::with_capacity(items.len());
                let mut negated = false;
                for (idx, item) in items.iter().enumerate() {
                    let text = match item {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Number(n) => n.to_string(),
                        other => {
                            return Err(Error::invalid_spec(
                                field,
                                format!("list item {other} is not a string or number"),
                            ));
                        }
                    };

                    let (value, item_negated) = split_negation(&text);
                    if item_negated {
                        if idx > 0 {
                            return Err(Error::invalid_spec(
                                field,
                                "negation is only allowed on the first list item",
                            ));
                        }
                        negated = true;
                    }
                    check_value(field, value)?;
                    values.push(value.to_string());
                }

                Ok(Self::List { values, negated })
            }
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

/// Strips a leading negation marker, reporting whether one was present
pub fn split_negation(text: &str) -> (&str, bool) {
    match text.strip_prefix(NEGATION_MARKER) {
        Some(rest) => (rest, true),
        None => (text, false),
    }
}

fn check_value(field: &str, value: &str) -> Result<()> {
    crate::validators::validate_value(value).map_err(|message| Error::invalid_spec(field, message))
}

/// A rule read back from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRule {
    /// 1-based position within its chain
    pub position: usize,
    /// Comment carried by the rule; `None` for rules this tool did not create
    pub identity_comment: Option<String>,
    pub raw_text: String,
}

impl ExistingRule {
    pub fn new(position: usize, identity_comment: Option<&str>, raw_text: impl Into<String>) -> Self {
        Self {
            position,
            identity_comment: identity_comment.map(String::from),
            raw_text: raw_text.into(),
        }
    }
}
