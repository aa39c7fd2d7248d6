//! Declaration files
//!
//! A declaration file is a JSON object mapping rule names to their fields:
//!
//! ```json
//! {
//!   "httpd": { "jump": "ACCEPT", "proto": "tcp", "dport": 80, "connstate": "NEW" },
//!   "ssh":   { "firewall.managed": [ { "action": "ACCEPT" }, { "dports": 22 } ] }
//! }
//! ```
//!
//! The second form is the state-file shape, where a single `<module>.managed`
//! key holds a list of one-entry objects. Both forms may be mixed. Bookkeeping
//! keys the configuration engine adds (`require`, `watch`, `order`, ...) are
//! dropped before the fields are parsed. Declarations keep the file's order.

use crate::core::error::{Error, Result};
use crate::core::rule::{DEFAULT_CHAIN, DEFAULT_TABLE, RuleSpec};
use serde_json::{Map, Value};
use std::path::Path;

/// Keys owned by the surrounding configuration engine, not by the rule
pub const ORCHESTRATOR_KEYS: [&str; 12] = [
    "__id__",
    "fun",
    "state",
    "__env__",
    "__sls__",
    "order",
    "watch",
    "watch_in",
    "require",
    "require_in",
    "prereq",
    "prereq_in",
];

/// Table and chain applied to declarations that do not name their own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationDefaults {
    pub table: String,
    pub chain: String,
}

impl Default for DeclarationDefaults {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            chain: DEFAULT_CHAIN.to_string(),
        }
    }
}

/// Parses a declaration document.
///
/// # Errors
///
/// Returns [`Error::Serialization`] for malformed JSON and [`Error::InvalidSpec`]
/// for a document or declaration with the wrong shape or unknown fields.
pub fn parse_declarations(json: &str, defaults: &DeclarationDefaults) -> Result<Vec<RuleSpec>> {
    let document: Value = serde_json::from_str(json)?;
    let Value::Object(entries) = document else {
        return Err(Error::invalid_spec(
            "declarations",
            "expected an object mapping rule names to rule fields",
        ));
    };

    entries
        .into_iter()
        .map(|(key, fields)| parse_declaration(&key, fields, defaults))
        .collect()
}

/// Reads and parses a declaration file
///
/// # Errors
///
/// See [`parse_declarations`]; I/O failures are returned as [`Error::Io`].
pub async fn load_declarations(
    path: &Path,
    defaults: &DeclarationDefaults,
) -> Result<Vec<RuleSpec>> {
    let json = tokio::fs::read_to_string(path).await?;
    parse_declarations(&json, defaults)
}

fn parse_declaration(key: &str, fields: Value, defaults: &DeclarationDefaults) -> Result<RuleSpec> {
    let Value::Object(fields) = fields else {
        return Err(Error::invalid_spec(key, "declaration must be an object"));
    };

    let mut fields = flatten_state_call(key, fields)?;
    for orchestrator_key in ORCHESTRATOR_KEYS {
        fields.remove(orchestrator_key);
    }
    if !fields.contains_key("name") {
        fields.insert("name".to_string(), Value::String(key.to_string()));
    }

    let mut spec: RuleSpec = serde_json::from_value(Value::Object(fields))
        .map_err(|e| Error::invalid_spec(key, e.to_string()))?;

    if spec.table.is_none() {
        spec.table = Some(defaults.table.clone());
    }
    if spec.chain.is_none() {
        spec.chain = Some(defaults.chain.clone());
    }
    Ok(spec)
}

/// Turns `{"firewall.managed": [{"a": 1}, {"b": 2}]}` into `{"a": 1, "b": 2}`.
///
/// Objects without a `*.managed` key are returned unchanged.
fn flatten_state_call(key: &str, fields: Map<String, Value>) -> Result<Map<String, Value>> {
    let is_state_call = fields.len() == 1 && fields.keys().all(|k| k.ends_with(".managed"));
    if !is_state_call {
        return Ok(fields);
    }

    let Some((_, Value::Array(items))) = fields.into_iter().next() else {
        return Err(Error::invalid_spec(key, "state call arguments must be a list"));
    };

    let mut flat = Map::new();
    for item in items {
        match item {
            Value::Object(entry) => flat.extend(entry),
            // Bare strings in the list are requisite-style markers; they carry no field
            Value::String(_) => {}
            other => {
                return Err(Error::invalid_spec(
                    key,
                    format!("unexpected state call argument {other}"),
                ));
            }
        }
    }
    Ok(flat)
}
