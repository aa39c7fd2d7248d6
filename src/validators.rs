//! Input validation for rule declarations
//!
//! Every value ends up inside single quotes in the canonical rule text and is
//! later split back into arguments, so a value containing a quote or a control
//! character would change the meaning of the rule. These checks run during
//! normalization, before any backend call.

/// Longest comment iptables accepts (`XT_MAX_COMMENT_LEN - 1`)
pub const MAX_NAME_LEN: usize = 256;

/// Longest chain name iptables accepts (`XT_EXTENSION_MAXNAMELEN - 1`)
pub const MAX_CHAIN_LEN: usize = 28;

/// Tables known to iptables
pub const TABLES: [&str; 5] = ["filter", "nat", "mangle", "raw", "security"];

/// Validates a value that will be emitted inside single quotes.
///
/// # Errors
///
/// Returns `Err` if the value is empty or contains quotes, a backslash or
/// control characters.
///
/// # Examples
///
/// ```
/// use fwrule::validators::validate_value;
///
/// assert!(validate_value("1024:65535").is_ok());
/// assert!(validate_value("tcp' -j DROP").is_err());
/// ```
pub fn validate_value(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("value must not be empty".to_string());
    }

    if let Some(c) = value
        .chars()
        .find(|c| c.is_control() || matches!(c, '\'' | '"' | '\\'))
    {
        return Err(format!("value {value:?} contains forbidden character {c:?}"));
    }

    Ok(())
}

/// Validates a rule name, which becomes the rule's comment.
///
/// The name is used verbatim, so it follows the value rules and must also fit
/// within the iptables comment limit.
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long, or contains forbidden characters.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("rule name must not be empty".to_string());
    }

    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "rule name too long ({} bytes, max {MAX_NAME_LEN})",
            name.len()
        ));
    }

    validate_value(name)
}

/// Validates a table name.
///
/// # Errors
///
/// Returns `Err` if `table` is not one of [`TABLES`].
pub fn validate_table(table: &str) -> Result<(), String> {
    if TABLES.contains(&table) {
        Ok(())
    } else {
        Err(format!(
            "unknown table {table:?} (expected one of: {})",
            TABLES.join(", ")
        ))
    }
}

/// Validates a chain name.
///
/// # Errors
///
/// Returns `Err` if the chain is empty, too long, starts with `-` or `!`, or
/// contains whitespace, quotes or control characters.
pub fn validate_chain(chain: &str) -> Result<(), String> {
    if chain.is_empty() {
        return Err("chain name must not be empty".to_string());
    }

    if chain.len() > MAX_CHAIN_LEN {
        return Err(format!("chain name too long (max {MAX_CHAIN_LEN} characters)"));
    }

    if chain.starts_with(['-', '!']) {
        return Err("chain name must not start with '-' or '!'".to_string());
    }

    if chain
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '\'' | '"' | '\\'))
    {
        return Err("chain name contains invalid characters".to_string());
    }

    Ok(())
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// A trailing `+` is the iptables wildcard (`eth+` matches every `eth*`).
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<(), String> {
    let base = name.strip_suffix('+').unwrap_or(name);

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(())
}
