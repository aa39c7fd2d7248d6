//! Insertion position for managed rules
//!
//! Managed rules (those carrying an identity comment) are kept in ascending
//! order of their names. A new rule goes directly after the last managed rule
//! whose name sorts before it; rules without a comment are ignored for the
//! comparison but still count towards positions.

use crate::core::rule::ExistingRule;

/// Returns the 1-based rule number at which `name` should be inserted.
///
/// Names compare byte-wise. Duplicate names in `existing` are not detected.
pub fn resolve_rulenum(name: &str, existing: &[ExistingRule]) -> usize {
    let mut rulenum = 1;
    for rule in existing {
        if let Some(comment) = rule.identity_comment.as_deref()
            && comment < name
        {
            rulenum = rule.position + 1;
        }
    }
    rulenum
}
