//! The firewall backend seam
//!
//! Reconciliation only ever talks to the firewall through [`Backend`]. The
//! production implementation is [`IptablesBackend`](crate::core::iptables::IptablesBackend);
//! tests use [`MemoryBackend`](crate::core::memory::MemoryBackend).
//!
//! Implementations own any locking needed between `list_rules` and `insert`.
//! The caller does not serialize access to a chain.

use crate::core::error::Result;
use crate::core::rule::ExistingRule;

pub trait Backend: Send + Sync {
    /// Reports whether `rule_text` is already present in `table`/`chain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendQuery`](crate::Error::BackendQuery) if the chain
    /// cannot be inspected.
    fn check(&self, table: &str, chain: &str, rule_text: &str) -> Result<bool>;

    /// Lists the rules of `table`/`chain` in chain order, positions starting at 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendQuery`](crate::Error::BackendQuery) if the chain
    /// cannot be listed.
    fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<ExistingRule>>;

    /// Inserts `rule_text` at 1-based position `rulenum`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendMutation`](crate::Error::BackendMutation) if the
    /// rule was not inserted.
    fn insert(&self, table: &str, chain: &str, rulenum: usize, rule_text: &str) -> Result<()>;
}
