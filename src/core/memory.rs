//! In-memory [`Backend`] for tests and offline planning
//!
//! Chains are plain vectors of rule text keyed by `(table, chain)`. `check`
//! is exact string equality against the stored text, which is the same
//! comparison iptables performs after parsing.

use crate::core::backend::Backend;
use crate::core::error::{Error, Result};
use crate::core::iptables::identity_comment;
use crate::core::rule::ExistingRule;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Failures {
    check: Option<String>,
    list: Option<String>,
    insert: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    chains: Mutex<HashMap<(String, String), Vec<String>>>,
    failures: Mutex<Failures>,
    query_calls: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose `table`/`chain` already holds `rules`, in order
    pub fn with_rules<S: Into<String>>(
        table: &str,
        chain: &str,
        rules: impl IntoIterator<Item = S>,
    ) -> Self {
        let backend = Self::new();
        backend.lock_chains().insert(
            (table.to_string(), chain.to_string()),
            rules.into_iter().map(Into::into).collect(),
        );
        backend
    }

    /// Current contents of `table`/`chain`
    pub fn rules(&self, table: &str, chain: &str) -> Vec<String> {
        self.lock_chains()
            .get(&(table.to_string(), chain.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Identity comments of `table`/`chain` in chain order, skipping unmanaged rules
    pub fn managed_names(&self, table: &str, chain: &str) -> Vec<String> {
        self.rules(table, chain)
            .iter()
            .filter_map(|text| identity_comment(text))
            .collect()
    }

    pub fn fail_checks_with(&self, message: impl Into<String>) {
        self.lock_failures().check = Some(message.into());
    }

    pub fn fail_listing_with(&self, message: impl Into<String>) {
        self.lock_failures().list = Some(message.into());
    }

    pub fn fail_inserts_with(&self, message: impl Into<String>) {
        self.lock_failures().insert = Some(message.into());
    }

    /// Number of `check` and `list_rules` calls made so far
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::Relaxed)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::Relaxed)
    }

    fn lock_chains(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Vec<String>>> {
        // A panic while holding the lock leaves plain data behind; keep using it
        self.chains.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    fn check(&self, table: &str, chain: &str, rule_text: &str) -> Result<bool> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = self.lock_failures().check.clone() {
            return Err(Error::BackendQuery {
                message,
                exit_code: Some(2),
            });
        }

        Ok(self.rules(table, chain).iter().any(|r| r == rule_text))
    }

    fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<ExistingRule>> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = self.lock_failures().list.clone() {
            return Err(Error::BackendQuery {
                message,
                exit_code: Some(3),
            });
        }

        Ok(self
            .rules(table, chain)
            .into_iter()
            .enumerate()
            .map(|(idx, text)| ExistingRule {
                position: idx + 1,
                identity_comment: identity_comment(&text),
                raw_text: text,
            })
            .collect())
    }

    fn insert(&self, table: &str, chain: &str, rulenum: usize, rule_text: &str) -> Result<()> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = self.lock_failures().insert.clone() {
            return Err(Error::BackendMutation {
                message,
                exit_code: Some(1),
            });
        }

        let mut chains = self.lock_chains();
        let rules = chains
            .entry((table.to_string(), chain.to_string()))
            .or_default();

        if rulenum == 0 || rulenum > rules.len() + 1 {
            return Err(Error::BackendMutation {
                message: "iptables: Index of insertion too big.".to_string(),
                exit_code: Some(1),
            });
        }

        rules.insert(rulenum - 1, rule_text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_at_position() {
        let backend = MemoryBackend::with_rules("filter", "INPUT", ["a", "c"]);
        backend.insert("filter", "INPUT", 2, "b").unwrap();
        assert_eq!(backend.rules("filter", "INPUT"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_insert_past_end_rejected() {
        let backend = MemoryBackend::new();
        let err = backend.insert("filter", "INPUT", 2, "x").unwrap_err();
        assert!(err.to_string().contains("too big"));
        assert!(backend.rules("filter", "INPUT").is_empty());
    }

    #[test]
    fn test_chains_are_independent() {
        let backend = MemoryBackend::new();
        backend.insert("filter", "INPUT", 1, "x").unwrap();
        assert!(backend.check("filter", "INPUT", "x").unwrap());
        assert!(!backend.check("filter", "OUTPUT", "x").unwrap());
        assert!(!backend.check("nat", "INPUT", "x").unwrap());
    }

    #[test]
    fn test_listing_extracts_comments() {
        let backend = MemoryBackend::with_rules(
            "filter",
            "INPUT",
            [
                "-i 'lo' -j 'ACCEPT'",
                "-m comment --comment 'ssh' -j 'ACCEPT'",
            ],
        );

        let rules = backend.list_rules("filter", "INPUT").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].identity_comment, None);
        assert_eq!(rules[1].identity_comment.as_deref(), Some("ssh"));
        assert_eq!(rules[1].position, 2);
        assert_eq!(backend.managed_names("filter", "INPUT"), vec!["ssh"]);
    }

    #[test]
    fn test_injected_failures() {
        let backend = MemoryBackend::new();
        backend.fail_checks_with("boom");
        assert!(matches!(
            backend.check("filter", "INPUT", "x"),
            Err(Error::BackendQuery { .. })
        ));

        backend.fail_inserts_with("nope");
        assert!(matches!(
            backend.insert("filter", "INPUT", 1, "x"),
            Err(Error::BackendMutation { .. })
        ));
        assert_eq!(backend.query_calls(), 1);
        assert_eq!(backend.insert_calls(), 1);
    }
}
