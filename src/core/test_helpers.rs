//! Shared test utilities for core module tests
//!
//! This module is only compiled in test mode.

use crate::core::args::build_rule_text;
use crate::core::rule::RuleSpec;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("FWRULE_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("FWRULE_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// The web server rule used throughout the scenario tests
pub fn httpd_spec() -> RuleSpec {
    RuleSpec::new("httpd", "accept")
        .protocol("tcp")
        .dports(80)
        .conn_state("NEW")
}

/// A minimal managed rule named `name`
pub fn named_spec(name: &str) -> RuleSpec {
    RuleSpec::new(name, "ACCEPT")
}

/// Rule text as fwrule would write it for a minimal managed rule named `name`
pub fn managed_rule_text(name: &str) -> String {
    build_rule_text(&named_spec(name)).unwrap()
}

/// Rule text of a rule fwrule did not create
pub fn unmanaged_rule_text(port: u16) -> String {
    format!("-p tcp -m tcp --dport {port} -j ACCEPT")
}
