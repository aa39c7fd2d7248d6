//! fwrule - declarative iptables rules
//!
//! Keeps named iptables rules present in their chains. Each rule carries its
//! name as a comment, which identifies it on later runs and orders managed
//! rules by name. Existing rules are never modified or removed.
//!
//! # Architecture
//!
//! - [`core`] - Rule building, ordering, reconciliation and the iptables backend
//! - [`audit`] - Audit logging for every rule insert
//! - [`validators`] - Input validation for values that end up in rule text
//! - [`config`] - Configuration persistence
//! - [`elevation`] - Privilege elevation for iptables invocations
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Example
//!
//! ```
//! use fwrule::{MemoryBackend, Outcome, ReconcileOptions, RuleSpec, reconcile};
//!
//! let backend = MemoryBackend::new();
//! let spec = RuleSpec::new("httpd", "ACCEPT").protocol("tcp").dports(80);
//!
//! let first = reconcile(&spec, &backend, &ReconcileOptions::default()).unwrap();
//! assert_eq!(first.outcome, Outcome::Applied);
//!
//! let second = reconcile(&spec, &backend, &ReconcileOptions::default()).unwrap();
//! assert_eq!(second.outcome, Outcome::NoOp);
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use crate::core::args::build_rule_text;
pub use crate::core::backend::Backend;
pub use crate::core::error::{Error, Result};
pub use crate::core::iptables::IptablesBackend;
pub use crate::core::memory::MemoryBackend;
pub use crate::core::ordering::resolve_rulenum;
pub use crate::core::reconcile::{Outcome, ReconcileOptions, ReconcileResult, reconcile};
pub use crate::core::rule::{ExistingRule, RuleSpec};
