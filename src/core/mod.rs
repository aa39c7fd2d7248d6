//! Core rule reconciliation
//!
//! This module contains the types and logic for keeping named iptables rules
//! present and ordered. It provides:
//!
//! - [`rule`]: Rule declarations and normalized clause values
//! - [`args`]: Canonical rule text, the rule's stable identity
//! - [`ordering`]: Insert position among managed rules
//! - [`reconcile`]: The check / dry-run / apply driver
//! - [`backend`]: The seam between the driver and the firewall
//! - [`iptables`]: Backend driving the `iptables` binary
//! - [`memory`]: In-memory backend for tests and offline planning
//! - [`declarations`]: Declaration file loading
//! - [`error`]: Error types and iptables error translation

pub mod args;
pub mod backend;
pub mod declarations;
pub mod error;
pub mod iptables;
pub mod memory;
pub mod ordering;
pub mod reconcile;
pub mod rule;

#[cfg(test)]
pub mod test_helpers;
