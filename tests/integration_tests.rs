//! Integration tests for fwrule
//!
//! These tests drive the public API end to end: declaration files are loaded
//! from disk and reconciled against the in-memory backend, and against the
//! real `IptablesBackend` running `tests/mock_iptables.sh` in place of iptables.
//!
//! # Running with Mock
//!
//! The mock needs no privileges:
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use fwrule::audit::{AuditEvent, AuditLog, EventType};
use fwrule::core::declarations::{DeclarationDefaults, load_declarations, parse_declarations};
use fwrule::core::error::IptablesErrorPattern;
use fwrule::{
    Backend, Error, IptablesBackend, MemoryBackend, Outcome, ReconcileOptions, RuleSpec,
    build_rule_text, reconcile,
};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, Once};

/// Serializes tests that talk to the mock, which is configured through env vars
static MOCK_LOCK: Mutex<()> = Mutex::new(());
static MOCK_INIT: Once = Once::new();

fn mock_iptables_path() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("mock_iptables.sh");
    path
}

/// A private mock iptables state for the duration of one test
struct MockIptables {
    _guard: MutexGuard<'static, ()>,
    dir: tempfile::TempDir,
}

impl MockIptables {
    fn start() -> Self {
        let guard = MOCK_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        MOCK_INIT.call_once(|| {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    mock_iptables_path(),
                    std::fs::Permissions::from_mode(0o755),
                )
                .unwrap();
            }
            unsafe {
                std::env::set_var("FWRULE_TEST_NO_ELEVATION", "1");
            }
        });

        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("MOCK_IPTABLES_STATE", dir.path().join("state"));
            std::env::remove_var("MOCK_IPTABLES_FAIL");
        }

        Self { _guard: guard, dir }
    }

    fn backend(&self) -> IptablesBackend {
        IptablesBackend::new(mock_iptables_path().to_string_lossy())
    }

    /// Seeds the mock with rules that fwrule did not create
    fn seed(&self, table: &str, chain: &str, rules: &[&str]) {
        let content: String = rules
            .iter()
            .map(|rule| format!("{table} {chain} {rule}\n"))
            .collect();
        std::fs::write(self.dir.path().join("state"), content).unwrap();
    }

    fn fail(&self, operation: &str) {
        unsafe {
            std::env::set_var("MOCK_IPTABLES_FAIL", operation);
        }
    }

    /// Rules of `table`/`chain` in chain order, as stored by the mock
    fn rules(&self, table: &str, chain: &str) -> Vec<String> {
        let prefix = format!("{table} {chain} ");
        std::fs::read_to_string(self.dir.path().join("state"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.strip_prefix(&prefix).map(String::from))
            .collect()
    }
}

impl Drop for MockIptables {
    fn drop(&mut self) {
        unsafe {
            std::env::remove_var("MOCK_IPTABLES_FAIL");
        }
    }
}

const DECLARATIONS: &str = r#"{
    "20-web": { "jump": "accept", "proto": "tcp", "dport": [80, 443], "connstate": "NEW" },
    "10-ssh": { "jump": "accept", "proto": "tcp", "dport": 22 },
    "15-dns": {
        "firewall.managed": [
            { "jump": "ACCEPT" },
            { "proto": "udp" },
            { "dport": 53 },
            { "require": [ { "service": "unbound" } ] }
        ]
    }
}"#;

fn write_declarations(dir: &tempfile::TempDir, json: &str) -> PathBuf {
    let path = dir.path().join("rules.json");
    std::fs::write(&path, json).unwrap();
    path
}

// ═══════════════════════════════════════════════════════════════════════════
// IptablesBackend against the mock
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_apply_orders_rules_by_name() {
    let mock = MockIptables::start();
    let backend = mock.backend();
    let specs = parse_declarations(DECLARATIONS, &DeclarationDefaults::default()).unwrap();

    for spec in &specs {
        let result = reconcile(spec, &backend, &ReconcileOptions::default()).unwrap();
        assert_eq!(result.outcome, Outcome::Applied, "{}", result.message);
    }

    let names: Vec<_> = backend
        .list_rules("filter", "INPUT")
        .unwrap()
        .into_iter()
        .filter_map(|rule| rule.identity_comment)
        .collect();
    assert_eq!(names, vec!["10-ssh", "15-dns", "20-web"]);
}

#[test]
fn test_second_apply_is_no_op() {
    let mock = MockIptables::start();
    let backend = mock.backend();
    let specs = parse_declarations(DECLARATIONS, &DeclarationDefaults::default()).unwrap();

    for spec in &specs {
        reconcile(spec, &backend, &ReconcileOptions::default()).unwrap();
    }
    let before = mock.rules("filter", "INPUT");

    for spec in &specs {
        let result = reconcile(spec, &backend, &ReconcileOptions::default()).unwrap();
        assert_eq!(result.outcome, Outcome::NoOp, "{}", result.message);
        assert_eq!(result.success, Some(true));
    }
    assert_eq!(mock.rules("filter", "INPUT"), before);
}

#[test]
fn test_tokens_reach_iptables_unquoted() {
    let mock = MockIptables::start();
    let backend = mock.backend();
    let spec = RuleSpec::new("httpd", "ACCEPT")
        .protocol("tcp")
        .dports(80)
        .conn_state(vec!["NEW"]);

    reconcile(&spec, &backend, &ReconcileOptions::default()).unwrap();

    assert_eq!(
        mock.rules("filter", "INPUT"),
        vec!["-p tcp -m multiport --dports 80 -m comment --comment httpd -m state --state NEW -j ACCEPT"]
    );
}

#[test]
fn test_dry_run_leaves_chain_alone() {
    let mock = MockIptables::start();
    mock.seed("filter", "INPUT", &["-m comment --comment alpha -j ACCEPT"]);
    let backend = mock.backend();

    let result = reconcile(
        &RuleSpec::new("beta", "ACCEPT"),
        &backend,
        &ReconcileOptions::dry_run(),
    )
    .unwrap();

    assert_eq!(result.outcome, Outcome::WouldApply);
    assert_eq!(result.success, None);
    assert_eq!(result.rulenum, Some(2));
    assert_eq!(mock.rules("filter", "INPUT").len(), 1);
}

#[test]
fn test_unmanaged_rules_count_towards_positions() {
    let mock = MockIptables::start();
    mock.seed(
        "filter",
        "INPUT",
        &[
            "-i lo -j ACCEPT",
            "-m comment --comment alpha -j ACCEPT",
            "-p icmp -j ACCEPT",
            "-m comment --comment gamma -j ACCEPT",
        ],
    );
    let backend = mock.backend();

    let result = reconcile(
        &RuleSpec::new("beta", "ACCEPT"),
        &backend,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(result.rulenum, Some(3));
    assert_eq!(
        mock.rules("filter", "INPUT"),
        vec![
            "-i lo -j ACCEPT",
            "-m comment --comment alpha -j ACCEPT",
            "-m comment --comment beta -j ACCEPT",
            "-p icmp -j ACCEPT",
            "-m comment --comment gamma -j ACCEPT",
        ]
    );
}

#[test]
fn test_name_with_spaces_round_trips() {
    let mock = MockIptables::start();
    mock.seed("filter", "INPUT", &["-m comment --comment zulu -j ACCEPT"]);
    let backend = mock.backend();
    let spec = RuleSpec::new("mail relay", "ACCEPT").protocol("tcp").dports(25);

    let first = reconcile(&spec, &backend, &ReconcileOptions::default()).unwrap();
    assert_eq!(first.outcome, Outcome::Applied, "{}", first.message);
    assert_eq!(first.rulenum, Some(1));

    let listed = backend.list_rules("filter", "INPUT").unwrap();
    assert_eq!(listed[0].identity_comment.as_deref(), Some("mail relay"));
    assert_eq!(listed[1].identity_comment.as_deref(), Some("zulu"));

    let second = reconcile(&spec, &backend, &ReconcileOptions::default()).unwrap();
    assert_eq!(second.outcome, Outcome::NoOp, "{}", second.message);

    let after = reconcile(
        &RuleSpec::new("ntp", "ACCEPT"),
        &backend,
        &ReconcileOptions::default(),
    )
    .unwrap();
    assert_eq!(after.rulenum, Some(2));
    assert_eq!(mock.rules("filter", "INPUT").len(), 3);
}

#[test]
fn test_bare_rule_holds_a_position() {
    let mock = MockIptables::start();
    // A counter-only rule (`iptables -A INPUT`) lists as a bare `-A INPUT`
    mock.seed("filter", "INPUT", &["", "-m comment --comment alpha -j ACCEPT"]);
    let backend = mock.backend();

    let result = reconcile(
        &RuleSpec::new("beta", "ACCEPT"),
        &backend,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(result.rulenum, Some(3));
    assert_eq!(
        mock.rules("filter", "INPUT").last().map(String::as_str),
        Some("-m comment --comment beta -j ACCEPT")
    );
}

#[test]
fn test_chains_and_tables_are_separate() {
    let mock = MockIptables::start();
    let backend = mock.backend();
    let defaults = DeclarationDefaults {
        table: "filter".to_string(),
        chain: "FORWARD".to_string(),
    };
    let specs = parse_declarations(
        r#"{
            "fwd": { "action": "ACCEPT" },
            "raw-notrack": { "action": "CT", "table": "raw", "chain": "PREROUTING" }
        }"#,
        &defaults,
    )
    .unwrap();

    for spec in &specs {
        reconcile(spec, &backend, &ReconcileOptions::default()).unwrap();
    }

    assert!(mock.rules("filter", "INPUT").is_empty());
    assert_eq!(mock.rules("filter", "FORWARD").len(), 1);
    assert_eq!(mock.rules("raw", "PREROUTING").len(), 1);
}

#[test]
fn test_insert_failure_reports_backend_text() {
    let mock = MockIptables::start();
    mock.fail("-I");
    let backend = mock.backend();

    let result = reconcile(
        &RuleSpec::new("ssh", "ACCEPT"),
        &backend,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.success, Some(false));
    assert!(result.message.contains("Permission denied"), "{}", result.message);
    assert!(result.changes.is_empty());

    let translation = IptablesErrorPattern::match_error(&result.message);
    assert!(translation.user_message.contains("permissions"));
    assert!(mock.rules("filter", "INPUT").is_empty());
}

#[test]
fn test_check_failure_is_query_error() {
    let mock = MockIptables::start();
    mock.fail("-C");
    let backend = mock.backend();

    let err = backend
        .check("filter", "INPUT", "-m comment --comment 'x' -j 'ACCEPT'")
        .unwrap_err();
    assert!(matches!(err, Error::BackendQuery { exit_code: Some(4), .. }));

    let result = reconcile(
        &RuleSpec::new("x", "ACCEPT"),
        &backend,
        &ReconcileOptions::default(),
    )
    .unwrap();
    assert!(result.is_failure());
    assert_eq!(result.rulenum, None);
}

#[test]
fn test_missing_binary_is_failed_result() {
    let _mock = MockIptables::start();
    let backend = IptablesBackend::new("/nonexistent/fwrule-iptables");

    let result = reconcile(
        &RuleSpec::new("x", "ACCEPT"),
        &backend,
        &ReconcileOptions::default(),
    )
    .unwrap();

    assert!(result.is_failure());
    let translation = IptablesErrorPattern::match_error(&result.message);
    assert!(translation.user_message.contains("not installed"));
}

// ═══════════════════════════════════════════════════════════════════════════
// Declaration files with the in-memory backend
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_declaration_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_declarations(&dir, DECLARATIONS);

    let specs = load_declarations(&path, &DeclarationDefaults::default())
        .await
        .unwrap();
    let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["20-web", "10-ssh", "15-dns"]);

    let backend = MemoryBackend::new();
    let outcomes: Vec<_> = specs
        .iter()
        .map(|spec| {
            reconcile(spec, &backend, &ReconcileOptions::default())
                .unwrap()
                .outcome
        })
        .collect();

    assert!(outcomes.iter().all(|o| *o == Outcome::Applied));
    assert_eq!(
        backend.managed_names("filter", "INPUT"),
        vec!["10-ssh", "15-dns", "20-web"]
    );
}

#[tokio::test]
async fn test_invalid_declaration_is_rejected_before_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_declarations(
        &dir,
        r#"{ "bad": { "jump": "ACCEPT", "proto": "tcp' -j DROP" } }"#,
    );

    let specs = load_declarations(&path, &DeclarationDefaults::default())
        .await
        .unwrap();
    let backend = MemoryBackend::new();
    let err = reconcile(&specs[0], &backend, &ReconcileOptions::default()).unwrap_err();

    assert!(matches!(err, Error::InvalidSpec { ref field, .. } if field == "protocol"));
    assert_eq!(backend.query_calls(), 0);
}

#[test]
fn test_show_text_matches_applied_text() {
    let specs = parse_declarations(DECLARATIONS, &DeclarationDefaults::default()).unwrap();
    let backend = MemoryBackend::new();

    for spec in &specs {
        let shown = build_rule_text(spec).unwrap();
        let result = reconcile(spec, &backend, &ReconcileOptions::default()).unwrap();
        assert_eq!(result.rule_text, shown);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Audit trail
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_audit_records_insert_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let audit = AuditLog::at(dir.path().join("audit.log"));

    let backend = MemoryBackend::new();
    let spec = RuleSpec::new("ssh", "ACCEPT").protocol("tcp").dports(22);

    let applied = reconcile(&spec, &backend, &ReconcileOptions::default()).unwrap();
    let unchanged = reconcile(&spec, &backend, &ReconcileOptions::default()).unwrap();

    for result in [&applied, &unchanged] {
        if let Some(event) = AuditEvent::for_insert(spec.table(), spec.chain(), result) {
            audit.log(&event).await.unwrap();
        }
    }

    let events = audit.read_recent(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::InsertRule);
    assert!(events[0].success);
    assert_eq!(events[0].details["chain"], "INPUT");
}
