/// Audit logging for firewall mutations
///
/// Every reconciliation that reaches `iptables -I` is recorded, whether or
/// not the insert succeeded. Dry runs and no-ops never touch the firewall and
/// are not recorded.
use crate::core::reconcile::{Outcome, ReconcileResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InsertRule,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }

    /// Builds the insert event for a reconciliation result.
    ///
    /// Returns `None` for outcomes that did not attempt an insert.
    pub fn for_insert(table: &str, chain: &str, result: &ReconcileResult) -> Option<Self> {
        // Failed results without a rulenum never got past listing
        let attempted = matches!(result.outcome, Outcome::Applied)
            || (result.outcome == Outcome::Failed && result.rulenum.is_some());
        if !attempted {
            return None;
        }

        let success = result.outcome == Outcome::Applied;
        Some(Self::new(
            EventType::InsertRule,
            success,
            serde_json::json!({
                "name": result.name,
                "table": table,
                "chain": chain,
                "rulenum": result.rulenum,
                "rule": result.rule_text,
            }),
            (!success).then(|| result.message.clone()),
        ))
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn at(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

/// Records an insert attempt; audit failures are logged and otherwise ignored
pub async fn log_insert(table: &str, chain: &str, result: &ReconcileResult) {
    let Some(event) = AuditEvent::for_insert(table, chain, result) else {
        return;
    };

    if let Err(e) = crate::utils::ensure_dirs() {
        tracing::warn!("Failed to create state directory for audit log: {}", e);
        return;
    }

    match AuditLog::new() {
        Ok(audit) => {
            if let Err(e) = audit.log(&event).await {
                tracing::warn!("Failed to write audit log: {}", e);
            }
        }
        Err(e) => tracing::warn!("Audit log unavailable: {}", e),
    }
}
