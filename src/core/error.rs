use thiserror::Error;

/// Core error types for fwrule
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A declared rule could not be turned into rule text
    #[error("Invalid rule spec, field {field}: {message}")]
    InvalidSpec { field: String, message: String },

    /// `check` or `list_rules` failed, so the current chain state is unknown
    #[error("iptables query failed: {message}")]
    BackendQuery {
        message: String,
        exit_code: Option<i32>,
    },

    /// `insert` failed
    #[error("iptables insert failed: {message}")]
    BackendMutation {
        message: String,
        exit_code: Option<i32>,
    },

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_spec(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The backend's own text for query/mutation failures, the display text otherwise.
    pub fn backend_message(&self) -> String {
        match self {
            Self::BackendQuery { message, .. } | Self::BackendMutation { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// Database of iptables error patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("you must be root") {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run as root, or set FWRULE_ELEVATION_METHOD=sudo")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available")
                .with_help("https://man7.org/linux/man-pages/man8/iptables.8.html");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables  (Fedora/RHEL)")
                .with_suggestion("Or point FWRULE_IPTABLES_COMMAND at the binary");
        }

        // xtables lock held by another writer
        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable")
        {
            return ErrorTranslation::new("Another process holds the xtables lock")
                .with_suggestion("Another firewall manager may be modifying the same chain")
                .with_suggestion("Wait a moment and try again");
        }

        if lower.contains("index of insertion too big") {
            return ErrorTranslation::new("Rule position is past the end of the chain")
                .with_suggestion("The chain changed between listing and inserting")
                .with_suggestion("Re-run to recompute the position");
        }

        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Chain, target or match module not found")
                .with_suggestion("Check the chain name is spelled correctly (names are case-sensitive)")
                .with_suggestion("Check the kernel module for the match is available: lsmod | grep xt_")
                .with_help("https://man7.org/linux/man-pages/man8/iptables-extensions.8.html");
        }

        if lower.contains("can't initialize iptables table")
            || lower.contains("table does not exist")
        {
            return ErrorTranslation::new("Firewall table does not exist")
                .with_suggestion("Valid tables: filter, nat, mangle, raw, security")
                .with_suggestion("The table's kernel module may need loading: modprobe iptable_<table>");
        }

        if lower.contains("bad argument") || lower.contains("unknown option") {
            return ErrorTranslation::new("Invalid iptables rule syntax")
                .with_suggestion("Check the rule declaration for typos")
                .with_suggestion("Port ranges use a colon: 1024:65535");
        }

        if lower.contains("invalid port") || (lower.contains("port") && lower.contains("range")) {
            return ErrorTranslation::new("Invalid port or port range")
                .with_suggestion("Port numbers must be between 1 and 65535")
                .with_suggestion("Example valid values: 22, 80,443, 1024:65535");
        }

        if lower.contains("does a matching rule exist") {
            return ErrorTranslation::new("The rule does not match anything in the chain")
                .with_suggestion("This is reported by `iptables -C` for absent rules");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables is working: sudo iptables -S")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iptables_missing_command() {
        let translation = IptablesErrorPattern::match_error("command not found: iptables");
        assert!(translation.user_message.contains("not installed"));
        assert!(translation.suggestions.len() >= 3);
    }

    #[test]
    fn test_permission_denied() {
        let translation = IptablesErrorPattern::match_error(
            "iptables v1.8.9 (nf_tables): Could not fetch rule set generation id: Permission denied (you must be root)",
        );
        assert!(translation.user_message.contains("permissions"));
        assert!(translation.help_url.is_some());
    }

    #[test]
    fn test_xtables_lock() {
        let translation = IptablesErrorPattern::match_error(
            "Another app is currently holding the xtables lock. Perhaps you want to use the -w option?",
        );
        assert!(translation.user_message.contains("xtables lock"));
    }

    #[test]
    fn test_insertion_index() {
        let translation =
            IptablesErrorPattern::match_error("iptables: Index of insertion too big.");
        assert!(translation.suggestions.iter().any(|s| s.contains("Re-run")));
    }

    #[test]
    fn test_unknown_chain() {
        let translation = IptablesErrorPattern::match_error(
            "iptables: No chain/target/match by that name.",
        );
        assert!(translation.user_message.contains("not found"));
    }

    #[test]
    fn test_generic_fallback_keeps_message() {
        let translation = IptablesErrorPattern::match_error("something odd");
        assert!(translation.user_message.contains("something odd"));
    }

    #[test]
    fn test_backend_message_prefers_raw_text() {
        let err = Error::BackendMutation {
            message: "iptables: Index of insertion too big.".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(err.backend_message(), "iptables: Index of insertion too big.");

        let err = Error::invalid_spec("action", "missing");
        assert!(err.backend_message().contains("action"));
    }
}
