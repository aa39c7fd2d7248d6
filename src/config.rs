use crate::core::iptables::DEFAULT_IPTABLES_COMMAND;
use crate::core::rule::{DEFAULT_CHAIN, DEFAULT_TABLE};
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// iptables binary to run (overridden by `FWRULE_IPTABLES_COMMAND`)
    #[serde(default = "default_iptables_command")]
    pub iptables_command: String,
    /// Pass `-w` so iptables waits for the xtables lock instead of failing
    #[serde(default = "default_true")]
    pub wait_for_lock: bool,
    /// Table for declarations that do not name one
    #[serde(default = "default_table")]
    pub default_table: String,
    /// Chain for declarations that do not name one
    #[serde(default = "default_chain")]
    pub default_chain: String,
    /// Append applied/failed inserts to the audit log
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            iptables_command: default_iptables_command(),
            wait_for_lock: true,
            default_table: default_table(),
            default_chain: default_chain(),
            audit_enabled: true,
        }
    }
}

fn default_iptables_command() -> String {
    DEFAULT_IPTABLES_COMMAND.to_string()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_chain() -> String {
    DEFAULT_CHAIN.to_string()
}

fn default_true() -> bool {
    true
}

/// Path of the user config file, if a config directory can be determined
pub fn config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file next to `path`.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
pub async fn save_config_to(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    #[cfg(unix)]
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600) // Set permissions BEFORE any data is written
        .open(&temp_path)
        .await?;

    #[cfg(not(unix))]
    let mut file = tokio::fs::File::create(&temp_path).await?;

    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Saves the config to the user config directory
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    crate::utils::ensure_dirs()?;
    if let Some(path) = config_path() {
        save_config_to(config, &path).await?;
    }
    Ok(())
}

/// Loads the config from `path`, falling back to defaults when the file is
/// missing or malformed.
pub async fn load_config_from(path: &Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str::<AppConfig>(&json).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config {}: {e}", path.display());
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}

/// Loads the config from the user config directory, or defaults
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig {
            iptables_command: "/usr/sbin/iptables-legacy".to_string(),
            wait_for_lock: false,
            default_chain: "FORWARD".to_string(),
            ..AppConfig::default()
        };
        save_config_to(&config, &path).await.unwrap();

        assert_eq!(load_config_from(&path).await, config);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_with_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        save_config_to(&AppConfig::default(), &path).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.json")).await;
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"default_chain": "OUTPUT"}"#).unwrap();

        let config = load_config_from(&path).await;
        assert_eq!(config.default_chain, "OUTPUT");
        assert_eq!(config.default_table, "filter");
        assert!(config.audit_enabled);
    }

    #[tokio::test]
    async fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_config_from(&path).await, AppConfig::default());
    }
}
