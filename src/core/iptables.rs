use crate::core::backend::Backend;
use crate::core::error::{Error, Result};
use crate::core::rule::ExistingRule;
use std::process::Output;
use tracing::{debug, error, info};

/// Binary used when nothing else is configured
pub const DEFAULT_IPTABLES_COMMAND: &str = "iptables";

/// [`Backend`] driving the `iptables` binary.
///
/// Rule text is split into argv with [`split_rule_text`] and passed without a
/// shell. Commands run through [`crate::elevation`], so the tool can run as an
/// unprivileged user.
#[derive(Debug, Clone)]
pub struct IptablesBackend {
    command: String,
    wait_for_lock: bool,
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self::new(DEFAULT_IPTABLES_COMMAND)
    }
}

impl IptablesBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            wait_for_lock: true,
        }
    }

    /// Builds a backend from the app config, honouring `FWRULE_IPTABLES_COMMAND`
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        let command = std::env::var("FWRULE_IPTABLES_COMMAND")
            .ok()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| config.iptables_command.clone());

        Self {
            command,
            wait_for_lock: config.wait_for_lock,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Full argument list for one iptables invocation
    fn args(&self, table: &str, operation: &[&str], rule_text: Option<&str>) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(16);
        if self.wait_for_lock {
            args.push("-w".to_string());
        }
        args.extend(["-t".to_string(), table.to_string()]);
        args.extend(operation.iter().map(|s| (*s).to_string()));

        if let Some(text) = rule_text {
            let tokens = split_rule_text(text).map_err(|e| {
                Error::Internal(format!("Rule text could not be split into arguments: {e}"))
            })?;
            args.extend(tokens);
        }
        Ok(args)
    }

    /// Elevation failures come back as [`Error::Elevation`]; a failed spawn is
    /// left to the caller, which knows whether it was a query or a mutation.
    fn run(&self, args: &[String]) -> Result<std::result::Result<Output, String>> {
        debug!("Running {} {}", self.command, args.join(" "));
        let mut cmd = crate::elevation::create_elevated_iptables_command(&self.command, args)?;
        Ok(cmd.output().map_err(|e| {
            error!("Failed to spawn {}: {e}", self.command);
            format!("Failed to spawn {}: {e}", self.command)
        }))
    }
}

impl Backend for IptablesBackend {
    fn check(&self, table: &str, chain: &str, rule_text: &str) -> Result<bool> {
        let args = self.args(table, &["-C", chain], Some(rule_text))?;
        let output = self.run(&args)?.map_err(|message| Error::BackendQuery {
            message,
            exit_code: None,
        })?;

        // -C exits 1 when the rule is absent; anything else is a real failure
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(Error::BackendQuery {
                message: stderr_text(&output),
                exit_code: code,
            }),
        }
    }

    fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<ExistingRule>> {
        let args = self.args(table, &["-S", chain], None)?;
        let output = self.run(&args)?.map_err(|message| Error::BackendQuery {
            message,
            exit_code: None,
        })?;

        if !output.status.success() {
            return Err(Error::BackendQuery {
                message: stderr_text(&output),
                exit_code: output.status.code(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_rule_listing(chain, &stdout))
    }

    fn insert(&self, table: &str, chain: &str, rulenum: usize, rule_text: &str) -> Result<()> {
        let position = rulenum.to_string();
        let args = self.args(table, &["-I", chain, &position], Some(rule_text))?;

        info!("Inserting rule into {table}/{chain} at {rulenum}");
        let output = self.run(&args)?.map_err(|message| Error::BackendMutation {
            message,
            exit_code: None,
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = stderr_text(&output);
            error!("iptables insert failed: {stderr}");
            Err(Error::BackendMutation {
                message: stderr,
                exit_code: output.status.code(),
            })
        }
    }
}

fn stderr_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("iptables exited with {}", output.status)
    } else {
        stderr
    }
}

/// Parses `iptables -S <chain>` output into positioned rules.
///
/// Only `-A <chain>` lines are rules; policy (`-P`) and chain (`-N`) lines are
/// skipped. `raw_text` is the rule without its `-A <chain>` prefix, and is
/// empty for a rule with no matches or target (a bare `-A <chain>` line).
pub fn parse_rule_listing(chain: &str, listing: &str) -> Vec<ExistingRule> {
    let bare = format!("-A {chain}");
    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let rest = line.strip_prefix(&bare)?;
            if rest.is_empty() {
                Some(rest)
            } else {
                rest.strip_prefix(' ').map(str::trim_start)
            }
        })
        .enumerate()
        .map(|(idx, rule)| ExistingRule {
            position: idx + 1,
            identity_comment: identity_comment(rule),
            raw_text: rule.to_string(),
        })
        .collect()
}

/// Extracts the value of the `--comment` option from rule text
pub fn identity_comment(rule_text: &str) -> Option<String> {
    let tokens = split_rule_text(rule_text).ok()?;
    tokens
        .iter()
        .position(|t| t == "--comment")
        .and_then(|idx| tokens.get(idx + 1).cloned())
}

/// Splits rule text into arguments the way a POSIX shell would for plain words.
///
/// Supports single quotes (literal), double quotes (with `\"` and `\\`
/// escapes) and backslash escapes outside quotes. Variables, globs and command
/// substitution are not interpreted.
///
/// # Errors
///
/// Returns `Err` on an unterminated quote or a trailing backslash.
pub fn split_rule_text(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(c) => current.push(c),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
