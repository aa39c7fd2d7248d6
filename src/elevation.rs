//! Privilege elevation for iptables
//!
//! iptables needs `CAP_NET_ADMIN`. fwrule runs as whatever user invoked it and
//! only elevates the individual iptables invocations.
//!
//! # Elevation Strategy
//!
//! 1. Already root: run directly
//! 2. `FWRULE_ELEVATION_METHOD` set: use exactly that method
//! 3. `run0` when available (systemd v256+, no SUID)
//! 4. `sudo` on a terminal, `pkexec` otherwise
//!
//! # Environment Variables
//!
//! - `FWRULE_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `pkexec`).
//!   Useful for scripts with sudoers NOPASSWD rules.
//!   Example: `FWRULE_ELEVATION_METHOD=sudo fwrule apply rules.json`
//!
//! - `FWRULE_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! Commands are constructed without shell interpolation; every rule token is a
//! separate argv entry.

use std::io;
use std::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit or run as root")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `FWRULE_ELEVATION_METHOD`
    #[error("Invalid FWRULE_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(wrapper: &str, program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(wrapper);
    cmd.arg(program).args(args);
    cmd
}

fn direct(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Creates an elevated iptables command.
///
/// `program` is the iptables binary to run (`iptables`, `iptables-legacy`,
/// an absolute path, ...). Arguments are passed directly without shell
/// interpretation.
///
/// # Errors
///
/// Returns `Err` if the requested or detected elevation method is unavailable.
///
/// # Testing
///
/// Set `FWRULE_TEST_NO_ELEVATION=1` to run `program` directly.
pub fn create_elevated_iptables_command(
    program: &str,
    args: &[String],
) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    if std::env::var("FWRULE_TEST_NO_ELEVATION").is_ok() {
        return Ok(direct(program, args));
    }

    if nix::unistd::geteuid().is_root() {
        return Ok(direct(program, args));
    }

    if let Ok(method) = std::env::var("FWRULE_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if binary_exists(&method) {
                        Ok(wrapped(&method, program, args))
                    } else {
                        Err(ElevationError::MethodNotAvailable(method))
                    }
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}

/// Whether iptables can be invoked without a password prompt
pub fn runs_without_prompt() -> bool {
    std::env::var("FWRULE_TEST_NO_ELEVATION").is_ok() || nix::unistd::geteuid().is_root()
}
