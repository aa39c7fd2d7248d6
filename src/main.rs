//! fwrule - declarative iptables rules
//!
//! Reads a declaration file and makes sure every declared rule is present in
//! its chain, inserted in name order among the rules fwrule manages.
//!
//! # Usage
//!
//! ```bash
//! fwrule apply rules.json              # Insert missing rules
//! fwrule apply rules.json --dry-run    # Report what would be inserted
//! fwrule plan rules.json --offline     # Plan against an empty chain, no iptables needed
//! fwrule show rules.json               # Print the canonical rule text
//! fwrule list --chain INPUT            # List rules currently in a chain
//! fwrule audit -n 10                   # Last ten inserts
//! fwrule config --init                 # Write the default config file
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG=debug` to see every iptables call.

use clap::{Parser, Subcommand};
use fwrule::audit::{self, AuditLog};
use fwrule::config::{self, AppConfig};
use fwrule::core::declarations::{DeclarationDefaults, load_declarations};
use fwrule::core::error::IptablesErrorPattern;
use fwrule::elevation;
use fwrule::{
    Backend, Error, IptablesBackend, MemoryBackend, Outcome, ReconcileOptions, ReconcileResult,
    RuleSpec, build_rule_text, reconcile,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "fwrule")]
#[command(about = "Idempotent, ordered iptables rules from a declaration file", long_about = None)]
#[command(version, long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert every declared rule that is missing
    Apply {
        /// Declaration file (JSON)
        file: PathBuf,
        /// Report what would change without inserting anything
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show what `apply` would do
    Plan {
        /// Declaration file (JSON)
        file: PathBuf,
        /// Plan against empty chains instead of querying iptables
        #[arg(long)]
        offline: bool,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Print the canonical rule text of every declaration
    Show {
        /// Declaration file (JSON)
        file: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List the rules currently in a chain
    List {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show recent inserts from the audit log
    Audit {
        /// Number of entries to show, newest first
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Table for declarations that do not name one (default from config)
    #[arg(short, long)]
    table: Option<String>,
    /// Chain for declarations that do not name one (default from config)
    #[arg(short, long)]
    chain: Option<String>,
}

impl TargetArgs {
    fn defaults(&self, config: &AppConfig) -> DeclarationDefaults {
        DeclarationDefaults {
            table: self
                .table
                .clone()
                .unwrap_or_else(|| config.default_table.clone()),
            chain: self
                .chain
                .clone()
                .unwrap_or_else(|| config.default_chain.clone()),
        }
    }
}

type CliResult = std::result::Result<ExitCode, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli.command)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn handle_cli(command: Commands) -> CliResult {
    let config = config::load_config().await;

    match command {
        Commands::Apply {
            file,
            dry_run,
            target,
        } => {
            let specs = load_declarations(&file, &target.defaults(&config)).await?;
            note_elevation();
            let backend: Arc<dyn Backend> = Arc::new(IptablesBackend::from_config(&config));
            let options = ReconcileOptions { dry_run };
            run_declarations(specs, backend, options, config.audit_enabled && !dry_run).await
        }
        Commands::Plan {
            file,
            offline,
            target,
        } => {
            let specs = load_declarations(&file, &target.defaults(&config)).await?;
            let backend: Arc<dyn Backend> = if offline {
                Arc::new(MemoryBackend::new())
            } else {
                Arc::new(IptablesBackend::from_config(&config))
            };
            run_declarations(specs, backend, ReconcileOptions::dry_run(), false).await
        }
        Commands::Show { file, target } => {
            let specs = load_declarations(&file, &target.defaults(&config)).await?;
            Ok(show_declarations(&specs))
        }
        Commands::List { target } => {
            let defaults = target.defaults(&config);
            note_elevation();
            list_chain(IptablesBackend::from_config(&config), defaults).await
        }
        Commands::Audit { count } => show_audit(count).await,
        Commands::Config { init } => {
            if init {
                config::save_config(&config).await?;
                if let Some(path) = config::config_path() {
                    println!("Wrote {}", path.display());
                }
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn note_elevation() {
    if !elevation::runs_without_prompt() {
        tracing::info!("Not running as root; iptables calls will be elevated (sudo/run0/pkexec)");
    }
}

/// Reconciles declarations one at a time, in file order
async fn run_declarations(
    specs: Vec<RuleSpec>,
    backend: Arc<dyn Backend>,
    options: ReconcileOptions,
    audit_enabled: bool,
) -> CliResult {
    let total = specs.len();
    let mut tally = Tally::default();

    for spec in specs {
        let name = spec.name.clone();
        let (table, chain) = (spec.table().to_string(), spec.chain().to_string());

        let backend = Arc::clone(&backend);
        let result = tokio::task::spawn_blocking(move || reconcile(&spec, &*backend, &options))
            .await
            .map_err(|e| Error::Internal(format!("Reconciliation task failed: {e}")))?;

        match result {
            Ok(result) => {
                print_result(&result);
                if audit_enabled {
                    audit::log_insert(&table, &chain, &result).await;
                }
                tally.record(result.outcome);
            }
            Err(e) => {
                eprintln!("✗ {name}: {e}");
                tally.failed += 1;
            }
        }
    }

    println!(
        "{total} rule(s): {} applied, {} unchanged, {} pending, {} failed",
        tally.applied, tally.unchanged, tally.pending, tally.failed
    );

    Ok(if tally.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[derive(Default)]
struct Tally {
    applied: usize,
    unchanged: usize,
    pending: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::NoOp => self.unchanged += 1,
            Outcome::WouldApply => self.pending += 1,
            Outcome::Applied => self.applied += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

fn print_result(result: &ReconcileResult) {
    let marker = match result.outcome {
        Outcome::NoOp | Outcome::Applied => "✓",
        Outcome::WouldApply => "~",
        Outcome::Failed => "✗",
    };

    if result.is_failure() {
        eprintln!("{marker} [{}] {}", result.outcome, result.message);
        let translation = IptablesErrorPattern::match_error(&result.message);
        eprintln!("    {}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("    - {suggestion}");
        }
        if let Some(url) = &translation.help_url {
            eprintln!("    See: {url}");
        }
    } else {
        println!("{marker} [{}] {}", result.outcome, result.message);
    }
}

fn show_declarations(specs: &[RuleSpec]) -> ExitCode {
    let mut failed = false;
    for spec in specs {
        match build_rule_text(spec) {
            Ok(text) => println!("{}/{} {}: {text}", spec.table(), spec.chain(), spec.name),
            Err(e) => {
                eprintln!("✗ {}: {e}", spec.name);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn list_chain(backend: IptablesBackend, target: DeclarationDefaults) -> CliResult {
    let DeclarationDefaults { table, chain } = target;
    let (query_table, query_chain) = (table.clone(), chain.clone());

    let rules = tokio::task::spawn_blocking(move || backend.list_rules(&query_table, &query_chain))
        .await
        .map_err(|e| Error::Internal(format!("Listing task failed: {e}")))?;

    match rules {
        Ok(rules) => {
            println!("{table}/{chain}: {} rule(s)", rules.len());
            for rule in rules {
                let identity = rule.identity_comment.as_deref().unwrap_or("-");
                println!("{:>4}  {identity:<24}  {}", rule.position, rule.raw_text);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let translation = IptablesErrorPattern::match_error(&e.backend_message());
            eprintln!("✗ {e}");
            eprintln!("    {}", translation.user_message);
            for suggestion in &translation.suggestions {
                eprintln!("    - {suggestion}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn show_audit(count: usize) -> CliResult {
    let log = AuditLog::new()?;
    let events = match log.read_recent(count).await {
        Ok(events) => events,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No audit entries yet ({})", log.path().display());
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };

    for event in events {
        let marker = if event.success { "✓" } else { "✗" };
        let detail = |key: &str| event.details[key].as_str().unwrap_or("?").to_string();
        println!(
            "{} {marker} {}/{} #{} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            detail("table"),
            detail("chain"),
            event.details["rulenum"],
            detail("name"),
        );
        if let Some(error) = &event.error {
            println!("    {error}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
