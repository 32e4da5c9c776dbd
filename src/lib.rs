//! haccp-trace: batch freezing traceability for a HACCP program.
//!
//! **A local-first, append-only audit trail for one facility.**
//!
//! The freezer operator records each batch: batch id and date, the mixer, a
//! second tester, the mix expiration date and two taste-test confirmations.
//! Submissions are checked against business rules before anything touches
//! storage, and admitted records are appended to a CSV log that is never
//! rewritten in place.
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! All log access routes through `LogBroker`:
//! - Shared region for reads, exclusive region for appends
//!   (in-process lock plus an advisory file lock, bounded by a timeout)
//! - Audit trail of mutations (`broker.events.jsonl`)
//!
//! ## Subsystems
//!
//! - `employees`: roster-backed directory with a fixed fallback list
//! - `validator`: blocking rules and non-blocking advisories
//! - `freezing_log`: the append-only store, export and verification
//! - `query`: most-recent-first page and full export
//! - `intake`: the submission pipeline tying the above together
//!
//! # Examples
//!
//! ```bash
//! haccp-trace init
//! haccp-trace submit --operator "Alice Martinez" --batch-id B-1 \
//!     --mixer "Ben Kim" --second-tester "Carla Rossi" --mix-expiration 2025-01-20
//! haccp-trace recent --limit 10
//! haccp-trace export --out backup.csv
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store layout, broker, errors, time and output helpers
//! - [`plugins`]: the traceability subsystems

pub mod core;
pub mod plugins;

use crate::core::{
    error::{self, HaccpError},
    output,
    store::{self, Store},
    time,
};
use crate::plugins::{
    employees, freezing_log,
    freezing_log::AppendOnlyLog,
    intake::{self, SubmitOutcome},
    query::QueryView,
    validator::Candidate,
};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "haccp-trace",
    version = env!("CARGO_PKG_VERSION"),
    about = "Batch freezing traceability log for HACCP programs"
)]
pub struct Cli {
    /// Project root (defaults to the nearest directory containing `.haccp/`).
    #[clap(long, global = true, env = "HACCP_ROOT")]
    root: Option<PathBuf>,
    /// Log filter for diagnostics on stderr, e.g. `info` or `haccp_trace=debug`.
    #[clap(long, global = true, default_value = "warn", env = "HACCP_LOG")]
    log_level: String,
    #[clap(subcommand)]
    command: Command,
}

impl Cli {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create `.haccp/config.toml` and an empty log.
    Init {
        /// Directory to initialize (defaults to current working directory).
        #[clap(short, long)]
        dir: Option<PathBuf>,
    },
    /// List the employee names usable as operator, mixer or tester.
    Employees {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Validate and record one batch freezing event.
    Submit(SubmitCli),
    /// Show the most recent records, newest first.
    Recent {
        /// Maximum number of records (defaults to `recent_limit` from config).
        #[clap(long)]
        limit: Option<usize>,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Download the full log as CSV.
    Export {
        /// Output file path (stdout if not specified).
        #[clap(long)]
        out: Option<PathBuf>,
    },
    /// Look up records by batch id, e.g. to confirm a write before retrying.
    Find {
        #[clap(long)]
        batch_id: String,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Audit the stored log for schema, ordering and date problems.
    Verify {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Print the subsystem schemas as JSON.
    Schema,
    /// Print the version.
    Version,
}

#[derive(clap::Args, Debug)]
struct SubmitCli {
    /// Freezer operator: the signed-in employee.
    #[clap(long, env = "HACCP_OPERATOR")]
    operator: String,
    /// Production date (YYYY-MM-DD, defaults to today).
    #[clap(long, value_parser = parse_date_arg)]
    batch_date: Option<NaiveDate>,
    /// Batch ID / code, e.g. 2025-09-22-VAN-003.
    #[clap(long, default_value = "")]
    batch_id: String,
    /// Who made the mix.
    #[clap(long)]
    mixer: String,
    /// Independent taste tester.
    #[clap(long)]
    second_tester: String,
    /// Mix expiration date (YYYY-MM-DD).
    #[clap(long, value_parser = parse_date_arg)]
    mix_expiration: NaiveDate,
    /// Mixer taste-tested the finished product: yes or no.
    #[clap(long, default_value = "yes", value_parser = parse_yes_no, action = clap::ArgAction::Set)]
    mixer_tasted: bool,
    /// Second tester confirmed taste: yes or no.
    #[clap(long, default_value = "yes", value_parser = parse_yes_no, action = clap::ArgAction::Set)]
    second_tasted: bool,
    #[clap(long, default_value = "")]
    notes: String,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    format: String,
}

fn parse_date_arg(raw: &str) -> Result<NaiveDate, String> {
    time::parse_date(raw).map_err(|e| format!("expected YYYY-MM-DD ({})", e))
}

fn parse_yes_no(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(true),
        "no" | "n" | "false" | "0" => Ok(false),
        other => Err(format!("expected yes or no, got {:?}", other)),
    }
}

/// Install the stderr `tracing` subscriber. Safe to call more than once.
pub fn init_tracing(filter: &str) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn open_store(root: Option<PathBuf>) -> Result<Store, HaccpError> {
    let root = match root {
        Some(r) => r,
        None => store::find_project_root(&std::env::current_dir()?)?,
    };
    Store::open(&root)
}

fn print_json(value: &serde_json::Value) -> Result<(), HaccpError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run(cli: Cli) -> Result<(), HaccpError> {
    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Schema => print_json(&serde_json::json!([
            employees::schema(),
            freezing_log::schema(),
        ])),
        Command::Init { dir } => {
            let target = match dir.or(cli.root) {
                Some(d) => d,
                None => std::env::current_dir()?,
            };
            std::fs::create_dir_all(&target)?;
            let target = std::fs::canonicalize(&target)?;
            run_init(&target)
        }
        command => {
            let store = open_store(cli.root)?;
            match command {
                Command::Employees { format } => run_employees(&store, &format),
                Command::Submit(args) => run_submit(&store, args),
                Command::Recent { limit, format } => run_recent(&store, limit, &format),
                Command::Export { out } => run_export(&store, out),
                Command::Find { batch_id, format } => run_find(&store, &batch_id, &format),
                Command::Verify { format } => run_verify(&store, &format),
                Command::Init { .. } | Command::Schema | Command::Version => Ok(()),
            }
        }
    }
}

fn run_init(target: &std::path::Path) -> Result<(), HaccpError> {
    let wrote_config = store::write_default_config(target)?;
    let store = Store::open(target)?;
    let log = AppendOnlyLog::for_store(&store);
    let created_log = log.initialize()?;

    let mark = |done: bool| if done { "created".green() } else { "exists".dimmed() };
    println!("{} {}", "Initialized".bold(), target.display());
    println!(
        "  config  {}  {}",
        mark(wrote_config),
        store::config_path(target).display()
    );
    println!("  log     {}  {}", mark(created_log), log.path().display());
    if !store.roster_path().exists() {
        println!(
            "  roster  {}  {} (fallback employee list will be used)",
            "missing".yellow(),
            store.roster_path().display()
        );
    }
    Ok(())
}

fn run_employees(store: &Store, format: &str) -> Result<(), HaccpError> {
    let load = employees::load(&store.roster_path(), &store.config.fallback_employees);
    if format == "json" {
        return print_json(&time::command_envelope(
            "employees",
            "ok",
            serde_json::json!({
                "source": load.source,
                "warning": load.warning.as_ref().map(|w| w.to_string()),
                "employees": load.directory.employees().collect::<Vec<_>>(),
            }),
        ));
    }

    if let Some(w) = &load.warning {
        eprintln!("{} {}", "warning:".yellow().bold(), w);
    }
    let source = match load.source {
        employees::DirectorySource::Roster => store.roster_path().display().to_string(),
        employees::DirectorySource::Fallback => "built-in fallback list".to_string(),
    };
    println!("{} ({})", "Employees".bold(), source);
    if load.directory.is_empty() {
        println!("  (none; any non-empty name is accepted)");
    }
    for name in load.directory.names() {
        println!("  {}", name);
    }
    Ok(())
}

fn run_submit(store: &Store, args: SubmitCli) -> Result<(), HaccpError> {
    let candidate = Candidate {
        batch_date: args.batch_date.unwrap_or_else(|| time::now_local().date()),
        batch_id: args.batch_id,
        freezer_operator: args.operator,
        mixer_name: args.mixer,
        second_tester_name: args.second_tester,
        mix_expiration_date: args.mix_expiration,
        mixer_taste_tested: args.mixer_tasted,
        second_tester_taste_tested: args.second_tasted,
        notes: args.notes,
    };

    let outcome = match intake::submit(store, &candidate) {
        Ok(outcome) => outcome,
        Err(e) if e.is_io_failure() => {
            let batch_id = candidate.batch_id.trim();
            eprintln!(
                "{} failed to save batch {}: {}",
                "error:".red().bold(),
                batch_id,
                e
            );
            eprintln!(
                "  Your input was kept below. Run `haccp-trace find --batch-id {}` to confirm it is absent before resubmitting.",
                batch_id
            );
            eprintln!("{}", serde_json::to_string(&candidate)?);
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    if args.format == "json" {
        let status = if outcome.is_persisted() { "ok" } else { "rejected" };
        print_json(&time::command_envelope(
            "submit",
            status,
            serde_json::to_value(&outcome)?,
        ))?;
    } else {
        render_outcome(&outcome);
    }

    match outcome {
        SubmitOutcome::Persisted { .. } => Ok(()),
        SubmitOutcome::Rejected { reasons, .. } => Err(HaccpError::Rejected(
            reasons.iter().map(|r| r.to_string()).collect(),
        )),
    }
}

fn render_outcome(outcome: &SubmitOutcome) {
    let (advisories, warning) = match outcome {
        SubmitOutcome::Persisted {
            advisories,
            directory_warning,
            ..
        }
        | SubmitOutcome::Rejected {
            advisories,
            directory_warning,
            ..
        } => (advisories.as_slice(), directory_warning),
    };
    if let Some(w) = warning {
        eprintln!("{} {}", "warning:".yellow().bold(), w);
    }
    for a in advisories {
        println!("{} {}", "note:".cyan().bold(), a);
    }
    match outcome {
        SubmitOutcome::Persisted { record, .. } => {
            println!(
                "{} batch {} recorded at {} (operator {})",
                "Saved".green().bold(),
                record.batch_id,
                time::format_timestamp(&record.recorded_at),
                record.freezer_operator
            );
        }
        SubmitOutcome::Rejected { reasons, .. } => {
            println!("{} nothing was recorded:", "Rejected".red().bold());
            for r in reasons {
                println!("  - {}", r);
            }
        }
    }
}

fn run_recent(store: &Store, limit: Option<usize>, format: &str) -> Result<(), HaccpError> {
    let log = AppendOnlyLog::for_store(store);
    let limit = limit.unwrap_or(store.config.recent_limit);
    let records = QueryView::new(&log).recent(limit)?;

    if format == "json" {
        return print_json(&time::command_envelope(
            "recent",
            "ok",
            serde_json::json!({ "limit": limit, "records": records }),
        ));
    }
    if records.is_empty() {
        println!("No logs yet. Submit a batch to create the first entry.");
        return Ok(());
    }
    print!("{}", output::record_table(&records));
    Ok(())
}

fn run_export(store: &Store, out: Option<PathBuf>) -> Result<(), HaccpError> {
    let log = AppendOnlyLog::for_store(store);
    match out {
        Some(path) => {
            let summary = log.export_to(&path)?;
            println!(
                "Wrote {} records ({} bytes) to {}",
                summary.records,
                summary.bytes,
                summary.path.display()
            );
            println!("sha256 {}", summary.sha256);
        }
        None => {
            let bytes = QueryView::new(&log).all()?;
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(&bytes)?;
            lock.flush()?;
        }
    }
    Ok(())
}

fn run_find(store: &Store, batch_id: &str, format: &str) -> Result<(), HaccpError> {
    let log = AppendOnlyLog::for_store(store);
    let records = log.find(batch_id)?;
    if format == "json" {
        return print_json(&time::command_envelope(
            "find",
            "ok",
            serde_json::json!({ "batch_id": batch_id.trim(), "count": records.len(), "records": records }),
        ));
    }
    println!("{} record(s) for batch {}", records.len(), batch_id.trim());
    if !records.is_empty() {
        print!("{}", output::record_table(&records));
    }
    Ok(())
}

fn run_verify(store: &Store, format: &str) -> Result<(), HaccpError> {
    let log = AppendOnlyLog::for_store(store);
    let report = log.verify()?;
    if format == "json" {
        let status = if report.is_clean() { "ok" } else { "failed" };
        print_json(&time::command_envelope(
            "verify",
            status,
            serde_json::to_value(&report)?,
        ))?;
    } else if report.is_clean() {
        println!(
            "{} {} records in {}",
            "OK".green().bold(),
            report.records,
            report.path.display()
        );
    } else {
        let lines: Vec<String> = report
            .issues
            .iter()
            .map(|i| format!("line {}: {}", i.line, i.message))
            .collect();
        println!(
            "{} {}",
            "FAILED".red().bold(),
            output::preview_messages(&lines, 3, 80)
        );
        for line in &lines {
            println!("  - {}", line);
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(error::HaccpError::AuditFailed {
            issues: report.issues.len(),
        })
    }
}
