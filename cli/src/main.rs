//! recopy - Remote recordings copy
//!
//! Copies recording directories from a remote host with rsync or scp,
//! retrying failed commands and logging every operation. Can also delete
//! remote items and measure the link speed.

use clap::{Parser, ValueEnum};
use colored::Colorize;
use dialoguer::{Confirm, Input, MultiSelect, Password};
use recopy::{
    AnswerPrompt, ConflictDecision, ConflictPrompt, CopyOrchestrator, Error as RecopyError,
    ErrorCode, JobOutcome, JobReport, MethodPreference, NullSink, PresetConflict, RemoteItem,
    SpeedTest, StatusSink, TerminalSink, TransferBuilder, TransferJob, validate_rename,
};
use serde_json::{Value, json};
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// recopy - Copy recordings from a remote host
///
/// Lists the remote recordings directory, copies the chosen items with
/// rsync or scp and records every step in an activity log.
///
/// Usage:
///   recopy --host HOST --user USER [ITEM...]
///   recopy --host HOST --user USER --list
///   recopy --host HOST --user USER --delete ITEM...
///   recopy --host HOST --user USER --speed-test
#[derive(Parser, Debug)]
#[command(name = "recopy", version, about, long_about = None)]
struct Args {
    /// Items to copy (default: choose interactively from the remote listing)
    items: Vec<String>,

    /// Remote host
    #[arg(long, env = "RECOPY_HOST")]
    host: String,

    /// Remote SSH user
    #[arg(short = 'u', long, env = "RECOPY_USER")]
    user: String,

    /// SSH password, handed to sshpass through its environment
    #[arg(long, env = "RECOPY_SSH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Remote directory holding the recordings
    #[arg(short = 'r', long, default_value = "~/recordings")]
    remote_path: String,

    /// Local directory receiving the recordings
    #[arg(short = 'd', long, default_value = ".")]
    dest: PathBuf,

    /// Transfer method
    #[arg(short = 'm', long, value_enum, default_value = "auto")]
    method: MethodArg,

    /// Attempts for remote commands (connection, sizing, listing, deletes)
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Backoff unit between attempts, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 3)]
    retry_delay: u64,

    /// How many times the transfer itself is launched
    #[arg(long, default_value_t = 1)]
    transfer_attempts: u32,

    /// ssh cipher
    #[arg(long)]
    cipher: Option<String>,

    /// What to do when a destination already exists: ask, skip, overwrite, rename:<name>
    #[arg(short = 'c', long, default_value = "ask", value_parser = parse_conflict_policy)]
    on_conflict: ConflictPolicy,

    /// Whether to delete successfully copied items from the remote
    #[arg(long, value_enum, default_value = "keep")]
    after_copy: AfterCopy,

    /// Activity log file
    #[arg(long, default_value = "recopy.log")]
    log_file: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    output: OutputMode,

    /// List remote items and exit
    #[arg(short = 'l', long)]
    list: bool,

    /// Delete the chosen items from the remote without copying them
    #[arg(long, conflicts_with_all = ["list", "speed_test"])]
    delete: bool,

    /// Time the download of a test file from the remote and exit
    #[arg(long, conflicts_with = "list")]
    speed_test: bool,

    /// Size of the speed test file
    #[arg(long, value_name = "MIB", default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    speed_test_mib: u32,

    /// Disable the progress line
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Assume this many bytes of local free space
    #[arg(long, hide = true, env = "RECOPY_ASSUME_FREE_SPACE")]
    assume_free_space: Option<u64>,
}

/// Password prompts allowed after a failed connection check.
const MAX_PASSWORD_REENTRIES: u32 = 3;

/// What one invocation does after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    List,
    Copy,
    Delete,
    SpeedTest,
}

impl Mode {
    fn of(args: &Args) -> Self {
        if args.list {
            Self::List
        } else if args.speed_test {
            Self::SpeedTest
        } else if args.delete {
            Self::Delete
        } else {
            Self::Copy
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Copy => "copy",
            Self::Delete => "delete",
            Self::SpeedTest => "speed_test",
        }
    }

    /// Whether the mode produces per-item results.
    fn reports_items(self) -> bool {
        matches!(self, Self::Copy | Self::Delete)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    /// Benchmark rsync against scp for every item
    Auto,
    /// Always rsync
    Rsync,
    /// Always scp
    Scp,
}

impl MethodArg {
    fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Rsync => "rsync",
            Self::Scp => "scp",
        }
    }
}

impl From<MethodArg> for MethodPreference {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Auto => MethodPreference::Auto,
            MethodArg::Rsync => MethodPreference::Rsync,
            MethodArg::Scp => MethodPreference::Scp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AfterCopy {
    /// Ask before deleting
    Ask,
    /// Leave the remote untouched
    Keep,
    /// Delete without asking
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConflictPolicy {
    Ask,
    Preset(ConflictDecision),
}

impl ConflictPolicy {
    fn as_str(&self) -> String {
        match self {
            Self::Ask => "ask".to_owned(),
            Self::Preset(ConflictDecision::Skip) => "skip".to_owned(),
            Self::Preset(ConflictDecision::Overwrite) => "overwrite".to_owned(),
            Self::Preset(ConflictDecision::RenameTo(name)) => format!("rename:{name}"),
            Self::Preset(ConflictDecision::Proceed) => "proceed".to_owned(),
        }
    }
}

fn parse_conflict_policy(s: &str) -> Result<ConflictPolicy, String> {
    let lower = s.trim().to_ascii_lowercase();
    match lower.as_str() {
        "ask" => return Ok(ConflictPolicy::Ask),
        "skip" => return Ok(ConflictPolicy::Preset(ConflictDecision::Skip)),
        "overwrite" => return Ok(ConflictPolicy::Preset(ConflictDecision::Overwrite)),
        _ => {}
    }
    if let Some(name) = s.trim().strip_prefix("rename:") {
        return validate_rename(name)
            .map(|valid| ConflictPolicy::Preset(ConflictDecision::RenameTo(valid)))
            .ok_or_else(|| format!("invalid rename target '{name}'"));
    }
    Err(format!(
        "unknown conflict policy '{s}' (expected ask, skip, overwrite or rename:<name>)"
    ))
}

type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Recopy(#[from] RecopyError),

    #[error("Item not found in {remote_path}: {name}")]
    UnknownItem { name: String, remote_path: String },

    #[error("No items given and stdin is not a terminal; pass item names or use --list")]
    NoItemsGiven,

    #[error("--on-conflict rename:<name> needs exactly one item, got {count}")]
    RenameNeedsSingleItem { count: usize },

    #[error("Interactive selection failed: {source}")]
    Select { source: dialoguer::Error },

    #[error("{failed} of {total} item(s) failed")]
    JobsFailed { failed: usize, total: usize },

    #[error("Failed to serialize JSON output: {source}")]
    JsonSerialize { source: serde_json::Error },
}

impl CliError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Recopy(source) => source.code(),
            Self::UnknownItem { .. } | Self::NoItemsGiven | Self::RenameNeedsSingleItem { .. } => {
                ErrorCode::InvalidInput
            }
            Self::Select { .. } => ErrorCode::Prompt,
            Self::JobsFailed { .. } => ErrorCode::CommandFailed,
            Self::JsonSerialize { .. } => ErrorCode::Internal,
        }
    }
}

/// What happened to one selected item.
#[derive(Debug, Clone)]
enum ItemResult {
    /// A copy job, plus the remote delete that may follow it
    Copy { report: JobReport, deleted: Option<bool> },
    /// A delete-only run
    Delete { item: String, error: Option<String> },
}

impl ItemResult {
    fn item(&self) -> &str {
        match self {
            Self::Copy { report, .. } => &report.job.item,
            Self::Delete { item, .. } => item,
        }
    }

    fn outcome_str(&self) -> &'static str {
        match self {
            Self::Copy { report, .. } => match report.outcome {
                JobOutcome::Succeeded => "copied",
                JobOutcome::Failed { .. } => "failed",
                JobOutcome::Skipped(_) => "skipped",
            },
            Self::Delete { error: None, .. } => "deleted",
            Self::Delete { error: Some(_), .. } => "failed",
        }
    }

    fn succeeded(&self) -> bool {
        matches!(self.outcome_str(), "copied" | "deleted")
    }

    fn failed(&self) -> bool {
        self.outcome_str() == "failed"
    }

    fn to_json_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("item".to_owned(), Value::String(self.item().to_owned()));
        obj.insert("outcome".to_owned(), Value::String(self.outcome_str().to_owned()));

        let (report, deleted) = match self {
            Self::Copy { report, deleted } => (report, *deleted),
            Self::Delete { error, .. } => {
                if let Some(message) = error {
                    obj.insert("error_message".to_owned(), Value::String(message.clone()));
                }
                return Value::Object(obj);
            }
        };

        obj.insert(
            "destination".to_owned(),
            Value::String(display_path(&report.job.destination)),
        );
        obj.insert("attempts".to_owned(), Value::Number(report.attempts.into()));
        obj.insert(
            "elapsed_secs".to_owned(),
            json!((report.elapsed.as_secs_f64() * 10.0).round() / 10.0),
        );

        if let Some(method) = report.job.method {
            obj.insert("method".to_owned(), Value::String(method.as_str().to_owned()));
        }
        if let Some(total) = report.job.total_size {
            obj.insert("total_size".to_owned(), Value::Number(total.into()));
        }
        if report.outcome.is_success() {
            obj.insert(
                "bytes_transferred".to_owned(),
                Value::Number(report.bytes_transferred.into()),
            );
            obj.insert("bytes_estimated".to_owned(), Value::Bool(report.bytes_estimated));
        }
        match &report.outcome {
            JobOutcome::Failed { exit_code, reason } => {
                if let Some(code) = exit_code {
                    obj.insert("exit_code".to_owned(), Value::Number((*code).into()));
                }
                obj.insert("error_message".to_owned(), Value::String(reason.clone()));
            }
            JobOutcome::Skipped(reason) => {
                obj.insert("skip_reason".to_owned(), Value::String(reason.to_string()));
            }
            JobOutcome::Succeeded => {}
        }
        if let Some(deleted) = deleted {
            obj.insert("remote_deleted".to_owned(), Value::Bool(deleted));
        }

        Value::Object(obj)
    }
}

fn exit_code_for(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::InvalidInput => 2,
        ErrorCode::Cancelled => 130,
        _ => 1,
    }
}

fn main() {
    if let Err(error) = run() {
        if let CliError::Recopy(RecopyError::Cancelled { item, partial }) = &error {
            eprintln!("Cancelled during {item}.");
            if let Some(path) = partial {
                eprintln!(
                    "Partial data may remain in {}; re-copy it with --on-conflict overwrite.",
                    path.display()
                );
            }
            std::process::exit(130);
        }
        eprintln!("error[{}]: {}", error.code(), error);
        std::process::exit(exit_code_for(error.code()));
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (tests, embedding) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn run() -> CliResult<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let human = args.output == OutputMode::Human;
    let mode = Mode::of(&args);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel_clone = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel_clone.load(Ordering::Relaxed) {
                eprintln!("\nForce quit.");
                std::process::exit(130);
            }
            cancel_clone.store(true, Ordering::Relaxed);
            eprintln!("\nCancelling... stopping the current transfer. Press Ctrl+C again to abort immediately.");
        })
        .ok();
    }

    if human {
        print_banner();
    }

    let mut orchestrator = build_orchestrator(&args, cancel)?;

    if human {
        println!("Testing SSH connection to {}@{}...", args.user, args.host);
    }
    orchestrator.connect(&mut credential_prompt(), MAX_PASSWORD_REENTRIES)?;
    if human {
        println!("{} SSH connection successful", "✓".green());
    }
    orchestrator
        .log_mut()
        .session_start(&args.host, &args.user, &args.remote_path);

    let mut results = Vec::new();
    let result = run_session(&args, mode, &mut orchestrator, &mut results);

    let successful = results.iter().filter(|r| r.succeeded()).count();
    orchestrator.log_mut().session_end(results.len(), successful);

    if mode.reports_items() && (result.is_ok() || !results.is_empty()) {
        emit_results(&args, mode, &results)?;
    }
    result?;

    let failed = results.iter().filter(|r| r.failed()).count();
    if failed > 0 {
        return Err(CliError::JobsFailed {
            failed,
            total: results.len(),
        });
    }
    Ok(())
}

/// Asks for a new password after a failed connection check.
///
/// Reads one line from stdin when it is not a terminal; an empty line or
/// end of input gives up.
fn credential_prompt() -> impl FnMut(&str, &RecopyError) -> recopy::Result<Option<String>> {
    |login: &str, failure: &RecopyError| {
        eprintln!("{} {}", "✗".red(), failure);
        let password = if std::io::stdin().is_terminal() {
            Password::new()
                .with_prompt(format!("Password for {login} (empty to give up)"))
                .allow_empty_password(true)
                .interact()
                .map_err(|e| RecopyError::Prompt(e.to_string()))?
        } else {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| RecopyError::Prompt(e.to_string()))?;
            line.trim_end_matches(['\r', '\n']).to_owned()
        };
        Ok(Some(password).filter(|p| !p.is_empty()))
    }
}

fn build_orchestrator(args: &Args, cancel: Arc<AtomicBool>) -> CliResult<CopyOrchestrator> {
    let sink: Box<dyn StatusSink> = if args.output == OutputMode::Human && !args.quiet {
        Box::new(TerminalSink::new())
    } else {
        Box::new(NullSink)
    };

    let mut builder = TransferBuilder::new(&args.user, &args.host)
        .method(args.method.into())
        .retries(args.retries)
        .retry_delay(Duration::from_secs(args.retry_delay))
        .transfer_attempts(args.transfer_attempts)
        .log_file(&args.log_file)
        .status_sink(sink)
        .cancel_token(cancel);
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    if let Some(cipher) = &args.cipher {
        builder = builder.cipher(cipher);
    }
    if let Some(bytes) = args.assume_free_space {
        builder = builder.free_space(bytes);
    }

    if args.verbose && args.output == OutputMode::Human {
        let config = builder.transfer_config();
        eprintln!("Effective configuration:");
        eprintln!("  method: {}", args.method.as_str());
        eprintln!("  retries: {} (delay unit {:?})", config.retry.max_attempts, config.retry.base_delay);
        eprintln!("  transfer_attempts: {}", config.transfer_attempts);
        eprintln!("  cipher: {}", config.ssh.cipher);
        eprintln!("  on_conflict: {}", args.on_conflict.as_str());
        eprintln!("  log_file: {}", args.log_file.display());
        eprintln!("  output_mode: {}", args.output.as_str());
    }

    Ok(builder.build()?)
}

/// Runs the chosen mode, pushing each item's result into `results` as soon
/// as it is known.
fn run_session(
    args: &Args,
    mode: Mode,
    orchestrator: &mut CopyOrchestrator,
    results: &mut Vec<ItemResult>,
) -> CliResult<()> {
    let human = args.output == OutputMode::Human;

    if mode == Mode::SpeedTest {
        return speed_test(args, orchestrator);
    }

    if human {
        println!("Retrieving folder list and sizes from {}...", args.remote_path);
    }
    let listing = {
        let (session, retry) = orchestrator.remote();
        session.list_items(retry, &args.remote_path)?
    };
    orchestrator.log_mut().record(
        "LIST",
        &args.remote_path,
        "SUCCESS",
        &format!("{} item(s)", listing.len()),
    );

    if mode == Mode::List {
        return emit_listing(args.output, &listing);
    }

    let selected = select_items(args, mode, &listing)?;
    if selected.is_empty() {
        if human {
            println!("No items selected.");
        }
        return Ok(());
    }

    if mode == Mode::Delete {
        return delete_items(args, orchestrator, &selected, results);
    }

    if let ConflictPolicy::Preset(ConflictDecision::RenameTo(_)) = args.on_conflict
        && selected.len() != 1
    {
        return Err(CliError::RenameNeedsSingleItem {
            count: selected.len(),
        });
    }

    let mut prompt: Box<dyn ConflictPrompt> = match &args.on_conflict {
        ConflictPolicy::Ask => Box::new(interactive_prompt()),
        ConflictPolicy::Preset(decision) => Box::new(PresetConflict(decision.clone())),
    };

    for (index, item) in selected.iter().enumerate() {
        let job = TransferJob::new(&item.name, &args.remote_path, args.dest.join(&item.name))
            .with_estimated_size(item.estimated_size());

        if human {
            println!(
                "\n[{}/{}] {} ({})",
                index + 1,
                selected.len(),
                item.name.bold(),
                item.size_label
            );
        }

        let report = orchestrator.run(job, prompt.as_mut())?;
        if human {
            print_outcome(&report);
        }
        results.push(ItemResult::Copy {
            report,
            deleted: None,
        });
    }

    after_copy(args, orchestrator, results)
}

fn speed_test(args: &Args, orchestrator: &mut CopyOrchestrator) -> CliResult<()> {
    if args.output == OutputMode::Human {
        println!("Running speed test with a {} MiB file...", args.speed_test_mib);
    }
    let test = orchestrator.speed_test(args.speed_test_mib)?;
    emit_speed_test(args, &test)
}

fn delete_items(
    args: &Args,
    orchestrator: &mut CopyOrchestrator,
    selected: &[RemoteItem],
    results: &mut Vec<ItemResult>,
) -> CliResult<()> {
    let human = args.output == OutputMode::Human;

    if std::io::stdin().is_terminal() {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Permanently delete {} item(s) from {}:{}?",
                selected.len(),
                args.host,
                args.remote_path
            ))
            .default(false)
            .interact()
            .map_err(|source| CliError::Select { source })?;
        if !confirmed {
            if human {
                println!("Nothing deleted.");
            }
            return Ok(());
        }
    }

    for item in selected {
        if orchestrator.config().is_cancelled() {
            return Err(RecopyError::Cancelled {
                item: item.name.clone(),
                partial: None,
            }
            .into());
        }
        let error = orchestrator
            .delete_remote(&args.remote_path, &item.name)
            .err()
            .map(|e| e.to_string());
        if human {
            match &error {
                None => println!("{} Deleted remote {}", "✓".green(), item.name),
                Some(e) => println!("{} Could not delete remote {}: {}", "✗".red(), item.name, e),
            }
        }
        results.push(ItemResult::Delete {
            item: item.name.clone(),
            error,
        });
    }
    Ok(())
}

fn select_items(args: &Args, mode: Mode, listing: &[RemoteItem]) -> CliResult<Vec<RemoteItem>> {
    if !args.items.is_empty() {
        return args
            .items
            .iter()
            .map(|name| {
                listing
                    .iter()
                    .find(|item| item.name == *name)
                    .cloned()
                    .ok_or_else(|| CliError::UnknownItem {
                        name: name.clone(),
                        remote_path: args.remote_path.clone(),
                    })
            })
            .collect();
    }

    if !std::io::stdin().is_terminal() {
        return Err(CliError::NoItemsGiven);
    }
    if listing.is_empty() {
        return Ok(Vec::new());
    }

    let labels: Vec<String> = listing
        .iter()
        .map(|item| format!("{} ({})", item.name, item.size_label))
        .collect();
    let chosen = MultiSelect::new()
        .with_prompt(format!(
            "Select items to {} (space to toggle, enter to confirm)",
            mode.as_str()
        ))
        .items(&labels)
        .interact()
        .map_err(|source| CliError::Select { source })?;
    Ok(chosen.into_iter().map(|i| listing[i].clone()).collect())
}

fn interactive_prompt() -> impl ConflictPrompt {
    AnswerPrompt::new(
        |question: &str| {
            Input::<String>::new()
                .with_prompt(question)
                .allow_empty(true)
                .interact_text()
                .map_err(|e| RecopyError::Prompt(e.to_string()))
        },
        |message: &str| println!("{} {}", "!".yellow(), message),
    )
}

fn after_copy(args: &Args, orchestrator: &mut CopyOrchestrator, results: &mut [ItemResult]) -> CliResult<()> {
    let copied = results.iter().filter(|r| r.succeeded()).count();
    if copied == 0 || args.after_copy == AfterCopy::Keep {
        return Ok(());
    }

    if args.after_copy == AfterCopy::Ask {
        if !std::io::stdin().is_terminal() {
            tracing::warn!("stdin is not a terminal, keeping remote items");
            return Ok(());
        }
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete {copied} copied item(s) from {}:{}?",
                args.host, args.remote_path
            ))
            .default(false)
            .interact()
            .map_err(|source| CliError::Select { source })?;
        if !confirmed {
            return Ok(());
        }
    }

    let human = args.output == OutputMode::Human;
    for result in results.iter_mut() {
        let ItemResult::Copy { report, deleted } = result else {
            continue;
        };
        if !report.outcome.is_success() {
            continue;
        }
        let item = report.job.item.as_str();
        match orchestrator.delete_remote(&args.remote_path, item) {
            Ok(()) => {
                *deleted = Some(true);
                if human {
                    println!("{} Deleted remote {}", "✓".green(), item);
                }
            }
            Err(e) => {
                *deleted = Some(false);
                if human {
                    println!("{} Could not delete remote {}: {}", "✗".red(), item, e);
                }
            }
        }
    }
    Ok(())
}

fn print_banner() {
    let rule = "=".repeat(60);
    println!("{rule}");
    println!("{}", "  recopy - Remote Recordings Copy".bold());
    println!("{rule}");
}

fn print_outcome(report: &JobReport) {
    match &report.outcome {
        JobOutcome::Succeeded => {
            let method = report.job.method.map_or("?", |m| m.as_str());
            let size = if report.bytes_estimated {
                format!("~{}", format_bytes(report.bytes_transferred))
            } else {
                format_bytes(report.bytes_transferred)
            };
            println!(
                "{} Copied {} ({}) via {} in {:.1}s -> {}",
                "✓".green(),
                report.job.item,
                size,
                method,
                report.elapsed.as_secs_f64(),
                report.job.destination.display()
            );
        }
        JobOutcome::Failed { reason, .. } => {
            println!("{} Failed {}: {}", "✗".red(), report.job.item, reason);
            println!(
                "  Partial data may remain in {}; re-copy with overwrite.",
                report.job.destination.display()
            );
        }
        JobOutcome::Skipped(reason) => {
            println!("{} Skipped {}: {}", "-".yellow(), report.job.item, reason);
        }
    }
}

fn emit_listing(output_mode: OutputMode, listing: &[RemoteItem]) -> CliResult<()> {
    match output_mode {
        OutputMode::Human => {
            println!("Items ({}):", listing.len());
            for (i, item) in listing.iter().enumerate() {
                println!("  {:>3}. {:<40} {}", i + 1, item.name, item.size_label);
            }
            Ok(())
        }
        OutputMode::Json => {
            let items: Vec<Value> = listing
                .iter()
                .map(|item| {
                    json!({
                        "name": item.name,
                        "size": item.size_label,
                        "estimated_bytes": item.estimated_size(),
                    })
                })
                .collect();
            print_json_value(&json!({
                "schema_version": "1.0",
                "mode": "list",
                "items": items,
            }))
        }
    }
}

fn emit_speed_test(args: &Args, test: &SpeedTest) -> CliResult<()> {
    match args.output {
        OutputMode::Human => {
            println!(
                "{} Download speed: {:.1} Mbps ({:.1} MiB/s, {} in {:.1}s)",
                "✓".green(),
                test.megabits_per_sec(),
                test.mib_per_sec(),
                format_bytes(test.bytes),
                test.elapsed.as_secs_f64()
            );
            Ok(())
        }
        OutputMode::Json => print_json_value(&json!({
            "schema_version": "1.0",
            "mode": Mode::SpeedTest.as_str(),
            "host": args.host,
            "bytes": test.bytes,
            "elapsed_secs": (test.elapsed.as_secs_f64() * 100.0).round() / 100.0,
            "mbps": (test.megabits_per_sec() * 10.0).round() / 10.0,
            "mib_per_sec": (test.mib_per_sec() * 10.0).round() / 10.0,
        })),
    }
}

fn emit_results(args: &Args, mode: Mode, results: &[ItemResult]) -> CliResult<()> {
    match args.output {
        OutputMode::Human => {
            if results.is_empty() {
                return Ok(());
            }
            print_summary(mode, results);
            Ok(())
        }
        OutputMode::Json => {
            let payload = json!({
                "schema_version": "1.0",
                "mode": mode.as_str(),
                "host": args.host,
                "user": args.user,
                "remote_path": args.remote_path,
                "items": results.iter().map(ItemResult::to_json_value).collect::<Vec<Value>>(),
            });
            print_json_value(&payload)
        }
    }
}

fn print_summary(mode: Mode, results: &[ItemResult]) {
    let succeeded = results.iter().filter(|r| r.succeeded()).count();
    let failed = results.iter().filter(|r| r.failed()).count();
    let skipped = results.len() - succeeded - failed;

    println!("\nSummary:");
    for result in results {
        let marker = if result.succeeded() {
            "✓".green()
        } else if result.failed() {
            "✗".red()
        } else {
            "-".yellow()
        };
        let size = match result {
            ItemResult::Copy { report, .. } if report.outcome.is_success() => {
                format_bytes(report.bytes_transferred)
            }
            _ => String::new(),
        };
        println!(
            "  {} {:<40} {:<8} {:>12}",
            marker,
            result.item(),
            result.outcome_str(),
            size
        );
    }
    match mode {
        Mode::Delete => println!("Deleted {succeeded}, failed {failed}"),
        _ => println!("Copied {succeeded}, skipped {skipped}, failed {failed}"),
    }
}

fn print_json_value(value: &Value) -> CliResult<()> {
    let serialized =
        serde_json::to_string(value).map_err(|source| CliError::JsonSerialize { source })?;
    println!("{serialized}");
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TiB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
