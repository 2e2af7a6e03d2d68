//! # recopy
//!
//! Retrying, progress-tracked copies of remote directories over rsync or scp.
//!
//! ## Core Features
//!
//! - **Method selection**: Benchmarks rsync against scp on a small probe file, or uses a pinned method
//! - **Live progress**: Parses `rsync --info=progress2` output into a throttled status line with throughput and ETA
//! - **Monotonic progress**: Noisy percent signals never move the displayed progress backwards
//! - **Bounded retries**: Linear backoff for every remote command, including the transfer itself
//! - **Conflict policy**: Skip, overwrite or rename when the local destination already exists
//! - **Free-space guard**: Items that cannot fit locally are skipped before any data moves
//! - **Activity log**: Append-only, session-delimited record of every operation
//! - **Cooperative cancellation**: A shared flag stops the running child and cleans up scratch files
//! - **Speed test**: Timed pull of a remote probe file, reported in Mbps
//!
//! ## Quick Start with Builder API
//!
//! ```no_run
//! use recopy::{ConflictDecision, PresetConflict, TransferBuilder};
//!
//! let report = TransferBuilder::new("ops", "10.2.2.2")
//!     .password("secret")
//!     .log_file("recopy.log")
//!     .copy("rec_0412", "/data/recordings", "./store", &mut PresetConflict(ConflictDecision::Skip))?;
//!
//! println!("{:?}: {} bytes", report.outcome, report.bytes_transferred);
//! # Ok::<(), recopy::Error>(())
//! ```
//!
//! ## Orchestrator API
//!
//! For full control, build the pieces yourself:
//!
//! ```no_run
//! use recopy::{
//!     CopyOrchestrator, MethodPreference, PresetConflict, ConflictDecision, RemoteSession,
//!     RemoteTarget, SessionLog, TransferConfig, TransferJob,
//! };
//!
//! let config = TransferConfig::default().with_method(MethodPreference::Rsync);
//! let session = RemoteSession::system(RemoteTarget::new("ops", "10.2.2.2"), config.ssh.clone());
//! let mut orchestrator = CopyOrchestrator::new(config, session)
//!     .with_log(SessionLog::open("recopy.log")?);
//!
//! orchestrator.check_connection()?;
//! let (session, retry) = orchestrator.remote();
//! let items = session.list_items(retry, "/data/recordings")?;
//! for item in items {
//!     let job = TransferJob::new(&item.name, "/data/recordings", format!("./store/{}", item.name))
//!         .with_estimated_size(item.estimated_size());
//!     let report = orchestrator.run(job, &mut PresetConflict(ConflictDecision::Overwrite))?;
//!     println!("{}: {:?}", item.name, report.outcome);
//! }
//! # Ok::<(), recopy::Error>(())
//! ```
//!
//! ## Job Lifecycle
//!
//! Every job moves through `ResolvingDestination → SizingSource →
//! SelectingMethod → Transferring → Finalizing` and ends `Succeeded`,
//! `Failed` or `Skipped` (see [`JobState`]):
//!
//! - A failed size query degrades to percent-only progress; it never fails the job.
//! - A failed transfer keeps its exit code in [`JobOutcome::Failed`].
//! - Partial destinations are left in place; rerun with [`ConflictDecision::Overwrite`].
//!
//! ## Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `progress` | Terminal status line with indicatif ([`TerminalSink`]) |
//! | `serde` | Serialize/Deserialize for [`TransferConfig`] and job outcomes |
//! | `full` | Enable all optional features |
//!
//! ## External Tools
//!
//! `ssh`, `rsync` and `scp` must be on `PATH`; `sshpass` too when a password
//! is used. Remote hosts need `du`, `rm` and `dd`.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod builder;
mod command;
mod conflict;
mod error;
mod options;
mod orchestrator;
mod parser;
mod progress;
mod remote;
mod retry;
mod selector;
mod session_log;
mod utils;

pub use builder::TransferBuilder;
pub use command::{
    CommandOutput, CommandSpec, StreamObserver, SystemTransport, Transport, shell_quote,
    split_progress_lines,
};
pub use conflict::{
    AnswerPrompt, ConflictAnswer, ConflictDecision, ConflictPrompt, PresetConflict, Resolution,
    decide, parse_conflict_answer, resolve_destination, validate_rename,
};
pub use error::{Error, ErrorCode, Result, io_error_code, is_no_space_error};
pub use options::{MethodPreference, SshOptions, TransferConfig, TransferMethod};
pub use orchestrator::{
    CopyOrchestrator, JobOutcome, JobReport, JobState, SkipReason, TransferJob, scp_estimated_bytes,
};
pub use parser::{ProgressSignal, TransferProgressParser, bytes_for_percent, parse_line};
pub use progress::{
    ESTIMATED_BYTES_PER_PERCENT, Estimate, NullSink, ProgressState, ProgressTracker, StatusSink,
    estimate, format_hms,
};
pub use remote::{
    CredentialPrompt, RemoteItem, RemoteSession, RemoteTarget, join_remote, parse_du_bytes,
    parse_du_listing, parse_size_label, quote_remote_path,
};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy, Sleeper, ThreadSleeper};
pub use selector::{
    BenchmarkResult, MethodSelection, SelectionReason, SpeedTest, TransferMethodSelector,
};
pub use session_log::{SessionLog, format_record};
pub use utils::space::available_space;

#[cfg(feature = "progress")]
#[cfg_attr(docsrs, doc(cfg(feature = "progress")))]
pub use progress::TerminalSink;
