//! The per-job copy state machine.
//!
//! ```text
//! ResolvingDestination → SizingSource → SelectingMethod → Transferring → Finalizing
//!          │                  │               │                               │
//!          └── Skipped        └── Skipped (insufficient space)                └── Succeeded | Failed
//! ```
//!
//! [`CopyOrchestrator::run`] drives one [`TransferJob`] through these states
//! and returns a [`JobReport`]. Failures of the remote side (sizing, the
//! transfer itself) end up in [`JobOutcome`]; only a failing conflict prompt
//! or a cancellation is returned as `Err`.
//!
//! The cancel token from [`TransferConfig`] is checked between states and
//! polled while the transfer runs. A cancelled transfer is killed, the
//! benchmark scratch files are removed, and
//! [`Error::Cancelled`] names the partial destination.
//!
//! One job runs at a time. The transfer subprocess runs alongside the
//! orchestrating thread, which blocks reading its output and feeds every
//! line through [`TransferProgressParser`] into a [`ProgressTracker`].
//! Partially copied destinations are left in place when a job fails;
//! rerunning with [`ConflictDecision::Overwrite`] starts clean.

use crate::command::{CommandOutput, StreamObserver};
use crate::conflict::{self, ConflictDecision, ConflictPrompt, Resolution};
use crate::error::{Error, Result};
use crate::options::{TransferConfig, TransferMethod};
use crate::parser::{ProgressSignal, TransferProgressParser};
use crate::progress::{NullSink, ProgressState, ProgressTracker, StatusSink};
use crate::remote::{CredentialPrompt, RemoteSession, join_remote};
use crate::retry::{RetryExecutor, Sleeper};
use crate::selector::{MethodSelection, SpeedTest, TransferMethodSelector};
use crate::session_log::SessionLog;
use crate::utils::space::available_space;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often the transfer loop wakes up when the tool is silent.
const STREAM_TICK: Duration = Duration::from_millis(500);

const MIB: f64 = 1024.0 * 1024.0;

/// One remote item to copy to one local destination.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferJob {
    /// Item name inside `remote_path`
    pub item: String,
    /// Remote directory holding the item
    pub remote_path: String,
    /// Local directory that receives the item
    pub destination: PathBuf,
    /// Exact size in bytes, filled in while sizing; `None` when unknown
    pub total_size: Option<u64>,
    /// Rough size from a listing, used only by the free-space guard
    pub estimated_size: Option<u64>,
    /// Method used, filled in after selection
    pub method: Option<TransferMethod>,
}

impl TransferJob {
    /// New job with nothing known about its size or method.
    pub fn new(item: impl Into<String>, remote_path: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            item: item.into(),
            remote_path: remote_path.into(),
            destination: destination.into(),
            total_size: None,
            estimated_size: None,
            method: None,
        }
    }

    /// Attach a size estimate (for example from a `du -h` listing).
    #[must_use]
    pub fn with_estimated_size(mut self, bytes: Option<u64>) -> Self {
        self.estimated_size = bytes;
        self
    }

    /// Full remote path of the item.
    pub fn remote_source(&self) -> String {
        join_remote(&self.remote_path, &self.item)
    }
}

/// States of a job, in the order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobState {
    ResolvingDestination,
    SizingSource,
    SelectingMethod,
    Transferring,
    Finalizing,
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolvingDestination => "resolving destination",
            Self::SizingSource => "sizing source",
            Self::SelectingMethod => "selecting method",
            Self::Transferring => "transferring",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Why a job was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SkipReason {
    /// The destination existed and the user chose to skip
    UserSkipped,
    /// The item does not fit on the local filesystem
    InsufficientSpace {
        /// Bytes the item needs
        required: u64,
        /// Bytes available at the destination
        available: u64,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserSkipped => f.write_str("destination exists, skipped by user"),
            Self::InsufficientSpace { required, available } => write!(
                f,
                "insufficient space: need {:.1} MiB, {:.1} MiB available",
                *required as f64 / MIB,
                *available as f64 / MIB
            ),
        }
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobOutcome {
    /// The transfer exited 0
    Succeeded,
    /// The job could not complete
    Failed {
        /// Exit code of the last transfer attempt, `None` if it never ran
        exit_code: Option<i32>,
        /// Short human-readable cause
        reason: String,
    },
    /// The job was not attempted
    Skipped(SkipReason),
}

impl JobOutcome {
    /// Final [`JobState`] for this outcome.
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded => JobState::Succeeded,
            Self::Failed { .. } => JobState::Failed,
            Self::Skipped(_) => JobState::Skipped,
        }
    }

    /// Whether the job succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Everything known about a finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    /// The job, with final destination, size and method filled in
    pub job: TransferJob,
    /// How it ended
    pub outcome: JobOutcome,
    /// Conflict decision taken for the destination
    pub decision: ConflictDecision,
    /// How the method was chosen, if the job got that far
    pub selection: Option<MethodSelection>,
    /// Transfer attempts made (0 if no transfer was launched)
    pub attempts: u32,
    /// Wall-clock time of the whole job
    pub elapsed: Duration,
    /// Bytes transferred as tracked by the progress state
    pub bytes_transferred: u64,
    /// Whether `bytes_transferred` is an estimate rather than a measurement
    pub bytes_estimated: bool,
    /// States visited, in order
    pub states: Vec<JobState>,
}

/// Drives [`TransferJob`]s through the copy state machine.
pub struct CopyOrchestrator {
    config: TransferConfig,
    session: RemoteSession,
    retry: RetryExecutor,
    log: SessionLog,
    sink: Box<dyn StatusSink>,
    selector: TransferMethodSelector,
}

impl fmt::Debug for CopyOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOrchestrator")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl CopyOrchestrator {
    /// Orchestrator with no activity log and no status output.
    pub fn new(config: TransferConfig, session: RemoteSession) -> Self {
        let retry = RetryExecutor::new(config.retry).with_cancel_token(config.cancel_token.clone());
        let selector = TransferMethodSelector::from_config(&config);
        Self {
            config,
            session,
            retry,
            log: SessionLog::disabled(),
            sink: Box::new(NullSink),
            selector,
        }
    }

    /// Record activity to `log`.
    #[must_use]
    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    /// Render status lines to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use `sleeper` for retry backoff.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.retry = RetryExecutor::with_sleeper(self.config.retry, sleeper)
            .with_cancel_token(self.config.cancel_token.clone());
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// The remote session, for listing and deleting outside of jobs.
    pub fn session_mut(&mut self) -> &mut RemoteSession {
        &mut self.session
    }

    /// The retry executor shared by all remote commands.
    pub fn retry_mut(&mut self) -> &mut RetryExecutor {
        &mut self.retry
    }

    /// Session and retry executor together.
    pub fn remote(&mut self) -> (&mut RemoteSession, &mut RetryExecutor) {
        (&mut self.session, &mut self.retry)
    }

    /// The activity log.
    pub fn log_mut(&mut self) -> &mut SessionLog {
        &mut self.log
    }

    /// Verify the base ssh connection.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionFailed`](crate::Error::ConnectionFailed) when
    /// the host cannot be reached.
    pub fn check_connection(&mut self) -> Result<()> {
        let result = self.session.check_connection(&mut self.retry);
        match &result {
            Ok(()) => self.log.record("CONNECT", &self.session.target().host, "SUCCESS", ""),
            Err(e) => self
                .log
                .record("CONNECT", &self.session.target().host, "FAILED", &e.to_string()),
        }
        result
    }

    /// Verify the connection, asking `prompt` for a new password after each
    /// failure, at most `max_reentries` times.
    ///
    /// # Errors
    ///
    /// The last [`Error::ConnectionFailed`] once `prompt` gives up or the
    /// re-entries run out; prompt errors are passed through.
    pub fn connect(&mut self, prompt: &mut dyn CredentialPrompt, max_reentries: u32) -> Result<()> {
        let mut reentries = 0;
        loop {
            let failure = match self.check_connection() {
                Ok(()) => return Ok(()),
                Err(e @ Error::ConnectionFailed { .. }) => e,
                Err(e) => return Err(e),
            };
            if reentries >= max_reentries || self.config.is_cancelled() {
                return Err(failure);
            }
            let login = self.session.target().login();
            let Some(password) = prompt.password(&login, &failure)? else {
                return Err(failure);
            };
            reentries += 1;
            self.session.set_password(password);
            tracing::info!(login = %login, reentries, "retrying with new credentials");
            self.log.record(
                "CREDENTIALS",
                &self.session.target().host,
                "REENTERED",
                &format!("re-entry {reentries} of {max_reentries}"),
            );
        }
    }

    /// Time a pull of a fresh `size_mib` MiB remote file, logging the result.
    ///
    /// # Errors
    ///
    /// See [`TransferMethodSelector::speed_test`].
    pub fn speed_test(&mut self, size_mib: u32) -> Result<SpeedTest> {
        let result = self
            .selector
            .speed_test(&mut self.session, &mut self.retry, size_mib);
        let host = self.session.target().host.clone();
        match &result {
            Ok(test) => self.log.record(
                "SPEED_TEST",
                &host,
                "SUCCESS",
                &format!(
                    "{size_mib} MiB in {:.2}s | {:.1} Mbps ({:.1} MiB/s)",
                    test.elapsed.as_secs_f64(),
                    test.megabits_per_sec(),
                    test.mib_per_sec()
                ),
            ),
            Err(e) => self.log.record("SPEED_TEST", &host, "FAILED", &e.to_string()),
        }
        result
    }

    /// Delete `item` from `remote_path` on the remote, logging the outcome.
    ///
    /// # Errors
    ///
    /// [`Error::CommandFailed`](crate::Error::CommandFailed) when the delete
    /// keeps failing.
    pub fn delete_remote(&mut self, remote_path: &str, item: &str) -> Result<()> {
        let result = self.session.delete_item(&mut self.retry, remote_path, item);
        match &result {
            Ok(()) => self.log.record("DELETE", item, "SUCCESS", &join_remote(remote_path, item)),
            Err(e) => self.log.record("DELETE", item, "FAILED", &e.to_string()),
        }
        result
    }

    /// Run one job to completion.
    ///
    /// `prompt` is consulted only when the destination already exists.
    ///
    /// # Errors
    ///
    /// Errors from `prompt` itself, and [`Error::Cancelled`] once the cancel
    /// token fires. Everything else is reported in the returned
    /// [`JobReport`].
    pub fn run(&mut self, job: TransferJob, prompt: &mut dyn ConflictPrompt) -> Result<JobReport> {
        let Self {
            config,
            session,
            retry,
            log,
            sink,
            selector,
        } = self;

        let started = Instant::now();
        let mut job = job;
        let mut states = vec![JobState::ResolvingDestination];
        let item = job.item.clone();
        let cancelled = |partial: Option<PathBuf>| Error::Cancelled {
            item: item.clone(),
            partial,
        };
        if config.is_cancelled() {
            return Err(cancelled(None));
        }

        let finish = |job: TransferJob,
                      outcome: JobOutcome,
                      decision: ConflictDecision,
                      mut states: Vec<JobState>| {
            states.push(outcome.state());
            JobReport {
                job,
                outcome,
                decision,
                selection: None,
                attempts: 0,
                elapsed: started.elapsed(),
                bytes_transferred: 0,
                bytes_estimated: false,
                states,
            }
        };

        // ResolvingDestination
        let exists = job.destination.exists();
        let decision = conflict::decide(&job.destination, prompt)?;
        let (destination, remove_existing) =
            match conflict::resolve_destination(&job.destination, exists, &decision) {
                Resolution::Skip => {
                    log.record("COPY_SKIPPED", &item, "USER_SKIP", "User chose to skip existing destination");
                    return Ok(finish(job, JobOutcome::Skipped(SkipReason::UserSkipped), decision, states));
                }
                Resolution::Copy {
                    destination,
                    remove_existing,
                } => (destination, remove_existing),
            };
        if let ConflictDecision::RenameTo(name) = &decision {
            log.record("COPY_RENAMED", &item, "RENAMED", &format!("Renamed to: {name}"));
        }
        if remove_existing {
            if let Err(e) = remove_tree(&destination) {
                let reason = format!("could not remove existing {}: {e}", destination.display());
                log.record("COPY_OVERWRITE", &item, "FAILED", &reason);
                return Ok(finish(
                    job,
                    JobOutcome::Failed {
                        exit_code: None,
                        reason,
                    },
                    decision,
                    states,
                ));
            }
            log.record(
                "COPY_OVERWRITE",
                &item,
                "OVERWRITE",
                &format!("Existing destination removed: {}", destination.display()),
            );
        }
        job.destination = destination;

        // SizingSource
        states.push(JobState::SizingSource);
        job.total_size = session
            .measure_size(retry, &job.remote_source())
            .filter(|&size| size > 0);
        match job.total_size {
            Some(size) => log.record(
                "COPY_SIZE_CHECK",
                &item,
                "SUCCESS",
                &format!("{size} bytes ({:.1} MiB)", size as f64 / MIB),
            ),
            None => log.record(
                "COPY_SIZE_CHECK",
                &item,
                "FAILED",
                "Could not determine size, continuing with percent-only progress",
            ),
        }

        if config.is_cancelled() {
            return Err(cancelled(None));
        }
        if let Some(reason) = check_free_space(config, &job) {
            tracing::warn!(item = %item, %reason, "skipping");
            log.record("COPY_SKIPPED", &item, "INSUFFICIENT_SPACE", &reason.to_string());
            return Ok(finish(job, JobOutcome::Skipped(reason), decision, states));
        }

        // SelectingMethod
        states.push(JobState::SelectingMethod);
        let selection = selector.select(session, retry);
        let method = selection.method;
        job.method = Some(method);
        if config.is_cancelled() {
            log.record("COPY_CANCELLED", &item, "CANCELLED", "Cancelled during method selection");
            return Err(cancelled(None));
        }
        log.record("COPY_METHOD", &item, "SELECTED", &selection.describe());

        // Transferring
        states.push(JobState::Transferring);
        if let Err(e) = std::fs::create_dir_all(&job.destination) {
            let reason = format!("cannot create {}: {e}", job.destination.display());
            log.record("COPY_FAILED", &item, "FAILED", &reason);
            let mut report = finish(
                job,
                JobOutcome::Failed {
                    exit_code: None,
                    reason,
                },
                decision,
                states,
            );
            report.selection = Some(selection);
            return Ok(report);
        }

        let spec = session
            .target()
            .transfer_command(method, session.ssh(), &job.remote_source(), &job.destination);
        log.record(
            "COPY_START",
            &item,
            "STARTED",
            &format!("{} -> {} via {method}", job.remote_source(), job.destination.display()),
        );
        tracing::info!(item = %item, %method, total = ?job.total_size, "transfer starting");

        let mut tracker = ProgressTracker::new(format!("Copying {item}"), job.total_size, sink.as_mut())
            .with_render_interval(config.render_interval);
        let scp_estimate = match (method, job.total_size) {
            (TransferMethod::Scp, Some(total)) => {
                tracker.set_estimated(true);
                Some((config.scp_estimated_rate, total))
            }
            _ => None,
        };
        let parser = TransferProgressParser::new(job.total_size);

        let cancel = config.cancel_token.as_deref();
        let outcome = retry.run_attempts_with(config.transfer_retry(), &format!("copy of {item}"), |_| {
            let mut observer = TransferObserver {
                parser,
                tracker: &mut tracker,
                scp_estimate,
                cancel,
            };
            session
                .stream(&spec, STREAM_TICK, &mut observer)
                .unwrap_or_else(|e| CommandOutput::launch_failure(&spec, &e))
        });

        // Finalizing
        states.push(JobState::Finalizing);
        if !outcome.succeeded() && config.is_cancelled() {
            tracker.abandon("cancelled");
            log.record(
                "COPY_CANCELLED",
                &item,
                "CANCELLED",
                &format!("Partial data may remain in {}", job.destination.display()),
            );
            return Err(cancelled(Some(job.destination)));
        }
        let progress = if outcome.succeeded() {
            tracker.complete();
            tracker.finish()
        } else {
            tracker.abandon("failed")
        };
        let (bytes_transferred, bytes_estimated) = transferred_bytes(&progress, scp_estimate.is_some());

        let job_outcome = if outcome.succeeded() {
            let detail = format!(
                "{} | Local path: {}",
                describe_bytes(bytes_transferred, bytes_estimated),
                job.destination.display()
            );
            log.record("COPY_COMPLETE", &item, "SUCCESS", &detail);
            JobOutcome::Succeeded
        } else {
            let reason = failure_reason(&outcome.output, outcome.attempts);
            log.record("COPY_FAILED", &item, "FAILED", &reason);
            JobOutcome::Failed {
                exit_code: outcome.exit_code(),
                reason,
            }
        };
        states.push(job_outcome.state());

        Ok(JobReport {
            job,
            outcome: job_outcome,
            decision,
            selection: Some(selection),
            attempts: outcome.attempts,
            elapsed: started.elapsed(),
            bytes_transferred,
            bytes_estimated,
            states,
        })
    }
}

/// Feeds transfer output into the tracker.
struct TransferObserver<'t, 'a> {
    parser: TransferProgressParser,
    tracker: &'t mut ProgressTracker<'a>,
    /// `(bytes per second, total)` for time-based scp estimates
    scp_estimate: Option<(u64, u64)>,
    cancel: Option<&'t AtomicBool>,
}

impl StreamObserver for TransferObserver<'_, '_> {
    fn on_line(&mut self, line: &str) {
        tracing::trace!(line, "transfer output");
        match self.parser.parse(line) {
            Some(ProgressSignal::Bytes(bytes)) => self.tracker.update(bytes),
            Some(ProgressSignal::Percent(percent)) => self.tracker.update_percent(percent),
            None => {}
        }
    }

    fn on_tick(&mut self, elapsed: Duration) {
        if let Some((rate, total)) = self.scp_estimate {
            self.tracker.update(scp_estimated_bytes(elapsed, rate, total));
        }
    }

    fn should_stop(&mut self, _elapsed: Duration) -> bool {
        self.cancel.is_some_and(|token| token.load(Ordering::Relaxed))
    }
}

/// `min(elapsed * rate, total)`
pub fn scp_estimated_bytes(elapsed: Duration, bytes_per_sec: u64, total: u64) -> u64 {
    let estimate = elapsed.as_secs_f64() * bytes_per_sec as f64;
    if estimate >= total as f64 {
        total
    } else {
        estimate as u64
    }
}

fn check_free_space(config: &TransferConfig, job: &TransferJob) -> Option<SkipReason> {
    let required = job.total_size.or(job.estimated_size)?;
    let available = match config.free_space_override {
        Some(bytes) => bytes,
        None => match available_space(&job.destination) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "free-space check unavailable");
                return None;
            }
        },
    };
    (required > available).then_some(SkipReason::InsufficientSpace {
        required,
        available,
    })
}

fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn transferred_bytes(progress: &ProgressState, scp_estimate: bool) -> (u64, bool) {
    if progress.total_size.is_some() || progress.current_size > 0 {
        return (progress.current_size, scp_estimate);
    }
    match progress.estimated_bytes() {
        Some(bytes) => (bytes, true),
        None => (0, false),
    }
}

fn describe_bytes(bytes: u64, estimated: bool) -> String {
    if estimated {
        format!("~{:.1} MiB (estimated)", bytes as f64 / MIB)
    } else {
        format!("{bytes} bytes ({:.1} MiB)", bytes as f64 / MIB)
    }
}

fn failure_reason(output: &CommandOutput, attempts: u32) -> String {
    let code = output
        .status
        .map_or_else(|| "none".to_owned(), |c| c.to_string());
    match output.stderr_summary() {
        "" => format!("exit code {code} after {attempts} attempt(s)"),
        stderr => format!("exit code {code} after {attempts} attempt(s): {stderr}"),
    }
}
