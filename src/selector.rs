//! Choosing between rsync and scp.
//!
//! With a pinned [`MethodPreference`] the selector returns immediately.
//! Otherwise it benchmarks both tools: a probe file of
//! [`TransferConfig::benchmark_sample_mib`](crate::TransferConfig) MiB is
//! created under `/tmp` on the remote, then pulled once with rsync and once
//! with scp into a local [`tempfile::TempDir`]. Both pulls use the same
//! [`SshOptions`](crate::SshOptions). The faster tool wins.
//!
//! Each pull is killed once it exceeds the candidate timeout (10 s per MiB
//! of probe, at least 30 s) or the cancel token fires.
//!
//! Cleanup is scoped: the remote probe is removed by a drop guard and the
//! scratch directory by `TempDir`, so both go away on every exit path,
//! including cancellation, timeouts and panics unwinding through the
//! benchmark.
//!
//! [`TransferMethodSelector::speed_test`] reuses the same probe machinery
//! for a standalone throughput measurement.

use crate::command::{CommandOutput, StreamObserver};
use crate::error::{Error, Result};
use crate::options::{MethodPreference, TransferConfig, TransferMethod};
use crate::remote::{RemoteSession, quote_remote_path};
use crate::retry::{RetryExecutor, RetryOutcome};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

const MIN_CANDIDATE_TIMEOUT: Duration = Duration::from_secs(30);
const SECS_PER_PROBE_MIB: u64 = 10;
const PULL_TICK: Duration = Duration::from_millis(200);
const MIB: f64 = 1024.0 * 1024.0;

/// Wall-clock time of each benchmark candidate; `None` if it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BenchmarkResult {
    /// rsync pull time
    pub rsync: Option<Duration>,
    /// scp pull time
    pub scp: Option<Duration>,
}

impl BenchmarkResult {
    /// The faster candidate.
    ///
    /// A failed candidate counts as slowest. Ties and double failures go to
    /// rsync, which reports real progress and resumes partial files.
    pub fn winner(&self) -> TransferMethod {
        match (self.rsync, self.scp) {
            (Some(rsync), Some(scp)) if scp < rsync => TransferMethod::Scp,
            (None, Some(_)) => TransferMethod::Scp,
            _ => TransferMethod::Rsync,
        }
    }
}

/// Why a method was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionReason {
    /// Fixed by configuration
    Pinned,
    /// Won the benchmark
    Benchmarked(BenchmarkResult),
    /// The benchmark could not be set up or was cancelled; fell back to rsync
    BenchmarkUnavailable(String),
}

/// Outcome of method selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSelection {
    /// Method to use for the transfer
    pub method: TransferMethod,
    /// How it was chosen
    pub reason: SelectionReason,
}

impl MethodSelection {
    /// One-line description for logs.
    pub fn describe(&self) -> String {
        match &self.reason {
            SelectionReason::Pinned => format!("{} (configured)", self.method),
            SelectionReason::Benchmarked(result) => format!(
                "{} (benchmark rsync: {}, scp: {})",
                self.method,
                format_timing(result.rsync),
                format_timing(result.scp)
            ),
            SelectionReason::BenchmarkUnavailable(why) => {
                format!("{} (benchmark unavailable: {why})", self.method)
            }
        }
    }
}

fn format_timing(timing: Option<Duration>) -> String {
    timing.map_or_else(|| "failed".to_owned(), |d| format!("{:.2}s", d.as_secs_f64()))
}

/// A timed pull of a probe file of known size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedTest {
    /// Bytes pulled
    pub bytes: u64,
    /// Wall-clock time of the pull
    pub elapsed: Duration,
}

impl SpeedTest {
    /// Throughput in decimal megabits per second; 0 for an instant pull.
    pub fn megabits_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 * 8.0 / 1_000_000.0 / secs
        } else {
            0.0
        }
    }

    /// Throughput in MiB per second; 0 for an instant pull.
    pub fn mib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / MIB / secs
        } else {
            0.0
        }
    }
}

/// Why a single probe pull produced no timing.
enum PullFailure {
    Failed(CommandOutput),
    TimedOut,
    Cancelled,
}

/// Picks the transfer method for a job.
#[derive(Debug, Clone)]
pub struct TransferMethodSelector {
    preference: MethodPreference,
    sample_mib: u32,
    candidate_timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl TransferMethodSelector {
    /// Selector with an explicit preference and probe size.
    pub fn new(preference: MethodPreference, sample_mib: u32) -> Self {
        let sample_mib = sample_mib.max(1);
        Self {
            preference,
            sample_mib,
            candidate_timeout: candidate_timeout_for(sample_mib),
            cancel: None,
        }
    }

    /// Selector configured from `config`, sharing its cancel token.
    pub fn from_config(config: &TransferConfig) -> Self {
        let mut selector = Self::new(config.method, config.benchmark_sample_mib);
        selector.cancel = config.cancel_token.clone();
        selector
    }

    /// Stop benchmark pulls once `token` is set.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Kill a benchmark pull that runs longer than `timeout`.
    #[must_use]
    pub fn with_candidate_timeout(mut self, timeout: Duration) -> Self {
        self.candidate_timeout = timeout;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }

    /// Choose a method, benchmarking only when no method is pinned.
    pub fn select(&self, session: &mut RemoteSession, retry: &mut RetryExecutor) -> MethodSelection {
        if let Some(method) = self.preference.pinned() {
            return MethodSelection {
                method,
                reason: SelectionReason::Pinned,
            };
        }
        match self.benchmark(session, retry) {
            Ok(result) => {
                let method = result.winner();
                tracing::info!(
                    %method,
                    rsync_ms = result.rsync.map(|d| d.as_millis() as u64),
                    scp_ms = result.scp.map(|d| d.as_millis() as u64),
                    "benchmark finished"
                );
                MethodSelection {
                    method,
                    reason: SelectionReason::Benchmarked(result),
                }
            }
            Err(why) => {
                tracing::warn!(reason = %why, "benchmark unavailable, using rsync");
                MethodSelection {
                    method: TransferMethod::Rsync,
                    reason: SelectionReason::BenchmarkUnavailable(why),
                }
            }
        }
    }

    /// Time an rsync pull and an scp pull of a fresh remote probe file.
    ///
    /// Returns `Err` with a reason when the probe or scratch directory cannot
    /// be created, or when the run is cancelled.
    pub fn benchmark(
        &self,
        session: &mut RemoteSession,
        retry: &mut RetryExecutor,
    ) -> std::result::Result<BenchmarkResult, String> {
        let mut probe = RemoteProbe::new(session, probe_path());
        let created = probe.create(retry, self.sample_mib, "benchmark probe creation");
        if self.is_cancelled() {
            return Err("cancelled".to_owned());
        }
        if !created.succeeded() {
            return Err(format!(
                "probe creation failed (exit code {})",
                created
                    .exit_code()
                    .map_or_else(|| "none".to_owned(), |c| c.to_string())
            ));
        }

        let scratch = TempDir::with_prefix("recopy-bench-")
            .map_err(|e| format!("scratch directory: {e}"))?;

        let mut timings = [None, None];
        for (slot, method) in timings.iter_mut().zip([TransferMethod::Rsync, TransferMethod::Scp]) {
            match probe.time_pull(method, scratch.path(), self.candidate_timeout, self.cancel.as_deref()) {
                Ok(elapsed) => *slot = Some(elapsed),
                Err(PullFailure::Cancelled) => return Err("cancelled".to_owned()),
                Err(PullFailure::TimedOut) => {
                    tracing::warn!(%method, timeout_s = self.candidate_timeout.as_secs(), "benchmark candidate timed out");
                }
                Err(PullFailure::Failed(output)) => {
                    tracing::warn!(
                        %method,
                        exit_code = ?output.status,
                        stderr = output.stderr_summary(),
                        "benchmark candidate failed"
                    );
                }
            }
        }
        let [rsync, scp] = timings;
        Ok(BenchmarkResult { rsync, scp })
    }

    /// Pull a fresh `size_mib` MiB probe with rsync and time it.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandFailed`] when the probe cannot be created or pulled
    /// - [`Error::Cancelled`] when the cancel token fires
    /// - [`Error::Io`] when no local scratch directory can be created
    pub fn speed_test(
        &self,
        session: &mut RemoteSession,
        retry: &mut RetryExecutor,
        size_mib: u32,
    ) -> Result<SpeedTest> {
        let size_mib = size_mib.max(1);
        let cancelled = || Error::Cancelled {
            item: "speed test".to_owned(),
            partial: None,
        };

        let mut probe = RemoteProbe::new(session, probe_path());
        let created = probe.create(retry, size_mib, "speed test file creation");
        if self.is_cancelled() {
            return Err(cancelled());
        }
        if !created.succeeded() {
            return Err(Error::CommandFailed {
                description: "speed test file creation".to_owned(),
                exit_code: created.exit_code(),
                attempts: created.attempts,
            });
        }

        let scratch = TempDir::with_prefix("recopy-speed-")?;
        let timeout = candidate_timeout_for(size_mib);
        match probe.time_pull(TransferMethod::Rsync, scratch.path(), timeout, self.cancel.as_deref()) {
            Ok(elapsed) => {
                let result = SpeedTest {
                    bytes: u64::from(size_mib) * 1024 * 1024,
                    elapsed,
                };
                tracing::info!(
                    mbps = result.megabits_per_sec(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "speed test finished"
                );
                Ok(result)
            }
            Err(PullFailure::Cancelled) => Err(cancelled()),
            Err(PullFailure::TimedOut) => Err(Error::CommandFailed {
                description: format!("speed test download (timed out after {}s)", timeout.as_secs()),
                exit_code: None,
                attempts: 1,
            }),
            Err(PullFailure::Failed(output)) => Err(Error::CommandFailed {
                description: "speed test download".to_owned(),
                exit_code: output.status,
                attempts: 1,
            }),
        }
    }
}

fn candidate_timeout_for(sample_mib: u32) -> Duration {
    Duration::from_secs(SECS_PER_PROBE_MIB * u64::from(sample_mib)).max(MIN_CANDIDATE_TIMEOUT)
}

fn probe_path() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("/tmp/recopy-probe-{}-{nanos:09}", std::process::id())
}

/// Stops a probe pull on timeout or cancellation.
struct PullWatch<'c> {
    timeout: Duration,
    cancel: Option<&'c AtomicBool>,
    timed_out: bool,
}

impl StreamObserver for PullWatch<'_> {
    fn on_line(&mut self, _line: &str) {}

    fn should_stop(&mut self, elapsed: Duration) -> bool {
        if self.cancel.is_some_and(|token| token.load(Ordering::Relaxed)) {
            return true;
        }
        if elapsed >= self.timeout {
            self.timed_out = true;
            return true;
        }
        false
    }
}

/// Remote probe file, removed when dropped.
struct RemoteProbe<'s> {
    session: &'s mut RemoteSession,
    path: String,
}

impl<'s> RemoteProbe<'s> {
    fn new(session: &'s mut RemoteSession, path: String) -> Self {
        Self { session, path }
    }

    fn create(&mut self, retry: &mut RetryExecutor, size_mib: u32, description: &str) -> RetryOutcome {
        let command = format!(
            "dd if=/dev/zero of={} bs=1M count={size_mib} 2>/dev/null",
            quote_remote_path(&self.path)
        );
        self.session.run_remote(retry, &command, description)
    }

    fn time_pull(
        &mut self,
        method: TransferMethod,
        scratch: &Path,
        timeout: Duration,
        cancel: Option<&AtomicBool>,
    ) -> std::result::Result<Duration, PullFailure> {
        let dest = scratch.join(method.as_str());
        if let Err(e) = std::fs::create_dir_all(&dest) {
            tracing::warn!(%method, error = %e, "cannot create benchmark directory");
            return Err(PullFailure::Failed(CommandOutput::default().with_stderr(e.to_string())));
        }
        let spec = self
            .session
            .target()
            .transfer_command(method, self.session.ssh(), &self.path, &dest);
        let mut watch = PullWatch {
            timeout,
            cancel,
            timed_out: false,
        };
        let started = Instant::now();
        let output = self
            .session
            .stream(&spec, PULL_TICK, &mut watch)
            .unwrap_or_else(|e| CommandOutput::launch_failure(&spec, &e));
        let elapsed = started.elapsed();

        if cancel.is_some_and(|token| token.load(Ordering::Relaxed)) {
            Err(PullFailure::Cancelled)
        } else if watch.timed_out {
            Err(PullFailure::TimedOut)
        } else if output.success() {
            Ok(elapsed)
        } else {
            Err(PullFailure::Failed(output))
        }
    }
}

impl Drop for RemoteProbe<'_> {
    fn drop(&mut self) {
        let spec = self
            .session
            .target()
            .ssh_command(self.session.ssh(), &format!("rm -f {}", quote_remote_path(&self.path)));
        let output = self.session.run_once(&spec);
        if !output.success() {
            tracing::warn!(path = %self.path, "could not remove benchmark probe");
        }
    }
}
