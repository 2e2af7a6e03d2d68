//! Builder API for setting up remote copies.
//!
//! [`TransferBuilder`] collects the target, [`TransferConfig`] and optional
//! collaborators (activity log, status sink, transport) and produces a ready
//! [`CopyOrchestrator`].
//!
//! # Examples
//!
//! ## Basic Usage
//!
//! ```no_run
//! use recopy::{ConflictDecision, PresetConflict, TransferBuilder};
//!
//! let report = TransferBuilder::new("ops", "10.2.2.2")
//!     .password("secret")
//!     .copy("rec_0412", "/data/recordings", "./store", &mut PresetConflict(ConflictDecision::Skip))?;
//! println!("{:?} after {} attempt(s)", report.outcome, report.attempts);
//! # Ok::<(), recopy::Error>(())
//! ```
//!
//! ## Reusing an Orchestrator
//!
//! ```no_run
//! use recopy::{ConflictDecision, PresetConflict, TransferBuilder, TransferJob};
//! use std::time::Duration;
//!
//! let mut orchestrator = TransferBuilder::new("ops", "10.2.2.2")
//!     .rsync()                       // Skip the benchmark
//!     .retries(5)                    // Remote command attempts
//!     .retry_delay(Duration::from_secs(2))
//!     .log_file("recopy.log")
//!     .build()?;
//!
//! orchestrator.check_connection()?;
//! for item in ["rec_0412", "rec_0413"] {
//!     let job = TransferJob::new(item, "/data/recordings", format!("./store/{item}"));
//!     orchestrator.run(job, &mut PresetConflict(ConflictDecision::Overwrite))?;
//! }
//! # Ok::<(), recopy::Error>(())
//! ```

use crate::command::{SystemTransport, Transport};
use crate::conflict::ConflictPrompt;
use crate::error::Result;
use crate::options::{MethodPreference, TransferConfig};
use crate::orchestrator::{CopyOrchestrator, JobReport, TransferJob};
use crate::progress::StatusSink;
use crate::remote::{RemoteSession, RemoteTarget};
use crate::retry::{RetryPolicy, Sleeper};
use crate::session_log::SessionLog;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// A builder for configuring remote copies.
///
/// Defaults: method benchmarked per job, 3 attempts with a 3 s backoff unit
/// for remote commands, one transfer launch, no activity log, no status
/// output, real processes.
pub struct TransferBuilder {
    target: RemoteTarget,
    config: TransferConfig,
    log_path: Option<PathBuf>,
    sink: Option<Box<dyn StatusSink>>,
    transport: Option<Box<dyn Transport>>,
    sleeper: Option<Box<dyn Sleeper>>,
}

impl fmt::Debug for TransferBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuilder")
            .field("target", &self.target)
            .field("config", &self.config)
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

impl TransferBuilder {
    /// Create a builder for `user@host`.
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            target: RemoteTarget::new(user, host),
            config: TransferConfig::default(),
            log_path: None,
            sink: None,
            transport: None,
            sleeper: None,
        }
    }

    /// Authenticate through `sshpass` with `password`.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.target = self.target.with_password(password);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the method preference.
    #[must_use]
    pub fn method(mut self, method: MethodPreference) -> Self {
        self.config = self.config.with_method(method);
        self
    }

    /// Always use rsync.
    #[must_use]
    pub fn rsync(self) -> Self {
        self.method(MethodPreference::Rsync)
    }

    /// Always use scp.
    #[must_use]
    pub fn scp(self) -> Self {
        self.method(MethodPreference::Scp)
    }

    /// Attempts for remote commands (connection, sizing, listing, deletes).
    #[must_use]
    pub fn retries(mut self, attempts: u32) -> Self {
        let delay = self.config.retry.base_delay;
        self.config = self.config.with_retry(RetryPolicy::new(attempts, delay));
        self
    }

    /// Backoff unit between attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        let attempts = self.config.retry.max_attempts;
        self.config = self.config.with_retry(RetryPolicy::new(attempts, delay));
        self
    }

    /// Number of times the transfer itself is launched.
    #[must_use]
    pub fn transfer_attempts(mut self, attempts: u32) -> Self {
        self.config = self.config.with_transfer_attempts(attempts);
        self
    }

    /// ssh cipher for every connection.
    #[must_use]
    pub fn cipher(mut self, cipher: impl Into<String>) -> Self {
        self.config = self.config.with_cipher(cipher);
        self
    }

    /// Assume `bytes` of free local space instead of asking the filesystem.
    #[must_use]
    pub fn free_space(mut self, bytes: u64) -> Self {
        self.config = self.config.with_free_space_override(bytes);
        self
    }

    /// Set a cancellation token for cooperative cancellation.
    ///
    /// Once set, no further jobs start, a running transfer or benchmark pull
    /// is killed, and [`CopyOrchestrator::run`] returns
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    #[must_use]
    pub fn cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.config = self.config.with_cancel_token(token);
        self
    }

    /// Append activity records to the file at `path`.
    #[must_use]
    pub fn log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Render status lines to `sink`.
    #[must_use]
    pub fn status_sink(mut self, sink: Box<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run commands through `transport` instead of real processes.
    #[must_use]
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `sleeper` for retry backoff.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// The configuration collected so far.
    pub fn transfer_config(&self) -> &TransferConfig {
        &self.config
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    ///
    /// [`Error::LogFile`](crate::Error::LogFile) if the log file cannot be
    /// opened.
    pub fn build(self) -> Result<CopyOrchestrator> {
        let log = match &self.log_path {
            Some(path) => SessionLog::open(path)?,
            None => SessionLog::disabled(),
        };
        let transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(SystemTransport),
        };
        let session = RemoteSession::new(self.target, self.config.ssh.clone(), transport);

        let mut orchestrator = CopyOrchestrator::new(self.config, session).with_log(log);
        if let Some(sink) = self.sink {
            orchestrator = orchestrator.with_sink(sink);
        }
        if let Some(sleeper) = self.sleeper {
            orchestrator = orchestrator.with_sleeper(sleeper);
        }
        Ok(orchestrator)
    }

    /// Build and copy one item into `dest_root/<item>`.
    ///
    /// # Errors
    ///
    /// Errors from [`build`](Self::build) or from `prompt`.
    pub fn copy(
        self,
        item: &str,
        remote_path: &str,
        dest_root: impl AsRef<Path>,
        prompt: &mut dyn ConflictPrompt,
    ) -> Result<JobReport> {
        let destination = dest_root.as_ref().join(item);
        let mut orchestrator = self.build()?;
        orchestrator.run(TransferJob::new(item, remote_path, destination), prompt)
    }
}
