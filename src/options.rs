//! Configuration for transfer jobs.
//!
//! [`TransferConfig`] is passed to the orchestrator at construction; nothing
//! about a transfer is read from process-wide state.
//!
//! # Example
//!
//! ```
//! use recopy::{MethodPreference, RetryPolicy, TransferConfig};
//! use std::time::Duration;
//!
//! let config = TransferConfig::default()
//!     .with_method(MethodPreference::Rsync)
//!     .with_retry(RetryPolicy::new(5, Duration::from_secs(2)))
//!     .with_cipher("chacha20-poly1305@openssh.com");
//! ```

use crate::retry::RetryPolicy;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A concrete transfer tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransferMethod {
    /// `rsync` over ssh; reports parseable progress
    Rsync,
    /// `scp -r`; no progress output, estimated by elapsed time
    Scp,
}

impl TransferMethod {
    /// Lowercase tool name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsync => "rsync",
            Self::Scp => "scp",
        }
    }
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the transfer method is chosen.
///
/// # Default
///
/// [`MethodPreference::Auto`], which benchmarks both tools per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MethodPreference {
    /// Benchmark rsync against scp and use the faster one
    #[default]
    Auto,
    /// Always use rsync
    Rsync,
    /// Always use scp
    Scp,
}

impl MethodPreference {
    /// The pinned method, or `None` for [`MethodPreference::Auto`].
    pub fn pinned(&self) -> Option<TransferMethod> {
        match self {
            Self::Auto => None,
            Self::Rsync => Some(TransferMethod::Rsync),
            Self::Scp => Some(TransferMethod::Scp),
        }
    }
}

impl FromStr for MethodPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "rsync" => Ok(Self::Rsync),
            "scp" => Ok(Self::Scp),
            other => Err(format!("unknown transfer method '{other}' (expected auto, rsync or scp)")),
        }
    }
}

/// Options handed to every `ssh` invocation.
///
/// Both benchmark candidates and the real transfer use the same set, so
/// timings are comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SshOptions {
    /// Cipher passed as `Ciphers=` (default: `aes128-gcm@openssh.com`)
    pub cipher: String,
    /// `ServerAliveInterval` in seconds (default: 60)
    pub keep_alive_interval: u32,
    /// `ConnectTimeout` in seconds (default: 10)
    pub connect_timeout: u32,
    /// Enable ssh-level compression (default: false)
    pub compression: bool,
    /// Accept unknown host keys (default: true)
    pub accept_new_hosts: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            cipher: "aes128-gcm@openssh.com".to_owned(),
            keep_alive_interval: 60,
            connect_timeout: 10,
            compression: false,
            accept_new_hosts: true,
        }
    }
}

impl SshOptions {
    /// `-o Key=Value` pairs, as a flat argument list.
    pub fn to_args(&self) -> Vec<String> {
        let mut options = vec![
            format!("Compression={}", yes_no(self.compression)),
            "TCPKeepAlive=yes".to_owned(),
            format!("ServerAliveInterval={}", self.keep_alive_interval),
            format!("Ciphers={}", self.cipher),
            format!("ConnectTimeout={}", self.connect_timeout),
        ];
        if self.accept_new_hosts {
            options.push("StrictHostKeyChecking=no".to_owned());
        }
        options
            .into_iter()
            .flat_map(|o| ["-o".to_owned(), o])
            .collect()
    }

    /// Remote shell string for `rsync -e`.
    pub fn to_rsync_shell(&self) -> String {
        let mut shell = String::from("ssh");
        for arg in self.to_args() {
            shell.push(' ');
            shell.push_str(&arg);
        }
        shell
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Options for transfer jobs.
///
/// # Default Values
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `method` | `Auto` | Benchmark per job |
/// | `ssh` | see [`SshOptions`] | Shared ssh options |
/// | `retry` | 3 attempts, 3 s | Remote command retries |
/// | `transfer_attempts` | 1 | Launches of the transfer itself |
/// | `render_interval` | 1 s | Status line throttle |
/// | `benchmark_sample_mib` | 8 | Probe size for `Auto` |
/// | `scp_estimated_rate` | 100 MiB/s | Assumed scp rate |
/// | `free_space_override` | `None` | Query the filesystem |
/// | `cancel_token` | `None` | No cooperative cancellation |
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferConfig {
    /// How to pick between rsync and scp
    pub method: MethodPreference,

    /// ssh options shared by every remote command
    pub ssh: SshOptions,

    /// Retry policy for remote commands (connection test, sizing, listing,
    /// deletes, benchmark probe)
    pub retry: RetryPolicy,

    /// Number of times the transfer command itself is launched (default: 1)
    ///
    /// rsync resumes with `--partial`, so a relaunch continues where the
    /// previous attempt stopped. Backoff follows `retry.base_delay`.
    pub transfer_attempts: u32,

    /// Minimum time between status line renders (default: 1 s)
    pub render_interval: Duration,

    /// Size of the remote probe file used by the benchmark, in MiB (default: 8)
    pub benchmark_sample_mib: u32,

    /// Rate assumed for scp progress estimates, in bytes/s (default: 100 MiB/s)
    pub scp_estimated_rate: u64,

    /// Fixed free-space figure instead of querying the filesystem
    #[cfg_attr(feature = "serde", serde(skip))]
    pub free_space_override: Option<u64>,

    /// Cancellation flag checked between steps and while child processes run
    ///
    /// Once set, running transfers and benchmark pulls are stopped, pending
    /// retries are abandoned, and the current job returns
    /// [`Error::Cancelled`](crate::Error::Cancelled) after its scratch files
    /// are cleaned up.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub cancel_token: Option<Arc<AtomicBool>>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            method: MethodPreference::Auto,
            ssh: SshOptions::default(),
            retry: RetryPolicy::default(),
            transfer_attempts: 1,
            render_interval: Duration::from_secs(1),
            benchmark_sample_mib: 8,
            scp_estimated_rate: 100 * 1024 * 1024,
            free_space_override: None,
            cancel_token: None,
        }
    }
}

impl TransferConfig {
    /// Set the method preference
    #[must_use]
    pub fn with_method(mut self, method: MethodPreference) -> Self {
        self.method = method;
        self
    }

    /// Replace the ssh options
    #[must_use]
    pub fn with_ssh(mut self, ssh: SshOptions) -> Self {
        self.ssh = ssh;
        self
    }

    /// Set the ssh cipher
    #[must_use]
    pub fn with_cipher(mut self, cipher: impl Into<String>) -> Self {
        self.ssh.cipher = cipher.into();
        self
    }

    /// Set the retry policy for remote commands
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set how many times the transfer is launched
    ///
    /// Value is clamped to at least 1.
    #[must_use]
    pub fn with_transfer_attempts(mut self, attempts: u32) -> Self {
        self.transfer_attempts = attempts.max(1);
        self
    }

    /// Set the status line throttle
    #[must_use]
    pub fn with_render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    /// Set the benchmark probe size
    ///
    /// Value is clamped to at least 1 MiB.
    #[must_use]
    pub fn with_benchmark_sample_mib(mut self, mib: u32) -> Self {
        self.benchmark_sample_mib = mib.max(1);
        self
    }

    /// Set the rate assumed for scp estimates
    #[must_use]
    pub fn with_scp_estimated_rate(mut self, bytes_per_sec: u64) -> Self {
        self.scp_estimated_rate = bytes_per_sec;
        self
    }

    /// Use a fixed free-space figure for the destination
    #[must_use]
    pub fn with_free_space_override(mut self, bytes: u64) -> Self {
        self.free_space_override = Some(bytes);
        self
    }

    /// Set a cancellation token for cooperative cancellation
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Whether the cancel token has been set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }

    /// Retry policy for the transfer command.
    pub(crate) fn transfer_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.transfer_attempts, self.retry.base_delay)
    }
}
