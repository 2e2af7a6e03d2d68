//! Append-only activity log.
//!
//! One record per line:
//!
//! ```text
//! [2024-05-01 14:03:22] ACTION: COPY_START | TARGET: rec_0412 | STATUS: STARTED | method rsync
//! ```
//!
//! Sessions are delimited by banners so a long-lived log stays readable.
//! Write failures are reported through `tracing` and otherwise ignored: a
//! broken log must never fail a copy.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const SEPARATOR_WIDTH: usize = 80;

/// Persistent, line-oriented record of a copy session.
#[derive(Debug)]
pub struct SessionLog {
    sink: Option<(PathBuf, File)>,
}

impl SessionLog {
    /// Open `path` for appending, creating it and its parent directories.
    ///
    /// # Errors
    ///
    /// [`Error::LogFile`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let log_error = |source| Error::LogFile {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(log_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(log_error)?;
        Ok(Self {
            sink: Some((path.to_path_buf(), file)),
        })
    }

    /// A log that records nothing.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Path of the log file, if enabled.
    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|(p, _)| p.as_path())
    }

    /// Append one action record.
    pub fn record(&mut self, action: &str, target: &str, status: &str, detail: &str) {
        let line = format_record(&timestamp(), action, target, status, detail);
        self.write_lines(&[line.as_str()]);
    }

    /// Open a session: banner plus a `SESSION_START` record.
    pub fn session_start(&mut self, host: &str, user: &str, remote_path: &str) {
        let separator = "=".repeat(SEPARATOR_WIDTH);
        let start = format!(
            "[{}] SESSION_START | HOST: {host} | USER: {user} | PATH: {remote_path}",
            timestamp()
        );
        self.write_lines(&[
            "",
            &separator,
            "####### Recordings Copy Tool - Session Start #######",
            &separator,
            &start,
        ]);
    }

    /// Close a session: `SESSION_END` record plus banner.
    pub fn session_end(&mut self, total_operations: usize, successful_operations: usize) {
        let separator = "=".repeat(SEPARATOR_WIDTH);
        let end = format!(
            "[{}] SESSION_END | TOTAL_OPS: {total_operations} | SUCCESSFUL: {successful_operations}",
            timestamp()
        );
        self.write_lines(&[
            &end,
            &separator,
            "####### Recordings Copy Tool - Session End #######",
            &separator,
            "",
        ]);
    }

    fn write_lines(&mut self, lines: &[&str]) {
        let Some((path, file)) = self.sink.as_mut() else {
            return;
        };
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        if let Err(e) = file.write_all(buf.as_bytes()).and_then(|()| file.flush()) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write activity log");
        }
    }
}

/// Render one record line (without the trailing newline).
pub fn format_record(timestamp: &str, action: &str, target: &str, status: &str, detail: &str) -> String {
    format!("[{timestamp}] ACTION: {action} | TARGET: {target} | STATUS: {status} | {detail}")
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
