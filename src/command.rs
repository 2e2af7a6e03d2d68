//! External command plumbing.
//!
//! Every remote interaction (size queries, listings, deletes, the transfer
//! itself) is an external program. [`CommandSpec`] describes one invocation,
//! [`Transport`] executes it, and [`SystemTransport`] is the real
//! implementation on top of [`std::process`].
//!
//! Transfer tools redraw their progress with carriage returns, so streamed
//! output is split on both `\r` and `\n` before it reaches a
//! [`StreamObserver`].

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// One invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    ///
    /// Values never appear in [`CommandSpec::display`].
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order.
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Names of the environment variables that will be set.
    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.env.iter().map(|(k, _)| k.as_str())
    }

    /// Command line suitable for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&shell_quote(arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    /// Build the [`std::process::Command`] for this spec.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Quote `s` for a POSIX shell.
///
/// Remote commands run through the login shell on the far side of `ssh`,
/// so every path interpolated into them goes through here.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the program never ran or was killed by a signal
    pub status: Option<i32>,
    /// Captured standard output (empty for streamed commands)
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command that exited with `code`.
    pub fn exited(code: i32) -> Self {
        Self {
            status: Some(code),
            ..Self::default()
        }
    }

    /// Output describing a program that could not be started.
    pub fn launch_failure(spec: &CommandSpec, error: &io::Error) -> Self {
        Self {
            status: None,
            stdout: String::new(),
            stderr: format!("failed to launch {}: {}", spec.program(), error),
        }
    }

    /// Output standing in for a command skipped or stopped by cancellation.
    pub fn cancelled() -> Self {
        Self {
            status: None,
            stdout: String::new(),
            stderr: "cancelled".to_owned(),
        }
    }

    /// Attach captured stdout.
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Attach captured stderr.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Last non-empty stderr line, for short failure messages.
    pub fn stderr_summary(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// Receives the output of a streamed command as it is produced.
pub trait StreamObserver {
    /// Called for each non-empty output line (stdout and stderr).
    fn on_line(&mut self, line: &str);

    /// Called when no line arrived within the tick interval.
    ///
    /// `elapsed` is measured from process start.
    fn on_tick(&mut self, _elapsed: Duration) {}

    /// Polled after every line and tick; returning `true` kills the process.
    fn should_stop(&mut self, _elapsed: Duration) -> bool {
        false
    }
}

/// Executes external commands.
///
/// The seam between the copy logic and the operating system; tests swap in
/// scripted implementations.
pub trait Transport {
    /// Run `spec` to completion, capturing stdout and stderr.
    fn run(&mut self, spec: &CommandSpec) -> io::Result<CommandOutput>;

    /// Run `spec`, feeding its output to `observer` line by line.
    ///
    /// Blocks until the process closes its output and exits, or until
    /// [`StreamObserver::should_stop`] asks for it to be killed. `tick`
    /// bounds how long the loop waits for a line before calling
    /// [`StreamObserver::on_tick`].
    fn stream(
        &mut self,
        spec: &CommandSpec,
        tick: Duration,
        observer: &mut dyn StreamObserver,
    ) -> io::Result<CommandOutput>;
}

/// [`Transport`] backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTransport;

enum StreamLine {
    Stdout(String),
    Stderr(String),
}

impl Transport for SystemTransport {
    fn run(&mut self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        tracing::debug!(command = %spec.display(), "running");
        let output = spec.to_command().stdin(Stdio::null()).output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn stream(
        &mut self,
        spec: &CommandSpec,
        tick: Duration,
        observer: &mut dyn StreamObserver,
    ) -> io::Result<CommandOutput> {
        tracing::debug!(command = %spec.display(), "streaming");
        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || {
                split_progress_lines(stdout, |line| {
                    let _ = tx.send(StreamLine::Stdout(line));
                })
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || {
                split_progress_lines(stderr, |line| {
                    let _ = tx.send(StreamLine::Stderr(line));
                })
            }));
        }
        drop(tx);

        let started = Instant::now();
        let mut stderr = String::new();
        let mut stopped = false;
        loop {
            match rx.recv_timeout(tick) {
                Ok(StreamLine::Stdout(line)) => observer.on_line(&line),
                Ok(StreamLine::Stderr(line)) => {
                    observer.on_line(&line);
                    stderr.push_str(&line);
                    stderr.push('\n');
                }
                Err(RecvTimeoutError::Timeout) => observer.on_tick(started.elapsed()),
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if observer.should_stop(started.elapsed()) {
                tracing::debug!(command = %spec.display(), "stopping");
                if let Err(e) = child.kill() {
                    tracing::debug!(error = %e, "kill failed");
                }
                stopped = true;
                break;
            }
        }

        // Grandchildren (ssh under rsync) may still hold the pipes open after
        // a kill, so readers are only joined after a normal exit.
        if !stopped {
            for reader in readers {
                if let Ok(Err(e)) = reader.join() {
                    tracing::debug!(error = %e, "output reader stopped early");
                }
            }
        }

        let status = child.wait()?;
        Ok(CommandOutput {
            status: status.code(),
            stdout: String::new(),
            stderr,
        })
    }
}

/// Split a byte stream into lines on `\r` or `\n`, skipping empty lines.
///
/// Emits each line as soon as its terminator arrives, so carriage-return
/// progress redraws are seen in real time.
pub fn split_progress_lines<R: Read>(reader: R, mut emit: impl FnMut(String)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if buf.is_empty() {
            break;
        }
        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    emit(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
        reader.consume(len);
    }
    if !pending.is_empty() {
        emit(String::from_utf8_lossy(&pending).into_owned());
    }
    Ok(())
}
