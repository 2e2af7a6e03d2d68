//! Remote host access over ssh.
//!
//! [`RemoteTarget`] knows who to connect as and how to build `ssh`, `rsync`
//! and `scp` command lines for it. [`RemoteSession`] pairs a target with the
//! shared [`SshOptions`] and a [`Transport`], and implements the remote
//! operations a copy session needs: connection check, listing, sizing and
//! deletion.
//!
//! When a password is set, commands are wrapped in `sshpass -e` and the
//! password travels in the `SSHPASS` environment variable, never on argv.

use crate::command::{CommandOutput, CommandSpec, StreamObserver, Transport, shell_quote};
use crate::error::{Error, Result};
use crate::options::{SshOptions, TransferMethod};
use crate::retry::{RetryExecutor, RetryOutcome};
use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Who and where to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Login name
    pub user: String,
    /// Host name or address
    pub host: String,
    /// Password for `sshpass`; `None` relies on keys or an agent
    pub password: Option<String>,
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl RemoteTarget {
    /// Target without a password.
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            password: None,
        }
    }

    /// Authenticate with `password` through `sshpass`.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// `user@host`
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host:path`, the source operand for rsync and scp.
    pub fn spec(&self, path: &str) -> String {
        format!("{}:{}", self.login(), path)
    }

    fn wrap(&self, program: &str) -> CommandSpec {
        match &self.password {
            Some(password) => CommandSpec::new("sshpass")
                .args(["-e", program])
                .env("SSHPASS", password.clone()),
            None => CommandSpec::new(program),
        }
    }

    /// `ssh <options> user@host <remote_command>`
    pub fn ssh_command(&self, ssh: &SshOptions, remote_command: &str) -> CommandSpec {
        self.wrap("ssh")
            .args(ssh.to_args())
            .arg(self.login())
            .arg(remote_command)
    }

    /// Pull `remote_path` into the directory `dest_dir` with rsync.
    ///
    /// `--partial` keeps interrupted files so a relaunch resumes them;
    /// `--info=progress2` produces the whole-transfer progress line.
    pub fn rsync_command(&self, ssh: &SshOptions, remote_path: &str, dest_dir: &Path) -> CommandSpec {
        self.wrap("rsync")
            .args([
                "-a",
                "-v",
                "--partial",
                "--no-compress",
                "--info=progress2",
                "--protect-args",
                "-e",
            ])
            .arg(ssh.to_rsync_shell())
            .arg(self.spec(remote_path))
            .arg(dir_operand(dest_dir))
    }

    /// Pull `remote_path` into the directory `dest_dir` with `scp -r`.
    pub fn scp_command(&self, ssh: &SshOptions, remote_path: &str, dest_dir: &Path) -> CommandSpec {
        self.wrap("scp")
            .args(ssh.to_args())
            .arg("-r")
            .arg(self.spec(remote_path))
            .arg(dir_operand(dest_dir))
    }

    /// Transfer command for `method`.
    pub fn transfer_command(
        &self,
        method: TransferMethod,
        ssh: &SshOptions,
        remote_path: &str,
        dest_dir: &Path,
    ) -> CommandSpec {
        match method {
            TransferMethod::Rsync => self.rsync_command(ssh, remote_path, dest_dir),
            TransferMethod::Scp => self.scp_command(ssh, remote_path, dest_dir),
        }
    }
}

fn dir_operand(dir: &Path) -> String {
    let mut s = dir.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

/// Quote a remote path for the remote shell, keeping a leading `~/` expandable.
pub fn quote_remote_path(path: &str) -> String {
    if path == "~" {
        return "~".to_owned();
    }
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~/".to_owned(),
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}

/// `base/name` with exactly one separator.
pub fn join_remote(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_owned();
    }
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RemoteItem {
    /// Entry name inside the listed directory
    pub name: String,
    /// Human-readable size as printed by `du -h` (`1.5G`, `640K`)
    pub size_label: String,
}

impl RemoteItem {
    /// Byte estimate derived from [`size_label`](Self::size_label).
    pub fn estimated_size(&self) -> Option<u64> {
        parse_size_label(&self.size_label)
    }
}

/// Convert a `du -h` size label into an approximate byte count.
///
/// Suffixes `K`, `M`, `G`, `T` use decimal multipliers; a bare number is
/// taken as bytes. The result is only good enough for a free-space guard.
///
/// # Example
///
/// ```
/// use recopy::parse_size_label;
///
/// assert_eq!(parse_size_label("1.5G"), Some(1_500_000_000));
/// assert_eq!(parse_size_label("640K"), Some(640_000));
/// assert_eq!(parse_size_label("oops"), None);
/// ```
pub fn parse_size_label(label: &str) -> Option<u64> {
    let label = label.trim();
    let last = label.chars().last()?;
    let (number, multiplier) = match last.to_ascii_uppercase() {
        'K' => (&label[..label.len() - 1], 1e3),
        'M' => (&label[..label.len() - 1], 1e6),
        'G' => (&label[..label.len() - 1], 1e9),
        'T' => (&label[..label.len() - 1], 1e12),
        c if c.is_ascii_digit() => (label, 1.0),
        _ => return None,
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

/// Parse `du -sh *` output (`<size>\t<name>` per line); other lines are skipped.
pub fn parse_du_listing(output: &str) -> Vec<RemoteItem> {
    output
        .lines()
        .filter_map(|line| {
            let (size, name) = line.split_once('\t')?;
            let (size, name) = (size.trim(), name.trim_end_matches(['\r', '\n']));
            if size.is_empty() || name.is_empty() {
                return None;
            }
            Some(RemoteItem {
                name: name.to_owned(),
                size_label: size.to_owned(),
            })
        })
        .collect()
}

/// First field of `du -sb` output as a byte count.
pub fn parse_du_bytes(output: &str) -> Option<u64> {
    let first = output.lines().next()?;
    let field = first.split('\t').next()?.trim();
    field.parse().ok()
}

/// Supplies a fresh password after the connection check fails.
///
/// Implemented for closures, so a terminal prompt or a scripted source can
/// be passed directly.
pub trait CredentialPrompt {
    /// New password for `login`, or `None` to give up.
    ///
    /// # Errors
    ///
    /// Prompt failures, which abort the reconnect loop.
    fn password(&mut self, login: &str, failure: &Error) -> Result<Option<String>>;
}

impl<F> CredentialPrompt for F
where
    F: FnMut(&str, &Error) -> Result<Option<String>>,
{
    fn password(&mut self, login: &str, failure: &Error) -> Result<Option<String>> {
        self(login, failure)
    }
}

/// A remote target plus the means to run commands against it.
pub struct RemoteSession {
    target: RemoteTarget,
    ssh: SshOptions,
    transport: Box<dyn Transport>,
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("target", &self.target)
            .field("ssh", &self.ssh)
            .finish_non_exhaustive()
    }
}

impl RemoteSession {
    /// Session running commands through `transport`.
    pub fn new(target: RemoteTarget, ssh: SshOptions, transport: Box<dyn Transport>) -> Self {
        Self {
            target,
            ssh,
            transport,
        }
    }

    /// Session backed by real processes.
    pub fn system(target: RemoteTarget, ssh: SshOptions) -> Self {
        Self::new(target, ssh, Box::new(crate::command::SystemTransport))
    }

    /// The remote target.
    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Replace the password used for every following command.
    ///
    /// An empty password clears it.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.target.password = Some(password.into()).filter(|p: &String| !p.is_empty());
    }

    /// The ssh options in use.
    pub fn ssh(&self) -> &SshOptions {
        &self.ssh
    }

    /// Run `remote_command` over ssh under `retry`.
    pub fn run_remote(
        &mut self,
        retry: &mut RetryExecutor,
        remote_command: &str,
        description: &str,
    ) -> RetryOutcome {
        let spec = self.target.ssh_command(&self.ssh, remote_command);
        retry.run(self.transport.as_mut(), &spec, description)
    }

    /// Run an arbitrary command once, without retries.
    pub fn run_once(&mut self, spec: &CommandSpec) -> CommandOutput {
        self.transport
            .run(spec)
            .unwrap_or_else(|e| CommandOutput::launch_failure(spec, &e))
    }

    /// Stream an arbitrary command once.
    pub fn stream(
        &mut self,
        spec: &CommandSpec,
        tick: Duration,
        observer: &mut dyn StreamObserver,
    ) -> io::Result<CommandOutput> {
        self.transport.stream(spec, tick, observer)
    }

    /// Verify the base ssh connection by running `echo OK`.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionFailed`] when every attempt fails.
    pub fn check_connection(&mut self, retry: &mut RetryExecutor) -> Result<()> {
        let outcome = self.run_remote(retry, "echo OK", "SSH connection test");
        if outcome.succeeded() && outcome.output.stdout.contains("OK") {
            tracing::info!(host = %self.target.host, attempts = outcome.attempts, "ssh connection ok");
            return Ok(());
        }
        Err(Error::ConnectionFailed {
            target: self.target.login(),
            attempts: outcome.attempts,
            detail: failure_detail(&outcome.output),
        })
    }

    /// List the entries of `remote_path` with their `du -h` sizes.
    ///
    /// # Errors
    ///
    /// [`Error::CommandFailed`] when the listing command keeps failing.
    pub fn list_items(&mut self, retry: &mut RetryExecutor, remote_path: &str) -> Result<Vec<RemoteItem>> {
        let command = format!("cd {} && du -sh * 2>/dev/null", quote_remote_path(remote_path));
        let outcome = self.run_remote(retry, &command, "folder list retrieval");
        if !outcome.succeeded() {
            return Err(Error::CommandFailed {
                description: "folder list retrieval".to_owned(),
                exit_code: outcome.exit_code(),
                attempts: outcome.attempts,
            });
        }
        let items = parse_du_listing(&outcome.output.stdout);
        tracing::debug!(path = remote_path, count = items.len(), "listed remote items");
        Ok(items)
    }

    /// Exact size of `remote_path` in bytes via `du -sb`.
    ///
    /// Returns `None` when the command fails or its output is unparsable.
    pub fn measure_size(&mut self, retry: &mut RetryExecutor, remote_path: &str) -> Option<u64> {
        let command = format!("du -sb {}", quote_remote_path(remote_path));
        let outcome = self.run_remote(retry, &command, "folder size check");
        if !outcome.succeeded() {
            tracing::warn!(
                path = remote_path,
                exit_code = ?outcome.exit_code(),
                "size check failed, continuing with unknown size"
            );
            return None;
        }
        let size = parse_du_bytes(&outcome.output.stdout);
        if size.is_none() {
            tracing::warn!(path = remote_path, output = %outcome.output.stdout.trim(), "unparsable size output");
        }
        size
    }

    /// Remove `remote_path/name` recursively.
    ///
    /// # Errors
    ///
    /// [`Error::CommandFailed`] when the delete keeps failing.
    pub fn delete_item(&mut self, retry: &mut RetryExecutor, remote_path: &str, name: &str) -> Result<()> {
        let full = join_remote(remote_path, name);
        let command = format!("rm -rf {}", quote_remote_path(&full));
        let description = format!("deletion of {name}");
        let outcome = self.run_remote(retry, &command, &description);
        if outcome.succeeded() {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                description,
                exit_code: outcome.exit_code(),
                attempts: outcome.attempts,
            })
        }
    }
}

fn failure_detail(output: &CommandOutput) -> String {
    match (output.status, output.stderr_summary()) {
        (_, s) if !s.is_empty() => s.to_owned(),
        (Some(code), _) => format!("exit code {code}"),
        (None, _) => "command did not run".to_owned(),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeTransport, fail, ok};
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::retry::testing::RecordingSleeper;
    use rstest::rstest;

    fn session(fake: &FakeTransport) -> RemoteSession {
        RemoteSession::new(
            RemoteTarget::new("ops", "10.2.2.2").with_password("s3cret"),
            SshOptions::default(),
            Box::new(fake.clone()),
        )
    }

    fn retry(max: u32) -> RetryExecutor {
        RetryExecutor::with_sleeper(
            RetryPolicy::new(max, Duration::from_millis(1)),
            Box::new(RecordingSleeper::default()),
        )
    }

    #[rstest]
    #[case("1.5G", Some(1_500_000_000))]
    #[case("640K", Some(640_000))]
    #[case("12M", Some(12_000_000))]
    #[case("2.1T", Some(2_100_000_000_000))]
    #[case("512", Some(512))]
    #[case("4.0k", Some(4_000))]
    #[case("", None)]
    #[case("G", None)]
    #[case("abcM", None)]
    #[case("3P", None)]
    fn test_parse_size_label(#[case] label: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_size_label(label), expected);
    }

    #[test]
    fn test_parse_du_listing_skips_malformed() {
        let out = "1.5G\trec_2024_05_01\n640K\tnotes with space\ngarbage line\n\t\n12M\tbags\n";
        let items = parse_du_listing(out);
        assert_eq!(
            items,
            vec![
                RemoteItem { name: "rec_2024_05_01".into(), size_label: "1.5G".into() },
                RemoteItem { name: "notes with space".into(), size_label: "640K".into() },
                RemoteItem { name: "bags".into(), size_label: "12M".into() },
            ]
        );
        assert_eq!(items[0].estimated_size(), Some(1_500_000_000));
    }

    #[test]
    fn test_parse_du_bytes() {
        assert_eq!(parse_du_bytes("123456\t/data/rec1\n"), Some(123_456));
        assert_eq!(parse_du_bytes("du: cannot access"), None);
        assert_eq!(parse_du_bytes(""), None);
    }

    #[test]
    fn test_quote_remote_path() {
        assert_eq!(quote_remote_path("/data/rec 1"), "'/data/rec 1'");
        assert_eq!(quote_remote_path("~/recordings"), "~/'recordings'");
        assert_eq!(quote_remote_path("~"), "~");
        assert_eq!(join_remote("/data/", "rec1"), "/data/rec1");
        assert_eq!(join_remote("", "rec1"), "rec1");
    }

    #[test]
    fn test_password_goes_through_env() {
        let target = RemoteTarget::new("ops", "host").with_password("hunter2");
        let spec = target.ssh_command(&SshOptions::default(), "echo OK");
        assert_eq!(spec.program(), "sshpass");
        assert_eq!(&spec.arg_list()[..2], ["-e", "ssh"]);
        assert!(!spec.arg_list().iter().any(|a| a.contains("hunter2")));
        assert_eq!(spec.env_keys().collect::<Vec<_>>(), vec!["SSHPASS"]);
        assert!(!format!("{target:?}").contains("hunter2"));

        let keyed = RemoteTarget::new("ops", "host").with_password("");
        assert_eq!(keyed.ssh_command(&SshOptions::default(), "true").program(), "ssh");
    }

    #[test]
    fn test_transfer_commands() {
        let target = RemoteTarget::new("ops", "host");
        let ssh = SshOptions::default();
        let rsync = target.rsync_command(&ssh, "/data/rec1", Path::new("/local/dest"));
        let args = rsync.arg_list();
        assert!(args.contains(&"--info=progress2".to_owned()));
        assert!(args.contains(&"--partial".to_owned()));
        assert!(args.iter().any(|a| a.starts_with("ssh -o Compression=no")));
        assert_eq!(args[args.len() - 2], "ops@host:/data/rec1");
        assert_eq!(args[args.len() - 1], "/local/dest/");

        let scp = target.scp_command(&ssh, "/data/rec1", Path::new("/local/dest/"));
        assert_eq!(scp.program(), "scp");
        assert!(scp.arg_list().contains(&"-r".to_owned()));
        assert!(scp.arg_list().contains(&"Ciphers=aes128-gcm@openssh.com".to_owned()));
        assert_eq!(scp.arg_list().last().map(String::as_str), Some("/local/dest/"));
    }

    #[test]
    fn test_check_connection_fatal_after_retries() {
        let fake = FakeTransport::default();
        fake.when("echo OK", || fail(255, "ssh: connect to host 10.2.2.2 port 22: Connection refused"));
        let mut session = session(&fake);
        let err = session.check_connection(&mut retry(3)).unwrap_err();
        match err {
            Error::ConnectionFailed { target, attempts, detail } => {
                assert_eq!(target, "ops@10.2.2.2");
                assert_eq!(attempts, 3);
                assert!(detail.contains("Connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fake.count_matching("echo OK"), 3);
    }

    #[test]
    fn test_check_connection_ok() {
        let fake = FakeTransport::default();
        fake.when("echo OK", || ok("OK\n"));
        session(&fake).check_connection(&mut retry(3)).unwrap();
        assert_eq!(fake.calls.borrow().len(), 1);
    }

    #[test]
    fn test_list_items_and_delete() {
        let fake = FakeTransport::default();
        fake.when("du -sh", || ok("1.5G\trec1\n20K\trec2\n"))
            .when("rm -rf", || ok(""));
        let mut session = session(&fake);
        let items = session.list_items(&mut retry(2), "/data/recordings").unwrap();
        assert_eq!(items.len(), 2);
        session.delete_item(&mut retry(2), "/data/recordings", "rec1").unwrap();
        assert_eq!(fake.count_matching("rm -rf '/data/recordings/rec1'"), 1);
        assert_eq!(fake.count_matching("cd '/data/recordings' && du -sh *"), 1);
    }

    #[test]
    fn test_delete_failure_is_command_failed() {
        let fake = FakeTransport::default();
        fake.when("rm -rf", || fail(1, "rm: cannot remove: Permission denied"));
        let err = session(&fake)
            .delete_item(&mut retry(2), "/data", "rec1")
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { attempts: 2, exit_code: Some(1), .. }));
    }

    #[test]
    fn test_measure_size_degrades_to_none() {
        let fake = FakeTransport::default();
        fake.when("du -sb", || fail(1, "du: No such file"));
        assert_eq!(session(&fake).measure_size(&mut retry(2), "/data/rec1"), None);

        let fake = FakeTransport::default();
        fake.when("du -sb", || ok("4096\t/data/rec1\n"));
        assert_eq!(session(&fake).measure_size(&mut retry(2), "/data/rec1"), Some(4096));
    }
}
