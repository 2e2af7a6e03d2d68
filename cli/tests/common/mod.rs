//! Common test utilities for integration tests.
//!
//! [`FakeRemote`] puts shell-script stand-ins for `ssh`, `rsync` and `scp`
//! (and, on request, `sshpass`) first on `PATH`, so the CLI runs end to end without a real host. Every
//! invocation is appended to a calls file; behavior is steered through
//! `FAKE_*` environment variables.

#![allow(dead_code)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const REMOTE_PATH: &str = "/data/recordings";

const DEFAULT_LISTING: &str = "1.5M\trec_0412\n4.0K\trec_0413\n";

const FAKE_SSH: &str = r#"#!/bin/sh
echo "ssh $*" >> "$FAKE_CALLS"
for last; do :; done
if [ -n "$FAKE_SSH_FAIL" ]; then
    echo "ssh: connect to host fake port 22: Connection refused" >&2
    exit 255
fi
if [ -n "$FAKE_SSH_PASSWORD" ] && [ "$SSHPASS" != "$FAKE_SSH_PASSWORD" ]; then
    echo "ops@fakehost: Permission denied (publickey,password)." >&2
    exit 255
fi
case "$last" in
    *"echo OK"*)
        echo OK
        ;;
    *"du -sh"*)
        if [ -n "$FAKE_LIST_FAIL" ]; then exit 1; fi
        if [ -n "$FAKE_LISTING" ]; then cat "$FAKE_LISTING"; fi
        ;;
    *"du -sb"*)
        if [ -n "$FAKE_SIZE_FAIL" ]; then exit 1; fi
        printf '%s\t/data/recordings/item\n' "${FAKE_SIZE:-2048}"
        ;;
    *"rm -rf"*)
        if [ -n "$FAKE_RM_FAIL" ]; then exit 1; fi
        ;;
esac
exit 0
"#;

const FAKE_RSYNC: &str = r#"#!/bin/sh
echo "rsync $*" >> "$FAKE_CALLS"
dest=""
src=""
for arg; do src="$dest"; dest="$arg"; done
if [ -n "$FAKE_RSYNC_EXIT" ]; then
    echo "rsync: connection unexpectedly closed (0 bytes received so far) [Receiver]" >&2
    exit "$FAKE_RSYNC_EXIT"
fi
name=$(basename "$src")
mkdir -p "$dest$name"
printf 'payload' > "$dest$name/data.db3"
printf 'receiving incremental file list\n'
printf '          1,024  50%%    1.00MB/s    0:00:01\r'
printf '          2,048 100%%    2.00MB/s    0:00:00 (xfr#1, to-chk=0/1)\n'
printf '\nsent 43 bytes  received 2,150 bytes  4,386.00 bytes/sec\n'
exit 0
"#;

const FAKE_SCP: &str = r#"#!/bin/sh
echo "scp $*" >> "$FAKE_CALLS"
dest=""
src=""
for arg; do src="$dest"; dest="$arg"; done
if [ -n "$FAKE_SCP_EXIT" ]; then
    echo "scp: Connection closed" >&2
    exit "$FAKE_SCP_EXIT"
fi
name=$(basename "$src")
mkdir -p "$dest$name"
printf 'payload' > "$dest$name/data.db3"
exit 0
"#;

/// Records the password it was handed, then runs the wrapped command.
const FAKE_SSHPASS: &str = r#"#!/bin/sh
echo "sshpass $1 SSHPASS=$SSHPASS" >> "$FAKE_CALLS"
shift
exec "$@"
"#;

/// Fake remote host plus local destination and log locations.
pub struct FakeRemote {
    pub bin: TempDir,
    pub dst: TempDir,
    pub work: TempDir,
}

impl FakeRemote {
    /// Install the fake tools with the default listing.
    pub fn new() -> Self {
        let remote = Self {
            bin: TempDir::new().expect("Failed to create temp bin dir"),
            dst: TempDir::new().expect("Failed to create temp dest dir"),
            work: TempDir::new().expect("Failed to create temp work dir"),
        };
        remote.install("ssh", FAKE_SSH);
        remote.install("rsync", FAKE_RSYNC);
        remote.install("scp", FAKE_SCP);
        remote.set_listing(DEFAULT_LISTING);
        fs::write(remote.calls_path(), "").expect("Failed to create calls file");
        remote
    }

    /// Put a fake `sshpass` on `PATH` as well.
    pub fn install_sshpass(&self) {
        self.install("sshpass", FAKE_SSHPASS);
    }

    fn install(&self, name: &str, script: &str) {
        let path = self.bin.path().join(name);
        fs::write(&path, script).expect("Failed to write fake tool");
        let mut perms = fs::metadata(&path).expect("Failed to stat fake tool").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("Failed to chmod fake tool");
    }

    /// Replace the `du -sh *` output of the remote directory.
    pub fn set_listing(&self, listing: &str) {
        fs::write(self.listing_path(), listing).expect("Failed to write listing");
    }

    pub fn listing_path(&self) -> PathBuf {
        self.work.path().join("listing.txt")
    }

    pub fn calls_path(&self) -> PathBuf {
        self.work.path().join("calls.txt")
    }

    pub fn log_path(&self) -> PathBuf {
        self.work.path().join("recopy.log")
    }

    /// Every fake tool invocation so far, one per line.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_path())
            .expect("Failed to read calls file")
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Number of recorded invocations containing `needle`.
    pub fn count_calls(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn log(&self) -> String {
        fs::read_to_string(self.log_path()).unwrap_or_default()
    }

    /// Where an item copied into the default destination lands.
    pub fn copied(&self, item: &str) -> PathBuf {
        self.dst.path().join(item).join(item)
    }

    /// A `recopy` command wired to the fakes with zero backoff.
    pub fn cmd(&self) -> Command {
        let path = match std::env::var_os("PATH") {
            Some(existing) => {
                let mut paths = vec![self.bin.path().to_path_buf()];
                paths.extend(std::env::split_paths(&existing));
                std::env::join_paths(paths).expect("Failed to join PATH")
            }
            None => self.bin.path().as_os_str().to_owned(),
        };

        let mut cmd = cargo_bin_cmd!("recopy");
        cmd.env("PATH", path)
            .env("FAKE_CALLS", self.calls_path())
            .env("FAKE_LISTING", self.listing_path())
            .env_remove("RECOPY_SSH_PASSWORD")
            .env_remove("SSHPASS")
            .env_remove("RECOPY_ASSUME_FREE_SPACE")
            .env_remove("RUST_LOG")
            .args(["--host", "fakehost", "--user", "ops"])
            .args(["--remote-path", REMOTE_PATH])
            .arg("--dest")
            .arg(self.dst.path())
            .arg("--log-file")
            .arg(self.log_path())
            .args(["--retry-delay", "0"]);
        cmd
    }
}

/// Create `dir/name` with a marker file, simulating an earlier copy.
pub fn seed_existing(dir: &Path, name: &str) -> PathBuf {
    let existing = dir.join(name);
    fs::create_dir_all(&existing).expect("Failed to create existing dir");
    fs::write(existing.join("old.db3"), "old").expect("Failed to write marker");
    existing
}
