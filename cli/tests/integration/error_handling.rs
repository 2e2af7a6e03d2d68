//! Error handling integration tests for the recopy CLI.
//!
//! These tests verify:
//! - Connection and listing failures abort with a coded error
//! - A rejected password can be re-entered
//! - Failed transfers are retried, reported per item and exit 1
//! - Items that cannot fit locally are skipped, not failed
//! - A failed size check degrades to unknown-size progress
//! - Invalid input exits 2

#![cfg(unix)]

#[path = "../common/mod.rs"]
mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::FakeRemote;
use predicates::prelude::*;
use serde_json::Value;

#[test]
fn test_connection_failure_is_retried_then_reported() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("FAKE_SSH_FAIL", "1")
        .args(["--retries", "2", "rec_0412"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error[connection_failed]"))
        .stderr(predicate::str::contains("ops@fakehost"));

    assert_eq!(remote.count_calls("echo OK"), 2);
    assert_eq!(remote.count_calls("rsync "), 0);
    assert!(remote.log().contains("ACTION: CONNECT | TARGET: fakehost | STATUS: FAILED"));
}

#[test]
fn test_rejected_password_is_reentered() {
    let remote = FakeRemote::new();
    remote.install_sshpass();

    remote
        .cmd()
        .env("RECOPY_SSH_PASSWORD", "wrong")
        .env("FAKE_SSH_PASSWORD", "right")
        .args(["--method", "rsync", "--quiet", "--retries", "1", "rec_0412"])
        .write_stdin("right\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("SSH connection successful"))
        .stderr(predicate::str::contains("Permission denied"));

    assert_eq!(remote.count_calls("echo OK"), 2);
    let calls = remote.calls();
    assert!(calls.iter().any(|c| c == "sshpass -e SSHPASS=wrong"));
    assert!(calls.iter().any(|c| c == "sshpass -e SSHPASS=right"));
    assert!(remote.copied("rec_0412").join("data.db3").exists());

    let log = remote.log();
    assert!(log.contains("ACTION: CONNECT | TARGET: fakehost | STATUS: FAILED"));
    assert!(log.contains("ACTION: CREDENTIALS | TARGET: fakehost | STATUS: REENTERED"));
    assert!(log.contains("ACTION: CONNECT | TARGET: fakehost | STATUS: SUCCESS"));
}

#[test]
fn test_rejected_password_without_new_one_fails() {
    let remote = FakeRemote::new();
    remote.install_sshpass();

    remote
        .cmd()
        .env("RECOPY_SSH_PASSWORD", "wrong")
        .env("FAKE_SSH_PASSWORD", "right")
        .args(["--retries", "1", "rec_0412"])
        .write_stdin("\n")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error[connection_failed]"));

    assert_eq!(remote.count_calls("echo OK"), 1);
    assert!(!remote.log().contains("REENTERED"));
}

#[test]
fn test_listing_failure_reported() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("FAKE_LIST_FAIL", "1")
        .args(["--retries", "2", "--list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error[command_failed]"));

    assert_eq!(remote.count_calls("du -sh"), 2);
}

#[test]
fn test_unknown_item_rejected() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "rsync", "rec_9999"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("error[invalid_input]"))
        .stderr(predicate::str::contains("rec_9999"));

    assert_eq!(remote.count_calls("rsync "), 0);
}

#[test]
fn test_no_items_without_terminal_rejected() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "rsync"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("No items given"));
}

#[test]
fn test_missing_host_rejected() {
    let mut cmd = cargo_bin_cmd!("recopy");
    cmd.env_remove("RECOPY_HOST")
        .args(["--user", "ops", "rec_0412"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--host"));
}

#[test]
fn test_transfer_failure_retried_and_reported() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("FAKE_RSYNC_EXIT", "12")
        .args(["--method", "rsync", "--quiet", "--transfer-attempts", "2", "rec_0412"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Failed rec_0412"))
        .stdout(predicate::str::contains("re-copy with overwrite"))
        .stderr(predicate::str::contains("error[command_failed]"))
        .stderr(predicate::str::contains("1 of 1 item(s) failed"));

    assert_eq!(remote.count_calls("rsync "), 2);
    let log = remote.log();
    assert!(log.contains("ACTION: COPY_FAILED | TARGET: rec_0412 | STATUS: FAILED"));
    assert!(log.contains("exit code 12"));
    assert!(log.contains("SESSION_END | TOTAL_OPS: 1 | SUCCESSFUL: 0"));
}

#[test]
fn test_transfer_failure_json() {
    let remote = FakeRemote::new();

    let output = remote
        .cmd()
        .env("FAKE_RSYNC_EXIT", "23")
        .args(["--method", "rsync", "--output", "json", "rec_0412", "rec_0413"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    let items = payload["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    for item in items {
        assert_eq!(item["outcome"], "failed");
        assert_eq!(item["exit_code"], 23);
        assert!(item["error_message"].as_str().unwrap().contains("exit code 23"));
    }
}

#[test]
fn test_failed_item_does_not_stop_later_items() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("FAKE_SCP_EXIT", "1")
        .args(["--method", "scp", "--quiet", "rec_0412", "rec_0413"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("2 of 2 item(s) failed"));

    assert_eq!(remote.count_calls("scp "), 2);
}

#[test]
fn test_insufficient_space_skips_item() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("RECOPY_ASSUME_FREE_SPACE", "100")
        .args(["--method", "rsync", "--quiet", "rec_0412"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped rec_0412: insufficient space"));

    assert_eq!(remote.count_calls("rsync "), 0);
    assert!(!remote.dst.path().join("rec_0412").exists());
    assert!(remote.log().contains("STATUS: INSUFFICIENT_SPACE"));
}

#[test]
fn test_size_check_failure_still_copies() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("FAKE_SIZE_FAIL", "1")
        .args(["--method", "rsync", "--quiet", "--retries", "2", "rec_0412"])
        .assert()
        .success();

    assert_eq!(remote.count_calls("du -sb"), 2);
    assert!(remote.copied("rec_0412").join("data.db3").exists());
    assert!(
        remote
            .log()
            .contains("ACTION: COPY_SIZE_CHECK | TARGET: rec_0412 | STATUS: FAILED")
    );
}

#[test]
fn test_delete_failure_is_reported_not_fatal() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("FAKE_RM_FAIL", "1")
        .args([
            "--method",
            "rsync",
            "--quiet",
            "--retries",
            "2",
            "--after-copy",
            "delete",
            "rec_0412",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Could not delete remote rec_0412"));

    assert_eq!(remote.count_calls("rm -rf"), 2);
    assert!(remote.log().contains("ACTION: DELETE | TARGET: rec_0412 | STATUS: FAILED"));
}

#[test]
fn test_unwritable_log_file_reported() {
    let remote = FakeRemote::new();
    std::fs::create_dir_all(remote.log_path()).unwrap();

    remote
        .cmd()
        .args(["--method", "rsync", "rec_0412"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error[io_error]"))
        .stderr(predicate::str::contains("recopy.log"));

    assert_eq!(remote.count_calls("echo OK"), 0);
}
