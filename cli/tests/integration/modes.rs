//! Delete-only and speed test modes of the recopy CLI.

#![cfg(unix)]

#[path = "../common/mod.rs"]
mod common;

use common::{FakeRemote, REMOTE_PATH};
use predicates::prelude::*;
use serde_json::Value;

#[test]
fn test_delete_mode_removes_without_copying() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--delete", "rec_0412", "rec_0413"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted remote rec_0412"))
        .stdout(predicate::str::contains("Deleted remote rec_0413"))
        .stdout(predicate::str::contains("Deleted 2, failed 0"));

    assert_eq!(remote.count_calls(&format!("rm -rf '{REMOTE_PATH}/rec_0412'")), 1);
    assert_eq!(remote.count_calls(&format!("rm -rf '{REMOTE_PATH}/rec_0413'")), 1);
    assert_eq!(remote.count_calls("rsync "), 0);
    assert_eq!(remote.count_calls("scp "), 0);
    assert_eq!(remote.count_calls("dd if=/dev/zero"), 0);
    assert!(!remote.dst.path().join("rec_0412").exists());

    let log = remote.log();
    assert!(log.contains("ACTION: DELETE | TARGET: rec_0412 | STATUS: SUCCESS"));
    assert!(log.contains("ACTION: DELETE | TARGET: rec_0413 | STATUS: SUCCESS"));
    assert!(log.contains("SESSION_END | TOTAL_OPS: 2 | SUCCESSFUL: 2"));
}

#[test]
fn test_delete_mode_json_reports_failures() {
    let remote = FakeRemote::new();

    let output = remote
        .cmd()
        .env("FAKE_RM_FAIL", "1")
        .args(["--delete", "--retries", "1", "--output", "json", "rec_0412"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 of 1 item(s) failed"));

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["mode"], "delete");
    let item = &payload["items"][0];
    assert_eq!(item["item"], "rec_0412");
    assert_eq!(item["outcome"], "failed");
    assert!(item["error_message"].as_str().unwrap().contains("exit code 1"));
    assert!(remote.log().contains("ACTION: DELETE | TARGET: rec_0412 | STATUS: FAILED"));
}

#[test]
fn test_delete_mode_rejects_unknown_item() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--delete", "rec_9999"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("rec_9999"));

    assert_eq!(remote.count_calls("rm -rf"), 0);
}

#[test]
fn test_delete_conflicts_with_list() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--delete", "--list"])
        .assert()
        .failure()
        .code(2);

    assert!(remote.calls().is_empty());
}

#[test]
fn test_speed_test_reports_mbps() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--speed-test", "--speed-test-mib", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Running speed test with a 1 MiB file"))
        .stdout(predicate::str::contains("Mbps"));

    assert_eq!(remote.count_calls("dd if=/dev/zero"), 1);
    assert_eq!(remote.count_calls("count=1 "), 1);
    assert_eq!(remote.count_calls("rsync "), 1);
    assert_eq!(remote.count_calls("scp "), 0);
    assert_eq!(remote.count_calls("rm -f"), 1);
    assert_eq!(remote.count_calls("du -sh"), 0);
    assert!(remote.log().contains("ACTION: SPEED_TEST | TARGET: fakehost | STATUS: SUCCESS | 1 MiB in"));
}

#[test]
fn test_speed_test_json() {
    let remote = FakeRemote::new();

    let output = remote
        .cmd()
        .args(["--speed-test", "--speed-test-mib", "2", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["mode"], "speed_test");
    assert_eq!(payload["bytes"], 2 * 1024 * 1024);
    assert!(payload["mbps"].is_number());
    assert!(payload["elapsed_secs"].is_number());
}

#[test]
fn test_speed_test_failure_still_removes_remote_file() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .env("FAKE_RSYNC_EXIT", "12")
        .args(["--speed-test", "--speed-test-mib", "1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error[command_failed]"))
        .stderr(predicate::str::contains("speed test download"));

    assert_eq!(remote.count_calls("rm -f"), 1);
    assert!(remote.log().contains("ACTION: SPEED_TEST | TARGET: fakehost | STATUS: FAILED"));
}
