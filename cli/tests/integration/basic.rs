//! Basic functionality integration tests for the recopy CLI.

#![cfg(unix)]

#[path = "../common/mod.rs"]
mod common;

use common::{FakeRemote, REMOTE_PATH};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

#[test]
fn test_copy_single_item_with_rsync() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "rec_0412"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SSH connection successful"))
        .stdout(predicate::str::contains("Copied rec_0412"))
        .stdout(predicate::str::contains("Copied 1, skipped 0, failed 0"));

    let copied = remote.copied("rec_0412").join("data.db3");
    assert_eq!(fs::read_to_string(copied).unwrap(), "payload");

    let rsync_calls: Vec<String> = remote
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("rsync"))
        .collect();
    assert_eq!(rsync_calls.len(), 1);
    assert!(rsync_calls[0].contains("--info=progress2"));
    assert!(rsync_calls[0].contains(&format!("ops@fakehost:{REMOTE_PATH}/rec_0412")));
    assert_eq!(remote.count_calls("scp "), 0);
}

#[test]
fn test_copy_multiple_items_with_scp() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "scp", "--quiet", "rec_0412", "rec_0413"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[1/2]"))
        .stdout(predicate::str::contains("[2/2]"));

    assert!(remote.copied("rec_0412").join("data.db3").exists());
    assert!(remote.copied("rec_0413").join("data.db3").exists());
    assert_eq!(remote.count_calls("scp "), 2);
    assert_eq!(remote.count_calls("rsync "), 0);
}

#[test]
fn test_auto_method_benchmarks_before_copy() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--quiet", "rec_0413"])
        .assert()
        .success();

    // Probe creation and cleanup on the remote, one pull per candidate,
    // then the real transfer.
    assert_eq!(remote.count_calls("dd if=/dev/zero"), 1);
    assert_eq!(remote.count_calls("rm -f"), 1);
    assert!(remote.count_calls("rsync ") + remote.count_calls("scp ") >= 3);
    assert!(remote.copied("rec_0413").join("data.db3").exists());
}

#[test]
fn test_list_items() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Items (2):"))
        .stdout(predicate::str::contains("rec_0412"))
        .stdout(predicate::str::contains("1.5M"));

    assert_eq!(remote.count_calls("rsync "), 0);
}

#[test]
fn test_list_items_json() {
    let remote = FakeRemote::new();

    let output = remote
        .cmd()
        .args(["--list", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["mode"], "list");
    let items = payload["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["name"], "rec_0412");
    assert_eq!(items[0]["estimated_bytes"], 1_500_000);
}

#[test]
fn test_json_output_reports_each_item() {
    let remote = FakeRemote::new();

    let output = remote
        .cmd()
        .args(["--method", "rsync", "--output", "json", "rec_0412"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["schema_version"], "1.0");
    assert_eq!(payload["mode"], "copy");
    assert_eq!(payload["host"], "fakehost");
    let item = &payload["items"][0];
    assert_eq!(item["item"], "rec_0412");
    assert_eq!(item["outcome"], "copied");
    assert_eq!(item["method"], "rsync");
    assert_eq!(item["attempts"], 1);
    assert_eq!(item["total_size"], 2048);
    assert_eq!(item["bytes_transferred"], 2048);
    assert_eq!(item["bytes_estimated"], false);
}

#[test]
fn test_session_log_records_operations() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "rec_0412"])
        .assert()
        .success();

    let log = remote.log();
    assert!(log.contains("Recordings Copy Tool - Session Start"));
    assert!(log.contains("SESSION_START | HOST: fakehost | USER: ops"));
    assert!(log.contains("ACTION: CONNECT | TARGET: fakehost | STATUS: SUCCESS"));
    assert!(log.contains("ACTION: COPY_START | TARGET: rec_0412"));
    assert!(log.contains("ACTION: COPY_COMPLETE | TARGET: rec_0412 | STATUS: SUCCESS"));
    assert!(log.contains("SESSION_END | TOTAL_OPS: 1 | SUCCESSFUL: 1"));
    assert!(log.contains("Recordings Copy Tool - Session End"));
}

#[test]
fn test_log_appends_across_sessions() {
    let remote = FakeRemote::new();

    for _ in 0..2 {
        remote
            .cmd()
            .args(["--method", "rsync", "--quiet", "--on-conflict", "overwrite", "rec_0413"])
            .assert()
            .success();
    }

    assert_eq!(remote.log().matches("SESSION_START |").count(), 2);
    assert_eq!(remote.log().matches("COPY_OVERWRITE").count(), 1);
}

#[test]
fn test_after_copy_delete_removes_remote_item() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "--after-copy", "delete", "rec_0412"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted remote rec_0412"));

    assert_eq!(remote.count_calls(&format!("rm -rf '{REMOTE_PATH}/rec_0412'")), 1);
    assert!(remote.log().contains("ACTION: DELETE | TARGET: rec_0412 | STATUS: SUCCESS"));
}

#[test]
fn test_after_copy_keep_leaves_remote_alone() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "rec_0412"])
        .assert()
        .success();

    assert_eq!(remote.count_calls("rm -rf"), 0);
}

#[test]
fn test_password_goes_through_sshpass_env() {
    let remote = FakeRemote::new();
    remote.install_sshpass();

    remote
        .cmd()
        .env("RECOPY_SSH_PASSWORD", "hunter2")
        .args(["--method", "rsync", "--quiet", "rec_0412"])
        .assert()
        .success();

    let calls = remote.calls();
    assert!(calls.iter().any(|c| c == "sshpass -e SSHPASS=hunter2"));
    assert!(
        calls
            .iter()
            .filter(|c| c.starts_with("ssh ") || c.starts_with("rsync "))
            .all(|c| !c.contains("hunter2"))
    );
}
