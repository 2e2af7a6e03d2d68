//! Conflict policy integration tests for the recopy CLI.
//!
//! An existing local destination is resolved by `--on-conflict`:
//! - skip leaves it alone and launches no transfer
//! - overwrite removes it before copying
//! - rename:<name> copies next to it
//! - ask needs a terminal

#![cfg(unix)]

#[path = "../common/mod.rs"]
mod common;

use common::{FakeRemote, seed_existing};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

#[test]
fn test_skip_existing_destination() {
    let remote = FakeRemote::new();
    let existing = seed_existing(remote.dst.path(), "rec_0412");

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "--on-conflict", "skip", "rec_0412"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped rec_0412"))
        .stdout(predicate::str::contains("Copied 0, skipped 1, failed 0"));

    assert_eq!(fs::read_to_string(existing.join("old.db3")).unwrap(), "old");
    assert_eq!(remote.count_calls("rsync "), 0);
    assert_eq!(remote.count_calls("du -sb"), 0);
    assert!(
        remote
            .log()
            .contains("ACTION: COPY_SKIPPED | TARGET: rec_0412 | STATUS: USER_SKIP")
    );
    assert!(remote.log().contains("SESSION_END | TOTAL_OPS: 1 | SUCCESSFUL: 0"));
}

#[test]
fn test_overwrite_removes_existing_tree() {
    let remote = FakeRemote::new();
    let existing = seed_existing(remote.dst.path(), "rec_0412");

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "--on-conflict", "overwrite", "rec_0412"])
        .assert()
        .success();

    assert!(!existing.join("old.db3").exists());
    assert!(remote.copied("rec_0412").join("data.db3").exists());
    assert!(remote.log().contains("COPY_OVERWRITE"));
}

#[test]
fn test_rename_copies_next_to_existing() {
    let remote = FakeRemote::new();
    let existing = seed_existing(remote.dst.path(), "rec_0412");

    remote
        .cmd()
        .args([
            "--method",
            "rsync",
            "--quiet",
            "--on-conflict",
            "rename:rec_0412_b",
            "rec_0412",
        ])
        .assert()
        .success();

    assert_eq!(fs::read_to_string(existing.join("old.db3")).unwrap(), "old");
    let renamed = remote.dst.path().join("rec_0412_b").join("rec_0412").join("data.db3");
    assert!(renamed.exists());
    assert!(remote.log().contains("Renamed to: rec_0412_b"));
}

#[test]
fn test_policy_only_applies_to_existing_destinations() {
    let remote = FakeRemote::new();
    seed_existing(remote.dst.path(), "rec_0412");

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "--on-conflict", "skip", "rec_0412", "rec_0413"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Copied 1, skipped 1, failed 0"));

    assert!(remote.copied("rec_0413").join("data.db3").exists());
    assert_eq!(remote.count_calls("rsync "), 1);
}

#[test]
fn test_rename_requires_single_item() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--method", "rsync", "--on-conflict", "rename:other", "rec_0412", "rec_0413"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("error[invalid_input]"))
        .stderr(predicate::str::contains("needs exactly one item"));

    assert_eq!(remote.count_calls("rsync "), 0);
}

#[test]
fn test_invalid_conflict_policy_rejected() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--on-conflict", "merge", "rec_0412"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown conflict policy"));
}

#[test]
fn test_invalid_rename_target_rejected() {
    let remote = FakeRemote::new();

    remote
        .cmd()
        .args(["--on-conflict", "rename:../escape", "rec_0412"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid rename target"));
}

#[test]
fn test_ask_without_terminal_fails_cleanly() {
    let remote = FakeRemote::new();
    let existing = seed_existing(remote.dst.path(), "rec_0412");

    remote
        .cmd()
        .args(["--method", "rsync", "--quiet", "rec_0412"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error[prompt]"));

    assert_eq!(fs::read_to_string(existing.join("old.db3")).unwrap(), "old");
    assert_eq!(remote.count_calls("rsync "), 0);
    // The session is still closed in the log.
    assert!(remote.log().contains("Session End"));
}

#[test]
fn test_items_done_before_a_prompt_failure_are_reported() {
    let remote = FakeRemote::new();
    seed_existing(remote.dst.path(), "rec_0412");

    let output = remote
        .cmd()
        .args(["--method", "rsync", "--output", "json", "rec_0413", "rec_0412"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error[prompt]"));

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    let items = payload["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["item"], "rec_0413");
    assert_eq!(items[0]["outcome"], "copied");

    assert!(remote.copied("rec_0413").join("data.db3").exists());
    assert!(remote.log().contains("SESSION_END | TOTAL_OPS: 1 | SUCCESSFUL: 1"));
}
