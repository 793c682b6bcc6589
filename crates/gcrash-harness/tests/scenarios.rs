//! Process-level scenarios for gcrash-harness.
//!
//! These tests run the harness binary with a short time-unit and check how
//! the process ends and which dump files it leaves behind:
//! - A healthy loop exits normally without dumps
//! - A stalled loop is aborted with exactly one freeze dump
//! - A deliberate fault is aborted with exactly one fault dump
//! - Crash handler output and failures end up in the dump
#![cfg(unix)]

use regex::Regex;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Milliseconds per time-unit for all scenarios.
const UNIT_MS: &str = "50";

fn harness(dump_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gcrash-harness"))
        .arg("--dump-dir")
        .arg(dump_dir)
        .args(["--time-unit-ms", UNIT_MS])
        .args(args)
        .env_remove("GCRASH_CONFIG")
        .output()
        .expect("Failed to run gcrash-harness")
}

fn dumps(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    paths.sort();
    paths
}

fn single_dump(dir: &Path) -> String {
    let paths = dumps(dir);
    assert_eq!(paths.len(), 1, "expected exactly one dump, found {paths:?}");
    fs::read_to_string(&paths[0]).unwrap()
}

fn assert_aborted(output: &Output) {
    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "expected abort, got {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success, got {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_healthy_loop_leaves_no_dump() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(
        dir.path(),
        &["watchdog", "--period", "10", "--run-for", "30", "--handler", "ok"],
    );

    assert_success(&output);
    assert!(dumps(dir.path()).is_empty());
}

#[test]
fn test_spinning_stall_is_caught_by_hook() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(
        dir.path(),
        &[
            "watchdog",
            "--period",
            "10",
            "--run-for",
            "400",
            "--stall-after",
            "4",
            "--stall",
            "spin",
            "--handler",
            "ok",
        ],
    );

    assert_aborted(&output);
    let content = single_dump(dir.path());
    assert!(
        content.starts_with("**Freeze detected: no heartbeat for 500ms**\n"),
        "{content}"
    );
    assert!(content.contains("#0\tlua/harness/stall.lua:6 in local spin() <4-8>"));
    assert!(content.contains("Lua Crash Handler:\n\nmap: gm_construct\nplayers: 12\n"));
}

#[test]
fn test_blocked_stall_is_caught_by_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(
        dir.path(),
        &[
            "watchdog",
            "--period",
            "10",
            "--run-for",
            "400",
            "--stall-after",
            "4",
            "--stall",
            "block",
        ],
    );

    assert_aborted(&output);
    let content = single_dump(dir.path());
    assert!(content.starts_with("**Freeze detected"), "{content}");
    assert!(content.contains("#0\t[C] in sleep()"));
}

#[test]
fn test_without_hook_first_miss_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(
        dir.path(),
        &[
            "--no-escalation-hook",
            "watchdog",
            "--period",
            "10",
            "--run-for",
            "400",
            "--stall-after",
            "4",
            "--stall",
            "spin",
        ],
    );

    assert_aborted(&output);
    assert!(single_dump(dir.path()).starts_with("**Freeze detected"));
}

#[test]
fn test_short_period_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(
        dir.path(),
        &[
            "watchdog",
            "--period",
            "3",
            "--run-for",
            "400",
            "--stall-after",
            "2",
            "--stall",
            "block",
        ],
    );

    assert_aborted(&output);
    assert!(
        single_dump(dir.path()).starts_with("**Freeze detected: no heartbeat for 1500ms**")
    );
}

#[test]
fn test_paused_watchdog_tolerates_stall() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(
        dir.path(),
        &[
            "watchdog",
            "--period",
            "10",
            "--run-for",
            "40",
            "--pause-after",
            "2",
            "--stall-after",
            "4",
            "--stall",
            "spin",
        ],
    );

    assert_success(&output);
    assert!(dumps(dir.path()).is_empty());
}

#[test]
fn test_resumed_watchdog_catches_stall() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(
        dir.path(),
        &[
            "watchdog",
            "--period",
            "10",
            "--run-for",
            "400",
            "--pause-after",
            "2",
            "--stall-after",
            "4",
            "--restart-after",
            "20",
            "--stall",
            "spin",
        ],
    );

    assert_aborted(&output);
    assert!(single_dump(dir.path()).starts_with("**Freeze detected"));
}

#[test]
fn test_crash_writes_fault_dump() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(dir.path(), &["crash", "--with-watchdog", "--handler", "ok"]);

    assert_aborted(&output);
    let content = single_dump(dir.path());
    assert_eq!(
        content,
        "**Segmentation fault occurred (SIGSEGV)**\n\
         \n\
         Main Lua stack:\n\
         #0\t[C] in crash()\n\
         #1\tlua/harness/tick.lua:14 in method Think() <10-18>\n\
         #2\tlua/harness/init.lua:30 in anonymous function() <0-42>\n\
         \n\
         Lua Crash Handler:\n\
         \n\
         map: gm_construct\n\
         players: 12\n\
         \n"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("gcrash: SIGSEGV caught"), "{stderr}");
}

#[test]
fn test_dump_reports_handler_failure_inline() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(dir.path(), &["dump", "--handler", "fail"]);

    assert_success(&output);
    let content = single_dump(dir.path());
    assert!(content.starts_with("**Lua state dump requested**\n"));
    assert!(content.ends_with(
        "map: gm_construct\n\
         [[ERROR IN CRASH HANDLER: lua/harness/handler.lua:7: attempt to index a nil value]]\n"
    ));

    // The printed path is the artifact
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(PathBuf::from(stdout.trim()), dumps(dir.path())[0]);
}

#[test]
fn test_dump_uses_latest_handler() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(dir.path(), &["dump", "--handler", "replaced"]);

    assert_success(&output);
    let content = single_dump(dir.path());
    assert!(content.contains("current handler"));
    assert!(!content.contains("stale handler"));
}

#[test]
fn test_dump_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let output = harness(dir.path(), &["dump"]);
    assert_success(&output);

    let paths = dumps(dir.path());
    let name = paths[0].file_name().unwrap().to_str().unwrap();
    let pattern = Regex::new(r"^luadump-\d{8}_\d{6}\.txt$").unwrap();
    assert!(pattern.is_match(name), "unexpected dump name {name}");
}

#[test]
fn test_back_to_back_dumps_keep_both_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let first_run = harness(dir.path(), &["dump"]);
    let second_run = harness(dir.path(), &["dump"]);
    assert_success(&first_run);
    assert_success(&second_run);

    let file_name = |output: &Output| {
        let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        path.file_name().unwrap().to_str().unwrap().to_string()
    };
    let first = file_name(&first_run);
    let second = file_name(&second_run);
    assert_eq!(dumps(dir.path()).len(), 2);

    let exact = Regex::new(r"^luadump-\d{8}_\d{6}\.txt$").unwrap();
    assert!(exact.is_match(&first), "unexpected dump name {first}");
    // Only a dump landing in the same second as an earlier one is suffixed
    if !exact.is_match(&second) {
        assert_eq!(second, first.replace(".txt", "-1.txt"));
    }
}

#[test]
fn test_missing_dump_dir_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("garrysmod").join("gcrash");
    let output = harness(&nested, &["dump"]);

    assert_success(&output);
    assert_eq!(dumps(&nested).len(), 1);
}
