//! Integration tests for the `conflux trim` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn conflux() -> Command {
    Command::cargo_bin("conflux").unwrap()
}

#[test]
fn test_trim_end_keeps_prefix() {
    conflux()
        .args(["trim", "--budget", "4", "--strategy", "end", "--chars-per-token", "1"])
        .write_stdin("AAAAAAAAAA")
        .assert()
        .success()
        .stdout(predicate::eq("AAAA\n"));
}

#[test]
fn test_trim_start_keeps_suffix() {
    conflux()
        .args(["trim", "--budget", "3", "--strategy", "start", "--chars-per-token", "1"])
        .write_stdin("0123456789")
        .assert()
        .success()
        .stdout(predicate::eq("789\n"));
}

#[test]
fn test_trim_middle_inserts_marker() {
    conflux()
        .args(["trim", "--budget", "17", "--strategy", "middle", "--chars-per-token", "1"])
        .write_stdin("abcdefghijklmnopqrstuvwxyz")
        .assert()
        .success()
        .stdout(predicate::eq("abcde\n[...]\nvwxyz\n"));
}

#[test]
fn test_trim_fitting_text_unchanged() {
    conflux()
        .args(["trim", "--budget", "100"])
        .write_stdin("short enough")
        .assert()
        .success()
        .stdout(predicate::eq("short enough\n"));
}

#[test]
fn test_trim_reads_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("input.txt");
    fs::write(&path, "hello world, this is long").unwrap();

    conflux()
        .args(["trim", "--budget", "2", "--chars-per-token", "3"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::eq("hello \n"));
}

#[test]
fn test_trim_rejects_unknown_strategy() {
    conflux()
        .args(["trim", "--budget", "2", "--strategy", "sideways"])
        .write_stdin("text")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown trim strategy"));
}

#[test]
fn test_trim_missing_file() {
    conflux()
        .args(["trim", "--budget", "2", "/definitely/not/here.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}
