// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! API tracing through the runner

#![cfg(target_os = "linux")]

use clap::Parser;
use litebox_runner_process_launcher::{CliArgs, run};
use std::path::Path;

fn run_traced(trace_file: &Path, extra: &[&str], program: &[&str]) -> String {
    let mut args = vec![
        "litebox_runner_process_launcher",
        "--trace-apis",
        "--trace-output",
        trace_file.to_str().unwrap(),
    ];
    args.extend_from_slice(extra);
    args.extend_from_slice(program);
    run(&CliArgs::parse_from(args)).unwrap();
    std::fs::read_to_string(trace_file).unwrap()
}

#[test]
fn test_text_trace_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let trace = run_traced(&dir.path().join("trace.txt"), &[], &["/bin/true"]);

    assert!(trace.contains("CALL"));
    assert!(trace.contains("RETURN"));
    assert!(trace.contains("CreateProcess(application_name=NULL, command_line=\"/bin/true\""));
    assert!(trace.contains("WaitForSingleObject"));
    assert!(trace.contains("exit_code=0"));
    assert!(trace.contains("CloseHandle"));
}

#[test]
fn test_json_trace_lines() {
    let dir = tempfile::tempdir().unwrap();
    let trace = run_traced(
        &dir.path().join("trace.json"),
        &["--trace-format", "json"],
        &["/bin/sh", "-c", "exit 3"],
    );

    assert!(!trace.is_empty());
    for line in trace.lines() {
        assert!(line.starts_with('{') && line.ends_with('}'), "{line}");
    }
    assert!(trace.contains("\"function\":\"GetExitCodeProcess\""));
}

#[test]
fn test_category_filter() {
    let dir = tempfile::tempdir().unwrap();
    let trace = run_traced(
        &dir.path().join("trace.txt"),
        &["--trace-category", "synchronization"],
        &["/bin/true"],
    );

    assert!(trace.contains("WaitForSingleObject"));
    assert!(!trace.contains("CreateProcess"));
    assert!(!trace.contains("CloseHandle"));
}

#[test]
fn test_failed_launch_is_traced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.txt");
    let args = [
        "litebox_runner_process_launcher",
        "--trace-apis",
        "--trace-output",
        path.to_str().unwrap(),
        "/nonexistent/prog",
    ];
    assert!(run(&CliArgs::parse_from(args)).is_err());

    let trace = std::fs::read_to_string(&path).unwrap();
    assert!(trace.contains("CreateProcess"));
    assert!(trace.contains("last_error=2"), "{trace}");
}
