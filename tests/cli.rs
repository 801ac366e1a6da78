//! Integration tests for CLI commands

#![allow(deprecated)]

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

const SSE_CAPTURE: &str = concat!(
    "data: {\"id\":\"chatcmpl-9\",\"choices\":[{\"delta\":{\"content\":\"<think>check files</think>Looking\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" now <tool_call>{\\\"name\\\":\\\"ls\\\",\\\"arguments\\\":{\\\"path\\\":\\\".\\\"}}</tool_call>\"}}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":3,\"total_tokens\":15}}\n\n",
    "data: [DONE]\n\n",
);

const COMPLETE_CAPTURE: &str = r#"{
  "id": "chatcmpl-10",
  "choices": [{"message": {"content": "Plain answer", "reasoning_content": "brief"}}],
  "usage": {"prompt_tokens": 4, "completion_tokens": 2}
}"#;

fn capture(tmp: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn loam() -> Command {
    let mut cmd = Command::cargo_bin("loam").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_main_command_help() {
    let mut cmd = loam();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("decode"));
}

#[test]
fn test_decode_command_help() {
    let mut cmd = loam();
    cmd.arg("decode").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Decode a captured response body"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_decode_sse_capture_as_json_lines() {
    let tmp = TempDir::new().unwrap();
    let path = capture(&tmp, "reply.sse", SSE_CAPTURE);

    let mut cmd = loam();
    cmd.arg("decode").arg(&path).arg("--json");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "{\"type\":\"think\",\"think\":\"check files\"}",
        ))
        .stdout(predicate::str::contains("\"type\":\"tool_call\""))
        .stdout(predicate::str::contains("\"name\":\"ls\""))
        .stdout(predicate::str::contains("\"id\":\"chatcmpl-9\""))
        .stdout(predicate::str::contains("\"total_tokens\":15"));
}

#[test]
fn test_decode_sse_capture_as_transcript() {
    let tmp = TempDir::new().unwrap();
    let path = capture(&tmp, "reply.sse", SSE_CAPTURE);

    let mut cmd = loam();
    cmd.arg("decode").arg(&path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[thinking]"))
        .stdout(predicate::str::contains("Looking now"))
        .stdout(predicate::str::contains("id: chatcmpl-9"))
        .stdout(predicate::str::contains("12 in / 3 out"));
}

#[test]
fn test_decode_complete_body_is_detected() {
    let tmp = TempDir::new().unwrap();
    let path = capture(&tmp, "reply.json", COMPLETE_CAPTURE);

    let mut cmd = loam();
    cmd.arg("decode").arg(&path).arg("--json");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "{\"type\":\"think\",\"think\":\"brief\"}",
        ))
        .stdout(predicate::str::contains(
            "{\"type\":\"text\",\"text\":\"Plain answer\"}",
        ))
        .stdout(predicate::str::contains("\"total_tokens\":6"));
}

#[test]
fn test_decode_no_tags_keeps_markup_as_text() {
    let tmp = TempDir::new().unwrap();
    let path = capture(&tmp, "reply.sse", SSE_CAPTURE);

    let mut cmd = loam();
    cmd.arg("decode").arg(&path).arg("--json").arg("--no-tags");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("<think>check files</think>"))
        .stdout(predicate::str::contains("\"type\":\"tool_call\"").not());
}

#[test]
fn test_decode_forced_complete_rejects_event_stream() {
    let tmp = TempDir::new().unwrap();
    let path = capture(&tmp, "reply.sse", SSE_CAPTURE);

    let mut cmd = loam();
    cmd.arg("decode").arg(&path).arg("--complete");

    cmd.assert().failure();
}

#[test]
fn test_decode_missing_file_fails() {
    let tmp = TempDir::new().unwrap();

    let mut cmd = loam();
    cmd.arg("decode").arg(tmp.path().join("absent.sse"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
