//! CLI Integration Tests
//!
//! Tests for:
//! - Subcommand and flag parsing
//! - The NDJSON runner-event bridge driving a reporter end to end

mod support;

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use support::{enabled_config, RecordingApi};
use zbr_agent::bridge;
use zbr_agent::config::{Cli, Commands, EmitCommand, DEFAULT_CONFIG_FILE};
use zbr_agent::reporter::{Reporter, ZbrReporter};
use zbr_agent::runner::RunnerEvent;
use zbr_agent::sdk::Emitter;

fn test_json(id: &str, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "suitePath": ["cart.spec.ts"],
        "platform": { "browserName": "chromium", "browserVersion": "120.0", "osName": "linux" }
    })
}

fn ndjson(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn label_chunk(key: &str, value: &str) -> String {
    let emitter = Emitter::new(Vec::new());
    emitter.test_label(key, &[value]);
    String::from_utf8(emitter.into_inner()).unwrap()
}

/// Test the report subcommand with the default config path
#[test]
fn test_report_uses_default_config() {
    let cli = Cli::try_parse_from(["zbr-agent", "report"]).unwrap();
    assert!(matches!(cli.command, Commands::Report));
    assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
}

/// Test --config flag recognition
#[test]
fn test_config_flag() {
    let cli = Cli::try_parse_from(["zbr-agent", "--config", "ci/zbr.toml", "report"]).unwrap();
    assert_eq!(cli.config, PathBuf::from("ci/zbr.toml"));
}

/// Test emit subcommands parse into side-channel events
#[test]
fn test_emit_subcommands() {
    let cli =
        Cli::try_parse_from(["zbr-agent", "emit", "test-label", "feature", "login", "cart"])
            .unwrap();
    match cli.command {
        Commands::Emit { event } => assert_eq!(
            event,
            EmitCommand::TestLabel {
                key: "feature".to_string(),
                values: vec!["login".to_string(), "cart".to_string()],
            }
        ),
        _ => panic!("expected emit"),
    }

    let cli = Cli::try_parse_from([
        "zbr-agent", "emit", "test-case", "XRAY", "QT-1", "--status", "BLOCKED",
    ])
    .unwrap();
    match cli.command {
        Commands::Emit { event } => assert_eq!(
            event,
            EmitCommand::TestCase {
                tcm_type: "XRAY".to_string(),
                case_ids: vec!["QT-1".to_string()],
                status: Some("BLOCKED".to_string()),
            }
        ),
        _ => panic!("expected emit"),
    }

    let cli = Cli::try_parse_from(["zbr-agent", "emit", "log", "hello"]).unwrap();
    match cli.command {
        Commands::Emit {
            event: EmitCommand::Log { level, message },
        } => {
            assert_eq!(level, "INFO");
            assert_eq!(message, "hello");
        }
        _ => panic!("expected emit log"),
    }
}

/// Test a missing subcommand is rejected
#[test]
fn test_missing_subcommand_rejected() {
    assert!(Cli::try_parse_from(["zbr-agent"]).is_err());
}

/// Test runner events decode from the bridge format
#[test]
fn test_runner_event_decoding() {
    let line = json!({
        "event": "std_out",
        "testId": "a",
        "retry": 1,
        "chunk": "hello"
    })
    .to_string();
    match serde_json::from_str::<RunnerEvent>(&line).unwrap() {
        RunnerEvent::StdOut {
            test_id,
            retry,
            chunk,
        } => {
            assert_eq!(test_id.as_deref(), Some("a"));
            assert_eq!(retry, 1);
            assert_eq!(chunk, "hello");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let line = json!({ "event": "end" }).to_string();
    assert!(matches!(
        serde_json::from_str::<RunnerEvent>(&line).unwrap(),
        RunnerEvent::End
    ));
}

/// Test the bridge drives a full run and returns its summary
#[tokio::test]
async fn test_bridge_drives_full_run() {
    let api = Arc::new(RecordingApi::new());
    let reporter: Arc<dyn Reporter> = Arc::new(ZbrReporter::new(enabled_config(), api.clone()));

    let input = ndjson(&[
        json!({ "event": "begin", "suite": { "tests": [test_json("a", "adds item")] } }),
        json!({ "event": "test_begin", "test": test_json("a", "adds item"),
                "result": { "startTime": "2024-01-01T00:00:00Z" } }),
        json!({ "event": "std_out", "testId": "a", "chunk": label_chunk("feature", "cart") }),
        json!({ "event": "test_end", "test": test_json("a", "adds item"),
                "result": { "status": "passed", "startTime": "2024-01-01T00:00:00Z", "durationMs": 20 } }),
        json!({ "event": "end" }),
    ]);

    let summary = bridge::drive(reporter, input.as_bytes())
        .await
        .unwrap()
        .expect("summary after end event");

    assert_eq!(summary.finished, 1);
    assert!(!summary.has_failures());
    assert_eq!(api.calls_of("attach_test_labels").len(), 1);
    assert_eq!(api.ops().last(), Some(&"finish_run"));
}

/// Test malformed and blank lines are skipped
#[tokio::test]
async fn test_bridge_skips_malformed_lines() {
    let api = Arc::new(RecordingApi::new());
    let reporter: Arc<dyn Reporter> = Arc::new(ZbrReporter::new(enabled_config(), api.clone()));

    let input = format!(
        "{}\n\nnot an event\n{}\n",
        json!({ "event": "begin", "suite": {} }),
        json!({ "event": "end" })
    );
    let summary = bridge::drive(reporter, input.as_bytes()).await.unwrap();

    assert_eq!(summary.map(|s| s.total), Some(0));
    assert_eq!(api.ops(), vec!["authenticate", "start_run", "finish_run"]);
}

/// Test a stream closed without an end event never finishes the run
#[tokio::test]
async fn test_bridge_eof_without_end() {
    let api = Arc::new(RecordingApi::new());
    let reporter: Arc<dyn Reporter> = Arc::new(ZbrReporter::new(enabled_config(), api.clone()));

    let input = json!({ "event": "begin", "suite": {} }).to_string();
    let summary = bridge::drive(reporter, input.as_bytes()).await.unwrap();

    assert!(summary.is_none());
    assert!(api.calls_of("finish_run").is_empty());
}
