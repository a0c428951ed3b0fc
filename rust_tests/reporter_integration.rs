//! Integration tests for the reporter state machine, driven against an
//! in-memory recording backend.

mod support;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use support::{at, chromium, enabled_config, finished, make_test, RecordingApi, RUN_ID};
use zbr_agent::attachments::VideoTranscoder;
use zbr_agent::api::{
    ExchangedRunContext, FinishTestRequest, Label, RegisteredTest, RunMode, StartTestRequest,
    TestStatus,
};
use zbr_agent::error::{AgentError, AgentResult, Stage};
use zbr_agent::protocol::ArtifactSource;
use zbr_agent::reporter::{Reporter, ZbrReporter};
use zbr_agent::rerun::correlation_data;
use zbr_agent::runner::{Attachment, Attempt, RunnerConfig, Suite, TestCase, TestResult};
use zbr_agent::sdk::Emitter;

fn emitted(f: impl FnOnce(&Emitter<Vec<u8>>)) -> String {
    let emitter = Emitter::new(Vec::new());
    f(&emitter);
    String::from_utf8(emitter.into_inner()).unwrap()
}

fn suite_of(tests: &[&TestCase]) -> Suite {
    Suite {
        title: String::new(),
        suites: vec![],
        tests: tests.iter().map(|t| (*t).clone()).collect(),
    }
}

fn attempt(test: &TestCase) -> Attempt {
    Attempt::new(test.id.clone(), 0)
}

fn finish_request(api: &RecordingApi, test_id: i64) -> FinishTestRequest {
    let call = api
        .calls_of("finish_test")
        .into_iter()
        .find(|c| c.test == Some(test_id))
        .expect("finish_test call");
    serde_json::from_value(call.body).unwrap()
}

async fn started(tests: &[&TestCase], api: &Arc<RecordingApi>) -> ZbrReporter {
    let reporter = ZbrReporter::new(enabled_config(), api.clone());
    let mut suite = suite_of(tests);
    reporter
        .on_begin(&RunnerConfig::default(), &mut suite)
        .await
        .unwrap();
    reporter
}

/// begin, stdout chunks, end for one test.
async fn run_test(reporter: &ZbrReporter, test: &TestCase, chunks: &[String], result: TestResult) {
    reporter
        .on_test_begin(test, &TestResult::started_at(result.start_time))
        .await;
    for chunk in chunks {
        reporter.on_std_out(chunk, Some(&attempt(test)));
    }
    reporter.on_test_end(test, &result).await;
}

#[tokio::test]
async fn test_full_lifecycle_call_order() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "@smoke adds item");
    let reporter = started(&[&test], &api).await;

    let chunks = vec![
        emitted(|e| e.test_case(zbr_agent::sdk::TCM_XRAY, &["X-1"], None)),
        emitted(|e| e.set_maintainer("alice")),
        emitted(|e| e.test_label("feature", &["cart"])),
        emitted(|e| e.test_artifact_reference("ticket", "JIRA-1")),
        emitted(|e| e.test_log("info", "added item")),
    ];
    run_test(&reporter, &test, &chunks, finished("passed", 1_000, 50)).await;
    let summary = reporter.on_end().await.unwrap();

    assert_eq!(
        api.ops(),
        vec![
            "authenticate",
            "start_run",
            "start_test",
            "upsert_test_cases",
            "update_test",
            "attach_test_labels",
            "attach_test_artifact_references",
            "send_logs",
            "finish_test",
            "finish_run",
        ]
    );

    let start: StartTestRequest =
        serde_json::from_value(api.calls_of("start_test")[0].body.clone()).unwrap();
    assert_eq!(start.name, "cart.spec.ts > @smoke adds item");
    assert_eq!(start.labels, vec![Label::new("tag", "smoke")]);
    assert_eq!(start.correlation_data, correlation_data(&chromium()));

    let test_id = api.test_id_of("cart.spec.ts > @smoke adds item").unwrap();
    let labels: Vec<Label> =
        serde_json::from_value(api.calls_of("attach_test_labels")[0].body.clone()).unwrap();
    assert_eq!(
        labels,
        vec![Label::new("tag", "smoke"), Label::new("feature", "cart")]
    );
    assert_eq!(finish_request(&api, test_id).result, TestStatus::Passed);
    assert_eq!(summary.finished, 1);
    assert!(!summary.has_failures());
}

#[tokio::test]
async fn test_label_merge_is_idempotent_union() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    let chunks = vec![
        emitted(|e| e.test_label("feature", &["login", "cart"])),
        emitted(|e| e.test_label("feature", &["cart", "search"])),
    ];
    run_test(&reporter, &test, &chunks, finished("passed", 0, 10)).await;

    let labels: Vec<Label> =
        serde_json::from_value(api.calls_of("attach_test_labels")[0].body.clone()).unwrap();
    let values: Vec<&str> = labels.iter().map(|l| l.value.as_str()).collect();
    assert_eq!(values, vec!["login", "cart", "search"]);
}

#[tokio::test]
async fn test_artifact_reference_last_write_wins() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    let chunks = vec![
        emitted(|e| e.test_artifact_reference("docs", "v1")),
        emitted(|e| e.test_artifact_reference("build", "42")),
        emitted(|e| e.test_artifact_reference("docs", "v2")),
    ];
    run_test(&reporter, &test, &chunks, finished("passed", 0, 10)).await;

    let body = &api.calls_of("attach_test_artifact_references")[0].body;
    assert_eq!(
        body,
        &serde_json::json!([
            { "name": "docs", "value": "v2" },
            { "name": "build", "value": "42" }
        ])
    );
}

#[tokio::test]
async fn test_revert_short_circuits_uploads() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    let chunks = vec![
        emitted(|e| e.test_label("feature", &["cart"])),
        emitted(|e| e.test_log("INFO", "hello")),
        emitted(|e| e.revert_registration()),
    ];
    run_test(&reporter, &test, &chunks, finished("passed", 0, 10)).await;
    let summary = reporter.on_end().await.unwrap();

    let test_id = api.test_id_of("cart.spec.ts > adds item").unwrap();
    assert_eq!(api.ops_for(test_id), vec!["start_test", "revert_test"]);
    assert_eq!(summary.reverted, 1);
    assert_eq!(summary.finished, 0);
}

#[tokio::test]
async fn test_zero_duration_end_is_after_start() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    run_test(&reporter, &test, &[], finished("passed", 5_000, 0)).await;

    let test_id = api.test_id_of("cart.spec.ts > adds item").unwrap();
    let finish = finish_request(&api, test_id);
    assert!(finish.ended_at > at(5_000));
    assert_eq!(finish.ended_at.timestamp_millis(), 5_001);
}

#[tokio::test]
async fn test_status_mapping_is_total() {
    let api = Arc::new(RecordingApi::new());
    let cases = [
        ("passed", TestStatus::Passed),
        ("failed", TestStatus::Failed),
        ("skipped", TestStatus::Skipped),
        ("timedOut", TestStatus::Aborted),
        ("interrupted", TestStatus::Aborted),
        ("unknown-garbage", TestStatus::Aborted),
    ];
    let tests: Vec<TestCase> = cases
        .iter()
        .map(|(status, _)| make_test(status, status))
        .collect();
    let refs: Vec<&TestCase> = tests.iter().collect();
    let reporter = started(&refs, &api).await;

    for test in &tests {
        run_test(&reporter, test, &[], finished(&test.id, 0, 10)).await;
    }

    for (status, expected) in cases {
        let test_id = api
            .test_id_of(&format!("cart.spec.ts > {}", status))
            .unwrap();
        assert_eq!(finish_request(&api, test_id).result, expected, "{}", status);
    }
}

#[tokio::test]
async fn test_failure_reason_is_stripped() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    let mut result = finished("failed", 0, 10);
    result.error = Some(zbr_agent::runner::TestError {
        message: Some("\u{1b}[31mExpected 1\u{1b}[39m".to_string()),
        stack: None,
    });
    run_test(&reporter, &test, &[], result).await;

    let test_id = api.test_id_of("cart.spec.ts > adds item").unwrap();
    assert_eq!(
        finish_request(&api, test_id).reason.as_deref(),
        Some("Expected 1")
    );
}

#[tokio::test]
async fn test_subset_rerun_restarts_matching_tests_only() {
    let kept = make_test("a", "adds item");
    let dropped = make_test("b", "removes item");
    let also_kept = make_test("c", "checks out");
    let context = ExchangedRunContext {
        mode: RunMode::Rerun,
        test_run_uuid: Some("previous-uuid".to_string()),
        run_allowed: true,
        reason: None,
        run_only_specific_tests: true,
        tests_to_run: vec![
            RegisteredTest {
                id: 10,
                name: kept.full_name(),
                correlation_data: correlation_data(&chromium()),
            },
            RegisteredTest {
                id: 12,
                name: also_kept.full_name(),
                correlation_data: correlation_data(&chromium()),
            },
        ],
    };
    let api = Arc::new(RecordingApi::new().with_context(context));
    let mut config = enabled_config();
    config.run_context = Some(r#"{"testRunUuid":"previous-uuid"}"#.to_string());
    let reporter = ZbrReporter::new(config, api.clone());

    let mut suite = suite_of(&[&kept, &dropped, &also_kept]);
    reporter
        .on_begin(&RunnerConfig::default(), &mut suite)
        .await
        .unwrap();
    let ids: Vec<&str> = suite.all_tests().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(api.calls_of("start_run")[0].body["uuid"], "previous-uuid");

    for test in suite.all_tests() {
        run_test(&reporter, test, &[], finished("passed", 0, 10)).await;
    }
    let summary = reporter.on_end().await.unwrap();

    let restarted: Vec<Option<i64>> = api
        .calls_of("restart_test")
        .into_iter()
        .map(|c| c.test)
        .collect();
    assert_eq!(restarted, vec![Some(10), Some(12)]);
    assert!(api.calls_of("start_test").is_empty());
    assert_eq!(summary.total, 2);
    assert_eq!(summary.finished, 2);
}

#[tokio::test]
async fn test_rerun_fingerprint_mismatch_abandons_only_that_test() {
    let known = make_test("a", "adds item");
    let context = ExchangedRunContext {
        mode: RunMode::Rerun,
        run_allowed: true,
        run_only_specific_tests: true,
        tests_to_run: vec![RegisteredTest {
            id: 10,
            name: known.full_name(),
            correlation_data: correlation_data(&chromium()),
        }],
        ..ExchangedRunContext::default()
    };
    let api = Arc::new(RecordingApi::new().with_context(context));
    let mut config = enabled_config();
    config.run_context = Some("ctx".to_string());
    let reporter = ZbrReporter::new(config, api.clone());
    let mut suite = suite_of(&[&known]);
    reporter
        .on_begin(&RunnerConfig::default(), &mut suite)
        .await
        .unwrap();

    // The runner reports a test the resolver never selected.
    let mut stray = make_test("z", "stray");
    stray.platform.browser_version = "121.0".to_string();
    run_test(&reporter, &stray, &[], finished("passed", 0, 10)).await;
    run_test(&reporter, &known, &[], finished("passed", 0, 10)).await;
    let summary = reporter.on_end().await.unwrap();

    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.finished, 1);
    assert_eq!(summary.failure_count(Stage::RestartTest), 1);
    assert_eq!(api.calls_of("finish_test").len(), 1);
}

#[tokio::test]
async fn test_run_not_allowed_aborts_before_tests() {
    let context = ExchangedRunContext {
        mode: RunMode::Rerun,
        run_allowed: false,
        reason: Some("quota exceeded".to_string()),
        run_only_specific_tests: true,
        ..ExchangedRunContext::default()
    };
    let api = Arc::new(RecordingApi::new().with_context(context));
    let mut config = enabled_config();
    config.run_context = Some("ctx".to_string());
    let reporter = ZbrReporter::new(config, api.clone());
    let test = make_test("a", "adds item");
    let mut suite = suite_of(&[&test]);

    match reporter.on_begin(&RunnerConfig::default(), &mut suite).await {
        Err(AgentError::RunNotAllowed { reason }) => assert_eq!(reason, "quota exceeded"),
        other => panic!("expected run-not-allowed, got {:?}", other),
    }

    run_test(&reporter, &test, &[], finished("passed", 0, 10)).await;
    assert!(matches!(reporter.on_end().await, Err(AgentError::RunAborted)));
    assert_eq!(api.ops(), vec!["authenticate", "exchange_run_context"]);
    assert_eq!(reporter.state().summary().failure_count(Stage::StartRun), 1);
}

#[tokio::test]
async fn test_new_run_proceeds_when_not_allowed() {
    let context = ExchangedRunContext {
        mode: RunMode::New,
        run_allowed: false,
        reason: Some("quota exceeded".to_string()),
        ..ExchangedRunContext::default()
    };
    let api = Arc::new(RecordingApi::new().with_context(context));
    let mut config = enabled_config();
    config.run_context = Some("ctx".to_string());
    let reporter = ZbrReporter::new(config, api.clone());
    let test = make_test("a", "adds item");
    let mut suite = suite_of(&[&test]);

    reporter
        .on_begin(&RunnerConfig::default(), &mut suite)
        .await
        .unwrap();
    run_test(&reporter, &test, &[], finished("passed", 0, 10)).await;
    let summary = reporter.on_end().await.unwrap();

    assert_eq!(summary.finished, 1);
    assert_eq!(api.ops().last(), Some(&"finish_run"));
}

#[tokio::test]
async fn test_non_json_stdout_is_tolerated() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    let chunks = vec![
        "opening the cart page".to_string(),
        "{ not json at all".to_string(),
        emitted(|e| e.test_label("feature", &["cart"])),
    ];
    run_test(&reporter, &test, &chunks, finished("passed", 0, 10)).await;

    let labels: Vec<Label> =
        serde_json::from_value(api.calls_of("attach_test_labels")[0].body.clone()).unwrap();
    assert_eq!(labels, vec![Label::new("feature", "cart")]);

    // Console output is kept as INFO log lines.
    let logs = &api.calls_of("send_logs")[0].body;
    assert_eq!(logs[0]["message"], "opening the cart page");
    assert_eq!(logs[0]["level"], "INFO");
    assert_eq!(logs[1]["message"], "{ not json at all");
}

#[tokio::test]
async fn test_screenshot_failure_is_isolated() {
    let api = Arc::new(RecordingApi::new().failing("upload_screenshot"));
    let first = make_test("a", "adds item");
    let second = make_test("b", "removes item");
    let reporter = started(&[&first, &second], &api).await;

    let mut result = finished("passed", 0, 10);
    result.attachments = Some(vec![Attachment {
        name: "screenshot".to_string(),
        content_type: "image/png".to_string(),
        path: None,
        body: Some(vec![137, 80, 78, 71]),
    }]);
    let label = vec![emitted(|e| e.test_label("feature", &["cart"]))];
    run_test(&reporter, &first, &label, result).await;
    run_test(&reporter, &second, &label, finished("passed", 0, 10)).await;
    let summary = reporter.on_end().await.unwrap();

    let first_id = api.test_id_of("cart.spec.ts > adds item").unwrap();
    let second_id = api.test_id_of("cart.spec.ts > removes item").unwrap();
    let first_ops = api.ops_for(first_id);
    assert!(first_ops.contains(&"attach_test_labels"));
    assert!(first_ops.contains(&"upload_screenshot"));
    assert_eq!(first_ops.last(), Some(&"finish_test"));
    assert_eq!(api.ops_for(second_id).last(), Some(&"finish_test"));
    assert_eq!(summary.failure_count(Stage::UploadScreenshots), 1);
    assert_eq!(summary.finished, 2);
}

struct BrokenTranscoder;

impl VideoTranscoder for BrokenTranscoder {
    fn transcode(&self, _input: &Path) -> AgentResult<PathBuf> {
        Err(AgentError::Transcode {
            message: "ffmpeg not found".to_string(),
        })
    }
}

#[tokio::test]
async fn test_transcode_failure_keeps_screenshots_and_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let video = dir.path().join("video.webm");
    std::fs::write(&video, b"webm").unwrap();

    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = ZbrReporter::new(enabled_config(), api.clone())
        .with_transcoder(Arc::new(BrokenTranscoder));
    reporter
        .on_begin(&RunnerConfig::default(), &mut suite_of(&[&test]))
        .await
        .unwrap();

    let mut result = finished("passed", 0, 10);
    result.attachments = Some(vec![
        Attachment {
            name: "video".to_string(),
            content_type: "video/webm".to_string(),
            path: Some(video),
            body: None,
        },
        Attachment {
            name: "screenshot".to_string(),
            content_type: "image/png".to_string(),
            path: None,
            body: Some(vec![137, 80, 78, 71]),
        },
        Attachment {
            name: "trace.zip".to_string(),
            content_type: "application/zip".to_string(),
            path: None,
            body: Some(vec![80, 75]),
        },
    ]);
    run_test(&reporter, &test, &[], result).await;
    let summary = reporter.on_end().await.unwrap();

    let test_id = api.test_id_of("cart.spec.ts > adds item").unwrap();
    let ops = api.ops_for(test_id);
    assert!(ops.contains(&"upload_screenshot"));
    assert!(ops.contains(&"upload_test_artifact"));
    assert!(!ops.contains(&"start_session"));
    assert_eq!(ops.last(), Some(&"finish_test"));
    assert_eq!(summary.failure_count(Stage::ProcessAttachments), 1);
    assert_eq!(summary.finished, 1);
}

#[tokio::test]
async fn test_run_end_waits_for_delayed_begin() {
    let slow = make_test("slow", "slow test");
    let fast = make_test("fast", "fast test");
    let api = Arc::new(
        RecordingApi::new().delay_start("cart.spec.ts > slow test", Duration::from_millis(200)),
    );
    let reporter = Arc::new(started(&[&slow, &fast], &api).await);

    let slow_begin = {
        let (reporter, slow) = (reporter.clone(), slow.clone());
        tokio::spawn(async move {
            reporter
                .on_test_begin(&slow, &TestResult::started_at(at(0)))
                .await
        })
    };
    let slow_end = {
        let (reporter, slow) = (reporter.clone(), slow.clone());
        tokio::spawn(async move { reporter.on_test_end(&slow, &finished("passed", 0, 10)).await })
    };
    run_test(&reporter, &fast, &[], finished("passed", 0, 10)).await;

    let summary = reporter.on_end().await.unwrap();
    slow_begin.await.unwrap();
    slow_end.await.unwrap();

    let ops = api.ops();
    let finish_run = api.position("finish_run").unwrap();
    let last_finish_test = ops.iter().rposition(|o| *o == "finish_test").unwrap();
    assert!(finish_run > last_finish_test);
    assert_eq!(api.calls_of("finish_test").len(), 2);
    assert_eq!(summary.finished, 2);
}

#[tokio::test]
async fn test_start_failure_abandons_without_blocking_run() {
    let api = Arc::new(RecordingApi::new().failing("start_test"));
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    run_test(&reporter, &test, &[], finished("passed", 0, 10)).await;
    let summary = reporter.on_end().await.unwrap();

    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.failure_count(Stage::StartTest), 1);
    assert!(api.calls_of("finish_test").is_empty());
    assert_eq!(api.ops().last(), Some(&"finish_run"));
}

#[tokio::test]
async fn test_retry_is_reported_as_new_attempt() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "flaky");
    let reporter = started(&[&test], &api).await;

    run_test(&reporter, &test, &[], finished("failed", 0, 10)).await;
    let mut retry = finished("passed", 100, 10);
    retry.retry = 1;
    let mut begin = TestResult::started_at(at(100));
    begin.retry = 1;
    reporter.on_test_begin(&test, &begin).await;
    reporter.on_std_out(
        &emitted(|e| e.test_label("attempt", &["second"])),
        Some(&Attempt::new("a", 1)),
    );
    reporter.on_test_end(&test, &retry).await;
    let summary = reporter.on_end().await.unwrap();

    let finishes = api.calls_of("finish_test");
    assert_eq!(finishes.len(), 2);
    assert_ne!(finishes[0].test, finishes[1].test);
    let labels = api.calls_of("attach_test_labels");
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].test, finishes[1].test);
    assert_eq!(summary.finished, 2);
}

#[tokio::test]
async fn test_run_level_events_flushed_before_finish_run() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    let chunks = vec![
        emitted(|e| e.run_label("env", &["staging"])),
        emitted(|e| e.run_artifact_reference("build", "https://ci/1")),
        emitted(|e| e.run_artifact(ArtifactSource::Buffer(b"log".to_vec()), Some("ci.log"))),
    ];
    run_test(&reporter, &test, &chunks, finished("passed", 0, 10)).await;
    reporter.on_end().await.unwrap();

    let ops = api.ops();
    let tail: Vec<&str> = ops[ops.len() - 4..].to_vec();
    assert_eq!(
        tail,
        vec![
            "attach_run_labels",
            "attach_run_artifact_references",
            "upload_run_artifact",
            "finish_run"
        ]
    );
    assert_eq!(api.calls_of("upload_run_artifact")[0].body["name"], "ci.log");
}

#[tokio::test]
async fn test_video_creates_session_and_uploads() {
    let dir = tempfile::TempDir::new().unwrap();
    let video = dir.path().join("video.webm");
    std::fs::write(&video, b"webm").unwrap();

    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;

    let mut result = finished("passed", 0, 10);
    result.attachments = Some(vec![Attachment {
        name: "video".to_string(),
        content_type: "video/webm".to_string(),
        path: Some(video),
        body: None,
    }]);
    run_test(&reporter, &test, &[], result).await;

    let test_id = api.test_id_of("cart.spec.ts > adds item").unwrap();
    let ops = api.ops();
    let session = ops.iter().position(|o| *o == "start_session").unwrap();
    assert_eq!(ops[session + 1], "finish_session");
    assert_eq!(ops[session + 2], "upload_session_video");
    assert_eq!(api.calls_of("start_session")[0].body["testIds"][0], test_id);
    assert_eq!(api.calls_of("upload_session_video")[0].body["name"], "video.webm");
}

#[tokio::test]
async fn test_tcm_config_pushed_only_when_set() {
    let api = Arc::new(RecordingApi::new());
    started(&[], &api).await;
    assert!(api.calls_of("update_tcm_configs").is_empty());

    let api = Arc::new(RecordingApi::new());
    let mut config = enabled_config();
    config.tcm.xray.execution_key = Some("QT-100".to_string());
    let reporter = ZbrReporter::new(config, api.clone());
    reporter
        .on_begin(&RunnerConfig::default(), &mut Suite::default())
        .await
        .unwrap();
    let calls = api.calls_of("update_tcm_configs");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body["xray"]["executionKey"], "QT-100");
}

#[tokio::test]
async fn test_disabled_reporter_is_a_no_op() {
    let api = Arc::new(RecordingApi::new());
    let mut config = enabled_config();
    config.enabled = false;
    let reporter = ZbrReporter::new(config, api.clone());
    let test = make_test("a", "adds item");
    let mut suite = suite_of(&[&test]);

    reporter
        .on_begin(&RunnerConfig::default(), &mut suite)
        .await
        .unwrap();
    run_test(&reporter, &test, &[], finished("passed", 0, 10)).await;
    let summary = reporter.on_end().await.unwrap();

    assert!(api.ops().is_empty());
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_start_run_uses_run_id_everywhere() {
    let api = Arc::new(RecordingApi::new());
    let test = make_test("a", "adds item");
    let reporter = started(&[&test], &api).await;
    assert_eq!(reporter.state().wait_run().await.unwrap(), RUN_ID);
    assert_eq!(api.calls_of("start_run")[0].body["projectKey"], "DEF");
}
