//! Integration tests for the backend client against a mock HTTP server.

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zbr_agent::api::{
    FinishTestRequest, Label, LogEntry, ReportingApi, RunConfigBlock, RunMode, StartRunRequest,
    StartTestRequest, TestStatus, UploadFile,
};
use zbr_agent::client::{ZbrClient, SCREENSHOT_CAPTURED_AT_HEADER, VIDEO_CONTENT_LENGTH_HEADER};
use zbr_agent::error::AgentError;

const RUNS: &str = "/api/reporting/v1/test-runs";

async fn mount_auth(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/iam/v1/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "long-lived" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authToken": "short-lived",
            "authTokenType": "Bearer"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> ZbrClient {
    ZbrClient::new(&format!("{}/", server.uri()), "long-lived").unwrap()
}

fn start_test_request(name: &str) -> StartTestRequest {
    StartTestRequest {
        name: name.to_string(),
        class_name: "cart.spec.ts".to_string(),
        method_name: name.to_string(),
        started_at: Utc::now(),
        maintainer: None,
        labels: vec![],
        correlation_data: None,
    }
}

#[tokio::test]
async fn test_bearer_token_exchanged_once() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(format!("{}/3/tests", RUNS)))
        .and(header("authorization", "Bearer short-lived"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 11 })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.authenticate_if_required().await.unwrap();
    assert_eq!(client.start_test(3, &start_test_request("a")).await.unwrap(), 11);
    assert_eq!(client.start_test(3, &start_test_request("b")).await.unwrap(), 11);
}

#[tokio::test]
async fn test_auth_failure_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/iam/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let result = client_for(&server).authenticate_if_required().await;
    assert!(matches!(result, Err(AgentError::Auth { .. })));
}

#[tokio::test]
async fn test_start_run_sends_project_key() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(RUNS))
        .and(query_param("projectKey", "WEB"))
        .and(body_partial_json(json!({
            "name": "nightly",
            "framework": "playwright",
            "config": { "environment": "staging", "treatSkipsAsFailures": true }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 501 })))
        .expect(1)
        .mount(&server)
        .await;

    let request = StartRunRequest {
        uuid: None,
        name: "nightly".to_string(),
        framework: "playwright".to_string(),
        started_at: Utc::now(),
        config: RunConfigBlock {
            environment: Some("staging".to_string()),
            build: None,
            treat_skips_as_failures: true,
        },
        milestone: None,
        notifications: None,
    };
    assert_eq!(client_for(&server).start_run("WEB", &request).await.unwrap(), 501);
}

#[tokio::test]
async fn test_non_success_status_is_http_error() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/3/tests/9", RUNS)))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let request = FinishTestRequest {
        result: TestStatus::Passed,
        reason: None,
        ended_at: Utc::now(),
    };
    match client_for(&server).finish_test(3, 9, &request).await {
        Err(AgentError::Http { status, path, body }) => {
            assert_eq!(status, 500);
            assert_eq!(path, format!("{}/3/tests/9", RUNS));
            assert_eq!(body, "boom");
        }
        other => panic!("expected http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_payloads_send_nothing() {
    let server = MockServer::start().await;
    mount_auth(&server, 0).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/3/logs", RUNS)))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.attach_test_labels(3, 9, &[]).await.unwrap();
    client.attach_run_labels(3, &[]).await.unwrap();
    client.attach_test_artifact_references(3, 9, &[]).await.unwrap();
    client.attach_run_artifact_references(3, &[]).await.unwrap();
    client.upsert_test_cases(3, 9, &[]).await.unwrap();
    client.send_logs(3, &[]).await.unwrap();
}

#[tokio::test]
async fn test_labels_and_logs_bodies() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/3/tests/9/labels", RUNS)))
        .and(body_json(json!({ "items": [{ "key": "tag", "value": "smoke" }] })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/3/logs", RUNS)))
        .and(body_json(json!([{
            "testId": 9,
            "level": "INFO",
            "timestamp": 1700000000000i64,
            "message": "hello"
        }])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .attach_test_labels(3, 9, &[Label::new("tag", "smoke")])
        .await
        .unwrap();
    client
        .send_logs(
            3,
            &[LogEntry {
                test_id: 9,
                level: "INFO".to_string(),
                timestamp: 1_700_000_000_000,
                message: "hello".to_string(),
            }],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_screenshot_carries_capture_header() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(format!("{}/3/tests/9/screenshots", RUNS)))
        .and(header("content-type", "image/png"))
        .and(header(SCREENSHOT_CAPTURED_AT_HEADER, "1700000000000"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .upload_screenshot(3, 9, vec![137, 80, 78, 71], 1_700_000_000_000)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_video_carries_content_length_header() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(format!("{}/3/test-sessions/4/artifacts", RUNS)))
        .and(header(VIDEO_CONTENT_LENGTH_HEADER, "5"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .upload_session_video(
            3,
            4,
            UploadFile {
                name: "video.mp4".to_string(),
                bytes: vec![1, 2, 3, 4, 5],
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_revert_is_delete() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/3/tests/9", RUNS)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).revert_test_registration(3, 9).await.unwrap();
}

#[tokio::test]
async fn test_exchange_run_context() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/reporting/v1/run-context-exchanges"))
        .and(body_json(json!({ "id": "previous-run" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mode": "RERUN",
            "testRunUuid": "uuid-1",
            "runAllowed": true,
            "runOnlySpecificTests": true,
            "testsToRun": [
                { "id": 5, "name": "cart > adds", "correlationData": "{\"browserName\":\"chromium\"}" }
            ]
        })))
        .mount(&server)
        .await;

    let context = client_for(&server)
        .exchange_run_context(r#"{"id":"previous-run"}"#)
        .await
        .unwrap();
    assert_eq!(context.mode, RunMode::Rerun);
    assert_eq!(context.test_run_uuid.as_deref(), Some("uuid-1"));
    assert!(context.run_only_specific_tests);
    assert_eq!(context.tests_to_run.len(), 1);
    assert_eq!(context.tests_to_run[0].id, 5);
}

#[tokio::test]
async fn test_missing_id_is_invalid_response() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(format!("{}/3/tests", RUNS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .start_test(3, &start_test_request("a"))
        .await;
    assert!(matches!(result, Err(AgentError::InvalidResponse { .. })));
}
