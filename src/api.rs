//! Backend operations and their payloads.
//!
//! `ReportingApi` is the seam between the reporter state machine and the
//! network: one method per remote entity action. `ZbrClient` is the HTTP
//! implementation; tests substitute an in-memory recorder.

use crate::error::AgentResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RunId = i64;
pub type TestId = i64;
pub type SessionId = i64;

// =============================================================================
// Results
// =============================================================================

/// Terminal result of a remote test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Aborted,
    Skipped,
}

impl TestStatus {
    /// Map a runner status string. Total: anything unrecognised is `Aborted`.
    pub fn from_runner(status: &str) -> Self {
        match status {
            "passed" => TestStatus::Passed,
            "failed" => TestStatus::Failed,
            "skipped" => TestStatus::Skipped,
            _ => TestStatus::Aborted,
        }
    }
}

// =============================================================================
// Run
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfigBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    pub treat_skips_as_failures: bool,
}

/// Only one of `id` / `name` is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTarget {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notifications {
    pub notify_on_each_failure: bool,
    pub targets: Vec<NotificationTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    /// Continuation UUID; set only when this run continues a previous one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    pub framework: String,
    pub started_at: DateTime<Utc>,
    pub config: RunConfigBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<Milestone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRunRequest {
    pub ended_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTestRequest {
    pub name: String,
    pub class_name: String,
    pub method_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    pub labels: Vec<Label>,
    /// JSON-encoded `{browserName, browserVersion, osName}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTestRequest {
    pub maintainer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishTestRequest {
    pub result: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub test_id: TestId,
    pub level: String,
    /// Epoch millis.
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseLink {
    pub tcm_type: String,
    pub test_case_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_status: Option<String>,
}

// =============================================================================
// Sessions & Uploads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub desired_capabilities: serde_json::Value,
    pub capabilities: serde_json::Value,
    pub test_ids: Vec<TestId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishSessionRequest {
    pub ended_at: DateTime<Utc>,
    pub test_ids: Vec<TestId>,
}

/// File content ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

// =============================================================================
// Run Context & TCM
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    #[default]
    New,
    Rerun,
}

/// A test registered by the previous run, eligible for restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTest {
    pub id: TestId,
    pub name: String,
    #[serde(default)]
    pub correlation_data: Option<String>,
}

/// Backend's decision for a presented run context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangedRunContext {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub test_run_uuid: Option<String>,
    #[serde(default = "default_true")]
    pub run_allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub run_only_specific_tests: bool,
    #[serde(default)]
    pub tests_to_run: Vec<RegisteredTest>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct ZebrunnerSync {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct TestRailSync {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_all_test_cases: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct XraySync {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct ZephyrSync {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_cycle_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira_project_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct TcmConfigRequest {
    pub zebrunner: ZebrunnerSync,
    pub test_rail: TestRailSync,
    pub xray: XraySync,
    pub zephyr: ZephyrSync,
}

// =============================================================================
// ReportingApi
// =============================================================================

/// One method per backend operation.
///
/// Mutating calls are fire-and-forget except where the backend assigns an
/// id. Implementations do not retry.
#[async_trait]
pub trait ReportingApi: Send + Sync {
    /// Exchange the access token for a bearer token once per process.
    async fn authenticate_if_required(&self) -> AgentResult<()>;

    async fn exchange_run_context(&self, context: &str) -> AgentResult<ExchangedRunContext>;

    async fn start_run(&self, project_key: &str, req: &StartRunRequest) -> AgentResult<RunId>;

    async fn finish_run(&self, run: RunId, req: &FinishRunRequest) -> AgentResult<()>;

    async fn update_tcm_configs(&self, run: RunId, req: &TcmConfigRequest) -> AgentResult<()>;

    async fn start_test(&self, run: RunId, req: &StartTestRequest) -> AgentResult<TestId>;

    async fn restart_test(
        &self,
        run: RunId,
        test: TestId,
        req: &StartTestRequest,
    ) -> AgentResult<TestId>;

    async fn update_test(&self, run: RunId, test: TestId, req: &UpdateTestRequest)
        -> AgentResult<()>;

    async fn finish_test(&self, run: RunId, test: TestId, req: &FinishTestRequest)
        -> AgentResult<()>;

    async fn revert_test_registration(&self, run: RunId, test: TestId) -> AgentResult<()>;

    async fn start_session(&self, run: RunId, req: &StartSessionRequest) -> AgentResult<SessionId>;

    async fn finish_session(
        &self,
        run: RunId,
        session: SessionId,
        req: &FinishSessionRequest,
    ) -> AgentResult<()>;

    async fn upload_screenshot(
        &self,
        run: RunId,
        test: TestId,
        bytes: Vec<u8>,
        captured_at: i64,
    ) -> AgentResult<()>;

    async fn upload_test_artifact(&self, run: RunId, test: TestId, file: UploadFile)
        -> AgentResult<()>;

    async fn upload_run_artifact(&self, run: RunId, file: UploadFile) -> AgentResult<()>;

    async fn upload_session_video(
        &self,
        run: RunId,
        session: SessionId,
        file: UploadFile,
    ) -> AgentResult<()>;

    async fn send_logs(&self, run: RunId, logs: &[LogEntry]) -> AgentResult<()>;

    async fn attach_test_labels(&self, run: RunId, test: TestId, labels: &[Label])
        -> AgentResult<()>;

    async fn attach_run_labels(&self, run: RunId, labels: &[Label]) -> AgentResult<()>;

    async fn attach_test_artifact_references(
        &self,
        run: RunId,
        test: TestId,
        references: &[ArtifactReference],
    ) -> AgentResult<()>;

    async fn attach_run_artifact_references(
        &self,
        run: RunId,
        references: &[ArtifactReference],
    ) -> AgentResult<()>;

    async fn upsert_test_cases(
        &self,
        run: RunId,
        test: TestId,
        links: &[TestCaseLink],
    ) -> AgentResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_is_total() {
        let cases = [
            ("passed", TestStatus::Passed),
            ("failed", TestStatus::Failed),
            ("skipped", TestStatus::Skipped),
            ("timedOut", TestStatus::Aborted),
            ("interrupted", TestStatus::Aborted),
            ("unknown-garbage", TestStatus::Aborted),
        ];
        for (input, expected) in cases {
            assert_eq!(TestStatus::from_runner(input), expected, "status {}", input);
        }
    }

    #[test]
    fn test_exchanged_context_defaults() {
        let ctx: ExchangedRunContext =
            serde_json::from_str(r#"{"mode":"RERUN","testRunUuid":"abc"}"#).unwrap();
        assert_eq!(ctx.mode, RunMode::Rerun);
        assert!(ctx.run_allowed);
        assert!(!ctx.run_only_specific_tests);
        assert!(ctx.tests_to_run.is_empty());
    }

    #[test]
    fn test_finish_request_serializes_screaming_result() {
        let req = FinishTestRequest {
            result: TestStatus::Aborted,
            reason: None,
            ended_at: DateTime::from_timestamp_millis(0).unwrap(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"result\":\"ABORTED\""));
        assert!(!json.contains("reason"));
    }
}
