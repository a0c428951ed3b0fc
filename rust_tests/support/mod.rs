//! Shared fixtures: an in-memory `ReportingApi` that records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use zbr_agent::api::*;
use zbr_agent::config::{FileConfig, ReportingConfig};
use zbr_agent::error::{AgentError, AgentResult};
use zbr_agent::runner::{Platform, TestCase, TestResult};

pub const RUN_ID: RunId = 1;

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct Call {
    pub op: &'static str,
    pub test: Option<TestId>,
    pub body: Value,
}

#[derive(Default)]
pub struct RecordingApi {
    calls: Mutex<Vec<Call>>,
    next_test_id: AtomicI64,
    context: Mutex<Option<ExchangedRunContext>>,
    failing: Mutex<HashSet<&'static str>>,
    start_delays: Mutex<HashMap<String, Duration>>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self {
            next_test_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn with_context(self, context: ExchangedRunContext) -> Self {
        *self.context.lock().unwrap() = Some(context);
        self
    }

    /// Make every call to `op` fail with a 500.
    pub fn failing(self, op: &'static str) -> Self {
        self.failing.lock().unwrap().insert(op);
        self
    }

    /// Delay "start test" for the test with this qualified name.
    pub fn delay_start(self, name: &str, delay: Duration) -> Self {
        self.start_delays
            .lock()
            .unwrap()
            .insert(name.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    pub fn ops_for(&self, test: TestId) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| c.test == Some(test))
            .map(|c| c.op)
            .collect()
    }

    pub fn calls_of(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn position(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| *o == op)
    }

    /// Remote id assigned to the test started with this qualified name.
    pub fn test_id_of(&self, name: &str) -> Option<TestId> {
        self.calls()
            .into_iter()
            .find(|c| (c.op == "start_test" || c.op == "restart_test") && c.body["name"] == name)
            .and_then(|c| c.test)
    }

    fn record(&self, op: &'static str, test: Option<TestId>, body: Value) -> AgentResult<()> {
        self.calls.lock().unwrap().push(Call { op, test, body });
        if self.failing.lock().unwrap().contains(op) {
            return Err(AgentError::Http {
                status: 500,
                path: op.to_string(),
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReportingApi for RecordingApi {
    async fn authenticate_if_required(&self) -> AgentResult<()> {
        self.record("authenticate", None, Value::Null)
    }

    async fn exchange_run_context(&self, context: &str) -> AgentResult<ExchangedRunContext> {
        self.record("exchange_run_context", None, json!(context))?;
        Ok(self.context.lock().unwrap().clone().unwrap_or_default())
    }

    async fn start_run(&self, project_key: &str, req: &StartRunRequest) -> AgentResult<RunId> {
        let mut body = serde_json::to_value(req)?;
        body["projectKey"] = json!(project_key);
        self.record("start_run", None, body)?;
        Ok(RUN_ID)
    }

    async fn finish_run(&self, _run: RunId, req: &FinishRunRequest) -> AgentResult<()> {
        self.record("finish_run", None, serde_json::to_value(req)?)
    }

    async fn update_tcm_configs(&self, _run: RunId, req: &TcmConfigRequest) -> AgentResult<()> {
        self.record("update_tcm_configs", None, serde_json::to_value(req)?)
    }

    async fn start_test(&self, _run: RunId, req: &StartTestRequest) -> AgentResult<TestId> {
        let delay = self.start_delays.lock().unwrap().get(&req.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = self.next_test_id.fetch_add(1, Ordering::SeqCst);
        self.record("start_test", Some(id), serde_json::to_value(req)?)?;
        Ok(id)
    }

    async fn restart_test(
        &self,
        _run: RunId,
        test: TestId,
        req: &StartTestRequest,
    ) -> AgentResult<TestId> {
        self.record("restart_test", Some(test), serde_json::to_value(req)?)?;
        Ok(test)
    }

    async fn update_test(
        &self,
        _run: RunId,
        test: TestId,
        req: &UpdateTestRequest,
    ) -> AgentResult<()> {
        self.record("update_test", Some(test), serde_json::to_value(req)?)
    }

    async fn finish_test(
        &self,
        _run: RunId,
        test: TestId,
        req: &FinishTestRequest,
    ) -> AgentResult<()> {
        self.record("finish_test", Some(test), serde_json::to_value(req)?)
    }

    async fn revert_test_registration(&self, _run: RunId, test: TestId) -> AgentResult<()> {
        self.record("revert_test", Some(test), Value::Null)
    }

    async fn start_session(&self, _run: RunId, req: &StartSessionRequest) -> AgentResult<SessionId> {
        self.record(
            "start_session",
            req.test_ids.first().copied(),
            serde_json::to_value(req)?,
        )?;
        Ok(900)
    }

    async fn finish_session(
        &self,
        _run: RunId,
        session: SessionId,
        req: &FinishSessionRequest,
    ) -> AgentResult<()> {
        let mut body = serde_json::to_value(req)?;
        body["session"] = json!(session);
        self.record("finish_session", req.test_ids.first().copied(), body)
    }

    async fn upload_screenshot(
        &self,
        _run: RunId,
        test: TestId,
        bytes: Vec<u8>,
        captured_at: i64,
    ) -> AgentResult<()> {
        self.record(
            "upload_screenshot",
            Some(test),
            json!({ "bytes": bytes, "capturedAt": captured_at }),
        )
    }

    async fn upload_test_artifact(
        &self,
        _run: RunId,
        test: TestId,
        file: UploadFile,
    ) -> AgentResult<()> {
        self.record(
            "upload_test_artifact",
            Some(test),
            json!({ "name": file.name, "bytes": file.bytes }),
        )
    }

    async fn upload_run_artifact(&self, _run: RunId, file: UploadFile) -> AgentResult<()> {
        self.record(
            "upload_run_artifact",
            None,
            json!({ "name": file.name, "bytes": file.bytes }),
        )
    }

    async fn upload_session_video(
        &self,
        _run: RunId,
        session: SessionId,
        file: UploadFile,
    ) -> AgentResult<()> {
        self.record(
            "upload_session_video",
            None,
            json!({ "session": session, "name": file.name }),
        )
    }

    async fn send_logs(&self, _run: RunId, logs: &[LogEntry]) -> AgentResult<()> {
        if logs.is_empty() {
            return Ok(());
        }
        self.record(
            "send_logs",
            logs.first().map(|l| l.test_id),
            serde_json::to_value(logs)?,
        )
    }

    async fn attach_test_labels(
        &self,
        _run: RunId,
        test: TestId,
        labels: &[Label],
    ) -> AgentResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.record("attach_test_labels", Some(test), serde_json::to_value(labels)?)
    }

    async fn attach_run_labels(&self, _run: RunId, labels: &[Label]) -> AgentResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.record("attach_run_labels", None, serde_json::to_value(labels)?)
    }

    async fn attach_test_artifact_references(
        &self,
        _run: RunId,
        test: TestId,
        references: &[ArtifactReference],
    ) -> AgentResult<()> {
        if references.is_empty() {
            return Ok(());
        }
        self.record(
            "attach_test_artifact_references",
            Some(test),
            serde_json::to_value(references)?,
        )
    }

    async fn attach_run_artifact_references(
        &self,
        _run: RunId,
        references: &[ArtifactReference],
    ) -> AgentResult<()> {
        if references.is_empty() {
            return Ok(());
        }
        self.record(
            "attach_run_artifact_references",
            None,
            serde_json::to_value(references)?,
        )
    }

    async fn upsert_test_cases(
        &self,
        _run: RunId,
        test: TestId,
        links: &[TestCaseLink],
    ) -> AgentResult<()> {
        if links.is_empty() {
            return Ok(());
        }
        self.record("upsert_test_cases", Some(test), serde_json::to_value(links)?)
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Enabled config pointing nowhere; video passes through untranscoded.
pub fn enabled_config() -> ReportingConfig {
    let env = |key: &str| match key {
        "REPORTING_ENABLED" => Some("true".to_string()),
        "REPORTING_SERVER_HOSTNAME" => Some("https://reporting.test".to_string()),
        "REPORTING_SERVER_ACCESS_TOKEN" => Some("token".to_string()),
        _ => None,
    };
    let mut config = ReportingConfig::resolve(FileConfig::default(), &env).unwrap();
    config.transcode_video = false;
    config
}

pub fn chromium() -> Platform {
    Platform {
        browser_name: "chromium".to_string(),
        browser_version: "120.0".to_string(),
        os_name: "linux".to_string(),
    }
}

pub fn make_test(id: &str, title: &str) -> TestCase {
    TestCase {
        id: id.to_string(),
        title: title.to_string(),
        suite_path: vec!["cart.spec.ts".to_string()],
        file: Some("cart.spec.ts".to_string()),
        platform: chromium(),
    }
}

pub fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

pub fn finished(status: &str, start_ms: i64, duration_ms: i64) -> TestResult {
    let mut result = TestResult::started_at(at(start_ms));
    result.status = status.to_string();
    result.duration_ms = duration_ms;
    result
}
