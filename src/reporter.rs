//! Reporter: runner callbacks in, backend calls out.
//!
//! ## Architecture
//!
//! - `Reporter` trait defines the runner callbacks
//! - `ZbrReporter` correlates them with remote runs, tests and sessions
//!
//! Callbacks for different tests may overlap. Per attempt, begin always
//! lands (or is abandoned) before end proceeds, and run end waits until
//! every expected test is terminal. Only run start failures are fatal;
//! every per-test step is attempted independently and failures are tallied.

use crate::api::{
    FinishRunRequest, FinishSessionRequest, FinishTestRequest, Label, LogEntry, ReportingApi,
    RunConfigBlock, RunId, StartRunRequest, StartSessionRequest, StartTestRequest, TestCaseLink,
    TestId, TestStatus, UpdateTestRequest, UploadFile,
};
use crate::attachments::{self, FfmpegTranscoder, Passthrough, ProcessedAttachments, VideoTranscoder};
use crate::client::ZbrClient;
use crate::config::ReportingConfig;
use crate::error::{AgentError, AgentResult, Stage};
use crate::protocol::{decode_chunk, ArtifactPayload, ArtifactSource, Decoded, SideChannelEvent};
use crate::rerun::{self, RunResolution};
use crate::runner::{Attempt, RunnerConfig, Suite, TestCase, TestResult};
use crate::state::{
    merge_labels, upsert_case_link, upsert_reference, RecordedLog, RunState, RunSummary,
    TestRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

/// Label key for `@tag` markers found in test titles.
pub const TAG_LABEL: &str = "tag";

/// Escape sequences removed from failure reasons.
const ANSI_CODES: &[&str] = &[
    "\u{1b}[0m", "\u{1b}[1m", "\u{1b}[2m", "\u{1b}[3m", "\u{1b}[4m", "\u{1b}[22m", "\u{1b}[23m",
    "\u{1b}[24m", "\u{1b}[30m", "\u{1b}[31m", "\u{1b}[32m", "\u{1b}[33m", "\u{1b}[34m",
    "\u{1b}[35m", "\u{1b}[36m", "\u{1b}[37m", "\u{1b}[39m", "\u{1b}[41m", "\u{1b}[42m",
    "\u{1b}[49m", "\u{1b}[90m", "\u{1b}[91m", "\u{1b}[92m", "\u{1b}[93m",
];

static TAG_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// `@tag` markers in a title, without the `@`, in order of appearance.
pub fn title_tags(title: &str) -> Vec<String> {
    let pattern = TAG_PATTERN.get_or_init(|| Regex::new(r"(?:^|[\s\[(])@([\w-]+)").ok());
    let Some(pattern) = pattern else {
        return Vec::new();
    };
    let mut tags: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(title) {
        let tag = caps[1].to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_CODES
        .iter()
        .fold(text.to_string(), |acc, code| acc.replace(code, ""))
}

/// End timestamp of an attempt, never equal to its start.
pub fn end_time(result: &TestResult) -> DateTime<Utc> {
    let end = result.start_time + Duration::milliseconds(result.duration_ms);
    if end <= result.start_time {
        result.start_time + Duration::milliseconds(1)
    } else {
        end
    }
}

/// Failure reason sent with the finish call.
pub fn failure_reason(result: &TestResult) -> Option<String> {
    let error = result.error.as_ref()?;
    let text = error.stack.as_ref().or(error.message.as_ref())?;
    Some(strip_ansi(text))
}

// =============================================================================
// Reporter Trait
// =============================================================================

/// Callbacks a host test runner drives.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once with the discovered tree, which may be pruned in place.
    async fn on_begin(&self, config: &RunnerConfig, suite: &mut Suite) -> AgentResult<()>;

    async fn on_test_begin(&self, test: &TestCase, result: &TestResult);

    /// Applied inline; never suspends and never fails.
    fn on_std_out(&self, chunk: &str, attempt: Option<&Attempt>);

    async fn on_test_end(&self, test: &TestCase, result: &TestResult);

    async fn on_end(&self) -> AgentResult<RunSummary>;
}

// =============================================================================
// ZbrReporter
// =============================================================================

pub struct ZbrReporter {
    config: ReportingConfig,
    api: Arc<dyn ReportingApi>,
    transcoder: Arc<dyn VideoTranscoder>,
    state: RunState,
    resolution: OnceLock<RunResolution>,
}

impl ZbrReporter {
    pub fn new(config: ReportingConfig, api: Arc<dyn ReportingApi>) -> Self {
        let transcoder: Arc<dyn VideoTranscoder> = if config.transcode_video {
            Arc::new(FfmpegTranscoder::default())
        } else {
            Arc::new(Passthrough)
        };
        Self {
            config,
            api,
            transcoder,
            state: RunState::new(),
            resolution: OnceLock::new(),
        }
    }

    /// Reporter talking to the configured backend.
    pub fn from_config(config: ReportingConfig) -> AgentResult<Self> {
        let client = ZbrClient::from_config(&config)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn VideoTranscoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn active(&self) -> bool {
        self.config.enabled && !self.state.is_aborted()
    }

    /// Run one step, tallying its failure instead of propagating it.
    async fn step<F>(&self, stage: Stage, subject: &str, fut: F)
    where
        F: Future<Output = AgentResult<()>>,
    {
        if let Err(e) = fut.await {
            self.state.record_failure(stage, subject, &e);
        }
    }

    // -------------------------------------------------------------------------
    // Run begin
    // -------------------------------------------------------------------------

    async fn start_run(&self, suite: &mut Suite) -> AgentResult<RunId> {
        self.api.authenticate_if_required().await?;

        let resolution =
            rerun::exchange_and_resolve(self.api.as_ref(), self.config.run_context.as_deref(), suite)
                .await?;
        let total = suite.test_count();
        self.state.set_expected(total);

        let request = StartRunRequest {
            uuid: resolution.continuation_uuid.clone(),
            name: self.config.display_name.clone(),
            framework: self.config.framework.clone(),
            started_at: Utc::now(),
            config: RunConfigBlock {
                environment: self.config.environment.clone(),
                build: self.config.build.clone(),
                treat_skips_as_failures: self.config.treat_skips_as_failures,
            },
            milestone: self.config.milestone.clone(),
            notifications: self.config.notifications(),
        };
        let run = self
            .api
            .start_run(&self.config.project_key, &request)
            .await?;

        info!(run_id = run, tests = total, mode = ?resolution.mode, "test run started");
        if self.resolution.set(resolution).is_err() {
            warn!(run_id = run, "run already resolved, keeping the first resolution");
        }
        Ok(run)
    }

    // -------------------------------------------------------------------------
    // Test begin
    // -------------------------------------------------------------------------

    fn start_request(test: &TestCase, result: &TestResult, labels: Vec<Label>) -> StartTestRequest {
        StartTestRequest {
            name: test.full_name(),
            class_name: test.class_name(),
            method_name: test.title.clone(),
            started_at: result.start_time,
            maintainer: None,
            labels,
            correlation_data: rerun::correlation_data(&test.platform),
        }
    }

    async fn register_test(
        &self,
        run: RunId,
        test: &TestCase,
        request: &StartTestRequest,
    ) -> Result<TestId, (Stage, AgentError)> {
        let subset = self.resolution.get().filter(|r| r.is_subset_rerun());
        match subset {
            Some(resolution) => {
                let registered = resolution.registered_id(test).ok_or_else(|| {
                    (
                        Stage::RestartTest,
                        AgentError::RerunMismatch {
                            test: test.full_name(),
                        },
                    )
                })?;
                self.api
                    .restart_test(run, registered, request)
                    .await
                    .map_err(|e| (Stage::RestartTest, e))
            }
            None => self
                .api
                .start_test(run, request)
                .await
                .map_err(|e| (Stage::StartTest, e)),
        }
    }

    // -------------------------------------------------------------------------
    // Side channel
    // -------------------------------------------------------------------------

    fn apply_event(&self, attempt: Option<&Attempt>, event: SideChannelEvent) {
        match event {
            SideChannelEvent::AttachRunLabel(p) => self
                .state
                .with_run_record(|r| merge_labels(&mut r.labels, &p.key, p.values.as_slice())),
            SideChannelEvent::AttachRunArtifactReference(p) => self
                .state
                .with_run_record(|r| upsert_reference(&mut r.artifact_references, &p.name, &p.value)),
            SideChannelEvent::AttachRunArtifact(p) => {
                self.state.with_run_record(|r| r.artifacts.push(p))
            }
            SideChannelEvent::LogError(p) => self.state.record_failure(
                Stage::SideChannel,
                attempt.map(|a| a.test_id.as_str()).unwrap_or("run"),
                &p.message,
            ),
            event => {
                let Some(attempt) = attempt else {
                    debug!(event_type = event.event_type(), "test event outside a test");
                    return;
                };
                if self
                    .state
                    .with_record(attempt, |record| apply_test_event(record, event))
                    .is_none()
                {
                    debug!(test = %attempt, "side-channel event after test end ignored");
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Test end
    // -------------------------------------------------------------------------

    async fn report_test(
        &self,
        run: RunId,
        test_id: TestId,
        test: &TestCase,
        result: &TestResult,
        record: TestRecord,
    ) {
        let subject = test.full_name();
        let subject = subject.as_str();

        if !record.case_links.is_empty() {
            self.step(
                Stage::UpsertTestCases,
                subject,
                self.api.upsert_test_cases(run, test_id, &record.case_links),
            )
            .await;
        }

        if let Some(maintainer) = record.maintainer.clone() {
            let request = UpdateTestRequest { maintainer };
            self.step(
                Stage::UpdateMaintainer,
                subject,
                self.api.update_test(run, test_id, &request),
            )
            .await;
        }

        self.step(
            Stage::AttachLabels,
            subject,
            self.api.attach_test_labels(run, test_id, &record.labels),
        )
        .await;

        let processed = match self.process_attachments(result).await {
            Ok(processed) => processed.unwrap_or_default(),
            Err(e) => {
                self.state
                    .record_failure(Stage::ProcessAttachments, subject, &e);
                ProcessedAttachments::default()
            }
        };
        for failure in &processed.failures {
            let subject = format!("{} ({})", subject, failure.name);
            self.state
                .record_failure(Stage::ProcessAttachments, &subject, &failure.error);
        }

        for shot in &processed.screenshots {
            self.step(
                Stage::UploadScreenshots,
                subject,
                self.upload_screenshot(run, test_id, &shot.source, None),
            )
            .await;
        }
        for shot in &record.screenshots {
            self.step(
                Stage::UploadScreenshots,
                subject,
                self.upload_screenshot(run, test_id, &shot.source, shot.captured_at),
            )
            .await;
        }

        for file in &processed.files {
            self.step(
                Stage::UploadFiles,
                subject,
                self.upload_test_file(run, test_id, &file.source, Some(&file.name)),
            )
            .await;
        }
        for artifact in &record.artifacts {
            self.step(
                Stage::UploadFiles,
                subject,
                self.upload_test_file(run, test_id, &artifact.source, artifact.name.as_deref()),
            )
            .await;
        }

        self.step(
            Stage::AttachArtifactReferences,
            subject,
            self.api
                .attach_test_artifact_references(run, test_id, &record.artifact_references),
        )
        .await;

        let logs: Vec<LogEntry> = record
            .logs
            .iter()
            .map(|log| LogEntry {
                test_id,
                level: log.level.clone(),
                timestamp: log.timestamp,
                message: log.message.clone(),
            })
            .collect();
        self.step(Stage::SendLogs, subject, self.api.send_logs(run, &logs))
            .await;

        if !processed.videos.is_empty() {
            self.step(
                Stage::UploadVideos,
                subject,
                self.upload_videos(run, test_id, test, result, &processed),
            )
            .await;
        }

        let request = FinishTestRequest {
            result: TestStatus::from_runner(&result.status),
            reason: failure_reason(result),
            ended_at: end_time(result),
        };
        self.step(
            Stage::FinishTest,
            subject,
            self.api.finish_test(run, test_id, &request),
        )
        .await;
    }

    async fn process_attachments(
        &self,
        result: &TestResult,
    ) -> AgentResult<Option<ProcessedAttachments>> {
        let list = result.attachments.clone();
        let transcoder = self.transcoder.clone();
        tokio::task::spawn_blocking(move || attachments::process(list.as_deref(), &*transcoder))
            .await
            .map_err(|e| AgentError::Transcode {
                message: e.to_string(),
            })
    }

    async fn upload_screenshot(
        &self,
        run: RunId,
        test_id: TestId,
        source: &ArtifactSource,
        captured_at: Option<i64>,
    ) -> AgentResult<()> {
        let bytes = read_source(source).await?;
        let captured_at = captured_at.unwrap_or_else(|| Utc::now().timestamp_millis());
        self.api
            .upload_screenshot(run, test_id, bytes, captured_at)
            .await
    }

    async fn upload_test_file(
        &self,
        run: RunId,
        test_id: TestId,
        source: &ArtifactSource,
        name: Option<&str>,
    ) -> AgentResult<()> {
        let file = UploadFile {
            name: artifact_name(source, name),
            bytes: read_source(source).await?,
        };
        self.api.upload_test_artifact(run, test_id, file).await
    }

    async fn upload_videos(
        &self,
        run: RunId,
        test_id: TestId,
        test: &TestCase,
        result: &TestResult,
        processed: &ProcessedAttachments,
    ) -> AgentResult<()> {
        let capabilities = serde_json::to_value(&test.platform)?;
        let session = self
            .api
            .start_session(
                run,
                &StartSessionRequest {
                    session_id: uuid::Uuid::new_v4().to_string(),
                    started_at: result.start_time,
                    desired_capabilities: capabilities.clone(),
                    capabilities,
                    test_ids: vec![test_id],
                },
            )
            .await?;
        self.api
            .finish_session(
                run,
                session,
                &FinishSessionRequest {
                    ended_at: end_time(result),
                    test_ids: vec![test_id],
                },
            )
            .await?;
        for video in &processed.videos {
            let file = UploadFile {
                name: video.name.clone(),
                bytes: read_source(&video.source).await?,
            };
            self.api.upload_session_video(run, session, file).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Run end
    // -------------------------------------------------------------------------

    async fn flush_run(&self, run: RunId) {
        let record = self.state.take_run_record();
        self.step(
            Stage::RunLabels,
            "run",
            self.api.attach_run_labels(run, &record.labels),
        )
        .await;
        self.step(
            Stage::RunArtifactReferences,
            "run",
            self.api
                .attach_run_artifact_references(run, &record.artifact_references),
        )
        .await;
        for artifact in &record.artifacts {
            self.step(
                Stage::RunArtifacts,
                "run",
                self.upload_run_file(run, artifact),
            )
            .await;
        }
    }

    async fn upload_run_file(&self, run: RunId, artifact: &ArtifactPayload) -> AgentResult<()> {
        let file = UploadFile {
            name: artifact_name(&artifact.source, artifact.name.as_deref()),
            bytes: read_source(&artifact.source).await?,
        };
        self.api.upload_run_artifact(run, file).await
    }
}

fn apply_test_event(record: &mut TestRecord, event: SideChannelEvent) {
    match event {
        SideChannelEvent::AttachTestLabel(p) => {
            merge_labels(&mut record.labels, &p.key, p.values.as_slice())
        }
        SideChannelEvent::AttachTestArtifactReference(p) => {
            upsert_reference(&mut record.artifact_references, &p.name, &p.value)
        }
        SideChannelEvent::AttachTestLog(p) => record.logs.push(RecordedLog {
            level: p.level,
            message: p.message,
            timestamp: p.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()),
        }),
        SideChannelEvent::AttachTestArtifact(p) => record.artifacts.push(p),
        SideChannelEvent::AttachTestScreenshot(p) => record.screenshots.push(p),
        SideChannelEvent::SetMaintainer(p) => record.maintainer = Some(p.maintainer),
        SideChannelEvent::AttachTestCaseLink(p) => upsert_case_link(
            &mut record.case_links,
            TestCaseLink {
                tcm_type: p.tcm_type,
                test_case_id: p.test_case_id,
                result_status: p.result_status,
            },
        ),
        SideChannelEvent::RevertTestRegistration => record.revert = true,
        // Run-level events are routed before reaching a test record.
        SideChannelEvent::AttachRunLabel(_)
        | SideChannelEvent::AttachRunArtifactReference(_)
        | SideChannelEvent::AttachRunArtifact(_)
        | SideChannelEvent::LogError(_) => {}
    }
}

async fn read_source(source: &ArtifactSource) -> AgentResult<Vec<u8>> {
    match source {
        ArtifactSource::Path(path) => Ok(tokio::fs::read(path).await?),
        ArtifactSource::Buffer(bytes) => Ok(bytes.clone()),
    }
}

fn artifact_name(source: &ArtifactSource, name: Option<&str>) -> String {
    if let Some(name) = name {
        return name.to_string();
    }
    match source {
        ArtifactSource::Path(path) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string()),
        ArtifactSource::Buffer(_) => "artifact".to_string(),
    }
}

#[async_trait]
impl Reporter for ZbrReporter {
    async fn on_begin(&self, _config: &RunnerConfig, suite: &mut Suite) -> AgentResult<()> {
        if !self.config.enabled {
            info!("reporting disabled");
            return Ok(());
        }
        let run = match self.start_run(suite).await {
            Ok(run) => run,
            Err(e) => {
                self.state.record_failure(Stage::StartRun, "run", &e);
                error!(error = %e, "failed to start test run, reporting aborted");
                self.state.abort_run();
                return Err(e);
            }
        };
        self.state.run_started(run);

        if let Some(tcm) = self.config.tcm_request() {
            self.step(
                Stage::TcmConfig,
                "run",
                self.api.update_tcm_configs(run, &tcm),
            )
            .await;
        }
        Ok(())
    }

    async fn on_test_begin(&self, test: &TestCase, result: &TestResult) {
        if !self.active() {
            return;
        }
        let attempt = Attempt::of(test, result);
        let seed: Vec<Label> = title_tags(&test.title)
            .into_iter()
            .map(|tag| Label::new(TAG_LABEL, tag))
            .collect();
        self.state
            .with_record(&attempt, |record| record.seed_labels(seed.clone()));

        let Ok(run) = self.state.wait_run().await else {
            return;
        };
        let request = Self::start_request(test, result, seed);
        match self.register_test(run, test, &request).await {
            Ok(test_id) => {
                debug!(test = %attempt, test_id, "test started");
                self.state.mark_started(&attempt, test_id);
            }
            Err((stage, e)) => {
                self.state.record_failure(stage, &request.name, &e);
                self.state.mark_abandoned(&attempt);
            }
        }
    }

    fn on_std_out(&self, chunk: &str, attempt: Option<&Attempt>) {
        if !self.active() {
            return;
        }
        for decoded in decode_chunk(chunk) {
            match decoded {
                Decoded::Event(event) => self.apply_event(attempt, event),
                Decoded::Unknown(event_type) => {
                    debug!(event_type = %event_type, "ignoring unknown side-channel event")
                }
                Decoded::Invalid { event_type, error } => {
                    self.state
                        .record_failure(Stage::SideChannel, &event_type, &error)
                }
                Decoded::Console(line) => {
                    debug!(line = %line, "console output");
                    let Some(attempt) = attempt.filter(|_| self.config.capture_stdout) else {
                        continue;
                    };
                    self.state.with_record(attempt, |record| {
                        record.logs.push(RecordedLog {
                            level: "INFO".to_string(),
                            message: line,
                            timestamp: Utc::now().timestamp_millis(),
                        })
                    });
                }
            }
        }
    }

    async fn on_test_end(&self, test: &TestCase, result: &TestResult) {
        if !self.active() {
            return;
        }
        let attempt = Attempt::of(test, result);
        let test_id = match self.state.wait_started(&attempt).await {
            Ok(Some(test_id)) => test_id,
            Ok(None) => {
                self.state.take_record(&attempt);
                return;
            }
            Err(_) => return,
        };
        let Ok(run) = self.state.wait_run().await else {
            return;
        };
        let record = self.state.take_record(&attempt);

        if record.revert {
            self.step(
                Stage::RevertTest,
                &test.full_name(),
                self.api.revert_test_registration(run, test_id),
            )
            .await;
            debug!(test = %attempt, test_id, "test registration reverted");
            self.state.mark_reverted(&attempt);
            return;
        }

        self.report_test(run, test_id, test, result, record).await;
        debug!(test = %attempt, test_id, status = %result.status, "test finished");
        self.state.mark_finished(&attempt);
    }

    async fn on_end(&self) -> AgentResult<RunSummary> {
        if !self.config.enabled {
            return Ok(RunSummary::default());
        }
        let run = self.state.wait_run().await?;
        self.state.wait_all_terminal().await?;

        self.flush_run(run).await;
        self.step(
            Stage::FinishRun,
            "run",
            self.api.finish_run(
                run,
                &FinishRunRequest {
                    ended_at: Utc::now(),
                },
            ),
        )
        .await;

        let summary = self.state.summary();
        if summary.has_failures() {
            warn!(run_id = run, "test run finished: {}", summary);
        } else {
            info!(run_id = run, "test run finished: {}", summary);
        }
        Ok(summary)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestError;

    fn result_at(ms: i64, duration_ms: i64) -> TestResult {
        let mut result = TestResult::started_at(DateTime::from_timestamp_millis(ms).unwrap());
        result.duration_ms = duration_ms;
        result
    }

    #[test]
    fn test_title_tags() {
        assert_eq!(
            title_tags("@smoke adds item to cart @cart-flow"),
            vec!["smoke", "cart-flow"]
        );
        assert_eq!(title_tags("login [@regression] (@auth)"), vec!["regression", "auth"]);
        assert!(title_tags("mail user@example.com").is_empty());
        assert_eq!(title_tags("@smoke again @smoke"), vec!["smoke"]);
    }

    #[test]
    fn test_strip_ansi_removes_listed_codes() {
        let raw = "\u{1b}[31mexpected\u{1b}[39m \u{1b}[2mto be\u{1b}[22m \u{1b}[32mtrue\u{1b}[39m";
        assert_eq!(strip_ansi(raw), "expected to be true");
    }

    #[test]
    fn test_zero_duration_nudged() {
        let result = result_at(1_700_000_000_000, 0);
        assert_eq!(
            end_time(&result).timestamp_millis(),
            1_700_000_000_001
        );

        let result = result_at(1_700_000_000_000, 250);
        assert_eq!(
            end_time(&result).timestamp_millis(),
            1_700_000_000_250
        );
    }

    #[test]
    fn test_failure_reason_prefers_stack() {
        let mut result = result_at(0, 1);
        assert_eq!(failure_reason(&result), None);

        result.error = Some(TestError {
            message: Some("\u{1b}[31mboom\u{1b}[39m".to_string()),
            stack: None,
        });
        assert_eq!(failure_reason(&result).as_deref(), Some("boom"));

        result.error = Some(TestError {
            message: Some("boom".to_string()),
            stack: Some("boom\n    at cart.spec.ts:10".to_string()),
        });
        assert_eq!(
            failure_reason(&result).as_deref(),
            Some("boom\n    at cart.spec.ts:10")
        );
    }

    #[test]
    fn test_artifact_name_fallbacks() {
        let path = ArtifactSource::Path("/tmp/report.html".into());
        assert_eq!(artifact_name(&path, None), "report.html");
        assert_eq!(artifact_name(&path, Some("custom")), "custom");
        assert_eq!(artifact_name(&ArtifactSource::Buffer(vec![]), None), "artifact");
    }

    #[test]
    fn test_run_events_do_not_touch_test_record() {
        let mut record = TestRecord::default();
        apply_test_event(
            &mut record,
            SideChannelEvent::AttachRunLabel(crate::protocol::LabelPayload {
                key: "k".to_string(),
                values: vec!["v".to_string()],
            }),
        );
        assert!(record.labels.is_empty());
        apply_test_event(&mut record, SideChannelEvent::RevertTestRegistration);
        assert!(record.revert);
    }
}
