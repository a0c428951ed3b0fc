//! HTTP client for the reporting backend.
//!
//! Each `ReportingApi` operation is one request against the path table in
//! `Endpoint`. The bearer token is obtained on first use by exchanging the
//! configured access token, then cached for the life of the process. There
//! is no retry: a failed request surfaces as an error for the caller to
//! tally.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::api::{
    ArtifactReference, ExchangedRunContext, FinishRunRequest, FinishSessionRequest,
    FinishTestRequest, Label, LogEntry, ReportingApi, RunId, SessionId, StartRunRequest,
    StartSessionRequest, StartTestRequest, TcmConfigRequest, TestCaseLink, TestId,
    UpdateTestRequest, UploadFile,
};
use crate::config::ReportingConfig;
use crate::error::{AgentError, AgentResult};

/// User agent for backend requests.
pub const USER_AGENT_VALUE: &str = concat!("zbr-agent/", env!("CARGO_PKG_VERSION"));

pub const SCREENSHOT_CAPTURED_AT_HEADER: &str = "x-zbr-screenshot-captured-at";
pub const VIDEO_CONTENT_LENGTH_HEADER: &str = "x-zbr-video-content-length";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Path Table
// =============================================================================

/// Every backend operation, parameterized by the ids it addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    RefreshToken,
    ExchangeRunContext,
    StartRun,
    FinishRun(RunId),
    TcmConfigs(RunId),
    StartTest(RunId),
    RestartTest(RunId, TestId),
    UpdateTest(RunId, TestId),
    FinishTest(RunId, TestId),
    RevertTest(RunId, TestId),
    StartSession(RunId),
    FinishSession(RunId, SessionId),
    Screenshot(RunId, TestId),
    TestArtifact(RunId, TestId),
    RunArtifact(RunId),
    SessionVideo(RunId, SessionId),
    Logs(RunId),
    TestLabels(RunId, TestId),
    RunLabels(RunId),
    TestArtifactReferences(RunId, TestId),
    RunArtifactReferences(RunId),
    TestCases(RunId, TestId),
}

impl Endpoint {
    pub fn method(&self) -> Method {
        match self {
            Endpoint::RefreshToken
            | Endpoint::ExchangeRunContext
            | Endpoint::StartRun
            | Endpoint::StartTest(_)
            | Endpoint::RestartTest(..)
            | Endpoint::StartSession(_)
            | Endpoint::Screenshot(..)
            | Endpoint::TestArtifact(..)
            | Endpoint::RunArtifact(_)
            | Endpoint::SessionVideo(..)
            | Endpoint::Logs(_)
            | Endpoint::TestCases(..) => Method::POST,
            Endpoint::FinishRun(_)
            | Endpoint::FinishTest(..)
            | Endpoint::FinishSession(..)
            | Endpoint::TestLabels(..)
            | Endpoint::RunLabels(_)
            | Endpoint::TestArtifactReferences(..)
            | Endpoint::RunArtifactReferences(_) => Method::PUT,
            Endpoint::TcmConfigs(_) | Endpoint::UpdateTest(..) => Method::PATCH,
            Endpoint::RevertTest(..) => Method::DELETE,
        }
    }

    pub fn path(&self) -> String {
        const RUNS: &str = "/api/reporting/v1/test-runs";
        match self {
            Endpoint::RefreshToken => "/api/iam/v1/auth/refresh".to_string(),
            Endpoint::ExchangeRunContext => "/api/reporting/v1/run-context-exchanges".to_string(),
            Endpoint::StartRun => RUNS.to_string(),
            Endpoint::FinishRun(run) => format!("{}/{}", RUNS, run),
            Endpoint::TcmConfigs(run) => format!("{}/{}/tcm-configs", RUNS, run),
            Endpoint::StartTest(run) => format!("{}/{}/tests", RUNS, run),
            Endpoint::RestartTest(run, test) => format!("{}/{}/tests/{}/reruns", RUNS, run, test),
            Endpoint::UpdateTest(run, test)
            | Endpoint::FinishTest(run, test)
            | Endpoint::RevertTest(run, test) => format!("{}/{}/tests/{}", RUNS, run, test),
            Endpoint::StartSession(run) => format!("{}/{}/test-sessions", RUNS, run),
            Endpoint::FinishSession(run, session) => {
                format!("{}/{}/test-sessions/{}", RUNS, run, session)
            }
            Endpoint::Screenshot(run, test) => format!("{}/{}/tests/{}/screenshots", RUNS, run, test),
            Endpoint::TestArtifact(run, test) => format!("{}/{}/tests/{}/artifacts", RUNS, run, test),
            Endpoint::RunArtifact(run) => format!("{}/{}/artifacts", RUNS, run),
            Endpoint::SessionVideo(run, session) => {
                format!("{}/{}/test-sessions/{}/artifacts", RUNS, run, session)
            }
            Endpoint::Logs(run) => format!("{}/{}/logs", RUNS, run),
            Endpoint::TestLabels(run, test) => format!("{}/{}/tests/{}/labels", RUNS, run, test),
            Endpoint::RunLabels(run) => format!("{}/{}/labels", RUNS, run),
            Endpoint::TestArtifactReferences(run, test) => {
                format!("{}/{}/tests/{}/artifact-references", RUNS, run, test)
            }
            Endpoint::RunArtifactReferences(run) => format!("{}/{}/artifact-references", RUNS, run),
            Endpoint::TestCases(run, test) => {
                format!("{}/{}/tests/{}/test-cases:upsert", RUNS, run, test)
            }
        }
    }
}

// =============================================================================
// Wire Bodies
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenResponse {
    auth_token: String,
    #[serde(default)]
    auth_token_type: Option<String>,
}

#[derive(Deserialize)]
struct IdResponse {
    id: i64,
}

#[derive(Serialize)]
struct Items<'a, T> {
    items: &'a [T],
}

// =============================================================================
// ZbrClient
// =============================================================================

/// Reporting backend client.
#[derive(Debug)]
pub struct ZbrClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    /// `Authorization` header value, written once.
    bearer: OnceCell<String>,
}

impl ZbrClient {
    pub fn new(base_url: &str, access_token: &str) -> AgentResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(default_headers)
            .build()
            .map_err(|e| AgentError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            bearer: OnceCell::new(),
        })
    }

    pub fn from_config(config: &ReportingConfig) -> AgentResult<Self> {
        Self::new(&config.hostname, &config.access_token)
    }

    fn url(&self, endpoint: &Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    async fn refresh_bearer(&self) -> AgentResult<String> {
        let endpoint = Endpoint::RefreshToken;
        debug!(path = %endpoint.path(), "exchanging access token");
        let response = self
            .client
            .request(endpoint.method(), self.url(&endpoint))
            .json(&RefreshTokenRequest {
                refresh_token: &self.access_token,
            })
            .send()
            .await
            .map_err(|e| AgentError::Auth {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Auth {
                message: format!("token exchange returned {}", status.as_u16()),
            });
        }

        let body: RefreshTokenResponse = response.json().await.map_err(|e| AgentError::Auth {
            message: format!("malformed token response: {}", e),
        })?;
        let kind = body.auth_token_type.unwrap_or_else(|| "Bearer".to_string());
        Ok(format!("{} {}", kind, body.auth_token))
    }

    async fn bearer(&self) -> AgentResult<&str> {
        self.bearer
            .get_or_try_init(|| self.refresh_bearer())
            .await
            .map(String::as_str)
    }

    /// Authorized request builder for an endpoint.
    async fn request(&self, endpoint: &Endpoint) -> AgentResult<reqwest::RequestBuilder> {
        let bearer = self.bearer().await?;
        Ok(self
            .client
            .request(endpoint.method(), self.url(endpoint))
            .header(AUTHORIZATION, bearer))
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        request: reqwest::RequestBuilder,
    ) -> AgentResult<reqwest::Response> {
        debug!(method = %endpoint.method(), path = %endpoint.path(), "backend request");
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::Http {
            status: status.as_u16(),
            path: endpoint.path(),
            body,
        })
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        body: &B,
    ) -> AgentResult<reqwest::Response> {
        let request = self.request(&endpoint).await?.json(body);
        self.send(&endpoint, request).await
    }

    async fn read_id(response: reqwest::Response) -> AgentResult<i64> {
        let body: IdResponse = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse {
                message: format!("expected an id: {}", e),
            })?;
        Ok(body.id)
    }

    async fn send_multipart(
        &self,
        endpoint: Endpoint,
        field: &'static str,
        file: UploadFile,
        extra: Option<(&'static str, String)>,
    ) -> AgentResult<()> {
        let length = file.bytes.len();
        let part = Part::bytes(file.bytes).file_name(file.name);
        let form = Form::new().part(field, part);
        let mut request = self.request(&endpoint).await?.multipart(form);
        if let Some((name, value)) = extra {
            request = request.header(name, value);
        }
        debug!(path = %endpoint.path(), bytes = length, "uploading file");
        self.send(&endpoint, request).await?;
        Ok(())
    }
}

#[async_trait]
impl ReportingApi for ZbrClient {
    async fn authenticate_if_required(&self) -> AgentResult<()> {
        self.bearer().await.map(|_| ())
    }

    async fn exchange_run_context(&self, context: &str) -> AgentResult<ExchangedRunContext> {
        let endpoint = Endpoint::ExchangeRunContext;
        let request = self
            .request(&endpoint)
            .await?
            .header(CONTENT_TYPE, "application/json")
            .body(context.to_string());
        let response = self.send(&endpoint, request).await?;
        response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse {
                message: format!("malformed run context: {}", e),
            })
    }

    async fn start_run(&self, project_key: &str, req: &StartRunRequest) -> AgentResult<RunId> {
        let endpoint = Endpoint::StartRun;
        let request = self
            .request(&endpoint)
            .await?
            .query(&[("projectKey", project_key)])
            .json(req);
        let response = self.send(&endpoint, request).await?;
        Self::read_id(response).await
    }

    async fn finish_run(&self, run: RunId, req: &FinishRunRequest) -> AgentResult<()> {
        self.send_json(Endpoint::FinishRun(run), req).await?;
        Ok(())
    }

    async fn update_tcm_configs(&self, run: RunId, req: &TcmConfigRequest) -> AgentResult<()> {
        self.send_json(Endpoint::TcmConfigs(run), req).await?;
        Ok(())
    }

    async fn start_test(&self, run: RunId, req: &StartTestRequest) -> AgentResult<TestId> {
        let response = self.send_json(Endpoint::StartTest(run), req).await?;
        Self::read_id(response).await
    }

    async fn restart_test(
        &self,
        run: RunId,
        test: TestId,
        req: &StartTestRequest,
    ) -> AgentResult<TestId> {
        let response = self.send_json(Endpoint::RestartTest(run, test), req).await?;
        Self::read_id(response).await
    }

    async fn update_test(
        &self,
        run: RunId,
        test: TestId,
        req: &UpdateTestRequest,
    ) -> AgentResult<()> {
        self.send_json(Endpoint::UpdateTest(run, test), req).await?;
        Ok(())
    }

    async fn finish_test(
        &self,
        run: RunId,
        test: TestId,
        req: &FinishTestRequest,
    ) -> AgentResult<()> {
        self.send_json(Endpoint::FinishTest(run, test), req).await?;
        Ok(())
    }

    async fn revert_test_registration(&self, run: RunId, test: TestId) -> AgentResult<()> {
        let endpoint = Endpoint::RevertTest(run, test);
        let request = self.request(&endpoint).await?;
        self.send(&endpoint, request).await?;
        Ok(())
    }

    async fn start_session(&self, run: RunId, req: &StartSessionRequest) -> AgentResult<SessionId> {
        let response = self.send_json(Endpoint::StartSession(run), req).await?;
        Self::read_id(response).await
    }

    async fn finish_session(
        &self,
        run: RunId,
        session: SessionId,
        req: &FinishSessionRequest,
    ) -> AgentResult<()> {
        self.send_json(Endpoint::FinishSession(run, session), req)
            .await?;
        Ok(())
    }

    async fn upload_screenshot(
        &self,
        run: RunId,
        test: TestId,
        bytes: Vec<u8>,
        captured_at: i64,
    ) -> AgentResult<()> {
        let endpoint = Endpoint::Screenshot(run, test);
        let request = self
            .request(&endpoint)
            .await?
            .header(CONTENT_TYPE, "image/png")
            .header(SCREENSHOT_CAPTURED_AT_HEADER, captured_at.to_string())
            .body(bytes);
        self.send(&endpoint, request).await?;
        Ok(())
    }

    async fn upload_test_artifact(
        &self,
        run: RunId,
        test: TestId,
        file: UploadFile,
    ) -> AgentResult<()> {
        self.send_multipart(Endpoint::TestArtifact(run, test), "file", file, None)
            .await
    }

    async fn upload_run_artifact(&self, run: RunId, file: UploadFile) -> AgentResult<()> {
        self.send_multipart(Endpoint::RunArtifact(run), "file", file, None)
            .await
    }

    async fn upload_session_video(
        &self,
        run: RunId,
        session: SessionId,
        file: UploadFile,
    ) -> AgentResult<()> {
        let length = file.bytes.len().to_string();
        self.send_multipart(
            Endpoint::SessionVideo(run, session),
            "video",
            file,
            Some((VIDEO_CONTENT_LENGTH_HEADER, length)),
        )
        .await
    }

    async fn send_logs(&self, run: RunId, logs: &[LogEntry]) -> AgentResult<()> {
        if logs.is_empty() {
            return Ok(());
        }
        self.send_json(Endpoint::Logs(run), logs).await?;
        Ok(())
    }

    async fn attach_test_labels(
        &self,
        run: RunId,
        test: TestId,
        labels: &[Label],
    ) -> AgentResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.send_json(Endpoint::TestLabels(run, test), &Items { items: labels })
            .await?;
        Ok(())
    }

    async fn attach_run_labels(&self, run: RunId, labels: &[Label]) -> AgentResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.send_json(Endpoint::RunLabels(run), &Items { items: labels })
            .await?;
        Ok(())
    }

    async fn attach_test_artifact_references(
        &self,
        run: RunId,
        test: TestId,
        references: &[ArtifactReference],
    ) -> AgentResult<()> {
        if references.is_empty() {
            return Ok(());
        }
        self.send_json(
            Endpoint::TestArtifactReferences(run, test),
            &Items { items: references },
        )
        .await?;
        Ok(())
    }

    async fn attach_run_artifact_references(
        &self,
        run: RunId,
        references: &[ArtifactReference],
    ) -> AgentResult<()> {
        if references.is_empty() {
            return Ok(());
        }
        self.send_json(
            Endpoint::RunArtifactReferences(run),
            &Items { items: references },
        )
        .await?;
        Ok(())
    }

    async fn upsert_test_cases(
        &self,
        run: RunId,
        test: TestId,
        links: &[TestCaseLink],
    ) -> AgentResult<()> {
        if links.is_empty() {
            return Ok(());
        }
        self.send_json(Endpoint::TestCases(run, test), &Items { items: links })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_parameterized() {
        assert_eq!(Endpoint::FinishRun(5).path(), "/api/reporting/v1/test-runs/5");
        assert_eq!(
            Endpoint::TestCases(5, 9).path(),
            "/api/reporting/v1/test-runs/5/tests/9/test-cases:upsert"
        );
        assert_eq!(
            Endpoint::SessionVideo(1, 2).path(),
            "/api/reporting/v1/test-runs/1/test-sessions/2/artifacts"
        );
    }

    #[test]
    fn test_revert_and_finish_share_path_not_method() {
        let finish = Endpoint::FinishTest(1, 2);
        let revert = Endpoint::RevertTest(1, 2);
        assert_eq!(finish.path(), revert.path());
        assert_eq!(finish.method(), Method::PUT);
        assert_eq!(revert.method(), Method::DELETE);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ZbrClient::new("https://demo.example.com/", "token").unwrap();
        assert_eq!(
            client.url(&Endpoint::RunLabels(3)),
            "https://demo.example.com/api/reporting/v1/test-runs/3/labels"
        );
    }
}
