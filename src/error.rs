//! Error types for the reporting agent.
//!
//! Two concerns live here: the `AgentError` enum returned by every fallible
//! operation, and the `Stage` names used to tally recoverable failures
//! for the end-of-run summary.

use std::fmt;

/// Agent errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Invalid or incomplete configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Exchanging the access token for a bearer token failed.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Backend answered with a non-success status.
    #[error("backend returned {status} for {path}: {body}")]
    Http {
        status: u16,
        path: String,
        body: String,
    },

    /// Transport-level failure.
    #[error("network error: {message}")]
    Network { message: String },

    /// Backend answered with an unexpected body.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Run context exchange denied the rerun.
    #[error("run is not allowed: {reason}")]
    RunNotAllowed { reason: String },

    /// Rerun requested but no previously registered test matches.
    #[error("no previously registered test matches '{test}'")]
    RerunMismatch { test: String },

    /// The run was aborted by an earlier fatal error.
    #[error("run aborted")]
    RunAborted,

    /// Video conversion failed.
    #[error("transcoding failed: {message}")]
    Transcode { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network {
            message: e.to_string(),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Named step of the reporting flow, used as the key of the failure tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    StartRun,
    TcmConfig,
    StartTest,
    RestartTest,
    SideChannel,
    RevertTest,
    UpsertTestCases,
    UpdateMaintainer,
    AttachLabels,
    ProcessAttachments,
    UploadScreenshots,
    UploadFiles,
    AttachArtifactReferences,
    SendLogs,
    UploadVideos,
    FinishTest,
    RunLabels,
    RunArtifactReferences,
    RunArtifacts,
    FinishRun,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::StartRun => "start-run",
            Stage::TcmConfig => "tcm-config",
            Stage::StartTest => "start-test",
            Stage::RestartTest => "restart-test",
            Stage::SideChannel => "side-channel",
            Stage::RevertTest => "revert-test",
            Stage::UpsertTestCases => "upsert-test-cases",
            Stage::UpdateMaintainer => "update-maintainer",
            Stage::AttachLabels => "attach-labels",
            Stage::ProcessAttachments => "process-attachments",
            Stage::UploadScreenshots => "upload-screenshots",
            Stage::UploadFiles => "upload-files",
            Stage::AttachArtifactReferences => "attach-artifact-references",
            Stage::SendLogs => "send-logs",
            Stage::UploadVideos => "upload-videos",
            Stage::FinishTest => "finish-test",
            Stage::RunLabels => "run-labels",
            Stage::RunArtifactReferences => "run-artifact-references",
            Stage::RunArtifacts => "run-artifacts",
            Stage::FinishRun => "finish-run",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
