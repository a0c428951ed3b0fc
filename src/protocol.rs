//! Side-channel Event Protocol
//!
//! Code running inside a test talks to the reporter through the runner's
//! captured stdout. Every event is one self-contained JSON line:
//!
//! ```text
//! {"eventType":"attach-test-label","payload":{"key":"feature","values":["login"]}}
//! ```
//!
//! Decoding never fails: a line is either a known event, a well-formed
//! envelope with an unknown `eventType` (ignored), an envelope whose payload
//! does not match its type (invalid), or ordinary console output.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

// Event type discriminators
pub const ATTACH_RUN_LABEL: &str = "attach-run-label";
pub const ATTACH_RUN_ARTIFACT_REFERENCE: &str = "attach-run-artifact-reference";
pub const ATTACH_RUN_ARTIFACT: &str = "attach-run-artifact";
pub const ATTACH_TEST_CASE_LINK: &str = "attach-test-case-link";
pub const SET_MAINTAINER: &str = "set-maintainer";
pub const ATTACH_TEST_LOG: &str = "attach-test-log";
pub const ATTACH_TEST_LABEL: &str = "attach-test-label";
pub const ATTACH_TEST_ARTIFACT_REFERENCE: &str = "attach-test-artifact-reference";
pub const ATTACH_TEST_ARTIFACT: &str = "attach-test-artifact";
pub const ATTACH_TEST_SCREENSHOT: &str = "attach-test-screenshot";
pub const REVERT_TEST_REGISTRATION: &str = "revert-test-registration";
pub const LOG_ERROR: &str = "log-error";

/// Label values attached under one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPayload {
    pub key: String,
    pub values: Vec<String>,
}

/// Named link to an external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReferencePayload {
    pub name: String,
    pub value: String,
}

/// Where an artifact's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Path(PathBuf),
    Buffer(Vec<u8>),
}

/// Binary artifact with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPayload {
    pub source: ArtifactSource,
    pub name: Option<String>,
}

/// Screenshot with an optional capture time (epoch millis).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotPayload {
    pub source: ArtifactSource,
    pub captured_at: Option<i64>,
}

/// Link between the current test and a TCM case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseLinkPayload {
    pub tcm_type: String,
    pub test_case_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainerPayload {
    pub maintainer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    #[serde(default = "default_level")]
    pub level: String,
    pub message: String,
    /// Epoch millis; the receiver stamps arrival time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

fn default_level() -> String {
    "INFO".to_string()
}

/// Diagnostic raised by the emitting side instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogErrorPayload {
    pub message: String,
}

/// One out-of-band fact signalled from inside a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideChannelEvent {
    AttachRunLabel(LabelPayload),
    AttachRunArtifactReference(ArtifactReferencePayload),
    AttachRunArtifact(ArtifactPayload),
    AttachTestCaseLink(TestCaseLinkPayload),
    SetMaintainer(MaintainerPayload),
    AttachTestLog(LogPayload),
    AttachTestLabel(LabelPayload),
    AttachTestArtifactReference(ArtifactReferencePayload),
    AttachTestArtifact(ArtifactPayload),
    AttachTestScreenshot(ScreenshotPayload),
    RevertTestRegistration,
    LogError(LogErrorPayload),
}

impl SideChannelEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AttachRunLabel(_) => ATTACH_RUN_LABEL,
            Self::AttachRunArtifactReference(_) => ATTACH_RUN_ARTIFACT_REFERENCE,
            Self::AttachRunArtifact(_) => ATTACH_RUN_ARTIFACT,
            Self::AttachTestCaseLink(_) => ATTACH_TEST_CASE_LINK,
            Self::SetMaintainer(_) => SET_MAINTAINER,
            Self::AttachTestLog(_) => ATTACH_TEST_LOG,
            Self::AttachTestLabel(_) => ATTACH_TEST_LABEL,
            Self::AttachTestArtifactReference(_) => ATTACH_TEST_ARTIFACT_REFERENCE,
            Self::AttachTestArtifact(_) => ATTACH_TEST_ARTIFACT,
            Self::AttachTestScreenshot(_) => ATTACH_TEST_SCREENSHOT,
            Self::RevertTestRegistration => REVERT_TEST_REGISTRATION,
            Self::LogError(_) => LOG_ERROR,
        }
    }

    /// Encode as a single JSON line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let payload = match self {
            Self::AttachRunLabel(p) | Self::AttachTestLabel(p) => serde_json::to_value(p)?,
            Self::AttachRunArtifactReference(p) | Self::AttachTestArtifactReference(p) => {
                serde_json::to_value(p)?
            }
            Self::AttachRunArtifact(p) | Self::AttachTestArtifact(p) => {
                serde_json::to_value(WireArtifact::from_source(&p.source, p.name.clone(), None))?
            }
            Self::AttachTestScreenshot(p) => serde_json::to_value(WireArtifact::from_source(
                &p.source,
                None,
                p.captured_at,
            ))?,
            Self::AttachTestCaseLink(p) => serde_json::to_value(p)?,
            Self::SetMaintainer(p) => serde_json::to_value(p)?,
            Self::AttachTestLog(p) => serde_json::to_value(p)?,
            Self::LogError(p) => serde_json::to_value(p)?,
            Self::RevertTestRegistration => Value::Null,
        };
        serde_json::to_string(&Envelope {
            event_type: self.event_type().to_string(),
            payload,
        })
    }
}

// =============================================================================
// Wire Shapes
// =============================================================================

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    event_type: String,
    #[serde(default)]
    payload: Value,
}

/// Artifacts travel either as a file path or as base64 content.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    captured_at: Option<i64>,
}

impl WireArtifact {
    fn from_source(source: &ArtifactSource, name: Option<String>, captured_at: Option<i64>) -> Self {
        let (path, content) = match source {
            ArtifactSource::Path(p) => (Some(p.clone()), None),
            ArtifactSource::Buffer(b) => (None, Some(STANDARD.encode(b))),
        };
        Self {
            path,
            content,
            name,
            captured_at,
        }
    }

    fn into_source(self) -> Result<(ArtifactSource, Option<String>, Option<i64>), String> {
        let source = match (self.path, self.content) {
            (Some(path), None) => ArtifactSource::Path(path),
            (None, Some(content)) => {
                ArtifactSource::Buffer(STANDARD.decode(content).map_err(|e| e.to_string())?)
            }
            (Some(_), Some(_)) => return Err("both path and content given".to_string()),
            (None, None) => return Err("neither path nor content given".to_string()),
        };
        Ok((source, self.name, self.captured_at))
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Outcome of decoding one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(SideChannelEvent),
    /// Well-formed envelope with an `eventType` outside the closed set.
    Unknown(String),
    /// Known `eventType` whose payload does not match.
    Invalid { event_type: String, error: String },
    /// Anything that is not an event envelope.
    Console(String),
}

/// Decode every non-blank line of a stdout chunk.
pub fn decode_chunk(chunk: &str) -> Vec<Decoded> {
    chunk
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(decode_line)
        .collect()
}

/// Decode a single line.
pub fn decode_line(line: &str) -> Decoded {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return Decoded::Console(trimmed.to_string());
    }
    let envelope: Envelope = match serde_json::from_str(trimmed) {
        Ok(e) => e,
        Err(_) => return Decoded::Console(trimmed.to_string()),
    };

    let event_type = envelope.event_type;
    let payload = envelope.payload;
    let result = match event_type.as_str() {
        ATTACH_RUN_LABEL => payload_as(payload).map(SideChannelEvent::AttachRunLabel),
        ATTACH_RUN_ARTIFACT_REFERENCE => {
            payload_as(payload).map(SideChannelEvent::AttachRunArtifactReference)
        }
        ATTACH_RUN_ARTIFACT => artifact_payload(payload).map(SideChannelEvent::AttachRunArtifact),
        ATTACH_TEST_CASE_LINK => payload_as(payload).map(SideChannelEvent::AttachTestCaseLink),
        SET_MAINTAINER => payload_as(payload).map(SideChannelEvent::SetMaintainer),
        ATTACH_TEST_LOG => payload_as(payload).map(SideChannelEvent::AttachTestLog),
        ATTACH_TEST_LABEL => payload_as(payload).map(SideChannelEvent::AttachTestLabel),
        ATTACH_TEST_ARTIFACT_REFERENCE => {
            payload_as(payload).map(SideChannelEvent::AttachTestArtifactReference)
        }
        ATTACH_TEST_ARTIFACT => artifact_payload(payload).map(SideChannelEvent::AttachTestArtifact),
        ATTACH_TEST_SCREENSHOT => payload_as::<WireArtifact>(payload)
            .and_then(WireArtifact::into_source)
            .map(|(source, _, captured_at)| {
                SideChannelEvent::AttachTestScreenshot(ScreenshotPayload {
                    source,
                    captured_at,
                })
            }),
        REVERT_TEST_REGISTRATION => Ok(SideChannelEvent::RevertTestRegistration),
        LOG_ERROR => payload_as(payload).map(SideChannelEvent::LogError),
        _ => return Decoded::Unknown(event_type),
    };

    match result {
        Ok(event) => Decoded::Event(event),
        Err(error) => Decoded::Invalid { event_type, error },
    }
}

fn payload_as<T: DeserializeOwned>(payload: Value) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|e| e.to_string())
}

fn artifact_payload(payload: Value) -> Result<ArtifactPayload, String> {
    let (source, name, _) = payload_as::<WireArtifact>(payload)?.into_source()?;
    Ok(ArtifactPayload { source, name })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_label_event() {
        let line = r#"{"eventType":"attach-test-label","payload":{"key":"feature","values":["login","auth"]}}"#;
        match decode_line(line) {
            Decoded::Event(SideChannelEvent::AttachTestLabel(p)) => {
                assert_eq!(p.key, "feature");
                assert_eq!(p.values, vec!["login", "auth"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_revert_without_payload() {
        let decoded = decode_line(r#"{"eventType":"revert-test-registration"}"#);
        assert_eq!(
            decoded,
            Decoded::Event(SideChannelEvent::RevertTestRegistration)
        );
    }

    #[test]
    fn test_unknown_event_type_is_ignored_not_invalid() {
        let decoded = decode_line(r#"{"eventType":"attach-weather","payload":{}}"#);
        assert_eq!(decoded, Decoded::Unknown("attach-weather".to_string()));
    }

    #[test]
    fn test_bad_payload_is_invalid() {
        let decoded = decode_line(r#"{"eventType":"set-maintainer","payload":{"who":"x"}}"#);
        assert!(matches!(decoded, Decoded::Invalid { ref event_type, .. } if event_type == SET_MAINTAINER));
    }

    #[test]
    fn test_plain_text_and_foreign_json_are_console() {
        assert_eq!(
            decode_line("  opening login page "),
            Decoded::Console("opening login page".to_string())
        );
        assert!(matches!(decode_line(r#"{"user":"bob"}"#), Decoded::Console(_)));
        assert!(matches!(decode_line("{not json"), Decoded::Console(_)));
    }

    #[test]
    fn test_artifact_requires_exactly_one_source() {
        let both = r#"{"eventType":"attach-test-artifact","payload":{"path":"/tmp/a","content":"aGk="}}"#;
        assert!(matches!(decode_line(both), Decoded::Invalid { .. }));

        let buffer = r#"{"eventType":"attach-test-artifact","payload":{"content":"aGk=","name":"hi.txt"}}"#;
        match decode_line(buffer) {
            Decoded::Event(SideChannelEvent::AttachTestArtifact(p)) => {
                assert_eq!(p.source, ArtifactSource::Buffer(b"hi".to_vec()));
                assert_eq!(p.name.as_deref(), Some("hi.txt"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_log_level_defaults_to_info() {
        let line = r#"{"eventType":"attach-test-log","payload":{"message":"step 1"}}"#;
        match decode_line(line) {
            Decoded::Event(SideChannelEvent::AttachTestLog(p)) => {
                assert_eq!(p.level, "INFO");
                assert!(p.timestamp.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chunk_with_mixed_lines() {
        let chunk = "booting\n{\"eventType\":\"set-maintainer\",\"payload\":{\"maintainer\":\"jdoe\"}}\n\n";
        let decoded = decode_chunk(chunk);
        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded[0], Decoded::Console(_)));
        assert!(matches!(
            decoded[1],
            Decoded::Event(SideChannelEvent::SetMaintainer(_))
        ));
    }

    #[test]
    fn test_encoded_line_is_single_line() {
        let event = SideChannelEvent::AttachTestLog(LogPayload {
            level: "WARN".to_string(),
            message: "multi\nline".to_string(),
            timestamp: Some(1),
        });
        let line = event.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"eventType\":\"attach-test-log\""));
    }
}
