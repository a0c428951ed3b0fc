//! In-test helpers that emit side-channel events.
//!
//! Each call writes at most one JSON line to the sink (stdout by default),
//! which the runner captures and forwards to the reporter's stdout callback.
//! Nothing here panics or returns an error: a rejected call becomes a
//! `log-error` event so one bad call site never aborts the test.

use crate::protocol::{
    ArtifactPayload, ArtifactReferencePayload, ArtifactSource, LabelPayload, LogErrorPayload,
    LogPayload, MaintainerPayload, ScreenshotPayload, SideChannelEvent, TestCaseLinkPayload,
};
use std::io::{Stdout, Write};
use std::sync::Mutex;

pub const TCM_TEST_RAIL: &str = "TEST_RAIL";
pub const TCM_XRAY: &str = "XRAY";
pub const TCM_ZEPHYR: &str = "ZEPHYR";
pub const TCM_ZEBRUNNER: &str = "ZEBRUNNER";

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Writes side-channel events to a line sink.
pub struct Emitter<W: Write + Send> {
    out: Mutex<W>,
}

impl Emitter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Emitter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// Write one event as one line.
    pub fn emit(&self, event: &SideChannelEvent) {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, event_type = event.event_type(), "failed to encode event");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "failed to write side-channel event");
        }
    }

    fn error(&self, message: String) {
        self.emit(&SideChannelEvent::LogError(LogErrorPayload { message }));
    }

    /// Validates a label call. `None` means nothing should be sent.
    fn label_payload(&self, what: &str, key: &str, values: &[&str]) -> Option<LabelPayload> {
        if is_blank(key) {
            self.error(format!("{}: label key must not be blank", what));
            return None;
        }
        if values.is_empty() {
            self.error(format!("{}: label '{}' needs at least one value", what, key));
            return None;
        }
        let values: Vec<String> = values
            .iter()
            .filter(|v| !is_blank(v))
            .map(|v| v.to_string())
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(LabelPayload {
            key: key.to_string(),
            values,
        })
    }

    fn reference_payload(
        &self,
        what: &str,
        name: &str,
        value: &str,
    ) -> Option<ArtifactReferencePayload> {
        if is_blank(name) || is_blank(value) {
            self.error(format!(
                "{}: artifact reference name and value must not be blank",
                what
            ));
            return None;
        }
        Some(ArtifactReferencePayload {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    fn artifact_payload(
        &self,
        what: &str,
        source: ArtifactSource,
        name: Option<&str>,
    ) -> Option<ArtifactPayload> {
        match &source {
            ArtifactSource::Path(p) if is_blank(&p.to_string_lossy()) => {
                self.error(format!("{}: artifact path must not be blank", what));
                return None;
            }
            ArtifactSource::Buffer(b) if b.is_empty() => {
                self.error(format!("{}: artifact buffer must not be empty", what));
                return None;
            }
            _ => {}
        }
        Some(ArtifactPayload {
            source,
            name: name.filter(|n| !is_blank(n)).map(str::to_string),
        })
    }

    // =========================================================================
    // Current Test
    // =========================================================================

    pub fn set_maintainer(&self, maintainer: &str) {
        if is_blank(maintainer) {
            self.error("set_maintainer: maintainer must not be blank".to_string());
            return;
        }
        self.emit(&SideChannelEvent::SetMaintainer(MaintainerPayload {
            maintainer: maintainer.to_string(),
        }));
    }

    pub fn test_label(&self, key: &str, values: &[&str]) {
        if let Some(p) = self.label_payload("test_label", key, values) {
            self.emit(&SideChannelEvent::AttachTestLabel(p));
        }
    }

    pub fn test_log(&self, level: &str, message: &str) {
        if is_blank(message) {
            self.error("test_log: message must not be blank".to_string());
            return;
        }
        let level = if is_blank(level) { "INFO" } else { level };
        self.emit(&SideChannelEvent::AttachTestLog(LogPayload {
            level: level.to_uppercase(),
            message: message.to_string(),
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }));
    }

    pub fn test_artifact_reference(&self, name: &str, value: &str) {
        if let Some(p) = self.reference_payload("test_artifact_reference", name, value) {
            self.emit(&SideChannelEvent::AttachTestArtifactReference(p));
        }
    }

    pub fn test_artifact(&self, source: ArtifactSource, name: Option<&str>) {
        if let Some(p) = self.artifact_payload("test_artifact", source, name) {
            self.emit(&SideChannelEvent::AttachTestArtifact(p));
        }
    }

    pub fn test_screenshot(&self, source: ArtifactSource, captured_at: Option<i64>) {
        if let Some(p) = self.artifact_payload("test_screenshot", source, None) {
            self.emit(&SideChannelEvent::AttachTestScreenshot(ScreenshotPayload {
                source: p.source,
                captured_at,
            }));
        }
    }

    /// Ask the reporter to delete this test's registration instead of finishing it.
    pub fn revert_registration(&self) {
        self.emit(&SideChannelEvent::RevertTestRegistration);
    }

    // =========================================================================
    // Run
    // =========================================================================

    pub fn run_label(&self, key: &str, values: &[&str]) {
        if let Some(p) = self.label_payload("run_label", key, values) {
            self.emit(&SideChannelEvent::AttachRunLabel(p));
        }
    }

    pub fn run_artifact_reference(&self, name: &str, value: &str) {
        if let Some(p) = self.reference_payload("run_artifact_reference", name, value) {
            self.emit(&SideChannelEvent::AttachRunArtifactReference(p));
        }
    }

    pub fn run_artifact(&self, source: ArtifactSource, name: Option<&str>) {
        if let Some(p) = self.artifact_payload("run_artifact", source, name) {
            self.emit(&SideChannelEvent::AttachRunArtifact(p));
        }
    }

    // =========================================================================
    // Test Case Management
    // =========================================================================

    /// Link the current test to one event per non-blank case id.
    pub fn test_case(&self, tcm_type: &str, case_ids: &[&str], result_status: Option<&str>) {
        if is_blank(tcm_type) {
            self.error("test_case: tcm type must not be blank".to_string());
            return;
        }
        if case_ids.is_empty() {
            self.error(format!("test_case: {} needs at least one case id", tcm_type));
            return;
        }
        let result_status = result_status.filter(|s| !is_blank(s)).map(str::to_string);
        for id in case_ids.iter().filter(|id| !is_blank(id)) {
            self.emit(&SideChannelEvent::AttachTestCaseLink(TestCaseLinkPayload {
                tcm_type: tcm_type.to_string(),
                test_case_id: id.trim().to_string(),
                result_status: result_status.clone(),
            }));
        }
    }

    pub fn test_rail_case(&self, case_ids: &[&str]) {
        self.test_case(TCM_TEST_RAIL, case_ids, None);
    }

    pub fn xray_case(&self, case_ids: &[&str]) {
        self.test_case(TCM_XRAY, case_ids, None);
    }

    pub fn zephyr_case(&self, case_ids: &[&str]) {
        self.test_case(TCM_ZEPHYR, case_ids, None);
    }

    pub fn zebrunner_case(&self, case_ids: &[&str]) {
        self.test_case(TCM_ZEBRUNNER, case_ids, None);
    }

    /// Override the status pushed to the TCM for one already linked case.
    pub fn test_case_status(&self, tcm_type: &str, case_id: &str, result_status: &str) {
        if is_blank(result_status) {
            self.error("test_case_status: result status must not be blank".to_string());
            return;
        }
        self.test_case(tcm_type, &[case_id], Some(result_status));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_chunk, Decoded};

    fn emitted(f: impl FnOnce(&Emitter<Vec<u8>>)) -> Vec<Decoded> {
        let emitter = Emitter::new(Vec::new());
        f(&emitter);
        let bytes = emitter.into_inner();
        decode_chunk(&String::from_utf8(bytes).unwrap())
    }

    #[test]
    fn test_label_drops_blank_values() {
        let events = emitted(|e| e.test_label("feature", &["login", "  ", "auth"]));
        assert_eq!(events.len(), 1);
        match &events[0] {
            Decoded::Event(SideChannelEvent::AttachTestLabel(p)) => {
                assert_eq!(p.values, vec!["login", "auth"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_all_blank_values_emit_nothing() {
        let events = emitted(|e| e.test_label("feature", &["", " "]));
        assert!(events.is_empty());
    }

    #[test]
    fn test_blank_key_becomes_log_error() {
        let events = emitted(|e| e.run_label(" ", &["x"]));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Decoded::Event(SideChannelEvent::LogError(_))
        ));
    }

    #[test]
    fn test_no_values_becomes_log_error() {
        let events = emitted(|e| e.test_label("feature", &[]));
        assert!(matches!(
            events[0],
            Decoded::Event(SideChannelEvent::LogError(_))
        ));
    }

    #[test]
    fn test_case_emits_one_event_per_id() {
        let events = emitted(|e| e.test_rail_case(&["C1", "", "C2"]));
        let ids: Vec<String> = events
            .iter()
            .map(|d| match d {
                Decoded::Event(SideChannelEvent::AttachTestCaseLink(p)) => {
                    assert_eq!(p.tcm_type, TCM_TEST_RAIL);
                    p.test_case_id.clone()
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec!["C1", "C2"]);
    }

    #[test]
    fn test_case_status_carries_override() {
        let events = emitted(|e| e.test_case_status(TCM_XRAY, "QA-7", "BLOCKED"));
        match &events[0] {
            Decoded::Event(SideChannelEvent::AttachTestCaseLink(p)) => {
                assert_eq!(p.result_status.as_deref(), Some("BLOCKED"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_buffer_artifact_rejected() {
        let events = emitted(|e| e.test_artifact(ArtifactSource::Buffer(vec![]), Some("x")));
        assert!(matches!(
            events[0],
            Decoded::Event(SideChannelEvent::LogError(_))
        ));
    }

    #[test]
    fn test_log_level_uppercased() {
        let events = emitted(|e| e.test_log("debug", "clicked submit"));
        match &events[0] {
            Decoded::Event(SideChannelEvent::AttachTestLog(p)) => assert_eq!(p.level, "DEBUG"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
