//! Integration tests for the side-channel protocol: sdk emitter output
//! decoded the way the reporter decodes captured stdout.

use zbr_agent::protocol::{
    decode_chunk, decode_line, ArtifactSource, Decoded, LabelPayload, SideChannelEvent,
    TestCaseLinkPayload,
};
use zbr_agent::sdk::{Emitter, TCM_TEST_RAIL, TCM_XRAY};

fn emitted(f: impl FnOnce(&Emitter<Vec<u8>>)) -> String {
    let emitter = Emitter::new(Vec::new());
    f(&emitter);
    String::from_utf8(emitter.into_inner()).expect("utf8 output")
}

fn events(output: &str) -> Vec<SideChannelEvent> {
    decode_chunk(output)
        .into_iter()
        .map(|decoded| match decoded {
            Decoded::Event(event) => event,
            other => panic!("expected event, got {:?}", other),
        })
        .collect()
}

#[test]
fn test_each_emit_is_one_line() {
    let output = emitted(|e| {
        e.test_label("feature", &["login"]);
        e.set_maintainer("alice");
        e.revert_registration();
    });
    assert_eq!(output.lines().count(), 3);
    assert!(output.lines().all(|l| l.starts_with('{')));
}

#[test]
fn test_label_survives_the_stream() {
    let output = emitted(|e| e.test_label("feature", &["login", "  ", "cart"]));
    assert_eq!(
        events(&output),
        vec![SideChannelEvent::AttachTestLabel(LabelPayload {
            key: "feature".to_string(),
            values: vec!["login".to_string(), "cart".to_string()],
        })]
    );
}

#[test]
fn test_tcm_helpers_emit_one_link_per_case() {
    let output = emitted(|e| {
        e.test_rail_case(&["C1", "", "C2"]);
        e.test_case_status(TCM_XRAY, "X-9", "BLOCKED");
    });
    assert_eq!(
        events(&output),
        vec![
            SideChannelEvent::AttachTestCaseLink(TestCaseLinkPayload {
                tcm_type: TCM_TEST_RAIL.to_string(),
                test_case_id: "C1".to_string(),
                result_status: None,
            }),
            SideChannelEvent::AttachTestCaseLink(TestCaseLinkPayload {
                tcm_type: TCM_TEST_RAIL.to_string(),
                test_case_id: "C2".to_string(),
                result_status: None,
            }),
            SideChannelEvent::AttachTestCaseLink(TestCaseLinkPayload {
                tcm_type: TCM_XRAY.to_string(),
                test_case_id: "X-9".to_string(),
                result_status: Some("BLOCKED".to_string()),
            }),
        ]
    );
}

#[test]
fn test_buffer_screenshot_crosses_as_base64() {
    let output = emitted(|e| e.test_screenshot(ArtifactSource::Buffer(vec![0, 159, 146, 150]), Some(42)));
    assert!(output.contains("\"content\""));
    match events(&output).as_slice() {
        [SideChannelEvent::AttachTestScreenshot(p)] => {
            assert_eq!(p.source, ArtifactSource::Buffer(vec![0, 159, 146, 150]));
            assert_eq!(p.captured_at, Some(42));
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_console_lines_mixed_with_events() {
    let label = emitted(|e| e.test_label("k", &["v"]));
    let chunk = format!("navigating to /login\n{}not json {{\n", label);
    let decoded = decode_chunk(&chunk);
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[0], Decoded::Console("navigating to /login".to_string()));
    assert!(matches!(decoded[1], Decoded::Event(SideChannelEvent::AttachTestLabel(_))));
    assert_eq!(decoded[2], Decoded::Console("not json {".to_string()));
}

#[test]
fn test_unknown_and_invalid_are_distinct() {
    assert_eq!(
        decode_line(r#"{"eventType":"attach-weather","payload":{}}"#),
        Decoded::Unknown("attach-weather".to_string())
    );
    assert!(matches!(
        decode_line(r#"{"eventType":"attach-test-artifact","payload":{}}"#),
        Decoded::Invalid { .. }
    ));
}

#[test]
fn test_json_that_is_not_an_envelope_is_console() {
    assert!(matches!(decode_line(r#"{"status":"ok"}"#), Decoded::Console(_)));
    assert!(matches!(decode_line("[1,2,3]"), Decoded::Console(_)));
}
