//! Host Runner Model
//!
//! The shapes the host test runner hands to the reporter callbacks:
//! a tree of suites owning tests, per-attempt results with attachments,
//! and the browser/OS platform a test ran on.
//!
//! ## Bridge Format
//!
//! `RunnerEvent` is the NDJSON encoding of the callbacks used by the
//! `zbr-agent report` binary. One event per line, tagged by `event`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Separator used when joining a title path into a qualified test name.
pub const TITLE_SEPARATOR: &str = " > ";

/// Browser and OS a test executed on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    #[serde(default)]
    pub browser_name: String,
    #[serde(default)]
    pub browser_version: String,
    #[serde(default)]
    pub os_name: String,
}

/// One test case as discovered by the runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Runner-local identifier, stable across retries of the same test.
    pub id: String,
    pub title: String,
    /// Titles of the enclosing suites, outermost first (file, describe blocks).
    #[serde(default)]
    pub suite_path: Vec<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub platform: Platform,
}

impl TestCase {
    /// Qualified name: suite path plus title.
    pub fn full_name(&self) -> String {
        self.suite_path
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .chain(std::iter::once(self.title.as_str()))
            .collect::<Vec<_>>()
            .join(TITLE_SEPARATOR)
    }

    /// Class-name equivalent for the backend: the enclosing suite path,
    /// or the file when the test is top-level.
    pub fn class_name(&self) -> String {
        let suites: Vec<&str> = self
            .suite_path
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        if suites.is_empty() {
            self.file.clone().unwrap_or_default()
        } else {
            suites.join(TITLE_SEPARATOR)
        }
    }
}

/// A node of the discovered test tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub suites: Vec<Suite>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl Suite {
    /// All tests in the tree, depth first.
    pub fn all_tests(&self) -> Vec<&TestCase> {
        let mut out: Vec<&TestCase> = self.tests.iter().collect();
        for child in &self.suites {
            out.extend(child.all_tests());
        }
        out
    }

    pub fn test_count(&self) -> usize {
        self.tests.len() + self.suites.iter().map(Suite::test_count).sum::<usize>()
    }

    /// Keep only the tests matching `keep`, at every level of the tree.
    pub fn retain_tests<F>(&mut self, keep: &mut F)
    where
        F: FnMut(&TestCase) -> bool,
    {
        self.tests.retain(|t| keep(t));
        for child in &mut self.suites {
            child.retain_tests(keep);
        }
    }
}

/// Runner-wide settings passed to `on_begin`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
}

/// Error reported for a failed attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
}

/// Raw runner attachment (video, trace, screenshot, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// In-memory content, base64 in the bridge format.
    #[serde(default, with = "base64_opt")]
    pub body: Option<Vec<u8>>,
}

/// One attempt of a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Runner status string: `passed`, `failed`, `skipped`, `timedOut`, `interrupted`, ...
    #[serde(default)]
    pub status: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub error: Option<TestError>,
    /// `None` when the runner supplied no attachment list at all.
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

impl TestResult {
    pub fn started_at(start_time: DateTime<Utc>) -> Self {
        Self {
            status: String::new(),
            start_time,
            duration_ms: 0,
            retry: 0,
            error: None,
            attachments: None,
        }
    }
}

/// One attempt of one test: the key for per-test state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attempt {
    pub test_id: String,
    pub retry: u32,
}

impl Attempt {
    pub fn new(test_id: impl Into<String>, retry: u32) -> Self {
        Self {
            test_id: test_id.into(),
            retry,
        }
    }

    pub fn of(test: &TestCase, result: &TestResult) -> Self {
        Self::new(test.id.clone(), result.retry)
    }
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.retry == 0 {
            write!(f, "{}", self.test_id)
        } else {
            write!(f, "{}#{}", self.test_id, self.retry)
        }
    }
}

// =============================================================================
// Bridge Events
// =============================================================================

/// Runner callbacks encoded for the `report` bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    Begin {
        #[serde(default)]
        config: RunnerConfig,
        suite: Suite,
    },
    TestBegin {
        test: TestCase,
        result: TestResult,
    },
    StdOut {
        #[serde(rename = "testId")]
        test_id: Option<String>,
        #[serde(default)]
        retry: u32,
        chunk: String,
    },
    TestEnd {
        test: TestCase,
        result: TestResult,
    },
    End,
}

mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test(id: &str, suites: &[&str], title: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            title: title.to_string(),
            suite_path: suites.iter().map(|s| s.to_string()).collect(),
            file: Some("login.spec.ts".to_string()),
            platform: Platform::default(),
        }
    }

    #[test]
    fn test_full_name_joins_suite_path() {
        let test = make_test("1", &["", "login.spec.ts", "Login"], "accepts valid user");
        assert_eq!(test.full_name(), "login.spec.ts > Login > accepts valid user");
    }

    #[test]
    fn test_class_name_falls_back_to_file() {
        let test = make_test("1", &[], "top level");
        assert_eq!(test.class_name(), "login.spec.ts");
    }

    #[test]
    fn test_retain_tests_walks_nested_suites() {
        let mut suite = Suite {
            title: String::new(),
            suites: vec![Suite {
                title: "nested".to_string(),
                suites: vec![],
                tests: vec![make_test("a", &[], "a"), make_test("b", &[], "b")],
            }],
            tests: vec![make_test("c", &[], "c")],
        };
        assert_eq!(suite.test_count(), 3);

        suite.retain_tests(&mut |t| t.id != "b");
        let ids: Vec<&str> = suite.all_tests().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_runner_event_tagging() {
        let line = r#"{"event":"std_out","testId":"t1","chunk":"hello"}"#;
        let event: RunnerEvent = serde_json::from_str(line).unwrap();
        match event {
            RunnerEvent::StdOut {
                test_id,
                retry,
                chunk,
            } => {
                assert_eq!(test_id.as_deref(), Some("t1"));
                assert_eq!(retry, 0);
                assert_eq!(chunk, "hello");
            }
            other => panic!("unexpected event {:?}", other),
        }

        let end: RunnerEvent = serde_json::from_str(r#"{"event":"end"}"#).unwrap();
        assert!(matches!(end, RunnerEvent::End));
    }

    #[test]
    fn test_attachment_body_is_base64() {
        let json = r#"{"name":"shot","contentType":"image/png","body":"aGk="}"#;
        let attachment: Attachment = serde_json::from_str(json).unwrap();
        assert_eq!(attachment.body.as_deref(), Some(&b"hi"[..]));
        assert!(attachment.path.is_none());
    }
}
