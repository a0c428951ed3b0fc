//! Run-Context / Rerun Resolution
//!
//! Decides once per run whether this invocation is a fresh run or the
//! continuation of a previous one, and for subset reruns prunes the
//! discovered tree down to the previously registered tests.
//!
//! ## Matching
//!
//! A local test matches a registered one when the fingerprint
//! (qualified name, browser name, browser version, OS name) is equal on
//! all four components. No fuzzy or partial matching.

use crate::api::{ExchangedRunContext, RegisteredTest, ReportingApi, RunMode, TestId};
use crate::error::{AgentError, AgentResult};
use crate::runner::{Platform, Suite, TestCase};
use std::collections::HashMap;
use tracing::{info, warn};

/// Identity of a test across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub name: String,
    pub browser_name: String,
    pub browser_version: String,
    pub os_name: String,
}

impl Fingerprint {
    pub fn new(name: impl Into<String>, platform: &Platform) -> Self {
        Self {
            name: name.into(),
            browser_name: platform.browser_name.clone(),
            browser_version: platform.browser_version.clone(),
            os_name: platform.os_name.clone(),
        }
    }

    pub fn of_test(test: &TestCase) -> Self {
        Self::new(test.full_name(), &test.platform)
    }

    /// Fingerprint of a registered test. Missing correlation data counts as
    /// an empty platform; malformed correlation data never matches.
    pub fn of_registered(test: &RegisteredTest) -> Option<Self> {
        let platform = match test.correlation_data.as_deref() {
            None | Some("") => Platform::default(),
            Some(raw) => match serde_json::from_str::<Platform>(raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(test = %test.name, error = %e, "unreadable correlation data");
                    return None;
                }
            },
        };
        Some(Self::new(test.name.clone(), &platform))
    }
}

/// JSON correlation string sent with a started test.
pub fn correlation_data(platform: &Platform) -> Option<String> {
    serde_json::to_string(platform).ok()
}

/// Outcome of run-context resolution.
#[derive(Debug, Clone, Default)]
pub struct RunResolution {
    pub mode: RunMode,
    /// Attached to "start run" when this run continues a previous one.
    pub continuation_uuid: Option<String>,
    /// Registered tests by fingerprint; `Some` only for subset reruns.
    registered: Option<HashMap<Fingerprint, TestId>>,
}

impl RunResolution {
    pub fn new_run() -> Self {
        Self::default()
    }

    pub fn is_subset_rerun(&self) -> bool {
        self.registered.is_some()
    }

    /// Remote id of the registered test this local test continues.
    pub fn registered_id(&self, test: &TestCase) -> Option<TestId> {
        self.registered
            .as_ref()
            .and_then(|m| m.get(&Fingerprint::of_test(test)).copied())
    }

    fn from_context(context: &ExchangedRunContext) -> Self {
        let registered = (context.mode == RunMode::Rerun && context.run_only_specific_tests)
            .then(|| index_registered(&context.tests_to_run));
        Self {
            mode: context.mode,
            continuation_uuid: context.test_run_uuid.clone(),
            registered,
        }
    }
}

fn index_registered(tests: &[RegisteredTest]) -> HashMap<Fingerprint, TestId> {
    tests
        .iter()
        .filter_map(|t| Fingerprint::of_registered(t).map(|f| (f, t.id)))
        .collect()
}

/// Keep only tests whose fingerprint matches a registered test.
/// Returns the number of tests removed.
pub fn filter_suite(suite: &mut Suite, registered: &[RegisteredTest]) -> usize {
    let index = index_registered(registered);
    let before = suite.test_count();
    suite.retain_tests(&mut |t| index.contains_key(&Fingerprint::of_test(t)));
    before - suite.test_count()
}

/// Decide the run mode and filter `suite` in place.
pub fn resolve(
    context: Option<&str>,
    exchanged: Option<ExchangedRunContext>,
    suite: &mut Suite,
) -> AgentResult<RunResolution> {
    let (Some(_), Some(exchanged)) = (context, exchanged) else {
        return Ok(RunResolution::new_run());
    };

    let resolution = RunResolution::from_context(&exchanged);
    if resolution.is_subset_rerun() {
        if !exchanged.run_allowed {
            let reason = exchanged
                .reason
                .clone()
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(AgentError::RunNotAllowed { reason });
        }
        let removed = filter_suite(suite, &exchanged.tests_to_run);
        info!(
            kept = suite.test_count(),
            removed, "rerun limited to previously registered tests"
        );
    }
    Ok(resolution)
}

/// Exchange the run context with the backend (when one is supplied) and resolve.
pub async fn exchange_and_resolve(
    api: &dyn ReportingApi,
    context: Option<&str>,
    suite: &mut Suite,
) -> AgentResult<RunResolution> {
    let Some(token) = context else {
        return Ok(RunResolution::new_run());
    };
    let exchanged = api.exchange_run_context(token).await?;
    resolve(Some(token), Some(exchanged), suite)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chrome() -> Platform {
        Platform {
            browser_name: "chromium".to_string(),
            browser_version: "120.0".to_string(),
            os_name: "linux".to_string(),
        }
    }

    fn make_test(id: &str, title: &str, platform: Platform) -> TestCase {
        TestCase {
            id: id.to_string(),
            title: title.to_string(),
            suite_path: vec!["cart.spec.ts".to_string()],
            file: None,
            platform,
        }
    }

    #[test]
    fn test_fingerprint_roundtrips_through_correlation_data() {
        let test = make_test("1", "adds item", chrome());
        let registered = RegisteredTest {
            id: 10,
            name: test.full_name(),
            correlation_data: correlation_data(&test.platform),
        };
        assert_eq!(
            Fingerprint::of_registered(&registered),
            Some(Fingerprint::of_test(&test))
        );
    }

    #[test]
    fn test_version_difference_breaks_match() {
        let mut other = chrome();
        other.browser_version = "121.0".to_string();
        let a = Fingerprint::of_test(&make_test("1", "adds item", chrome()));
        let b = Fingerprint::of_test(&make_test("1", "adds item", other));
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_correlation_never_matches() {
        let registered = RegisteredTest {
            id: 1,
            name: "x".to_string(),
            correlation_data: Some("{broken".to_string()),
        };
        assert!(Fingerprint::of_registered(&registered).is_none());
    }

    #[test]
    fn test_no_context_is_new_run() {
        let mut suite = Suite::default();
        let resolution = resolve(None, None, &mut suite).unwrap();
        assert_eq!(resolution.mode, RunMode::New);
        assert!(resolution.continuation_uuid.is_none());
        assert!(!resolution.is_subset_rerun());
    }

    #[test]
    fn test_rerun_all_keeps_tree_and_uuid() {
        let mut suite = Suite {
            tests: vec![make_test("1", "a", chrome()), make_test("2", "b", chrome())],
            ..Suite::default()
        };
        let exchanged = ExchangedRunContext {
            mode: RunMode::Rerun,
            test_run_uuid: Some("uuid-1".to_string()),
            run_allowed: true,
            ..ExchangedRunContext::default()
        };
        let resolution = resolve(Some("ctx"), Some(exchanged), &mut suite).unwrap();
        assert_eq!(resolution.continuation_uuid.as_deref(), Some("uuid-1"));
        assert!(!resolution.is_subset_rerun());
        assert_eq!(suite.test_count(), 2);
    }

    #[test]
    fn test_run_allowed_only_checked_for_subset_rerun() {
        let denied = |mode, run_only_specific_tests| ExchangedRunContext {
            mode,
            run_allowed: false,
            reason: Some("quota exceeded".to_string()),
            run_only_specific_tests,
            ..ExchangedRunContext::default()
        };
        let mut suite = Suite {
            tests: vec![make_test("1", "a", chrome())],
            ..Suite::default()
        };

        let resolution =
            resolve(Some("ctx"), Some(denied(RunMode::New, true)), &mut suite).unwrap();
        assert_eq!(resolution.mode, RunMode::New);
        let resolution =
            resolve(Some("ctx"), Some(denied(RunMode::Rerun, false)), &mut suite).unwrap();
        assert!(!resolution.is_subset_rerun());
        assert_eq!(suite.test_count(), 1);

        assert!(matches!(
            resolve(Some("ctx"), Some(denied(RunMode::Rerun, true)), &mut suite),
            Err(AgentError::RunNotAllowed { .. })
        ));
    }

    #[test]
    fn test_registered_id_lookup() {
        let test = make_test("1", "a", chrome());
        let exchanged = ExchangedRunContext {
            mode: RunMode::Rerun,
            run_allowed: true,
            run_only_specific_tests: true,
            tests_to_run: vec![RegisteredTest {
                id: 77,
                name: test.full_name(),
                correlation_data: correlation_data(&chrome()),
            }],
            ..ExchangedRunContext::default()
        };
        let mut suite = Suite {
            tests: vec![test.clone()],
            ..Suite::default()
        };
        let resolution = resolve(Some("ctx"), Some(exchanged), &mut suite).unwrap();
        assert_eq!(resolution.registered_id(&test), Some(77));
        assert_eq!(
            resolution.registered_id(&make_test("2", "other", chrome())),
            None
        );
    }
}
