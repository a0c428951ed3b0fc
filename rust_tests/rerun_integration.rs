//! Integration tests for run-context exchange and rerun filtering.

mod support;

use support::{chromium, make_test, RecordingApi};
use zbr_agent::api::{ExchangedRunContext, RegisteredTest, RunMode};
use zbr_agent::error::AgentError;
use zbr_agent::rerun::{correlation_data, exchange_and_resolve, filter_suite};
use zbr_agent::runner::{Platform, Suite};

fn registered(id: i64, name: &str, platform: &Platform) -> RegisteredTest {
    RegisteredTest {
        id,
        name: name.to_string(),
        correlation_data: correlation_data(platform),
    }
}

fn three_test_suite() -> Suite {
    Suite {
        title: String::new(),
        suites: vec![Suite {
            title: "cart.spec.ts".to_string(),
            suites: vec![],
            tests: vec![
                make_test("a", "adds item"),
                make_test("b", "removes item"),
                make_test("c", "checks out"),
            ],
        }],
        tests: vec![],
    }
}

fn subset_context(tests: Vec<RegisteredTest>) -> ExchangedRunContext {
    ExchangedRunContext {
        mode: RunMode::Rerun,
        test_run_uuid: Some("previous-uuid".to_string()),
        run_allowed: true,
        reason: None,
        run_only_specific_tests: true,
        tests_to_run: tests,
    }
}

#[tokio::test]
async fn test_subset_rerun_keeps_only_matching_tests() {
    let mut suite = three_test_suite();
    let api = RecordingApi::new().with_context(subset_context(vec![
        registered(10, "cart.spec.ts > adds item", &chromium()),
        registered(11, "cart.spec.ts > checks out", &chromium()),
    ]));

    let resolution = exchange_and_resolve(&api, Some("ctx"), &mut suite)
        .await
        .unwrap();

    let ids: Vec<&str> = suite.all_tests().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert!(resolution.is_subset_rerun());
    assert_eq!(resolution.continuation_uuid.as_deref(), Some("previous-uuid"));
    assert_eq!(resolution.registered_id(&make_test("c", "checks out")), Some(11));
}

#[tokio::test]
async fn test_run_not_allowed_surfaces_reason() {
    let mut suite = three_test_suite();
    let mut context = subset_context(vec![]);
    context.run_allowed = false;
    context.reason = Some("quota exceeded".to_string());
    let api = RecordingApi::new().with_context(context);

    match exchange_and_resolve(&api, Some("ctx"), &mut suite).await {
        Err(AgentError::RunNotAllowed { reason }) => assert_eq!(reason, "quota exceeded"),
        other => panic!("expected run-not-allowed, got {:?}", other),
    }
    assert_eq!(suite.test_count(), 3);
}

#[tokio::test]
async fn test_new_mode_ignores_run_not_allowed() {
    let mut suite = three_test_suite();
    let context = ExchangedRunContext {
        mode: RunMode::New,
        run_allowed: false,
        reason: Some("quota exceeded".to_string()),
        ..ExchangedRunContext::default()
    };
    let api = RecordingApi::new().with_context(context);

    let resolution = exchange_and_resolve(&api, Some("ctx"), &mut suite)
        .await
        .unwrap();
    assert_eq!(resolution.mode, RunMode::New);
    assert!(!resolution.is_subset_rerun());
    assert_eq!(suite.test_count(), 3);
}

#[tokio::test]
async fn test_no_context_skips_exchange() {
    let mut suite = three_test_suite();
    let api = RecordingApi::new();

    let resolution = exchange_and_resolve(&api, None, &mut suite).await.unwrap();
    assert_eq!(resolution.mode, RunMode::New);
    assert!(api.ops().is_empty());
    assert_eq!(suite.test_count(), 3);
}

#[tokio::test]
async fn test_rerun_without_subset_keeps_full_tree() {
    let mut suite = three_test_suite();
    let mut context = subset_context(vec![registered(10, "cart.spec.ts > adds item", &chromium())]);
    context.run_only_specific_tests = false;
    let api = RecordingApi::new().with_context(context);

    let resolution = exchange_and_resolve(&api, Some("ctx"), &mut suite)
        .await
        .unwrap();
    assert!(!resolution.is_subset_rerun());
    assert_eq!(resolution.continuation_uuid.as_deref(), Some("previous-uuid"));
    assert_eq!(suite.test_count(), 3);
}

#[test]
fn test_platform_components_must_all_match() {
    let mut firefox = chromium();
    firefox.browser_name = "firefox".to_string();
    let mut other_os = chromium();
    other_os.os_name = "darwin".to_string();

    let mut suite = three_test_suite();
    let removed = filter_suite(
        &mut suite,
        &[
            registered(1, "cart.spec.ts > adds item", &firefox),
            registered(2, "cart.spec.ts > removes item", &other_os),
            registered(3, "cart.spec.ts > checks out", &chromium()),
        ],
    );
    assert_eq!(removed, 2);
    assert_eq!(suite.all_tests()[0].id, "c");
}

#[test]
fn test_partial_name_does_not_match() {
    let mut suite = three_test_suite();
    filter_suite(&mut suite, &[registered(1, "adds item", &chromium())]);
    assert_eq!(suite.test_count(), 0);
}
