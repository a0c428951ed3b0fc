//! Run-Scoped Reporting State
//!
//! Everything the reporter learns during one run lives here: the remote run
//! id, the phase of every test attempt, the facts accumulated from the
//! side channel, and the failure tally.
//!
//! ## Phases
//!
//! ```text
//! (absent) ──► Started{remote_id} ──► Finished
//!     │                          └──► Reverted
//!     └──────► Abandoned
//! ```
//!
//! Run and test phases share one `watch` channel, so a waiter wakes on the
//! transition it needs or on the run being aborted, whichever comes first.

use crate::api::{ArtifactReference, Label, RunId, TestCaseLink, TestId};
use crate::error::{AgentError, AgentResult, Stage};
use crate::protocol::{ArtifactPayload, ScreenshotPayload};
use crate::runner::Attempt;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::warn;

// =============================================================================
// Phases
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Pending,
    Running(RunId),
    /// A fatal error ended reporting; every waiter gives up.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Started { remote_id: TestId },
    Finished,
    Reverted,
    /// Begin failed for this attempt only; nothing is reported for it.
    Abandoned,
}

impl TestPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestPhase::Started { .. })
    }
}

#[derive(Debug, Default)]
struct Progress {
    run: RunPhase,
    tests: HashMap<Attempt, TestPhase>,
}

impl Progress {
    /// Every started attempt is terminal and at least `total` distinct tests
    /// have reached a terminal phase.
    fn all_terminal(&self, total: usize) -> bool {
        if self.tests.values().any(|p| !p.is_terminal()) {
            return false;
        }
        let done: HashSet<&str> = self.tests.keys().map(|k| k.test_id.as_str()).collect();
        done.len() >= total
    }
}

// =============================================================================
// Accumulators
// =============================================================================

/// Add `values` under `key`, skipping pairs already present.
pub fn merge_labels<S: AsRef<str>>(labels: &mut Vec<Label>, key: &str, values: &[S]) {
    for value in values {
        let value = value.as_ref();
        if !labels.iter().any(|l| l.key == key && l.value == value) {
            labels.push(Label::new(key, value));
        }
    }
}

/// Replace the value of an existing reference in place, or append.
pub fn upsert_reference(references: &mut Vec<ArtifactReference>, name: &str, value: &str) {
    match references.iter_mut().find(|r| r.name == name) {
        Some(existing) => existing.value = value.to_string(),
        None => references.push(ArtifactReference {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Replace the link for the same (tcmType, caseId), or append.
pub fn upsert_case_link(links: &mut Vec<TestCaseLink>, link: TestCaseLink) {
    match links
        .iter_mut()
        .find(|l| l.tcm_type == link.tcm_type && l.test_case_id == link.test_case_id)
    {
        Some(existing) => *existing = link,
        None => links.push(link),
    }
}

/// A custom log line recorded for a test before its remote id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLog {
    pub level: String,
    pub message: String,
    pub timestamp: i64,
}

/// Facts gathered for one test attempt, uploaded when it ends.
#[derive(Debug, Clone, Default)]
pub struct TestRecord {
    pub labels: Vec<Label>,
    pub artifact_references: Vec<ArtifactReference>,
    pub logs: Vec<RecordedLog>,
    pub artifacts: Vec<ArtifactPayload>,
    pub screenshots: Vec<ScreenshotPayload>,
    pub maintainer: Option<String>,
    pub case_links: Vec<TestCaseLink>,
    pub revert: bool,
}

impl TestRecord {
    /// Put labels derived at begin ahead of anything already recorded.
    pub fn seed_labels(&mut self, seed: Vec<Label>) {
        let later = std::mem::replace(&mut self.labels, seed);
        for label in later {
            merge_labels(&mut self.labels, &label.key, &[label.value.as_str()]);
        }
    }
}

/// Run-level facts flushed once at the end.
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub labels: Vec<Label>,
    pub artifact_references: Vec<ArtifactReference>,
    pub artifacts: Vec<ArtifactPayload>,
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub finished: usize,
    pub reverted: usize,
    pub abandoned: usize,
    pub failures: BTreeMap<Stage, usize>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failure_count(&self, stage: Stage) -> usize {
        self.failures.get(&stage).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tests: {} finished, {} reverted, {} abandoned",
            self.total, self.finished, self.reverted, self.abandoned
        )?;
        if self.failures.is_empty() {
            return write!(f, "; no failures");
        }
        let stages: Vec<String> = self
            .failures
            .iter()
            .map(|(stage, count)| format!("{}={}", stage, count))
            .collect();
        write!(f, "; failures: {}", stages.join(", "))
    }
}

// =============================================================================
// Run State
// =============================================================================

/// Owned by one reporter for one run.
pub struct RunState {
    progress: watch::Sender<Progress>,
    expected: AtomicUsize,
    records: DashMap<Attempt, TestRecord>,
    run_record: Mutex<RunRecord>,
    failures: Mutex<BTreeMap<Stage, usize>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            progress,
            expected: AtomicUsize::new(0),
            records: DashMap::new(),
            run_record: Mutex::new(RunRecord::default()),
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_expected(&self, total: usize) {
        self.expected.store(total, Ordering::SeqCst);
    }

    pub fn expected(&self) -> usize {
        self.expected.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Phase transitions
    // -------------------------------------------------------------------------

    pub fn run_phase(&self) -> RunPhase {
        self.progress.borrow().run
    }

    pub fn is_aborted(&self) -> bool {
        self.run_phase() == RunPhase::Aborted
    }

    pub fn run_started(&self, run: RunId) {
        self.progress.send_modify(|p| p.run = RunPhase::Running(run));
    }

    pub fn abort_run(&self) {
        self.progress.send_modify(|p| p.run = RunPhase::Aborted);
    }

    pub fn test_phase(&self, attempt: &Attempt) -> Option<TestPhase> {
        self.progress.borrow().tests.get(attempt).copied()
    }

    pub fn mark_started(&self, attempt: &Attempt, remote_id: TestId) {
        self.set_phase(attempt, TestPhase::Started { remote_id });
    }

    pub fn mark_finished(&self, attempt: &Attempt) {
        self.set_phase(attempt, TestPhase::Finished);
    }

    pub fn mark_reverted(&self, attempt: &Attempt) {
        self.set_phase(attempt, TestPhase::Reverted);
    }

    pub fn mark_abandoned(&self, attempt: &Attempt) {
        self.set_phase(attempt, TestPhase::Abandoned);
    }

    fn set_phase(&self, attempt: &Attempt, phase: TestPhase) {
        self.progress.send_modify(|p| {
            p.tests.insert(attempt.clone(), phase);
        });
        if phase.is_terminal() {
            self.records.remove(attempt);
        }
    }

    // -------------------------------------------------------------------------
    // Waits
    // -------------------------------------------------------------------------

    /// Resolve once the remote run exists.
    pub async fn wait_run(&self) -> AgentResult<RunId> {
        let mut rx = self.progress.subscribe();
        let progress = rx
            .wait_for(|p| p.run != RunPhase::Pending)
            .await
            .map_err(|_| AgentError::RunAborted)?;
        match progress.run {
            RunPhase::Running(run) => Ok(run),
            _ => Err(AgentError::RunAborted),
        }
    }

    /// Resolve once begin for `attempt` has landed.
    ///
    /// Returns the remote id, or `None` when the attempt was abandoned or has
    /// already ended.
    pub async fn wait_started(&self, attempt: &Attempt) -> AgentResult<Option<TestId>> {
        let mut rx = self.progress.subscribe();
        let progress = rx
            .wait_for(|p| p.run == RunPhase::Aborted || p.tests.contains_key(attempt))
            .await
            .map_err(|_| AgentError::RunAborted)?;
        if progress.run == RunPhase::Aborted {
            return Err(AgentError::RunAborted);
        }
        Ok(match progress.tests.get(attempt) {
            Some(TestPhase::Started { remote_id }) => Some(*remote_id),
            _ => None,
        })
    }

    /// Resolve once every expected test has reached a terminal phase.
    pub async fn wait_all_terminal(&self) -> AgentResult<()> {
        let total = self.expected();
        let mut rx = self.progress.subscribe();
        let progress = rx
            .wait_for(|p| p.run == RunPhase::Aborted || p.all_terminal(total))
            .await
            .map_err(|_| AgentError::RunAborted)?;
        if progress.run == RunPhase::Aborted {
            return Err(AgentError::RunAborted);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    /// Mutate the record for `attempt`, creating it on first use.
    ///
    /// Returns `None` without recording anything once the attempt is
    /// terminal: its facts have already been uploaded or discarded.
    pub fn with_record<R>(
        &self,
        attempt: &Attempt,
        f: impl FnOnce(&mut TestRecord) -> R,
    ) -> Option<R> {
        let mut record = self.records.entry(attempt.clone()).or_default();
        if self.test_phase(attempt).is_some_and(|p| p.is_terminal()) {
            drop(record);
            self.records.remove(attempt);
            return None;
        }
        Some(f(record.value_mut()))
    }

    /// Detach the record for upload.
    pub fn take_record(&self, attempt: &Attempt) -> TestRecord {
        self.records
            .remove(attempt)
            .map(|(_, record)| record)
            .unwrap_or_default()
    }

    pub fn with_run_record<R>(&self, f: impl FnOnce(&mut RunRecord) -> R) -> R {
        let mut record = self.run_record.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut record)
    }

    pub fn take_run_record(&self) -> RunRecord {
        std::mem::take(&mut *self.run_record.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------

    /// Log a failed stage and count it.
    pub fn record_failure(&self, stage: Stage, subject: &str, error: &dyn fmt::Display) {
        warn!(stage = %stage, subject, error = %error, "reporting step failed");
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        *failures.entry(stage).or_insert(0) += 1;
    }

    pub fn summary(&self) -> RunSummary {
        let progress = self.progress.borrow();
        let mut summary = RunSummary {
            total: self.expected(),
            failures: self
                .failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            ..RunSummary::default()
        };
        for phase in progress.tests.values() {
            match phase {
                TestPhase::Finished => summary.finished += 1,
                TestPhase::Reverted => summary.reverted += 1,
                TestPhase::Abandoned => summary.abandoned += 1,
                TestPhase::Started { .. } => {}
            }
        }
        summary
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn attempt(id: &str) -> Attempt {
        Attempt::new(id, 0)
    }

    #[test]
    fn test_label_merge_is_union_in_first_seen_order() {
        let mut labels = Vec::new();
        merge_labels(&mut labels, "feature", &["login", "cart"]);
        merge_labels(&mut labels, "feature", &["cart", "search"]);
        let values: Vec<&str> = labels.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, vec!["login", "cart", "search"]);
    }

    #[test]
    fn test_same_value_under_different_keys_kept() {
        let mut labels = Vec::new();
        merge_labels(&mut labels, "a", &["x"]);
        merge_labels(&mut labels, "b", &["x"]);
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_reference_last_write_wins_in_place() {
        let mut refs = Vec::new();
        upsert_reference(&mut refs, "docs", "v1");
        upsert_reference(&mut refs, "ticket", "T-1");
        upsert_reference(&mut refs, "docs", "v2");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "docs");
        assert_eq!(refs[0].value, "v2");
        assert_eq!(refs[1].name, "ticket");
    }

    #[test]
    fn test_case_link_last_write_wins_per_pair() {
        let link = |tcm: &str, id: &str, status: Option<&str>| TestCaseLink {
            tcm_type: tcm.to_string(),
            test_case_id: id.to_string(),
            result_status: status.map(str::to_string),
        };
        let mut links = Vec::new();
        upsert_case_link(&mut links, link("XRAY", "X-1", None));
        upsert_case_link(&mut links, link("TEST_RAIL", "X-1", None));
        upsert_case_link(&mut links, link("XRAY", "X-1", Some("BLOCKED")));
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].result_status.as_deref(), Some("BLOCKED"));
    }

    #[test]
    fn test_seed_labels_go_first() {
        let mut record = TestRecord::default();
        merge_labels(&mut record.labels, "feature", &["login"]);
        record.seed_labels(vec![Label::new("tag", "@smoke"), Label::new("feature", "login")]);
        let keys: Vec<&str> = record.labels.iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, vec!["tag", "feature"]);
    }

    #[test]
    fn test_take_record_detaches() {
        let state = RunState::new();
        state.with_record(&attempt("t1"), |r| r.revert = true);
        assert!(state.take_record(&attempt("t1")).revert);
        assert!(!state.take_record(&attempt("t1")).revert);
    }

    #[test]
    fn test_late_events_after_end_are_not_kept() {
        let state = RunState::new();
        let a = attempt("t1");
        state.mark_started(&a, 7);
        assert_eq!(state.with_record(&a, |r| r.labels.len()), Some(0));
        state.take_record(&a);

        // Chunk landing between upload and the terminal transition.
        state.with_record(&a, |r| r.revert = true);
        state.mark_finished(&a);
        assert!(state.records.is_empty());

        assert_eq!(state.with_record(&a, |r| r.revert = true), None);
        assert!(state.records.is_empty());
        assert_eq!(state.test_phase(&a), Some(TestPhase::Finished));
    }

    #[tokio::test]
    async fn test_wait_started_resolves_after_transition() {
        let state = Arc::new(RunState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_started(&attempt("t1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        state.mark_started(&attempt("t1"), 42);
        assert_eq!(waiter.await.unwrap().unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_wait_started_on_abandoned_is_none() {
        let state = RunState::new();
        state.mark_abandoned(&attempt("t1"));
        assert_eq!(state.wait_started(&attempt("t1")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_abort_releases_waiters() {
        let state = Arc::new(RunState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_run().await })
        };
        state.abort_run();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(AgentError::RunAborted)
        ));
    }

    #[tokio::test]
    async fn test_all_terminal_gating() {
        let state = Arc::new(RunState::new());
        state.set_expected(2);
        state.mark_started(&attempt("a"), 1);
        state.mark_started(&attempt("b"), 2);

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_all_terminal().await })
        };

        state.mark_finished(&attempt("a"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        state.mark_reverted(&attempt("b"));
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_retry_in_flight_blocks_completion() {
        let state = RunState::new();
        state.set_expected(1);
        state.mark_finished(&attempt("a"));
        state.mark_started(&Attempt::new("a", 1), 5);
        assert!(!state.progress.borrow().all_terminal(1));
        state.mark_finished(&Attempt::new("a", 1));
        assert!(state.progress.borrow().all_terminal(1));
    }

    #[test]
    fn test_summary_counts_and_display() {
        let state = RunState::new();
        state.set_expected(3);
        state.mark_finished(&attempt("a"));
        state.mark_reverted(&attempt("b"));
        state.mark_abandoned(&attempt("c"));
        state.record_failure(Stage::UploadScreenshots, "a", &"boom");
        state.record_failure(Stage::UploadScreenshots, "a", &"boom");

        let summary = state.summary();
        assert_eq!(summary.finished, 1);
        assert_eq!(summary.reverted, 1);
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.failure_count(Stage::UploadScreenshots), 2);
        assert_eq!(
            summary.to_string(),
            "3 tests: 1 finished, 1 reverted, 1 abandoned; failures: upload-screenshots=2"
        );
    }
}
