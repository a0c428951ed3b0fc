//! Runner Bridge
//!
//! Drives a [`Reporter`] from newline-delimited [`RunnerEvent`] JSON, so a
//! runner that can print its callbacks is reportable without linking this
//! crate. Test begin/end handlers run as concurrent tasks; stdout chunks are
//! applied inline so they land before the end of the test that printed them.

use crate::error::AgentResult;
use crate::reporter::Reporter;
use crate::runner::{Attempt, RunnerEvent};
use crate::state::RunSummary;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Consume events until `end` (or end of input).
///
/// Returns the run summary when an `end` event was seen. Errors are fatal
/// reporter failures; malformed lines are skipped.
pub async fn drive<R>(reporter: Arc<dyn Reporter>, input: R) -> AgentResult<Option<RunSummary>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut tasks = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: RunnerEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping malformed runner event");
                continue;
            }
        };

        match event {
            RunnerEvent::Begin { config, mut suite } => {
                reporter.on_begin(&config, &mut suite).await?;
            }
            RunnerEvent::TestBegin { test, result } => {
                let reporter = reporter.clone();
                tasks.spawn(async move { reporter.on_test_begin(&test, &result).await });
            }
            RunnerEvent::StdOut {
                test_id,
                retry,
                chunk,
            } => {
                let attempt = test_id.map(|id| Attempt::new(id, retry));
                reporter.on_std_out(&chunk, attempt.as_ref());
            }
            RunnerEvent::TestEnd { test, result } => {
                let reporter = reporter.clone();
                tasks.spawn(async move { reporter.on_test_end(&test, &result).await });
            }
            RunnerEvent::End => {
                join_all(&mut tasks).await;
                return reporter.on_end().await.map(Some);
            }
        }
    }

    debug!("runner stream closed without an end event");
    join_all(&mut tasks).await;
    Ok(None)
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "runner callback task failed");
        }
    }
}
