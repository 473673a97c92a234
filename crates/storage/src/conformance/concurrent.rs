use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use super::{make_record, Check};
use crate::{AuditSink, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn checks<S, F, Fut>(factory: &F) -> Vec<Check>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        Check::new(
            "concurrent",
            "concurrent_appends_all_visible",
            concurrent_appends_all_visible(factory).await,
        ),
        Check::new(
            "concurrent",
            "concurrent_duplicates_exactly_one_wins",
            concurrent_duplicates_exactly_one_wins(factory).await,
        ),
    ]
}

/// N tasks append records for N distinct invocations. Every record must be
/// readable afterwards.
async fn concurrent_appends_all_visible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let sink = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = sink.clone();
        handles.push(tokio::spawn(async move {
            s.append(make_record(&format!("inv-{i}"), "executed")).await
        }));
    }
    for h in handles {
        h.await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| format!("append: {e}"))?;
    }

    let ids: HashSet<String> = sink
        .records()
        .await
        .map_err(|e| format!("records: {e}"))?
        .into_iter()
        .map(|r| r.invocation_id)
        .collect();
    if ids.len() != N {
        return Err(format!("expected {N} distinct records, got {}", ids.len()));
    }
    Ok(())
}

/// N tasks race to append a record for the same invocation. Exactly one
/// append succeeds; the rest get DuplicateInvocation.
async fn concurrent_duplicates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let sink = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = sink.clone();
        handles.push(tokio::spawn(async move {
            s.append(make_record("same", "executed")).await
        }));
    }

    let mut successes = 0;
    for h in handles {
        match h.await.map_err(|e| format!("join: {e}"))? {
            Ok(()) => successes += 1,
            Err(StorageError::DuplicateInvocation { .. }) => {}
            Err(other) => return Err(format!("unexpected error: {other}")),
        }
    }
    if successes != 1 {
        return Err(format!("expected exactly 1 successful append, got {successes}"));
    }

    let records = sink.records().await.map_err(|e| format!("records: {e}"))?;
    if records.len() != 1 {
        return Err(format!("expected 1 stored record, got {}", records.len()));
    }
    Ok(())
}
