use std::future::Future;

use super::{make_record, Check};
use crate::{AuditSink, StorageError};

pub(super) async fn checks<S, F, Fut>(factory: &F) -> Vec<Check>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        Check::new(
            "append",
            "empty_sink_has_no_records",
            empty_sink_has_no_records(factory).await,
        ),
        Check::new(
            "append",
            "appended_record_is_visible_unmodified",
            appended_record_is_visible_unmodified(factory).await,
        ),
        Check::new(
            "append",
            "records_returned_in_append_order",
            records_returned_in_append_order(factory).await,
        ),
        Check::new(
            "append",
            "duplicate_invocation_rejected",
            duplicate_invocation_rejected(factory).await,
        ),
    ]
}

async fn empty_sink_has_no_records<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let sink = factory().await;
    let records = sink.records().await.map_err(|e| format!("records: {e}"))?;
    if !records.is_empty() {
        return Err(format!("expected no records, got {}", records.len()));
    }
    Ok(())
}

async fn appended_record_is_visible_unmodified<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let sink = factory().await;
    let record = make_record("inv-1", "executed");
    sink.append(record.clone())
        .await
        .map_err(|e| format!("append: {e}"))?;

    let records = sink.records().await.map_err(|e| format!("records: {e}"))?;
    match records.as_slice() {
        [stored] if *stored == record => Ok(()),
        [stored] => Err(format!("stored record differs: {stored:?}")),
        other => Err(format!("expected 1 record, got {}", other.len())),
    }
}

async fn records_returned_in_append_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let sink = factory().await;
    for (id, outcome) in [("a", "executed"), ("b", "denied"), ("c", "would_execute")] {
        sink.append(make_record(id, outcome))
            .await
            .map_err(|e| format!("append {id}: {e}"))?;
    }

    let ids: Vec<String> = sink
        .records()
        .await
        .map_err(|e| format!("records: {e}"))?
        .into_iter()
        .map(|r| r.invocation_id)
        .collect();
    if ids != ["a", "b", "c"] {
        return Err(format!("expected [a, b, c], got {ids:?}"));
    }
    Ok(())
}

async fn duplicate_invocation_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let sink = factory().await;
    sink.append(make_record("dup", "executed"))
        .await
        .map_err(|e| format!("first append: {e}"))?;

    match sink.append(make_record("dup", "denied")).await {
        Err(StorageError::DuplicateInvocation { invocation_id }) if invocation_id == "dup" => {}
        Err(other) => return Err(format!("expected DuplicateInvocation, got {other}")),
        Ok(()) => return Err("second append for the same invocation succeeded".to_string()),
    }

    let records = sink.records().await.map_err(|e| format!("records: {e}"))?;
    if records.len() != 1 || records[0].outcome != "executed" {
        return Err(format!("first record must survive untouched: {records:?}"));
    }
    Ok(())
}
