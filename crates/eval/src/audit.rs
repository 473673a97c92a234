//! Audit record production.

use std::sync::Arc;

use covenant_storage::{AuditRecord, AuditSink, TransitionRecord};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::error;

use crate::types::{AppliedTransition, FactSet, Outcome, Request, Verdict};

/// Everything known about an invocation once its outcome is decided.
#[derive(Debug)]
pub struct AuditEntry<'a> {
    pub invocation_id: &'a str,
    pub identity: Option<&'a str>,
    pub persona: Option<&'a str>,
    pub request: &'a Request,
    pub contract_version: Option<&'a str>,
    pub facts: Option<&'a FactSet>,
    pub verdicts: &'a [Verdict],
    pub matched_rules: &'a [String],
    pub transitions: &'a [AppliedTransition],
    pub output: Option<&'a Value>,
    pub outcome: Outcome,
    pub error_code: Option<&'a str>,
    pub error_class: Option<&'a str>,
    pub duration_ms: u64,
}

/// Emits exactly one record per invocation to an [`AuditSink`].
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        AuditRecorder { sink }
    }

    pub fn build(entry: &AuditEntry<'_>) -> AuditRecord {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.to_string());
        AuditRecord {
            invocation_id: entry.invocation_id.to_string(),
            timestamp,
            identity: entry.identity.map(String::from),
            persona: entry.persona.map(String::from),
            operation: entry.request.operation.clone(),
            dry_run: entry.request.dry_run,
            input_payload: Value::Object(entry.request.input.clone()),
            contract_version: entry.contract_version.map(String::from),
            fact_snapshot: entry
                .facts
                .map(FactSet::snapshot)
                .unwrap_or_else(|| Value::Object(Default::default())),
            absent_facts: entry
                .facts
                .map(|f| f.absent_facts().map(String::from).collect())
                .unwrap_or_default(),
            verdicts: serde_json::to_value(entry.verdicts).unwrap_or(Value::Null),
            matched_rules: entry.matched_rules.to_vec(),
            transitions: entry
                .transitions
                .iter()
                .map(|t| TransitionRecord {
                    entity: t.entity.clone(),
                    from: t.from.clone(),
                    to: t.to.clone(),
                })
                .collect(),
            output: entry.output.cloned(),
            outcome: entry.outcome.as_str().to_string(),
            error_code: entry.error_code.map(String::from),
            error_class: entry.error_class.map(String::from),
            duration_ms: entry.duration_ms,
        }
    }

    /// Build and append the record. A sink failure is logged and swallowed;
    /// the invocation's outcome is already decided.
    pub async fn record(&self, entry: AuditEntry<'_>) {
        let record = Self::build(&entry);
        if let Err(e) = self.sink.append(record).await {
            error!(
                invocation_id = %entry.invocation_id,
                operation = %entry.request.operation,
                outcome = %entry.outcome,
                error = %e,
                "failed to write audit record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_storage::{InMemoryAuditLog, StorageError};
    use serde_json::json;

    fn entry<'a>(request: &'a Request, facts: &'a FactSet) -> AuditEntry<'a> {
        AuditEntry {
            invocation_id: "inv-1",
            identity: Some("user-1"),
            persona: Some("clerk"),
            request,
            contract_version: Some("v1"),
            facts: Some(facts),
            verdicts: &[],
            matched_rules: &[],
            transitions: &[],
            output: None,
            outcome: Outcome::WouldExecute,
            error_code: None,
            error_class: None,
            duration_ms: 3,
        }
    }

    #[tokio::test]
    async fn record_carries_invocation_details() {
        let log = Arc::new(InMemoryAuditLog::new());
        let recorder = AuditRecorder::new(log.clone());
        let request = Request::new("GetInvoice")
            .with_input("invoice.id", json!("inv_001"))
            .dry_run();
        let mut facts = FactSet::new();
        facts.insert("invoice.status", json!("approved"));
        facts.mark_absent("payment.processor.status");

        recorder.record(entry(&request, &facts)).await;

        let record = log.find("inv-1").await.unwrap();
        assert_eq!(record.operation, "GetInvoice");
        assert!(record.dry_run);
        assert_eq!(record.identity.as_deref(), Some("user-1"));
        assert_eq!(record.input_payload, json!({"invoice.id": "inv_001"}));
        assert_eq!(record.fact_snapshot, json!({"invoice.status": "approved"}));
        assert_eq!(record.absent_facts, vec!["payment.processor.status"]);
        assert_eq!(record.outcome, "would_execute");
        assert!(OffsetDateTime::parse(&record.timestamp, &Rfc3339).is_ok());
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        struct Broken;

        #[async_trait::async_trait]
        impl AuditSink for Broken {
            async fn append(&self, _record: AuditRecord) -> Result<(), StorageError> {
                Err(StorageError::Backend("disk full".into()))
            }

            async fn records(&self) -> Result<Vec<AuditRecord>, StorageError> {
                Ok(vec![])
            }
        }

        let recorder = AuditRecorder::new(Arc::new(Broken));
        let request = Request::new("GetInvoice");
        recorder.record(entry(&request, &FactSet::new())).await;
    }
}
