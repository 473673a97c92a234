//! Conformance test suite for `AuditSink` implementations.
//!
//! Any sink must keep appended records verbatim and in order, refuse a
//! second record for the same invocation id, and stay correct under
//! concurrent appends. Sink crates run the checks with a factory producing
//! a fresh, empty sink:
//!
//! ```ignore
//! use covenant_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|| async { InMemoryAuditLog::new() }).await;
//!     assert_eq!(report.failed(), 0, "{report}");
//! }
//! ```

mod append;
mod concurrent;

use std::fmt;
use std::future::Future;

use crate::record::{AuditRecord, TransitionRecord};
use crate::AuditSink;

/// One named check and why it failed, if it did.
#[derive(Debug, Clone)]
pub struct Check {
    pub group: &'static str,
    pub name: &'static str,
    pub failure: Option<String>,
}

impl Check {
    fn new(group: &'static str, name: &'static str, result: Result<(), String>) -> Self {
        Check {
            group,
            name,
            failure: result.err(),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Every check run against one sink.
#[derive(Debug, Clone, Default)]
pub struct ConformanceReport {
    pub checks: Vec<Check>,
}

impl ConformanceReport {
    pub fn total(&self) -> usize {
        self.checks.len()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed())
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed();
        writeln!(f, "audit sink conformance: {} of {} checks failed", failed, self.total())?;
        for check in self.failures() {
            let reason = check.failure.as_deref().unwrap_or_default();
            writeln!(f, "  {}::{} -> {}", check.group, check.name, reason)?;
        }
        Ok(())
    }
}

/// Run every check against sinks produced by `factory`, one fresh sink per
/// check.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: AuditSink,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut checks = append::checks(&factory).await;
    checks.extend(concurrent::checks(&factory).await);
    ConformanceReport { checks }
}

fn make_record(invocation_id: &str, outcome: &str) -> AuditRecord {
    AuditRecord {
        invocation_id: invocation_id.to_string(),
        timestamp: "2025-01-01T00:00:00Z".to_string(),
        identity: Some("user_1".to_string()),
        persona: Some("customer".to_string()),
        operation: "ProcessPayment".to_string(),
        dry_run: false,
        input_payload: serde_json::json!({"invoice.id": "inv_001"}),
        contract_version: Some("etag-1".to_string()),
        fact_snapshot: serde_json::json!({"customer.status": "active"}),
        absent_facts: vec![],
        verdicts: serde_json::json!([]),
        matched_rules: vec![],
        transitions: vec![TransitionRecord {
            entity: "Invoice".to_string(),
            from: Some("approved".to_string()),
            to: "paid".to_string(),
        }],
        output: Some(serde_json::json!({"payment_id": "pay_1"})),
        outcome: outcome.to_string(),
        error_code: None,
        error_class: None,
        duration_ms: 3,
    }
}
