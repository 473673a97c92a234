//! End-to-end billing scenarios against the bundled billing contract and the
//! in-memory billing ports.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use covenant_eval::port::inmem::{BillingPorts, Invoice};
use covenant_eval::types::AppliedTransition;
use covenant_eval::{
    load_contract, Contract, ContractStore, Engine, ExecutionContext, Input, Outcome, Port,
    PortError, PortRegistry, Request, VerdictType,
};
use covenant_storage::{AuditSink, InMemoryAuditLog};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn billing_contract() -> Contract {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("contracts")
        .join("billing.json");
    let json = std::fs::read_to_string(&path).unwrap();
    load_contract(&json).unwrap()
}

struct Harness {
    engine: Engine,
    ports: BillingPorts,
    log: Arc<InMemoryAuditLog>,
}

fn harness() -> Harness {
    let ports = BillingPorts::seeded();
    harness_with(ports.clone(), ports.registry())
}

fn harness_with(ports: BillingPorts, registry: PortRegistry) -> Harness {
    let log = Arc::new(InMemoryAuditLog::new());
    let store = Arc::new(ContractStore::with_contract(billing_contract(), "billing-v1"));
    Harness {
        engine: Engine::new(store, registry, log.clone()),
        ports,
        log,
    }
}

fn payment(customer: &str, invoice: &str, amount: i64) -> Request {
    Request::new("ProcessPayment")
        .with_input("customer.id", json!(customer))
        .with_input("invoice.id", json!(invoice))
        .with_input("payment.amount", json!({"value": amount, "currency": "USD"}))
}

fn ctx() -> ExecutionContext {
    ExecutionContext::new()
        .with_identity("clerk-7")
        .with_persona("billing-clerk")
}

#[tokio::test]
async fn payment_within_balance_executes() {
    let h = harness();
    let resp = h.engine.evaluate(payment("cust_123", "inv_001", 500), &ctx()).await;

    assert_eq!(resp.outcome, Outcome::Executed, "{:?}", resp.error);
    let output = resp.output.unwrap();
    assert_eq!(output["status"], json!("completed"));
    assert_eq!(output["new_balance"], json!(1000));
    assert_eq!(
        resp.transitions,
        vec![AppliedTransition {
            entity: "Invoice".into(),
            from: Some("approved".into()),
            to: "paid".into(),
        }]
    );
    assert!(resp.verdicts.is_empty());

    let invoice = h.ports.invoices.invoice("inv_001").await.unwrap();
    assert_eq!(invoice.status, "paid");
    assert_eq!(invoice.balance, Decimal::from(1000));

    let record = h.log.find(&resp.invocation_id).await.unwrap();
    assert_eq!(record.outcome, "executed");
    assert_eq!(record.identity.as_deref(), Some("clerk-7"));
    assert_eq!(record.persona.as_deref(), Some("billing-clerk"));
    assert_eq!(record.contract_version.as_deref(), Some("billing-v1"));
    assert_eq!(record.fact_snapshot["customer.status"], json!("active"));
    assert_eq!(record.transitions.len(), 1);
    assert!(record.error_code.is_none());
}

#[tokio::test]
async fn payment_over_balance_is_denied() {
    let h = harness();
    let resp = h.engine.evaluate(payment("cust_123", "inv_001", 5000), &ctx()).await;

    assert_eq!(resp.outcome, Outcome::Denied);
    let error = resp.error.clone().unwrap();
    assert_eq!(error.code, "INSUFFICIENT_FUNDS");
    assert_eq!(error.http_status, 422);
    assert_eq!(resp.http_status(), 422);
    assert!(resp.transitions.is_empty());

    let invoice = h.ports.invoices.invoice("inv_001").await.unwrap();
    assert_eq!(invoice.status, "approved");
    assert_eq!(invoice.balance, Decimal::from(1500));

    let record = h.log.find(&resp.invocation_id).await.unwrap();
    assert_eq!(record.error_class.as_deref(), Some("business_denial"));
    assert_eq!(record.matched_rules, vec!["insufficient-funds"]);
}

#[tokio::test]
async fn closed_account_is_denied() {
    let h = harness();
    let resp = h.engine.evaluate(payment("cust_456", "inv_003", 100), &ctx()).await;
    assert_eq!(resp.outcome, Outcome::Denied);
    assert_eq!(resp.error.unwrap().code, "ACCOUNT_CLOSED");
}

#[tokio::test]
async fn large_payment_dry_run_reports_deny_and_flag() {
    let h = harness();
    let resp = h
        .engine
        .evaluate(payment("cust_123", "inv_001", 15000).dry_run(), &ctx())
        .await;

    assert_eq!(resp.outcome, Outcome::WouldDeny);
    assert!(resp.dry_run);
    assert_eq!(resp.error.as_ref().unwrap().code, "INSUFFICIENT_FUNDS");
    assert_eq!(resp.matched_rules, vec!["insufficient-funds", "large-payment"]);
    assert_eq!(resp.verdicts[0].verdict_type, VerdictType::Deny);
    assert_eq!(resp.verdicts[1].code.as_deref(), Some("LARGE_PAYMENT"));

    let snapshot = resp.fact_snapshot.unwrap();
    assert_eq!(snapshot["payment.is_large"], json!(true));
    assert_eq!(snapshot["payment.exceeds_balance"], json!(true));
    assert_eq!(snapshot["invoice.balance"], json!({"value": 1500, "currency": "USD"}));

    let invoice = h.ports.invoices.invoice("inv_001").await.unwrap();
    assert_eq!(invoice.status, "approved");
    assert_eq!(invoice.balance, Decimal::from(1500));

    let record = h.log.find(&resp.invocation_id).await.unwrap();
    assert!(record.dry_run);
    assert_eq!(record.outcome, "would_deny");
}

#[tokio::test]
async fn large_payment_with_enough_balance_would_execute_with_flags() {
    let h = harness();
    h.ports
        .invoices
        .insert(Invoice {
            id: "inv_900".into(),
            customer_id: "cust_123".into(),
            status: "approved".into(),
            balance: Decimal::from(50000),
            currency: "USD".into(),
        })
        .await;

    let resp = h
        .engine
        .evaluate(payment("cust_123", "inv_900", 15000).dry_run(), &ctx())
        .await;
    assert_eq!(resp.outcome, Outcome::WouldExecuteWithFlags);
    assert_eq!(resp.matched_rules, vec!["large-payment"]);
    assert_eq!(resp.transitions.len(), 1);
    assert!(resp.output.is_none());

    let invoice = h.ports.invoices.invoice("inv_900").await.unwrap();
    assert_eq!(invoice.balance, Decimal::from(50000));
    assert_eq!(invoice.status, "approved");

    let live = h.engine.evaluate(payment("cust_123", "inv_900", 15000), &ctx()).await;
    assert_eq!(live.outcome, Outcome::Executed);
    assert_eq!(live.verdicts.len(), 1);
    assert_eq!(live.verdicts[0].verdict_type, VerdictType::Flag);
}

#[tokio::test]
async fn processor_down_denies_without_transition() {
    let h = harness();
    h.ports.processor.set_status("down").await;
    let resp = h.engine.evaluate(payment("cust_123", "inv_001", 500), &ctx()).await;

    assert_eq!(resp.outcome, Outcome::Denied);
    let error = resp.error.unwrap();
    assert_eq!(error.code, "PROCESSOR_UNAVAILABLE");
    assert!(error.retryable);
    assert!(resp.transitions.is_empty());
    assert_eq!(
        h.ports.invoices.invoice("inv_001").await.unwrap().status,
        "approved"
    );
}

#[tokio::test]
async fn suspended_account_escalates() {
    let h = harness();
    h.ports
        .invoices
        .insert(Invoice {
            id: "inv_789".into(),
            customer_id: "cust_789".into(),
            status: "approved".into(),
            balance: Decimal::from(800),
            currency: "USD".into(),
        })
        .await;
    let resp = h.engine.evaluate(payment("cust_789", "inv_789", 100), &ctx()).await;
    assert_eq!(resp.outcome, Outcome::Escalated);
    assert_eq!(resp.output, Some(json!({"queues": ["account-review"]})));
    assert_eq!(resp.verdicts[0].queue.as_deref(), Some("account-review"));
}

#[tokio::test]
async fn foreign_currency_requires_confirmation() {
    let h = harness();
    let req = Request::new("ProcessPayment")
        .with_input("customer.id", json!("cust_123"))
        .with_input("invoice.id", json!("inv_001"))
        .with_input("payment.amount", json!({"value": 100, "currency": "EUR"}));
    let resp = h.engine.evaluate(req, &ctx()).await;
    assert_eq!(resp.outcome, Outcome::Required);
    assert_eq!(
        resp.output,
        Some(json!({"conditions": ["fx_rate_confirmation"]}))
    );
}

#[tokio::test]
async fn draft_invoice_is_rejected_by_state_check() {
    let h = harness();
    let resp = h.engine.evaluate(payment("cust_123", "inv_002", 100), &ctx()).await;
    assert_eq!(resp.outcome, Outcome::Rejected);
    let error = resp.error.unwrap();
    assert_eq!(error.code, "INVALID_ENTITY_STATE");
    assert_eq!(error.http_status, 409);
}

#[tokio::test]
async fn missing_input_is_rejected() {
    let h = harness();
    let req = Request::new("ProcessPayment").with_input("invoice.id", json!("inv_001"));
    let resp = h.engine.evaluate(req, &ctx()).await;
    assert_eq!(resp.outcome, Outcome::Rejected);
    assert_eq!(resp.error.unwrap().code, "INVALID_REQUEST");
}

#[tokio::test]
async fn get_invoice_needs_no_facts() {
    let h = harness();
    let req = Request::new("GetInvoice").with_input("invoice.id", json!("inv_002"));
    let resp = h.engine.evaluate(req, &ctx()).await;
    assert_eq!(resp.outcome, Outcome::Executed);
    assert_eq!(resp.output.unwrap()["status"], json!("draft"));

    let record = h.log.find(&resp.invocation_id).await.unwrap();
    assert_eq!(record.fact_snapshot, json!({}));
}

// ──────────────────────────────────────────────
// Counting wrapper
// ──────────────────────────────────────────────

/// Delegates to an inner port, counting every call.
struct Counting {
    inner: Arc<dyn Port>,
    gets: AtomicUsize,
    executes: AtomicUsize,
}

impl Counting {
    fn wrap(inner: Arc<dyn Port>) -> Arc<Self> {
        Arc::new(Counting {
            inner,
            gets: AtomicUsize::new(0),
            executes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Port for Counting {
    async fn get(&self, fact: &str, input: &Input) -> Result<Value, PortError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(fact, input).await
    }

    async fn execute(&self, operation: &str, input: &Input) -> Result<Value, PortError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(operation, input).await
    }

    async fn transition(
        &self,
        operation: &str,
        transition: &AppliedTransition,
        input: &Input,
    ) -> Result<(), PortError> {
        self.inner.transition(operation, transition, input).await
    }
}

fn counted_harness() -> (Harness, Arc<Counting>, Arc<Counting>) {
    let ports = BillingPorts::seeded();
    let customers = Counting::wrap(ports.customers.clone());
    let invoices = Counting::wrap(ports.invoices.clone());
    let registry = PortRegistry::new()
        .with("customerRepo", customers.clone())
        .with("invoiceRepo", invoices.clone())
        .with("paymentProcessor", ports.processor.clone());
    (harness_with(ports, registry), customers, invoices)
}

#[tokio::test]
async fn version_mismatch_is_rejected_before_any_port_call() {
    let (h, customers, invoices) = counted_harness();
    let resp = h
        .engine
        .evaluate(
            payment("cust_123", "inv_001", 500).expecting_version("billing-v0"),
            &ctx(),
        )
        .await;

    assert_eq!(resp.outcome, Outcome::SystemError);
    let error = resp.error.unwrap();
    assert_eq!(error.code, "CONTRACT_VERSION_MISMATCH");
    assert_eq!(error.http_status, 409);
    assert!(error.retryable);
    assert_eq!(customers.gets.load(Ordering::SeqCst), 0);
    assert_eq!(invoices.gets.load(Ordering::SeqCst), 0);
    assert_eq!(h.log.len().await, 1);

    let dry = h
        .engine
        .evaluate(
            payment("cust_123", "inv_001", 500)
                .dry_run()
                .expecting_version("billing-v0"),
            &ctx(),
        )
        .await;
    assert!(dry.dry_run);
    assert_eq!(dry.outcome, Outcome::SystemError);
    let error = dry.error.unwrap();
    assert_eq!(error.code, "CONTRACT_VERSION_MISMATCH");
    assert_eq!(error.http_status, 409);
    assert!(dry.fact_snapshot.is_none());
    assert_eq!(customers.gets.load(Ordering::SeqCst), 0);
    assert_eq!(invoices.gets.load(Ordering::SeqCst), 0);
    assert_eq!(h.log.len().await, 2);
    let record = h.log.find(&dry.invocation_id).await.unwrap();
    assert!(record.dry_run);
    assert_eq!(record.error_code.as_deref(), Some("CONTRACT_VERSION_MISMATCH"));

    let matching = h
        .engine
        .evaluate(
            payment("cust_123", "inv_001", 500).expecting_version("billing-v1"),
            &ctx(),
        )
        .await;
    assert_eq!(matching.outcome, Outcome::Executed);
}

#[tokio::test]
async fn dry_runs_never_execute() {
    let (h, _, invoices) = counted_harness();
    let requests = [
        payment("cust_123", "inv_001", 500),
        payment("cust_123", "inv_001", 5000),
        payment("cust_456", "inv_003", 100),
        payment("cust_123", "inv_002", 100),
        payment("cust_123", "inv_001", 15000),
    ];
    for req in requests {
        let resp = h.engine.evaluate(req.dry_run(), &ctx()).await;
        assert!(resp.dry_run);
        assert_ne!(resp.outcome, Outcome::Executed);
    }
    assert_eq!(invoices.executes.load(Ordering::SeqCst), 0);
    assert_eq!(h.log.len().await, 5);
}

#[tokio::test]
async fn missing_processor_fact_is_a_policy_denial() {
    let ports = BillingPorts::seeded();
    let registry = PortRegistry::new()
        .with("customerRepo", ports.customers.clone())
        .with("invoiceRepo", ports.invoices.clone());
    let h = harness_with(ports, registry);

    let resp = h.engine.evaluate(payment("cust_123", "inv_001", 500), &ctx()).await;
    assert_eq!(resp.outcome, Outcome::Denied);
    assert_eq!(resp.error.unwrap().code, "FACT_UNAVAILABLE");
    let record = h.log.find(&resp.invocation_id).await.unwrap();
    assert_eq!(record.error_class.as_deref(), Some("fact_unavailable"));

    let dry = h
        .engine
        .evaluate(payment("cust_123", "inv_001", 500).dry_run(), &ctx())
        .await;
    assert_eq!(dry.outcome, Outcome::WouldDeny);
}

#[tokio::test]
async fn concurrent_invocations_each_get_one_audit_record() {
    let h = harness();
    let engine = h.engine.clone();
    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .evaluate(payment("cust_123", "inv_001", 500).dry_run(), &ctx())
                .await
        }));
    }
    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let resp = handle.await.unwrap();
        assert_eq!(resp.outcome, Outcome::WouldExecute);
        ids.insert(resp.invocation_id);
    }
    assert_eq!(ids.len(), 20);
    assert_eq!(h.log.records().await.unwrap().len(), 20);
}

#[tokio::test]
async fn reload_changes_version_for_new_invocations() {
    let h = harness();
    let first = h.engine.evaluate(payment("cust_123", "inv_001", 100).dry_run(), &ctx()).await;
    assert_eq!(first.contract_version.as_deref(), Some("billing-v1"));

    h.engine.store().load(billing_contract(), "billing-v2");
    let stale = h
        .engine
        .evaluate(
            payment("cust_123", "inv_001", 100).expecting_version("billing-v1"),
            &ctx(),
        )
        .await;
    assert_eq!(stale.error.unwrap().code, "CONTRACT_VERSION_MISMATCH");
    assert_eq!(stale.contract_version.as_deref(), Some("billing-v2"));
}
