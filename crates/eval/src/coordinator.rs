//! Execution coordinator.
//!
//! Runs one invocation through its strictly ordered steps:
//!
//! 1. **VersionCheck**: capture the active contract snapshot, reject a
//!    stale `expected_contract_version`, resolve the operation.
//! 2. **Gather**: collect base facts (see [`crate::gather`]).
//! 3. **Derive**: compute derived facts in dependency order.
//! 4. **ValidateState**: check entity states and transition edges.
//! 5. **EvaluateRules / ApplyVerdict**: match rules and act on the winner.
//! 6. **Execute**: call the operation's port, the only side effect.
//! 7. **Transition**: hand each declared transition to that port.
//! 8. **Complete**: build the response and emit one audit record.
//!
//! Steps 1 to 5 never touch the outside world except through `Port::get`.
//! Dry runs stop after step 5 and report the outcome they would have had.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use covenant_storage::AuditSink;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditRecorder};
use crate::context::ExecutionContext;
use crate::derive::derive;
use crate::error::{ConfigError, EngineError};
use crate::gather::gather;
use crate::port::PortRegistry;
use crate::rules::{evaluate_rules, resolve_verdicts};
use crate::state::validate_transitions;
use crate::store::{ContractSnapshot, ContractStore};
use crate::types::{
    AppliedTransition, ErrorEnvelope, FactSet, Outcome, Request, Response, Verdict, VerdictType,
};

/// Tunables for [`Engine`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Upper bound on a single `Port::get`. A timed-out fetch is handled by
    /// the fact's `on_missing` policy.
    pub port_timeout: Option<Duration>,
}

/// The contract-interpretation engine.
///
/// Cheap to clone and safe to share across tasks; holds no per-invocation
/// state.
#[derive(Clone)]
pub struct Engine {
    store: Arc<ContractStore>,
    ports: Arc<PortRegistry>,
    recorder: AuditRecorder,
    options: EngineOptions,
}

/// What an invocation observed on its way to an outcome.
#[derive(Default)]
struct Trace {
    facts: Option<FactSet>,
    matched_rules: Vec<String>,
    verdicts: Vec<Verdict>,
    transitions: Vec<AppliedTransition>,
    /// Side-effect result, set as soon as the executing port returns.
    output: Option<Value>,
}

/// A non-error terminal state.
struct Decision {
    outcome: Outcome,
    output: Option<Value>,
    error: Option<ErrorEnvelope>,
    error_class: Option<&'static str>,
}

impl Decision {
    fn new(outcome: Outcome) -> Self {
        Decision {
            outcome,
            output: None,
            error: None,
            error_class: None,
        }
    }
}

fn live_or_dry(dry_run: bool, live: Outcome, dry: Outcome) -> Outcome {
    if dry_run {
        dry
    } else {
        live
    }
}

impl Engine {
    pub fn new(store: Arc<ContractStore>, ports: PortRegistry, audit: Arc<dyn AuditSink>) -> Self {
        Engine {
            store,
            ports: Arc::new(ports),
            recorder: AuditRecorder::new(audit),
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<ContractStore> {
        &self.store
    }

    pub fn ports(&self) -> &PortRegistry {
        &self.ports
    }

    /// Evaluate one request. Every failure is encoded in the response; the
    /// audit record is emitted before this returns.
    pub async fn evaluate(&self, request: Request, ctx: &ExecutionContext) -> Response {
        let started = Instant::now();
        let invocation_id = Uuid::new_v4().to_string();
        let snapshot = self.store.current();
        let contract_version = snapshot.as_ref().map(|s| s.version.to_string());

        let mut trace = Trace::default();
        let result = self
            .run(&request, ctx, snapshot.as_deref(), &mut trace)
            .await;

        let decision = match result {
            Ok(decision) => decision,
            Err(err) => {
                let mut outcome = err.outcome();
                if request.dry_run && outcome == Outcome::Denied {
                    outcome = Outcome::WouldDeny;
                }
                warn!(
                    %invocation_id,
                    operation = %request.operation,
                    code = err.code(),
                    error = %err,
                    "invocation failed"
                );
                Decision {
                    outcome,
                    output: trace.output.take(),
                    error: Some(err.envelope()),
                    error_class: Some(err.class()),
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        self.recorder
            .record(AuditEntry {
                invocation_id: &invocation_id,
                identity: ctx.identity(),
                persona: ctx.persona(),
                request: &request,
                contract_version: contract_version.as_deref(),
                facts: trace.facts.as_ref(),
                verdicts: &trace.verdicts,
                matched_rules: &trace.matched_rules,
                transitions: &trace.transitions,
                output: decision.output.as_ref(),
                outcome: decision.outcome,
                error_code: decision.error.as_ref().map(|e| e.code.as_str()),
                error_class: decision.error_class,
                duration_ms,
            })
            .await;

        info!(
            %invocation_id,
            operation = %request.operation,
            outcome = %decision.outcome,
            dry_run = request.dry_run,
            contract_version = contract_version.as_deref().unwrap_or("-"),
            duration_ms,
            "invocation complete"
        );

        Response {
            outcome: decision.outcome,
            output: decision.output,
            error: decision.error,
            verdicts: trace.verdicts,
            fact_snapshot: if request.dry_run {
                trace.facts.as_ref().map(FactSet::snapshot)
            } else {
                None
            },
            matched_rules: trace.matched_rules,
            transitions: trace.transitions,
            contract_version,
            invocation_id,
            dry_run: request.dry_run,
        }
    }

    async fn run(
        &self,
        request: &Request,
        ctx: &ExecutionContext,
        snapshot: Option<&ContractSnapshot>,
        trace: &mut Trace,
    ) -> Result<Decision, EngineError> {
        let operation = request.operation.as_str();
        let dry_run = request.dry_run;

        // 1. VersionCheck
        let snapshot = snapshot.ok_or(EngineError::NoContract)?;
        if let Some(expected) = &request.expected_contract_version {
            if expected != snapshot.version.as_str() {
                return Err(EngineError::VersionMismatch {
                    expected: expected.clone(),
                    actual: snapshot.version.to_string(),
                });
            }
        }
        if operation.trim().is_empty() {
            return Err(EngineError::InvalidRequest {
                message: "operation is required".to_string(),
            });
        }
        let contract = &snapshot.contract;
        let op = contract
            .operation(operation)
            .ok_or_else(|| ConfigError::UnknownOperation {
                operation: operation.to_string(),
            })?;

        // 2. Gather
        let gathered = gather(
            contract,
            operation,
            &request.input,
            ctx,
            &self.ports,
            self.options.port_timeout,
        )
        .await?;
        let facts = trace.facts.insert(gathered);

        // 3. Derive
        derive(contract, facts)?;

        // 4. ValidateState
        let transitions = validate_transitions(contract, operation, op, facts)?;

        // 5. EvaluateRules + ApplyVerdict
        let matched = evaluate_rules(contract, operation, facts)?;
        trace.matched_rules = matched.iter().map(|v| v.rule_id.clone()).collect();
        let resolution = resolve_verdicts(matched);
        trace.verdicts = resolution.verdicts.clone();

        match resolution.winning {
            Some(VerdictType::Deny) => {
                let error = resolution.primary().and_then(|v| v.error.clone());
                return Ok(Decision {
                    outcome: live_or_dry(dry_run, Outcome::Denied, Outcome::WouldDeny),
                    output: None,
                    error,
                    error_class: Some("business_denial"),
                });
            }
            Some(VerdictType::Escalate) => {
                let queues: Vec<&str> = resolution
                    .winners()
                    .filter_map(|v| v.queue.as_deref())
                    .collect();
                let mut decision = Decision::new(live_or_dry(
                    dry_run,
                    Outcome::Escalated,
                    Outcome::WouldEscalate,
                ));
                decision.output = Some(json!({ "queues": queues }));
                return Ok(decision);
            }
            Some(VerdictType::Require) => {
                let conditions: BTreeSet<&str> = resolution
                    .winners()
                    .flat_map(|v| v.conditions.iter().map(String::as_str))
                    .collect();
                let mut decision = Decision::new(live_or_dry(
                    dry_run,
                    Outcome::Required,
                    Outcome::WouldRequire,
                ));
                decision.output = Some(json!({ "conditions": conditions }));
                return Ok(decision);
            }
            Some(VerdictType::Flag) | None => {}
        }

        if dry_run {
            trace.transitions = transitions;
            let outcome = if resolution.flags().next().is_some() {
                Outcome::WouldExecuteWithFlags
            } else {
                Outcome::WouldExecute
            };
            return Ok(Decision::new(outcome));
        }

        // 6. Execute
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let (port_name, port) = self.ports.executor_for(operation, op)?;
        let output = port
            .execute(operation, &request.input)
            .await
            .map_err(|source| EngineError::Execution {
                port: port_name.clone(),
                source,
            })?;
        trace.output = Some(output.clone());

        // 7. Transition
        for transition in transitions {
            port.transition(operation, &transition, &request.input)
                .await
                .map_err(|source| EngineError::Execution {
                    port: port_name.clone(),
                    source,
                })?;
            trace.transitions.push(transition);
        }

        // 8. Complete
        let mut decision = Decision::new(Outcome::Executed);
        decision.output = Some(output);
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Port, PortError};
    use crate::types::{Contract, Input};
    use async_trait::async_trait;
    use covenant_storage::InMemoryAuditLog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recording {
        gets: AtomicUsize,
        executes: AtomicUsize,
        transitions: AtomicUsize,
        reject_transitions: bool,
    }

    #[async_trait]
    impl Port for Recording {
        async fn get(&self, fact: &str, _input: &Input) -> Result<Value, PortError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            match fact {
                "order.status" => Ok(json!("open")),
                "order.total" => Ok(json!(120)),
                other => Err(PortError::NotFound(other.to_string())),
            }
        }

        async fn execute(&self, _operation: &str, _input: &Input) -> Result<Value, PortError> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"done": true}))
        }

        async fn transition(
            &self,
            _operation: &str,
            _transition: &AppliedTransition,
            _input: &Input,
        ) -> Result<(), PortError> {
            self.transitions.fetch_add(1, Ordering::SeqCst);
            if self.reject_transitions {
                return Err(PortError::Unavailable("state store offline".into()));
            }
            Ok(())
        }
    }

    fn contract(rules: Value) -> Contract {
        Contract::from_json_value(json!({
            "facts": {
                "order.id": {"source": "input"},
                "order.status": {"source": "port:orders"},
                "order.total": {"source": "port:orders"}
            },
            "rules": rules,
            "operations": {
                "Ship": {
                    "constrained_by": ["big", "review", "needs-docs"],
                    "transitions": [{"entity": "Order", "from": "open", "to": "shipped"}],
                    "port": "orders"
                }
            },
            "entities": {
                "Order": {
                    "states": ["open", "shipped"],
                    "initial": "open",
                    "terminal": ["shipped"],
                    "transitions": [{"from": "open", "to": "shipped"}],
                    "state_fact": "order.status"
                }
            }
        }))
        .unwrap()
    }

    fn rules(big: &str, review: bool, docs: bool) -> Value {
        let mut big_verdict = serde_json::Map::new();
        big_verdict.insert(
            big.to_string(),
            json!({"code": "BIG", "reason": "big order"}),
        );
        let trigger = |on: bool| if on { "o-1" } else { "never" };
        let review_id = trigger(review);
        let docs_id = trigger(docs);
        json!([
            {"id": "big", "when": {"fact": "order.total", "greater_than": 100},
             "verdict": big_verdict},
            {"id": "review", "when": {"fact": "order.id", "equals": review_id},
             "verdict": {"escalate": {"queue": "ops", "reason": "manual review"}}},
            {"id": "needs-docs", "when": {"fact": "order.id", "equals": docs_id},
             "verdict": {"require": {"conditions": ["customs_form"], "reason": "docs"}}}
        ])
    }

    fn engine(contract: Contract) -> (Engine, Arc<Recording>, Arc<InMemoryAuditLog>) {
        let port = Arc::new(Recording::default());
        let log = Arc::new(InMemoryAuditLog::new());
        let store = Arc::new(ContractStore::with_contract(contract, "v1"));
        let engine = Engine::new(
            store,
            PortRegistry::new().with("orders", port.clone()),
            log.clone(),
        );
        (engine, port, log)
    }

    fn ship() -> Request {
        Request::new("Ship").with_input("order.id", json!("o-1"))
    }

    #[tokio::test]
    async fn flag_proceeds_to_execution_and_transition() {
        let (engine, port, log) = engine(contract(rules("flag", false, false)));
        let resp = engine.evaluate(ship(), &ExecutionContext::new()).await;

        assert_eq!(resp.outcome, Outcome::Executed);
        assert_eq!(resp.output, Some(json!({"done": true})));
        assert_eq!(resp.matched_rules, vec!["big"]);
        assert_eq!(resp.transitions.len(), 1);
        assert_eq!(resp.contract_version.as_deref(), Some("v1"));
        assert!(resp.fact_snapshot.is_none());
        assert_eq!(port.executes.load(Ordering::SeqCst), 1);
        assert_eq!(port.transitions.load(Ordering::SeqCst), 1);

        let record = log.find(&resp.invocation_id).await.unwrap();
        assert_eq!(record.outcome, "executed");
        assert_eq!(record.transitions.len(), 1);
        assert_eq!(record.output, Some(json!({"done": true})));
    }

    #[tokio::test]
    async fn escalate_and_require_stop_before_execution() {
        let (engine, port, _) = engine(contract(rules("flag", true, true)));
        let resp = engine.evaluate(ship(), &ExecutionContext::new()).await;
        assert_eq!(resp.outcome, Outcome::Escalated);
        assert_eq!(resp.output, Some(json!({"queues": ["ops"]})));
        assert_eq!(resp.http_status(), 202);

        let (engine, _, _) = engine_with(contract(rules("flag", false, true)), port.clone());
        let resp = engine.evaluate(ship(), &ExecutionContext::new()).await;
        assert_eq!(resp.outcome, Outcome::Required);
        assert_eq!(resp.output, Some(json!({"conditions": ["customs_form"]})));
        assert_eq!(port.executes.load(Ordering::SeqCst), 0);
    }

    fn engine_with(
        contract: Contract,
        port: Arc<Recording>,
    ) -> (Engine, Arc<Recording>, Arc<InMemoryAuditLog>) {
        let log = Arc::new(InMemoryAuditLog::new());
        let store = Arc::new(ContractStore::with_contract(contract, "v1"));
        let engine = Engine::new(
            store,
            PortRegistry::new().with("orders", port.clone()),
            log.clone(),
        );
        (engine, port, log)
    }

    #[tokio::test]
    async fn failed_transition_keeps_executed_output() {
        let port = Arc::new(Recording {
            reject_transitions: true,
            ..Default::default()
        });
        let (engine, port, log) = engine_with(contract(rules("flag", false, false)), port);
        let resp = engine.evaluate(ship(), &ExecutionContext::new()).await;

        assert_eq!(resp.outcome, Outcome::SystemError);
        assert_eq!(resp.error.as_ref().unwrap().code, "EXECUTION_FAILED");
        assert_eq!(resp.output, Some(json!({"done": true})));
        assert!(resp.transitions.is_empty());
        assert_eq!(port.executes.load(Ordering::SeqCst), 1);

        let record = log.find(&resp.invocation_id).await.unwrap();
        assert_eq!(record.error_class.as_deref(), Some("execution_failure"));
        assert_eq!(record.output, Some(json!({"done": true})));
        assert!(record.transitions.is_empty());
    }

    #[tokio::test]
    async fn dry_run_never_executes() {
        for (big, expected) in [
            ("flag", Outcome::WouldExecuteWithFlags),
            ("deny", Outcome::WouldDeny),
        ] {
            let (engine, port, log) = engine(contract(rules(big, false, false)));
            let resp = engine
                .evaluate(ship().dry_run(), &ExecutionContext::new())
                .await;
            assert_eq!(resp.outcome, expected);
            assert!(resp.dry_run);
            let snapshot = resp.fact_snapshot.unwrap();
            assert_eq!(snapshot["order.total"], json!(120));
            assert_eq!(port.executes.load(Ordering::SeqCst), 0);
            assert_eq!(port.transitions.load(Ordering::SeqCst), 0);
            assert_eq!(log.len().await, 1);
        }
    }

    #[tokio::test]
    async fn deny_uses_synthesized_envelope() {
        let (engine, port, log) = engine(contract(rules("deny", false, false)));
        let resp = engine.evaluate(ship(), &ExecutionContext::new()).await;
        assert_eq!(resp.outcome, Outcome::Denied);
        let error = resp.error.unwrap();
        assert_eq!(error.code, "BIG");
        assert_eq!(error.http_status, 403);
        assert_eq!(port.executes.load(Ordering::SeqCst), 0);

        let record = log.find(&resp.invocation_id).await.unwrap();
        assert_eq!(record.error_class.as_deref(), Some("business_denial"));
        assert_eq!(record.error_code.as_deref(), Some("BIG"));
    }

    #[tokio::test]
    async fn version_mismatch_touches_nothing() {
        let (engine, port, log) = engine(contract(rules("flag", false, false)));
        let resp = engine
            .evaluate(ship().expecting_version("v0"), &ExecutionContext::new())
            .await;
        assert_eq!(resp.outcome, Outcome::SystemError);
        assert_eq!(resp.error.unwrap().code, "CONTRACT_VERSION_MISMATCH");
        assert_eq!(port.gets.load(Ordering::SeqCst), 0);
        let record = log.find(&resp.invocation_id).await.unwrap();
        assert_eq!(record.error_class.as_deref(), Some("version_conflict"));
    }

    #[tokio::test]
    async fn no_contract_and_unknown_operation() {
        let log = Arc::new(InMemoryAuditLog::new());
        let engine = Engine::new(Arc::new(ContractStore::new()), PortRegistry::new(), log.clone());
        let resp = engine.evaluate(ship(), &ExecutionContext::new()).await;
        assert_eq!(resp.error.unwrap().code, "NO_CONTRACT_LOADED");
        assert!(resp.contract_version.is_none());

        let (engine, _, _) = engine_fixture();
        let resp = engine
            .evaluate(Request::new("Teleport"), &ExecutionContext::new())
            .await;
        assert_eq!(resp.outcome, Outcome::SystemError);
        assert_eq!(resp.error.unwrap().code, "CONFIGURATION_ERROR");

        let resp = engine
            .evaluate(Request::new(" "), &ExecutionContext::new())
            .await;
        assert_eq!(resp.outcome, Outcome::Rejected);
    }

    fn engine_fixture() -> (Engine, Arc<Recording>, Arc<InMemoryAuditLog>) {
        engine(contract(rules("flag", false, false)))
    }

    #[tokio::test]
    async fn cancelled_before_execute() {
        let (engine, port, _) = engine_fixture();
        let token = crate::context::CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::new().with_cancellation(token);
        let resp = engine.evaluate(ship(), &ctx).await;
        assert_eq!(resp.outcome, Outcome::SystemError);
        assert_eq!(resp.error.unwrap().code, "CANCELLED");
        assert_eq!(port.executes.load(Ordering::SeqCst), 0);
    }
}
