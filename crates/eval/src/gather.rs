//! Fact gathering.
//!
//! Computes the minimal set of base facts an operation needs, reads input
//! and context facts synchronously, then fans out one task per port fact on
//! a `JoinSet`. Spawned tasks only return values; the gathering task owns
//! the `FactSet` and is its only writer.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::derive::derived_target;
use crate::error::{ConfigError, EngineError};
use crate::port::{PortError, PortRegistry};
use crate::types::{Contract, FactSet, FactSource, Input, OnMissing};

/// Base facts needed to evaluate `operation`.
///
/// Collects every fact referenced by the operation's constraining rules,
/// following derived facts through their arguments, plus the state facts
/// and guard references of entities the operation transitions out of a
/// known state.
pub fn required_base_facts(
    contract: &Contract,
    operation: &str,
) -> Result<BTreeSet<String>, ConfigError> {
    let op = contract
        .operation(operation)
        .ok_or_else(|| ConfigError::UnknownOperation {
            operation: operation.to_string(),
        })?;

    let mut needed = BTreeSet::new();
    let mut visited = BTreeSet::new();
    for rule_id in &op.constrained_by {
        let rule = contract
            .rule(rule_id)
            .ok_or_else(|| ConfigError::UnknownRule {
                operation: operation.to_string(),
                rule_id: rule_id.clone(),
            })?;
        rule.when.for_each_fact(&mut |reference| {
            collect(contract, reference, &mut needed, &mut visited)
        });
    }

    for t in &op.transitions {
        let (Some(from), Some(entity)) = (&t.from, contract.entity(&t.entity)) else {
            continue;
        };
        if let Some(state_fact) = &entity.state_fact {
            collect(contract, state_fact, &mut needed, &mut visited);
        }
        if let Some(guard) = entity
            .edge(from, &t.to, operation)
            .and_then(|edge| edge.guard.as_ref())
        {
            guard.for_each_fact(&mut |reference| {
                collect(contract, reference, &mut needed, &mut visited)
            });
        }
    }
    Ok(needed)
}

/// Resolve one reference to the base facts behind it.
fn collect(
    contract: &Contract,
    reference: &str,
    needed: &mut BTreeSet<String>,
    visited: &mut BTreeSet<String>,
) {
    if contract.facts.contains_key(reference) {
        needed.insert(reference.to_string());
        return;
    }
    if let Some(derived) = derived_target(contract, reference) {
        if !visited.insert(derived.to_string()) {
            return;
        }
        if let Some(def) = contract.derived_facts.get(derived) {
            for arg in def.derivation.fact_refs() {
                collect(contract, arg, needed, visited);
            }
        }
        return;
    }
    if let Some(base) = longest_base_prefix(contract, reference) {
        needed.insert(base.to_string());
    }
}

fn longest_base_prefix<'a>(contract: &'a Contract, reference: &str) -> Option<&'a str> {
    let mut end = reference.len();
    while let Some(dot) = reference[..end].rfind('.') {
        if let Some((name, _)) = contract.facts.get_key_value(&reference[..dot]) {
            return Some(name);
        }
        end = dot;
    }
    None
}

/// Gather every base fact `operation` needs into a fresh `FactSet`.
///
/// Input and context facts are read first so request validation fails
/// before any port is queried. Port facts are fetched concurrently; a
/// fatal failure or cancellation aborts the remaining fetches.
pub async fn gather(
    contract: &Contract,
    operation: &str,
    input: &Input,
    ctx: &ExecutionContext,
    ports: &PortRegistry,
    port_timeout: Option<Duration>,
) -> Result<FactSet, EngineError> {
    let needed = required_base_facts(contract, operation)?;
    let mut facts = FactSet::new();
    let mut remote = Vec::new();

    for name in &needed {
        let Some(def) = contract.facts.get(name) else {
            continue;
        };
        let value = match &def.source {
            FactSource::Input => input.get(name).cloned(),
            FactSource::Ctx => ctx.fact(name),
            FactSource::Port(port) => {
                remote.push((name.clone(), port.clone(), def.on_missing));
                continue;
            }
        };
        match value {
            Some(v) => facts.insert(name.clone(), v),
            None if def.required => {
                return Err(EngineError::InvalidRequest {
                    message: format!("missing required {} fact '{}'", def.source, name),
                });
            }
            None => facts.mark_absent(name.clone()),
        }
    }

    if remote.is_empty() {
        return Ok(facts);
    }

    let shared_input = Arc::new(input.clone());
    let mut tasks = JoinSet::new();
    for (fact, port_name, on_missing) in remote {
        let port = ports.get(&port_name);
        let input = shared_input.clone();
        tasks.spawn(async move {
            let result = match port {
                None => Err(PortError::NotRegistered { port: port_name }),
                Some(port) => match port_timeout {
                    Some(limit) => tokio::time::timeout(limit, port.get(&fact, &input))
                        .await
                        .unwrap_or(Err(PortError::Timeout {
                            after_ms: limit.as_millis() as u64,
                        })),
                    None => port.get(&fact, &input).await,
                },
            };
            (fact, on_missing, result)
        });
    }

    loop {
        let joined = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                tasks.abort_all();
                return Err(EngineError::Cancelled);
            }
            joined = tasks.join_next() => joined,
        };
        let Some(joined) = joined else {
            break;
        };
        let (fact, on_missing, result) = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                tasks.abort_all();
                return Err(EngineError::FactUnavailable {
                    fact: "<port task>".to_string(),
                    reason: join_error.to_string(),
                    denied: false,
                });
            }
        };

        let reason = match result {
            Ok(Value::Null) => "port returned null".to_string(),
            Ok(value) => {
                facts.insert(fact, value);
                continue;
            }
            Err(err) => err.to_string(),
        };

        match on_missing {
            OnMissing::Skip => {
                debug!(%fact, %reason, "fact skipped");
                facts.mark_absent(fact);
            }
            policy => {
                warn!(%fact, %reason, ?policy, "fact unavailable");
                tasks.abort_all();
                return Err(EngineError::FactUnavailable {
                    fact,
                    reason,
                    denied: policy == OnMissing::Deny,
                });
            }
        }
    }
    Ok(facts)
}
