//! Entity-state precondition checks for an operation's transitions.

use serde_json::Value;

use crate::error::EngineError;
use crate::rules::eval_condition;
use crate::types::{AppliedTransition, Contract, FactSet, OperationDef};
use crate::validate::check_transition;

/// Verify every transition `operation` declares and return them in
/// declaration order.
///
/// Each edge must exist in the entity's state machine. When the entity has a
/// `state_fact`, its gathered value must equal the transition's `from`
/// state, and an edge guard, if any, must hold.
pub fn validate_transitions(
    contract: &Contract,
    operation: &str,
    op: &OperationDef,
    facts: &FactSet,
) -> Result<Vec<AppliedTransition>, EngineError> {
    let mut applied = Vec::with_capacity(op.transitions.len());
    for t in &op.transitions {
        check_transition(contract, operation, &t.entity, t.from.as_deref(), &t.to)?;

        if let (Some(from), Some(entity)) = (&t.from, contract.entity(&t.entity)) {
            if let Some(state_fact) = &entity.state_fact {
                let actual = facts.resolve(state_fact);
                if actual.and_then(Value::as_str) != Some(from.as_str()) {
                    return Err(EngineError::InvalidEntityState {
                        entity: t.entity.clone(),
                        expected: from.clone(),
                        actual: actual.map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        }),
                    });
                }
            }
            let guard = entity
                .edge(from, &t.to, operation)
                .and_then(|edge| edge.guard.as_ref());
            if let Some(guard) = guard {
                if !eval_condition(guard, facts) {
                    return Err(EngineError::GuardRejected {
                        entity: t.entity.clone(),
                        from: from.clone(),
                        to: t.to.clone(),
                    });
                }
            }
        }

        applied.push(AppliedTransition {
            entity: t.entity.clone(),
            from: t.from.clone(),
            to: t.to.clone(),
        });
    }
    Ok(applied)
}
