//! Static contract validation, run before a contract is accepted.

use std::collections::HashSet;

use crate::derive::{check_derivation, derivation_order};
use crate::error::ConfigError;
use crate::types::{Condition, Contract};

impl Contract {
    /// Check the contract for defects that would otherwise surface as
    /// configuration errors at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_contract(self)
    }
}

/// Reports the first defect found: duplicate rule ids, unknown derivation
/// functions or arities, derivation cycles, dangling fact references in
/// rules, guards and state facts, malformed entity state machines, and
/// operation references to unknown rules, entities, states, or undeclared
/// transitions.
pub fn validate_contract(contract: &Contract) -> Result<(), ConfigError> {
    let mut rule_ids = HashSet::new();
    for rule in &contract.rules {
        if !rule_ids.insert(rule.id.as_str()) {
            return Err(ConfigError::DuplicateRule {
                rule_id: rule.id.clone(),
            });
        }
    }

    for (name, def) in &contract.derived_facts {
        check_derivation(name, def)?;
        for reference in def.derivation.fact_refs() {
            if !references_known_fact(contract, reference) {
                return Err(ConfigError::UnknownFactReference {
                    fact: name.clone(),
                    reference: reference.to_string(),
                });
            }
        }
    }
    derivation_order(contract)?;

    for rule in &contract.rules {
        if let Some(reference) = first_unknown(contract, &rule.when) {
            return Err(ConfigError::UnknownFactReference {
                fact: rule.id.clone(),
                reference,
            });
        }
    }

    for (name, entity) in &contract.entities {
        let unknown = |state: &str| ConfigError::UnknownState {
            entity: name.clone(),
            state: state.to_string(),
        };
        if !entity.has_state(&entity.initial) {
            return Err(unknown(&entity.initial));
        }
        if let Some(state) = entity.terminal.iter().find(|s| !entity.has_state(s)) {
            return Err(unknown(state));
        }
        let dangling_fact = |reference: &str| ConfigError::UnknownEntityFact {
            entity: name.clone(),
            reference: reference.to_string(),
        };
        if let Some(state_fact) = &entity.state_fact {
            if !references_known_fact(contract, state_fact) {
                return Err(dangling_fact(state_fact));
            }
        }
        for edge in &entity.transitions {
            if !entity.has_state(&edge.from) {
                return Err(unknown(&edge.from));
            }
            if !entity.has_state(&edge.to) {
                return Err(unknown(&edge.to));
            }
            if entity.is_terminal(&edge.from) {
                return Err(ConfigError::TerminalTransition {
                    entity: name.clone(),
                    state: edge.from.clone(),
                });
            }
            if let Some(reference) = edge.guard.as_ref().and_then(|g| first_unknown(contract, g)) {
                return Err(dangling_fact(&reference));
            }
        }
    }

    for (op_name, op) in &contract.operations {
        for rule_id in &op.constrained_by {
            if !rule_ids.contains(rule_id.as_str()) {
                return Err(ConfigError::UnknownRule {
                    operation: op_name.clone(),
                    rule_id: rule_id.clone(),
                });
            }
        }
        for t in &op.transitions {
            check_transition(contract, op_name, &t.entity, t.from.as_deref(), &t.to)?;
        }
    }
    Ok(())
}

fn first_unknown(contract: &Contract, condition: &Condition) -> Option<String> {
    let mut dangling = None;
    condition.for_each_fact(&mut |reference| {
        if dangling.is_none() && !references_known_fact(contract, reference) {
            dangling = Some(reference.to_string());
        }
    });
    dangling
}

/// A reference is known if it names a fact or navigates into one.
fn references_known_fact(contract: &Contract, reference: &str) -> bool {
    if contract.is_known_fact(reference) {
        return true;
    }
    let mut end = reference.len();
    while let Some(dot) = reference[..end].rfind('.') {
        if contract.is_known_fact(&reference[..dot]) {
            return true;
        }
        end = dot;
    }
    false
}

/// Check that an operation transition names a legal edge.
///
/// Without `from`, the target must be the entity's initial state or the
/// target of some edge usable by the operation.
pub(crate) fn check_transition(
    contract: &Contract,
    operation: &str,
    entity_name: &str,
    from: Option<&str>,
    to: &str,
) -> Result<(), ConfigError> {
    let entity = contract
        .entity(entity_name)
        .ok_or_else(|| ConfigError::UnknownEntity {
            operation: operation.to_string(),
            entity: entity_name.to_string(),
        })?;
    for state in from.into_iter().chain(std::iter::once(to)) {
        if !entity.has_state(state) {
            return Err(ConfigError::UnknownState {
                entity: entity_name.to_string(),
                state: state.to_string(),
            });
        }
    }
    let legal = match from {
        Some(from) => entity.edge(from, to, operation).is_some(),
        None => {
            entity.initial == to
                || entity
                    .transitions
                    .iter()
                    .any(|e| e.to == to && e.via.as_deref().map_or(true, |v| v == operation))
        }
    };
    if !legal {
        return Err(ConfigError::IllegalTransition {
            entity: entity_name.to_string(),
            from: from.unwrap_or("*").to_string(),
            to: to.to_string(),
            operation: operation.to_string(),
        });
    }
    Ok(())
}
