//! Rule matching and verdict resolution.
//!
//! Only the rules an operation lists in `constrained_by` are evaluated, in
//! list order. Each rule whose condition holds contributes one verdict;
//! `resolve_verdicts` then ranks them `deny > escalate > require > flag`.

use std::cmp::Ordering;

use crate::error::ConfigError;
use crate::numeric::{compare, values_equal};
use crate::types::{Comparator, Condition, Contract, FactSet, Resolution, Verdict};

/// Evaluate a condition tree against the fact set.
///
/// A leaf whose fact does not resolve (absent, skipped, or failed
/// navigation) is false regardless of its operator.
pub fn eval_condition(condition: &Condition, facts: &FactSet) -> bool {
    match condition {
        Condition::All(children) => children.iter().all(|c| eval_condition(c, facts)),
        Condition::Any(children) => children.iter().any(|c| eval_condition(c, facts)),
        Condition::Not(inner) => !eval_condition(inner, facts),
        Condition::Compare(cmp) => {
            let Some(value) = facts.resolve(&cmp.fact) else {
                return false;
            };
            match &cmp.op {
                Comparator::Equals(lit) => values_equal(value, lit),
                Comparator::NotEquals(lit) => !values_equal(value, lit),
                Comparator::GreaterThan(lit) => compare(value, lit) == Some(Ordering::Greater),
                Comparator::GreaterOrEqual(lit) => matches!(
                    compare(value, lit),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                Comparator::LessThan(lit) => compare(value, lit) == Some(Ordering::Less),
                Comparator::LessOrEqual(lit) => {
                    matches!(compare(value, lit), Some(Ordering::Less | Ordering::Equal))
                }
                Comparator::In(list) => list.iter().any(|lit| values_equal(value, lit)),
                Comparator::NotIn(list) => !list.iter().any(|lit| values_equal(value, lit)),
                Comparator::Exists(expected) => !value.is_null() == *expected,
            }
        }
    }
}

/// Evaluate the operation's constraining rules, returning one verdict per
/// matching rule in `constrained_by` order.
pub fn evaluate_rules(
    contract: &Contract,
    operation: &str,
    facts: &FactSet,
) -> Result<Vec<Verdict>, ConfigError> {
    let op = contract
        .operation(operation)
        .ok_or_else(|| ConfigError::UnknownOperation {
            operation: operation.to_string(),
        })?;

    let mut verdicts = Vec::new();
    for rule_id in &op.constrained_by {
        let rule = contract
            .rule(rule_id)
            .ok_or_else(|| ConfigError::UnknownRule {
                operation: operation.to_string(),
                rule_id: rule_id.clone(),
            })?;
        if eval_condition(&rule.when, facts) {
            verdicts.push(Verdict::from_rule(rule));
        }
    }
    Ok(verdicts)
}

/// Rank verdicts by priority. All verdicts of the winning type are kept;
/// the sort is stable so rule order survives within a type.
pub fn resolve_verdicts(mut verdicts: Vec<Verdict>) -> Resolution {
    verdicts.sort_by(|a, b| b.verdict_type.cmp(&a.verdict_type));
    Resolution {
        winning: verdicts.first().map(|v| v.verdict_type),
        verdicts,
    }
}
