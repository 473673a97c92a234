//! Derived-fact evaluation.
//!
//! Derived facts form a DAG over their fact arguments. A Kahn ordering
//! (ties broken by name) guarantees every derivation runs exactly once and
//! after everything it reads. Cycles are reported with the facts on the
//! cycle.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::ConfigError;
use crate::functions::{self, FunctionError};
use crate::types::{Contract, DerivationArg, DerivedFactDef, FactSet};

/// The derived fact a reference depends on: the exact name, else the
/// longest dotted prefix naming a derived fact. Exact base facts win over
/// derived prefixes.
pub(crate) fn derived_target<'a>(contract: &'a Contract, reference: &str) -> Option<&'a str> {
    if let Some((name, _)) = contract.derived_facts.get_key_value(reference) {
        return Some(name);
    }
    if contract.facts.contains_key(reference) {
        return None;
    }
    let mut end = reference.len();
    while let Some(dot) = reference[..end].rfind('.') {
        let prefix = &reference[..dot];
        if let Some((name, _)) = contract.derived_facts.get_key_value(prefix) {
            return Some(name);
        }
        if contract.facts.contains_key(prefix) {
            return None;
        }
        end = dot;
    }
    None
}

/// Evaluation order for every derived fact in `contract`.
pub fn derivation_order(contract: &Contract) -> Result<Vec<String>, ConfigError> {
    let derived = &contract.derived_facts;

    let mut deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, def) in derived {
        let edges: BTreeSet<&str> = def
            .derivation
            .fact_refs()
            .filter_map(|r| derived_target(contract, r))
            .collect();
        for dep in &edges {
            dependents.entry(*dep).or_default().push(name);
        }
        deps.insert(name, edges);
    }

    let mut in_degree: BTreeMap<&str, usize> =
        deps.iter().map(|(name, d)| (*name, d.len())).collect();
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(derived.len());
    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());
        for dependent in dependents.get(next).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < derived.len() {
        let remaining: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(name, _)| *name)
            .collect();
        return Err(ConfigError::DerivationCycle {
            facts: find_cycle(&deps, &remaining),
        });
    }
    Ok(order)
}

/// Walk unresolved dependencies until a node repeats. Every remaining node
/// still has a remaining dependency, so the walk always closes a cycle.
fn find_cycle(deps: &BTreeMap<&str, BTreeSet<&str>>, remaining: &BTreeSet<&str>) -> Vec<String> {
    let Some(start) = remaining.first() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = vec![*start];
    let mut current = *start;
    loop {
        let next = deps
            .get(current)
            .and_then(|d| d.iter().find(|n| remaining.contains(*n)));
        let Some(next) = next else {
            return path.into_iter().map(String::from).collect();
        };
        if let Some(pos) = path.iter().position(|p| p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        path.push(*next);
        current = *next;
    }
}

fn to_config_error(fact: &str, err: FunctionError) -> ConfigError {
    match err {
        FunctionError::Unknown(function) => ConfigError::UnknownFunction {
            fact: fact.to_string(),
            function,
        },
        FunctionError::Arity {
            function,
            expected,
            got,
        } => ConfigError::Arity {
            fact: fact.to_string(),
            function,
            expected: expected.to_string(),
            got,
        },
    }
}

/// Check that a derivation names a library function with a valid arity.
pub(crate) fn check_derivation(name: &str, def: &DerivedFactDef) -> Result<(), ConfigError> {
    functions::check(&def.derivation.function, def.derivation.args.len())
        .map_err(|e| to_config_error(name, e))
}

/// Evaluate every derived fact into `facts`, returning the order used.
pub fn derive(contract: &Contract, facts: &mut FactSet) -> Result<Vec<String>, ConfigError> {
    let order = derivation_order(contract)?;
    for name in &order {
        let Some(def) = contract.derived_facts.get(name) else {
            continue;
        };
        let args: Vec<Option<Value>> = def
            .derivation
            .args
            .iter()
            .map(|arg| match arg {
                DerivationArg::Fact(reference) => facts.resolve(reference).cloned(),
                DerivationArg::Value(value) => Some(value.clone()),
            })
            .collect();
        let value = functions::apply(&def.derivation.function, &args)
            .map_err(|e| to_config_error(name, e))?;
        facts.insert(name.clone(), value);
    }
    Ok(order)
}
