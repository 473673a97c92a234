//! Compiled contract representation.
//!
//! The executor never sees authoring syntax; it consumes this already
//! compiled form, usually exchanged as JSON. Conditions, derivations, and
//! verdicts are closed tagged enums interpreted at request time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ContractLoadError;

// ──────────────────────────────────────────────
// Contract
// ──────────────────────────────────────────────

/// Immutable, compiled contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub facts: BTreeMap<String, FactDef>,
    #[serde(default)]
    pub derived_facts: BTreeMap<String, DerivedFactDef>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationDef>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityDef>,
}

impl Contract {
    /// Parse a compiled contract from its JSON form.
    pub fn from_json_str(json: &str) -> Result<Contract, ContractLoadError> {
        serde_json::from_str(json).map_err(ContractLoadError::Parse)
    }

    /// Convert an already-parsed JSON value into a contract.
    pub fn from_json_value(value: serde_json::Value) -> Result<Contract, ContractLoadError> {
        serde_json::from_value(value).map_err(ContractLoadError::Parse)
    }

    pub fn rule(&self, id: &str) -> Option<&RuleDef> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDef> {
        self.operations.get(name)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// True if `name` is a declared base or derived fact.
    pub fn is_known_fact(&self, name: &str) -> bool {
        self.facts.contains_key(name) || self.derived_facts.contains_key(name)
    }
}

// ──────────────────────────────────────────────
// Facts
// ──────────────────────────────────────────────

/// Where a base fact's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FactSource {
    /// The request payload.
    Input,
    /// The invocation's execution context.
    Ctx,
    /// A named port, fetched concurrently during gathering.
    Port(String),
}

impl TryFrom<String> for FactSource {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "input" => Ok(FactSource::Input),
            "ctx" => Ok(FactSource::Ctx),
            other => match other.strip_prefix("port:") {
                Some(name) if !name.is_empty() => Ok(FactSource::Port(name.to_string())),
                _ => Err(format!(
                    "invalid fact source '{}': expected input, ctx, or port:<name>",
                    other
                )),
            },
        }
    }
}

impl From<FactSource> for String {
    fn from(source: FactSource) -> String {
        source.to_string()
    }
}

impl fmt::Display for FactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactSource::Input => write!(f, "input"),
            FactSource::Ctx => write!(f, "ctx"),
            FactSource::Port(name) => write!(f, "port:{}", name),
        }
    }
}

/// What to do when a port-sourced fact cannot be retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMissing {
    /// Abort the invocation with a fact-unavailable system error.
    #[default]
    SystemError,
    /// Abort the invocation with a denial-flagged fact-unavailable error.
    Deny,
    /// Record the fact as absent; leaves referencing it evaluate false.
    Skip,
}

fn default_required() -> bool {
    true
}

/// A base fact declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactDef {
    pub source: FactSource,
    /// Applies to input and ctx facts. Port facts are governed by `on_missing`.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub on_missing: OnMissing,
}

impl FactDef {
    pub fn new(source: FactSource) -> Self {
        FactDef {
            source,
            required: true,
            on_missing: OnMissing::default(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn on_missing(mut self, policy: OnMissing) -> Self {
        self.on_missing = policy;
        self
    }
}

/// A derived fact computed from other facts by a library function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFactDef {
    pub derivation: Derivation,
}

/// Function name plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    #[serde(rename = "fn")]
    pub function: String,
    #[serde(default)]
    pub args: Vec<DerivationArg>,
}

impl Derivation {
    /// Fact references among the arguments, in argument order.
    pub fn fact_refs(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(DerivationArg::fact_ref)
    }
}

/// A derivation argument: a fact reference or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationArg {
    Fact(String),
    Value(serde_json::Value),
}

impl DerivationArg {
    pub fn fact_ref(&self) -> Option<&str> {
        match self {
            DerivationArg::Fact(name) => Some(name),
            DerivationArg::Value(_) => None,
        }
    }
}

// ──────────────────────────────────────────────
// Rules
// ──────────────────────────────────────────────

/// A business rule: condition tree plus exactly one verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: String,
    /// Informational only. Rules are evaluated for an operation iff the
    /// operation lists them in `constrained_by`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applies_to: Vec<String>,
    pub when: Condition,
    pub verdict: VerdictDef,
}

/// Recursive condition tree.
///
/// JSON forms: `{"all": [..]}`, `{"any": [..]}`, `{"not": {..}}`, or a leaf
/// `{"fact": "payment.amount.value", "greater_than": 10000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    #[serde(untagged)]
    Compare(Comparison),
}

impl Condition {
    pub fn compare(fact: &str, op: Comparator) -> Condition {
        Condition::Compare(Comparison {
            fact: fact.to_string(),
            op,
        })
    }

    /// Visit every fact path referenced by a leaf of this tree.
    pub fn for_each_fact<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        match self {
            Condition::All(children) | Condition::Any(children) => {
                for child in children {
                    child.for_each_fact(visit);
                }
            }
            Condition::Not(inner) => inner.for_each_fact(visit),
            Condition::Compare(cmp) => visit(&cmp.fact),
        }
    }
}

/// Leaf condition: a fact path compared against a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub fact: String,
    #[serde(flatten)]
    pub op: Comparator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equals(serde_json::Value),
    NotEquals(serde_json::Value),
    GreaterThan(serde_json::Value),
    GreaterOrEqual(serde_json::Value),
    LessThan(serde_json::Value),
    LessOrEqual(serde_json::Value),
    In(Vec<serde_json::Value>),
    NotIn(Vec<serde_json::Value>),
    /// `true`: the fact resolves to a non-null value.
    Exists(bool),
}

// ──────────────────────────────────────────────
// Verdicts
// ──────────────────────────────────────────────

/// Structured error returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub http_status: u16,
    pub category: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictDef {
    Deny(DenyVerdict),
    Escalate(EscalateVerdict),
    Require(RequireVerdict),
    Flag(FlagVerdict),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyVerdict {
    pub code: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub error: Option<ErrorEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalateVerdict {
    pub queue: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequireVerdict {
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagVerdict {
    pub code: String,
    #[serde(default)]
    pub reason: String,
}

// ──────────────────────────────────────────────
// Operations and entities
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDef {
    /// Rule ids evaluated for this operation, and only these.
    #[serde(default)]
    pub constrained_by: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionRef>,
    /// Port performing the side effect. Falls back to the registry's
    /// default executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Entity state change declared by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRef {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub states: Vec<String>,
    pub initial: String,
    #[serde(default)]
    pub terminal: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<EntityTransition>,
    /// Fact carrying the entity's current state, checked before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_fact: Option<String>,
}

impl EntityDef {
    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal.iter().any(|s| s == state)
    }

    /// Find the declared edge `from -> to` usable by `operation`.
    ///
    /// An edge without `via` may be used by any operation.
    pub fn edge(&self, from: &str, to: &str, operation: &str) -> Option<&EntityTransition> {
        self.transitions.iter().find(|t| {
            t.from == from && t.to == to && t.via.as_deref().map_or(true, |via| via == operation)
        })
    }
}

/// An edge of an entity state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTransition {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Condition>,
}
