//! Engine error taxonomy.
//!
//! `ConfigError` covers malformed contracts, detected either statically by
//! [`crate::validate`] or at request time. `EngineError` is the terminal
//! failure of a single invocation; the coordinator maps each variant to an
//! outcome, an error envelope, and an audit `error_class`.

use thiserror::Error;

use crate::port::PortError;
use crate::types::{ErrorEnvelope, Outcome};

/// A defect in the loaded contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("derived facts form a cycle: {}", facts.join(" -> "))]
    DerivationCycle { facts: Vec<String> },

    #[error("derived fact '{fact}' uses unknown function '{function}'")]
    UnknownFunction { fact: String, function: String },

    #[error("derived fact '{fact}': function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        fact: String,
        function: String,
        expected: String,
        got: usize,
    },

    #[error("unknown operation '{operation}'")]
    UnknownOperation { operation: String },

    #[error("operation '{operation}' is constrained by unknown rule '{rule_id}'")]
    UnknownRule { operation: String, rule_id: String },

    #[error("duplicate rule id '{rule_id}'")]
    DuplicateRule { rule_id: String },

    #[error("operation '{operation}' transitions unknown entity '{entity}'")]
    UnknownEntity { operation: String, entity: String },

    #[error("entity '{entity}' has no state '{state}'")]
    UnknownState { entity: String, state: String },

    #[error("entity '{entity}' declares no transition {from} -> {to} usable by '{operation}'")]
    IllegalTransition {
        entity: String,
        from: String,
        to: String,
        operation: String,
    },

    #[error("entity '{entity}' has an outgoing transition from terminal state '{state}'")]
    TerminalTransition { entity: String, state: String },

    #[error("fact '{fact}' references undeclared fact '{reference}'")]
    UnknownFactReference { fact: String, reference: String },

    #[error("entity '{entity}' references undeclared fact '{reference}'")]
    UnknownEntityFact { entity: String, reference: String },

    #[error("operation '{operation}' has no executing port and no default executor is registered")]
    NoExecutor { operation: String },
}

/// Failure to turn contract bytes into a usable contract.
#[derive(Debug, Error)]
pub enum ContractLoadError {
    #[error("contract is not valid JSON for the compiled model: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("contract failed validation: {0}")]
    Invalid(#[from] ConfigError),
}

/// Terminal failure of one invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no contract is loaded")]
    NoContract,

    #[error("contract version mismatch: expected '{expected}', active '{actual}'")]
    VersionMismatch { expected: String, actual: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("fact '{fact}' unavailable: {reason}")]
    FactUnavailable {
        fact: String,
        reason: String,
        /// Raised under the `deny` policy rather than `system_error`.
        denied: bool,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("entity '{entity}' is in state {}, operation requires '{expected}'", actual.as_deref().unwrap_or("<unknown>"))]
    InvalidEntityState {
        entity: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("guard for '{entity}' transition {from} -> {to} not satisfied")]
    GuardRejected {
        entity: String,
        from: String,
        to: String,
    },

    #[error("invocation cancelled")]
    Cancelled,

    #[error("execution on port '{port}' failed: {source}")]
    Execution {
        port: String,
        #[source]
        source: PortError,
    },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NoContract => "NO_CONTRACT_LOADED",
            EngineError::VersionMismatch { .. } => "CONTRACT_VERSION_MISMATCH",
            EngineError::InvalidRequest { .. } => "INVALID_REQUEST",
            EngineError::FactUnavailable { .. } => "FACT_UNAVAILABLE",
            EngineError::Configuration(_) => "CONFIGURATION_ERROR",
            EngineError::InvalidEntityState { .. } | EngineError::GuardRejected { .. } => {
                "INVALID_ENTITY_STATE"
            }
            EngineError::Cancelled => "CANCELLED",
            EngineError::Execution { .. } => "EXECUTION_FAILED",
        }
    }

    /// Audit classification, distinct for every failure family.
    pub fn class(&self) -> &'static str {
        match self {
            EngineError::NoContract => "no_contract",
            EngineError::VersionMismatch { .. } => "version_conflict",
            EngineError::InvalidRequest { .. } => "request_validation",
            EngineError::FactUnavailable { .. } => "fact_unavailable",
            EngineError::Configuration(_) => "configuration",
            EngineError::InvalidEntityState { .. } | EngineError::GuardRejected { .. } => {
                "entity_state"
            }
            EngineError::Cancelled => "cancelled",
            EngineError::Execution { .. } => "execution_failure",
        }
    }

    /// Outcome for a live run. Dry runs remap `Denied` to `WouldDeny`.
    pub fn outcome(&self) -> Outcome {
        match self {
            EngineError::InvalidRequest { .. }
            | EngineError::InvalidEntityState { .. }
            | EngineError::GuardRejected { .. } => Outcome::Rejected,
            EngineError::FactUnavailable { denied: true, .. } => Outcome::Denied,
            _ => Outcome::SystemError,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::NoContract => 503,
            EngineError::VersionMismatch { .. } => 409,
            EngineError::InvalidRequest { .. } => 400,
            EngineError::FactUnavailable { .. } => 503,
            EngineError::Configuration(_) => 500,
            EngineError::InvalidEntityState { .. } | EngineError::GuardRejected { .. } => 409,
            EngineError::Cancelled => 499,
            EngineError::Execution { .. } => 500,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NoContract
                | EngineError::VersionMismatch { .. }
                | EngineError::FactUnavailable { .. }
                | EngineError::Cancelled
                | EngineError::Execution { .. }
        )
    }

    fn category(&self) -> &'static str {
        match self {
            EngineError::NoContract | EngineError::VersionMismatch { .. } => "system",
            EngineError::InvalidRequest { .. } => "validation",
            EngineError::FactUnavailable { .. } => "dependency",
            EngineError::Configuration(_) => "configuration",
            EngineError::InvalidEntityState { .. } | EngineError::GuardRejected { .. } => "state",
            EngineError::Cancelled => "system",
            EngineError::Execution { .. } => "execution",
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            EngineError::VersionMismatch { actual, .. } => Some(format!(
                "Refresh the contract and retry with contract version '{}'",
                actual
            )),
            EngineError::FactUnavailable { .. } => {
                Some("Retry once the upstream dependency recovers".to_string())
            }
            EngineError::NoContract => Some("Retry after a contract has been loaded".to_string()),
            _ => None,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.to_string(),
            http_status: self.http_status(),
            category: self.category().to_string(),
            retryable: self.retryable(),
            suggestion: self.suggestion(),
        }
    }
}
