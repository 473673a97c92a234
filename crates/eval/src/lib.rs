//! Covenant contract evaluation engine.
//!
//! Interprets a compiled, declarative contract at request time: gathers the
//! facts an operation needs (concurrently, with per-fact failure policy),
//! evaluates derived facts in dependency order, validates entity state,
//! matches business rules, resolves their verdicts by priority, and only
//! then lets the operation's port perform its side effect. Every invocation,
//! live or dry-run, produces exactly one audit record.
//!
//! The engine never sees authoring syntax. It consumes [`Contract`] values
//! deserialized from JSON and a version token held in a [`ContractStore`].

pub mod audit;
pub mod context;
pub mod coordinator;
pub mod derive;
pub mod error;
pub mod functions;
pub mod gather;
pub mod numeric;
pub mod port;
pub mod rules;
pub mod state;
pub mod store;
pub mod types;
pub mod validate;

pub use audit::{AuditEntry, AuditRecorder};
pub use context::{CancellationToken, ExecutionContext};
pub use coordinator::{Engine, EngineOptions};
pub use error::{ConfigError, ContractLoadError, EngineError};
pub use port::{Port, PortError, PortRegistry};
pub use store::{ContractSnapshot, ContractStore, ContractVersion};
pub use types::{
    Contract, ErrorEnvelope, FactSet, Input, Outcome, Request, Resolution, Response, Verdict,
    VerdictType,
};

/// Parse and validate a contract in one step.
pub fn load_contract(json: &str) -> Result<Contract, ContractLoadError> {
    let contract = Contract::from_json_str(json)?;
    contract.validate()?;
    Ok(contract)
}
