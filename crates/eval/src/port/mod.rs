//! Port abstraction: the engine's only boundary to the outside world.
//!
//! A [`Port`] fetches port-sourced facts and performs the side effect of an
//! operation. Ports hold no policy; every decision is taken by the engine
//! before `execute` is reached. [`PortRegistry`] maps the names used in
//! contracts (`port:customerRepo`, `"port": "invoiceRepo"`) to instances.

pub mod inmem;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::ConfigError;
use crate::types::{AppliedTransition, Input, OperationDef};

// ──────────────────────────────────────────────
// PortError
// ──────────────────────────────────────────────

/// Errors a port can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// No port is registered under this name.
    #[error("port '{port}' is not registered")]
    NotRegistered { port: String },
    /// The port does not serve this fact or operation.
    #[error("port does not support {what}")]
    Unsupported { what: String },
    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// A required input key is missing or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The backing system is unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The call exceeded the engine's per-port timeout.
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

// ──────────────────────────────────────────────
// Port trait
// ──────────────────────────────────────────────

/// External boundary for fact retrieval and side-effecting execution.
///
/// Implementations must be safe to call concurrently: the gatherer issues
/// all `get` calls of one invocation in parallel, and many invocations run
/// at once.
#[async_trait]
pub trait Port: Send + Sync {
    /// Fetch the value of one fact, given the request input.
    async fn get(&self, fact: &str, input: &Input) -> Result<Value, PortError>;

    /// Perform the operation's side effect and return its output.
    async fn execute(&self, operation: &str, input: &Input) -> Result<Value, PortError>;

    /// Apply one entity transition after a successful `execute`.
    ///
    /// Entity state is owned by the port, so the default does nothing.
    async fn transition(
        &self,
        _operation: &str,
        _transition: &AppliedTransition,
        _input: &Input,
    ) -> Result<(), PortError> {
        Ok(())
    }
}

// ──────────────────────────────────────────────
// PortRegistry
// ──────────────────────────────────────────────

/// Named ports available to the engine.
///
/// Built once at startup and shared read-only, so lookups take no lock.
#[derive(Clone, Default)]
pub struct PortRegistry {
    ports: HashMap<String, Arc<dyn Port>>,
    default_executor: Option<String>,
}

impl PortRegistry {
    pub fn new() -> Self {
        PortRegistry::default()
    }

    /// Register `port` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, port: Arc<dyn Port>) -> &mut Self {
        self.ports.insert(name.into(), port);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, port: Arc<dyn Port>) -> Self {
        self.register(name, port);
        self
    }

    /// Port used for operations that do not name one.
    pub fn with_default_executor(mut self, name: impl Into<String>) -> Self {
        self.default_executor = Some(name.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Port>> {
        self.ports.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ports.contains_key(name)
    }

    /// Port names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve the port that executes `operation`.
    pub fn executor_for(
        &self,
        operation: &str,
        def: &OperationDef,
    ) -> Result<(String, Arc<dyn Port>), ConfigError> {
        let name = def
            .port
            .as_deref()
            .or(self.default_executor.as_deref())
            .ok_or_else(|| ConfigError::NoExecutor {
                operation: operation.to_string(),
            })?;
        let port = self.get(name).ok_or_else(|| ConfigError::NoExecutor {
            operation: operation.to_string(),
        })?;
        Ok((name.to_string(), port))
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry")
            .field("ports", &self.names())
            .field("default_executor", &self.default_executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Value);

    #[async_trait]
    impl Port for Fixed {
        async fn get(&self, _fact: &str, _input: &Input) -> Result<Value, PortError> {
            Ok(self.0.clone())
        }

        async fn execute(&self, _operation: &str, _input: &Input) -> Result<Value, PortError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn executor_resolution() {
        let registry = PortRegistry::new()
            .with("repo", Arc::new(Fixed(json!(1))))
            .with("exec", Arc::new(Fixed(json!(2))))
            .with_default_executor("exec");

        let named = OperationDef {
            port: Some("repo".into()),
            ..OperationDef::default()
        };
        assert_eq!(registry.executor_for("Op", &named).unwrap().0, "repo");
        assert_eq!(
            registry
                .executor_for("Op", &OperationDef::default())
                .unwrap()
                .0,
            "exec"
        );

        let missing = OperationDef {
            port: Some("ghost".into()),
            ..OperationDef::default()
        };
        assert!(matches!(
            registry.executor_for("Op", &missing),
            Err(ConfigError::NoExecutor { .. })
        ));
        assert_eq!(registry.names(), vec!["exec", "repo"]);
    }

    #[tokio::test]
    async fn default_transition_is_noop() {
        let port = Fixed(json!(null));
        let t = AppliedTransition {
            entity: "Invoice".into(),
            from: Some("approved".into()),
            to: "paid".into(),
        };
        assert_eq!(port.transition("Op", &t, &Input::new()).await, Ok(()));
    }
}
