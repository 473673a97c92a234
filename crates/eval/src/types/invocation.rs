//! Request and response shapes for a single invocation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::contract::ErrorEnvelope;
use super::verdict::Verdict;

/// Flat request payload. Keys are fact names such as `invoice.id`.
pub type Input = Map<String, Value>;

/// An operation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub operation: String,
    #[serde(default)]
    pub input: Input,
    #[serde(default)]
    pub dry_run: bool,
    /// Optimistic-concurrency guard against the loaded contract etag.
    #[serde(
        default,
        alias = "contract_etag",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_contract_version: Option<String>,
}

impl Request {
    pub fn new(operation: impl Into<String>) -> Self {
        Request {
            operation: operation.into(),
            ..Request::default()
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn expecting_version(mut self, etag: impl Into<String>) -> Self {
        self.expected_contract_version = Some(etag.into());
        self
    }
}

/// Terminal outcome of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Executed,
    Denied,
    Escalated,
    Required,
    Rejected,
    SystemError,
    WouldExecute,
    WouldExecuteWithFlags,
    WouldDeny,
    WouldEscalate,
    WouldRequire,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Executed => "executed",
            Outcome::Denied => "denied",
            Outcome::Escalated => "escalated",
            Outcome::Required => "required",
            Outcome::Rejected => "rejected",
            Outcome::SystemError => "system_error",
            Outcome::WouldExecute => "would_execute",
            Outcome::WouldExecuteWithFlags => "would_execute_with_flags",
            Outcome::WouldDeny => "would_deny",
            Outcome::WouldEscalate => "would_escalate",
            Outcome::WouldRequire => "would_require",
        }
    }

    /// True for outcomes only a dry run can produce.
    pub fn is_dry_run(&self) -> bool {
        matches!(
            self,
            Outcome::WouldExecute
                | Outcome::WouldExecuteWithFlags
                | Outcome::WouldDeny
                | Outcome::WouldEscalate
                | Outcome::WouldRequire
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invocation result returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verdicts: Vec<Verdict>,
    /// Present on dry runs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_snapshot: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<AppliedTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_version: Option<String>,
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl Response {
    /// HTTP status a transport should use for this response.
    pub fn http_status(&self) -> u16 {
        match &self.error {
            Some(envelope) => envelope.http_status,
            None => match self.outcome {
                Outcome::Escalated => 202,
                _ => 200,
            },
        }
    }
}

/// An entity transition applied (or, for dry runs, that would be applied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTransition {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
}
