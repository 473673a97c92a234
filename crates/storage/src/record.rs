use serde::{Deserialize, Serialize};

/// One audit record per executor invocation, live or dry-run.
///
/// Records are immutable once produced. Executors emit exactly one record per
/// invocation regardless of which terminal state the invocation reached, and
/// side-effect adapters never emit their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub invocation_id: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub timestamp: String,
    pub identity: Option<String>,
    pub persona: Option<String>,
    pub operation: String,
    pub dry_run: bool,
    pub input_payload: serde_json::Value,
    /// Contract version token in effect. None if no contract was loaded.
    pub contract_version: Option<String>,
    pub fact_snapshot: serde_json::Value,
    /// Facts recorded as absent under a `skip` missing-fact policy.
    #[serde(default)]
    pub absent_facts: Vec<String>,
    /// Verdicts in resolution order (highest priority first).
    pub verdicts: serde_json::Value,
    pub matched_rules: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
    /// Result of the side effect, kept even when a later transition failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub outcome: String,
    pub error_code: Option<String>,
    /// Error taxonomy class, e.g. `fact_unavailable` or `business_denial`.
    pub error_class: Option<String>,
    pub duration_ms: u64,
}

/// An entity state change recorded after a successful side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub entity: String,
    pub from: Option<String>,
    pub to: String,
}
