//! Verdicts produced by matched rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::contract::{ErrorEnvelope, RuleDef, VerdictDef};

/// Verdict kind. Variants are declared in ascending priority so the derived
/// `Ord` ranks `Deny > Escalate > Require > Flag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictType {
    Flag,
    Require,
    Escalate,
    Deny,
}

impl VerdictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictType::Flag => "flag",
            VerdictType::Require => "require",
            VerdictType::Escalate => "escalate",
            VerdictType::Deny => "deny",
        }
    }
}

impl fmt::Display for VerdictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verdict emitted by one matched rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "type")]
    pub verdict_type: VerdictType,
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

impl Verdict {
    /// Build the verdict a rule emits when its condition holds.
    pub fn from_rule(rule: &RuleDef) -> Verdict {
        let mut verdict = Verdict {
            verdict_type: VerdictType::Flag,
            rule_id: rule.id.clone(),
            code: None,
            reason: String::new(),
            error: None,
            queue: None,
            conditions: Vec::new(),
        };
        match &rule.verdict {
            VerdictDef::Deny(d) => {
                verdict.verdict_type = VerdictType::Deny;
                verdict.code = Some(d.code.clone());
                verdict.reason = d.reason.clone();
                verdict.error = Some(d.error.clone().unwrap_or_else(|| ErrorEnvelope {
                    code: d.code.clone(),
                    message: d.reason.clone(),
                    http_status: 403,
                    category: "business".to_string(),
                    retryable: false,
                    suggestion: None,
                }));
            }
            VerdictDef::Escalate(e) => {
                verdict.verdict_type = VerdictType::Escalate;
                verdict.code = e.code.clone();
                verdict.reason = e.reason.clone();
                verdict.queue = Some(e.queue.clone());
            }
            VerdictDef::Require(r) => {
                verdict.verdict_type = VerdictType::Require;
                verdict.code = r.code.clone();
                verdict.reason = r.reason.clone();
                verdict.conditions = r.conditions.clone();
            }
            VerdictDef::Flag(f) => {
                verdict.code = Some(f.code.clone());
                verdict.reason = f.reason.clone();
            }
        }
        verdict
    }
}

/// Verdicts after priority resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Highest-priority verdict type present, if any rule matched.
    pub winning: Option<VerdictType>,
    /// All verdicts, highest priority first; ties keep rule order.
    pub verdicts: Vec<Verdict>,
}

impl Resolution {
    /// Verdicts of the winning type, in rule order.
    pub fn winners(&self) -> impl Iterator<Item = &Verdict> {
        let winning = self.winning;
        self.verdicts
            .iter()
            .filter(move |v| Some(v.verdict_type) == winning)
    }

    /// First verdict of the winning type.
    pub fn primary(&self) -> Option<&Verdict> {
        self.winners().next()
    }

    pub fn flags(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts
            .iter()
            .filter(|v| v.verdict_type == VerdictType::Flag)
    }
}
