//! Versioned contract snapshot with atomic swap.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Contract;

/// Opaque contract version token, compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractVersion(String);

impl ContractVersion {
    pub fn new(etag: impl Into<String>) -> Self {
        ContractVersion(etag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractVersion {
    fn from(s: &str) -> Self {
        ContractVersion(s.to_string())
    }
}

impl From<String> for ContractVersion {
    fn from(s: String) -> Self {
        ContractVersion(s)
    }
}

/// A contract paired with the version it was loaded under.
#[derive(Debug)]
pub struct ContractSnapshot {
    pub contract: Contract,
    pub version: ContractVersion,
}

/// Holds the active contract.
///
/// `load` replaces the snapshot wholesale; `current` hands out an `Arc` so
/// an in-flight invocation keeps using the pair it captured even if a reload
/// happens mid-evaluation. The lock is held only to clone or swap the `Arc`.
#[derive(Debug, Default)]
pub struct ContractStore {
    active: RwLock<Option<Arc<ContractSnapshot>>>,
}

impl ContractStore {
    pub fn new() -> Self {
        ContractStore::default()
    }

    /// Store pre-loaded with `contract`.
    pub fn with_contract(contract: Contract, version: impl Into<ContractVersion>) -> Self {
        let store = ContractStore::new();
        store.load(contract, version);
        store
    }

    /// Atomically replace the active contract and version.
    pub fn load(&self, contract: Contract, version: impl Into<ContractVersion>) {
        let snapshot = Arc::new(ContractSnapshot {
            contract,
            version: version.into(),
        });
        info!(
            contract_version = %snapshot.version,
            facts = snapshot.contract.facts.len(),
            rules = snapshot.contract.rules.len(),
            operations = snapshot.contract.operations.len(),
            "contract loaded"
        );
        let mut guard = self.active.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(snapshot);
    }

    /// The active snapshot, if a contract has been loaded.
    pub fn current(&self) -> Option<Arc<ContractSnapshot>> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn version(&self) -> Option<ContractVersion> {
        self.current().map(|s| s.version.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }
}
