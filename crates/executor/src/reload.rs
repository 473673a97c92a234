//! Contract file loading and polling.
//!
//! The version token of a loaded contract is the first 12 hex digits of the
//! SHA-256 of the file, unless a fixed etag is configured. A refresh whose
//! token matches the active version is skipped. A file that fails to parse
//! or validate leaves the active contract in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use covenant_eval::{load_contract, ContractLoadError, ContractStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const ETAG_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("could not read contract '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("contract '{}' is not valid UTF-8", path.display())]
    Encoding { path: PathBuf },

    #[error("contract '{}' rejected: {source}", path.display())]
    Load {
        path: PathBuf,
        source: ContractLoadError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadStatus {
    Loaded,
    Unchanged,
}

/// Content-derived version token.
pub fn compute_etag(bytes: &[u8]) -> String {
    let mut hex = format!("{:x}", Sha256::digest(bytes));
    hex.truncate(ETAG_LEN);
    hex
}

/// A contract file plus an optional pinned version token.
#[derive(Debug, Clone)]
pub struct ContractSource {
    path: PathBuf,
    fixed_etag: Option<String>,
}

impl ContractSource {
    pub fn new(path: impl Into<PathBuf>, fixed_etag: Option<String>) -> Self {
        ContractSource {
            path: path.into(),
            fixed_etag,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, validate, and install the contract into `store`.
    ///
    /// Without `force`, a file whose version token equals the active one is
    /// not reparsed.
    pub async fn refresh(
        &self,
        store: &ContractStore,
        force: bool,
    ) -> Result<ReloadStatus, ReloadError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| ReloadError::Read {
                path: self.path.clone(),
                source,
            })?;
        let etag = match &self.fixed_etag {
            Some(etag) => etag.clone(),
            None => compute_etag(&bytes),
        };

        if !force && store.version().is_some_and(|v| v.as_str() == etag) {
            debug!(%etag, "contract unchanged");
            return Ok(ReloadStatus::Unchanged);
        }

        let text = std::str::from_utf8(&bytes).map_err(|_| ReloadError::Encoding {
            path: self.path.clone(),
        })?;
        let contract = load_contract(text).map_err(|source| ReloadError::Load {
            path: self.path.clone(),
            source,
        })?;
        store.load(contract, etag.as_str());
        info!(%etag, path = %self.path.display(), "contract reloaded");
        Ok(ReloadStatus::Loaded)
    }
}

/// Refresh `store` from `source` every `every` until the task is dropped.
/// The first refresh happens one interval after the call.
pub async fn poll(source: Arc<ContractSource>, store: Arc<ContractStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = source.refresh(&store, false).await {
            warn!(
                error = %e,
                current = store.version().as_ref().map(|v| v.as_str()).unwrap_or("-"),
                "contract refresh failed, keeping active contract"
            );
        }
    }
}
