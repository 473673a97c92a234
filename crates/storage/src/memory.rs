//! In-process audit log, used by tests and by executors configured without
//! a durable sink.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::AuditRecord;
use crate::traits::AuditSink;

#[derive(Default)]
struct Inner {
    records: Vec<AuditRecord>,
    seen: HashSet<String>,
}

/// Audit sink that keeps every record in memory.
#[derive(Default)]
pub struct InMemoryAuditLog {
    inner: Mutex<Inner>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Find the record for one invocation.
    pub async fn find(&self, invocation_id: &str) -> Option<AuditRecord> {
        self.inner
            .lock()
            .await
            .records
            .iter()
            .find(|r| r.invocation_id == invocation_id)
            .cloned()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(record.invocation_id.clone()) {
            return Err(StorageError::DuplicateInvocation {
                invocation_id: record.invocation_id,
            });
        }
        inner.records.push(record);
        Ok(())
    }

    async fn records(&self) -> Result<Vec<AuditRecord>, StorageError> {
        Ok(self.inner.lock().await.records.clone())
    }
}
