use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::AuditRecord;

/// Destination for executor audit records.
///
/// ## Append-only
///
/// Records are never updated or removed. `append` must reject a second record
/// carrying an invocation id that was already stored
/// (`StorageError::DuplicateInvocation`): one invocation, one record.
///
/// ## Ordering
///
/// `records` returns records in append order. Concurrent appends from
/// independent invocations carry no ordering guarantee relative to each
/// other, but every successful append must be visible afterwards.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so one sink can be shared
/// by every in-flight invocation.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Persist one record.
    async fn append(&self, record: AuditRecord) -> Result<(), StorageError>;

    /// Read back every stored record in append order.
    async fn records(&self) -> Result<Vec<AuditRecord>, StorageError>;
}
