pub mod conformance;
mod error;
mod jsonl;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use jsonl::JsonLinesAuditLog;
pub use memory::InMemoryAuditLog;
pub use record::{AuditRecord, TransitionRecord};
pub use traits::AuditSink;
