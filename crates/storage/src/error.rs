/// All errors that can be returned by an AuditSink implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying file or device could not be written or read.
    #[error("audit io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded or a stored line could not be decoded.
    #[error("audit record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record with this invocation id was already appended.
    #[error("duplicate audit record for invocation {invocation_id}")]
    DuplicateInvocation { invocation_id: String },

    /// A backend-specific storage error.
    #[error("audit backend error: {0}")]
    Backend(String),
}
