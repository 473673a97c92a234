//! Append-only JSON-lines audit file.
//!
//! Each record is one line of JSON. The file is opened in append mode for
//! every write so an external log shipper can rotate it between writes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::AuditRecord;
use crate::traits::AuditSink;

/// Audit sink writing one JSON document per line.
///
/// Duplicate invocation ids are rejected against an in-memory index of
/// every id in the file. The index is built in full at [`open`] and grows
/// by one entry per appended record for the life of the sink, so memory
/// use is proportional to the file's record count. Rotate the file and
/// reopen the sink to bound it.
///
/// [`open`]: JsonLinesAuditLog::open
pub struct JsonLinesAuditLog {
    path: PathBuf,
    /// Invocation ids already written; also serializes writers.
    seen: Mutex<HashSet<String>>,
}

impl JsonLinesAuditLog {
    /// Open (or create) the log at `path`, indexing any records already in it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let existing = read_records(&path).await?;
        let seen = existing.into_iter().map(|r| r.invocation_id).collect();
        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of invocation ids held by the duplicate index.
    pub async fn indexed(&self) -> usize {
        self.seen.lock().await.len()
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

async fn read_records(path: &Path) -> Result<Vec<AuditRecord>, StorageError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StorageError::from))
        .collect()
}

#[async_trait]
impl AuditSink for JsonLinesAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), StorageError> {
        let mut seen = self.seen.lock().await;
        if seen.contains(&record.invocation_id) {
            return Err(StorageError::DuplicateInvocation {
                invocation_id: record.invocation_id,
            });
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        seen.insert(record.invocation_id);
        Ok(())
    }

    async fn records(&self) -> Result<Vec<AuditRecord>, StorageError> {
        // Hold the writer lock so a half-written line is never read.
        let _guard = self.seen.lock().await;
        read_records(&self.path).await
    }
}
