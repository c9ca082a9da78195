use threadstream_core::StreamId;

/// Errors reported by a stream store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The referenced stream or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The write conflicts with data already stored.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backend itself failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn stream_not_found(stream_id: &StreamId) -> Self {
        Self::NotFound(format!("stream {stream_id}"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Errors surfaced by the delta writer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The writer stopped accepting parts; nothing further is persisted.
    #[error("writer aborted: {reason}")]
    Aborted { reason: String },
}

impl WriterError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}
