//! Persistence contract shared by the writer and readers.

use threadstream_core::{
    MessageDoc, NewStream, StreamCursor, StreamDelta, StreamId, StreamMessage, StreamStatus,
    ThreadId,
};

use crate::errors::StoreError;

/// Acknowledgement of an append.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendOutcome {
    Appended,
    /// The stream is no longer streaming; the chunk was not stored.
    Rejected,
}

/// Filter for listing a thread's streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamListQuery {
    pub thread_id: ThreadId,
    /// Streams with a lower `order` are not returned.
    pub start_order: u64,
    pub include_statuses: Vec<StreamStatus>,
}

impl StreamListQuery {
    /// Streaming streams of `thread_id` from order 0.
    pub fn new(thread_id: impl Into<ThreadId>) -> Self {
        Self {
            thread_id: thread_id.into(),
            start_order: 0,
            include_statuses: vec![StreamStatus::Streaming],
        }
    }

    pub fn start_order(mut self, start_order: u64) -> Self {
        self.start_order = start_order;
        self
    }

    pub fn include_statuses(mut self, statuses: impl Into<Vec<StreamStatus>>) -> Self {
        self.include_statuses = statuses.into();
        self
    }

    pub fn matches(&self, stream: &StreamMessage) -> bool {
        stream.thread_id == self.thread_id
            && stream.order >= self.start_order
            && self.include_statuses.contains(&stream.status)
    }
}

/// Pagination over finalized messages, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageOptions {
    /// Continuation cursor from a previous page; `None` starts at the newest.
    pub cursor: Option<String>,
    pub num_items: usize,
}

impl PageOptions {
    pub fn first(num_items: usize) -> Self {
        Self {
            cursor: None,
            num_items,
        }
    }
}

/// One page of finalized messages in ascending position order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<MessageDoc>,
    /// Cursor for the next (older) page.
    pub continue_cursor: Option<String>,
    pub is_done: bool,
}

/// Storage collaborator for streams, their chunks and finalized messages.
///
/// Only the writer that created a stream appends to it. Readers use the
/// listing and fetch operations and never mutate.
#[async_trait::async_trait]
pub trait StreamStore: Send + Sync {
    /// Creates a stream record in `streaming` status.
    async fn create_stream(&self, stream: NewStream) -> Result<StreamId, StoreError>;

    /// Appends the chunk `[start, end)`.
    ///
    /// Returns `Rejected` when the stream is no longer streaming. A chunk
    /// whose `start` is not the stream's next cursor is a `Conflict`.
    async fn append_delta(&self, delta: StreamDelta) -> Result<AppendOutcome, StoreError>;

    async fn mark_finished(&self, stream_id: &StreamId) -> Result<(), StoreError>;

    /// Aborts a streaming stream. Returns false if it was not streaming.
    async fn mark_aborted(&self, stream_id: &StreamId, reason: &str) -> Result<bool, StoreError>;

    /// Aborts every streaming stream of one turn. Returns whether any was
    /// aborted.
    async fn abort_by_order(
        &self,
        thread_id: &ThreadId,
        order: u64,
        reason: &str,
    ) -> Result<bool, StoreError>;

    /// Streams matching `query`, sorted by position.
    async fn list_active_streams(
        &self,
        query: &StreamListQuery,
    ) -> Result<Vec<StreamMessage>, StoreError>;

    /// Chunks with `start >= cursor` for each requested stream.
    async fn fetch_deltas(
        &self,
        thread_id: &ThreadId,
        cursors: &[StreamCursor],
    ) -> Result<Vec<StreamDelta>, StoreError>;

    async fn fetch_finalized_messages(
        &self,
        thread_id: &ThreadId,
        page: &PageOptions,
    ) -> Result<MessagePage, StoreError>;
}
