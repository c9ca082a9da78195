use chrono::{DateTime, Utc};

use crate::message::MessageStatus;
use crate::model::{Position, Positioned, StreamId, ThreadId};
use crate::part::Part;

/// Lifecycle status of a stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Streaming,
    Finished,
    Aborted,
}

impl StreamStatus {
    /// Status that messages reconstructed from a stream in this state carry.
    pub fn message_status(self) -> MessageStatus {
        match self {
            StreamStatus::Streaming => MessageStatus::Pending,
            StreamStatus::Finished => MessageStatus::Success,
            StreamStatus::Aborted => MessageStatus::Failed,
        }
    }
}

/// Model/provider details recorded when a stream is created.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Options forwarded to the provider for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_options: Option<serde_json::Value>,
}

/// Arguments for creating a stream record.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NewStream {
    pub thread_id: ThreadId,
    pub order: u64,
    pub step_order: u64,
    #[serde(default)]
    pub metadata: StreamMetadata,
}

impl NewStream {
    pub fn new(thread_id: impl Into<ThreadId>, order: u64, step_order: u64) -> Self {
        Self {
            thread_id: thread_id.into(),
            order,
            step_order,
            metadata: StreamMetadata::default(),
        }
    }

    pub fn metadata(mut self, metadata: StreamMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Descriptor of one generation step's stream as listed by the store.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamMessage {
    pub stream_id: StreamId,
    pub thread_id: ThreadId,
    pub order: u64,
    pub step_order: u64,
    pub status: StreamStatus,
    #[serde(default)]
    pub metadata: StreamMetadata,
    pub created_at: DateTime<Utc>,
}

impl Positioned for StreamMessage {
    fn position(&self) -> Position {
        Position::new(self.order, self.step_order)
    }
}

/// Immutable chunk of parts covering cursor range `[start, end)`.
///
/// `end - start` counts parts as they were emitted; after compaction
/// `parts` may hold fewer entries.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamDelta {
    pub stream_id: StreamId,
    pub start: u64,
    pub end: u64,
    pub parts: Vec<Part>,
}

/// Resume point for fetching one stream's chunks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StreamCursor {
    pub stream_id: StreamId,
    pub cursor: u64,
}
