//! Read-path building blocks for live conversation threads.
//!
//! A generation step is persisted as an ordered series of cursor-addressed
//! chunks. Readers fold those chunks into provisional messages, merge them
//! with finalized history and group the result into display turns.
//!
//! ```
//! use threadstream_core::prelude::*;
//!
//! let thread = ThreadId::new("t1");
//! let stream = StreamMessage {
//!     stream_id: StreamId::new("s1"),
//!     thread_id: thread.clone(),
//!     order: 1,
//!     step_order: 0,
//!     status: StreamStatus::Streaming,
//!     metadata: StreamMetadata::default(),
//!     created_at: chrono::Utc::now(),
//! };
//! let chunk = StreamDelta {
//!     stream_id: StreamId::new("s1"),
//!     start: 0,
//!     end: 2,
//!     parts: vec![Part::text_delta("Hello"), Part::text_delta(" World!")],
//! };
//!
//! let (state, changed) = apply_deltas(&thread, &stream, None, &[chunk]);
//! assert!(changed);
//! let feed = combine_feed(&[], &state.messages);
//! let turns = to_ui_messages(&feed);
//! assert_eq!(turns[0].text, "Hello World!");
//! ```

/// Incremental reconstruction of live messages from stream chunks.
pub mod fold;
/// Merging live reconstructions with finalized history.
pub mod merge;
/// Persisted message shape shared by finalized and live messages.
pub mod message;
/// Identifiers and thread positions.
pub mod model;
/// Logging setup.
pub mod observability;
/// Stream parts emitted by a generation step.
pub mod part;
/// Common imports for typical usage.
pub mod prelude;
/// Stream records, chunks and cursors.
pub mod stream;
/// Tool call and result pairing.
pub mod tool;
/// Display turns built from step messages.
pub mod ui;

pub use fold::{FoldState, apply_deltas};
pub use merge::{MergedStreams, combine_feed, merge_streams, next_cursors, stream_start_order};
pub use message::{
    Content, ContentNode, Message, MessageDoc, MessageStatus, Role, Source, ToolArgs, Usage,
};
pub use model::{Position, Positioned, StreamId, ThreadId, sorted};
pub use observability::{LogOutput, LogSettings, init_observability, init_with};
pub use part::{Part, compact_parts};
pub use stream::{NewStream, StreamCursor, StreamDelta, StreamMessage, StreamMetadata, StreamStatus};
pub use tool::{ToolInvocation, ToolState, tool_invocations};
pub use ui::{PartState, UiMessage, UiPart, UiRole, UiStatus, to_ui_messages};
