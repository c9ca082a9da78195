//! Common imports for reading and rendering threads.
pub use crate::{
    FoldState, MessageDoc, MessageStatus, Part, Role, StreamCursor, StreamDelta, StreamId,
    StreamMessage, StreamMetadata, StreamStatus, ThreadId, ToolState, UiMessage, UiPart,
    apply_deltas, combine_feed, merge_streams, to_ui_messages,
};
