//! Reconstruction of live messages from a stream's chunks.
//!
//! [`apply_deltas`] is a pure `(state, chunks) -> (state', changed)` fold:
//! callers own the prior [`FoldState`] and hand it back on every call. The
//! same chunk set can be applied any number of times; chunks that add
//! nothing leave the state untouched and report `changed = false`.

use tracing::{debug, warn};

use crate::message::{Content, ContentNode, Message, MessageDoc, MessageStatus, Role, ToolArgs};
use crate::model::{Position, StreamId, ThreadId};
use crate::part::Part;
use crate::stream::{StreamDelta, StreamMessage, StreamStatus};

const UNKNOWN_TOOL: &str = "unknown";

/// A reader's materialized view of one stream plus its resume cursor.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FoldState {
    pub stream_id: StreamId,
    pub cursor: u64,
    /// Stream status the messages were last folded with.
    pub status: StreamStatus,
    pub messages: Vec<MessageDoc>,
}

impl FoldState {
    /// State before any chunk of `stream` has been applied.
    pub fn empty(stream: &StreamMessage) -> Self {
        Self {
            stream_id: stream.stream_id.clone(),
            cursor: 0,
            status: stream.status,
            messages: Vec::new(),
        }
    }
}

/// Folds newly fetched `deltas` of `stream` into `existing`.
///
/// Chunks are applied in `start` order and only when `start` equals the
/// current cursor. Duplicates (`end <= cursor`), gaps (`start > cursor`),
/// partial overlaps and empty chunks are skipped with a diagnostic.
pub fn apply_deltas(
    thread_id: &ThreadId,
    stream: &StreamMessage,
    existing: Option<&FoldState>,
    deltas: &[StreamDelta],
) -> (FoldState, bool) {
    let existing = existing.filter(|state| {
        let same = state.stream_id == stream.stream_id;
        if !same {
            warn!(stream_id = %stream.stream_id, other = %state.stream_id, "ignoring fold state of another stream");
        }
        same
    });

    let start_cursor = existing.map_or(0, |state| state.cursor);
    let (cursor, parts) = applicable_parts(&stream.stream_id, start_cursor, deltas);
    let advanced = cursor != start_cursor;
    let status_changed = existing.is_some_and(|state| state.status != stream.status);

    if !advanced && !status_changed {
        let unchanged = existing
            .cloned()
            .unwrap_or_else(|| FoldState::empty(stream));
        return (unchanged, false);
    }

    let mut folder = Folder {
        thread_id,
        stream,
        messages: existing.map(|state| state.messages.clone()).unwrap_or_default(),
    };
    for part in parts {
        folder.apply(part);
    }
    let mut messages = folder.messages;
    refresh_status(&mut messages, stream.status);

    let state = FoldState {
        stream_id: stream.stream_id.clone(),
        cursor,
        status: stream.status,
        messages,
    };
    (state, true)
}

fn applicable_parts(stream_id: &StreamId, mut cursor: u64, deltas: &[StreamDelta]) -> (u64, Vec<Part>) {
    let mut ordered: Vec<&StreamDelta> = deltas
        .iter()
        .filter(|delta| {
            let own = delta.stream_id == *stream_id;
            if !own {
                warn!(stream_id = %stream_id, other = %delta.stream_id, "ignoring chunk addressed to another stream");
            }
            own
        })
        .collect();
    ordered.sort_by_key(|delta| delta.start);

    let mut parts = Vec::new();
    for delta in ordered {
        if delta.parts.is_empty() || delta.end <= delta.start {
            warn!(stream_id = %stream_id, start = delta.start, end = delta.end, "skipping empty chunk");
            continue;
        }
        if delta.start == cursor {
            cursor = delta.end;
            parts.extend(delta.parts.iter().cloned());
        } else if delta.end <= cursor {
            debug!(stream_id = %stream_id, start = delta.start, end = delta.end, cursor, "duplicate chunk");
        } else if delta.start > cursor {
            warn!(stream_id = %stream_id, start = delta.start, cursor, "chunk leaves a gap");
        } else {
            warn!(stream_id = %stream_id, start = delta.start, end = delta.end, cursor, "chunk partially overlaps applied range");
        }
    }
    (cursor, parts)
}

fn refresh_status(messages: &mut [MessageDoc], status: StreamStatus) {
    for message in messages {
        message.streaming = status == StreamStatus::Streaming;
        if message.error.is_none() {
            message.status = status.message_status();
        }
    }
}

struct Folder<'a> {
    thread_id: &'a ThreadId,
    stream: &'a StreamMessage,
    messages: Vec<MessageDoc>,
}

impl Folder<'_> {
    fn apply(&mut self, part: Part) {
        if let Part::ToolError { id, name, input, .. } = &part
            && self.find_call(id, name).is_none()
        {
            warn!(stream_id = %self.stream.stream_id, tool_call_id = %id, tool_name = %name, "tool error without preceding tool call");
            self.apply(Part::ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            });
        }
        let role = part.implied_role();
        if self
            .messages
            .last()
            .is_none_or(|current| current.message.role != role)
        {
            self.open(role);
        }
        let current = self.messages.len() - 1;

        match part {
            Part::TextDelta { text } => {
                let message = &mut self.messages[current];
                message.text.get_or_insert_with(String::new).push_str(&text);
                let nodes = message.message.content.nodes_mut();
                if let Some(ContentNode::Text { text: last }) = nodes.last_mut() {
                    last.push_str(&text);
                } else {
                    nodes.push(ContentNode::Text { text });
                }
            }
            Part::ReasoningDelta { text } => {
                let message = &mut self.messages[current];
                message
                    .reasoning
                    .get_or_insert_with(String::new)
                    .push_str(&text);
                let nodes = message.message.content.nodes_mut();
                if let Some(ContentNode::Reasoning { text: last }) = nodes.last_mut() {
                    last.push_str(&text);
                } else {
                    nodes.push(ContentNode::Reasoning { text });
                }
            }
            Part::ToolCallStart { id, name } => {
                let message = &mut self.messages[current];
                message.tool = true;
                if call_index(message, &id).is_some() {
                    warn!(stream_id = %self.stream.stream_id, tool_call_id = %id, "duplicate tool-call-start");
                    return;
                }
                message.message.content.nodes_mut().push(ContentNode::ToolCall {
                    tool_call_id: id,
                    tool_name: name,
                    args: ToolArgs::Partial(String::new()),
                });
            }
            Part::ToolCallDelta { id, delta } => {
                let message = &mut self.messages[current];
                message.tool = true;
                let nodes = message.message.content.nodes_mut();
                match call_index_in(nodes, &id).map(|index| &mut nodes[index]) {
                    Some(ContentNode::ToolCall {
                        args: ToolArgs::Partial(buffer),
                        ..
                    }) => buffer.push_str(&delta),
                    Some(_) => {
                        warn!(stream_id = %self.stream.stream_id, tool_call_id = %id, "tool-call-delta after the call completed");
                    }
                    None => {
                        warn!(stream_id = %self.stream.stream_id, tool_call_id = %id, "tool-call-delta without tool-call-start");
                        nodes.push(ContentNode::ToolCall {
                            tool_call_id: id,
                            tool_name: UNKNOWN_TOOL.to_string(),
                            args: ToolArgs::Partial(delta),
                        });
                    }
                }
            }
            Part::ToolCall { id, name, input } => {
                let message = &mut self.messages[current];
                message.tool = true;
                let nodes = message.message.content.nodes_mut();
                match call_index_in(nodes, &id).map(|index| &mut nodes[index]) {
                    Some(ContentNode::ToolCall {
                        tool_name, args, ..
                    }) => {
                        *tool_name = name;
                        *args = ToolArgs::Complete(input);
                    }
                    _ => nodes.push(ContentNode::ToolCall {
                        tool_call_id: id,
                        tool_name: name,
                        args: ToolArgs::Complete(input),
                    }),
                }
            }
            Part::ToolResult {
                id,
                name,
                output,
                is_error,
            } => {
                if self.find_call(&id, &name).is_none() {
                    warn!(stream_id = %self.stream.stream_id, tool_call_id = %id, tool_name = %name, "tool result without preceding tool call");
                }
                let message = &mut self.messages[current];
                message.tool = true;
                message.message.content.nodes_mut().push(ContentNode::ToolResult {
                    tool_call_id: id,
                    tool_name: name,
                    output,
                    is_error,
                });
            }
            Part::ToolError {
                id,
                name,
                input,
                error,
            } => {
                if let Some((message_index, node_index)) = self.find_call(&id, &name)
                    && let ContentNode::ToolCall { args, .. } =
                        &mut self.messages[message_index].message.content.nodes_mut()[node_index]
                    && !args.is_complete()
                    && !input.is_null()
                {
                    *args = ToolArgs::Complete(input);
                }
                let message = &mut self.messages[current];
                message.tool = true;
                message.message.content.nodes_mut().push(ContentNode::ToolResult {
                    tool_call_id: id,
                    tool_name: name,
                    output: serde_json::Value::String(error),
                    is_error: true,
                });
            }
            Part::Source { source } => {
                let message = &mut self.messages[current];
                message.tool = true;
                message.sources.push(source);
            }
            Part::Raw { .. } => {
                debug!(stream_id = %self.stream.stream_id, "dropping raw part");
            }
            Part::Error { message: error } => {
                let message = &mut self.messages[current];
                message.status = MessageStatus::Failed;
                message.error = Some(error);
            }
            Part::Abort => {
                let message = &mut self.messages[current];
                message.status = MessageStatus::Failed;
                message.error = Some("abort".to_string());
            }
        }
    }

    fn open(&mut self, role: Role) {
        let index = self.messages.len() as u64;
        let stream = self.stream;
        let mut message = MessageDoc::new(
            format!("{}-{}", stream.stream_id, index),
            self.thread_id.clone(),
            Position::new(stream.order, stream.step_order + index),
            stream.status.message_status(),
            Message::new(role, Content::Nodes(Vec::new())),
            stream.created_at,
        );
        message.model = stream.metadata.model.clone();
        message.provider = stream.metadata.provider.clone();
        message.agent_name = stream.metadata.agent_name.clone();
        message.streaming = stream.status == StreamStatus::Streaming;
        self.messages.push(message);
    }

    /// Locates the call node `(id, name)` in this stream, newest first.
    fn find_call(&self, id: &str, name: &str) -> Option<(usize, usize)> {
        self.messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(message_index, message)| {
                message
                    .message
                    .content
                    .nodes()
                    .iter()
                    .rposition(|node| {
                        matches!(node, ContentNode::ToolCall { tool_call_id, tool_name, .. }
                            if tool_call_id == id && tool_name == name)
                    })
                    .map(|node_index| (message_index, node_index))
            })
    }
}

fn call_index(message: &MessageDoc, id: &str) -> Option<usize> {
    call_index_in(message.message.content.nodes(), id)
}

fn call_index_in(nodes: &[ContentNode], id: &str) -> Option<usize> {
    nodes.iter().rposition(
        |node| matches!(node, ContentNode::ToolCall { tool_call_id, .. } if tool_call_id == id),
    )
}
