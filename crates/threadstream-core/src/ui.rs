//! Grouping of step-ordered messages into display turns.
//!
//! A user or system message stands alone. A run of assistant and tool
//! messages within one `order` folds into a single assistant turn whose parts
//! interleave text, reasoning, files, sources and tool invocations. The run
//! ends at the first assistant message that makes no tool call, so the next
//! exchange always starts a fresh turn.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::message::{Content, ContentNode, MessageDoc, MessageStatus, Role, Source};
use crate::model::{Position, Positioned, sorted};
use crate::tool::{ToolInvocation, result_error};

/// Role of a display turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiRole {
    User,
    Assistant,
    System,
}

/// Status of a display turn; `streaming` while its last step is live.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiStatus {
    Streaming,
    Pending,
    Success,
    Failed,
}

impl From<MessageStatus> for UiStatus {
    fn from(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Pending => UiStatus::Pending,
            MessageStatus::Success => UiStatus::Success,
            MessageStatus::Failed => UiStatus::Failed,
        }
    }
}

/// Whether a text-like part may still grow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartState {
    Streaming,
    Done,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text {
        text: String,
        state: PartState,
    },
    Reasoning {
        text: String,
        state: PartState,
    },
    File {
        data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    SourceDocument {
        source_id: String,
        media_type: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Marks the boundary of a model step before a tool call.
    StepStart,
    Tool(ToolInvocation),
}

impl From<&Source> for UiPart {
    fn from(source: &Source) -> Self {
        match source {
            Source::Url { id, url, title } => UiPart::SourceUrl {
                source_id: id.clone(),
                url: url.clone(),
                title: title.clone(),
            },
            Source::Document {
                id,
                media_type,
                title,
                filename,
            } => UiPart::SourceDocument {
                source_id: id.clone(),
                media_type: media_type.clone(),
                title: title.clone(),
                filename: filename.clone(),
            },
        }
    }
}

/// One display turn.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub key: String,
    pub order: u64,
    pub step_order: u64,
    pub role: UiRole,
    pub status: UiStatus,
    pub text: String,
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UiMessage {
    /// Tool invocations of this turn in call order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            UiPart::Tool(invocation) => Some(invocation),
            _ => None,
        })
    }
}

impl Positioned for UiMessage {
    fn position(&self) -> Position {
        Position::new(self.order, self.step_order)
    }
}

enum Group<'a> {
    Single(&'a MessageDoc),
    Assistant(Vec<&'a MessageDoc>),
}

/// Materializes display turns from finalized and live messages.
pub fn to_ui_messages(messages: &[MessageDoc]) -> Vec<UiMessage> {
    let ordered = sorted(messages);
    group_messages(&ordered)
        .into_iter()
        .map(|group| match group {
            Group::Single(message) => single_ui_message(message),
            Group::Assistant(run) => assistant_ui_message(&run),
        })
        .collect()
}

fn group_messages(messages: &[MessageDoc]) -> Vec<Group<'_>> {
    let mut groups = Vec::new();
    let mut run: Vec<&MessageDoc> = Vec::new();

    for message in messages {
        match message.message.role {
            Role::User | Role::System => {
                if !run.is_empty() {
                    groups.push(Group::Assistant(std::mem::take(&mut run)));
                }
                groups.push(Group::Single(message));
            }
            Role::Assistant | Role::Tool => {
                if run.last().is_some_and(|last| last.order != message.order) {
                    groups.push(Group::Assistant(std::mem::take(&mut run)));
                }
                run.push(message);
                if message.message.role == Role::Assistant && !message.tool {
                    groups.push(Group::Assistant(std::mem::take(&mut run)));
                }
            }
        }
    }
    if !run.is_empty() {
        groups.push(Group::Assistant(run));
    }
    groups
}

fn part_state(message: &MessageDoc) -> PartState {
    if message.streaming {
        PartState::Streaming
    } else {
        PartState::Done
    }
}

fn status_of(message: &MessageDoc) -> UiStatus {
    if message.streaming {
        UiStatus::Streaming
    } else {
        message.status.into()
    }
}

fn single_ui_message(message: &MessageDoc) -> UiMessage {
    let text = message.display_text();
    let state = part_state(message);
    let role = if message.message.role == Role::System {
        UiRole::System
    } else {
        UiRole::User
    };

    let mut parts = Vec::new();
    match (&message.message.content, role) {
        (Content::Text(_), _) | (_, UiRole::System) => {
            if !text.is_empty() {
                parts.push(UiPart::Text {
                    text: text.clone(),
                    state,
                });
            }
        }
        (Content::Nodes(nodes), _) => {
            for node in nodes {
                match node {
                    ContentNode::Text { text } => parts.push(UiPart::Text {
                        text: text.clone(),
                        state,
                    }),
                    ContentNode::File {
                        data,
                        media_type,
                        filename,
                    } => parts.push(UiPart::File {
                        data: data.clone(),
                        media_type: media_type.clone(),
                        filename: filename.clone(),
                    }),
                    other => {
                        warn!(message_id = %message.id, node = ?other, "unexpected content node in user message");
                    }
                }
            }
        }
    }

    UiMessage {
        id: message.id.clone(),
        key: message.key(),
        order: message.order,
        step_order: message.step_order,
        role,
        status: status_of(message),
        text,
        parts,
        agent_name: message.agent_name.clone(),
        created_at: message.created_at,
    }
}

fn assistant_ui_message(run: &[&MessageDoc]) -> UiMessage {
    let first = run[0];
    let last = run[run.len() - 1];

    let mut parts: Vec<UiPart> = Vec::new();
    for message in run {
        append_parts(message, &mut parts);
    }

    let text = run
        .iter()
        .filter(|message| message.message.role != Role::Tool)
        .map(|message| message.display_text())
        .collect::<String>();

    UiMessage {
        id: first.id.clone(),
        key: first.key(),
        order: first.order,
        step_order: first.step_order,
        role: UiRole::Assistant,
        status: status_of(last),
        text,
        parts,
        agent_name: run.iter().find_map(|message| message.agent_name.clone()),
        created_at: first.created_at,
    }
}

fn append_parts(message: &MessageDoc, parts: &mut Vec<UiPart>) {
    let state = part_state(message);
    let nodes = message.message.content.nodes();

    if let Some(reasoning) = &message.reasoning
        && !reasoning.is_empty()
        && !nodes
            .iter()
            .any(|node| matches!(node, ContentNode::Reasoning { .. }))
    {
        parts.push(UiPart::Reasoning {
            text: reasoning.clone(),
            state,
        });
    }

    if let Content::Text(text) = &message.message.content
        && message.message.role != Role::Tool
    {
        let text = message.text.clone().unwrap_or_else(|| text.clone());
        if !text.is_empty() {
            parts.push(UiPart::Text { text, state });
        }
    }

    for node in nodes {
        match node {
            ContentNode::Text { text } => parts.push(UiPart::Text {
                text: text.clone(),
                state,
            }),
            ContentNode::Reasoning { text } => parts.push(UiPart::Reasoning {
                text: text.clone(),
                state,
            }),
            ContentNode::RedactedReasoning { .. } => {}
            ContentNode::File {
                data,
                media_type,
                filename,
            } => parts.push(UiPart::File {
                data: data.clone(),
                media_type: media_type.clone(),
                filename: filename.clone(),
            }),
            ContentNode::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => {
                parts.push(UiPart::StepStart);
                parts.push(UiPart::Tool(ToolInvocation::from_call(
                    tool_call_id,
                    tool_name,
                    args,
                    message.streaming,
                )));
            }
            ContentNode::ToolResult {
                tool_call_id,
                tool_name,
                output,
                is_error,
            } => {
                let error = result_error(output, *is_error, message.error.as_deref());
                let open = parts.iter_mut().rev().find_map(|part| match part {
                    UiPart::Tool(invocation) if invocation.matches(tool_call_id, tool_name) => {
                        Some(invocation)
                    }
                    _ => None,
                });
                match open {
                    Some(invocation) => invocation.resolve(output, error.as_deref()),
                    None => {
                        warn!(message_id = %message.id, tool_call_id = %tool_call_id, tool_name = %tool_name, "tool result without preceding tool call");
                        parts.push(UiPart::Tool(ToolInvocation::orphan(
                            tool_call_id,
                            tool_name,
                            output,
                            error.as_deref(),
                        )));
                    }
                }
            }
        }
    }

    parts.extend(message.sources.iter().map(UiPart::from));
}
