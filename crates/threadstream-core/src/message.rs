use chrono::{DateTime, Utc};

use crate::model::{Position, Positioned, ThreadId};

/// Author role of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// Persistence status of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Success,
    Failed,
}

/// Arguments of a tool call.
///
/// While the model is still emitting the call the arguments are an
/// unparsed text buffer; once the call completes they are a JSON value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolArgs {
    Partial(String),
    Complete(serde_json::Value),
}

impl ToolArgs {
    pub fn is_complete(&self) -> bool {
        matches!(self, ToolArgs::Complete(_))
    }

    /// Best-effort JSON view: complete arguments as-is, a partial buffer as
    /// parsed JSON when it already parses, else as a string.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            ToolArgs::Complete(value) => value.clone(),
            ToolArgs::Partial(buffer) => serde_json::from_str(buffer)
                .unwrap_or_else(|_| serde_json::Value::String(buffer.clone())),
        }
    }
}

/// A citation attached to a message.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum Source {
    Url {
        id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Document {
        id: String,
        media_type: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl Source {
    pub fn id(&self) -> &str {
        match self {
            Source::Url { id, .. } | Source::Document { id, .. } => id,
        }
    }
}

/// One typed node of structured message content.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentNode {
    Text {
        text: String,
    },
    File {
        data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Reasoning {
        text: String,
    },
    RedactedReasoning {
        data: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: ToolArgs,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// Message content: a bare string or an ordered list of nodes.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Nodes(Vec<ContentNode>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Nodes(Vec::new())
    }
}

impl Content {
    /// Structured nodes; a bare string has none.
    pub fn nodes(&self) -> &[ContentNode] {
        match self {
            Content::Text(_) => &[],
            Content::Nodes(nodes) => nodes,
        }
    }

    /// Mutable node list, converting a bare string into a text node first.
    pub fn nodes_mut(&mut self) -> &mut Vec<ContentNode> {
        if let Content::Text(text) = self {
            let text = std::mem::take(text);
            *self = Content::Nodes(if text.is_empty() {
                Vec::new()
            } else {
                vec![ContentNode::Text { text }]
            });
        }
        match self {
            Content::Nodes(nodes) => nodes,
            Content::Text(_) => unreachable!("converted above"),
        }
    }
}

/// A role plus its content.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn new(role: Role, content: Content) -> Self {
        Self { role, content }
    }

    /// Concatenated text nodes. Tool messages carry no text.
    pub fn extract_text(&self) -> Option<String> {
        match self.role {
            Role::Tool => None,
            _ => match &self.content {
                Content::Text(text) => Some(text.clone()),
                Content::Nodes(nodes) => Some(
                    nodes
                        .iter()
                        .filter_map(|node| match node {
                            ContentNode::Text { text } => Some(text.as_str()),
                            _ => None,
                        })
                        .collect(),
                ),
            },
        }
    }

    /// True for tool messages and for assistant messages that call a tool.
    pub fn is_tool(&self) -> bool {
        self.role == Role::Tool
            || (self.role == Role::Assistant
                && self
                    .content
                    .nodes()
                    .iter()
                    .any(|node| matches!(node, ContentNode::ToolCall { .. })))
    }
}

/// Token accounting reported for a generation step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Atomic persisted message record, or a live message reconstructed from a
/// stream that has the same shape.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageDoc {
    pub id: String,
    pub thread_id: ThreadId,
    pub order: u64,
    pub step_order: u64,
    pub status: MessageStatus,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Whether the message takes part in a tool round-trip.
    #[serde(default)]
    pub tool: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Set on live messages whose stream is still generating.
    #[serde(default)]
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageDoc {
    /// Creates a message with no optional fields set.
    pub fn new(
        id: impl Into<String>,
        thread_id: ThreadId,
        position: Position,
        status: MessageStatus,
        message: Message,
        created_at: DateTime<Utc>,
    ) -> Self {
        let tool = message.is_tool();
        let text = message.extract_text().filter(|text| !text.is_empty());
        Self {
            id: id.into(),
            thread_id,
            order: position.order,
            step_order: position.step_order,
            status,
            message,
            text,
            reasoning: None,
            sources: Vec::new(),
            tool,
            usage: None,
            error: None,
            model: None,
            provider: None,
            agent_name: None,
            streaming: false,
            created_at,
        }
    }

    /// Stable display key `"{thread}-{order}-{step_order}"`.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.thread_id, self.order, self.step_order)
    }

    /// Cached text if present, else text extracted from the content.
    pub fn display_text(&self) -> String {
        self.text
            .clone()
            .filter(|text| !text.is_empty())
            .or_else(|| self.message.extract_text())
            .unwrap_or_default()
    }
}

impl Positioned for MessageDoc {
    fn position(&self) -> Position {
        Position::new(self.order, self.step_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_text_skips_non_text_nodes_and_tool_messages() {
        let assistant = Message::new(
            Role::Assistant,
            Content::Nodes(vec![
                ContentNode::Text { text: "a".into() },
                ContentNode::Reasoning { text: "think".into() },
                ContentNode::Text { text: "b".into() },
            ]),
        );
        assert_eq!(assistant.extract_text().as_deref(), Some("ab"));

        let tool = Message::new(Role::Tool, Content::Text("ignored".into()));
        assert_eq!(tool.extract_text(), None);
    }

    #[test]
    fn is_tool_detects_tool_calls() {
        let call = Message::new(
            Role::Assistant,
            Content::Nodes(vec![ContentNode::ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                args: ToolArgs::Complete(json!({"q": "rust"})),
            }]),
        );
        assert!(call.is_tool());
        assert!(!Message::new(Role::Assistant, Content::Text("hi".into())).is_tool());
    }

    #[test]
    fn nodes_mut_promotes_bare_string() {
        let mut content = Content::Text("hello".into());
        content.nodes_mut().push(ContentNode::Text { text: "!".into() });
        assert_eq!(content.nodes().len(), 2);
    }

    #[test]
    fn content_node_uses_kebab_case_tags() {
        let node = ContentNode::RedactedReasoning { data: "x".into() };
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"type": "redacted-reasoning", "data": "x"})
        );
    }

    #[test]
    fn partial_args_parse_when_possible() {
        assert_eq!(ToolArgs::Partial("{\"a\":1}".into()).to_value(), json!({"a": 1}));
        assert_eq!(ToolArgs::Partial("{\"a\"".into()).to_value(), json!("{\"a\""));
    }
}
