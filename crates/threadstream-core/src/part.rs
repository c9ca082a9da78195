use crate::message::{Role, Source};

/// Smallest tagged unit of streamed output.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    /// Opens a tool call whose arguments will stream in as fragments.
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        delta: String,
    },
    /// Complete tool call; replaces any streamed argument buffer.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Tool execution failed before producing output.
    ToolError {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
        error: String,
    },
    Source {
        source: Source,
    },
    /// Provider-specific payload; never materialized.
    Raw {
        value: serde_json::Value,
    },
    Error {
        message: String,
    },
    Abort,
}

impl Part {
    /// Role of the message this part belongs in.
    pub fn implied_role(&self) -> Role {
        match self {
            Part::ToolResult { .. } | Part::ToolError { .. } | Part::Source { .. } => Role::Tool,
            _ => Role::Assistant,
        }
    }

    /// Wire tag, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Part::TextDelta { .. } => "text-delta",
            Part::ReasoningDelta { .. } => "reasoning-delta",
            Part::ToolCallStart { .. } => "tool-call-start",
            Part::ToolCallDelta { .. } => "tool-call-delta",
            Part::ToolCall { .. } => "tool-call",
            Part::ToolResult { .. } => "tool-result",
            Part::ToolError { .. } => "tool-error",
            Part::Source { .. } => "source",
            Part::Raw { .. } => "raw",
            Part::Error { .. } => "error",
            Part::Abort => "abort",
        }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Part::TextDelta { text: text.into() }
    }

    pub fn reasoning_delta(text: impl Into<String>) -> Self {
        Part::ReasoningDelta { text: text.into() }
    }
}

/// Merges adjacent text deltas and adjacent reasoning deltas before a chunk
/// is persisted. The caller still addresses the chunk by the number of parts
/// originally emitted.
pub fn compact_parts(parts: impl IntoIterator<Item = Part>) -> Vec<Part> {
    let mut compacted: Vec<Part> = Vec::new();
    for part in parts {
        let merged = match (compacted.last_mut(), &part) {
            (Some(Part::TextDelta { text: last }), Part::TextDelta { text })
            | (Some(Part::ReasoningDelta { text: last }), Part::ReasoningDelta { text }) => {
                last.push_str(text);
                true
            }
            _ => false,
        };
        if !merged {
            compacted.push(part);
        }
    }
    compacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parts_round_trip_through_kebab_case_tags() {
        let part = Part::ToolCallStart {
            id: "c1".into(),
            name: "search".into(),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value, json!({"type": "tool-call-start", "id": "c1", "name": "search"}));
        let source: Part = serde_json::from_value(json!({
            "type": "source",
            "source": {"source_type": "url", "id": "s1", "url": "https://example.com"}
        }))
        .unwrap();
        assert_eq!(source.implied_role(), Role::Tool);
        assert_eq!(serde_json::to_value(Part::Abort).unwrap(), json!({"type": "abort"}));
    }

    #[test]
    fn compaction_merges_runs_of_same_kind_only() {
        let parts = vec![
            Part::text_delta("Hel"),
            Part::text_delta("lo"),
            Part::reasoning_delta("a"),
            Part::reasoning_delta("b"),
            Part::ToolCallStart {
                id: "c1".into(),
                name: "n".into(),
            },
            Part::text_delta("!"),
        ];
        let compacted = compact_parts(parts);
        assert_eq!(
            compacted,
            vec![
                Part::text_delta("Hello"),
                Part::reasoning_delta("ab"),
                Part::ToolCallStart {
                    id: "c1".into(),
                    name: "n".into(),
                },
                Part::text_delta("!"),
            ]
        );
    }
}
