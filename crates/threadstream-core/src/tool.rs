//! Unified view of a tool call paired with its eventual result.
//!
//! State machine: `input-streaming -> input-available -> {output-available | output-error}`.
//! A result with no matching call becomes a standalone invocation already in
//! its output state.

use tracing::warn;

use crate::message::{ContentNode, MessageDoc, ToolArgs};

/// Lifecycle state of a tool invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

impl ToolState {
    pub fn has_output(self) -> bool {
        matches!(self, ToolState::OutputAvailable | ToolState::OutputError)
    }
}

/// One tool call and, once known, its result.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolInvocation {
    /// Entry for a call node. Arguments still streaming into a live message
    /// keep the entry in `input-streaming`.
    pub fn from_call(tool_call_id: &str, tool_name: &str, args: &ToolArgs, live: bool) -> Self {
        let state = if live && !args.is_complete() {
            ToolState::InputStreaming
        } else {
            ToolState::InputAvailable
        };
        Self {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            state,
            input: Some(args.to_value()),
            output: None,
            error_text: None,
        }
    }

    /// Standalone entry for a result whose call was never seen.
    pub fn orphan(
        tool_call_id: &str,
        tool_name: &str,
        output: &serde_json::Value,
        error: Option<&str>,
    ) -> Self {
        let mut invocation = Self {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            state: ToolState::InputAvailable,
            input: None,
            output: None,
            error_text: None,
        };
        invocation.resolve(output, error);
        invocation
    }

    pub fn matches(&self, tool_call_id: &str, tool_name: &str) -> bool {
        self.tool_call_id == tool_call_id && self.tool_name == tool_name
    }

    /// Moves the entry into its output state.
    pub fn resolve(&mut self, output: &serde_json::Value, error: Option<&str>) {
        self.output = Some(output.clone());
        match error {
            Some(error) => {
                self.state = ToolState::OutputError;
                self.error_text = Some(error.to_string());
            }
            None => {
                self.state = ToolState::OutputAvailable;
                self.error_text = None;
            }
        }
    }
}

/// Error text for a failed result: the message's error if set, else the
/// output rendered as text.
pub(crate) fn result_error(
    output: &serde_json::Value,
    is_error: bool,
    message_error: Option<&str>,
) -> Option<String> {
    if let Some(error) = message_error {
        return Some(error.to_string());
    }
    if !is_error {
        return None;
    }
    Some(match output {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}

/// Pairs every call and result across `messages` into invocations, in call
/// order. Unmatched results are kept as standalone entries.
pub fn tool_invocations(messages: &[MessageDoc]) -> Vec<ToolInvocation> {
    let mut invocations: Vec<ToolInvocation> = Vec::new();
    for message in messages {
        for node in message.message.content.nodes() {
            match node {
                ContentNode::ToolCall {
                    tool_call_id,
                    tool_name,
                    args,
                } => invocations.push(ToolInvocation::from_call(
                    tool_call_id,
                    tool_name,
                    args,
                    message.streaming,
                )),
                ContentNode::ToolResult {
                    tool_call_id,
                    tool_name,
                    output,
                    is_error,
                } => {
                    let error = result_error(output, *is_error, None);
                    match invocations
                        .iter_mut()
                        .rev()
                        .find(|inv| inv.matches(tool_call_id, tool_name))
                    {
                        Some(invocation) => invocation.resolve(output, error.as_deref()),
                        None => {
                            warn!(tool_call_id = %tool_call_id, tool_name = %tool_name, "tool result without preceding tool call");
                            invocations.push(ToolInvocation::orphan(
                                tool_call_id,
                                tool_name,
                                output,
                                error.as_deref(),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    invocations
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_state_depends_on_liveness_and_completeness() {
        let partial = ToolArgs::Partial("{\"q\":".into());
        assert_eq!(
            ToolInvocation::from_call("c1", "search", &partial, true).state,
            ToolState::InputStreaming
        );
        assert_eq!(
            ToolInvocation::from_call("c1", "search", &partial, false).state,
            ToolState::InputAvailable
        );
        let complete = ToolArgs::Complete(json!({"q": "x"}));
        assert_eq!(
            ToolInvocation::from_call("c1", "search", &complete, true).state,
            ToolState::InputAvailable
        );
    }

    #[test]
    fn orphan_lands_directly_in_output_state() {
        let ok = ToolInvocation::orphan("c9", "search", &json!([1]), None);
        assert_eq!(ok.state, ToolState::OutputAvailable);
        assert!(ok.input.is_none());
        let failed = ToolInvocation::orphan("c9", "search", &json!("boom"), Some("boom"));
        assert_eq!(failed.state, ToolState::OutputError);
        assert_eq!(failed.error_text.as_deref(), Some("boom"));
    }

    #[test]
    fn result_error_prefers_message_error() {
        assert_eq!(result_error(&json!("x"), false, None), None);
        assert_eq!(result_error(&json!("x"), true, None).as_deref(), Some("x"));
        assert_eq!(
            result_error(&json!({"code": 1}), true, None).as_deref(),
            Some("{\"code\":1}")
        );
        assert_eq!(result_error(&json!("x"), false, Some("m")).as_deref(), Some("m"));
    }
}
