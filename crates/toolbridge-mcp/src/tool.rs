//! Tool invocation outcomes.
//!
//! A failed tool call is data, not an error: the session stays `Ready` and
//! the caller (typically a model-driven loop) decides what to do with it.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::McpError;

/// Successful tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    /// The result's `content` member, unmodified.
    pub content: Value,
    /// Always `false` for a completed call.
    pub is_error: bool,
}

impl ToolOutput {
    /// Build output from a `tools/call` result.
    ///
    /// When the result has no `content` member the whole result is kept.
    pub fn from_result(result: Value) -> Self {
        let content = match result {
            Value::Object(mut map) if map.contains_key("content") => {
                map.remove("content").unwrap_or(Value::Null)
            }
            other => other,
        };
        Self {
            content,
            is_error: false,
        }
    }

    /// Concatenated text of the content.
    ///
    /// Handles a bare string and the MCP list of `{"type": "text", "text": ...}`
    /// blocks; returns `None` for anything else.
    pub fn text(&self) -> Option<String> {
        content_text(&self.content)
    }

    /// Text if available, otherwise pretty-printed JSON.
    pub fn render(&self) -> String {
        self.text()
            .unwrap_or_else(|| serde_json::to_string_pretty(&self.content).unwrap_or_default())
    }
}

fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Session was not `Ready`.
    NotReady,
    /// No response before the deadline.
    Timeout,
    /// The server answered with a JSON-RPC error.
    Server,
    /// The tool ran and reported `isError`.
    Tool,
    /// The server process is gone.
    Unavailable,
    /// Channel or protocol failure.
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotReady => "not_ready",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::Tool => "tool",
            Self::Unavailable => "unavailable",
            Self::Transport => "transport",
        };
        f.write_str(s)
    }
}

/// A failed tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFailure {
    /// Name of the tool that was called.
    pub tool: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable message.
    pub message: String,
    /// JSON-RPC error code, for server errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Tool-reported content, for `isError` results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ToolFailure {
    /// Classify a transport or protocol error raised during a call.
    pub fn from_error(tool: impl Into<String>, err: &McpError) -> Self {
        let (kind, code) = match err {
            McpError::NotReady { .. } => (FailureKind::NotReady, None),
            McpError::Timeout { .. } => (FailureKind::Timeout, None),
            McpError::ServerError { code, .. } => (FailureKind::Server, Some(*code)),
            McpError::ServerUnavailable { .. } | McpError::Cancelled { .. } => {
                (FailureKind::Unavailable, None)
            }
            _ => (FailureKind::Transport, None),
        };
        Self {
            tool: tool.into(),
            kind,
            message: err.to_string(),
            code,
            content: None,
        }
    }

    /// A tool that ran but flagged its own result as an error.
    pub fn tool_error(tool: impl Into<String>, content: Value) -> Self {
        let message = content_text(&content).unwrap_or_else(|| "tool reported an error".to_string());
        Self {
            tool: tool.into(),
            kind: FailureKind::Tool,
            message,
            code: None,
            content: Some(content),
        }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool '{}' failed ({}): {}", self.tool, self.kind, self.message)
    }
}

/// Result of [`Session::call_tool`](crate::session::Session::call_tool).
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    /// The tool ran and returned content.
    Completed(ToolOutput),
    /// The call failed; see [`ToolFailure::kind`].
    Failed(ToolFailure),
}

impl ToolCallOutcome {
    /// Interpret a `tools/call` result, honoring `isError`.
    pub fn from_result(tool: &str, result: Value) -> Self {
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let output = ToolOutput::from_result(result);
        if is_error {
            Self::Failed(ToolFailure::tool_error(tool, output.content))
        } else {
            Self::Completed(output)
        }
    }

    /// Whether the tool completed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Convert to a `Result`.
    pub fn into_result(self) -> Result<ToolOutput, ToolFailure> {
        match self {
            Self::Completed(output) => Ok(output),
            Self::Failed(failure) => Err(failure),
        }
    }
}
