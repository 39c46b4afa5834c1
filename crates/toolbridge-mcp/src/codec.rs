//! Framing codec: one JSON-RPC message per line, frame, or HTTP body.
//!
//! Stdio uses newline-terminated UTF-8 lines, WebSocket uses one text frame
//! per message, HTTP uses the whole body. Decoding classifies the object into
//! [`Message`] immediately and rejects anything else as
//! [`McpError::MalformedMessage`].

use serde_json::{Map, Value};

use crate::error::{McpError, Result};
use crate::protocol::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message,
};

/// Encode a message as one newline-terminated line.
pub fn encode_line(message: &Message) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Encode a message as one WebSocket text frame (no terminator).
pub fn encode_frame(message: &Message) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Encode a message as an HTTP body.
pub fn encode_body(message: &Message) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode one line or frame. A single trailing `\n` or `\r\n` is ignored.
pub fn decode_line(line: &str) -> Result<Message> {
    let line = line
        .strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line);
    let value: Value = serde_json::from_str(line)
        .map_err(|e| McpError::malformed(format!("invalid JSON: {}", e)))?;
    classify(value)
}

/// Decode an HTTP body.
pub fn decode_body(body: &[u8]) -> Result<Message> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| McpError::malformed(format!("invalid JSON body: {}", e)))?;
    classify(value)
}

fn classify(value: Value) -> Result<Message> {
    let Value::Object(mut obj) = value else {
        return Err(McpError::malformed("message is not a JSON object"));
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(McpError::malformed(format!(
                "unsupported jsonrpc version: {}",
                other
            )));
        }
        None => return Err(McpError::malformed("missing 'jsonrpc' member")),
    }

    let id = match obj.remove("id") {
        None => None,
        Some(raw) => Some(
            raw.as_u64()
                .ok_or_else(|| McpError::malformed(format!("id must be a non-negative integer, got {}", raw)))?,
        ),
    };

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err(McpError::malformed("'method' must be a string"));
        };
        let params = take_params(&mut obj)?;
        return Ok(match id {
            Some(id) => Message::Request(JsonRpcRequest::new(id, method, params)),
            None => Message::Notification(JsonRpcNotification::new(method, params)),
        });
    }

    let Some(id) = id else {
        return Err(McpError::malformed("message has neither 'method' nor 'id'"));
    };

    match (obj.remove("result"), obj.remove("error")) {
        (Some(result), None) => Ok(Message::Response(JsonRpcResponse::success(id, result))),
        (None, Some(error)) => {
            let error: JsonRpcError = serde_json::from_value(error)
                .map_err(|e| McpError::malformed(format!("invalid error object: {}", e)))?;
            Ok(Message::Response(JsonRpcResponse::failure(id, error)))
        }
        (Some(_), Some(_)) => Err(McpError::malformed(format!(
            "response {} carries both 'result' and 'error'",
            id
        ))),
        (None, None) => Err(McpError::malformed(format!(
            "response {} carries neither 'result' nor 'error'",
            id
        ))),
    }
}

fn take_params(obj: &mut Map<String, Value>) -> Result<Value> {
    match obj.remove("params") {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(params),
        Some(other) => Err(McpError::malformed(format!(
            "'params' must be an object or array, got {}",
            other
        ))),
    }
}
