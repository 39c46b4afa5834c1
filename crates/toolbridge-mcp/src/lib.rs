//! JSON-RPC tool-calling client for toolbridge.
//!
//! A calling application (typically a model-driven loop) uses this crate to
//! invoke named tools on a long-running tool server, over a spawned
//! subprocess, a WebSocket relay, or an HTTP endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Session                                                    │
//! │  - initialize → notifications/initialized → tools/list      │
//! │  - call_tool returns ToolCallOutcome (failures are data)    │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport (stdio | websocket | http)                       │
//! │  - Correlator: id allocation, pending table, deadlines      │
//! │  - codec: one JSON object per line / frame / body           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use serde_json::json;
//! use toolbridge_mcp::{Endpoint, Session, SessionConfig, ToolCallOutcome};
//!
//! let transport = Endpoint::parse("ws://127.0.0.1:8765")?.into_transport();
//! let mut session = Session::connect(transport, SessionConfig::default()).await?;
//!
//! for tool in session.tools() {
//!     println!("{} - {}", tool.name, tool.description);
//! }
//!
//! match session.call_tool("search_tables_by_name", json!({"name_pattern": "ORD%"})).await {
//!     ToolCallOutcome::Completed(output) => println!("{}", output.render()),
//!     ToolCallOutcome::Failed(failure) => eprintln!("{}", failure),
//! }
//!
//! session.close().await?;
//! ```
//!
//! # Wire format
//!
//! Plain JSON-RPC 2.0, no `Content-Length` headers:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{...}}\n
//! ```
//!
//! On stdio each message is one line; on WebSocket one text frame; on HTTP
//! one POST body.

pub mod codec;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod session;
pub mod tool;
pub mod transport;

// Re-export main types
pub use correlator::Correlator;
pub use error::{McpError, Result};
pub use protocol::{
    CallToolParams, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    MCP_PROTOCOL_VERSION, Message, ServerCapabilities, ServerInfo, ToolDescriptor,
};
pub use session::{DEFAULT_TIMEOUT, Session, SessionConfig, SessionState};
pub use tool::{FailureKind, ToolCallOutcome, ToolFailure, ToolOutput};
pub use transport::{
    Endpoint, HttpConfig, HttpTransport, ServerExit, StdioCommand, StdioTransport, Transport,
    TransportKind, WebSocketConfig, WebSocketTransport,
};
