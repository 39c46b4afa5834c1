//! Session: the handshake state machine and tool invocation.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
    ListToolsResult, MCP_PROTOCOL_VERSION, ServerInfo, ToolDescriptor, methods,
};
use crate::tool::{ToolCallOutcome, ToolFailure};
use crate::transport::{Transport, TransportKind};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, transport not yet connected.
    Unconnected,
    /// Handshake in progress.
    Handshaking,
    /// Handshake complete; tools may be called.
    Ready,
    /// Closed, either explicitly or after a failed handshake.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconnected => "unconnected",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for each request.
    pub timeout: Duration,
    /// Protocol version sent in `initialize`.
    pub protocol_version: String,
    /// Client identity sent in `initialize`.
    pub client_info: ClientInfo,
    /// Capabilities sent in `initialize`.
    pub capabilities: ClientCapabilities,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            client_info: ClientInfo::default(),
            capabilities: ClientCapabilities::standard(),
        }
    }
}

impl SessionConfig {
    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the client identity.
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    /// Set the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn initialize_params(&self) -> InitializeParams {
        InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: self.capabilities.clone(),
            client_info: self.client_info.clone(),
        }
    }
}

/// A handshaken conversation with one tool server over one transport.
///
/// One request is in flight at a time; `call_tool` takes `&self` but callers
/// should not overlap calls.
pub struct Session {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    state: SessionState,
    tools: Vec<ToolDescriptor>,
    server: Option<InitializeResult>,
}

impl Session {
    /// Wrap a transport without connecting it.
    pub fn new(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            config,
            transport,
            state: SessionState::Unconnected,
            tools: Vec::new(),
            server: None,
        }
    }

    /// Create a session and run the handshake.
    pub async fn connect(transport: Box<dyn Transport>, config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(transport, config);
        session.initialize().await?;
        Ok(session)
    }

    /// Run the handshake: connect, `initialize`, `notifications/initialized`,
    /// `tools/list`.
    ///
    /// On failure the transport is closed, the session is `Closed`, and the
    /// error names the step that failed.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != SessionState::Unconnected {
            return Err(McpError::NotReady {
                state: self.state.to_string(),
            });
        }

        self.state = SessionState::Handshaking;
        match self.handshake().await {
            Ok(()) => {
                self.state = SessionState::Ready;
                tracing::info!(
                    transport = %self.transport.kind(),
                    server = self.server_info().map(|s| s.name.as_str()).unwrap_or("unknown"),
                    tools = self.tools.len(),
                    "session ready"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(transport = %self.transport.kind(), error = %e, "session initialization failed");
                if let Err(close_err) = self.transport.close().await {
                    tracing::debug!(error = %close_err, "error closing transport after failed handshake");
                }
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let timeout = self.config.timeout;

        self.transport
            .connect()
            .await
            .map_err(|e| McpError::initialization("connect", e))?;

        let params = serde_json::to_value(self.config.initialize_params())?;
        let result = self
            .transport
            .send_request(methods::INITIALIZE, params, timeout)
            .await
            .map_err(|e| McpError::initialization(methods::INITIALIZE, e))?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            McpError::initialization(
                methods::INITIALIZE,
                McpError::malformed(format!("invalid initialize result: {}", e)),
            )
        })?;
        if !init.protocol_version.is_empty() && init.protocol_version != self.config.protocol_version {
            tracing::warn!(
                requested = %self.config.protocol_version,
                offered = %init.protocol_version,
                "server negotiated a different protocol version"
            );
        }
        self.server = Some(init);

        self.transport
            .send_notification(methods::INITIALIZED, Value::Null)
            .await
            .map_err(|e| McpError::initialization(methods::INITIALIZED, e))?;

        let result = self
            .transport
            .send_request(methods::TOOLS_LIST, Value::Null, timeout)
            .await
            .map_err(|e| McpError::initialization(methods::TOOLS_LIST, e))?;
        let list: ListToolsResult = serde_json::from_value(result).map_err(|e| {
            McpError::initialization(
                methods::TOOLS_LIST,
                McpError::malformed(format!("invalid tools/list result: {}", e)),
            )
        })?;

        self.tools = dedup_tools(list.tools);
        Ok(())
    }

    /// Call a tool by name.
    ///
    /// Never returns an error: every failure comes back as
    /// [`ToolCallOutcome::Failed`] and leaves the session state unchanged.
    /// Names are not checked against the catalog; the server decides.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolCallOutcome {
        if self.state != SessionState::Ready {
            let err = McpError::NotReady {
                state: self.state.to_string(),
            };
            return ToolCallOutcome::Failed(ToolFailure::from_error(name, &err));
        }

        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let params = match serde_json::to_value(&params) {
            Ok(params) => params,
            Err(e) => return ToolCallOutcome::Failed(ToolFailure::from_error(name, &e.into())),
        };

        tracing::debug!(tool = name, "calling tool");
        match self
            .transport
            .send_request(methods::TOOLS_CALL, params, self.config.timeout)
            .await
        {
            Ok(result) => {
                let outcome = ToolCallOutcome::from_result(name, result);
                if let ToolCallOutcome::Failed(failure) = &outcome {
                    tracing::info!(tool = name, message = %failure.message, "tool reported an error");
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                ToolCallOutcome::Failed(ToolFailure::from_error(name, &e))
            }
        }
    }

    /// The tool catalog, in server order.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Look up a tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Server identity from the `initialize` result.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server.as_ref().and_then(|s| s.server_info.as_ref())
    }

    /// Full `initialize` result.
    pub fn initialize_result(&self) -> Option<&InitializeResult> {
        self.server.as_ref()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether tools may be called.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Which transport the session runs over.
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Close the transport. Safe to call in any state, any number of times.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.transport.close().await;
        if self.state != SessionState::Closed {
            tracing::debug!(transport = %self.transport.kind(), "session closed");
        }
        self.state = SessionState::Closed;
        result
    }
}

fn dedup_tools(tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
    let mut seen = std::collections::HashSet::new();
    tools
        .into_iter()
        .filter(|tool| {
            let fresh = seen.insert(tool.name.clone());
            if !fresh {
                tracing::warn!(tool = %tool.name, "duplicate tool name in catalog, keeping first");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::tool::FailureKind;

    /// Scripted transport: answers requests from a queue and records traffic.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Value>>>,
        sent: Arc<Mutex<Vec<(String, Value)>>>,
        connected: bool,
        fail_connect: bool,
        closes: Arc<Mutex<usize>>,
    }

    impl Scripted {
        fn with_replies(replies: Vec<Result<Value>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        fn kind(&self) -> TransportKind {
            TransportKind::Stdio
        }

        async fn connect(&mut self) -> Result<()> {
            if self.fail_connect {
                return Err(McpError::spawn_failed("no such program"));
            }
            self.connected = true;
            Ok(())
        }

        async fn send_request(&self, method: &str, params: Value, _timeout: Duration) -> Result<Value> {
            self.sent.lock().push((method.to_string(), params));
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(McpError::transport("script exhausted")))
        }

        async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
            self.sent.lock().push((method.to_string(), params));
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.connected = false;
            *self.closes.lock() += 1;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn init_reply() -> Result<Value> {
        Ok(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "oracle-db", "version": "1.0"}
        }))
    }

    #[tokio::test]
    async fn test_handshake_order_and_catalog() {
        let transport = Scripted::with_replies(vec![
            init_reply(),
            Ok(json!({"tools": [
                {"name": "search_tables_by_name", "description": "Search tables"},
                {"name": "search_tables_by_name", "description": "duplicate"}
            ]})),
        ]);
        let sent = Arc::clone(&transport.sent);

        let session = Session::connect(Box::new(transport), SessionConfig::default())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.tools().len(), 1);
        assert_eq!(session.tool("search_tables_by_name").unwrap().description, "Search tables");
        assert_eq!(session.server_info().unwrap().name, "oracle-db");

        let methods: Vec<String> = sent.lock().iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(methods, vec!["initialize", "notifications/initialized", "tools/list"]);
        let init_params = sent.lock()[0].1.clone();
        assert_eq!(init_params["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(init_params["capabilities"]["roots"]["listChanged"], true);
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_and_names_step() {
        let transport = Scripted::with_replies(vec![
            init_reply(),
            Err(McpError::server_error(-32601, "Method not found", None)),
        ]);
        let closes = Arc::clone(&transport.closes);

        let mut session = Session::new(Box::new(transport), SessionConfig::default());
        let err = session.initialize().await.unwrap_err();

        match err {
            McpError::InitializationFailed { step, source } => {
                assert_eq!(step, "tools/list");
                assert!(matches!(*source, McpError::ServerError { code: -32601, .. }));
            }
            other => panic!("expected InitializationFailed, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(*closes.lock(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_initialization_failure() {
        let transport = Scripted {
            fail_connect: true,
            ..Default::default()
        };
        let err = Session::connect(Box::new(transport), SessionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::InitializationFailed { step: "connect", .. }));
    }

    #[tokio::test]
    async fn test_call_tool_before_ready_is_not_ready_failure() {
        let session = Session::new(Box::new(Scripted::default()), SessionConfig::default());
        let outcome = session.call_tool("search_tables_by_name", json!({})).await;
        let failure = outcome.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::NotReady);
        assert_eq!(session.state(), SessionState::Unconnected);
    }

    #[tokio::test]
    async fn test_call_tool_failure_leaves_session_ready() {
        let transport = Scripted::with_replies(vec![
            init_reply(),
            Ok(json!({"tools": []})),
            Err(McpError::server_error(-32602, "invalid arguments", None)),
            Ok(json!({"content": "ORDERS"})),
        ]);
        let sent = Arc::clone(&transport.sent);
        let session = Session::connect(Box::new(transport), SessionConfig::default())
            .await
            .unwrap();

        let failed = session.call_tool("search_tables_by_name", Value::Null).await;
        assert_eq!(failed.into_result().unwrap_err().code, Some(-32602));
        assert!(session.is_ready());

        let ok = session
            .call_tool("search_tables_by_name", json!({"name_pattern": "ORD%"}))
            .await;
        assert_eq!(ok.into_result().unwrap().content, json!("ORDERS"));

        let sent = sent.lock();
        assert_eq!(sent[3].1, json!({"name": "search_tables_by_name", "arguments": {}}));
        assert_eq!(sent[4].1["arguments"]["name_pattern"], "ORD%");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_from_any_state() {
        let transport = Scripted::default();
        let closes = Arc::clone(&transport.closes);
        let mut session = Session::new(Box::new(transport), SessionConfig::default());

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(*closes.lock(), 2);

        assert!(matches!(
            session.initialize().await,
            Err(McpError::NotReady { .. })
        ));
    }
}
