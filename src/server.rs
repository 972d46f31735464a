//! MCP server implementation.
//!
//! Handles JSON-RPC 2.0 according to the MCP protocol specification. The same
//! server backs the stdio loop and the HTTP transport; each request is handled
//! on behalf of a session id supplied by the transport.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{rpc_codes, McpError, Result};
use crate::resources::{ResourceRegistry, MIME_TYPE};
use crate::session::{SessionRegistry, DEFAULT_SESSION_ID};
use crate::tools::ToolRegistry;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server information.
pub const SERVER_NAME: &str = "polydb-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<JsonValue>,
    pub method: String,
    #[serde(default)]
    pub params: Option<JsonValue>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonValue>, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<JsonValue>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    /// Create an error response from an McpError.
    pub fn from_error(id: Option<JsonValue>, err: McpError) -> Self {
        Self::error(id, err.rpc_code(), err.to_string())
    }
}

/// MCP server.
pub struct McpServer {
    sessions: Arc<SessionRegistry>,
    tools: ToolRegistry,
    resources: ResourceRegistry,
}

impl McpServer {
    /// Create a server whose capabilities follow the registry's configuration.
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        let tools = ToolRegistry::new(sessions.config());
        let resources = ResourceRegistry::new(sessions.config());
        Self {
            sessions,
            tools,
            resources,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Run the server, reading from stdin and writing to stdout.
    ///
    /// Every request is served under [`DEFAULT_SESSION_ID`].
    pub async fn run_stdio(&self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                // EOF - client disconnected
                break;
            }

            let Some(response) = self.handle_message(line.trim(), DEFAULT_SESSION_ID).await else {
                continue;
            };

            let response_json = serde_json::to_string(&response)?;
            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }

    /// Parse and handle one raw message. Returns `None` when nothing should be sent back.
    pub async fn handle_message(&self, raw: &str, session_id: &str) -> Option<JsonRpcResponse> {
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle_request(request, session_id).await,
            Err(e) => Some(JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Parse error: {}", e),
            )),
        }
    }

    /// Handle a single JSON-RPC request.
    ///
    /// Notifications (no `id`) are processed but produce no response.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        session_id: &str,
    ) -> Option<JsonRpcResponse> {
        // Validate JSON-RPC version
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                rpc_codes::INVALID_REQUEST,
                "Invalid JSON-RPC version".to_string(),
            ));
        }

        if request.method.starts_with("notifications/") || request.method == "initialized" {
            tracing::debug!("Notification {}", request.method);
            return None;
        }
        let is_notification = request.id.is_none();

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tools_call(request, session_id).await,
            "resources/list" => self.handle_resources_list(request),
            "resources/templates/list" => JsonRpcResponse::success(
                request.id,
                json!({ "resourceTemplates": self.resources.templates() }),
            ),
            "resources/read" => self.handle_resources_read(request, session_id).await,
            _ => JsonRpcResponse::error(
                request.id,
                rpc_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
            ),
        };

        if is_notification {
            None
        } else {
            Some(response)
        }
    }

    /// Handle the initialize request.
    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        tracing::info!("Client initialized");

        JsonRpcResponse::success(
            request.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    /// Handle the tools/list request.
    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let tools: Vec<JsonValue> = self
            .tools
            .tools()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema
                })
            })
            .collect();

        JsonRpcResponse::success(request.id, json!({ "tools": tools }))
    }

    /// Handle the tools/call request.
    async fn handle_tools_call(&self, request: JsonRpcRequest, session_id: &str) -> JsonRpcResponse {
        // Extract name and arguments from params
        let params = match &request.params {
            Some(JsonValue::Object(obj)) => obj,
            _ => {
                return JsonRpcResponse::error(
                    request.id,
                    rpc_codes::INVALID_PARAMS,
                    "Missing params object".to_string(),
                )
            }
        };

        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    rpc_codes::INVALID_PARAMS,
                    "Missing 'name' in params".to_string(),
                )
            }
        };

        let arguments = match params.get("arguments") {
            Some(JsonValue::Object(obj)) => obj.clone(),
            Some(JsonValue::Null) | None => Map::new(),
            _ => {
                return JsonRpcResponse::error(
                    request.id,
                    rpc_codes::INVALID_PARAMS,
                    "'arguments' must be an object".to_string(),
                )
            }
        };

        match self
            .tools
            .dispatch(&self.sessions, session_id, &name, arguments)
            .await
        {
            Ok(envelope) => {
                let is_error = envelope.get("success") == Some(&JsonValue::Bool(false));
                // MCP tool responses are wrapped in content array
                JsonRpcResponse::success(
                    request.id,
                    json!({
                        "content": [{
                            "type": "text",
                            "text": envelope.to_string()
                        }],
                        "isError": is_error
                    }),
                )
            }
            Err(err) => JsonRpcResponse::from_error(request.id, err),
        }
    }

    /// Handle the resources/list request.
    fn handle_resources_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(
            request.id,
            json!({ "resources": self.resources.resources() }),
        )
    }

    /// Handle the resources/read request.
    async fn handle_resources_read(
        &self,
        request: JsonRpcRequest,
        session_id: &str,
    ) -> JsonRpcResponse {
        let uri = match request
            .params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(|v| v.as_str())
        {
            Some(uri) => uri.to_string(),
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    rpc_codes::INVALID_PARAMS,
                    "Missing 'uri' in params".to_string(),
                )
            }
        };

        match self.resources.read(&self.sessions, session_id, &uri).await {
            Ok(document) => JsonRpcResponse::success(
                request.id,
                json!({
                    "contents": [{
                        "uri": uri,
                        "mimeType": MIME_TYPE,
                        "text": document.to_string()
                    }]
                }),
            ),
            Err(err) => JsonRpcResponse::from_error(request.id, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_response_success() {
        let response = JsonRpcResponse::success(Some(JsonValue::Number(1.into())), json!({"ok": true}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_json_rpc_response_error() {
        let response = JsonRpcResponse::error(Some(JsonValue::Number(1.into())), -32600, "Invalid".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\""));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_from_error_uses_rpc_code() {
        let response = JsonRpcResponse::from_error(None, McpError::UnknownTool("nope".to_string()));
        let error = response.error.unwrap();
        assert_eq!(error.code, rpc_codes::METHOD_NOT_FOUND);
        assert_eq!(error.message, "unknown tool: nope");
    }
}
