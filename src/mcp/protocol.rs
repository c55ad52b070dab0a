//! JSON-RPC 2.0 protocol over line-delimited stdio
//!
//! One JSON value per LF-terminated line. Requests whose `id` is absent or
//! null are notifications and produce no output; arrays are batches and
//! produce a batch response in the same order.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Protocol version reported by `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server identifier reported by `initialize`
pub const SERVER_NAME: &str = "phloem";

/// A validated JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl McpRequest {
    /// Notifications carry no id (or an explicit null) and get no response
    pub fn is_notification(&self) -> bool {
        matches!(self.id, None | Some(Value::Null))
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// Standard method names
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
    pub const LIST_RESOURCES: &str = "resources/list";
    pub const READ_RESOURCE: &str = "resources/read";
}

/// Trait for handling validated MCP requests
pub trait McpHandler: Send + Sync {
    fn handle_request(&self, request: McpRequest) -> McpResponse;
}

/// MCP server driving a handler over a line-delimited transport
pub struct McpServer<H>
where
    H: McpHandler,
{
    handler: H,
}

impl<H: McpHandler> McpServer<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Run the server over stdin/stdout until EOF
    pub fn run_stdio(&self) -> Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.run(stdin.lock(), stdout.lock())
    }

    /// Run the server over arbitrary reader/writer pairs (used by tests)
    pub fn run<R: BufRead, W: Write>(&self, mut reader: R, mut writer: W) -> Result<()> {
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break, // EOF; exit cleanly
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(output) = self.process_line(trimmed) {
                        writeln!(writer, "{}", output)?;
                        writer.flush()?;
                    }
                }
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Process one frame; returns the serialized response, if one is due
    pub fn process_line(&self, line: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                let response = McpResponse::error(None, -32700, format!("Parse error: {}", e));
                return serde_json::to_string(&response).ok();
            }
        };

        match value {
            Value::Array(batch) => {
                if batch.is_empty() {
                    let response = McpResponse::error(
                        None,
                        -32600,
                        "Invalid request: empty batch".to_string(),
                    );
                    return serde_json::to_string(&response).ok();
                }
                let responses: Vec<McpResponse> = batch
                    .iter()
                    .filter_map(|entry| self.process_value(entry))
                    .collect();
                if responses.is_empty() {
                    None
                } else {
                    serde_json::to_string(&responses).ok()
                }
            }
            single => self
                .process_value(&single)
                .and_then(|response| serde_json::to_string(&response).ok()),
        }
    }

    /// Validate the request shape and dispatch. Returns None for
    /// notifications.
    fn process_value(&self, value: &Value) -> Option<McpResponse> {
        let request = match validate_shape(value) {
            Ok(request) => request,
            Err(response) => return Some(response),
        };

        let notification = request.is_notification();
        let response = self.handler.handle_request(request);
        if notification {
            None
        } else {
            Some(response)
        }
    }
}

/// Enforce JSON-RPC envelope rules before the handler sees the request
fn validate_shape(value: &Value) -> std::result::Result<McpRequest, McpResponse> {
    let object = value.as_object().ok_or_else(|| {
        McpResponse::error(None, -32600, "Invalid request: not an object".to_string())
    })?;

    let id = object.get("id").cloned();

    match object.get("jsonrpc").and_then(|v| v.as_str()) {
        Some("2.0") => {}
        _ => {
            return Err(McpResponse::error(
                id,
                -32600,
                "Invalid request: jsonrpc must be \"2.0\"".to_string(),
            ))
        }
    }

    let method = object
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            McpResponse::error(
                id.clone(),
                -32600,
                "Invalid request: missing method".to_string(),
            )
        })?;

    Ok(McpRequest {
        jsonrpc: "2.0".to_string(),
        id,
        method: method.to_string(),
        params: object.get("params").cloned().unwrap_or(Value::Null),
    })
}

/// MCP tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// MCP initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
    pub resources: Option<ResourcesCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesCapability {
    pub subscribe: bool,
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for InitializeResult {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                resources: Some(ResourcesCapability {
                    subscribe: false,
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolCallResult {
    /// Create a text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Create a JSON result
    pub fn json(value: &impl Serialize) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_default();
        Self::text(text)
    }

    /// Create a domain-error result (`isError: true`)
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }
}
