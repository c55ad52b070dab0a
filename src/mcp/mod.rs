//! MCP (Model Context Protocol) server implementation

pub mod handler;
pub mod protocol;
pub mod tools;

pub use handler::PhloemHandler;
pub use protocol::{
    InitializeResult, McpError, McpHandler, McpRequest, McpResponse, McpServer, ServerInfo,
    ToolCallResult, ToolContent,
};
pub use tools::{get_tool_definitions, validate_arguments};
