// src/lib.rs
pub mod auth;
pub mod config;
pub mod connector;
pub mod content;
pub mod cpu_pool;
pub mod error;
pub mod graph;
pub mod mcp_server;
pub mod transport;
pub mod tree;
pub mod utils;

// Re-export the rmcp model types that appear in the public API
pub use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, InitializeRequestParam,
    InitializeResult, ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities,
    Tool,
};

pub use crate::config::{ConfigError, Settings};
pub use crate::connector::SharePointConnector;
pub use crate::error::ConnectorError;

use async_trait::async_trait;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the unique name of the connector (acting as the MCP server name).
    fn name(&self) -> &'static str;

    /// Returns a description of the connector.
    fn description(&self) -> &'static str;

    /// Returns the MCP capabilities of this connector.
    async fn capabilities(&self) -> ServerCapabilities;

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError>;

    /// Runs one tool. Only protocol failures (an unknown tool) come back as `Err`;
    /// everything that went wrong inside the tool is an error result.
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError>;
}
