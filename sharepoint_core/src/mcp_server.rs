use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{Connector, ConnectorError};
use rmcp::model::*;

/// MCP server wrapping a single connector.
pub struct McpServer {
    connector: Arc<dyn Connector>,
}

impl McpServer {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Handle initialize request
    pub async fn handle_initialize(
        &self,
        request: InitializeRequestParam,
    ) -> Result<InitializeResult, ConnectorError> {
        info!(
            client = %request.client_info.name,
            client_version = %request.client_info.version,
            "MCP server initializing"
        );

        Ok(InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: self.connector.capabilities().await,
            server_info: Implementation {
                name: self.connector.name().to_string(),
                title: Some("SharePoint".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "{} Paths are server-relative, e.g. /Shared Documents/Reports/q3.docx; \
a path that does not start with a library name refers to the default library.",
                self.connector.description()
            )),
        })
    }

    pub async fn handle_list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        self.connector.list_tools(request).await
    }

    pub async fn handle_call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        self.connector.call_tool(request).await
    }
}

#[derive(Clone)]
pub struct JsonRpcHandler {
    server: Arc<McpServer>,
}

impl JsonRpcHandler {
    pub fn new(server: McpServer) -> Self {
        Self {
            server: Arc::new(server),
        }
    }

    /// Process a JSON-RPC message. Notifications (no `id`) produce no response.
    pub async fn handle_request(&self, request: Value) -> Option<Value> {
        debug!("Handling JSON-RPC request: {:?}", request);

        let id = request.get("id").cloned();
        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        if id.is_none() {
            debug!(method, "notification received");
            return None;
        }

        let result = match method {
            "initialize" => match serde_json::from_value::<InitializeRequestParam>(params) {
                Ok(req) => self
                    .server
                    .handle_initialize(req)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(ConnectorError::SerdeJson))
                    .map_err(|e| e.to_jsonrpc_error()),
                Err(e) => Err(ConnectorError::SerdeJson(e).to_jsonrpc_error()),
            },
            "ping" => Ok(json!({})),
            "tools/list" => match serde_json::from_value::<Option<PaginatedRequestParam>>(params) {
                Ok(req) => self
                    .server
                    .handle_list_tools(req)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(ConnectorError::SerdeJson))
                    .map_err(|e| e.to_jsonrpc_error()),
                Err(e) => Err(ConnectorError::SerdeJson(e).to_jsonrpc_error()),
            },
            "tools/call" => match serde_json::from_value::<CallToolRequestParam>(params) {
                Ok(req) => self
                    .server
                    .handle_call_tool(req)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(ConnectorError::SerdeJson))
                    .map_err(|e| e.to_jsonrpc_error()),
                Err(e) => Err(ConnectorError::SerdeJson(e).to_jsonrpc_error()),
            },
            _ => Err(ConnectorError::MethodNotFound.to_jsonrpc_error()),
        };

        Some(match result {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id,
            }),
            Err(error) => json!({
                "jsonrpc": "2.0",
                "error": error,
                "id": id,
            }),
        })
    }
}
