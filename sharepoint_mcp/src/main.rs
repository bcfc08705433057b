use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sharepoint_core::{
    mcp_server::{JsonRpcHandler, McpServer},
    transport::StdioTransport,
    Settings, SharePointConnector,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("Starting SharePoint MCP Server");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };
    info!(
        site = %settings.site_url,
        max_folder_depth = settings.max_folder_depth,
        "configuration loaded"
    );

    let connector = SharePointConnector::from_settings(settings)?;

    // Create MCP server
    let server = McpServer::new(Arc::new(connector));

    // Create JSON-RPC handler
    let handler = JsonRpcHandler::new(server);

    // Create and run stdio transport
    let transport = StdioTransport::new(handler);

    info!("MCP Server ready, listening on stdio");

    tokio::select! {
        result = transport.run() => {
            if let Err(e) = result {
                error!("Transport error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
