//! Minimal end-to-end demo: a stateful server with one `echo` tool,
//! talked to by a client over an in-memory [`DuplexTransport`].
//!
//! Grounded on the teacher's deleted `main.rs`, which set up
//! `tracing_subscriber` before standing up its own lifecycle manager.

use mcp_core::bridge::from_sync;
use mcp_core::config::Config;
use mcp_core::protocol::{ClientCapabilities, Implementation, ServerCapabilities};
use mcp_core::registry::{ToolDefinition, ToolSpec};
use mcp_core::server::McpServer;
use mcp_core::transport::duplex::DuplexTransport;
use mcp_core::McpClient;
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> mcp_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::default();
    let server = McpServer::new(
        Implementation {
            name: "echo-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        ServerCapabilities {
            tools: Some(Default::default()),
            ..Default::default()
        },
        config.clone(),
    );

    server
        .registry()
        .register_tool(ToolSpec {
            definition: ToolDefinition::new(
                "echo",
                "echoes its input back as tool content",
                json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }),
            ),
            handler: from_sync(
                Some(Arc::new(|_ctx, args| {
                    let message = args
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Ok(json!({ "content": [{ "type": "text", "text": message }] }))
                })),
                true,
                config.worker_pool_size,
            )?,
        })
        .await?;

    let (client_transport, server_transport) = DuplexTransport::pair();
    server.accept(server_transport).await;

    let client = McpClient::connect(client_transport, config);
    client
        .initialize(
            Implementation {
                name: "echo-demo-client".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            ClientCapabilities::default(),
            mcp_core::config::SUPPORTED_PROTOCOL_VERSIONS[0],
        )
        .await?;

    let tools = client.list_tools().await?;
    tracing::info!(?tools, "discovered tools");

    let result = client
        .call_tool("echo", json!({ "message": "hello from the demo client" }))
        .await?;
    tracing::info!(?result, "echo result");

    client.close().await;
    Ok(())
}
