//! Typed client core (spec.md §4.6, C6).
//!
//! Wraps a client-role [`Session`] with the MCP method table: typed
//! request builders for every operation spec.md §6 names, plus a small
//! handler table for the server-initiated methods (`roots/list`,
//! `sampling/createMessage`, `elicitation/create`). Grounded on the
//! teacher's deleted `client.rs`, which paired a `Session` with
//! domain-specific typed wrappers over raw JSON-RPC calls.

use crate::bridge::AsyncHandlerFn;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{ClientCapabilities, Implementation, ProgressToken, RequestId};
use crate::session::{MethodHandler, NotificationSink, Session};
use crate::transport::{Transport, TransportContext};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A consumer of one kind of server-initiated notification
/// (`tools/list_changed`, `resources/updated`, `logging/message`,
/// `progress`, ...), registered via [`McpClient::on_notification`].
pub type NotificationHandlerFn = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// The client side of an MCP connection: one [`Session`] plus the
/// registered handlers for methods the server is allowed to call back
/// into the client with.
pub struct McpClient {
    session: Arc<Session>,
    inbound_handlers: Arc<RwLock<HashMap<String, AsyncHandlerFn>>>,
    notification_handlers: Arc<RwLock<HashMap<String, NotificationHandlerFn>>>,
}

impl McpClient {
    /// Connect over `transport`, spawning the session actor immediately.
    /// Call [`McpClient::initialize`] before issuing any other request.
    pub fn connect<T: Transport + 'static>(transport: T, config: Config) -> Self {
        let inbound_handlers: Arc<RwLock<HashMap<String, AsyncHandlerFn>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let handlers_for_dispatch = inbound_handlers.clone();

        let handler: MethodHandler = Arc::new(move |ctx, method, params| {
            let handlers = handlers_for_dispatch.clone();
            Box::pin(async move {
                let handler = handlers.read().await.get(&method).cloned();
                match handler {
                    Some(handler) => handler(ctx, params.unwrap_or(Value::Null)).await,
                    None => Err(Error::MethodNotFound(method)),
                }
            })
        });

        let notification_handlers: Arc<RwLock<HashMap<String, NotificationHandlerFn>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let handlers_for_notifications = notification_handlers.clone();
        let notification_sink: NotificationSink = Arc::new(move |method, params| {
            let handlers = handlers_for_notifications.clone();
            Box::pin(async move {
                let handler = handlers.read().await.get(&method).cloned();
                if let Some(handler) = handler {
                    handler(params).await;
                }
            })
        });

        let (session, _join) = Session::spawn(transport, config, false, handler, Some(notification_sink));
        Self {
            session,
            inbound_handlers,
            notification_handlers,
        }
    }

    /// Register (or replace) the handler for a server-initiated method,
    /// e.g. `"roots/list"` or `"sampling/createMessage"`.
    pub async fn on_server_request(&self, method: impl Into<String>, handler: AsyncHandlerFn) {
        self.inbound_handlers.write().await.insert(method.into(), handler);
    }

    /// Register (or replace) the consumer for one kind of inbound
    /// notification (spec.md §4.6's fan-out: `tools/list_changed`,
    /// `resources/list_changed`, `resources/updated`,
    /// `prompts/list_changed`, `logging/message`, `progress`, ...).
    pub async fn on_notification(&self, method: impl Into<String>, handler: NotificationHandlerFn) {
        self.notification_handlers
            .write()
            .await
            .insert(method.into(), handler);
    }

    /// Perform the `initialize` handshake (spec.md §4.5 Testable Property 1).
    pub async fn initialize(
        &self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
        protocol_version: &str,
    ) -> Result<Value> {
        self.session
            .initialize(json!({
                "protocolVersion": protocol_version,
                "capabilities": capabilities,
                "clientInfo": client_info,
            }))
            .await
    }

    pub async fn list_tools(&self) -> Result<Value> {
        self.session.request("tools/list", None).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.call_tool_with_timeout(name, arguments, None).await
    }

    /// Per-call deadline overriding the session-wide default (spec.md §4.6).
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.session
            .request_with_timeout(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
                timeout,
            )
            .await
    }

    /// Issue a tool call carrying a progress token; a handler that calls
    /// `TransportContext::emit_progress` will have its updates delivered
    /// to this client as `notifications/progress` (spec.md §4.6).
    pub async fn call_tool_with_progress_token(
        &self,
        name: &str,
        arguments: Value,
        progress_token: ProgressToken,
    ) -> Result<Value> {
        self.session
            .request(
                "tools/call",
                Some(json!({
                    "name": name,
                    "arguments": arguments,
                    "_meta": { "progressToken": progress_token },
                })),
            )
            .await
    }

    pub async fn list_resources(&self) -> Result<Value> {
        self.session.request("resources/list", None).await
    }

    pub async fn list_resource_templates(&self) -> Result<Value> {
        self.session.request("resources/templates/list", None).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.session
            .request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    pub async fn subscribe_resource(&self, uri: &str) -> Result<Value> {
        self.session
            .request("resources/subscribe", Some(json!({ "uri": uri })))
            .await
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<Value> {
        self.session
            .request("resources/unsubscribe", Some(json!({ "uri": uri })))
            .await
    }

    pub async fn list_prompts(&self) -> Result<Value> {
        self.session.request("prompts/list", None).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value> {
        self.session
            .request("prompts/get", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    pub async fn complete(&self, reference: Value, argument: Value) -> Result<Value> {
        self.session
            .request(
                "completion/complete",
                Some(json!({ "ref": reference, "argument": argument })),
            )
            .await
    }

    pub async fn set_logging_level(&self, level: &str) -> Result<Value> {
        self.session
            .request("logging/setLevel", Some(json!({ "level": level })))
            .await
    }

    pub async fn ping(&self) -> Result<Value> {
        self.session.request("ping", None).await
    }

    /// Ask the server to stop working on a request this client issued.
    pub async fn cancel(&self, request_id: RequestId) -> Result<()> {
        self.session.cancel(request_id).await
    }

    pub async fn close(&self) {
        self.session.shutdown().await;
    }
}
