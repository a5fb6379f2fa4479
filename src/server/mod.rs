//! Server core (spec.md §4.7, C7): a stateful, multi-session server and a
//! stateless single-shot variant over the same [`FeatureRegistry`].
//!
//! Grounded on the teacher's deleted `server.rs`, which held a registry
//! plus a list of connected sessions to broadcast `list_changed`
//! notifications to; generalized here to the registry/session/dispatch
//! split spec.md §4 draws between C3, C5, and C7.

use crate::config::Config;
use crate::error::Result;
use crate::protocol::{Implementation, ServerCapabilities};
use crate::registry::FeatureRegistry;
use crate::session::{dispatch, MethodHandler, Session};
use crate::transport::{Transport, TransportContext};
use crate::validation::SchemaValidator;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A stateful MCP server: one shared [`FeatureRegistry`] fanned out over
/// any number of live client sessions, each with its own handshake state.
pub struct McpServer {
    registry: Arc<FeatureRegistry>,
    validator: Arc<SchemaValidator>,
    server_info: Implementation,
    capabilities: ServerCapabilities,
    config: Config,
    sessions: RwLock<Vec<Arc<Session>>>,
}

impl McpServer {
    pub fn new(
        server_info: Implementation,
        capabilities: ServerCapabilities,
        config: Config,
    ) -> Self {
        Self {
            registry: Arc::new(FeatureRegistry::new()),
            validator: Arc::new(SchemaValidator::new()),
            server_info,
            capabilities,
            config,
            sessions: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    /// Accept a new connection, spawning its session actor and tracking
    /// it for broadcast notifications.
    pub async fn accept<T: Transport + 'static>(&self, transport: T) -> Arc<Session> {
        let handler = self.make_handler();
        let (session, _join) = Session::spawn(transport, self.config.clone(), true, handler, None);
        self.sessions.write().await.push(session.clone());
        session
    }

    fn make_handler(&self) -> MethodHandler {
        let config = self.config.clone();
        let server_info = self.server_info.clone();
        let capabilities = self.capabilities.clone();
        let registry = self.registry.clone();
        let validator = self.validator.clone();

        Arc::new(move |ctx, method, params| {
            let config = config.clone();
            let server_info = server_info.clone();
            let capabilities = capabilities.clone();
            let registry = registry.clone();
            let validator = validator.clone();
            Box::pin(async move {
                match method.as_str() {
                    "initialize" => {
                        handle_initialize(&config, &server_info, &capabilities, params)
                    }
                    other => dispatch::dispatch(&registry, &validator, &ctx, other, params).await,
                }
            })
        })
    }

    /// Broadcast a notification to every tracked session (spec.md §4.3's
    /// mutate-and-notify path for `list_changed`). A session whose write
    /// side has gone away is dropped from the tracked set rather than
    /// failing the whole broadcast.
    pub async fn notify_clients(&self, method: &str, params: Option<Value>) {
        let sessions = self.sessions.read().await.clone();
        let results = futures::future::join_all(
            sessions
                .iter()
                .map(|session| async { (session.clone(), session.notify(method, params.clone())) }),
        )
        .await;

        let mut alive = Vec::with_capacity(results.len());
        for (session, outcome) in results {
            match outcome {
                Ok(()) => alive.push(session),
                Err(e) => debug!(error = %e, "dropping dead session from broadcast set"),
            }
        }
        *self.sessions.write().await = alive;
    }

    /// Resolve every outstanding waiter on every tracked session and tear
    /// them down (spec.md §4.5 Testable Property 4, server-wide).
    pub async fn close_gracefully(&self) {
        let sessions = self.sessions.write().await.drain(..).collect::<Vec<_>>();
        futures::future::join_all(sessions.iter().map(|s| s.shutdown())).await;
    }
}

fn handle_initialize(
    config: &Config,
    server_info: &Implementation,
    capabilities: &ServerCapabilities,
    params: Option<Value>,
) -> Result<Value> {
    let params = params.unwrap_or(Value::Null);
    let peer_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .map(|v| vec![v.to_string()])
        .unwrap_or_default();
    let version = config.negotiate(&peer_version)?;
    Ok(json!({
        "protocolVersion": version,
        "capabilities": capabilities,
        "serverInfo": server_info,
    }))
}

/// A handshake-free server: every request is dispatched immediately as
/// if the session were already `Operational` (spec.md §4.7's stateless
/// variant — no per-connection state machine, `notifications/initialized`
/// is accepted and ignored).
pub struct StatelessMcpServer {
    registry: Arc<FeatureRegistry>,
    validator: Arc<SchemaValidator>,
    server_info: Implementation,
    capabilities: ServerCapabilities,
}

impl StatelessMcpServer {
    pub fn new(server_info: Implementation, capabilities: ServerCapabilities) -> Self {
        Self {
            registry: Arc::new(FeatureRegistry::new()),
            validator: Arc::new(SchemaValidator::new()),
            server_info,
            capabilities,
        }
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    /// Handle one request/notification with no session state carried
    /// between calls. `ctx` is created fresh per call by the caller
    /// (there is no persistent transport to correlate against).
    pub async fn handle(&self, ctx: &TransportContext, method: &str, params: Option<Value>) -> Result<Value> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": crate::config::SUPPORTED_PROTOCOL_VERSIONS[0],
                "capabilities": self.capabilities,
                "serverInfo": self.server_info,
            })),
            "notifications/initialized" | "logging/setLevel" => Ok(json!({})),
            other => dispatch::dispatch(&self.registry, &self.validator, ctx, other, params).await,
        }
    }
}
