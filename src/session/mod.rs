//! Session state machine and connection actor (spec.md §4.5/§5, C5).
//!
//! Grounded on the teacher's deleted `lifecycle/mod.rs`, which paired a
//! state enum with a single task owning the transport; generalized here
//! into a role-agnostic actor so the same machinery backs both
//! [`crate::client`] and [`crate::server`]. Outstanding-request
//! correlation follows the `oneshot`-per-call idiom found in
//! `codex-rs/mcp-client/src/mcp_client.rs` in the example pack.

pub mod dispatch;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, ProgressNotification, ProgressToken, RequestId, RpcError};
use crate::transport::{ProgressSink, Transport, TransportContext};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};

/// Connection lifecycle (spec.md §4.5 Testable Properties 1-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Operational,
    Closing,
    Closed,
}

/// One party's handler for requests/notifications the *peer* sends. The
/// server role plugs in [`dispatch::dispatch`] over a [`crate::registry::FeatureRegistry`];
/// the client role plugs in its own small table of server-initiated
/// methods (`roots/list`, `sampling/createMessage`, ...).
pub type MethodHandler =
    Arc<dyn Fn(TransportContext, String, Option<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

type Waiter = oneshot::Sender<Result<Value>>;

/// A consumer of inbound notifications the role-specific `MethodHandler`
/// never sees: every notification except `notifications/initialized` and
/// `notifications/cancelled`, which the session interprets itself. The
/// client uses this to fan `tools/list_changed`, `resources/updated`,
/// `logging/message`, `progress`, etc. out to registered consumers
/// (spec.md §4.6).
pub type NotificationSink =
    Arc<dyn Fn(String, Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A live connection: the handshake state machine plus request/response
/// correlation, shared by client and server roles (spec.md §4.5, C5).
pub struct Session {
    state: RwLock<SessionState>,
    write_tx: mpsc::UnboundedSender<Envelope>,
    outstanding: Mutex<HashMap<RequestId, Waiter>>,
    inbound_contexts: Mutex<HashMap<RequestId, TransportContext>>,
    next_id: AtomicI64,
    config: Config,
    handler: MethodHandler,
    notification_sink: Option<NotificationSink>,
    is_server: bool,
    log_level: RwLock<LevelFilter>,
}

impl Session {
    /// Wire up a session over `transport`, spawning the reader/writer
    /// actor task and the inbound-processing task. `handler` answers
    /// every peer-initiated method except `initialize` and
    /// `notifications/initialized`, which the session gates itself.
    /// `notification_sink`, if given, receives every inbound notification
    /// the session doesn't interpret itself.
    pub fn spawn<T: Transport + 'static>(
        transport: T,
        config: Config,
        is_server: bool,
        handler: MethodHandler,
        notification_sink: Option<NotificationSink>,
    ) -> (Arc<Session>, tokio::task::JoinHandle<()>) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let initial_log_level = config
            .log_level
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::INFO);

        let session = Arc::new(Session {
            state: RwLock::new(SessionState::Created),
            write_tx,
            outstanding: Mutex::new(HashMap::new()),
            inbound_contexts: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            config,
            handler,
            notification_sink,
            is_server,
            log_level: RwLock::new(initial_log_level),
        });

        tokio::spawn(transport_actor(transport, write_rx, inbound_tx));
        let processing = tokio::spawn(run_inbound_loop(session.clone(), inbound_rx));

        (session, processing)
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// The session-local log level set via `logging/setLevel`, or the
    /// config-wide default if the peer never called it.
    pub async fn log_level(&self) -> LevelFilter {
        *self.log_level.read().await
    }

    async fn set_log_level(&self, level: LevelFilter) {
        *self.log_level.write().await = level;
    }

    async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Send a request to the peer and await its response, bounded by the
    /// session's configured default timeout (spec.md §5's "Outstanding
    /// requests that never complete" -> `Error::Timeout`).
    pub async fn request(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, None).await
    }

    /// Like [`Session::request`], but `timeout` overrides the session's
    /// configured default for this one call (spec.md §4.6's per-call
    /// deadline).
    pub async fn request_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Value> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.outstanding.lock().await.insert(id.clone(), tx);

        self.write_tx
            .send(Envelope::request(id.clone(), method, params))
            .map_err(|_| Error::SessionClosed)?;

        let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
        let outcome = tokio::time::timeout(timeout, rx).await;

        match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.outstanding.lock().await.remove(&id);
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Send a fire-and-forget notification to the peer.
    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        self.write_tx
            .send(Envelope::notification(method, params))
            .map_err(|_| Error::SessionClosed)
    }

    /// Ask the peer to cancel a request this session previously issued,
    /// and resolve the local Waiter with [`Error::Cancelled`] immediately
    /// rather than leaving the caller waiting on a peer that may never
    /// answer (spec.md §5's cooperative cancellation).
    pub async fn cancel(&self, request_id: RequestId) -> Result<()> {
        if let Some(waiter) = self.outstanding.lock().await.remove(&request_id) {
            let _ = waiter.send(Err(Error::Cancelled(request_id.to_string())));
        }
        self.notify(
            "notifications/cancelled",
            Some(json!({ "requestId": request_id })),
        )
    }

    /// Client-role handshake: send `initialize`, then `notifications/initialized`
    /// once the server has answered (spec.md §4.5 Testable Property 1).
    pub async fn initialize(&self, params: Value) -> Result<Value> {
        self.set_state(SessionState::Initializing).await;
        let result = self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized", None)?;
        self.set_state(SessionState::Operational).await;
        Ok(result)
    }

    /// Resolve every outstanding Waiter with [`Error::SessionClosed`] and
    /// mark the session torn down (spec.md §4.5 Testable Property 4:
    /// "every outstanding waiter is resolved, never left pending").
    pub async fn shutdown(&self) {
        self.set_state(SessionState::Closing).await;
        let mut outstanding = self.outstanding.lock().await;
        for (_, waiter) in outstanding.drain() {
            let _ = waiter.send(Err(Error::SessionClosed));
        }
        drop(outstanding);
        self.set_state(SessionState::Closed).await;
    }
}

async fn transport_actor<T: Transport>(
    mut transport: T,
    mut write_rx: mpsc::UnboundedReceiver<Envelope>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
) {
    loop {
        tokio::select! {
            read = transport.read_message() => {
                match read {
                    Ok(Some(envelope)) => {
                        if inbound_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "transport read failed, closing session");
                        break;
                    }
                }
            }
            outgoing = write_rx.recv() => {
                match outgoing {
                    Some(envelope) => {
                        if let Err(e) = transport.write_message(envelope).await {
                            warn!(error = %e, "transport write failed, closing session");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = transport.close().await;
}

async fn run_inbound_loop(session: Arc<Session>, mut inbound_rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = inbound_rx.recv().await {
        process_envelope(&session, envelope).await;
    }
    session.shutdown().await;
}

fn process_envelope(session: &Arc<Session>, envelope: Envelope) -> BoxFuture<'static, ()> {
    let session = session.clone();
    Box::pin(async move {
        match envelope {
            Envelope::Batch(items) => {
                for item in items {
                    process_envelope(&session, item).await;
                }
            }
            Envelope::Response { id, result, error, .. } => {
                if let Some(waiter) = session.outstanding.lock().await.remove(&id) {
                    let outcome = match error {
                        Some(e) => Err(Error::protocol(e.to_string())),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    let _ = waiter.send(outcome);
                } else {
                    debug!(id = %id, "response for unknown request id, dropping");
                }
            }
            Envelope::Notification { method, params, .. } => {
                handle_inbound_notification(&session, method, params).await;
            }
            Envelope::Request { id, method, params, .. } => {
                // Each inbound request gets its own task: spec.md §5
                // requires concurrent in-flight requests, and a slow
                // handler must never stall the reader.
                tokio::spawn(handle_inbound_request(session.clone(), id, method, params));
            }
        }
    })
}

async fn handle_inbound_notification(session: &Arc<Session>, method: String, params: Option<Value>) {
    match method.as_str() {
        "notifications/initialized" => {
            session.set_state(SessionState::Operational).await;
        }
        "notifications/cancelled" => {
            if let Some(request_id) = params.as_ref().and_then(extract_request_id) {
                if let Some(ctx) = session.inbound_contexts.lock().await.get(&request_id) {
                    ctx.cancel();
                }
            }
        }
        _ => match &session.notification_sink {
            Some(sink) => sink(method, params).await,
            None => debug!(method = %method, "unhandled inbound notification, no sink registered"),
        },
    }
}

fn extract_request_id(params: &Value) -> Option<RequestId> {
    let raw = params.get("requestId")?;
    serde_json::from_value(raw.clone()).ok()
}

fn extract_progress_token(params: &Value) -> Option<ProgressToken> {
    let raw = params.get("_meta")?.get("progressToken")?;
    serde_json::from_value(raw.clone()).ok()
}

async fn handle_inbound_request(
    session: Arc<Session>,
    id: RequestId,
    method: String,
    params: Option<Value>,
) {
    let progress_token = params.as_ref().and_then(extract_progress_token);
    let ctx = match progress_token {
        Some(token) => {
            let write_tx = session.write_tx.clone();
            let sink: ProgressSink = Arc::new(move |notification: ProgressNotification| {
                if let Ok(params) = serde_json::to_value(&notification) {
                    let _ = write_tx.send(Envelope::notification("notifications/progress", Some(params)));
                }
            });
            TransportContext::with_progress(id.to_string(), token, sink)
        }
        None => TransportContext::new(id.to_string()),
    };
    session
        .inbound_contexts
        .lock()
        .await
        .insert(id.clone(), ctx.clone());

    let response = dispatch_gated(&session, &ctx, &method, params).await;

    session.inbound_contexts.lock().await.remove(&id);

    let envelope = match response {
        Ok(value) => Envelope::response(id, value),
        Err(err) => {
            let code = err.rpc_code().unwrap_or(crate::error::code::INTERNAL_ERROR);
            Envelope::error_response(id, RpcError::new(code, err.to_string()))
        }
    };
    let _ = session.write_tx.send(envelope);
}

/// Handshake gating (spec.md §4.5 Testable Property 2): every method but
/// `initialize` and `ping` is rejected with `-32002` until the session
/// reaches `Operational`.
async fn dispatch_gated(
    session: &Arc<Session>,
    ctx: &TransportContext,
    method: &str,
    params: Option<Value>,
) -> Result<Value> {
    if method == "initialize" {
        if !session.is_server {
            return Err(Error::protocol("client role does not accept `initialize`"));
        }
        let state = session.state().await;
        if state != SessionState::Created {
            return Err(Error::InvalidRequest("already initialized".to_string()));
        }
        session.set_state(SessionState::Initializing).await;
        return (session.handler)(ctx.clone(), method.to_string(), params).await;
    }

    if method == "ping" {
        return Ok(json!({}));
    }

    if method == "logging/setLevel" {
        let level = params
            .as_ref()
            .and_then(|p| p.get("level"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_params("logging/setLevel requires a string `level`"))?;
        let parsed = level
            .parse::<LevelFilter>()
            .map_err(|_| Error::invalid_params(format!("unknown log level: {}", level)))?;
        session.set_log_level(parsed).await;
        return Ok(json!({}));
    }

    let state = session.state().await;
    if session.is_server && state != SessionState::Operational {
        return Err(Error::NotInitialized);
    }

    (session.handler)(ctx.clone(), method.to_string(), params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::duplex::DuplexTransport;
    use std::time::Duration;

    fn echo_handler() -> MethodHandler {
        Arc::new(|_ctx, method, params| {
            Box::pin(async move {
                if method == "boom" {
                    return Err(Error::internal("handler exploded"));
                }
                Ok(params.unwrap_or(Value::Null))
            })
        })
    }

    #[tokio::test]
    async fn initialize_handshake_reaches_operational() {
        let (client_t, server_t) = DuplexTransport::pair();
        let config = Config::default();

        let (server, _jh1) = Session::spawn(server_t, config.clone(), true, echo_handler(), None);
        let (client, _jh2) = Session::spawn(client_t, config, false, echo_handler(), None);

        assert_eq!(client.state().await, SessionState::Created);

        let result = client
            .initialize(json!({"protocolVersion": "2025-06-18"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"protocolVersion": "2025-06-18"}));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.state().await, SessionState::Operational);
        assert_eq!(server.state().await, SessionState::Operational);
    }

    #[tokio::test]
    async fn requests_before_handshake_are_rejected() {
        let (client_t, server_t) = DuplexTransport::pair();
        let config = Config::default();

        let (_server, _jh1) = Session::spawn(server_t, config.clone(), true, echo_handler(), None);
        let (client, _jh2) = Session::spawn(client_t, config, false, echo_handler(), None);

        let result = client.request("tools/list", None).await;
        match result {
            Err(Error::Protocol(message)) => assert!(message.contains("server not initialized")),
            other => panic!("expected NotInitialized, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn requests_during_initializing_are_rejected() {
        let (client_t, server_t) = DuplexTransport::pair();
        let config = Config::default();

        let (_server, _jh1) = Session::spawn(server_t, config.clone(), true, echo_handler(), None);
        let (client, _jh2) = Session::spawn(client_t, config, false, echo_handler(), None);

        // Drive the handshake request/response by hand, without the
        // `notifications/initialized` follow-up `initialize()` sends, so
        // the server is left in `Initializing` rather than `Operational`.
        client
            .request("initialize", Some(json!({"protocolVersion": "2025-06-18"})))
            .await
            .unwrap();

        let result = client.request("tools/list", None).await;
        match result {
            Err(Error::Protocol(message)) => assert!(message.contains("server not initialized")),
            other => panic!("expected NotInitialized, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn handler_error_surfaces_as_rpc_error() {
        let (client_t, server_t) = DuplexTransport::pair();
        let config = Config::default();

        let (_server, _jh1) = Session::spawn(server_t, config.clone(), true, echo_handler(), None);
        let (client, _jh2) = Session::spawn(client_t, config, false, echo_handler(), None);

        client.initialize(json!({})).await.unwrap();
        let result = client.request("boom", None).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn cancel_resolves_local_waiter_without_peer_response() {
        let (client_t, server_t) = DuplexTransport::pair();
        let config = Config::default();

        // A handler that never answers, so the request's Waiter can only
        // ever be resolved locally by `cancel`.
        let stalling_handler: MethodHandler = Arc::new(|_ctx, _method, _params| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            })
        });

        let (_server, _jh1) = Session::spawn(server_t, config.clone(), true, stalling_handler, None);
        let (client, _jh2) = Session::spawn(client_t, config, false, echo_handler(), None);

        client.initialize(json!({})).await.unwrap();

        let client_for_request = client.clone();
        let pending = tokio::spawn(async move { client_for_request.request("slow/op", None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.cancel(RequestId::Number(2)).await.unwrap();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn shutdown_resolves_outstanding_waiters() {
        let (client_t, server_t) = DuplexTransport::pair();
        let config = Config::default();
        let (server, _jh1) = Session::spawn(server_t, config.clone(), true, echo_handler(), None);
        let (client, _jh2) = Session::spawn(client_t, config, false, echo_handler(), None);

        client.initialize(json!({})).await.unwrap();

        let (tx, rx) = oneshot::channel();
        client
            .outstanding
            .lock()
            .await
            .insert(RequestId::Number(9999), tx);
        client.shutdown().await;

        let outcome = rx.await.unwrap();
        assert!(outcome.is_err());
        drop(server);
    }
}
