//! Pluggable transport boundary (spec.md §4.2, C2).
//!
//! Concrete transports (stdio, SSE, streamable HTTP) are external
//! collaborators per spec.md §1 and are not implemented here. The one
//! transport this crate ships, [`duplex::DuplexTransport`], exists
//! strictly to exercise the session/registry/bridge machinery in tests
//! and the in-repo demo.

pub mod duplex;

use crate::error::Result;
use crate::protocol::{Envelope, ProgressNotification, ProgressToken};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Transport-level failures (spec.md §4.2: "the transport surfaces a
/// malformed-input signal that the session turns into a protocol error").
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("transport closed")]
    Closed,
}

/// A framed, bidirectional message channel. The session is agnostic to
/// how bytes become [`Envelope`]s; it only relies on the guarantees in
/// spec.md §4.2: writes to a single session are serialized FIFO, and
/// reads either produce a well-formed envelope, signal end of stream,
/// or surface a [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next envelope, or `Ok(None)` at a clean end of stream.
    async fn read_message(&mut self) -> std::result::Result<Option<Envelope>, TransportError>;

    /// Write one envelope. Callers (the session's single writer) are
    /// responsible for serializing concurrent writes; implementations
    /// may assume single-threaded access to this method.
    async fn write_message(&mut self, message: Envelope) -> std::result::Result<(), TransportError>;

    /// Ask the peer to wind down; further writes may still be attempted
    /// until [`Transport::close`] is called.
    async fn close_gracefully(&mut self) -> std::result::Result<(), TransportError>;

    /// Tear down the transport unconditionally.
    async fn close(&mut self) -> std::result::Result<(), TransportError>;
}

/// Emits one progress update to wherever the peer that supplied the
/// progress token is listening. Built by the session over its outbound
/// write queue, never by handler code directly.
pub type ProgressSink = Arc<dyn Fn(ProgressNotification) + Send + Sync>;

/// Per-call correlation/cancellation context propagated to every handler
/// (spec.md §3 TransportContext). Created when a request is accepted
/// from the transport, dropped when its response is written.
#[derive(Debug, Clone)]
pub struct TransportContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    cancelled: AtomicBool,
    correlation_id: String,
    progress: Option<(ProgressToken, ProgressSink)>,
}

impl std::fmt::Debug for ContextInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextInner")
            .field("cancelled", &self.cancelled)
            .field("correlation_id", &self.correlation_id)
            .field("has_progress_sink", &self.progress.is_some())
            .finish()
    }
}

impl TransportContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                correlation_id: correlation_id.into(),
                progress: None,
            }),
        }
    }

    /// A context whose caller supplied a progress token: handlers may
    /// call [`TransportContext::emit_progress`] to send
    /// `notifications/progress` updates back through `sink` (supplemented
    /// from the wider pack, see SPEC_FULL.md §3).
    pub fn with_progress(
        correlation_id: impl Into<String>,
        token: ProgressToken,
        sink: ProgressSink,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                correlation_id: correlation_id.into(),
                progress: Some((token, sink)),
            }),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.inner.correlation_id
    }

    /// Cooperative cancellation signal; handlers should poll this and
    /// terminate promptly when it is set (spec.md §5).
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Send a `notifications/progress` update correlated to this call's
    /// progress token. A no-op when the caller never supplied one.
    pub fn emit_progress(&self, progress: f64, total: Option<f64>, message: Option<String>) {
        if let Some((token, sink)) = &self.inner.progress {
            sink(ProgressNotification {
                progress_token: token.clone(),
                progress,
                total,
                message,
            });
        }
    }
}

/// Helper used by [`Transport`] impls to translate a serde error into
/// [`Result`] at the session boundary.
pub(crate) fn malformed(err: impl std::fmt::Display) -> TransportError {
    TransportError::Malformed(err.to_string())
}

impl From<TransportError> for crate::error::Error {
    fn from(err: TransportError) -> Self {
        crate::error::Error::transport(err.to_string())
    }
}

/// Convenience re-export so callers writing a custom transport only
/// need `mcp_core::transport::*`.
pub type TransportResult<T> = Result<T>;
