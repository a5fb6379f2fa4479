//! Sync↔async bridge (spec.md §4.4, C4).
//!
//! The wire-facing side of the registry only ever holds one handler
//! shape — [`AsyncHandlerFn`], an async closure over a [`TransportContext`]
//! and a JSON `Value`. [`from_sync`] adapts a blocking closure onto that
//! shape so a user can write ordinary blocking code without risking the
//! transport reader task (spec.md §4.4's invariant: "no user-supplied
//! sync handler ever runs on the transport's reader task").
//!
//! Grounded on the teacher's `tokio::time::timeout`/`Arc<RwLock<_>>`
//! idiom in `lifecycle/mod.rs` as the model for "what this codebase
//! reaches for when it needs to keep blocking work off a critical
//! path", generalized into a single conversion function per spec.md §9's
//! design note ("better modeled as a single handler interface ... with a
//! thin adapter that schedules blocking implementations").

use crate::error::{Error, Result};
use crate::transport::TransportContext;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// A handler already in async form: it may suspend, and it must not
/// block the calling task.
pub type AsyncHandlerFn =
    Arc<dyn Fn(TransportContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A handler that blocks the calling thread until it produces a result.
pub type SyncHandlerFn =
    Arc<dyn Fn(TransportContext, Value) -> Result<Value> + Send + Sync>;

/// Convert a blocking handler into the async shape the registry stores.
///
/// `immediate_execution = true` runs the handler inline on the calling
/// task — only correct when that task is already decoupled from the
/// transport's reader (spec.md §4.4). The default path offloads to
/// [`tokio::task::spawn_blocking`], with concurrent invocations of *this*
/// handler capped at `pool_size` in-flight via a `Semaphore`, matching
/// [`crate::config::Config::worker_pool_size`].
///
/// A `None` handler is a registration-time error, not a silent
/// pass-through (spec.md §9's Open Question, resolved in SPEC_FULL.md).
pub fn from_sync(
    handler: Option<SyncHandlerFn>,
    immediate_execution: bool,
    pool_size: usize,
) -> Result<AsyncHandlerFn> {
    let handler = handler.ok_or_else(|| {
        Error::registration("sync handler conversion received no handler (null spec)")
    })?;

    if immediate_execution {
        Ok(Arc::new(move |ctx, args| {
            let handler = handler.clone();
            Box::pin(async move { handler(ctx, args) })
        }))
    } else {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(pool_size.max(1)));
        Ok(Arc::new(move |ctx, args| {
            let handler = handler.clone();
            let semaphore = semaphore.clone();
            Box::pin(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::internal(e.to_string()))?;
                tokio::task::spawn_blocking(move || handler(ctx, args))
                    .await
                    .map_err(|e| Error::internal(format!("sync handler panicked: {}", e)))?
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn null_handler_is_registration_error() {
        let result = from_sync(None, false, 4);
        assert!(matches!(result, Err(Error::Registration(_))));
    }

    #[tokio::test]
    async fn blocking_handler_does_not_block_caller() {
        let handler: SyncHandlerFn = Arc::new(|_ctx, _args| {
            thread::sleep(Duration::from_millis(50));
            Ok(json!({"done": true}))
        });
        let async_handler = from_sync(Some(handler), false, 4).unwrap();

        let progressed = Arc::new(AtomicBool::new(false));
        let progressed_clone = progressed.clone();
        let background = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            progressed_clone.store(true, Ordering::SeqCst);
        });

        let ctx = TransportContext::new("test");
        let result = async_handler(ctx, json!({})).await.unwrap();
        background.await.unwrap();

        assert!(progressed.load(Ordering::SeqCst));
        assert_eq!(result, json!({"done": true}));
    }

    #[tokio::test]
    async fn immediate_execution_runs_inline() {
        let handler: SyncHandlerFn = Arc::new(|_ctx, args| Ok(args));
        let async_handler = from_sync(Some(handler), true, 4).unwrap();
        let ctx = TransportContext::new("test");
        let result = async_handler(ctx, json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrent_invocations() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let in_flight_for_handler = in_flight.clone();
        let max_observed_for_handler = max_observed.clone();

        let handler: SyncHandlerFn = Arc::new(move |_ctx, _args| {
            let current = in_flight_for_handler.fetch_add(1, Ordering::SeqCst) + 1;
            max_observed_for_handler.fetch_max(current, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            in_flight_for_handler.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({}))
        });
        let async_handler = from_sync(Some(handler), false, 2).unwrap();

        let calls = (0..6).map(|_| {
            let async_handler = async_handler.clone();
            tokio::spawn(async move { async_handler(TransportContext::new("test"), json!({})).await })
        });
        for call in calls {
            call.await.unwrap().unwrap();
        }

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
