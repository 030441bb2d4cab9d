//! In-flight request tracking and cooperative cancellation.
//!
//! Cancellation is advisory: a cancelled token only changes what the handler
//! observes. The runtime never aborts a running handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::McpError;
use crate::protocol::RequestId;

/// Why and when a token was cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelInfo {
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TokenState {
    info: Mutex<Option<CancelInfo>>,
    signal: tokio_util::sync::CancellationToken,
}

/// Handle a handler polls (or awaits) to notice caller-requested abandonment.
///
/// Clones share state. Once cancelled, a token never reverts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.info.lock().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.state.info.lock().as_ref().and_then(|i| i.reason.clone())
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.state.info.lock().as_ref().map(|i| i.at)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        self.state.signal.cancelled().await;
    }

    /// `Err(Cancelled)` once cancelled, for use with `?` at checkpoints.
    pub fn check(&self) -> Result<(), McpError> {
        match &*self.state.info.lock() {
            Some(info) => Err(McpError::Cancelled {
                reason: info.reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// A `tokio_util` token tripped together with this one, for hosts that
    /// want to tie a spawned task's own cancellation to the request.
    pub fn child(&self) -> tokio_util::sync::CancellationToken {
        self.state.signal.child_token()
    }

    /// Transition to cancelled. Returns `false` if it already was.
    pub(crate) fn cancel(&self, reason: Option<String>) -> bool {
        {
            let mut info = self.state.info.lock();
            if info.is_some() {
                return false;
            }
            *info = Some(CancelInfo {
                reason,
                at: Utc::now(),
            });
        }
        self.state.signal.cancel();
        true
    }
}

struct Registration {
    token: CancellationToken,
    meta: Value,
    registered_at: Instant,
}

/// Global hook fired for every successful [`CancellationRegistry::cancel`].
pub type CancelCallback = Arc<dyn Fn(&RequestId, Option<&str>) + Send + Sync>;

/// Tracks in-flight requests and their tokens. Safe to share across tasks.
#[derive(Default)]
pub struct CancellationRegistry {
    active: Mutex<HashMap<RequestId, Registration>>,
    on_cancel: RwLock<Option<CancelCallback>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_cancel(&self, callback: impl Fn(&RequestId, Option<&str>) + Send + Sync + 'static) {
        *self.on_cancel.write() = Some(Arc::new(callback));
    }

    /// Track `id` and hand back its token. Re-registering an id replaces the
    /// previous registration.
    pub fn register(&self, id: RequestId, meta: Value) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self.active.lock().insert(
            id.clone(),
            Registration {
                token: token.clone(),
                meta,
                registered_at: Instant::now(),
            },
        );
        if previous.is_some() {
            warn!(request_id = %id, "request id re-registered while still in flight");
        }
        token
    }

    /// Stop tracking `id`. Idempotent; returns whether it was tracked.
    pub fn unregister(&self, id: &RequestId) -> bool {
        match self.active.lock().remove(id) {
            Some(reg) => {
                debug!(request_id = %id, elapsed_ms = reg.registered_at.elapsed().as_millis() as u64, "request finished");
                true
            }
            None => false,
        }
    }

    /// Cancel one request. One-shot: the registration is removed.
    ///
    /// Returns `false` if the id is unknown, e.g. the handler already finished.
    pub fn cancel(&self, id: &RequestId, reason: Option<&str>) -> bool {
        let Some(reg) = self.active.lock().remove(id) else {
            debug!(request_id = %id, "cancellation for unknown request dropped");
            return false;
        };
        reg.token.cancel(reason.map(str::to_string));
        debug!(request_id = %id, reason = reason.unwrap_or(""), meta = %reg.meta, "request cancelled");

        let callback = self.on_cancel.read().clone();
        if let Some(cb) = callback {
            cb(id, reason);
        }
        true
    }

    /// Cancel every tracked request. Returns how many were cancelled.
    pub fn cancel_all(&self, reason: Option<&str>) -> usize {
        let ids: Vec<RequestId> = self.active.lock().keys().cloned().collect();
        ids.iter().filter(|id| self.cancel(id, reason)).count()
    }

    pub fn is_active(&self, id: &RequestId) -> bool {
        self.active.lock().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Metadata recorded at registration.
    pub fn meta(&self, id: &RequestId) -> Option<Value> {
        self.active.lock().get(id).map(|r| r.meta.clone())
    }
}

impl std::fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rid(s: &str) -> RequestId {
        RequestId::Str(s.into())
    }

    #[test]
    fn cancel_after_unregister_reports_not_found() {
        let reg = CancellationRegistry::new();
        let _token = reg.register(rid("r1"), json!({}));
        assert!(reg.unregister(&rid("r1")));
        assert!(!reg.cancel(&rid("r1"), Some("late")));
    }

    #[test]
    fn unregister_after_cancel_is_a_noop() {
        let reg = CancellationRegistry::new();
        let token = reg.register(rid("r1"), json!({}));
        assert!(reg.cancel(&rid("r1"), Some("user")));
        assert!(!reg.unregister(&rid("r1")));
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("user"));
    }

    #[test]
    fn cancel_is_one_shot() {
        let reg = CancellationRegistry::new();
        let _token = reg.register(rid("r1"), json!({}));
        assert!(reg.cancel(&rid("r1"), None));
        assert!(!reg.cancel(&rid("r1"), None));
    }

    #[test]
    fn cancelled_token_never_reverts() {
        let token = CancellationToken::new();
        assert!(token.cancel(Some("first".into())));
        assert!(!token.cancel(Some("second".into())));
        assert_eq!(token.reason().as_deref(), Some("first"));
        assert!(token.cancelled_at().is_some());
        assert!(matches!(token.check(), Err(McpError::Cancelled { .. })));
    }

    #[test]
    fn cancel_all_counts_and_fires_callback() {
        let reg = CancellationRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        reg.set_on_cancel(move |_, reason| {
            assert_eq!(reason, Some("shutdown"));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let tokens: Vec<_> = (0..3).map(|i| reg.register(RequestId::Number(i), json!({}))).collect();
        assert_eq!(reg.cancel_all(Some("shutdown")), 3);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
        assert_eq!(reg.active_count(), 0);
    }

    #[tokio::test]
    async fn awaiting_token_wakes_on_cancel() {
        let reg = Arc::new(CancellationRegistry::new());
        let token = reg.register(rid("slow"), json!({"method": "tools/call"}));
        assert_eq!(reg.meta(&rid("slow")), Some(json!({"method": "tools/call"})));

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        reg.cancel(&rid("slow"), None);
        waiter.await.unwrap();
        assert!(token.child().is_cancelled());
    }
}
