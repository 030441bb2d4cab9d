//! Handler capability interface and the method-name registry.
//!
//! A method is served by exactly one of two handler shapes: a plain
//! [`RequestHandler`] or a [`CancellableHandler`] that also receives the
//! request's cancellation token. Async closures implement both.

pub mod ping;
pub mod subscription;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::error::McpError;
use crate::notifications::NotificationManager;
use crate::protocol::{methods, Notification, Request};

pub type HandlerResult = Result<Value, McpError>;

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request) -> HandlerResult;
}

#[async_trait]
pub trait CancellableHandler: Send + Sync {
    async fn handle(&self, request: Request, token: CancellationToken) -> HandlerResult;
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: Notification) -> Result<(), McpError>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, request: Request) -> HandlerResult {
        (self)(request).await
    }
}

#[async_trait]
impl<F, Fut> CancellableHandler for F
where
    F: Fn(Request, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, request: Request, token: CancellationToken) -> HandlerResult {
        (self)(request, token).await
    }
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), McpError>> + Send + 'static,
{
    async fn handle(&self, notification: Notification) -> Result<(), McpError> {
        (self)(notification).await
    }
}

/// A registered request handler, tagged by whether it takes a token.
#[derive(Clone)]
pub enum RegisteredHandler {
    Plain(Arc<dyn RequestHandler>),
    Cancellable(Arc<dyn CancellableHandler>),
}

impl RegisteredHandler {
    pub async fn invoke(&self, request: Request, token: CancellationToken) -> HandlerResult {
        match self {
            Self::Plain(handler) => handler.handle(request).await,
            Self::Cancellable(handler) => handler.handle(request, token).await,
        }
    }
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain"),
            Self::Cancellable(_) => f.write_str("Cancellable"),
        }
    }
}

/// Method name → handler. Registering a name again replaces the old entry.
#[derive(Default)]
pub struct HandlerRegistry {
    requests: HashMap<String, RegisteredHandler>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: impl RequestHandler + 'static) {
        self.requests
            .insert(method.into(), RegisteredHandler::Plain(Arc::new(handler)));
    }

    pub fn register_cancellable(
        &mut self,
        method: impl Into<String>,
        handler: impl CancellableHandler + 'static,
    ) {
        self.requests
            .insert(method.into(), RegisteredHandler::Cancellable(Arc::new(handler)));
    }

    pub fn register_notification(
        &mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) {
        self.notifications.insert(method.into(), Arc::new(handler));
    }

    /// Install `ping`, `resources/subscribe` and `resources/unsubscribe`.
    pub fn register_builtins(&mut self, notifications: Arc<NotificationManager>) {
        self.register(methods::PING, ping::Ping);
        self.register(
            methods::RESOURCES_SUBSCRIBE,
            subscription::Subscribe::new(Arc::clone(&notifications)),
        );
        self.register(
            methods::RESOURCES_UNSUBSCRIBE,
            subscription::Unsubscribe::new(notifications),
        );
    }

    pub fn get(&self, method: &str) -> Option<&RegisteredHandler> {
        self.requests.get(method)
    }

    pub fn notification(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications.get(method).cloned()
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    /// Registered request method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.requests.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("requests", &self.methods())
            .field("notifications", &self.notifications.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closures_register_as_either_shape() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |req: Request| async move {
            Ok::<_, McpError>(req.params.unwrap_or(Value::Null))
        });
        registry.register_cancellable("watch", |_req: Request, token: CancellationToken| async move {
            Ok::<_, McpError>(json!({ "cancelled": token.is_cancelled() }))
        });

        let echo = registry.get("echo").unwrap().clone();
        let out = echo
            .invoke(Request::new(1, "echo", Some(json!({"a": 1}))), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"a": 1}));

        let watch = registry.get("watch").unwrap().clone();
        assert!(matches!(watch, RegisteredHandler::Cancellable(_)));
        let out = watch
            .invoke(Request::new(2, "watch", None), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "cancelled": false }));
    }

    #[test]
    fn builtins_are_listed() {
        let mut registry = HandlerRegistry::new();
        registry.register_builtins(Arc::new(NotificationManager::default()));
        assert_eq!(
            registry.methods(),
            vec!["ping", "resources/subscribe", "resources/unsubscribe"]
        );
    }
}
