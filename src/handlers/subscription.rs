use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{HandlerResult, RequestHandler};
use crate::error::McpError;
use crate::notifications::NotificationManager;
use crate::protocol::{Request, SubscribeParams};
use crate::schema::validate_params;

fn params_schema() -> Value {
    json!({
        "type": "object",
        "required": ["uri"],
        "properties": {
            "uri": { "type": "string", "minLength": 1 },
            "options": { "type": "object" }
        }
    })
}

fn parse(request: &Request) -> Result<SubscribeParams, McpError> {
    validate_params(&request.method, &params_schema(), request.params.as_ref())?;
    Ok(request.parse_params()?)
}

/// `resources/subscribe`: enables `notifications/resources/updated` for a URI.
pub struct Subscribe {
    notifications: Arc<NotificationManager>,
}

impl Subscribe {
    pub fn new(notifications: Arc<NotificationManager>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl RequestHandler for Subscribe {
    async fn handle(&self, request: Request) -> HandlerResult {
        let params = parse(&request)?;
        debug!(uri = %params.uri, "resource subscription added");
        self.notifications
            .subscribe(params.uri, params.options.unwrap_or_else(|| json!({})));
        Ok(json!({}))
    }
}

/// `resources/unsubscribe`. Unsubscribing an unknown URI is not an error.
pub struct Unsubscribe {
    notifications: Arc<NotificationManager>,
}

impl Unsubscribe {
    pub fn new(notifications: Arc<NotificationManager>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl RequestHandler for Unsubscribe {
    async fn handle(&self, request: Request) -> HandlerResult {
        let params = parse(&request)?;
        if self.notifications.unsubscribe(&params.uri) {
            debug!(uri = %params.uri, "resource subscription removed");
        }
        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;

    #[tokio::test]
    async fn subscribe_then_unsubscribe() {
        let notifications = Arc::new(NotificationManager::default());
        let sub = Subscribe::new(Arc::clone(&notifications));
        let unsub = Unsubscribe::new(Arc::clone(&notifications));

        sub.handle(Request::new(1, "resources/subscribe", Some(json!({"uri": "file:///a"}))))
            .await
            .unwrap();
        assert!(notifications.is_subscribed("file:///a"));

        unsub
            .handle(Request::new(2, "resources/unsubscribe", Some(json!({"uri": "file:///a"}))))
            .await
            .unwrap();
        assert!(!notifications.is_subscribed("file:///a"));
    }

    #[tokio::test]
    async fn malformed_params_are_a_validation_fault() {
        let sub = Subscribe::new(Arc::new(NotificationManager::default()));
        let err = sub
            .handle(Request::new(1, "resources/subscribe", Some(json!({"uri": 42}))))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);
        let data = err.to_error_object("resources/subscribe").data.unwrap();
        assert!(!data["fieldErrors"].as_array().unwrap().is_empty());
    }
}
