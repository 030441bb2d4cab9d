//! Handler fault taxonomy and its mapping onto wire error payloads.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::protocol::{ErrorCode, ErrorObject};

/// One field-level complaint attached to a validation fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Fault raised by a handler, a resilience strategy, or the runtime itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum McpError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field_errors: Vec<FieldError>,
    },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("request cancelled{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Cancelled { reason: Option<String> },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("service degraded: {0}")]
    ServiceDegraded(String),

    /// Error returned by the peer in reply to an outbound request.
    #[error("peer error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),

    #[error("internal error: {0}")]
    Internal(String),

    /// Any other fault with caller-supplied context attached.
    #[error("{source}")]
    WithContext {
        source: Box<McpError>,
        context: Map<String, Value>,
    },
}

impl McpError {
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::InvalidParams(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn validation(message: impl Into<String>, field_errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            field_errors,
        }
    }

    /// Attach a caller-supplied context entry, carried into `data.context`.
    pub fn with_context(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        match self {
            Self::WithContext { source, mut context } => {
                context.insert(key.into(), value.into());
                Self::WithContext { source, context }
            }
            other => {
                let mut context = Map::new();
                context.insert(key.into(), value.into());
                Self::WithContext {
                    source: Box::new(other),
                    context,
                }
            }
        }
    }

    /// The fault with any context wrappers peeled off.
    pub fn root(&self) -> &McpError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable name of the fault kind.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Self::InvalidParams(_) => "invalid_params",
            Self::Validation { .. } => "validation",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::Transport(_) => "transport",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::Tool(_) => "tool",
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::Resource(_) => "resource",
            Self::PromptNotFound(_) => "prompt_not_found",
            Self::Prompt(_) => "prompt",
            Self::Subscription(_) => "subscription",
            Self::Session(_) => "session",
            Self::Cancelled { .. } => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen(_) => "circuit_open",
            Self::ServiceDegraded(_) => "service_degraded",
            Self::Remote(_) => "remote",
            Self::Internal(_) => "internal",
            Self::WithContext { .. } => unreachable!("root() never returns a context wrapper"),
        }
    }

    /// Registry code this fault is reported under.
    pub fn error_code(&self) -> ErrorCode {
        match self.root() {
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::ConnectionClosed(_) => ErrorCode::ConnectionClosed,
            Self::Transport(_) => ErrorCode::TransportError,
            Self::ToolNotFound(_) => ErrorCode::ToolNotFound,
            Self::Tool(_) => ErrorCode::ToolError,
            Self::ResourceNotFound(_) => ErrorCode::ResourceNotFound,
            Self::Resource(_) => ErrorCode::ResourceError,
            Self::PromptNotFound(_) => ErrorCode::PromptNotFound,
            Self::Prompt(_) => ErrorCode::PromptError,
            Self::Subscription(_) => ErrorCode::SubscriptionError,
            Self::Session(_) => ErrorCode::SessionError,
            Self::Cancelled { .. } => ErrorCode::RequestCancelled,
            Self::Timeout(_) => ErrorCode::RequestTimeout,
            Self::CircuitOpen(_) => ErrorCode::CircuitOpen,
            Self::ServiceDegraded(_) => ErrorCode::ServiceDegraded,
            // Peer codes are not ours to re-emit.
            Self::Remote(_) | Self::Internal(_) => ErrorCode::InternalError,
            Self::WithContext { .. } => unreachable!("root() never returns a context wrapper"),
        }
    }

    /// Whether a retry could plausibly succeed. Argument and validation
    /// faults never do.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.root(),
            Self::InvalidParams(_)
                | Self::Validation { .. }
                | Self::Cancelled { .. }
                | Self::CircuitOpen(_)
                | Self::ToolNotFound(_)
                | Self::ResourceNotFound(_)
                | Self::PromptNotFound(_)
        )
    }

    /// Render as a wire error with `data.context` and `data.timestamp`.
    pub fn to_error_object(&self, method: &str) -> ErrorObject {
        let root = self.root();
        let mut context = Map::new();
        context.insert("kind".into(), json!(self.kind()));
        context.insert("method".into(), json!(method));
        context.insert("trace".into(), json!(self.trace()));
        if let Self::WithContext { context: extra, .. } = self {
            for (k, v) in extra {
                context.insert(k.clone(), v.clone());
            }
        }

        let mut data = Map::new();
        data.insert("context".into(), Value::Object(context));
        data.insert(
            "timestamp".into(),
            json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
        if let Self::Validation { field_errors, .. } = root {
            data.insert("fieldErrors".into(), json!(field_errors));
        }
        if let Self::Remote(peer) = root {
            data.insert("peer".into(), json!(peer));
        }

        ErrorObject::new(self.error_code(), root.to_string()).with_data(Value::Object(data))
    }

    /// Chain of messages from the outermost wrapper down to the root fault.
    fn trace(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = self;
        while let Self::WithContext { source, context } = current {
            out.push(format!("context {}", Value::Object(context.clone())));
            current = source;
        }
        out.push(current.to_string());
        out
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

impl From<crate::transport::TransportError> for McpError {
    fn from(e: crate::transport::TransportError) -> Self {
        match e {
            crate::transport::TransportError::Closed => Self::ConnectionClosed(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kinds_to_registry_codes() {
        assert_eq!(McpError::invalid_params("x").error_code(), ErrorCode::InvalidParams);
        assert_eq!(McpError::validation("x", vec![]).error_code(), ErrorCode::ValidationError);
        assert_eq!(McpError::ConnectionClosed("x".into()).error_code(), ErrorCode::ConnectionClosed);
        assert_eq!(McpError::Transport("x".into()).error_code(), ErrorCode::TransportError);
        assert_eq!(McpError::internal("x").error_code(), ErrorCode::InternalError);
    }

    #[test]
    fn context_wrapper_is_transparent_for_code_and_kind() {
        let err = McpError::Tool("bad".into()).with_context("tool", "search").with_context("attempt", 2);
        assert_eq!(err.error_code(), ErrorCode::ToolError);
        assert_eq!(err.kind(), "tool");
        assert_eq!(err.to_string(), "tool error: bad");
    }

    #[test]
    fn error_object_carries_context_and_timestamp() {
        let err = McpError::Tool("bad".into()).with_context("tool", "search");
        let obj = err.to_error_object("tools/call");
        assert_eq!(obj.code, ErrorCode::ToolError.code());
        let data = obj.data.unwrap();
        assert_eq!(data["context"]["kind"], "tool");
        assert_eq!(data["context"]["method"], "tools/call");
        assert_eq!(data["context"]["tool"], "search");
        assert!(data["context"]["trace"].as_array().unwrap().len() >= 2);
        assert!(data["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn validation_error_attaches_field_errors() {
        let err = McpError::validation("bad input", vec![FieldError::new("/uri", "must be a string")]);
        let data = err.to_error_object("resources/subscribe").data.unwrap();
        assert_eq!(data["fieldErrors"][0]["field"], "/uri");
    }

    #[test]
    fn argument_faults_are_not_retryable() {
        assert!(!McpError::invalid_params("x").is_retryable());
        assert!(!McpError::validation("x", vec![]).with_context("k", 1).is_retryable());
        assert!(McpError::Transport("x".into()).is_retryable());
        assert!(McpError::internal("x").is_retryable());
    }
}
