use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error code registry
// ---------------------------------------------------------------------------

/// Every code the runtime may emit.
///
/// - JSON-RPC reserved range (-32700..-32600): transport and parse faults
/// - Extended standard codes (-32000..-32005): runtime conditions
/// - Domain codes (-32011..-32020): tool/resource/prompt/session faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,

    ConnectionClosed,
    RequestTimeout,
    RequestCancelled,
    CircuitOpen,
    ServiceDegraded,

    SessionError,
    ToolNotFound,
    ToolError,
    ResourceNotFound,
    ResourceError,
    PromptNotFound,
    PromptError,
    ValidationError,
    SubscriptionError,
    TransportError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 20] = [
        Self::ParseError,
        Self::InvalidRequest,
        Self::MethodNotFound,
        Self::InvalidParams,
        Self::InternalError,
        Self::ConnectionClosed,
        Self::RequestTimeout,
        Self::RequestCancelled,
        Self::CircuitOpen,
        Self::ServiceDegraded,
        Self::SessionError,
        Self::ToolNotFound,
        Self::ToolError,
        Self::ResourceNotFound,
        Self::ResourceError,
        Self::PromptNotFound,
        Self::PromptError,
        Self::ValidationError,
        Self::SubscriptionError,
        Self::TransportError,
    ];

    /// Numeric wire code.
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,

            Self::ConnectionClosed => -32000,
            Self::RequestTimeout => -32001,
            Self::RequestCancelled => -32002,
            Self::CircuitOpen => -32003,
            Self::ServiceDegraded => -32004,

            Self::SessionError => -32011,
            Self::ToolNotFound => -32012,
            Self::ToolError => -32013,
            Self::ResourceNotFound => -32014,
            Self::ResourceError => -32015,
            Self::PromptNotFound => -32016,
            Self::PromptError => -32017,
            Self::ValidationError => -32018,
            Self::SubscriptionError => -32019,
            Self::TransportError => -32020,
        }
    }

    /// Look up a registry member by numeric code.
    pub fn from_i32(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Canonical human-readable message.
    pub fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ConnectionClosed => "Connection closed",
            Self::RequestTimeout => "Request timed out",
            Self::RequestCancelled => "Request cancelled",
            Self::CircuitOpen => "Circuit open",
            Self::ServiceDegraded => "Service degraded",
            Self::SessionError => "Session error",
            Self::ToolNotFound => "Tool not found",
            Self::ToolError => "Tool error",
            Self::ResourceNotFound => "Resource not found",
            Self::ResourceError => "Resource error",
            Self::PromptNotFound => "Prompt not found",
            Self::PromptError => "Prompt error",
            Self::ValidationError => "Validation error",
            Self::SubscriptionError => "Subscription error",
            Self::TransportError => "Transport error",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire error object
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 error object.
///
/// `data` is schema-less; by convention the runtime reserves its `context`
/// and `timestamp` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Registry member for this object's code, if it is one of ours.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_i32(self.code)
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, detail)
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, detail)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, detail)
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, detail)
    }

    pub(crate) fn to_value(&self) -> Value {
        // A struct of String/i32/Value cannot fail to serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<ErrorCode> for ErrorObject {
    fn from(code: ErrorCode) -> Self {
        Self::new(code, code.message())
    }
}
