use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::ErrorObject;
use crate::framing::MessageError;

/// JSON-RPC protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 id: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Str(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// A call expecting exactly one [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Deserialize `params` into a typed struct. Absent params are read as `{}`.
    pub fn parse_params<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let params = self.params.clone().unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(params)
    }
}

/// A fire-and-forget message. Never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Exactly one of `result` / `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(ErrorObject),
}

/// Reply to a [`Request`].
///
/// `id` is `None` only when the request could not be read far enough to
/// recover its id (parse errors); it serializes as `"id": null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Option<RequestId>,
    pub outcome: ResponseOutcome,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: ResponseOutcome::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    /// Build a response from loose parts, rejecting both-or-neither outcomes.
    pub fn from_parts(
        id: Option<RequestId>,
        result: Option<Value>,
        error: Option<ErrorObject>,
    ) -> Result<Self, MessageError> {
        let outcome = match (result, error) {
            (Some(result), None) => ResponseOutcome::Result(result),
            (None, Some(error)) => ResponseOutcome::Error(error),
            (Some(_), Some(_)) => {
                return Err(MessageError::invalid_shape(
                    id,
                    "response carries both result and error",
                )
                .in_response())
            }
            (None, None) => {
                return Err(MessageError::invalid_shape(
                    id,
                    "response carries neither result nor error",
                )
                .in_response())
            }
        };
        Ok(Self { id, outcome })
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            ResponseOutcome::Result(v) => Some(v),
            ResponseOutcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            ResponseOutcome::Result(_) => None,
            ResponseOutcome::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }
}

/// Any JSON-RPC 2.0 message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Classify a decoded JSON document.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let Value::Object(map) = value else {
            return Err(MessageError::invalid_shape(None, "message must be a JSON object"));
        };
        let response_shaped = !map.contains_key("method")
            && (map.contains_key("result") || map.contains_key("error"));
        Self::classify(map).map_err(|e| if response_shaped { e.in_response() } else { e })
    }

    fn classify(mut map: Map<String, Value>) -> Result<Self, MessageError> {

        // Recover the id first so shape errors can still be answered.
        let raw_id = map.remove("id");
        let id = match &raw_id {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                RequestId::from_value(v)
                    .ok_or_else(|| MessageError::invalid_shape(None, "id must be a string or integer"))?,
            ),
        };

        match map.remove("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            _ => return Err(MessageError::invalid_shape(id, "jsonrpc must be \"2.0\"")),
        }

        if let Some(method) = map.remove("method") {
            let Value::String(method) = method else {
                return Err(MessageError::invalid_shape(id, "method must be a string"));
            };
            let params = map.remove("params");
            return match raw_id {
                None => Ok(Self::Notification(Notification { method, params })),
                Some(Value::Null) => Err(MessageError::invalid_shape(None, "request id must not be null")),
                Some(_) => Ok(Self::Request(Request {
                    // id is Some here: non-null raw ids were validated above
                    id: id.ok_or_else(|| MessageError::invalid_shape(None, "missing request id"))?,
                    method,
                    params,
                })),
            };
        }

        if raw_id.is_none() {
            return Err(MessageError::invalid_shape(None, "message has neither method nor id"));
        }

        let result = map.remove("result");
        let error = match map.remove("error") {
            Some(e) => Some(
                serde_json::from_value::<ErrorObject>(e)
                    .map_err(|e| MessageError::invalid_shape(id.clone(), format!("malformed error object: {e}")))?,
            ),
            None => None,
        };
        Response::from_parts(id, result, error).map(Self::Response)
    }

    /// Render as a JSON document. Exact inverse of [`Message::from_value`].
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
        match self {
            Self::Request(req) => {
                map.insert("id".into(), req.id.to_value());
                map.insert("method".into(), Value::String(req.method.clone()));
                if let Some(params) = &req.params {
                    map.insert("params".into(), params.clone());
                }
            }
            Self::Notification(n) => {
                map.insert("method".into(), Value::String(n.method.clone()));
                if let Some(params) = &n.params {
                    map.insert("params".into(), params.clone());
                }
            }
            Self::Response(resp) => {
                map.insert(
                    "id".into(),
                    resp.id.as_ref().map_or(Value::Null, RequestId::to_value),
                );
                match &resp.outcome {
                    ResponseOutcome::Result(v) => {
                        map.insert("result".into(), v.clone());
                    }
                    ResponseOutcome::Error(e) => {
                        map.insert("error".into(), e.to_value());
                    }
                }
            }
        }
        Value::Object(map)
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Self::Notification(n)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}
