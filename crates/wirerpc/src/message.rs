//! JSON-RPC 2.0 envelope types and their JSON codec.
//!
//! Incoming payloads are classified by field presence rather than by a serde
//! enum: a `method` with an `id` is a request, a `method` without an `id` is a
//! notification, an `id` without a `method` is a response. Anything else is an
//! invalid envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error codes defined by JSON-RPC 2.0 plus the framework-reserved range.
pub mod codes {
    /// Received bytes do not form valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// The payload is JSON but not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// No method candidate matched the request name.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// A required parameter was missing or failed conversion.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Dispatcher machinery failure unrelated to handler code.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A handler body panicked or returned an uncaught host error.
    pub const UNHANDLED_HOST_ERROR: i64 = -32010;
    /// Inclusive bounds of the range reserved for framework extensions.
    pub const EXTENSION_RANGE: (i64, i64) = (-32029, -32000);
}

/// A request or response identifier.
///
/// Integer tokens that fit a signed 32-bit value normalize to [`MessageId::I32`];
/// larger ones to [`MessageId::I64`]. Equality and hashing are structural over
/// kind and value, so the id is usable as a map key without further
/// canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Null,
    I32(i32),
    I64(i64),
    String(String),
}

impl MessageId {
    pub fn is_null(&self) -> bool {
        matches!(self, MessageId::Null)
    }
}

impl From<i32> for MessageId {
    fn from(id: i32) -> Self {
        MessageId::I32(id)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        match i32::try_from(id) {
            Ok(small) => MessageId::I32(small),
            Err(_) => MessageId::I64(id),
        }
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId::String(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        MessageId::String(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Null => f.write_str("null"),
            MessageId::I32(it) => fmt::Display::fmt(it, f),
            MessageId::I64(it) => fmt::Display::fmt(it, f),
            // Debug keeps `92` and `"92"` visually distinct in logs.
            MessageId::String(it) => fmt::Debug::fmt(it, f),
        }
    }
}

/// A call that expects a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: MessageId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<MessageId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A call that must not be answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
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

/// Exactly one of `result` or `error`, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: MessageId,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(ResponseError),
}

impl Response {
    pub fn success(id: impl Into<MessageId>, result: Value) -> Self {
        Self {
            id: id.into(),
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: impl Into<MessageId>, error: ResponseError) -> Self {
        Self {
            id: id.into(),
            payload: ResponsePayload::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(error) => Err(error),
        }
    }
}

/// The JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, "parse error").with_data(Value::String(detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, "invalid request").with_data(Value::String(detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("method `{method}` not found"),
        )
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, "invalid params").with_data(Value::String(detail.into()))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, detail)
    }

    /// Wraps a host-side error chain into the reserved `-32010` error with a
    /// structured `{ type, message, cause }` payload.
    pub fn from_host_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        fn cause_chain(error: &(dyn std::error::Error + 'static)) -> Value {
            let mut node = serde_json::json!({ "message": error.to_string() });
            if let Some(source) = error.source() {
                node["cause"] = cause_chain(source);
            }
            node
        }

        let mut data = serde_json::json!({
            "type": std::any::type_name::<E>(),
            "message": error.to_string(),
        });
        if let Some(source) = error.source() {
            data["cause"] = cause_chain(source);
        }

        Self::new(codes::UNHANDLED_HOST_ERROR, "unhandled host exception").with_data(data)
    }

    /// Wraps a captured panic payload into the reserved `-32010` error.
    pub fn from_panic(detail: impl Into<String>) -> Self {
        let data = serde_json::json!({
            "type": "panic",
            "message": detail.into(),
        });
        Self::new(codes::UNHANDLED_HOST_ERROR, "unhandled host exception").with_data(data)
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A single JSON-RPC envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Message::Notification(notification)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

/// Failure to turn bytes into an envelope.
///
/// The two variants preserve the protocol's distinction between `-32700`
/// (bytes are not JSON) and `-32600` (JSON, but not a valid envelope).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON: {detail}")]
    Parse { detail: String },
    #[error("invalid JSON-RPC envelope: {detail}")]
    Invalid { detail: String },
}

impl EnvelopeError {
    fn invalid(detail: impl Into<String>) -> Self {
        EnvelopeError::Invalid {
            detail: detail.into(),
        }
    }

    /// The JSON-RPC error code this failure maps to.
    pub fn code(&self) -> i64 {
        match self {
            EnvelopeError::Parse { .. } => codes::PARSE_ERROR,
            EnvelopeError::Invalid { .. } => codes::INVALID_REQUEST,
        }
    }

    /// The error response a dispatcher answers this failure with. The id is
    /// always null: a frame that failed to decode has no trustworthy id.
    pub fn to_response(&self) -> Response {
        let error = match self {
            EnvelopeError::Parse { detail } => ResponseError::parse_error(detail.clone()),
            EnvelopeError::Invalid { detail } => ResponseError::invalid_request(detail.clone()),
        };
        Response::error(MessageId::Null, error)
    }
}

impl Message {
    /// Serializes the envelope as a single line of JSON with the version tag.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        #[derive(Serialize)]
        struct Tagged<'a> {
            jsonrpc: &'static str,
            #[serde(flatten)]
            message: &'a Message,
        }

        serde_json::to_string(&Tagged {
            jsonrpc: JSONRPC_VERSION,
            message: self,
        })
        .map_err(|err| EnvelopeError::Parse {
            detail: err.to_string(),
        })
    }

    /// Decodes one envelope from text.
    pub fn decode(text: &str) -> Result<Message, EnvelopeError> {
        let value: Value = serde_json::from_str(text).map_err(|err| EnvelopeError::Parse {
            detail: err.to_string(),
        })?;
        Message::from_value(value)
    }

    /// Classifies and converts an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Message, EnvelopeError> {
        let Value::Object(object) = value else {
            return Err(EnvelopeError::invalid("envelope must be a JSON object"));
        };

        match object.get("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(EnvelopeError::invalid(format!(
                    "unsupported jsonrpc version {other}"
                )))
            }
            None => return Err(EnvelopeError::invalid("missing jsonrpc version")),
        }

        let has_id = object.contains_key("id");
        let has_method = object.contains_key("method");

        if has_method {
            let method = match object.get("method") {
                Some(Value::String(name)) if !name.is_empty() => name.clone(),
                _ => return Err(EnvelopeError::invalid("method must be a non-empty string")),
            };
            let params = decode_params(object.get("params"))?;

            if has_id {
                let id = decode_id(&object["id"])?;
                Ok(Message::Request(Request { id, method, params }))
            } else {
                Ok(Message::Notification(Notification { method, params }))
            }
        } else if has_id {
            let id = decode_id(&object["id"])?;
            let result = object.get("result").cloned();
            let error = object.get("error").cloned();
            let payload = match (result, error) {
                (Some(result), None) => ResponsePayload::Result(result),
                (None, Some(error)) => ResponsePayload::Error(
                    serde_json::from_value(error)
                        .map_err(|err| EnvelopeError::invalid(format!("bad error object: {err}")))?,
                ),
                (Some(_), Some(_)) => {
                    return Err(EnvelopeError::invalid(
                        "response carries both result and error",
                    ))
                }
                (None, None) => {
                    return Err(EnvelopeError::invalid(
                        "response carries neither result nor error",
                    ))
                }
            };
            Ok(Message::Response(Response { id, payload }))
        } else {
            Err(EnvelopeError::invalid(
                "envelope has neither method nor id",
            ))
        }
    }
}

fn decode_id(value: &Value) -> Result<MessageId, EnvelopeError> {
    serde_json::from_value(value.clone())
        .map_err(|_| EnvelopeError::invalid(format!("id must be an integer, string, or null, got {value}")))
}

fn decode_params(value: Option<&Value>) -> Result<Option<Value>, EnvelopeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(Some(params.clone())),
        Some(other) => Err(EnvelopeError::invalid(format!(
            "params must be an object or array, got {other}"
        ))),
    }
}
