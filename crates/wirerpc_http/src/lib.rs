#![forbid(unsafe_code)]
//! Single-shot HTTP binding for `wirerpc`.
//!
//! One HTTP request carries one JSON-RPC envelope; the adapter validates the
//! HTTP surface (method, media type, charset, minimum body length), runs the
//! dispatch pipeline, and maps the outcome to a status code:
//!
//! | outcome | status |
//! |---|---|
//! | notification accepted | 204 |
//! | success | 200 |
//! | method not found (−32601) | 404 |
//! | invalid request / parse error (−32600, −32700) | 400 |
//! | any other error | 500 |
//! | non-POST/GET | 405 |
//! | media type not `application/json*`, bad charset | 415 |
//!
//! The mapping is replaceable through [`HttpRpcAdapter::with_status_mapper`].
//! HTTP framing itself (sockets, header parsing, TLS) belongs to the host
//! server; this crate only consumes its decoded request model.

use std::sync::Arc;

use tracing::debug;
use wirerpc::{codes, Features, Message, Response, ResponseError, RpcServer};

/// Smallest well-formed request: `{"jsonrpc":…}` cannot fit in fewer bytes.
const MIN_REQUEST_LENGTH: usize = 12;

const JSON_MEDIA_TYPE: &str = "application/json";

/// Decoded single-shot HTTP request, as produced by the host HTTP server.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method token, e.g. `POST`.
    pub method: String,
    /// Raw `Content-Type` header value, if present.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Response model handed back to the host HTTP server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }
}

/// HTTP-level facts about the call, readable by handlers through the feature
/// bag.
#[derive(Clone, Debug)]
pub struct HttpRequestInfo {
    pub method: String,
    pub content_type: Option<String>,
}

/// Dispatch outcome handed to the status mapper.
#[derive(Clone, Copy, Debug)]
pub enum HttpOutcome<'a> {
    /// The envelope was a notification; no response body exists.
    Notification,
    Success(&'a Response),
    Error(&'a ResponseError),
}

type StatusMapper = Arc<dyn for<'a> Fn(HttpOutcome<'a>) -> u16 + Send + Sync>;

/// Adapter running one envelope per HTTP exchange against an [`RpcServer`].
#[derive(Clone)]
pub struct HttpRpcAdapter {
    server: RpcServer,
    status_mapper: StatusMapper,
    append_charset: bool,
}

impl HttpRpcAdapter {
    pub fn new(server: RpcServer) -> Self {
        Self {
            server,
            status_mapper: Arc::new(default_status_mapper),
            append_charset: false,
        }
    }

    /// Replaces the outcome → status-code mapping.
    pub fn with_status_mapper<F>(mut self, mapper: F) -> Self
    where
        F: for<'a> Fn(HttpOutcome<'a>) -> u16 + Send + Sync + 'static,
    {
        self.status_mapper = Arc::new(mapper);
        self
    }

    /// Appends `;charset=utf-8` to the response media type.
    pub fn append_charset(mut self, enabled: bool) -> Self {
        self.append_charset = enabled;
        self
    }

    /// Validates and dispatches one HTTP request.
    pub async fn handle(&self, request: HttpRequest, features: Features) -> HttpResponse {
        if !matches!(request.method.to_ascii_uppercase().as_str(), "POST" | "GET") {
            return HttpResponse::empty(405);
        }
        if request.body.len() < MIN_REQUEST_LENGTH {
            return HttpResponse::empty(400);
        }
        if let Some(content_type) = &request.content_type {
            if !is_json_media_type(content_type) {
                return HttpResponse::empty(415);
            }
            if !charset_is_supported(content_type) {
                return HttpResponse::empty(415);
            }
        }

        let body = match String::from_utf8(request.body.clone()) {
            Ok(text) => text,
            Err(error) => {
                debug!(%error, "request body is not valid UTF-8");
                return HttpResponse::empty(400);
            }
        };

        let mut features = features;
        features.insert(HttpRequestInfo {
            method: request.method.clone(),
            content_type: request.content_type.clone(),
        });

        let outcome = match Message::decode(&body) {
            Ok(message) => self.server.dispatch(message, features).await,
            Err(error) => Some(error.to_response()),
        };

        match outcome {
            None => {
                let status = (self.status_mapper)(HttpOutcome::Notification);
                HttpResponse::empty(status)
            }
            Some(response) => {
                let status = match &response.payload {
                    wirerpc::ResponsePayload::Result(_) => {
                        (self.status_mapper)(HttpOutcome::Success(&response))
                    }
                    wirerpc::ResponsePayload::Error(error) => {
                        (self.status_mapper)(HttpOutcome::Error(error))
                    }
                };
                self.envelope_response(status, &response)
            }
        }
    }

    fn envelope_response(&self, status: u16, response: &Response) -> HttpResponse {
        let body = match Message::Response(response.clone()).encode() {
            Ok(text) => text.into_bytes(),
            Err(error) => {
                debug!(%error, "failed to serialize response envelope");
                return HttpResponse::empty(500);
            }
        };
        let content_type = if self.append_charset {
            format!("{JSON_MEDIA_TYPE};charset=utf-8")
        } else {
            JSON_MEDIA_TYPE.to_string()
        };
        HttpResponse {
            status,
            content_type: Some(content_type),
            body,
        }
    }
}

fn default_status_mapper(outcome: HttpOutcome<'_>) -> u16 {
    match outcome {
        HttpOutcome::Notification => 204,
        HttpOutcome::Success(_) => 200,
        HttpOutcome::Error(error) => match error.code {
            codes::METHOD_NOT_FOUND => 404,
            codes::INVALID_REQUEST | codes::PARSE_ERROR => 400,
            _ => 500,
        },
    }
}

fn is_json_media_type(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    media_type
        .to_ascii_lowercase()
        .starts_with(JSON_MEDIA_TYPE)
}

fn charset_is_supported(content_type: &str) -> bool {
    for part in content_type.split(';').skip(1) {
        let part = part.trim().to_ascii_lowercase();
        if let Some(value) = part.strip_prefix("charset=") {
            return matches!(value.trim_matches('"'), "utf-8" | "utf8" | "us-ascii" | "ascii");
        }
    }
    true
}
