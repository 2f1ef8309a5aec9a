//! Per-request context handed to handler bodies.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::features::Features;
use crate::message::MessageId;

/// Everything a handler may need about the call it serves: the request
/// itself, the session's feature bag, and the composed cancellation token
/// (the per-request trigger unioned with the reader-loop token).
#[derive(Clone, Debug)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    id: Option<MessageId>,
    method: String,
    params: Option<Value>,
    features: Features,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(
        id: Option<MessageId>,
        method: impl Into<String>,
        params: Option<Value>,
        features: Features,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                method: method.into(),
                params,
                features,
                cancellation,
            }),
        }
    }

    /// The request id; `None` for notifications.
    pub fn id(&self) -> Option<&MessageId> {
        self.inner.id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.inner.params.as_ref()
    }

    pub fn is_notification(&self) -> bool {
        self.inner.id.is_none()
    }

    pub fn features(&self) -> &Features {
        &self.inner.features
    }

    /// Fired when the request is cancelled or the session is torn down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }
}
