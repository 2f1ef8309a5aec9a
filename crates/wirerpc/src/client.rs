//! Client correlation core.
//!
//! An [`RpcClient`] owns a writer task (draining an outbound channel into the
//! transport) and a reader task (routing inbound frames). Outgoing requests
//! are tracked in the outstanding table keyed by [`MessageId`]; the matching
//! response completes the caller's oneshot. Cancelling a call completes it
//! locally and emits a `cancelRequest` notification; the server-side effect
//! is best-effort and never awaited.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{InboundFrame, MessageReader, MessageWriter};
use crate::contract::{ClientMethod, ReturnKind};
use crate::message::{Message, MessageId, Notification, Request, Response, ResponseError};
use crate::server::CANCEL_REQUEST_METHOD;

/// Correlation configuration for one client.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    id_prefix: Option<String>,
    preserve_foreign_responses: bool,
    foreign_response_limit: usize,
    cancel_method: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            id_prefix: None,
            preserve_foreign_responses: false,
            foreign_response_limit: 16,
            cancel_method: CANCEL_REQUEST_METHOD.to_string(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix generated ids, disambiguating clients that share a transport.
    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    /// Retain responses with no outstanding entry (and late responses to
    /// cancelled calls) in a bounded side table instead of dropping them.
    pub fn preserve_foreign_responses(mut self, enabled: bool) -> Self {
        self.preserve_foreign_responses = enabled;
        self
    }

    pub fn foreign_response_limit(mut self, limit: usize) -> Self {
        self.foreign_response_limit = limit;
        self
    }

    /// Method name used for outgoing cancellation notifications.
    pub fn cancel_method(mut self, method: impl Into<String>) -> Self {
        self.cancel_method = method.into();
        self
    }
}

/// Errors surfaced to callers of [`RpcClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a JSON-RPC error object.
    #[error("server returned error {}: {}", .0.code, .0.message)]
    Remote(ResponseError),
    /// The response arrived but violated the method contract.
    #[error("response violated the method contract: {0}")]
    ContractViolation(String),
    #[error("request was cancelled by the caller")]
    Cancelled,
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error("failed to serialize call arguments: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Outstanding = StdMutex<HashMap<MessageId, oneshot::Sender<Response>>>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A JSON-RPC client bound to one framed transport.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    outbound: mpsc::UnboundedSender<Message>,
    outstanding: Outstanding,
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<Notification>>>,
    foreign: StdMutex<VecDeque<Response>>,
    cancelled_ids: StdMutex<VecDeque<MessageId>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    options: ClientOptions,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl RpcClient {
    /// Binds a client to a framed transport, spawning its reader and writer
    /// tasks. Dropping the last clone aborts both.
    pub fn attach<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: MessageReader + 'static,
        W: MessageWriter + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            outbound,
            outstanding: StdMutex::new(HashMap::new()),
            subscribers: StdMutex::new(Vec::new()),
            foreign: StdMutex::new(VecDeque::new()),
            cancelled_ids: StdMutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            options,
            tasks: StdMutex::new(Vec::new()),
        });

        let writer_task = tokio::spawn(writer_task(writer, outbound_rx));
        let reader_task = tokio::spawn(reader_task(reader, Arc::downgrade(&inner)));
        *lock(&inner.tasks) = vec![writer_task, reader_task];

        Self { inner }
    }

    /// Generates the next request id: a string of the per-client prefix and a
    /// monotonic counter, unique for this client's lifetime.
    fn next_id(&self) -> MessageId {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let text = match &self.inner.options.id_prefix {
            Some(prefix) => format!("{prefix}-{n}"),
            None => n.to_string(),
        };
        MessageId::String(text)
    }

    /// Sends a request and awaits its response.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.call_with_cancellation(method, params, &CancellationToken::new())
            .await
    }

    /// Sends a request and awaits its response or the caller's trigger.
    ///
    /// When `cancellation` fires first, the outstanding entry is released, a
    /// cancellation notification conveying the request id goes out, and the
    /// call completes with [`ClientError::Cancelled`] without waiting for any
    /// acknowledgment.
    pub async fn call_with_cancellation(
        &self,
        method: &str,
        params: Option<Value>,
        cancellation: &CancellationToken,
    ) -> Result<Value, ClientError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.outstanding).insert(id.clone(), tx);

        let request = Message::Request(Request::new(id.clone(), method, params));
        if self.inner.outbound.send(request).is_err() {
            lock(&self.inner.outstanding).remove(&id);
            return Err(ClientError::ConnectionClosed);
        }

        tokio::select! {
            _ = cancellation.cancelled() => {
                self.abandon(id);
                Err(ClientError::Cancelled)
            }
            outcome = rx => match outcome {
                Ok(response) => response.into_result().map_err(ClientError::Remote),
                Err(_) => Err(ClientError::ConnectionClosed),
            }
        }
    }

    /// Sends a notification; no table entry, no completion.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let message = Message::Notification(Notification::new(method, params));
        self.inner
            .outbound
            .send(message)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Drives a typed [`ClientMethod`] descriptor: marshals positional
    /// arguments into `params` per the descriptor and deserializes the
    /// result.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        method: &ClientMethod,
        args: Vec<Value>,
    ) -> Result<T, ClientError> {
        self.invoke_with_cancellation(method, args, &CancellationToken::new())
            .await
    }

    pub async fn invoke_with_cancellation<T: DeserializeOwned>(
        &self,
        method: &ClientMethod,
        args: Vec<Value>,
        cancellation: &CancellationToken,
    ) -> Result<T, ClientError> {
        let params = marshal_args(method, args)?;

        if method.is_notification {
            self.notify(&method.rpc_name, params)?;
            return serde_json::from_value(Value::Null).map_err(|_| {
                ClientError::ContractViolation(
                    "notification methods cannot produce a value".to_string(),
                )
            });
        }

        let result = self
            .call_with_cancellation(&method.rpc_name, params, cancellation)
            .await?;

        match method.returns {
            ReturnKind::Void => serde_json::from_value(Value::Null).map_err(|_| {
                ClientError::ContractViolation("void method awaited with a value type".to_string())
            }),
            ReturnKind::Value(_) => serde_json::from_value(result).map_err(|err| {
                ClientError::ContractViolation(format!("result did not match declared type: {err}"))
            }),
        }
    }

    /// Streams server-initiated notifications. Closed receivers are pruned on
    /// the next broadcast.
    pub fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    /// Drains the bounded side table of retained foreign responses.
    pub fn take_foreign_responses(&self) -> Vec<Response> {
        lock(&self.inner.foreign).drain(..).collect()
    }

    /// Releases a cancelled call and emits the cancellation notification.
    fn abandon(&self, id: MessageId) {
        lock(&self.inner.outstanding).remove(&id);
        if self.inner.options.preserve_foreign_responses {
            // Remember the id briefly so a late response is still recognized
            // as ours rather than discarded as noise.
            let mut cancelled = lock(&self.inner.cancelled_ids);
            cancelled.push_back(id.clone());
            while cancelled.len() > self.inner.options.foreign_response_limit {
                cancelled.pop_front();
            }
        }

        let params = serde_json::json!({ "id": id });
        let notification = Message::Notification(Notification::new(
            self.inner.options.cancel_method.clone(),
            Some(params),
        ));
        if self.inner.outbound.send(notification).is_err() {
            debug!("connection closed before cancellation notification was sent");
        }
    }
}

fn marshal_args(method: &ClientMethod, args: Vec<Value>) -> Result<Option<Value>, ClientError> {
    let required = method.params.iter().filter(|param| !param.optional).count();
    if args.len() < required {
        return Err(ClientError::ContractViolation(format!(
            "`{}` requires {} argument(s), got {}",
            method.rpc_name,
            required,
            args.len()
        )));
    }
    if args.len() > method.params.len() {
        return Err(ClientError::ContractViolation(format!(
            "`{}` accepts at most {} argument(s), got {}",
            method.rpc_name,
            method.params.len(),
            args.len()
        )));
    }

    if args.is_empty() {
        return Ok(None);
    }

    if method.by_name {
        let mut map = serde_json::Map::new();
        for (param, value) in method.params.iter().zip(args) {
            map.insert(param.name.clone(), value);
        }
        Ok(Some(Value::Object(map)))
    } else {
        Ok(Some(Value::Array(args)))
    }
}

async fn writer_task(
    mut writer: impl MessageWriter,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(error) = writer.write_message(&message).await {
            warn!(%error, "client transport write failed");
            break;
        }
    }
}

async fn reader_task(mut reader: impl MessageReader, client: std::sync::Weak<ClientInner>) {
    loop {
        let frame = reader.read_message().await;
        let Some(inner) = client.upgrade() else {
            return;
        };

        match frame {
            Ok(None) => {
                debug!("client transport reached EOF");
                break;
            }
            Ok(Some(InboundFrame::Malformed(error))) => {
                warn!(%error, "client received malformed frame");
            }
            Ok(Some(InboundFrame::Message(Message::Response(response)))) => {
                route_response(&inner, response);
            }
            Ok(Some(InboundFrame::Message(Message::Notification(notification)))) => {
                lock(&inner.subscribers).retain(|tx| tx.send(notification.clone()).is_ok());
            }
            Ok(Some(InboundFrame::Message(Message::Request(request)))) => {
                warn!(method = %request.method, "client cannot serve peer requests; dropping");
            }
            Err(error) => {
                warn!(%error, "client transport failed");
                break;
            }
        }
    }

    // Completing the table by dropping the senders fails every waiting call
    // with ConnectionClosed; the flag stops new calls from queueing forever.
    if let Some(inner) = client.upgrade() {
        inner.closed.store(true, Ordering::SeqCst);
        lock(&inner.outstanding).clear();
    }
}

fn route_response(inner: &ClientInner, response: Response) {
    let sender = lock(&inner.outstanding).remove(&response.id);
    if let Some(sender) = sender {
        if sender.send(response).is_err() {
            debug!("caller went away before its response arrived");
        }
        return;
    }

    // Drop the late-response marker for cancelled calls either way.
    {
        let mut cancelled = lock(&inner.cancelled_ids);
        if let Some(index) = cancelled.iter().position(|id| *id == response.id) {
            cancelled.remove(index);
        }
    }

    if inner.options.preserve_foreign_responses {
        let mut foreign = lock(&inner.foreign);
        foreign.push_back(response);
        while foreign.len() > inner.options.foreign_response_limit {
            foreign.pop_front();
        }
    } else {
        debug!(id = %response.id, "discarding unmatched response");
    }
}
