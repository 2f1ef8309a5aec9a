//! Server dispatch core.
//!
//! An [`RpcServer`] owns a [`ServerContract`] and serves one attached
//! transport session at a time. Attaching spawns a reader task that pulls
//! frames, registers cancellation triggers, and hands each accepted call to
//! its own worker task; responses funnel through the writer behind a mutex.
//!
//! In ordered mode every response-producing frame takes a slot in a gate
//! chain: a worker waits for its predecessor's write to finish before its
//! own, so responses leave in request-arrival order regardless of completion
//! order. Notifications never occupy a slot.
//!
//! Recoverable trouble (a frame that is not valid JSON, or not a valid
//! envelope) is answered with an error response carrying a null id and the
//! loop keeps reading. EOF, writer failure, and the session token terminate
//! the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::binder;
use crate::codec::{FramingError, InboundFrame, MessageReader, MessageWriter};
use crate::context::RequestContext;
use crate::contract::{
    MethodEntry, ParamKind, ParameterEntry, ServerContract, ServerContractBuilder,
};
use crate::features::Features;
use crate::invoker;
use crate::message::{Message, MessageId, Response, ResponseError};

/// Conventional name of the session-cancellation RPC.
pub const CANCEL_REQUEST_METHOD: &str = "cancelRequest";

/// Dispatch configuration for one server.
#[derive(Clone, Debug, Default)]
pub struct ServerOptions {
    ordered_responses: bool,
    track_cancellation: bool,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write responses in request-arrival order instead of completion order.
    pub fn ordered_responses(mut self, enabled: bool) -> Self {
        self.ordered_responses = enabled;
        self
    }

    /// Track per-request cancellation triggers in the active-request table so
    /// they can be fired through the [`CancellationIssuer`].
    pub fn track_cancellation(mut self, enabled: bool) -> Self {
        self.track_cancellation = enabled;
        self
    }
}

/// Errors surfaced to the attach-lifetime owner.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("a session is already attached to this server")]
    AlreadyAttached,
    #[error("transport failed: {0}")]
    Transport(#[from] FramingError),
    #[error("reader task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

type ActiveRequests = Arc<StdMutex<HashMap<MessageId, CancellationToken>>>;
type SharedWriter = Arc<Mutex<Box<dyn MessageWriter>>>;

fn lock_active(active: &ActiveRequests) -> MutexGuard<'_, HashMap<MessageId, CancellationToken>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capability for cancelling tracked in-flight requests, exposed to handlers
/// through the feature bag.
#[derive(Clone, Debug)]
pub struct CancellationIssuer {
    active: ActiveRequests,
}

impl CancellationIssuer {
    /// Atomically removes `id` from the active-request table and fires its
    /// trigger. Returns whether the id was tracked.
    pub fn try_cancel(&self, id: &MessageId) -> bool {
        let token = lock_active(&self.active).remove(id);
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// The dispatcher: contract + options + active-request table.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    contract: ServerContract,
    options: ServerOptions,
    active: ActiveRequests,
    attached: AtomicBool,
}

impl RpcServer {
    pub fn new(contract: ServerContract) -> Self {
        Self::with_options(contract, ServerOptions::default())
    }

    pub fn with_options(contract: ServerContract, options: ServerOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                contract,
                options,
                active: Arc::new(StdMutex::new(HashMap::new())),
                attached: AtomicBool::new(false),
            }),
        }
    }

    pub fn cancellation_issuer(&self) -> CancellationIssuer {
        CancellationIssuer {
            active: self.inner.active.clone(),
        }
    }

    /// Runs the pipeline for a single envelope without an attached session.
    ///
    /// This is the entry point for request/response transports such as the
    /// HTTP binding. Notifications and inbound response frames yield no
    /// response.
    pub async fn dispatch(&self, message: Message, features: Features) -> Option<Response> {
        let mut features = features;
        features.insert(self.cancellation_issuer());
        match message {
            Message::Request(request) => {
                self.dispatch_call(
                    Some(request.id),
                    request.method,
                    request.params,
                    features,
                    CancellationToken::new(),
                )
                .await
            }
            Message::Notification(notification) => {
                self.dispatch_call(
                    None,
                    notification.method,
                    notification.params,
                    features,
                    CancellationToken::new(),
                )
                .await
            }
            Message::Response(response) => {
                debug!(id = %response.id, "ignoring response frame on server side");
                None
            }
        }
    }

    /// Attaches a transport session. At most one session may be attached at a
    /// time; the slot frees up when the reader loop ends.
    ///
    /// `features` seeds the session's feature bag; the server adds its
    /// [`CancellationIssuer`] before dispatching.
    pub fn attach<R, W>(
        &self,
        reader: R,
        writer: W,
        features: Features,
    ) -> Result<SessionHandle, ServerError>
    where
        R: MessageReader + 'static,
        W: MessageWriter + 'static,
    {
        if self.inner.attached.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyAttached);
        }

        let session = CancellationToken::new();
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let mut features = features;
        features.insert(self.cancellation_issuer());

        let server = self.clone();
        let loop_token = session.clone();
        let reader_task = tokio::spawn(async move {
            let outcome = server
                .reader_loop(reader, writer, features, loop_token)
                .await;
            server.inner.attached.store(false, Ordering::SeqCst);
            outcome
        });

        Ok(SessionHandle {
            session,
            reader_task,
        })
    }

    async fn reader_loop(
        &self,
        mut reader: impl MessageReader,
        writer: SharedWriter,
        features: Features,
        session: CancellationToken,
    ) -> Result<(), ServerError> {
        // Tail of the ordered-write gate chain; `None` until the first
        // response-producing frame arrives.
        let mut previous_gate: Option<oneshot::Receiver<()>> = None;

        loop {
            let frame = tokio::select! {
                _ = session.cancelled() => {
                    debug!("session token fired; terminating reader loop");
                    return Ok(());
                }
                frame = reader.read_message() => frame,
            };

            match frame {
                Ok(None) => {
                    debug!("transport reached EOF; reader loop done");
                    return Ok(());
                }
                Ok(Some(InboundFrame::Malformed(error))) => {
                    warn!(%error, "received malformed frame");
                    let response = error.to_response();
                    self.spawn_response_write(response, &writer, &session, &mut previous_gate);
                }
                Ok(Some(InboundFrame::Message(Message::Request(request)))) => {
                    self.spawn_worker(
                        Some(request.id),
                        request.method,
                        request.params,
                        &writer,
                        &features,
                        &session,
                        &mut previous_gate,
                    );
                }
                Ok(Some(InboundFrame::Message(Message::Notification(notification)))) => {
                    self.spawn_worker(
                        None,
                        notification.method,
                        notification.params,
                        &writer,
                        &features,
                        &session,
                        &mut previous_gate,
                    );
                }
                Ok(Some(InboundFrame::Message(Message::Response(response)))) => {
                    debug!(id = %response.id, "ignoring response frame on server transport");
                }
                Err(error) => {
                    warn!(%error, "transport failed; terminating session");
                    return Err(error.into());
                }
            }
        }
    }

    /// Spawns one worker for an accepted call. Requests claim an ordered
    /// slot; notifications do not.
    #[allow(clippy::too_many_arguments)]
    fn spawn_worker(
        &self,
        id: Option<MessageId>,
        method: String,
        params: Option<Value>,
        writer: &SharedWriter,
        features: &Features,
        session: &CancellationToken,
        previous_gate: &mut Option<oneshot::Receiver<()>>,
    ) {
        let request_token = session.child_token();

        // Cancellation registry; duplicates stay untracked on purpose.
        let mut tracked_id = None;
        if self.inner.options.track_cancellation {
            if let Some(id) = &id {
                let mut active = lock_active(&self.inner.active);
                if active.contains_key(id) {
                    warn!(%id, "duplicate in-flight request id; dispatching untracked");
                } else {
                    active.insert(id.clone(), request_token.clone());
                    tracked_id = Some(id.clone());
                }
            }
        }

        let slot = if id.is_some() {
            self.claim_ordered_slot(previous_gate)
        } else {
            None
        };

        let server = self.clone();
        let writer = writer.clone();
        let features = features.clone();
        let session = session.clone();
        tokio::spawn(async move {
            let response = server
                .dispatch_call(id, method, params, features, request_token)
                .await;

            if let Some(id) = tracked_id {
                lock_active(&server.inner.active).remove(&id);
            }

            if let Some(response) = response {
                write_response(response, &writer, &session, slot).await;
            }
        });
    }

    /// Writes an already-built response (error envelopes for malformed
    /// frames) through the same ordering machinery as worker output.
    fn spawn_response_write(
        &self,
        response: Response,
        writer: &SharedWriter,
        session: &CancellationToken,
        previous_gate: &mut Option<oneshot::Receiver<()>>,
    ) {
        let slot = self.claim_ordered_slot(previous_gate);
        let writer = writer.clone();
        let session = session.clone();
        tokio::spawn(async move {
            write_response(response, &writer, &session, slot).await;
        });
    }

    /// In ordered mode, chains this frame's write after the previous one.
    fn claim_ordered_slot(
        &self,
        previous_gate: &mut Option<oneshot::Receiver<()>>,
    ) -> Option<OrderedSlot> {
        if !self.inner.options.ordered_responses {
            return None;
        }
        let (done, next) = oneshot::channel();
        let wait_for = previous_gate.replace(next);
        Some(OrderedSlot { wait_for, done })
    }

    async fn dispatch_call(
        &self,
        id: Option<MessageId>,
        method: String,
        params: Option<Value>,
        features: Features,
        cancellation: CancellationToken,
    ) -> Option<Response> {
        let outcome = self
            .run_pipeline(&method, params, features, cancellation, id.clone())
            .await;

        match id {
            Some(id) => Some(match outcome {
                Ok(value) => Response::success(id, value),
                Err(error) => Response::error(id, error),
            }),
            None => {
                // Notifications suppress error responses; there is no id to
                // address.
                if let Err(error) = outcome {
                    debug!(method = %method, %error, "notification handler failed");
                }
                None
            }
        }
    }

    async fn run_pipeline(
        &self,
        method: &str,
        params: Option<Value>,
        features: Features,
        cancellation: CancellationToken,
        id: Option<MessageId>,
    ) -> Result<Value, ResponseError> {
        let Some(candidates) = self.inner.contract.candidates(method) else {
            return Err(ResponseError::method_not_found(method));
        };

        let (entry, args) = binder::bind(candidates, params.as_ref(), &cancellation)
            .map_err(|error| error.to_response_error(method))?;

        if entry.is_notification && id.is_some() {
            return Err(ResponseError::invalid_request(format!(
                "method `{method}` is notification-only and cannot be called with an id"
            )));
        }

        let ctx = RequestContext::new(id, method, params, features, cancellation);
        invoker::invoke(&entry, args, ctx).await
    }
}

struct OrderedSlot {
    wait_for: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

/// Writes one response, honoring the ordered gate and the session token.
///
/// The write is attempted even when the request's own trigger fired (the
/// response still completes the protocol); only session teardown aborts it.
async fn write_response(
    response: Response,
    writer: &SharedWriter,
    session: &CancellationToken,
    slot: Option<OrderedSlot>,
) {
    let done = match slot {
        Some(OrderedSlot { wait_for, done }) => {
            if let Some(gate) = wait_for {
                // A dropped predecessor already gave up its write; proceed.
                let _ = gate.await;
            }
            Some(done)
        }
        None => None,
    };

    let write = async {
        let mut writer = writer.lock().await;
        writer.write_message(&Message::Response(response)).await
    };
    tokio::select! {
        _ = session.cancelled() => {
            debug!("session torn down before response write completed");
        }
        result = write => {
            if let Err(error) = result {
                warn!(%error, "failed to write response; terminating session");
                session.cancel();
            }
        }
    }

    if let Some(done) = done {
        let _ = done.send(());
    }
}

/// Owner's view of an attached session.
pub struct SessionHandle {
    session: CancellationToken,
    reader_task: JoinHandle<Result<(), ServerError>>,
}

impl SessionHandle {
    /// The reader-loop token; firing it terminates the whole pipeline.
    pub fn session_token(&self) -> &CancellationToken {
        &self.session
    }

    /// Resolves when the reader loop ends (EOF, fatal transport error, or
    /// detach), surfacing the terminating error if any.
    pub async fn closed(self) -> Result<(), ServerError> {
        self.reader_task.await?
    }

    /// Cancels the session and waits for the reader loop to wind down.
    pub async fn detach(self) -> Result<(), ServerError> {
        self.session.cancel();
        self.closed().await
    }
}

impl ServerContractBuilder {
    /// Registers the conventional session-cancellation method under
    /// `rpc_name` (usually [`CANCEL_REQUEST_METHOD`]).
    ///
    /// The handler accepts `{ "id": <id> }` or `[<id>]`, fires the tracked
    /// trigger through the [`CancellationIssuer`] feature, and returns
    /// whether the id was in flight.
    pub fn cancel_request_method(self, rpc_name: &str) -> Self {
        let entry = MethodEntry::builder(rpc_name)
            .param(ParameterEntry::required("id", ParamKind::Id))
            .returns(ParamKind::Boolean)
            .handler(|args, ctx| async move {
                let id: MessageId = args.get(0)?;
                let Some(issuer) = ctx.features().get::<CancellationIssuer>() else {
                    return Err(ResponseError::internal(
                        "cancellation issuer is not available on this session",
                    ));
                };
                Ok(Value::Bool(issuer.try_cancel(&id)))
            })
            .expect("cancel-request entry is statically valid");
        self.method(entry)
    }
}
