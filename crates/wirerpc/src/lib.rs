#![forbid(unsafe_code)]
//! General-purpose JSON-RPC 2.0 framework for client and server roles over
//! framed byte transports.
//!
//! The crate splits into a handful of small cores:
//! - [`message`]: envelope value types ([`Message`], [`MessageId`],
//!   [`ResponseError`]) and their JSON codec.
//! - [`codec`]: two interchangeable wire framings — newline-delimited JSON
//!   ([`LineReader`]/[`LineWriter`]) and length-prefixed frames with CRLF
//!   headers ([`HeaderReader`]/[`HeaderWriter`]) — behind the
//!   [`MessageReader`]/[`MessageWriter`] traits.
//! - [`contract`]: the data describing exposed methods
//!   ([`MethodEntry`]/[`ParameterEntry`]) with builder construction and
//!   pluggable naming.
//! - [`binder`] and [`invoker`]: per-request method selection, argument
//!   marshaling, and handler execution with panic capture.
//! - [`server`]: the attach/read/dispatch/write loop with ordered or
//!   unordered response writes and a per-request cancellation registry.
//! - [`client`]: the outstanding-request table, id generation, response
//!   routing, and cooperative cancellation propagation.
//!
//! ## Serving
//!
//! ```rust,no_run
//! use serde_json::{json, Value};
//! use tokio::io::BufReader;
//! use wirerpc::{
//!     Features, LineReader, LineWriter, MethodEntry, ParamKind, ParameterEntry, RpcServer,
//!     ServerContract,
//! };
//!
//! # async fn serve(
//! #     stdin: tokio::io::Stdin,
//! #     stdout: tokio::io::Stdout,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let contract = ServerContract::builder()
//!     .method(
//!         MethodEntry::builder("add")
//!             .param(ParameterEntry::required("a", ParamKind::Integer))
//!             .param(ParameterEntry::required("b", ParamKind::Integer))
//!             .returns(ParamKind::Integer)
//!             .handler(|args, _ctx| async move {
//!                 let a: i64 = args.get(0)?;
//!                 let b: i64 = args.get(1)?;
//!                 Ok(json!(a + b))
//!             })?,
//!     )
//!     .build();
//!
//! let server = RpcServer::new(contract);
//! let session = server.attach(
//!     LineReader::new(BufReader::new(stdin)),
//!     LineWriter::new(stdout),
//!     Features::new(),
//! )?;
//! session.closed().await?;
//! # Ok(()) }
//! ```
//!
//! ## Calling
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tokio::io::BufReader;
//! use wirerpc::{ClientOptions, LineReader, LineWriter, RpcClient};
//!
//! # async fn call(
//! #     reader: tokio::io::Stdin,
//! #     writer: tokio::io::Stdout,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let client = RpcClient::attach(
//!     LineReader::new(BufReader::new(reader)),
//!     LineWriter::new(writer),
//!     ClientOptions::new().id_prefix("cli"),
//! );
//! let sum = client.call("add", Some(json!([73, 27]))).await?;
//! assert_eq!(sum, json!(100));
//! # Ok(()) }
//! ```
//!
//! Cancellation composes through `tokio_util::sync::CancellationToken`: the
//! server derives a per-request child token from the session token, handlers
//! observe it through their [`RequestContext`], and clients propagate their
//! caller's trigger as a `cancelRequest` notification. Batch requests,
//! message queueing, transport retry, and authentication are out of scope.

pub mod binder;
pub mod client;
pub mod codec;
pub mod context;
pub mod contract;
pub mod features;
pub mod invoker;
pub mod message;
pub mod server;

pub use binder::{bind, Argument, Arguments, BindError};
pub use client::{ClientError, ClientOptions, RpcClient};
pub use codec::{
    FramingError, HeaderReader, HeaderWriter, InboundFrame, LineReader, LineWriter, MessageReader,
    MessageWriter,
};
pub use context::RequestContext;
pub use contract::{
    ClientContract, ClientMethod, ContractError, MethodBuilder, MethodEntry, NamingConvention,
    ParamKind, ParameterEntry, ReturnKind, ServerContract, ServerContractBuilder,
};
pub use features::Features;
pub use invoker::invoke;
pub use message::{
    codes, EnvelopeError, Message, MessageId, Notification, Request, Response, ResponseError,
    ResponsePayload, JSONRPC_VERSION,
};
pub use server::{
    CancellationIssuer, RpcServer, ServerError, ServerOptions, SessionHandle,
    CANCEL_REQUEST_METHOD,
};

#[cfg(test)]
mod tests;
