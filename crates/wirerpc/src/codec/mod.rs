//! Wire framings that carry one envelope per frame.
//!
//! Two interchangeable codecs are provided: newline-delimited JSON
//! ([`line::LineReader`] / [`line::LineWriter`]) and length-prefixed frames
//! with CRLF headers ([`headers::HeaderReader`] / [`headers::HeaderWriter`]).
//! Both decode payloads through [`Message::decode`] and report a frame whose
//! bytes arrived intact but failed to decode as [`InboundFrame::Malformed`],
//! so a single bad frame never tears down the session.
//!
//! Readers are single-consumer and writers are expected to sit behind a
//! mutex; neither buffers across calls, so dropping a reader mid-`await`
//! (the only way a read is cancelled) can never leave a half-consumed frame
//! for a later call to trip over.

use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{EnvelopeError, Message};

pub mod headers;
pub mod line;

pub use headers::{HeaderReader, HeaderWriter};
pub use line::{LineReader, LineWriter};

/// One frame pulled off a transport.
#[derive(Debug)]
pub enum InboundFrame {
    /// The frame decoded into an envelope.
    Message(Message),
    /// The frame was consumed in full but its payload is not a valid
    /// envelope. Recoverable: the next read starts at a frame boundary.
    Malformed(EnvelopeError),
}

/// Errors that terminate a framed stream.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("frame header is missing Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length value `{0}`")]
    InvalidContentLength(String),
    #[error("malformed frame header line `{0}`")]
    MalformedHeader(String),
    #[error("unsupported charset `{0}`")]
    UnsupportedCharset(String),
    #[error("transport closed mid-frame")]
    UnexpectedEof,
    #[error("failed to serialize outgoing frame: {0}")]
    Encode(#[source] EnvelopeError),
}

/// Pull side of a framing codec. `Ok(None)` signals a clean EOF.
#[async_trait]
pub trait MessageReader: Send {
    async fn read_message(&mut self) -> Result<Option<InboundFrame>, FramingError>;
}

/// Push side of a framing codec. Implementations flush per frame.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write_message(&mut self, message: &Message) -> Result<(), FramingError>;
}

pub(crate) fn encode_payload(message: &Message) -> Result<String, FramingError> {
    message.encode().map_err(FramingError::Encode)
}
