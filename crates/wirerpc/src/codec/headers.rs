//! Length-prefixed framing with CRLF-terminated `Key: Value` headers.
//!
//! A frame is a header block (`Content-Length` mandatory, `Content-Type`
//! optional) terminated by a blank line, followed by exactly
//! `Content-Length` payload bytes. The payload charset defaults to UTF-8
//! without BOM; `utf8` is accepted as an alias of `utf-8`.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{encode_payload, FramingError, InboundFrame, MessageReader, MessageWriter};
use crate::message::{EnvelopeError, Message};

const CONTENT_LENGTH: &str = "Content-Length";
const CONTENT_TYPE: &str = "Content-Type";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Charset {
    Utf8,
    Ascii,
}

/// Resolves the `charset=` parameter of a media type, if any.
fn resolve_charset(content_type: &str) -> Result<Charset, FramingError> {
    for part in content_type.split(';').skip(1) {
        let part = part.trim();
        let Some(value) = part
            .to_ascii_lowercase()
            .strip_prefix("charset=")
            .map(str::to_string)
        else {
            continue;
        };
        let value = value.trim_matches('"');
        return match value {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "us-ascii" | "ascii" => Ok(Charset::Ascii),
            other => Err(FramingError::UnsupportedCharset(other.to_string())),
        };
    }
    Ok(Charset::Utf8)
}

pub struct HeaderReader<R> {
    reader: R,
    buffer: String,
}

impl<R> HeaderReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: String::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R> MessageReader for HeaderReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn read_message(&mut self) -> Result<Option<InboundFrame>, FramingError> {
        let mut content_length: Option<usize> = None;
        let mut charset = Charset::Utf8;
        let mut saw_header = false;

        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer).await? == 0 {
                if saw_header {
                    return Err(FramingError::UnexpectedEof);
                }
                return Ok(None);
            }
            let Some(line) = self.buffer.strip_suffix("\r\n") else {
                return Err(FramingError::MalformedHeader(self.buffer.clone()));
            };
            if line.is_empty() {
                break;
            }
            saw_header = true;

            let mut parts = line.splitn(2, ':');
            let name = parts.next().unwrap_or_default().trim();
            let Some(value) = parts.next().map(str::trim) else {
                return Err(FramingError::MalformedHeader(line.to_string()));
            };
            if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
                content_length = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?,
                );
            } else if name.eq_ignore_ascii_case(CONTENT_TYPE) {
                charset = resolve_charset(value)?;
            }
            // Unknown headers are tolerated and ignored.
        }

        let size = content_length.ok_or(FramingError::MissingContentLength)?;
        let mut payload = vec![0u8; size];
        self.reader.read_exact(&mut payload).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                FramingError::UnexpectedEof
            } else {
                FramingError::Io(err)
            }
        })?;

        Ok(Some(decode_payload(payload, charset)))
    }
}

fn decode_payload(payload: Vec<u8>, charset: Charset) -> InboundFrame {
    if charset == Charset::Ascii && !payload.is_ascii() {
        return InboundFrame::Malformed(EnvelopeError::Parse {
            detail: "payload contains non-ASCII bytes".to_string(),
        });
    }
    let text = match String::from_utf8(payload) {
        Ok(text) => text,
        Err(err) => {
            return InboundFrame::Malformed(EnvelopeError::Parse {
                detail: err.to_string(),
            })
        }
    };
    match Message::decode(&text) {
        Ok(message) => InboundFrame::Message(message),
        Err(error) => InboundFrame::Malformed(error),
    }
}

pub struct HeaderWriter<W> {
    writer: W,
    content_type: Option<String>,
}

impl<W> HeaderWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            content_type: None,
        }
    }

    /// Emit a `Content-Type` header on every frame.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> MessageWriter for HeaderWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, message: &Message) -> Result<(), FramingError> {
        let payload = encode_payload(message)?;
        let mut head = format!("{CONTENT_LENGTH}: {}\r\n", payload.len());
        if let Some(content_type) = &self.content_type {
            head.push_str(&format!("{CONTENT_TYPE}: {content_type}\r\n"));
        }
        head.push_str("\r\n");

        self.writer.write_all(head.as_bytes()).await?;
        self.writer.write_all(payload.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
