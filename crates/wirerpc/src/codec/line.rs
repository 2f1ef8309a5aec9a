//! Newline-delimited JSON framing.
//!
//! Without a delimiter line, every non-empty line is one envelope. With a
//! delimiter configured, an envelope spans all lines up to the next line that
//! equals the delimiter, which lets peers send pretty-printed JSON.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::{encode_payload, FramingError, InboundFrame, MessageReader, MessageWriter};
use crate::message::Message;

pub struct LineReader<R> {
    reader: R,
    delimiter: Option<String>,
    buffer: String,
}

impl<R> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            delimiter: None,
            buffer: String::new(),
        }
    }

    /// Treat `delimiter` as the end-of-message marker instead of each line.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Reads the next line with the trailing `\n`/`\r\n` stripped, or `None`
    /// at EOF.
    async fn next_line(&mut self) -> Result<Option<String>, FramingError> {
        self.buffer.clear();
        if self.reader.read_line(&mut self.buffer).await? == 0 {
            return Ok(None);
        }
        if self.buffer.ends_with('\n') {
            self.buffer.pop();
        }
        if self.buffer.ends_with('\r') {
            self.buffer.pop();
        }
        Ok(Some(std::mem::take(&mut self.buffer)))
    }
}

#[async_trait]
impl<R> MessageReader for LineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn read_message(&mut self) -> Result<Option<InboundFrame>, FramingError> {
        if let Some(delimiter) = self.delimiter.clone() {
            let mut payload = String::new();
            loop {
                match self.next_line().await? {
                    None if payload.trim().is_empty() => return Ok(None),
                    None => return Err(FramingError::UnexpectedEof),
                    Some(line) if line == delimiter => {
                        if payload.trim().is_empty() {
                            // Delimiter with nothing before it: keep reading.
                            continue;
                        }
                        return Ok(Some(decode_frame(&payload)));
                    }
                    Some(line) => {
                        payload.push_str(&line);
                        payload.push('\n');
                    }
                }
            }
        }

        loop {
            match self.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(decode_frame(&line))),
            }
        }
    }
}

fn decode_frame(payload: &str) -> InboundFrame {
    match Message::decode(payload) {
        Ok(message) => InboundFrame::Message(message),
        Err(error) => InboundFrame::Malformed(error),
    }
}

pub struct LineWriter<W> {
    writer: W,
    delimiter: Option<String>,
}

impl<W> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            delimiter: None,
        }
    }

    /// Emit `delimiter` on its own line after every message.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> MessageWriter for LineWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, message: &Message) -> Result<(), FramingError> {
        let payload = encode_payload(message)?;
        self.writer.write_all(payload.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        if let Some(delimiter) = &self.delimiter {
            self.writer.write_all(delimiter.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }
}
