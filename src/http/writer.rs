use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::http::codec::Encoder;
use crate::http::request::Version;
use crate::http::response::{ResponseHead, StatusCode};

/// Buffered bytes are pushed to the socket once they exceed this.
const OUTPUT_BUFFER_SIZE: usize = 8192;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

fn serialize_head(head: &ResponseHead, buf: &mut BytesMut) {
    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        head.version,
        head.status.as_u16(),
        head.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in head.headers.iter() {
        put_latin1(buf, k);
        buf.extend_from_slice(b": ");
        put_latin1(buf, v);
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");
}

/// Writes header text as ISO-8859-1, one byte per character.
///
/// CR and LF become spaces so a value cannot end the header early;
/// characters outside latin-1 become `?`.
fn put_latin1(buf: &mut BytesMut, text: &str) {
    buf.extend(text.chars().map(|c| match c {
        '\r' | '\n' => b' ',
        c if u32::from(c) <= 0xFF => u32::from(c) as u8,
        _ => b'?',
    }));
}

/// Write half of a connection with its output buffer.
pub struct SessionOutput {
    io: BoxedWriter,
    buffer: BytesMut,
}

impl SessionOutput {
    pub fn new(io: BoxedWriter) -> Self {
        Self {
            io,
            buffer: BytesMut::with_capacity(OUTPUT_BUFFER_SIZE),
        }
    }

    /// Writes the interim `100 Continue` response and flushes it.
    pub async fn write_continue(&mut self, version: Version) -> Result<(), TransportError> {
        let line = format!(
            "{} {} {}\r\n\r\n",
            version,
            StatusCode::Continue.as_u16(),
            StatusCode::Continue.reason_phrase()
        );
        self.buffer.extend_from_slice(line.as_bytes());
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        let mut written = 0;
        while written < self.buffer.len() {
            let n = self.io.write(&self.buffer[written..]).await?;

            if n == 0 {
                self.buffer.clear();
                return Err(TransportError::Closed);
            }

            written += n;
        }
        self.buffer.clear();
        self.io.flush().await?;
        Ok(())
    }

    async fn flush_if_full(&mut self) -> Result<(), TransportError> {
        if self.buffer.len() >= OUTPUT_BUFFER_SIZE {
            self.flush().await?;
        }
        Ok(())
    }

    /// Half-closes the write side.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.io.shutdown().await?;
        Ok(())
    }
}

/// Output side of one exchange: the head once committed, then the body
/// through the encoder chosen for it.
pub struct ResponseStream<'c> {
    output: &'c mut SessionOutput,
    encoder: &'c mut Encoder,
}

impl<'c> ResponseStream<'c> {
    pub(crate) fn new(output: &'c mut SessionOutput, encoder: &'c mut Encoder) -> Self {
        Self { output, encoder }
    }

    /// Buffers status line and headers and fixes the body framing.
    ///
    /// With `suppress_body` (answer to HEAD) the head keeps its framing
    /// headers but body bytes are dropped.
    pub fn send_response(&mut self, head: &ResponseHead, suppress_body: bool) {
        serialize_head(head, &mut self.output.buffer);
        *self.encoder = if suppress_body {
            Encoder::Discard
        } else {
            Encoder::for_entity(head.entity)
        };
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.encoder.encode(data, &mut self.output.buffer)?;
        self.output.flush_if_full().await
    }

    /// Terminates the body and flushes everything written so far.
    pub async fn finish(&mut self) -> Result<(), TransportError> {
        if !self.encoder.is_finished() {
            self.encoder.finish(&mut self.output.buffer)?;
        }
        self.output.flush().await
    }
}
