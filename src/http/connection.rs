use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

use crate::error::{ProtocolError, TransportError};
use crate::http::codec::{Decoded, Decoder, Encoder, request_framing};
use crate::http::parser::{ParseError, ParseLimits, parse_request_head};
use crate::http::request::{RequestHead, Version};
use crate::http::writer::{BoxedWriter, ResponseStream, SessionOutput};

const READ_CHUNK: usize = 4096;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Socket-level settings applied to every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Read timeout; zero disables it.
    pub so_timeout: Duration,
    pub tcp_nodelay: bool,
    pub limits: ParseLimits,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            so_timeout: Duration::from_millis(20_000),
            tcp_nodelay: true,
            limits: ParseLimits::default(),
        }
    }
}

/// Read half of a connection with its input buffer.
pub struct SessionInput {
    io: BoxedReader,
    buffer: BytesMut,
    timeout: Duration,
}

impl SessionInput {
    fn new(io: BoxedReader, timeout: Duration) -> Self {
        Self {
            io,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            timeout,
        }
    }

    /// Reads more bytes into the buffer; `0` means end of stream.
    async fn fill(&mut self) -> Result<usize, TransportError> {
        self.buffer.reserve(READ_CHUNK);
        let n = if self.timeout.is_zero() {
            self.io.read_buf(&mut self.buffer).await?
        } else {
            tokio::time::timeout(self.timeout, self.io.read_buf(&mut self.buffer))
                .await
                .map_err(|_| TransportError::Timeout(self.timeout))??
        };
        Ok(n)
    }
}

/// Body stream of the request being served.
///
/// Yields exactly the bytes the request framing delimits, then end of
/// stream; anything after them stays buffered for the next request.
pub struct RequestBody<'c> {
    input: &'c mut SessionInput,
    decoder: &'c mut Decoder,
    max_line: usize,
}

impl<'c> RequestBody<'c> {
    /// Next piece of the body, or `None` once it is complete.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        read_chunk(&mut *self.input, &mut *self.decoder, self.max_line).await
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes, TransportError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    /// Whether the body has been fully consumed (or there was none).
    pub fn is_complete(&self) -> bool {
        self.decoder.is_done()
    }
}

async fn read_chunk(
    input: &mut SessionInput,
    decoder: &mut Decoder,
    max_line: usize,
) -> Result<Option<Bytes>, TransportError> {
    loop {
        match decoder.decode(&mut input.buffer, max_line)? {
            Decoded::Data(data) => return Ok(Some(data)),
            Decoded::Done => return Ok(None),
            Decoded::NeedMore => {
                if input.fill().await? == 0 {
                    return Err(decoder.eof_error().into());
                }
            }
        }
    }
}

/// One accepted HTTP connection.
///
/// Carries a single request/response exchange at a time: `receive_request`
/// installs the body decoder for the new request, the response side
/// installs its encoder when the head is sent, and `reset` settles both so
/// the next request starts on a clean byte boundary.
pub struct Connection {
    input: SessionInput,
    output: SessionOutput,
    decoder: Decoder,
    encoder: Encoder,
    limits: ParseLimits,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    open: bool,
}

impl Connection {
    pub fn new(reader: BoxedReader, writer: BoxedWriter, config: &ConnectionConfig) -> Self {
        Self {
            input: SessionInput::new(reader, config.so_timeout),
            output: SessionOutput::new(writer),
            decoder: Decoder::Done,
            encoder: Encoder::Idle,
            limits: config.limits,
            peer_addr: None,
            local_addr: None,
            open: true,
        }
    }

    /// Wraps an accepted socket, applying the configured socket options.
    pub fn from_tcp(stream: TcpStream, config: &ConnectionConfig) -> std::io::Result<Self> {
        stream.set_nodelay(config.tcp_nodelay)?;
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();

        let mut conn = Self::new(Box::new(reader), Box::new(writer), config);
        conn.peer_addr = peer_addr;
        conn.local_addr = local_addr;
        Ok(conn)
    }

    pub fn with_addrs(mut self, peer: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        self.peer_addr = peer;
        self.local_addr = local;
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Waits until request bytes are available.
    ///
    /// Returns `false` when the peer closed the connection cleanly. Nothing
    /// is consumed, so this is safe to abandon.
    pub async fn wait_for_data(&mut self) -> Result<bool, TransportError> {
        if !self.input.buffer.is_empty() {
            return Ok(true);
        }
        Ok(self.input.fill().await? > 0)
    }

    /// Reads the next request head and installs its body decoder.
    ///
    /// Returns `None` when the peer closed the connection before sending
    /// anything.
    pub async fn receive_request(&mut self) -> Result<Option<RequestHead>, TransportError> {
        loop {
            // Try parsing whatever we already have
            match parse_request_head(&self.input.buffer, &self.limits) {
                Ok((head, consumed)) => {
                    // Remove consumed bytes
                    self.input.buffer.advance(consumed);
                    self.decoder = Decoder::new(request_framing(&head)?);
                    return Ok(Some(head));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Err(ProtocolError::Parse(e).into()),
            }

            if self.input.fill().await? == 0 {
                if self.input.buffer.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return Err(TransportError::Closed);
            }
        }
    }

    /// Sends the interim `100 Continue` response.
    pub async fn send_continue(&mut self, version: Version) -> Result<(), TransportError> {
        self.output.write_continue(version).await
    }

    /// Body of the current request and the output side of its response.
    pub fn exchange(&mut self) -> (RequestBody<'_>, ResponseStream<'_>) {
        (
            RequestBody {
                input: &mut self.input,
                decoder: &mut self.decoder,
                max_line: self.limits.max_line_length,
            },
            ResponseStream::new(&mut self.output, &mut self.encoder),
        )
    }

    /// Output side alone, for responses sent without a parsed request.
    pub fn response_stream(&mut self) -> ResponseStream<'_> {
        ResponseStream::new(&mut self.output, &mut self.encoder)
    }

    /// Settles the finished exchange before the next one.
    ///
    /// Discards whatever the worker left unread of the request body and
    /// terminates the response body.
    pub async fn reset(&mut self) -> Result<(), TransportError> {
        while read_chunk(&mut self.input, &mut self.decoder, self.limits.max_line_length)
            .await?
            .is_some()
        {}
        self.decoder = Decoder::Done;

        ResponseStream::new(&mut self.output, &mut self.encoder)
            .finish()
            .await?;
        self.encoder = Encoder::Idle;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.output.flush().await
    }

    /// Flushes pending output and half-closes before dropping the socket.
    ///
    /// Errors are ignored; the peer may already be gone.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let _ = self.output.flush().await;
        let _ = self.output.shutdown().await;
    }

    /// Marks the connection closed without flushing.
    ///
    /// The socket itself is released when the connection is dropped.
    pub fn shutdown(&mut self) {
        self.open = false;
    }
}
