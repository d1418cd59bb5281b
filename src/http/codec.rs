//! Transfer codecs.
//!
//! Body framing is negotiated once per message from its headers and never
//! changes afterwards. Decoding and encoding work on in-memory buffers; the
//! connection feeds them from and drains them to the socket.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::http::headers::name;
use crate::http::request::{RequestHead, Version};
use crate::http::response::Entity;

/// Framing of an incoming request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Length(u64),
    Chunked,
}

/// Determines how the body of `head` is delimited.
///
/// `Transfer-Encoding` wins over `Content-Length`. Its final coding must be
/// `chunked` (only `identity` may appear besides it); chunked coding is
/// rejected on HTTP/1.0. Without either header there is no body.
pub fn request_framing(head: &RequestHead) -> Result<Framing, ProtocolError> {
    let codings: Vec<&str> = head.headers.tokens(name::TRANSFER_ENCODING).collect();

    if let Some(unsupported) = codings
        .iter()
        .find(|c| !c.eq_ignore_ascii_case("chunked") && !c.eq_ignore_ascii_case("identity"))
    {
        return Err(ProtocolError::UnsupportedTransferEncoding(unsupported.to_string()));
    }

    if codings.iter().any(|c| c.eq_ignore_ascii_case("chunked")) {
        if head.version == Version::Http10 {
            return Err(ProtocolError::ChunkedNotAllowed);
        }
        if !codings.last().is_some_and(|c| c.eq_ignore_ascii_case("chunked")) {
            return Err(ProtocolError::UnsupportedTransferEncoding(codings.join(", ")));
        }
        return Ok(Framing::Chunked);
    }

    let mut length: Option<u64> = None;
    for value in head.headers.get_all(name::CONTENT_LENGTH) {
        for part in value.split(',') {
            let part = part.trim();
            let parsed = part
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(ProtocolError::InvalidContentLength(value.to_string()));
                }
                _ => length = Some(parsed),
            }
        }
    }

    Ok(match length {
        Some(0) | None => Framing::Empty,
        Some(n) => Framing::Length(n),
    })
}

/// Result of one decoding step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Data(Bytes),
    NeedMore,
    Done,
}

/// Position inside a chunk coded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

/// Incoming body decoder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decoder {
    Empty,
    Length { declared: u64, remaining: u64 },
    Chunked { state: Chunk, received: u64 },
    #[default]
    Done,
}

impl Decoder {
    pub fn new(framing: Framing) -> Self {
        match framing {
            Framing::Empty => Decoder::Empty,
            Framing::Length(n) => Decoder::Length {
                declared: n,
                remaining: n,
            },
            Framing::Chunked => Decoder::Chunked {
                state: Chunk::Size,
                received: 0,
            },
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Decoder::Empty | Decoder::Done)
    }

    /// Takes the next piece of body from the front of `buf`.
    ///
    /// Never consumes bytes past the end of the body, so whatever follows
    /// in `buf` belongs to the next message.
    pub fn decode(&mut self, buf: &mut BytesMut, max_line: usize) -> Result<Decoded, ProtocolError> {
        match self {
            Decoder::Empty | Decoder::Done => {
                *self = Decoder::Done;
                Ok(Decoded::Done)
            }
            Decoder::Length { remaining, .. } => {
                if *remaining == 0 {
                    *self = Decoder::Done;
                    return Ok(Decoded::Done);
                }
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = (*remaining).min(buf.len() as u64) as usize;
                *remaining -= n as u64;
                Ok(Decoded::Data(buf.split_to(n).freeze()))
            }
            Decoder::Chunked { state, received } => loop {
                match *state {
                    Chunk::Size => {
                        let Some(line) = take_line(buf, max_line, "chunk header")? else {
                            return Ok(Decoded::NeedMore);
                        };
                        let size = parse_chunk_size(&line)?;
                        *state = if size == 0 { Chunk::Trailer } else { Chunk::Data(size) };
                    }
                    Chunk::Data(remaining) => {
                        if buf.is_empty() {
                            return Ok(Decoded::NeedMore);
                        }
                        let n = remaining.min(buf.len() as u64) as usize;
                        *received += n as u64;
                        *state = if remaining == n as u64 {
                            Chunk::DataEnd
                        } else {
                            Chunk::Data(remaining - n as u64)
                        };
                        return Ok(Decoded::Data(buf.split_to(n).freeze()));
                    }
                    Chunk::DataEnd => match buf.first() {
                        None => return Ok(Decoded::NeedMore),
                        Some(b'\n') => {
                            buf.advance(1);
                            *state = Chunk::Size;
                        }
                        Some(b'\r') => match buf.get(1) {
                            None => return Ok(Decoded::NeedMore),
                            Some(b'\n') => {
                                buf.advance(2);
                                *state = Chunk::Size;
                            }
                            Some(_) => {
                                return Err(ProtocolError::InvalidChunk(
                                    "CRLF expected at end of chunk".into(),
                                ));
                            }
                        },
                        Some(_) => {
                            return Err(ProtocolError::InvalidChunk(
                                "CRLF expected at end of chunk".into(),
                            ));
                        }
                    },
                    Chunk::Trailer => {
                        let Some(line) = take_line(buf, max_line, "trailer")? else {
                            return Ok(Decoded::NeedMore);
                        };
                        if line.is_empty() {
                            *self = Decoder::Done;
                            return Ok(Decoded::Done);
                        }
                        // trailers are discarded
                    }
                }
            },
        }
    }

    /// Error describing a body cut short by end of stream.
    pub fn eof_error(&self) -> ProtocolError {
        match self {
            Decoder::Length {
                declared,
                remaining,
            } => ProtocolError::PrematureEnd {
                expected: *declared,
                received: declared - remaining,
            },
            Decoder::Chunked { received, .. } => ProtocolError::TruncatedChunk {
                received: *received,
            },
            Decoder::Empty | Decoder::Done => ProtocolError::TruncatedChunk { received: 0 },
        }
    }
}

fn take_line(buf: &mut BytesMut, max_line: usize, what: &str) -> Result<Option<BytesMut>, ProtocolError> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > max_line {
            return Err(ProtocolError::InvalidChunk(format!("{what} too long")));
        }
        return Ok(None);
    };
    let mut line = buf.split_to(newline + 1);
    line.truncate(newline);
    if line.last() == Some(&b'\r') {
        line.truncate(newline - 1);
    }
    Ok(Some(line))
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(size)
        .map(str::trim)
        .map_err(|_| ProtocolError::InvalidChunk("bad chunk header".into()))?;

    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidChunk(format!("bad chunk size: {size:?}")));
    }
    u64::from_str_radix(size, 16)
        .map_err(|_| ProtocolError::InvalidChunk(format!("chunk size out of range: {size}")))
}

/// Outgoing body encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoder {
    /// Nothing committed yet.
    #[default]
    Idle,
    Length { declared: u64, remaining: u64 },
    Chunked,
    UntilClose,
    /// Body suppressed (response to HEAD); bytes are dropped.
    Discard,
    Finished,
}

impl Encoder {
    pub fn for_entity(entity: Entity) -> Self {
        match entity {
            Entity::None => Encoder::Length {
                declared: 0,
                remaining: 0,
            },
            Entity::Length(n) => Encoder::Length {
                declared: n,
                remaining: n,
            },
            Entity::Chunked => Encoder::Chunked,
            Entity::UntilClose => Encoder::UntilClose,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Encoder::Idle | Encoder::Finished)
    }

    pub fn encode(&mut self, data: &[u8], out: &mut BytesMut) -> Result<(), ProtocolError> {
        if data.is_empty() {
            return Ok(());
        }
        match self {
            Encoder::Length {
                declared,
                remaining,
            } => {
                if data.len() as u64 > *remaining {
                    return Err(ProtocolError::BodyOverflow {
                        declared: *declared,
                    });
                }
                *remaining -= data.len() as u64;
                out.extend_from_slice(data);
            }
            Encoder::Chunked => {
                out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Encoder::UntilClose => out.extend_from_slice(data),
            Encoder::Discard => {}
            Encoder::Idle | Encoder::Finished => {
                return Err(ProtocolError::Header(
                    "response body written outside of an exchange".into(),
                ));
            }
        }
        Ok(())
    }

    /// Terminates the body: the last chunk for chunked coding, a length
    /// check for `Content-Length`.
    pub fn finish(&mut self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let current = std::mem::replace(self, Encoder::Finished);
        match current {
            Encoder::Chunked => out.extend_from_slice(b"0\r\n\r\n"),
            Encoder::Length { remaining, .. } if remaining > 0 => {
                return Err(ProtocolError::BodyUnderflow { remaining });
            }
            _ => {}
        }
        Ok(())
    }
}
