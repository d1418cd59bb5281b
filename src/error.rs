//! Error types shared by the HTTP layer and the server.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::http::parser::ParseError;
use crate::http::response::StatusCode;

/// HTTP protocol violations.
///
/// Raised while parsing a message head, negotiating body framing, decoding a
/// body or finalizing response headers. None of these leave the connection
/// in a reusable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("chunked transfer encoding not allowed for HTTP/1.0")]
    ChunkedNotAllowed,

    #[error("malformed chunk coding: {0}")]
    InvalidChunk(String),

    #[error("premature end of message body (expected: {expected}; received: {received})")]
    PrematureEnd { expected: u64, received: u64 },

    #[error("premature end of chunk coded message body ({received} bytes received)")]
    TruncatedChunk { received: u64 },

    #[error("response body exceeds declared length of {declared} bytes")]
    BodyOverflow { declared: u64 },

    #[error("response body shorter than declared length ({remaining} bytes missing)")]
    BodyUnderflow { remaining: u64 },

    #[error("{0} method not supported")]
    MethodNotSupported(String),

    #[error("{0}")]
    Header(String),
}

impl ProtocolError {
    /// Status code of the error response synthesized for this violation.
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::Parse(ParseError::UnsupportedVersion(_)) => {
                StatusCode::HttpVersionNotSupported
            }
            ProtocolError::MethodNotSupported(_) | ProtocolError::UnsupportedTransferEncoding(_) => {
                StatusCode::NotImplemented
            }
            _ => StatusCode::BadRequest,
        }
    }
}

/// Failures of a single connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,

    #[error("socket read timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Expected ways for a connection to end: peer close, timeout, reset.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Closed | TransportError::Timeout(_) => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::NotConnected
            ),
            TransportError::Protocol(_) => false,
        }
    }
}
