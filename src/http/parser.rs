use thiserror::Error;

use crate::http::headers::Headers;
use crate::http::request::{Method, RequestHead, Version, is_token};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request line: {0}")]
    InvalidRequestLine(String),
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("invalid protocol version: {0}")]
    InvalidVersion(String),
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("maximum line length limit of {0} exceeded")]
    LineTooLong(usize),
    #[error("maximum header count of {0} exceeded")]
    TooManyHeaders(usize),
    #[error("incomplete message head")]
    Incomplete,
}

/// Bounds applied while parsing a message head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_line_length: usize,
    pub max_header_count: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_line_length: 8192,
            max_header_count: 100,
        }
    }
}

/// Parses a request line and headers from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied; any body bytes
/// after the blank line are left alone. Lines may end in CRLF or a bare LF,
/// blank lines before the request line are skipped, and continuation lines
/// (leading SP or HT) are folded into the previous header.
pub fn parse_request_head(
    buf: &[u8],
    limits: &ParseLimits,
) -> Result<(RequestHead, usize), ParseError> {
    let mut pos = 0;
    let mut request_line: Option<String> = None;
    let mut headers = Headers::new();

    loop {
        let Some(newline) = buf[pos..].iter().position(|&b| b == b'\n') else {
            if buf.len() - pos > limits.max_line_length {
                return Err(ParseError::LineTooLong(limits.max_line_length));
            }
            return Err(ParseError::Incomplete);
        };

        let mut line = &buf[pos..pos + newline];
        pos += newline + 1;
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.len() > limits.max_line_length {
            return Err(ParseError::LineTooLong(limits.max_line_length));
        }

        if request_line.is_none() {
            if !line.is_empty() {
                request_line = Some(latin1(line));
            }
            continue;
        }

        if line.is_empty() {
            break;
        }

        let text = latin1(line);
        if line[0] == b' ' || line[0] == b'\t' {
            if !headers.extend_last(text.trim()) {
                return Err(ParseError::InvalidHeader(text));
            }
            continue;
        }

        if headers.len() >= limits.max_header_count {
            return Err(ParseError::TooManyHeaders(limits.max_header_count));
        }

        let (key, value) = text
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(text.clone()))?;

        if !is_token(key) {
            return Err(ParseError::InvalidHeader(text.clone()));
        }

        headers.append(key, value.trim());
    }

    // The loop only breaks after a request line was seen.
    let request_line = request_line.unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method_str), Some(uri), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine(request_line));
    };

    let method =
        Method::from_str(method_str).ok_or_else(|| ParseError::InvalidMethod(method_str.into()))?;
    let version = parse_version(version)?;

    let head = RequestHead {
        method,
        uri: uri.to_string(),
        version,
        headers,
    };

    Ok((head, pos))
}

fn parse_version(s: &str) -> Result<Version, ParseError> {
    let invalid = || ParseError::InvalidVersion(s.to_string());

    let numbers = s.strip_prefix("HTTP/").ok_or_else(invalid)?;
    let (major, minor) = numbers.split_once('.').ok_or_else(invalid)?;
    let digits = |n: &str| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit());
    if !digits(major) || !digits(minor) {
        return Err(invalid());
    }

    let major: u32 = major.parse().map_err(|_| invalid())?;
    let minor: u32 = minor.parse().map_err(|_| invalid())?;

    match (major, minor) {
        (1, 0) => Ok(Version::Http10),
        (1, _) => Ok(Version::Http11),
        _ => Err(ParseError::UnsupportedVersion(s.to_string())),
    }
}

/// Header bytes are ISO-8859-1.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
