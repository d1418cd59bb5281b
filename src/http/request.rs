use std::fmt;

use crate::http::connection::RequestBody;
use crate::http::headers::{Headers, name};

/// HTTP request methods.
///
/// Methods outside the common set are kept verbatim as `Extension`; whether
/// they are served is up to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    TRACE,
    CONNECT,
    Extension(String),
}

impl Method {
    /// Parses an HTTP method token.
    ///
    /// Method names are case-sensitive. Returns `None` when `s` is not a
    /// valid token.
    ///
    /// # Example
    ///
    /// ```
    /// # use conduit::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), Some(Method::Extension("get".into())));
    /// assert_eq!(Method::from_str("GE T"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        let method = match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            "TRACE" => Method::TRACE,
            "CONNECT" => Method::CONNECT,
            other if is_token(other) => Method::Extension(other.to_string()),
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
            Method::Extension(m) => m,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 7230 `token`.
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Protocol versions spoken on the wire.
///
/// Requests announcing a later 1.x minor version are answered as HTTP/1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request line and headers of a received request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target as sent (e.g., "/services/Echo?wsdl")
    pub uri: String,
    pub version: Version,
    pub headers: Headers,
}

impl RequestHead {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Media type part of `Content-Type`, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.header(name::CONTENT_TYPE)
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// An explicit `Connection` header wins; otherwise HTTP/1.1 defaults to
    /// keep-alive and HTTP/1.0 to close.
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token(name::CONNECTION, "close") {
            return false;
        }
        if self.headers.has_token(name::CONNECTION, "keep-alive") {
            return true;
        }
        self.version == Version::Http11
    }

    /// Whether the request carries a body (declared length or chunked).
    pub fn has_body(&self) -> bool {
        self.headers.contains(name::TRANSFER_ENCODING)
            || self
                .header(name::CONTENT_LENGTH)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .is_some_and(|n| n > 0)
    }

    /// `Expect: 100-continue` on an HTTP/1.1 request with a body.
    pub fn expects_continue(&self) -> bool {
        self.version == Version::Http11
            && self.has_body()
            && self
                .header(name::EXPECT)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }
}

/// Builder for constructing request heads.
pub struct RequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Version,
    headers: Headers,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            uri: None,
            version: Version::Http11,
            headers: Headers::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn build(self) -> Result<RequestHead, &'static str> {
        Ok(RequestHead {
            method: self.method.ok_or("method missing")?,
            uri: self.uri.ok_or("uri missing")?,
            version: self.version,
            headers: self.headers,
        })
    }
}

/// A request being served: its head plus the negotiated body stream.
pub struct Request<'c> {
    head: RequestHead,
    body: RequestBody<'c>,
}

impl<'c> Request<'c> {
    pub(crate) fn new(head: RequestHead, body: RequestBody<'c>) -> Self {
        Self { head, body }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn uri(&self) -> &str {
        &self.head.uri
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.head.header(key)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.head.content_type()
    }

    /// The body stream, framed per the request headers.
    pub fn body(&mut self) -> &mut RequestBody<'c> {
        &mut self.body
    }
}
