use bytes::Bytes;

use crate::error::TransportError;
use crate::http::context::ExchangeContext;
use crate::http::headers::{Headers, name};
use crate::http::interceptor::HttpProcessor;
use crate::http::request::{Method, Version};
use crate::http::writer::ResponseStream;

/// HTTP status codes the transport and its workers produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 202 Accepted
    Accepted,
    /// 204 No Content
    NoContent,
    /// 205 Reset Content
    ResetContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 408 Request Timeout
    RequestTimeout,
    /// 411 Length Required
    LengthRequired,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 414 URI Too Long
    UriTooLong,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// 505 HTTP Version Not Supported
    HttpVersionNotSupported,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use conduit::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::ResetContent => 205,
            StatusCode::MovedPermanently => 301,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestTimeout => 408,
            StatusCode::LengthRequired => 411,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::UriTooLong => 414,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::HttpVersionNotSupported => 505,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use conduit::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::ResetContent => "Reset Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::LengthRequired => "Length Required",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::UriTooLong => "URI Too Long",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    pub fn is_informational(&self) -> bool {
        self.as_u16() < 200
    }
}

/// Framing of an outgoing response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// No body at all.
    None,
    /// Exactly this many bytes, announced with `Content-Length`.
    Length(u64),
    /// Unknown length, `Transfer-Encoding: chunked`.
    Chunked,
    /// Unknown length on HTTP/1.0; delimited by closing the connection.
    UntilClose,
}

impl Entity {
    /// Framing for a body of unknown length at this protocol version.
    pub fn streaming(version: Version) -> Self {
        match version {
            Version::Http11 => Entity::Chunked,
            Version::Http10 => Entity::UntilClose,
        }
    }
}

/// Status line, headers and body framing of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub headers: Headers,
    pub entity: Entity,
}

/// Builder for response heads.
///
/// # Example
///
/// ```ignore
/// let head = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .entity(Entity::Length(2))
///     .build();
/// ```
pub struct ResponseBuilder {
    head: ResponseHead,
}

impl ResponseBuilder {
    /// Creates a new HTTP/1.1 response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            head: ResponseHead {
                version: Version::Http11,
                status,
                headers: Headers::new(),
                entity: Entity::None,
            },
        }
    }

    pub fn version(mut self, version: Version) -> Self {
        self.head.version = version;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.head.headers.append(key, value);
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.head.entity = entity;
        self
    }

    pub fn build(self) -> ResponseHead {
        self.head
    }
}

/// The response of an exchange in progress.
///
/// A worker either attaches a buffered body with [`Response::set_body`] or
/// streams it with [`Response::write`]. The head is committed (response
/// interceptors run, status line and headers are written) on the first
/// streamed write or when the exchange finishes, whichever comes first;
/// after that status and headers can no longer change.
pub struct Response<'c> {
    head: ResponseHead,
    body: Option<Bytes>,
    declared_length: Option<u64>,
    stream: ResponseStream<'c>,
    processor: &'c HttpProcessor,
    context: &'c mut ExchangeContext,
    committed: bool,
}

impl<'c> Response<'c> {
    pub(crate) fn new(
        version: Version,
        stream: ResponseStream<'c>,
        processor: &'c HttpProcessor,
        context: &'c mut ExchangeContext,
    ) -> Self {
        Self {
            head: ResponseBuilder::new(StatusCode::Ok).version(version).build(),
            body: None,
            declared_length: None,
            stream,
            processor,
            context,
            committed: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if self.check_uncommitted("status") {
            self.head.status = status;
        }
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.check_uncommitted("header") {
            self.head.headers.append(key, value);
        }
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.check_uncommitted("header") {
            self.head.headers.set(key, value);
        }
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header(name::CONTENT_TYPE, content_type);
    }

    /// Attaches a fully buffered body, sent with `Content-Length`.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        if self.check_uncommitted("body") {
            self.body = Some(body.into());
        }
    }

    /// Declares the length of a body that will be streamed with `write`.
    pub fn set_content_length(&mut self, length: u64) {
        if self.check_uncommitted("content length") {
            self.declared_length = Some(length);
        }
    }

    /// Replaces status, headers and body with a plain-text error.
    pub fn send_error(&mut self, status: StatusCode, message: &str) {
        if !self.check_uncommitted("error") {
            return;
        }
        self.head.status = status;
        self.head.headers = Headers::new();
        self.declared_length = None;
        self.head
            .headers
            .append(name::CONTENT_TYPE, "text/plain; charset=US-ASCII");
        self.body = Some(Bytes::copy_from_slice(message.as_bytes()));
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Streams body bytes, committing the head first if needed.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.committed {
            self.commit(true).await?;
        }
        self.stream.write(data).await
    }

    pub(crate) fn context(&self) -> &ExchangeContext {
        &*self.context
    }

    /// Commits if still pending and terminates the body.
    pub(crate) async fn finish(mut self) -> Result<ResponseHead, TransportError> {
        if !self.committed {
            self.commit(false).await?;
        }
        self.stream.finish().await?;
        Ok(self.head)
    }

    async fn commit(&mut self, streaming: bool) -> Result<(), TransportError> {
        self.head.entity = match (&self.body, streaming, self.declared_length) {
            (Some(body), _, _) => Entity::Length(body.len() as u64),
            (None, true, Some(length)) => Entity::Length(length),
            (None, true, None) => Entity::streaming(self.head.version),
            (None, false, _) => Entity::None,
        };

        self.processor
            .process_response(&mut self.head, &mut *self.context)?;

        let head_request = self
            .context
            .request()
            .is_some_and(|r| r.method == Method::HEAD);
        self.stream.send_response(&self.head, head_request);
        self.committed = true;

        if let Some(body) = self.body.take() {
            self.stream.write(&body).await?;
        }
        Ok(())
    }

    fn check_uncommitted(&self, what: &str) -> bool {
        if self.committed {
            tracing::warn!(what, "Response already committed, change ignored");
        }
        !self.committed
    }
}
