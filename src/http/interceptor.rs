//! Protocol interceptors.
//!
//! Interceptors run in registration order around every exchange. Request
//! interceptors see the parsed head before the worker is invoked; response
//! interceptors see the head right before it is written. They may read and
//! change headers and the exchange context but never perform I/O.

use chrono::Utc;

use crate::error::ProtocolError;
use crate::http::context::ExchangeContext;
use crate::http::headers::name;
use crate::http::request::{RequestHead, Version};
use crate::http::response::{Entity, ResponseHead, StatusCode};

/// Cookie names that carry the session id, compared case-insensitively.
pub const SESSION_COOKIE_NAMES: [&str; 2] = ["axis_session", "JSESSIONID"];

/// Name under which the session id is handed back to the client.
pub const SESSION_COOKIE_NAME: &str = "axis_session";

pub trait RequestInterceptor: Send + Sync {
    fn process(&self, request: &mut RequestHead, context: &mut ExchangeContext)
    -> Result<(), ProtocolError>;
}

pub trait ResponseInterceptor: Send + Sync {
    fn process(&self, response: &mut ResponseHead, context: &mut ExchangeContext)
    -> Result<(), ProtocolError>;
}

/// Ordered request and response interceptor chains.
#[derive(Default)]
pub struct HttpProcessor {
    request: Vec<Box<dyn RequestInterceptor>>,
    response: Vec<Box<dyn ResponseInterceptor>>,
}

impl HttpProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain every server exchange goes through.
    pub fn standard(origin_server: impl Into<String>) -> Self {
        let mut processor = Self::new();
        processor.add_request_interceptor(RequestSessionCookie);
        processor.add_response_interceptor(ResponseDate);
        processor.add_response_interceptor(ResponseServer::new(origin_server));
        processor.add_response_interceptor(ResponseContent);
        processor.add_response_interceptor(ResponseConnControl);
        processor.add_response_interceptor(ResponseSessionCookie);
        processor
    }

    pub fn add_request_interceptor(&mut self, interceptor: impl RequestInterceptor + 'static) {
        self.request.push(Box::new(interceptor));
    }

    pub fn add_response_interceptor(&mut self, interceptor: impl ResponseInterceptor + 'static) {
        self.response.push(Box::new(interceptor));
    }

    pub fn process_request(
        &self,
        request: &mut RequestHead,
        context: &mut ExchangeContext,
    ) -> Result<(), ProtocolError> {
        for interceptor in &self.request {
            interceptor.process(request, context)?;
        }
        Ok(())
    }

    pub fn process_response(
        &self,
        response: &mut ResponseHead,
        context: &mut ExchangeContext,
    ) -> Result<(), ProtocolError> {
        for interceptor in &self.response {
            interceptor.process(response, context)?;
        }
        Ok(())
    }
}

/// Picks the session id out of the request cookies.
pub struct RequestSessionCookie;

impl RequestInterceptor for RequestSessionCookie {
    fn process(
        &self,
        request: &mut RequestHead,
        context: &mut ExchangeContext,
    ) -> Result<(), ProtocolError> {
        let found = request
            .headers
            .get_all(name::COOKIE)
            .flat_map(|v| v.split([';', ',']))
            .filter_map(|element| element.split_once('='))
            .find(|(key, _)| {
                let key = key.trim();
                SESSION_COOKIE_NAMES
                    .iter()
                    .any(|n| n.eq_ignore_ascii_case(key))
            })
            .map(|(_, value)| value.trim().trim_matches('"').to_string());

        if let Some(id) = found.filter(|id| !id.is_empty()) {
            context.set_session_cookie(id);
        }
        Ok(())
    }
}

/// Adds `Date` to final responses.
pub struct ResponseDate;

impl ResponseInterceptor for ResponseDate {
    fn process(&self, response: &mut ResponseHead, _: &mut ExchangeContext) -> Result<(), ProtocolError> {
        if !response.status.is_informational() && !response.headers.contains(name::DATE) {
            response.headers.set(name::DATE, http_date());
        }
        Ok(())
    }
}

/// RFC 1123 date in GMT, as used by the `Date` header.
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Adds `Server` unless the worker set one.
pub struct ResponseServer {
    origin_server: String,
}

impl ResponseServer {
    pub fn new(origin_server: impl Into<String>) -> Self {
        Self {
            origin_server: origin_server.into(),
        }
    }
}

impl ResponseInterceptor for ResponseServer {
    fn process(&self, response: &mut ResponseHead, _: &mut ExchangeContext) -> Result<(), ProtocolError> {
        if !response.headers.contains(name::SERVER) {
            response.headers.set(name::SERVER, self.origin_server.as_str());
        }
        Ok(())
    }
}

/// Writes the framing headers from the committed entity.
///
/// Framing headers set by the worker are dropped.
pub struct ResponseContent;

impl ResponseInterceptor for ResponseContent {
    fn process(&self, response: &mut ResponseHead, _: &mut ExchangeContext) -> Result<(), ProtocolError> {
        let headers = &mut response.headers;
        headers.remove(name::CONTENT_LENGTH);
        headers.remove(name::TRANSFER_ENCODING);

        match response.entity {
            Entity::Chunked if response.version == Version::Http11 => {
                headers.set(name::TRANSFER_ENCODING, "chunked");
            }
            Entity::Chunked | Entity::UntilClose => {}
            Entity::Length(length) => headers.set(name::CONTENT_LENGTH, length.to_string()),
            Entity::None => {
                let bodiless = response.status.is_informational()
                    || matches!(
                        response.status,
                        StatusCode::NoContent | StatusCode::ResetContent | StatusCode::NotModified
                    );
                if !bodiless {
                    headers.set(name::CONTENT_LENGTH, "0");
                }
            }
        }
        Ok(())
    }
}

/// Decides the `Connection` header.
pub struct ResponseConnControl;

impl ResponseInterceptor for ResponseConnControl {
    fn process(
        &self,
        response: &mut ResponseHead,
        context: &mut ExchangeContext,
    ) -> Result<(), ProtocolError> {
        let drops_connection = matches!(
            response.status,
            StatusCode::BadRequest
                | StatusCode::RequestTimeout
                | StatusCode::LengthRequired
                | StatusCode::PayloadTooLarge
                | StatusCode::UriTooLong
                | StatusCode::ServiceUnavailable
                | StatusCode::NotImplemented
        );
        if drops_connection {
            response.headers.set(name::CONNECTION, "close");
            return Ok(());
        }

        let delimited_by_close = match response.entity {
            Entity::UntilClose => true,
            Entity::Chunked => response.version == Version::Http10,
            Entity::None | Entity::Length(_) => false,
        };
        if delimited_by_close {
            response.headers.set(name::CONNECTION, "close");
            return Ok(());
        }

        if let Some(value) = context.request().and_then(|r| r.header(name::CONNECTION)) {
            let value = value.to_string();
            response.headers.set(name::CONNECTION, value);
        }
        Ok(())
    }
}

/// Hands the session id back as `Set-Cookie` and `Set-Cookie2`.
pub struct ResponseSessionCookie;

impl ResponseInterceptor for ResponseSessionCookie {
    fn process(
        &self,
        response: &mut ResponseHead,
        context: &mut ExchangeContext,
    ) -> Result<(), ProtocolError> {
        let Some(id) = context.session_cookie() else {
            return Ok(());
        };

        response
            .headers
            .append(name::SET_COOKIE, format!("{SESSION_COOKIE_NAME}={id}"));

        let mut cookie2 = format!("{SESSION_COOKIE_NAME}={id}");
        if let Some(port) = context.listener_port() {
            cookie2.push_str(&format!("; Port=\"{port}\""));
        }
        cookie2.push_str("; Version=1");
        response.headers.append(name::SET_COOKIE2, cookie2);
        Ok(())
    }
}
