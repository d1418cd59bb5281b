//! Per-exchange state shared by the interceptors and the dispatcher.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::http::request::RequestHead;

/// Attribute holding the session id of the exchange.
pub const SESSION_COOKIE: &str = "http.session-cookie";

/// Key-value store scoped to one request/response cycle.
///
/// Created when an exchange starts and dropped when it ends; never shared
/// between connections.
#[derive(Debug, Clone, Default)]
pub struct ExchangeContext {
    request: Option<RequestHead>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    listener_port: Option<u16>,
    attributes: HashMap<String, String>,
}

impl ExchangeContext {
    pub fn new(
        peer_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
        listener_port: Option<u16>,
    ) -> Self {
        Self {
            peer_addr,
            local_addr,
            listener_port,
            ..Self::default()
        }
    }

    /// The request being answered, once it has been received.
    pub fn request(&self) -> Option<&RequestHead> {
        self.request.as_ref()
    }

    pub fn set_request(&mut self, request: RequestHead) {
        self.request = Some(request);
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn listener_port(&self) -> Option<u16> {
        self.listener_port
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    pub fn session_cookie(&self) -> Option<&str> {
        self.attribute(SESSION_COOKIE)
    }

    pub fn set_session_cookie(&mut self, id: impl Into<String>) {
        self.set_attribute(SESSION_COOKIE, id);
    }
}
