//! The worker contract and the built-in workers.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;

use crate::config::WorkerConfig;
use crate::error::TransportError;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request, RequestHead};
use crate::http::response::{Response, StatusCode};
use crate::server::service::ServiceWorker;
use crate::server::session::Session;

/// Failures a worker reports back to the transport.
///
/// Everything except `Transport` is answered with an error response;
/// `Transport` ends the connection.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("authentication required for realm {realm}")]
    Unauthorized { realm: String },

    #[error("{0}")]
    ClientFault(String),

    #[error("{0} method not supported")]
    MethodNotSupported(String),

    #[error("{message}")]
    Status { status: StatusCode, message: String },

    #[error("{0}")]
    Fault(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl WorkerError {
    /// Status of the error response for this fault.
    pub fn status(&self) -> StatusCode {
        match self {
            WorkerError::Unauthorized { .. } => StatusCode::Unauthorized,
            WorkerError::ClientFault(_) => StatusCode::BadRequest,
            WorkerError::MethodNotSupported(_) => StatusCode::NotImplemented,
            WorkerError::Status { status, .. } => *status,
            WorkerError::Fault(_) | WorkerError::Transport(_) => StatusCode::InternalServerError,
        }
    }
}

/// What the worker learns about the exchange besides the request itself.
#[derive(Debug, Clone)]
pub struct MessageContext {
    method: Method,
    uri: String,
    headers: Headers,
    content_type: Option<String>,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    session: Option<Arc<Session>>,
    properties: HashMap<String, String>,
}

impl MessageContext {
    pub fn new(
        request: &RequestHead,
        remote_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
        session: Option<Arc<Session>>,
    ) -> Self {
        Self {
            method: request.method.clone(),
            uri: request.uri.clone(),
            headers: request.headers.clone(),
            content_type: request.content_type().map(str::to_string),
            remote_addr,
            local_addr,
            session,
            properties: HashMap::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The session of this exchange, when session tracking is on.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }
}

/// Serves one request.
///
/// The worker reads the request body and fills the response, either by
/// setting a buffered body or by streaming with [`Response::write`].
/// Returning an error other than `Transport` before the response is
/// committed turns it into an error response.
pub trait Worker: Send + Sync + 'static {
    fn service(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
        context: &mut MessageContext,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;
}

/// Answers with the request line followed by the request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoWorker;

impl Worker for EchoWorker {
    async fn service(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
        _context: &mut MessageContext,
    ) -> Result<(), WorkerError> {
        let mut body = BytesMut::new();
        body.extend_from_slice(format!("{} {}\n", request.method(), request.uri()).as_bytes());
        body.extend_from_slice(&request.body().read_to_end().await?);

        response.set_status(StatusCode::Ok);
        response.set_content_type("text/plain");
        response.set_body(body.freeze());
        Ok(())
    }
}

/// Worker selected by configuration.
#[derive(Debug, Clone)]
pub enum WorkerKind {
    Echo(EchoWorker),
    Service(ServiceWorker),
}

impl WorkerKind {
    pub fn from_config(config: &WorkerConfig) -> Self {
        match config {
            WorkerConfig::Echo => WorkerKind::Echo(EchoWorker),
            WorkerConfig::Service {
                context_path,
                services,
            } => WorkerKind::Service(ServiceWorker::with_echo_services(context_path, services)),
        }
    }
}

impl Worker for WorkerKind {
    async fn service(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
        context: &mut MessageContext,
    ) -> Result<(), WorkerError> {
        match self {
            WorkerKind::Echo(worker) => worker.service(request, response, context).await,
            WorkerKind::Service(worker) => worker.service(request, response, context).await,
        }
    }
}
