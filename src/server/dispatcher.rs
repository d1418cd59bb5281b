//! One request/response exchange on a connection.

use std::sync::Arc;

use crate::error::{ProtocolError, TransportError};
use crate::http::connection::Connection;
use crate::http::context::ExchangeContext;
use crate::http::headers::name;
use crate::http::interceptor::HttpProcessor;
use crate::http::request::{Request, Version};
use crate::http::response::{Response, StatusCode};
use crate::server::reuse;
use crate::server::session::SessionManager;
use crate::server::worker::{MessageContext, Worker, WorkerError};

/// How an exchange left the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Ready for the next request.
    KeepAlive,
    /// The connection must be closed.
    Close,
    /// The peer closed before sending a request.
    PeerClosed,
}

/// Everything a dispatcher shares across connections.
pub struct ServiceContext {
    pub processor: HttpProcessor,
    pub sessions: Option<Arc<SessionManager>>,
    pub listener_port: Option<u16>,
}

impl ServiceContext {
    pub fn new(processor: HttpProcessor) -> Self {
        Self {
            processor,
            sessions: None,
            listener_port: None,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_listener_port(mut self, port: u16) -> Self {
        self.listener_port = Some(port);
        self
    }
}

/// Drives exchanges through the interceptor chains and the worker.
pub struct HttpService<W> {
    context: ServiceContext,
    worker: Arc<W>,
}

impl<W: Worker> HttpService<W> {
    pub fn new(context: ServiceContext, worker: Arc<W>) -> Self {
        Self { context, worker }
    }

    pub fn worker(&self) -> &Arc<W> {
        &self.worker
    }

    pub fn sessions(&self) -> Option<&Arc<SessionManager>> {
        self.context.sessions.as_ref()
    }

    /// Serves one request on `conn`.
    ///
    /// Protocol errors in the request are answered here and end the
    /// connection; `Err` is left for I/O failures and broken body framing.
    pub async fn handle_request(&self, conn: &mut Connection) -> Result<Exchange, TransportError> {
        let mut exchange = ExchangeContext::new(
            conn.peer_addr(),
            conn.local_addr(),
            self.context.listener_port,
        );

        let mut head = match conn.receive_request().await {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(Exchange::PeerClosed),
            Err(TransportError::Protocol(e)) => {
                self.send_protocol_error(conn, &mut exchange, &e).await?;
                return Ok(Exchange::Close);
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            peer = ?conn.peer_addr(),
            method = %head.method,
            uri = %head.uri,
            version = %head.version,
            "Request received"
        );

        if head.expects_continue() {
            conn.send_continue(head.version).await?;
        }

        if let Err(e) = self.context.processor.process_request(&mut head, &mut exchange) {
            self.send_protocol_error(conn, &mut exchange, &e).await?;
            return Ok(Exchange::Close);
        }
        exchange.set_request(head.clone());

        let session = self.context.sessions.as_ref().map(|sessions| {
            let session = sessions.get_or_create(exchange.session_cookie());
            exchange.set_session_cookie(session.key());
            session
        });

        let mut message = MessageContext::new(&head, conn.peer_addr(), conn.local_addr(), session);
        let version = head.version;
        let (body, stream) = conn.exchange();
        let mut request = Request::new(head, body);
        let mut response = Response::new(version, stream, &self.context.processor, &mut exchange);

        let mut close = false;
        let mut body_broken = false;
        match self
            .worker
            .service(&mut request, &mut response, &mut message)
            .await
        {
            Ok(()) => {}
            Err(WorkerError::Transport(TransportError::Protocol(error))) => {
                tracing::warn!(
                    uri = %request.uri(),
                    status = error.status().as_u16(),
                    error = %error,
                    "Malformed request body"
                );
                // The decoder cannot resync, so the rest of the input is unusable
                body_broken = true;
                if !response.is_committed() {
                    response.send_error(error.status(), &error.to_string());
                    response.set_header(name::CONNECTION, "close");
                }
            }
            Err(WorkerError::Transport(e)) => return Err(e),
            Err(fault) => {
                tracing::warn!(
                    uri = %request.uri(),
                    status = fault.status().as_u16(),
                    error = %fault,
                    "Worker failed"
                );
                if response.is_committed() {
                    close = true;
                } else {
                    send_fault(&mut response, &fault);
                }
            }
        }
        drop(request);

        let head = response.finish().await?;
        tracing::debug!(status = head.status.as_u16(), "Response sent");

        if body_broken {
            return Ok(Exchange::Close);
        }
        conn.reset().await?;

        if close || !conn.is_open() || !reuse::keep_alive(&head) {
            return Ok(Exchange::Close);
        }
        Ok(Exchange::KeepAlive)
    }

    /// Answers a request that was rejected before any processing.
    pub async fn send_unavailable(&self, conn: &mut Connection) -> Result<(), TransportError> {
        let mut exchange = ExchangeContext::new(
            conn.peer_addr(),
            conn.local_addr(),
            self.context.listener_port,
        );
        let mut response = Response::new(
            Version::Http11,
            conn.response_stream(),
            &self.context.processor,
            &mut exchange,
        );
        response.send_error(
            StatusCode::ServiceUnavailable,
            "The server is too busy to process the request",
        );
        response.set_header(name::CONNECTION, "close");
        response.finish().await?;
        Ok(())
    }

    async fn send_protocol_error(
        &self,
        conn: &mut Connection,
        exchange: &mut ExchangeContext,
        error: &ProtocolError,
    ) -> Result<(), TransportError> {
        let status = error.status();
        tracing::warn!(
            peer = ?conn.peer_addr(),
            status = status.as_u16(),
            error = %error,
            "Malformed request"
        );

        let mut response = Response::new(
            Version::Http10,
            conn.response_stream(),
            &self.context.processor,
            exchange,
        );
        response.send_error(status, &error.to_string());
        response.set_header(name::CONNECTION, "close");
        response.finish().await?;
        Ok(())
    }
}

fn send_fault(response: &mut Response<'_>, fault: &WorkerError) {
    response.send_error(fault.status(), &fault.to_string());
    if let WorkerError::Unauthorized { realm } = fault {
        response.add_header(name::WWW_AUTHENTICATE, format!("basic realm=\"{realm}\""));
    }
}
