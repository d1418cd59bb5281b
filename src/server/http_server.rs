//! Top-level server lifecycle.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::info;
use url::Url;

use crate::config::{Config, ConfigError};
use crate::http::interceptor::HttpProcessor;
use crate::server::dispatcher::{HttpService, ServiceContext};
use crate::server::executor::TaskExecutor;
use crate::server::failure::DefaultFailureHandler;
use crate::server::listener::{self, Listener, ListenerHandle};
use crate::server::manager::ConnectionManager;
use crate::server::session::SessionManager;
use crate::server::worker::{Worker, WorkerKind};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server is not initialized")]
    NotInitialized,

    #[error("server is already started")]
    AlreadyStarted,

    #[error("invalid endpoint reference: {0}")]
    Url(#[from] url::ParseError),
}

/// Everything that exists between `init` and `destroy`.
struct Running<W> {
    local_addr: SocketAddr,
    sessions: Option<Arc<SessionManager>>,
    manager: Arc<ConnectionManager<W>>,
    request_executor: Arc<TaskExecutor>,
    listener_executor: TaskExecutor,
    listener: Option<Listener<W>>,
    listener_handle: Arc<ListenerHandle>,
}

/// An HTTP server driving one worker.
///
/// `init` binds the socket and wires the pipeline, `start` begins
/// accepting, and `destroy` stops everything in two phases: an interrupt
/// with a grace period, then forced termination.
pub struct SimpleHttpServer<W = WorkerKind> {
    config: Config,
    worker: Arc<W>,
    running: Option<Running<W>>,
}

impl SimpleHttpServer<WorkerKind> {
    /// Server running the worker named by the configuration.
    pub fn from_config(config: Config) -> Self {
        let worker = WorkerKind::from_config(&config.worker);
        Self::new(config, worker)
    }
}

impl<W: Worker> SimpleHttpServer<W> {
    pub fn new(config: Config, worker: W) -> Self {
        Self {
            config,
            worker: Arc::new(worker),
            running: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds the server socket and builds the pipeline.
    ///
    /// Must be called from within a tokio runtime. Calling it again on an
    /// initialized server does nothing.
    pub fn init(&mut self) -> Result<(), ServerError> {
        if self.running.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let addr = self.config.listen_addr()?;
        let socket = listener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let sessions = self.config.session.tracking.then(|| {
            Arc::new(SessionManager::new(Duration::from_millis(
                self.config.session.timeout_ms,
            )))
        });

        let mut context =
            ServiceContext::new(HttpProcessor::standard(self.config.server.origin_server.as_str()))
                .with_listener_port(local_addr.port());
        if let Some(sessions) = &sessions {
            context = context.with_sessions(Arc::clone(sessions));
        }
        let service = Arc::new(HttpService::new(context, Arc::clone(&self.worker)));

        let request_executor = Arc::new(TaskExecutor::new(
            "http-request",
            self.config.executor.max_pool_size,
        ));
        let manager = Arc::new(ConnectionManager::new(service, Arc::clone(&request_executor)));

        let failure_handler = DefaultFailureHandler::new(
            Duration::from_millis(self.config.listener.retry_delay_ms),
            self.config.listener.max_retries,
            Duration::from_millis(self.config.listener.retry_reset_interval_ms),
        );
        let listener = Listener::new(
            addr,
            self.config.connection_config(),
            Arc::clone(&manager),
            Box::new(failure_handler),
        )
        .with_socket(socket);
        let listener_handle = listener.handle();

        info!(address = %local_addr, "Server initialized");
        self.running = Some(Running {
            local_addr,
            sessions,
            manager,
            request_executor,
            listener_executor: TaskExecutor::new("http-listener", 1),
            listener: Some(listener),
            listener_handle,
        });
        Ok(())
    }

    /// Starts accepting connections.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let running = self.running.as_mut().ok_or(ServerError::NotInitialized)?;
        let listener = running.listener.take().ok_or(ServerError::AlreadyStarted)?;

        running
            .listener_executor
            .execute(move |interrupt| listener.run(interrupt))
            .map_err(|_| ServerError::AlreadyStarted)?;
        info!(address = %running.local_addr, "Server started");
        Ok(())
    }

    /// Stops the server.
    ///
    /// Listener and connections are interrupted and given the shutdown
    /// grace period to finish; whatever is still running after that is
    /// destroyed without waiting. Idempotent.
    pub async fn destroy(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("Stopping server");

        running.listener_handle.destroy();
        running.listener_executor.shutdown_now();
        running.request_executor.shutdown_now();

        // One grace period covers both pools
        let deadline = Instant::now() + self.config.shutdown_grace();
        let graceful = running
            .listener_executor
            .await_termination(deadline.saturating_duration_since(Instant::now()))
            .await
            && running
                .request_executor
                .await_termination(deadline.saturating_duration_since(Instant::now()))
                .await;

        if !graceful {
            tracing::warn!(
                active = running.manager.active_count(),
                "Connections still active after grace period, forcing shutdown"
            );
            running.manager.shutdown();
            running.request_executor.abort_all();
            running.listener_executor.abort_all();
        }
        info!("Server stopped");
    }

    /// Initialized, started, and the listener still accepting.
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| {
            r.listener.is_none()
                && !r.listener_handle.is_destroyed()
                && r.listener_executor.active_count() > 0
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn sessions(&self) -> Option<&Arc<SessionManager>> {
        self.running.as_ref().and_then(|r| r.sessions.as_ref())
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |r| r.manager.active_count())
    }

    /// Endpoint reference of a service: `http://<host>:<port><context>/<name>`.
    pub fn epr_for_service(&self, name: &str) -> Result<Url, ServerError> {
        let port = self
            .local_addr()
            .map_or(self.config.server.port, |addr| addr.port());
        let host = &self.config.server.host;
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.clone()
        };
        let context_path = self.config.worker.context_path().trim_end_matches('/');

        let base = Url::parse(&format!("http://{host}:{port}{context_path}/"))?;
        Ok(base.join(name)?)
    }
}
