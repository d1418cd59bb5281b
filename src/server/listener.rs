use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::info;

use crate::http::connection::{Connection, ConnectionConfig};
use crate::server::executor::Interrupt;
use crate::server::failure::{FailureHandler, Retry};
use crate::server::manager::ConnectionManager;
use crate::server::worker::Worker;

const ACCEPT_BACKLOG: u32 = 1024;

/// Binds a server socket with `SO_REUSEADDR`.
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(ACCEPT_BACKLOG)
}

/// Stops a running listener from another task.
#[derive(Debug)]
pub struct ListenerHandle {
    destroyed: AtomicBool,
    signal: watch::Sender<bool>,
}

impl ListenerHandle {
    fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            destroyed: AtomicBool::new(false),
            signal,
        }
    }

    /// Closes the server socket; idempotent.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.signal.send_replace(true);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Accept loop feeding a connection manager.
///
/// The server socket is bound lazily unless one is supplied. Bind and accept
/// failures go to the failure handler, which decides between backing off
/// and giving up.
pub struct Listener<W> {
    addr: SocketAddr,
    socket: Option<TcpListener>,
    config: ConnectionConfig,
    manager: Arc<ConnectionManager<W>>,
    failure_handler: Box<dyn FailureHandler>,
    handle: Arc<ListenerHandle>,
}

impl<W: Worker> Listener<W> {
    pub fn new(
        addr: SocketAddr,
        config: ConnectionConfig,
        manager: Arc<ConnectionManager<W>>,
        failure_handler: Box<dyn FailureHandler>,
    ) -> Self {
        Self {
            addr,
            socket: None,
            config,
            manager,
            failure_handler,
            handle: Arc::new(ListenerHandle::new()),
        }
    }

    /// Uses an already bound socket instead of binding on first run.
    pub fn with_socket(mut self, socket: TcpListener) -> Self {
        self.socket = Some(socket);
        self
    }

    pub fn handle(&self) -> Arc<ListenerHandle> {
        Arc::clone(&self.handle)
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_destroyed()
    }

    pub async fn run(mut self, mut interrupt: Interrupt) {
        let mut destroyed = self.handle.signal.subscribe();

        loop {
            if self.handle.is_destroyed() || interrupt.is_interrupted() {
                break;
            }

            let Some(socket) = &self.socket else {
                match bind(self.addr) {
                    Ok(socket) => {
                        info!("Listening on {}", socket.local_addr().unwrap_or(self.addr));
                        self.socket = Some(socket);
                    }
                    Err(e) => {
                        tracing::warn!(address = %self.addr, error = %e, "Failed to bind");
                        if !self.handle_failure(e, &mut interrupt, &mut destroyed).await {
                            break;
                        }
                    }
                }
                continue;
            };

            let accepted = tokio::select! {
                _ = interrupt.interrupted() => break,
                _ = destroyed_signal(&mut destroyed) => break,
                accepted = socket.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.failure_handler.succeeded();
                    match Connection::from_tcp(stream, &self.config) {
                        Ok(conn) => {
                            // Rejections are answered and logged by the manager
                            let _ = self.manager.process(conn);
                        }
                        Err(e) => tracing::warn!(peer = %peer, error = %e, "Failed to set up connection"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    if !self.handle_failure(e, &mut interrupt, &mut destroyed).await {
                        break;
                    }
                }
            }
        }

        self.handle.destroy();
        self.socket = None;
        info!("Listener stopped");
    }

    /// Applies the failure policy; `false` means stop listening.
    async fn handle_failure(
        &mut self,
        error: io::Error,
        interrupt: &mut Interrupt,
        destroyed: &mut watch::Receiver<bool>,
    ) -> bool {
        match self.failure_handler.failed(&error) {
            Retry::After(delay) => tokio::select! {
                _ = interrupt.interrupted() => false,
                _ = destroyed_signal(destroyed) => false,
                _ = tokio::time::sleep(delay) => true,
            },
            Retry::GiveUp => {
                self.failure_handler
                    .notify_abnormal_termination("Listener terminated abnormally", &error);
                false
            }
        }
    }
}

async fn destroyed_signal(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|destroyed| *destroyed).await;
}
