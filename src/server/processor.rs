//! Per-connection task.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::error::TransportError;
use crate::http::connection::Connection;
use crate::server::dispatcher::{Exchange, HttpService};
use crate::server::executor::Interrupt;
use crate::server::worker::Worker;

/// Identity and termination flag of a connection processor.
///
/// Shared between the task serving the connection and whoever may need to
/// destroy it. Two handles are equal when their ids are.
#[derive(Debug)]
pub struct ProcessorHandle {
    id: u64,
    destroyed: AtomicBool,
    signal: watch::Sender<bool>,
}

impl ProcessorHandle {
    pub fn new(id: u64) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            id,
            destroyed: AtomicBool::new(false),
            signal,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stops the processor; its connection is closed by the task itself.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.signal.send_replace(true);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }
}

impl PartialEq for ProcessorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProcessorHandle {}

impl Hash for ProcessorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Told when a processor has finished with its connection.
pub trait ProcessorCallback: Send + Sync {
    fn completed(&self, processor: &ProcessorHandle);
}

/// Serves requests on one connection until it closes.
pub struct ConnectionProcessor<W> {
    handle: Arc<ProcessorHandle>,
    conn: Connection,
    service: Arc<HttpService<W>>,
    callback: Option<Arc<dyn ProcessorCallback>>,
}

impl<W: Worker> ConnectionProcessor<W> {
    pub fn new(handle: Arc<ProcessorHandle>, conn: Connection, service: Arc<HttpService<W>>) -> Self {
        Self {
            handle,
            conn,
            service,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProcessorCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn handle(&self) -> &Arc<ProcessorHandle> {
        &self.handle
    }

    /// Runs the receive/dispatch loop.
    ///
    /// An interrupt is honoured between exchanges and while waiting for the
    /// next request; destroying the handle also cuts an exchange short.
    pub async fn run(mut self, mut interrupt: Interrupt) {
        let id = self.handle.id();
        let peer = self.conn.peer_addr();
        let mut destroyed = self.handle.subscribe();

        loop {
            if self.handle.is_destroyed() || interrupt.is_interrupted() || !self.conn.is_open() {
                break;
            }

            let ready = tokio::select! {
                _ = interrupt.interrupted() => break,
                _ = destroyed_signal(&mut destroyed) => break,
                ready = self.conn.wait_for_data() => ready,
            };
            match ready {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(processor = id, peer = ?peer, "Client closed connection");
                    break;
                }
                Err(e) => {
                    log_failure(id, &e);
                    break;
                }
            }

            let outcome = tokio::select! {
                _ = destroyed_signal(&mut destroyed) => break,
                outcome = self.service.handle_request(&mut self.conn) => outcome,
            };
            match outcome {
                Ok(Exchange::KeepAlive) => {}
                Ok(Exchange::Close) => break,
                Ok(Exchange::PeerClosed) => {
                    tracing::debug!(processor = id, peer = ?peer, "Client closed connection");
                    break;
                }
                Err(e) => {
                    log_failure(id, &e);
                    break;
                }
            }
        }

        self.handle.destroy();
        self.conn.close().await;
        tracing::debug!(processor = id, peer = ?peer, "Connection processor finished");

        if let Some(callback) = &self.callback {
            callback.completed(&self.handle);
        }
    }
}

async fn destroyed_signal(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|destroyed| *destroyed).await;
}

fn log_failure(id: u64, error: &TransportError) {
    if error.is_transient() {
        tracing::debug!(processor = id, error = %error, "Connection ended");
    } else {
        tracing::warn!(processor = id, error = %error, "Connection failed");
    }
}
