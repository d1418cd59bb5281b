//! Admission and tracking of live connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::http::connection::Connection;
use crate::server::dispatcher::HttpService;
use crate::server::executor::{ExecutorError, TaskExecutor};
use crate::server::processor::{ConnectionProcessor, ProcessorCallback, ProcessorHandle};
use crate::server::worker::Worker;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("connection rejected: {0}")]
    Rejected(#[from] ExecutorError),
}

/// Processors currently serving a connection.
#[derive(Default)]
struct Roster {
    processors: Mutex<HashMap<u64, Arc<ProcessorHandle>>>,
}

impl Roster {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<ProcessorHandle>>> {
        self.processors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessorCallback for Roster {
    fn completed(&self, processor: &ProcessorHandle) {
        self.lock().remove(&processor.id());
    }
}

/// Hands accepted connections to the request executor, one processor each.
pub struct ConnectionManager<W> {
    service: Arc<HttpService<W>>,
    executor: Arc<TaskExecutor>,
    roster: Arc<Roster>,
    next_id: AtomicU64,
}

impl<W: Worker> ConnectionManager<W> {
    pub fn new(service: Arc<HttpService<W>>, executor: Arc<TaskExecutor>) -> Self {
        Self {
            service,
            executor,
            roster: Arc::new(Roster::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Starts serving `conn`.
    ///
    /// When the executor has no free slot the client is answered with
    /// `503 Service Unavailable` and the connection closed.
    pub fn process(&self, mut conn: Connection) -> Result<(), ManagerError> {
        let slot = match self.executor.try_acquire() {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(peer = ?conn.peer_addr(), error = %e, "Connection rejected");
                let service = Arc::clone(&self.service);
                tokio::spawn(async move {
                    if let Err(e) = service.send_unavailable(&mut conn).await {
                        tracing::debug!(error = %e, "Failed to send 503 response");
                    }
                    conn.close().await;
                });
                return Err(e.into());
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ProcessorHandle::new(id));
        self.roster.lock().insert(id, Arc::clone(&handle));
        tracing::debug!(processor = id, peer = ?conn.peer_addr(), "Connection accepted");

        let callback: Arc<dyn ProcessorCallback> = self.roster.clone();
        let processor =
            ConnectionProcessor::new(handle, conn, Arc::clone(&self.service)).with_callback(callback);
        self.executor
            .spawn(slot, move |interrupt| processor.run(interrupt));
        Ok(())
    }

    /// Destroys every tracked processor without waiting for it to finish.
    pub fn shutdown(&self) {
        let processors: Vec<_> = self.roster.lock().drain().map(|(_, p)| p).collect();
        tracing::debug!(count = processors.len(), "Destroying connection processors");
        for processor in processors {
            processor.destroy();
        }
    }

    pub fn active_count(&self) -> usize {
        self.roster.lock().len()
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }
}
