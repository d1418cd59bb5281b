//! Bounded task executor with cooperative interrupt.
//!
//! Tasks run on the ambient tokio runtime. Admission is bounded by a
//! semaphore: a task takes a slot before it is spawned and gives it back
//! when it ends, and submission fails instead of waiting when no slot is
//! free.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("executor '{0}' has no free slot")]
    Saturated(String),

    #[error("executor '{0}' is shut down")]
    ShutDown(String),
}

/// Cooperative interrupt flag handed to every task.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    pub fn is_interrupted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the executor is shut down.
    pub async fn interrupted(&mut self) {
        // A dropped executor counts as an interrupt
        let _ = self.rx.wait_for(|interrupted| *interrupted).await;
    }
}

/// A reserved execution slot.
///
/// Dropping it unused gives the slot back.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

struct State {
    active: AtomicUsize,
    finished: Notify,
}

/// Decrements the active count however the task ends, abort included.
struct TaskGuard {
    state: Arc<State>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::AcqRel);
        self.state.finished.notify_waiters();
    }
}

pub struct TaskExecutor {
    name: String,
    max_tasks: usize,
    slots: Arc<Semaphore>,
    interrupt: watch::Sender<bool>,
    shut_down: AtomicBool,
    tasks: Mutex<JoinSet<()>>,
    state: Arc<State>,
}

impl TaskExecutor {
    pub fn new(name: impl Into<String>, max_tasks: usize) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            name: name.into(),
            max_tasks,
            slots: Arc::new(Semaphore::new(max_tasks)),
            interrupt,
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
            state: Arc::new(State {
                active: AtomicUsize::new(0),
                finished: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Reserves a slot without waiting.
    pub fn try_acquire(&self) -> Result<Slot, ExecutorError> {
        if self.is_shutdown() {
            return Err(ExecutorError::ShutDown(self.name.clone()));
        }
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| ExecutorError::Saturated(self.name.clone()))?;
        Ok(Slot { _permit: permit })
    }

    /// Runs a task in a slot reserved with [`TaskExecutor::try_acquire`].
    pub fn spawn<F, Fut>(&self, slot: Slot, task: F)
    where
        F: FnOnce(Interrupt) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interrupt = Interrupt {
            rx: self.interrupt.subscribe(),
        };
        let future = task(interrupt);

        self.state.active.fetch_add(1, Ordering::AcqRel);
        let guard = TaskGuard {
            state: Arc::clone(&self.state),
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap tasks that already ended so the set does not grow unbounded
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _slot = slot;
            let _guard = guard;
            future.await;
        });
    }

    /// Reserves a slot and runs the task in it, or rejects it.
    pub fn execute<F, Fut>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce(Interrupt) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let slot = self.try_acquire()?;
        self.spawn(slot, task);
        Ok(())
    }

    /// Raises the interrupt on every task and refuses new ones.
    pub fn shutdown_now(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!(executor = %self.name, active = self.active_count(), "Executor shutting down");
        }
        self.interrupt.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Shut down and every task ended.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.active_count() == 0
    }

    /// Waits until every task ended; `false` if `timeout` elapsed first.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let finished = self.state.finished.notified();
                if self.active_count() == 0 {
                    return;
                }
                finished.await;
            }
        })
        .await
        .is_ok()
    }

    /// Aborts every outstanding task at its next suspension point.
    pub fn abort_all(&self) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }

    pub fn active_count(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }
}
