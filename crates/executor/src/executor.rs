//! Bounded-concurrency asynchronous task executor.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, trace};

use crate::signal::{Signal, SignalWait};
use crate::state::RunState;
use crate::task::Task;

/// Errors produced while interacting with an [`Executor`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A task was submitted after [`Executor::stop`] was called.
    #[error("executor is stopping or stopped and no longer accepts work")]
    Decommissioned,
}

struct Inner {
    run_state: RunState,
    queue: VecDeque<Arc<Task>>,
    in_flight: usize,
    capacity: usize,
    completed: u64,
    on_idle: Signal,
    on_stop_requested: Signal,
    on_stopped: Signal,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            run_state: RunState::Idle,
            queue: VecDeque::new(),
            in_flight: 0,
            capacity,
            completed: 0,
            on_idle: Signal::new(),
            on_stop_requested: Signal::new(),
            on_stopped: Signal::new(),
        }
    }
}

/// A bounded-concurrency executor for `'static` unit-returning futures.
///
/// At most `capacity` tasks run concurrently; submissions beyond that limit
/// queue in FIFO order and start as in-flight work completes. The executor
/// moves through [`RunState`] transitions as work arrives and drains, and
/// exposes one-shot signals for callers that want to observe those
/// transitions without polling.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Mutex<Inner>>,
}

impl Executor {
    /// Creates a new executor that runs at most `capacity` tasks at once.
    ///
    /// # Panics
    /// Panics if `capacity` is zero; an executor that can never run a task
    /// is a caller bug, not a runtime condition.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "executor capacity must be at least 1");
        Self {
            inner: Arc::new(Mutex::new(Inner::new(capacity))),
        }
    }

    /// The configured concurrency limit.
    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("executor mutex poisoned").capacity
    }

    /// The number of tasks that have run to completion so far.
    pub fn completed_count(&self) -> u64 {
        self.inner.lock().expect("executor mutex poisoned").completed
    }

    /// The current lifecycle state.
    pub fn state(&self) -> RunState {
        self.inner.lock().expect("executor mutex poisoned").run_state
    }

    /// Submits a future for execution. Starts immediately if capacity
    /// allows, otherwise queues it. Returns [`ExecutorError::Decommissioned`]
    /// if the executor is stopping or stopped.
    pub fn submit<F>(&self, future: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = Arc::new(Task::new(future));
        let mut guard = self.inner.lock().expect("executor mutex poisoned");

        if !guard.run_state.accepts_work() {
            return Err(ExecutorError::Decommissioned);
        }

        guard.run_state = RunState::Running;

        if guard.in_flight < guard.capacity {
            guard.in_flight += 1;
            drop(guard);
            self.spawn_task(task);
        } else {
            guard.queue.push_back(task);
        }

        Ok(())
    }

    /// Requests a graceful stop.
    ///
    /// If the executor is idle, it transitions straight to `Stopped`. If
    /// work is in flight, the executor moves to `Stopping`: queued-but-not-
    /// started tasks are abandoned, in-flight tasks are left to finish, and
    /// `Stopped` follows once the last one completes. Calling this more
    /// than once is a no-op past the first call.
    pub fn stop(&self) {
        let mut guard = self.inner.lock().expect("executor mutex poisoned");
        match guard.run_state {
            RunState::Idle => {
                guard.run_state = RunState::Stopped;
                guard.on_stop_requested.fulfill();
                guard.on_stopped.fulfill();
                debug!("executor stopped from idle");
            }
            RunState::Running => {
                guard.run_state = RunState::Stopping;
                guard.queue.clear();
                guard.on_stop_requested.fulfill();
                debug!(in_flight = guard.in_flight, "executor stopping");
            }
            RunState::Stopping | RunState::Stopped => {}
        }
    }

    /// Resolves once the executor next becomes idle (no in-flight or
    /// queued work). Each idle transition re-arms a fresh signal, so this
    /// may be awaited repeatedly across the executor's lifetime.
    pub fn on_idle(&self) -> SignalWait {
        self.inner.lock().expect("executor mutex poisoned").on_idle.waiter()
    }

    /// Resolves once [`Executor::stop`] has been called.
    pub fn on_stop_requested(&self) -> SignalWait {
        self.inner
            .lock()
            .expect("executor mutex poisoned")
            .on_stop_requested
            .waiter()
    }

    /// Resolves once the executor has fully drained and stopped.
    pub fn on_stopped(&self) -> SignalWait {
        self.inner.lock().expect("executor mutex poisoned").on_stopped.waiter()
    }

    fn spawn_task(&self, task: Arc<Task>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = task.run_once().await {
                trace!(?err, "task completion skipped: already run");
            }
            this.on_task_complete();
        });
    }

    fn on_task_complete(&self) {
        let mut guard = self.inner.lock().expect("executor mutex poisoned");
        guard.in_flight -= 1;
        guard.completed += 1;

        while guard.run_state == RunState::Running
            && guard.in_flight < guard.capacity
        {
            let Some(next) = guard.queue.pop_front() else {
                break;
            };
            guard.in_flight += 1;
            drop(guard);
            self.spawn_task(next);
            guard = self.inner.lock().expect("executor mutex poisoned");
        }

        if guard.in_flight == 0 {
            match guard.run_state {
                RunState::Running => {
                    guard.run_state = RunState::Idle;
                    guard.on_idle.fulfill();
                    let fresh = Signal::new();
                    guard.on_idle = fresh;
                }
                RunState::Stopping => {
                    guard.run_state = RunState::Stopped;
                    guard.on_stopped.fulfill();
                    debug!("executor drained and stopped");
                }
                RunState::Idle | RunState::Stopped => {}
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock().expect("executor mutex poisoned");
        f.debug_struct("Executor")
            .field("run_state", &guard.run_state)
            .field("in_flight", &guard.in_flight)
            .field("queued", &guard.queue.len())
            .field("capacity", &guard.capacity)
            .field("completed", &guard.completed)
            .finish()
    }
}
