//! Fixed-size worker pool over a shared job queue.
//!
//! ## Architecture
//!
//! ```text
//!   submit(f) ──► ┌──────────────────────────────┐        ┌──────────┐
//!                 │ Mutex<QueueState>            │ notify │ worker 0 │
//!                 │   jobs: VecDeque<Job>        │ ─────► │ worker 1 │
//!                 │   stopping: bool             │        │   ...    │
//!                 └──────────────────────────────┘        └────┬─────┘
//!                                                              │ result
//!   TaskHandle<T> ◄─────────── Completion<T> (one-shot) ◄──────┘
//! ```
//!
//! Each submitted closure is wrapped into a type-erased job that runs the
//! closure under `catch_unwind` and publishes the outcome into a one-shot
//! [`Completion`]. A panicking task never takes its worker down; the panic
//! message is delivered to the waiter as [`TaskError::Panicked`].
//!
//! ## Shutdown
//!
//! `shutdown` sets the stop flag, wakes every worker and joins them. Workers
//! drain the queue before exiting, so every accepted task still runs. After
//! shutdown, `submit` returns [`SchedulerError::ShutDown`]. Concurrent callers
//! of `shutdown` all return only once the workers are joined, except a caller
//! running on one of the workers, which cannot wait for itself and returns
//! immediately. When the last owner drops the scheduler from one of its own
//! workers, that worker is not joined.
//!
//! ## Example
//!
//! ```
//! use quantcore::runtime::TaskScheduler;
//!
//! let scheduler = TaskScheduler::new(2).unwrap();
//! let handle = scheduler.submit(|| 6 * 7).unwrap();
//! assert_eq!(handle.get(), Ok(42));
//! scheduler.shutdown();
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, TaskError};
use crate::metrics::SchedulerStats;

/// Worker count used when the host parallelism cannot be determined.
pub const FALLBACK_WORKERS: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    stopping: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
    active: AtomicUsize,
    completed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinPhase {
    Running,
    Joining,
    Joined,
}

struct Workers {
    handles: Vec<JoinHandle<()>>,
    ids: Vec<ThreadId>,
    phase: JoinPhase,
}

/// Multi-worker thread pool returning a [`TaskHandle`] per submitted task.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
    joined: Condvar,
    thread_count: usize,
}

impl TaskScheduler {
    /// Starts `workers` threads; `0` uses the host parallelism.
    pub fn new(workers: usize) -> Result<Self, SchedulerError> {
        let thread_count = if workers == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(FALLBACK_WORKERS)
        } else {
            workers
        };

        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            available: Condvar::new(),
            active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        });

        let scheduler = Self {
            shared,
            workers: Mutex::new(Workers {
                handles: Vec::with_capacity(thread_count),
                ids: Vec::with_capacity(thread_count),
                phase: JoinPhase::Running,
            }),
            joined: Condvar::new(),
            thread_count,
        };

        for index in 0..thread_count {
            let shared = Arc::clone(&scheduler.shared);
            let spawned = thread::Builder::new()
                .name(format!("quantcore-worker-{index}"))
                .spawn(move || worker_loop(&shared, index));
            match spawned {
                Ok(handle) => {
                    let mut workers = scheduler.workers.lock();
                    workers.ids.push(handle.thread().id());
                    workers.handles.push(handle);
                },
                Err(err) => {
                    // Dropping `scheduler` stops and joins the workers that did start.
                    tracing::error!(worker = index, error = %err, "failed to spawn worker");
                    return Err(SchedulerError::Spawn(err));
                },
            }
        }

        tracing::debug!(workers = thread_count, "task scheduler started");
        Ok(scheduler)
    }

    /// Starts a scheduler sized by `config.workers`.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::new(config.workers)
    }

    /// Queues `f` for execution on a worker.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let guard = CompletionGuard {
            completion: Some(Arc::clone(&completion)),
        };
        let job: Job = Box::new(move || {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(panic = %message, "task panicked");
                    TaskError::Panicked(message)
                });
            guard.complete(outcome);
        });

        {
            let mut queue = self.shared.queue.lock();
            if queue.stopping {
                return Err(SchedulerError::ShutDown);
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();
        Ok(TaskHandle { completion })
    }

    /// Jobs queued but not yet picked up by a worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Jobs currently running.
    pub fn active_tasks(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Jobs that ran to completion (including panicked ones).
    pub fn completed_tasks(&self) -> usize {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Number of worker threads started.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Snapshot of the counters above.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            threads: self.thread_count,
            pending: self.pending_tasks(),
            active: self.active_tasks(),
            completed: self.completed_tasks(),
        }
    }

    /// Blocks until the queue is empty and no job is running.
    ///
    /// Tasks submitted concurrently with this call may or may not be waited for.
    pub fn wait_all(&self) {
        loop {
            {
                let queue = self.shared.queue.lock();
                if queue.jobs.is_empty() && self.shared.active.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            thread::yield_now();
        }
    }

    /// Returns `true` once `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().stopping
    }

    /// Stops accepting work, drains the queue and joins the workers.
    ///
    /// Idempotent. Every caller returns after the workers are joined, even if
    /// another thread started the join. Safe to call from a worker thread;
    /// that worker is detached instead of joined and does not wait.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stopping = true;
        }
        self.shared.available.notify_all();

        let current = thread::current().id();
        let handles = {
            let mut workers = self.workers.lock();
            match workers.phase {
                JoinPhase::Joined => return,
                JoinPhase::Joining => {
                    if !workers.ids.contains(&current) {
                        while workers.phase != JoinPhase::Joined {
                            self.joined.wait(&mut workers);
                        }
                    }
                    return;
                },
                JoinPhase::Running => {
                    workers.phase = JoinPhase::Joining;
                    std::mem::take(&mut workers.handles)
                },
            }
        };

        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }

        self.workers.lock().phase = JoinPhase::Joined;
        self.joined.notify_all();
        tracing::debug!(
            completed = self.completed_tasks(),
            "task scheduler stopped"
        );
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("thread_count", &self.thread_count)
            .field("pending", &self.pending_tasks())
            .field("active", &self.active_tasks())
            .field("completed", &self.completed_tasks())
            .finish()
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    tracing::trace!(worker = index, "worker started");
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    // Counted as active before the lock is released so
                    // `wait_all` never sees an empty queue with the job in flight.
                    shared.active.fetch_add(1, Ordering::AcqRel);
                    break Some(job);
                }
                if queue.stopping {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };
        let Some(job) = job else { break };
        job();
        shared.completed.fetch_add(1, Ordering::AcqRel);
        shared.active.fetch_sub(1, Ordering::AcqRel);
    }
    tracing::trace!(worker = index, "worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// One-shot completion
// ---------------------------------------------------------------------------

struct Completion<T> {
    slot: Mutex<Option<Result<T, TaskError>>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn set(&self, outcome: Result<T, TaskError>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        drop(slot);
        self.ready.notify_all();
    }
}

/// Completes with [`TaskError::Disconnected`] if the job is dropped unrun.
struct CompletionGuard<T> {
    completion: Option<Arc<Completion<T>>>,
}

impl<T> CompletionGuard<T> {
    fn complete(mut self, outcome: Result<T, TaskError>) {
        if let Some(completion) = self.completion.take() {
            completion.set(outcome);
        }
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.set(Err(TaskError::Disconnected));
        }
    }
}

/// Waitable result of a submitted task.
#[must_use = "dropping a TaskHandle discards the task result"]
pub struct TaskHandle<T> {
    completion: Arc<Completion<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes and returns its value.
    pub fn get(self) -> Result<T, TaskError> {
        let mut slot = self.completion.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.completion.ready.wait(&mut slot);
        }
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    ///
    /// On timeout the task keeps running; its result is discarded.
    pub fn get_timeout(self, timeout: Duration) -> Result<T, TaskError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.completion.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            if self
                .completion
                .ready
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return slot.take().unwrap_or(Err(TaskError::Timeout));
            }
        }
    }

    /// Non-blocking check whether the result is available.
    pub fn is_finished(&self) -> bool {
        self.completion.slot.lock().is_some()
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}
