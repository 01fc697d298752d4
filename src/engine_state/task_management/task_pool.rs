//! # Worker Task Pool
//!
//! A fixed set of worker threads pulling boxed tasks from one shared FIFO queue.
//!
//! ## Behavior
//! - `add_task()` never blocks beyond the brief queue lock
//! - Tasks are dequeued in submission order; completion order is unspecified
//! - A task taken by a worker runs to completion on that worker
//! - Idle workers sleep on a condition variable and wake on enqueue or shutdown
//!
//! ## Shutdown
//! Dropping a `TaskPool` drains it: every task queued before or during the
//! drop runs before the workers are joined. Once the workers have joined the
//! pool is stopped and any task submitted afterwards is dropped with a warning.
//!
//! ## Platform Notes
//! - **Native**: Workers are `std::thread` OS threads
//! - **Web**: Workers are spawned through `wasm_thread`

use std::{
    any::Any,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

#[cfg(target_family = "wasm")]
mod wasm_imports {
    pub use wasm_thread as thread;
    pub use wasm_thread::JoinHandle;
}

#[cfg(target_family = "wasm")]
use self::wasm_imports::*;

#[cfg(not(target_family = "wasm"))]
use std::thread::{self, JoinHandle};

use super::{
    error::SchedulerError,
    task::{BoxedTask, TaskCategory, TaskContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Running,
    Draining,
    Stopped,
}

struct PoolQueue {
    tasks: VecDeque<BoxedTask>,
    state: PoolState,
}

struct PoolShared {
    category: TaskCategory,
    queue: Mutex<PoolQueue>,
    task_available: Condvar,
}

impl PoolShared {
    fn lock_queue(&self) -> MutexGuard<'_, PoolQueue> {
        // The lock is never held while a task runs, so a poisoned queue is still consistent.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until a task is available, or returns `None` once the pool is
    /// shutting down and the queue is empty.
    fn next_task(&self) -> Option<BoxedTask> {
        let mut queue = self.lock_queue();
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                return Some(task);
            }
            if queue.state != PoolState::Running {
                return None;
            }
            queue = self
                .task_available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// A cloneable, thread-safe handle for submitting work to a `TaskPool`.
///
/// Handles do not keep the workers alive; they only reference the queue.
#[derive(Clone)]
pub struct TaskPoolHandle {
    shared: Arc<PoolShared>,
}

impl TaskPoolHandle {
    /// Enqueues a task and wakes one idle worker.
    pub fn add_task(&self, task: BoxedTask) {
        let mut queue = self.shared.lock_queue();
        if queue.state == PoolState::Stopped {
            drop(queue);
            log::warn!(
                "Dropping task submitted to the stopped {} task pool",
                self.shared.category
            );
            return;
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.shared.task_available.notify_one();
    }

    /// The category of work this pool executes.
    pub fn category(&self) -> TaskCategory {
        self.shared.category
    }

    /// Number of tasks waiting for a worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.lock_queue().tasks.len()
    }
}

/// A fixed-size pool of worker threads sharing one FIFO task queue.
///
/// Used for both the small (latency-sensitive) and large (throughput) pools
/// of the `TaskScheduler`.
pub struct TaskPool {
    handle: TaskPoolHandle,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Creates a pool and starts its workers.
    ///
    /// # Arguments
    /// * `category` - The category of work this pool runs; passed to every task's context
    /// * `num_threads` - Number of worker threads, at least one is always created
    /// * `thread_name_prefix` - Workers are named `<prefix>-<category>-<index>`
    ///
    /// # Errors
    /// Returns `SchedulerError::SpawnWorker` if a thread cannot be created.
    /// Workers started before the failure are drained and joined.
    pub fn new(
        category: TaskCategory,
        num_threads: usize,
        thread_name_prefix: &str,
    ) -> Result<Self, SchedulerError> {
        let num_threads = num_threads.max(1);
        let handle = TaskPoolHandle {
            shared: Arc::new(PoolShared {
                category,
                queue: Mutex::new(PoolQueue {
                    tasks: VecDeque::new(),
                    state: PoolState::Running,
                }),
                task_available: Condvar::new(),
            }),
        };

        let mut pool = TaskPool {
            handle,
            workers: Vec::with_capacity(num_threads),
        };

        for index in 0..num_threads {
            let worker_handle = pool.handle.clone();
            let worker = thread::Builder::new()
                .name(format!("{thread_name_prefix}-{category}-{index}"))
                .spawn(move || worker_loop(worker_handle))
                .map_err(|source| SchedulerError::SpawnWorker {
                    category,
                    index,
                    source,
                })?;
            pool.workers.push(worker);
        }

        log::info!(
            "Created {} task pool with {} threads (available parallelism: {:?})",
            category,
            num_threads,
            thread::available_parallelism()
        );

        Ok(pool)
    }

    /// Enqueues a task. See `TaskPoolHandle::add_task`.
    pub fn add_task(&self, task: BoxedTask) {
        self.handle.add_task(task);
    }

    /// Returns a handle that can submit work to this pool from any thread.
    pub fn handle(&self) -> TaskPoolHandle {
        self.handle.clone()
    }

    /// The category of work this pool executes.
    pub fn category(&self) -> TaskCategory {
        self.handle.category()
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        let shared = &self.handle.shared;
        shared.lock_queue().state = PoolState::Draining;
        shared.task_available.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("A {} worker thread terminated abnormally", shared.category);
            }
        }

        let abandoned = {
            let mut queue = shared.lock_queue();
            queue.state = PoolState::Stopped;
            std::mem::take(&mut queue.tasks)
        };
        if !abandoned.is_empty() {
            log::warn!(
                "Dropping {} tasks submitted to the {} task pool after its workers exited",
                abandoned.len(),
                shared.category
            );
        }
        log::debug!("{} task pool shut down", shared.category);
    }
}

fn worker_loop(handle: TaskPoolHandle) {
    let context = TaskContext::new(handle.category(), Some(handle.clone()));
    while let Some(task) = handle.shared.next_task() {
        run_guarded(task, &context);
    }
    log::trace!("{} worker exiting", handle.category());
}

/// Runs a task, catching and logging a panic so it cannot unwind into the caller's loop.
pub(crate) fn run_guarded(task: BoxedTask, context: &TaskContext) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.process(context))) {
        log::error!(
            "{} task panicked: {}",
            context.category(),
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
