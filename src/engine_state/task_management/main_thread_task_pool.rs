//! # Main Thread Task Pool
//!
//! A queue of tasks that only the main thread executes, once per frame.
//!
//! Any thread may add tasks. `perform_tasks()` takes a snapshot of the queue
//! and runs exactly the tasks present at the moment of the call, in enqueue
//! order. Tasks enqueued while the snapshot runs (for example a continuation
//! scheduling another continuation) wait for the next frame, so a chain of
//! continuations can never starve the frame.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{
    task::{BoxedTask, TaskCategory, TaskContext},
    task_pool::run_guarded,
};

/// A FIFO of tasks drained cooperatively by the main thread.
#[derive(Default)]
pub struct MainThreadTaskPool {
    tasks: Mutex<VecDeque<BoxedTask>>,
}

impl MainThreadTaskPool {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_tasks(&self) -> MutexGuard<'_, VecDeque<BoxedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a task. Safe to call from any thread.
    pub fn add_task(&self, task: BoxedTask) {
        self.lock_tasks().push_back(task);
    }

    /// Number of tasks waiting for the next `perform_tasks()` call.
    pub fn pending_tasks(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Runs every task queued at the time of the call, in enqueue order.
    ///
    /// The caller is responsible for only calling this on the main thread;
    /// `TaskScheduler::execute_main_thread_tasks` enforces it.
    ///
    /// # Returns
    /// The number of tasks executed.
    pub fn perform_tasks(&self) -> usize {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        let executed = tasks.len();

        let context = TaskContext::new(TaskCategory::MainThread, None);
        for task in tasks {
            run_guarded(task, &context);
        }

        log::trace!("Performed {executed} main thread tasks");
        executed
    }

    /// Drops every queued task without running it, returning how many were dropped.
    pub(crate) fn discard_tasks(&self) -> usize {
        let discarded = std::mem::take(&mut *self.lock_tasks());
        discarded.len()
    }
}
