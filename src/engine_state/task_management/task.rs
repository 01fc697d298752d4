//! # Task System Core Types
//!
//! This module defines the fundamental building blocks of the task system.
//!
//! ## Core Components
//! - `Task`: A unit of work that can be executed asynchronously
//! - `TaskCategory`: The routing class deciding which pool runs a task
//! - `TaskContext`: Passed to every task when it runs, describing where it runs
//!
//! ## Task Lifecycle
//! 1. A `Task` is created and scheduled via `TaskScheduler::schedule_task()`
//! 2. The scheduler routes it by category to a worker pool, the main-thread
//!    queue or the single-flight file queue
//! 3. The task's `process()` method is called exactly once, consuming the task
//! 4. The task may schedule follow-up work through a captured `SchedulerHandle`
//!    or through its context's originating pool
//!
//! ## Cancellation
//! There is none. Once scheduled a task will run. A task that may become
//! irrelevant should capture its own validity flag and check it in `process()`.
//!
//! ## Thread Safety
//! - `Task` must be `Send` to be transferred between threads
//! - All shared state a task touches must be synchronized by the task author

use std::fmt;

use super::task_pool::TaskPoolHandle;

/// A trait representing a unit of work that can be executed asynchronously.
///
/// Any `FnOnce(&TaskContext) + Send + 'static` closure is a `Task`, so most
/// callers never implement this directly. Implement it on a struct when the
/// work carries enough state to deserve a name.
///
/// # Implementation Guidelines
/// - Should own all the data it needs; no borrowed state
/// - Should avoid blocking on other tasks, pools are finite
/// - Panics are caught and logged by the executing pool, never retried
pub trait Task: Send + 'static {
    /// Runs the task, consuming it.
    fn process(self: Box<Self>, context: &TaskContext);
}

impl<F> Task for F
where
    F: FnOnce(&TaskContext) + Send + 'static,
{
    fn process(self: Box<Self>, context: &TaskContext) {
        (*self)(context)
    }
}

/// A heap-allocated, type-erased task as stored in every queue.
pub type BoxedTask = Box<dyn Task>;

/// Routing classification for a task.
///
/// The category decides which queue executes a task. It does not express a
/// priority: the only ordering guarantee is FIFO dispatch within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    /// Latency-sensitive work on the small worker pool.
    Small,
    /// Throughput work on the large worker pool.
    Large,
    /// Work drained once per frame by the main thread.
    MainThread,
    /// World-state mutation that must complete before the frame's main-thread drain.
    GameLogic,
    /// File I/O, executed strictly one at a time in submission order.
    File,
}

impl TaskCategory {
    /// All categories, in declaration order.
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::Small,
        TaskCategory::Large,
        TaskCategory::MainThread,
        TaskCategory::GameLogic,
        TaskCategory::File,
    ];

    /// A short lowercase name, used for thread names and logs.
    pub fn name(&self) -> &'static str {
        match self {
            TaskCategory::Small => "small",
            TaskCategory::Large => "large",
            TaskCategory::MainThread => "main",
            TaskCategory::GameLogic => "game-logic",
            TaskCategory::File => "file",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Describes where a task is running.
///
/// Tasks executed on a worker pool get a handle to that pool so they can
/// schedule child tasks onto it. Main-thread and file tasks have no pool.
#[derive(Clone)]
pub struct TaskContext {
    category: TaskCategory,
    pool: Option<TaskPoolHandle>,
}

impl TaskContext {
    /// Creates a context for a task of `category`, optionally bound to the pool it runs on.
    pub fn new(category: TaskCategory, pool: Option<TaskPoolHandle>) -> Self {
        Self { category, pool }
    }

    /// The category the task was scheduled under.
    pub fn category(&self) -> TaskCategory {
        self.category
    }

    /// The pool executing the task, if it runs on a worker pool.
    pub fn pool(&self) -> Option<&TaskPoolHandle> {
        self.pool.as_ref()
    }

    /// Schedules `task` onto the originating pool.
    ///
    /// The child runs as a plain task of that pool's category; it is not
    /// counted against the game-logic barrier and is not file-serialized.
    ///
    /// # Returns
    /// `false` (and drops the task) if this context has no pool.
    pub fn schedule_child<T: Task>(&self, task: T) -> bool {
        match &self.pool {
            Some(pool) => {
                pool.add_task(Box::new(task));
                true
            }
            None => {
                log::warn!(
                    "{} task tried to schedule a child without an originating pool",
                    self.category
                );
                false
            }
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("category", &self.category)
            .field("pool", &self.pool.as_ref().map(|pool| pool.category()))
            .finish()
    }
}
