//! # Task Management System
//!
//! This module coordinates all asynchronous work in the engine. Work is routed
//! by `TaskCategory` to one of four executors:
//!
//! - **Small pool**: latency-sensitive CPU work, also runs game-logic tasks
//! - **Large pool**: throughput CPU work, also runs file tasks
//! - **Main thread queue**: drained once per frame by the main thread
//! - **File queue**: a single-flight FIFO, at most one file task runs at a time
//!
//! ## Architecture Overview
//! - `TaskScheduler`: Owns the worker pools and is the per-frame entry point
//! - `SchedulerHandle`: Cloneable, thread-safe routing handle tasks capture to
//!   schedule follow-up work
//! - `TaskPool`: Fixed-size worker pool with a shared FIFO queue
//! - `MainThreadTaskPool`: Snapshot-drained queue for the main thread
//!
//! ## Frame Barrier
//! Game-logic tasks are counted from enqueue to completion.
//! `execute_main_thread_tasks()` blocks until that count reaches zero before
//! draining the main-thread queue, so world-state mutations queued as game
//! logic are fully applied before the frame's main-thread work runs.
//!
//! ## Ordering Guarantees
//! - FIFO dispatch within a single pool, no ordering across pools
//! - Game-logic tasks complete before the same frame's main-thread drain
//! - File tasks execute one at a time in submission order
//!
//! ## Example Usage
//! ```rust,no_run
//! use frame_engine::application_state::device::SystemDevice;
//! use frame_engine::engine_state::task_management::{
//!     config::SchedulerConfig, task::{TaskCategory, TaskContext}, TaskScheduler,
//! };
//!
//! let scheduler = TaskScheduler::new(&SchedulerConfig::default(), &SystemDevice).unwrap();
//! let handle = scheduler.handle();
//!
//! scheduler.schedule_task(TaskCategory::GameLogic, move |_: &TaskContext| {
//!     // mutate world state, then hand a result back to the main thread
//!     handle.schedule_task(TaskCategory::MainThread, |_: &TaskContext| {});
//! });
//!
//! // In your main/game loop:
//! scheduler.execute_main_thread_tasks();
//! ```

pub mod config;
pub mod error;
pub mod main_thread_task_pool;
pub mod task;
pub mod task_pool;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, ThreadId},
};

use web_time::{Duration, Instant};

use crate::application_state::device::Device;
use config::SchedulerConfig;
use error::SchedulerError;
use main_thread_task_pool::MainThreadTaskPool;
use task::{BoxedTask, Task, TaskCategory, TaskContext};
use task_pool::{TaskPool, TaskPoolHandle};

/// Counts outstanding game-logic tasks and lets the main thread wait for zero.
struct GameLogicBarrier {
    outstanding: AtomicUsize,
    lock: Mutex<()>,
    completed: Condvar,
}

impl GameLogicBarrier {
    fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            lock: Mutex::new(()),
            completed: Condvar::new(),
        }
    }

    fn begin(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Notifying under the lock closes the window between the waiter's check and its wait.
            let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.completed.notify_all();
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn wait(&self) -> Duration {
        let started = Instant::now();
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.outstanding.load(Ordering::Acquire) != 0 {
            lock = self
                .completed
                .wait(lock)
                .unwrap_or_else(PoisonError::into_inner);
        }
        started.elapsed()
    }
}

/// Pending file tasks plus the single-flight flag.
///
/// State machine: `Idle -> Running -> (Idle | Running(next))`. Every transition
/// happens under the mutex so two file tasks can never be in flight at once.
#[derive(Default)]
struct FileTaskQueue {
    pending: VecDeque<BoxedTask>,
    is_running: bool,
}

struct SchedulerShared {
    small: TaskPoolHandle,
    large: TaskPoolHandle,
    main_thread: MainThreadTaskPool,
    main_thread_id: ThreadId,
    game_logic: GameLogicBarrier,
    files: Mutex<FileTaskQueue>,
}

impl SchedulerShared {
    fn lock_files(&self) -> MutexGuard<'_, FileTaskQueue> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the game-logic count when the wrapped task finishes, panics, or is dropped unrun.
struct GameLogicCompletion {
    shared: Arc<SchedulerShared>,
}

impl Drop for GameLogicCompletion {
    fn drop(&mut self) {
        self.shared.game_logic.finish();
    }
}

/// Hands the file queue to the next pending task once the running one is done.
struct FileTaskCompletion {
    shared: Arc<SchedulerShared>,
}

impl Drop for FileTaskCompletion {
    fn drop(&mut self) {
        let next = {
            let mut files = self.shared.lock_files();
            let next = files.pending.pop_front();
            if next.is_none() {
                files.is_running = false;
                log::trace!("File queue idle");
            }
            next
        };

        if let Some(next) = next {
            log::trace!("Starting next queued file task");
            SchedulerHandle {
                shared: self.shared.clone(),
            }
            .start_file_task(next);
        }
    }
}

/// Shared state of one `schedule_tasks` fan-out.
struct FanIn {
    remaining: AtomicUsize,
    completion: Mutex<Option<BoxedTask>>,
    category: TaskCategory,
    scheduler: SchedulerHandle,
}

/// Held by each fanned-out task; the last one to drop schedules the completion task.
struct FanInMember {
    fan_in: Arc<FanIn>,
}

impl Drop for FanInMember {
    fn drop(&mut self) {
        if self.fan_in.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let completion = self
            .fan_in
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(completion) = completion {
            self.fan_in
                .scheduler
                .schedule_boxed(self.fan_in.category, completion);
        }
    }
}

/// A cloneable, thread-safe handle for routing tasks into the scheduler.
///
/// Tasks capture a handle to schedule follow-up work, such as a main-thread
/// continuation. A handle does not keep worker threads alive: work routed to a
/// pool that has already shut down is dropped with a warning.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl SchedulerHandle {
    /// Routes a task to the executor for `category`.
    ///
    /// - `Small`/`Large`: the matching worker pool
    /// - `MainThread`: the main-thread queue, run on the next frame drain
    /// - `GameLogic`: counted against the frame barrier, executed on the small pool
    /// - `File`: dispatched on the large pool if no file task is in flight,
    ///   otherwise queued behind the running one
    ///
    /// Never blocks beyond brief internal locks.
    pub fn schedule_task<T: Task>(&self, category: TaskCategory, task: T) {
        self.schedule_boxed(category, Box::new(task));
    }

    /// Like `schedule_task`, for an already boxed task.
    pub fn schedule_boxed(&self, category: TaskCategory, task: BoxedTask) {
        match category {
            TaskCategory::Small => self.shared.small.add_task(task),
            TaskCategory::Large => self.shared.large.add_task(task),
            TaskCategory::MainThread => self.shared.main_thread.add_task(task),
            TaskCategory::GameLogic => {
                self.shared.game_logic.begin();
                let completion = GameLogicCompletion {
                    shared: self.shared.clone(),
                };
                self.shared
                    .small
                    .add_task(Box::new(move |context: &TaskContext| {
                        let _completion = completion;
                        task.process(&TaskContext::new(
                            TaskCategory::GameLogic,
                            context.pool().cloned(),
                        ));
                    }));
            }
            TaskCategory::File => {
                let mut files = self.shared.lock_files();
                if files.is_running {
                    files.pending.push_back(task);
                    log::trace!("Queued file task behind {} others", files.pending.len() - 1);
                    return;
                }
                files.is_running = true;
                drop(files);

                self.start_file_task(task);
            }
        }
    }

    /// Schedules every task under `category`, then `completion` under the same
    /// category once all of them have finished.
    ///
    /// The completion task observes every side effect of the fanned-out tasks.
    /// A fanned-out task that panics still counts as finished. With no tasks,
    /// `completion` is scheduled immediately.
    pub fn schedule_tasks<C: Task>(
        &self,
        category: TaskCategory,
        tasks: Vec<BoxedTask>,
        completion: C,
    ) {
        if tasks.is_empty() {
            self.schedule_task(category, completion);
            return;
        }

        let fan_in = Arc::new(FanIn {
            remaining: AtomicUsize::new(tasks.len()),
            completion: Mutex::new(Some(Box::new(completion))),
            category,
            scheduler: self.clone(),
        });

        for task in tasks {
            let member = FanInMember {
                fan_in: fan_in.clone(),
            };
            self.schedule_task(category, move |context: &TaskContext| {
                let _member = member;
                task.process(context);
            });
        }
    }

    /// Whether the calling thread is the designated main thread.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.shared.main_thread_id
    }

    /// Number of game-logic tasks scheduled but not yet finished.
    pub fn outstanding_game_logic_tasks(&self) -> usize {
        self.shared.game_logic.outstanding()
    }

    /// Whether a file task is currently in flight.
    pub fn is_file_task_running(&self) -> bool {
        self.shared.lock_files().is_running
    }

    fn start_file_task(&self, task: BoxedTask) {
        let completion = FileTaskCompletion {
            shared: self.shared.clone(),
        };
        self.shared
            .large
            .add_task(Box::new(move |_: &TaskContext| {
                let _completion = completion;
                task.process(&TaskContext::new(TaskCategory::File, None));
            }));
    }
}

/// What one call to `execute_main_thread_tasks` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainThreadDrain {
    /// Number of main-thread tasks executed.
    pub executed: usize,
    /// Time spent blocked on outstanding game-logic tasks.
    pub barrier_wait: Duration,
}

/// Owns the worker pools and coordinates task execution.
///
/// The `TaskScheduler` is responsible for:
/// - Creating the small and large worker pools, sized from the device's core count
/// - Routing tasks by category (through its `SchedulerHandle`)
/// - The per-frame game-logic barrier and main-thread drain
/// - Tearing the pools down in order when dropped
///
/// # Implementation Notes
/// - Drop drains: queued pool work runs before the workers join
/// - Main-thread tasks still queued at drop are discarded
pub struct TaskScheduler {
    handle: SchedulerHandle,
    small_pool: Option<TaskPool>,
    large_pool: Option<TaskPool>,
    barrier_warn_threshold: Duration,
}

impl TaskScheduler {
    /// Creates the scheduler, treating the calling thread as the main thread.
    ///
    /// # Arguments
    /// * `config` - Pool sizing and naming
    /// * `device` - Supplies the CPU core count used to size the pools
    ///
    /// # Errors
    /// Returns `SchedulerError::SpawnWorker` if a worker thread cannot be started.
    pub fn new(config: &SchedulerConfig, device: &dyn Device) -> Result<Self, SchedulerError> {
        Self::with_main_thread(config, device, thread::current().id())
    }

    /// Creates the scheduler with an explicitly designated main thread.
    ///
    /// For platforms where the UI thread is not the thread initializing the engine.
    pub fn with_main_thread(
        config: &SchedulerConfig,
        device: &dyn Device,
        main_thread_id: ThreadId,
    ) -> Result<Self, SchedulerError> {
        let cpu_cores = device.number_of_cpu_cores();
        let threads_per_pool = config.threads_per_pool(cpu_cores);
        log::info!("Sizing task pools for {cpu_cores} cores: {threads_per_pool} threads each");

        let small_pool = TaskPool::new(
            TaskCategory::Small,
            threads_per_pool,
            &config.thread_name_prefix,
        )?;
        let large_pool = TaskPool::new(
            TaskCategory::Large,
            threads_per_pool,
            &config.thread_name_prefix,
        )?;

        let shared = Arc::new(SchedulerShared {
            small: small_pool.handle(),
            large: large_pool.handle(),
            main_thread: MainThreadTaskPool::new(),
            main_thread_id,
            game_logic: GameLogicBarrier::new(),
            files: Mutex::new(FileTaskQueue::default()),
        });

        Ok(Self {
            handle: SchedulerHandle { shared },
            small_pool: Some(small_pool),
            large_pool: Some(large_pool),
            barrier_warn_threshold: Duration::from_millis(config.barrier_warn_threshold_ms),
        })
    }

    /// Returns a handle tasks can capture to schedule more work.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// See `SchedulerHandle::schedule_task`.
    pub fn schedule_task<T: Task>(&self, category: TaskCategory, task: T) {
        self.handle.schedule_task(category, task);
    }

    /// See `SchedulerHandle::schedule_tasks`.
    pub fn schedule_tasks<C: Task>(
        &self,
        category: TaskCategory,
        tasks: Vec<BoxedTask>,
        completion: C,
    ) {
        self.handle.schedule_tasks(category, tasks, completion);
    }

    /// Whether the calling thread is the designated main thread.
    pub fn is_main_thread(&self) -> bool {
        self.handle.is_main_thread()
    }

    /// Worker count of the small and large pools.
    pub fn threads_per_pool(&self) -> usize {
        self.small_pool.as_ref().map_or(0, TaskPool::num_threads)
    }

    /// Waits for all outstanding game-logic tasks, then drains the main-thread queue.
    ///
    /// Must be called once per frame from the main thread. The wait is a
    /// condition-variable wait, not a spin. Only main-thread tasks queued before
    /// the drain starts are run; later ones wait for the next frame.
    ///
    /// # Panics
    /// Panics if called from any thread other than the main thread.
    pub fn execute_main_thread_tasks(&self) -> MainThreadDrain {
        assert!(
            self.is_main_thread(),
            "execute_main_thread_tasks must be called from the main thread"
        );

        let barrier_wait = self.handle.shared.game_logic.wait();
        if barrier_wait > self.barrier_warn_threshold {
            log::debug!("Main thread waited {barrier_wait:?} on game logic tasks");
        }

        let executed = self.handle.shared.main_thread.perform_tasks();
        MainThreadDrain {
            executed,
            barrier_wait,
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        drop(self.small_pool.take());
        drop(self.large_pool.take());

        let discarded = self.handle.shared.main_thread.discard_tasks();
        if discarded > 0 {
            log::debug!("Discarded {discarded} main thread tasks on shutdown");
        }
    }
}
