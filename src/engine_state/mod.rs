//! # Engine State Module
//!
//! The runtime core shared by every frame of the application.
//!
//! ## Key Components
//!
//! * `EngineState` - Owns the engine subsystems and is passed explicitly to
//!   whatever needs them, rather than being reached through a global
//! * `task_management` - Task scheduling across worker pools, the main thread
//!   and the single-flight file queue
//! * `transform_state` - The transform hierarchy with lazily cached world matrices
//!
//! ## Frame Contract
//!
//! Each frame the application schedules game-logic work, then calls
//! `EngineState::process_frame()` on the main thread. That waits for every
//! outstanding game-logic task and drains the main-thread queue, after which
//! the main thread may safely mutate the transform hierarchy.

pub mod task_management;
pub mod transform_state;

use crate::application_state::{
    config::EngineConfig,
    device::{Device, FixedDevice, SystemDevice},
};
use task_management::{error::SchedulerError, MainThreadDrain, TaskScheduler};
use transform_state::TransformTree;

/// The engine context: the task scheduler and the transform hierarchy.
///
/// Created once on the main thread. The scheduler's handle is `Send` and may
/// be captured by tasks; the transform tree stays on the main thread.
pub struct EngineState {
    /// Task scheduler, the main thread being the thread that created the engine
    pub scheduler: TaskScheduler,
    /// Every transform in the scene
    pub transforms: TransformTree,
}

impl EngineState {
    /// Creates the engine on the calling thread, which becomes the main thread.
    ///
    /// The task pools are sized from `config.cpu_cores` when set, otherwise
    /// from the cores the system reports.
    ///
    /// # Errors
    /// Fails if a worker thread cannot be spawned.
    pub fn new(config: &EngineConfig) -> Result<Self, SchedulerError> {
        let device: Box<dyn Device> = match config.cpu_cores {
            Some(cores) => {
                log::info!("Using configured core count: {cores}");
                Box::new(FixedDevice::new(cores))
            }
            None => Box::new(SystemDevice),
        };

        Ok(Self {
            scheduler: TaskScheduler::new(&config.scheduler, device.as_ref())?,
            transforms: TransformTree::new(),
        })
    }

    /// Runs the per-frame synchronization point: waits for game logic, then
    /// executes the queued main-thread tasks.
    ///
    /// # Panics
    /// Panics if called from a thread other than the one that created the engine.
    pub fn process_frame(&mut self) -> MainThreadDrain {
        self.scheduler.execute_main_thread_tasks()
    }
}
