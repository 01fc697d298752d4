use thiserror::Error;

use super::task::TaskCategory;

/// Errors raised while bringing the task system up.
///
/// Task bodies have no error channel: a failing task is its author's concern,
/// and a panicking one is caught and logged by the pool running it.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker {index} of the {category} task pool")]
    SpawnWorker {
        /// The pool being created.
        category: TaskCategory,
        /// Index of the worker that failed to start.
        index: usize,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
