//! Error type.

use thiserror::Error;

use crate::mount::Direction;
use crate::task::{TaskId, TaskState};
use crate::worker::WorkerId;

/// Errors returned by task and manager operations.
///
/// Attempt-level failures of a task (exhausted resources, lost workers, etc) are not errors, they are recorded as
/// [`TaskResult`](crate::task::TaskResult) values. Errors are reserved for structural problems that are rejected
/// synchronously and for misuse of the lifecycle by the caller.
#[derive(Debug, Error)]
pub enum VineError {
    #[error("task {task_id}: remote name {remote_name:?} is used by more than one {direction} mount")]
    DuplicateRemoteName {
        task_id: TaskId,
        remote_name: String,
        direction: Direction,
    },
    #[error("task {task_id}: remote name {remote_name:?} is declared both as input and as output")]
    InputOutputCollision { task_id: TaskId, remote_name: String },
    #[error("task {task_id}: input {remote_name:?} has a fixed location but the task is not marked as such")]
    FixedLocationUnflagged { task_id: TaskId, remote_name: String },
    #[error("task {task_id}: {reason}")]
    InvalidLibraryFields { task_id: TaskId, reason: &'static str },
    #[error("invalid mount flag {0:?}")]
    InvalidMountFlag(String),
    #[error("invalid function execution mode {0:?}")]
    InvalidExecMode(String),
    #[error("task {task_id}: can't move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },
    #[error("task {0} has no attempt in progress")]
    NoAttempt(TaskId),
    #[error("task {0} can't be finished without a result")]
    MissingResult(TaskId),
    #[error("task {0} is still active")]
    TaskActive(TaskId),
    #[error("task {0} is already dispatched to a worker")]
    Dispatched(TaskId),
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),
    #[error("unknown library {0:?}")]
    UnknownLibrary(String),
    #[error("no free slot for function task {0}")]
    NoFreeSlot(TaskId),
    #[error("task {0} is not a function task")]
    NotAFunction(TaskId),
    #[error("function task {task_id} must run on worker {expected} hosting its library, got {actual}")]
    FunctionWorkerMismatch {
        task_id: TaskId,
        expected: WorkerId,
        actual: WorkerId,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("can't parse config: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("can't render task as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VineError>;
