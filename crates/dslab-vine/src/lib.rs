//! Manager-side task model of a TaskVine-like workflow system.
//!
//! The crate keeps track of tasks submitted to a manager that runs them at remote workers: their lifecycle, retry and
//! forsaken accounting, resource summaries, libraries with function slots, mount consistency and locality grouping of
//! tasks linked by temporary files. Choosing workers and moving data are left to the caller, which reports events to
//! the [`Manager`](manager::Manager).
//!
//! ## Example
//!
//! ```
//! use dslab_vine::manager::{AttemptReport, Manager};
//! use dslab_vine::config::ManagerConfig;
//! use dslab_vine::resources::ResourceSummary;
//! use dslab_vine::task::{Task, TaskResult};
//! use dslab_vine::worker::WorkerInfo;
//!
//! let mut manager = Manager::new(ManagerConfig::default());
//! let worker = manager.add_worker(WorkerInfo::new("node-1", "10.0.0.1:9123", ResourceSummary::new().with_cores(4.)));
//! let id = manager.submit(Task::new("echo hello"), 0).unwrap();
//! manager.dispatch(id, worker, &ResourceSummary::new().with_cores(1.), 10).unwrap();
//! manager.started(id, 20).unwrap();
//! manager.attempt_result(id, AttemptReport::new(TaskResult::Success).with_output("hello\n"), 30).unwrap();
//! manager.retrieved(id, 40).unwrap();
//! assert_eq!(manager.wait(50).unwrap(), Some(id));
//! assert_eq!(manager.task(id).unwrap().output(), Some("hello\n"));
//! ```

pub mod config;
mod consistency;
pub mod error;
pub mod library;
pub mod lifecycle;
pub mod locality;
pub mod manager;
pub mod metrics;
pub mod mount;
pub mod registry;
pub mod resources;
pub mod snapshot;
pub mod task;
pub mod worker;
