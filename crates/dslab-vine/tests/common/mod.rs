#![allow(dead_code)]

use dslab_vine::config::ManagerConfig;
use dslab_vine::manager::{AttemptReport, Manager};
use dslab_vine::resources::ResourceSummary;
use dslab_vine::task::{TaskId, TaskResult};
use dslab_vine::worker::{WorkerId, WorkerInfo};

pub fn init_logger() {
    let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
}

pub fn manager_with_workers(config: ManagerConfig, count: usize) -> (Manager, Vec<WorkerId>) {
    init_logger();
    let mut manager = Manager::new(config);
    let workers = (0..count)
        .map(|i| {
            manager.add_worker(WorkerInfo::new(
                &format!("node-{}", i),
                &format!("10.0.0.{}:9123", i + 1),
                ResourceSummary::new().with_cores(8.).with_memory(16384.),
            ))
        })
        .collect();
    (manager, workers)
}

pub fn one_core() -> ResourceSummary {
    ResourceSummary::new().with_cores(1.)
}

/// Dispatches the task and confirms its start.
pub fn run(manager: &mut Manager, id: TaskId, worker: WorkerId, now: u64) {
    manager.dispatch(id, worker, &one_core(), now).unwrap();
    manager.started(id, now + 1).unwrap();
}

/// Reports a successful attempt, retrieves the outputs and waits for the task.
pub fn complete(manager: &mut Manager, id: TaskId, now: u64) {
    manager
        .attempt_result(id, AttemptReport::new(TaskResult::Success), now)
        .unwrap();
    manager.retrieved(id, now + 1).unwrap();
}
