mod common;

use dslab_vine::config::ManagerConfig;
use dslab_vine::error::VineError;
use dslab_vine::lifecycle::ResultDisposition;
use dslab_vine::manager::{AttemptReport, Manager};
use dslab_vine::metrics::TaskMetrics;
use dslab_vine::resources::ResourceSummary;
use dslab_vine::task::{Task, TaskId, TaskResult, TaskState};

use common::{complete, manager_with_workers, one_core, run};

#[test]
fn test_exhaustion_then_success() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let mut task = Task::new("./simulate");
    task.set_max_retries(2);
    let id = manager.submit(task, 0).unwrap();

    for attempt in 1..=2 {
        let now = 100 * attempt;
        run(&mut manager, id, workers[0], now);
        let disposition = manager
            .attempt_result(id, AttemptReport::new(TaskResult::ResourceExhaustion), now + 50)
            .unwrap();
        assert_eq!(disposition, ResultDisposition::Retry);
        let task = manager.task(id).unwrap();
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.worker(), None);
        assert_eq!(task.result(), TaskResult::Unknown);
    }

    run(&mut manager, id, workers[0], 300);
    complete(&mut manager, id, 350);
    assert_eq!(manager.wait(400).unwrap(), Some(id));
    assert_eq!(manager.wait(400).unwrap(), None);

    let task = manager.task(id).unwrap();
    assert_eq!(task.state(), TaskState::Done);
    assert_eq!(task.result(), TaskResult::Success);
    assert_eq!(task.try_count(), 3);
    assert_eq!(task.exhausted_attempts(), 2);
    assert_eq!(task.metrics().time_workers_execute_exhaustion, 98);
    assert_eq!(task.metrics().time_workers_execute_last, 49);
    assert_eq!(task.metrics().time_workers_execute_all, 147);
    assert_eq!(task.metrics().time_when_done, 400);
}

#[test]
fn test_exhaustion_budget_keeps_cause() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let mut task = Task::new("./simulate");
    task.set_max_retries(1);
    let id = manager.submit(task, 0).unwrap();

    run(&mut manager, id, workers[0], 10);
    let report = AttemptReport::new(TaskResult::ResourceExhaustion);
    assert_eq!(manager.attempt_result(id, report.clone(), 20).unwrap(), ResultDisposition::Retry);
    run(&mut manager, id, workers[0], 30);
    assert_eq!(manager.attempt_result(id, report, 40).unwrap(), ResultDisposition::Finalize);
    assert_eq!(manager.task(id).unwrap().state(), TaskState::WaitingRetrieval);
    manager.retrieved(id, 50).unwrap();
    assert_eq!(manager.wait(60).unwrap(), Some(id));

    let task = manager.task(id).unwrap();
    assert_eq!(task.result(), TaskResult::ResourceExhaustion);
    assert_eq!(task.try_count(), 2);
}

#[test]
fn test_final_cause_survives_lost_worker() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let mut task = Task::new("./simulate");
    task.set_max_retries(1);
    let id = manager.submit(task, 0).unwrap();

    let report = AttemptReport::new(TaskResult::ResourceExhaustion);
    run(&mut manager, id, workers[0], 10);
    manager.attempt_result(id, report.clone(), 20).unwrap();
    run(&mut manager, id, workers[0], 30);
    assert_eq!(manager.attempt_result(id, report, 40).unwrap(), ResultDisposition::Finalize);
    let exhaustion_time = manager.task(id).unwrap().metrics().time_workers_execute_exhaustion;

    assert_eq!(manager.worker_disconnected(workers[0], 50).unwrap(), vec![id]);
    assert_eq!(manager.wait(60).unwrap(), Some(id));
    let task = manager.task(id).unwrap();
    assert_eq!(task.state(), TaskState::Done);
    assert_eq!(task.result(), TaskResult::ResourceExhaustion);
    assert_eq!(task.try_count(), 2);
    assert_eq!(task.exhausted_attempts(), 2);
    assert_eq!(task.metrics().time_workers_execute_exhaustion, exhaustion_time);
    assert_eq!(task.metrics().time_workers_execute_failure, 0);
}

#[test]
fn test_forsaken_twice() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 2);
    let mut task = Task::new("./simulate");
    task.set_max_forsaken(1);
    let id = manager.submit(task, 0).unwrap();

    manager.dispatch(id, workers[0], &one_core(), 10).unwrap();
    assert_eq!(manager.forsaken(id, 20).unwrap(), ResultDisposition::Retry);
    {
        let task = manager.task(id).unwrap();
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.worker(), None);
        assert_eq!(task.forsaken_count(), 1);
    }
    assert_eq!(manager.next_ready(), Some(id));

    manager.dispatch(id, workers[1], &one_core(), 30).unwrap();
    let disposition = manager
        .attempt_result(id, AttemptReport::new(TaskResult::Forsaken), 40)
        .unwrap();
    assert_eq!(disposition, ResultDisposition::Finalize);
    assert_eq!(manager.next_ready(), None);
    assert_eq!(manager.wait(50).unwrap(), Some(id));

    let task = manager.task(id).unwrap();
    assert_eq!(task.result(), TaskResult::Forsaken);
    assert_eq!(task.forsaken_count(), 2);
    assert_eq!(task.forsaken_attempts(), 2);
    assert_eq!(task.try_count(), 0);
    assert_eq!(task.metrics().time_workers_execute_last_start, 0);
    assert!(manager.tasks_on_worker(workers[1]).is_empty());
}

#[test]
fn test_forsaken_after_start_is_rejected() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let id = manager.submit(Task::new("./simulate"), 0).unwrap();
    assert!(matches!(manager.forsaken(id, 5), Err(VineError::NoAttempt(_))));
    run(&mut manager, id, workers[0], 10);
    assert!(matches!(
        manager.forsaken(id, 20),
        Err(VineError::InvalidTransition {
            from: TaskState::Running,
            ..
        })
    ));
    assert_eq!(manager.task(id).unwrap().forsaken_count(), 0);
}

#[test]
fn test_one_outcome_per_attempt() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let id = manager.submit(Task::new("./simulate"), 0).unwrap();
    run(&mut manager, id, workers[0], 10);
    manager
        .attempt_result(id, AttemptReport::new(TaskResult::Success), 20)
        .unwrap();
    assert!(manager
        .attempt_result(id, AttemptReport::new(TaskResult::Signal), 30)
        .is_err());
    assert_eq!(manager.task(id).unwrap().result(), TaskResult::Success);
}

#[test]
fn test_lost_worker_retries() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 3);
    let mut task = Task::new("./simulate");
    task.set_max_retries(1);
    let id = manager.submit(task, 0).unwrap();

    run(&mut manager, id, workers[0], 10);
    assert_eq!(manager.worker_disconnected(workers[0], 30).unwrap(), vec![id]);
    {
        let task = manager.task(id).unwrap();
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.try_count(), 1);
        assert_eq!(task.metrics().time_workers_execute_failure, 19);
        assert_eq!(task.hostname(), None);
    }
    assert!(matches!(
        manager.dispatch(id, workers[0], &one_core(), 40),
        Err(VineError::UnknownWorker(_))
    ));

    run(&mut manager, id, workers[1], 40);
    assert_eq!(manager.task(id).unwrap().hostname(), Some("node-1"));
    manager.worker_disconnected(workers[1], 60).unwrap();
    assert_eq!(manager.wait(70).unwrap(), Some(id));
    let task = manager.task(id).unwrap();
    assert_eq!(task.result(), TaskResult::MaxRetries);
    assert_eq!(task.try_count(), 2);
    assert_eq!(task.state(), TaskState::Done);
}

#[test]
fn test_lost_outputs_are_retried() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 2);
    let id = manager.submit(Task::new("./simulate"), 0).unwrap();
    run(&mut manager, id, workers[0], 10);
    manager
        .attempt_result(id, AttemptReport::new(TaskResult::Success).with_output("partial"), 20)
        .unwrap();
    manager.worker_disconnected(workers[0], 30).unwrap();
    {
        let task = manager.task(id).unwrap();
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.output(), None);
    }
    run(&mut manager, id, workers[1], 40);
    complete(&mut manager, id, 50);
    assert_eq!(manager.wait(60).unwrap(), Some(id));
    assert_eq!(manager.task(id).unwrap().try_count(), 2);
}

#[test]
fn test_slow_task() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let mut task = Task::new("./simulate");
    task.set_max_retries(2).set_min_running_time(60);
    let id = manager.submit(task, 0).unwrap();

    assert!(manager.terminate_slow(id, 5).is_err());
    run(&mut manager, id, workers[0], 10);
    assert_eq!(manager.terminate_slow(id, 100).unwrap(), ResultDisposition::Retry);
    run(&mut manager, id, workers[0], 110);
    assert_eq!(manager.terminate_slow(id, 200).unwrap(), ResultDisposition::Retry);
    run(&mut manager, id, workers[0], 210);
    assert_eq!(manager.terminate_slow(id, 300).unwrap(), ResultDisposition::Finalize);
    assert_eq!(manager.wait(310).unwrap(), Some(id));

    let task = manager.task(id).unwrap();
    assert_eq!(task.workers_slow(), 3);
    assert_eq!(task.try_count(), 3);
    assert_eq!(task.result(), TaskResult::MaxRetries);
    assert_eq!(task.metrics().time_workers_execute_slow, 3 * 89);
    assert_eq!(task.metrics().time_workers_execute_failure, 3 * 89);
}

#[test]
fn test_nonzero_exit_is_final() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let id = manager.submit(Task::new("false"), 0).unwrap();
    run(&mut manager, id, workers[0], 10);
    let report = AttemptReport::new(TaskResult::Success)
        .with_exit_code(1)
        .with_output("error: bad input\n");
    assert_eq!(manager.attempt_result(id, report, 20).unwrap(), ResultDisposition::Finalize);
    manager.retrieved(id, 30).unwrap();
    assert_eq!(manager.wait(40).unwrap(), Some(id));

    let task = manager.task(id).unwrap();
    assert_eq!(task.result(), TaskResult::Success);
    assert_eq!(task.exit_code(), 1);
    assert_eq!(task.output(), Some("error: bad input\n"));
    assert_eq!(task.try_count(), 1);
}

#[test]
fn test_cancel_is_idempotent() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let running = manager.submit(Task::new("sleep 100"), 0).unwrap();
    let ready = manager.submit(Task::new("sleep 200"), 0).unwrap();
    run(&mut manager, running, workers[0], 10);

    assert!(manager.cancel(running, 20).unwrap());
    assert!(!manager.cancel(running, 21).unwrap());
    assert!(manager.cancel(ready, 22).unwrap());
    assert_eq!(manager.next_ready(), None);
    assert!(manager.tasks_on_worker(workers[0]).is_empty());

    assert_eq!(manager.wait(30).unwrap(), Some(running));
    assert_eq!(manager.wait(30).unwrap(), Some(ready));
    assert_eq!(manager.wait(30).unwrap(), None);
    assert!(!manager.cancel(running, 40).unwrap());

    let task = manager.task(running).unwrap();
    assert_eq!(task.result(), TaskResult::Cancelled);
    assert_eq!(task.state(), TaskState::Done);
    assert_eq!(task.current_resource_box(), None);
}

fn snapshot_without_id(manager: &Manager, id: TaskId) -> serde_json::Value {
    let mut value = serde_json::to_value(manager.snapshot(id).unwrap()).unwrap();
    value.as_object_mut().unwrap().remove("id");
    value
}

fn counted_task() -> Task {
    let mut task = Task::new("wc -l input");
    task.set_category("count")
        .set_tag("first")
        .set_max_retries(3)
        .set_max_forsaken(2);
    task
}

#[test]
fn test_hard_reset_and_resubmit() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let id = manager.submit(counted_task(), 0).unwrap();
    assert!(matches!(manager.hard_reset(id), Err(VineError::InvalidTransition { .. })));
    assert!(matches!(manager.remove(id), Err(VineError::TaskActive(_))));

    // one attempt of every failure kind before the success
    manager.dispatch(id, workers[0], &one_core(), 10).unwrap();
    manager.forsaken(id, 15).unwrap();
    run(&mut manager, id, workers[0], 20);
    manager.record_transfer(id, 10, 20).unwrap();
    manager
        .set_measured(id, ResourceSummary::new().with_cores(4.), Some(50.))
        .unwrap();
    manager
        .attempt_result(id, AttemptReport::new(TaskResult::ResourceExhaustion), 30)
        .unwrap();
    run(&mut manager, id, workers[0], 40);
    manager.terminate_slow(id, 60).unwrap();
    run(&mut manager, id, workers[0], 70);
    complete(&mut manager, id, 80);
    assert_eq!(manager.wait(90).unwrap(), Some(id));
    {
        let task = manager.task(id).unwrap();
        assert_eq!(task.try_count(), 3);
        assert_eq!(task.forsaken_count(), 1);
        assert_eq!(task.exhausted_attempts(), 1);
        assert_eq!(task.workers_slow(), 1);
        assert_eq!(task.sandbox_measured(), Some(50.));
        assert!(task.resources_measured().is_some());
    }

    let new_id = manager.resubmit(id, 100).unwrap();
    assert_ne!(new_id, id);
    assert!(matches!(manager.task(id), Err(VineError::UnknownTask(_))));
    let fresh = manager.submit(counted_task(), 100).unwrap();
    assert_eq!(snapshot_without_id(&manager, new_id), snapshot_without_id(&manager, fresh));

    let task = manager.task(new_id).unwrap();
    assert_eq!(task.state(), TaskState::Ready);
    assert_eq!(task.try_count(), 0);
    assert_eq!(task.forsaken_count(), 0);
    assert_eq!(task.forsaken_attempts(), 0);
    assert_eq!(task.exhausted_attempts(), 0);
    assert_eq!(task.workers_slow(), 0);
    assert_eq!(task.result(), TaskResult::Unknown);
    assert_eq!(task.resources_allocated(), None);
    assert_eq!(task.resources_measured(), None);
    assert_eq!(task.sandbox_measured(), None);
    assert_eq!(
        task.metrics(),
        &TaskMetrics {
            time_when_submitted: 100,
            ..Default::default()
        }
    );
    assert_eq!(task.command_line(), "wc -l input");
    assert_eq!(task.category(), "count");
    assert_eq!(task.tag(), Some("first"));
}
