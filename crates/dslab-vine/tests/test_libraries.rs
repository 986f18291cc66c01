mod common;

use dslab_vine::config::ManagerConfig;
use dslab_vine::error::VineError;
use dslab_vine::lifecycle::ResultDisposition;
use dslab_vine::manager::{AttemptReport, Manager};
use dslab_vine::resources::ResourceSummary;
use dslab_vine::task::{FuncExecMode, Task, TaskId, TaskResult, TaskState, TaskType};
use dslab_vine::worker::WorkerId;

use common::{manager_with_workers, one_core, run};

fn install(manager: &mut Manager, slots: i32) -> TaskId {
    let mut template = Task::new_library("numpy-lib", "python3 library.py");
    template
        .set_function_slots(slots)
        .set_exec_mode(FuncExecMode::Direct)
        .request_resources(ResourceSummary::new().with_cores(2.));
    manager.submit(template, 0).unwrap()
}

fn start_instance(manager: &mut Manager, worker: WorkerId, now: u64) -> TaskId {
    let instance = manager.instantiate_library("numpy-lib", now).unwrap().unwrap();
    manager
        .dispatch(instance, worker, &ResourceSummary::new().with_cores(2.), now)
        .unwrap();
    manager.started(instance, now + 1).unwrap();
    instance
}

fn submit_call(manager: &mut Manager, arg: u32) -> TaskId {
    manager
        .submit(Task::new_function_call("numpy-lib", &format!("multiply({})", arg)), 0)
        .unwrap()
}

fn slots(manager: &Manager, instance: TaskId) -> (u32, u32) {
    let instance = manager.task(instance).unwrap();
    (instance.function_slots_inuse(), instance.function_slots_total())
}

#[test]
fn test_instance_from_template() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let template = install(&mut manager, -1);
    assert_eq!(manager.task(template).unwrap().state(), TaskState::Initial);
    assert_eq!(manager.next_ready(), None);

    let instance = start_instance(&mut manager, workers[0], 10);
    let task = manager.task(instance).unwrap();
    assert_eq!(task.task_type(), TaskType::LibraryInstance);
    assert_eq!(task.provides_library(), Some("numpy-lib"));
    assert_eq!(task.function_slots_total(), 2);
    assert_eq!(task.exec_mode(), FuncExecMode::Direct);
    assert_eq!(task.state(), TaskState::Running);
    assert!(task
        .library_log_path()
        .unwrap()
        .ends_with(format!("library-numpy-lib-{}.log", instance)));
    drop(task);
    assert_eq!(manager.libraries().instances("numpy-lib"), vec![instance]);
    assert!(matches!(
        manager.instantiate_library("pandas-lib", 20),
        Err(VineError::UnknownLibrary(_))
    ));
}

#[test]
fn test_slot_released_once_on_every_path() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    install(&mut manager, 2);
    let instance = start_instance(&mut manager, workers[0], 10);

    let f1 = submit_call(&mut manager, 1);
    let f2 = submit_call(&mut manager, 2);
    let f3 = submit_call(&mut manager, 3);
    assert_eq!(manager.dispatch_function(f1, 20).unwrap(), Some(workers[0]));
    assert_eq!(manager.dispatch_function(f2, 20).unwrap(), Some(workers[0]));
    assert_eq!(manager.dispatch_function(f3, 20).unwrap(), None);
    assert_eq!(slots(&manager, instance), (2, 2));
    assert_eq!(manager.libraries().waiting("numpy-lib"), vec![f3]);
    assert_eq!(manager.effective_exec_mode(f1).unwrap(), FuncExecMode::Direct);
    manager.started(f1, 21).unwrap();
    manager.started(f2, 21).unwrap();

    // success path
    manager
        .attempt_result(f1, AttemptReport::new(TaskResult::Success).with_output("2"), 30)
        .unwrap();
    assert_eq!(slots(&manager, instance), (1, 2));
    assert_eq!(manager.task(f1).unwrap().library_task(), None);

    // failure path
    let disposition = manager
        .attempt_result(f2, AttemptReport::new(TaskResult::ResourceExhaustion), 31)
        .unwrap();
    assert_eq!(disposition, ResultDisposition::Retry);
    assert_eq!(slots(&manager, instance), (0, 2));

    // f3 arrived first and gets the next slot
    assert_eq!(manager.next_waiting_function("numpy-lib"), Some(f3));
    assert_eq!(manager.dispatch_function(f2, 40).unwrap(), None);
    assert_eq!(manager.libraries().waiting("numpy-lib"), vec![f3, f2]);
    assert_eq!(manager.dispatch_function(f3, 41).unwrap(), Some(workers[0]));
    assert_eq!(manager.dispatch_function(f2, 42).unwrap(), Some(workers[0]));
    assert_eq!(slots(&manager, instance), (2, 2));

    // forsaken and cancel paths
    manager.forsaken(f2, 50).unwrap();
    assert_eq!(slots(&manager, instance), (1, 2));
    assert!(manager.cancel(f3, 51).unwrap());
    assert_eq!(slots(&manager, instance), (0, 2));
    assert!(!manager.cancel(f3, 52).unwrap());
    assert_eq!(slots(&manager, instance), (0, 2));

    manager.retrieved(f1, 60).unwrap();
    assert_eq!(manager.wait(70).unwrap(), Some(f3));
    assert_eq!(manager.wait(70).unwrap(), Some(f1));
    assert_eq!(manager.task(f1).unwrap().output(), Some("2"));
}

#[test]
fn test_function_bound_to_library_worker() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 2);
    install(&mut manager, 1);
    let f = submit_call(&mut manager, 1);
    assert!(matches!(
        manager.dispatch(f, workers[0], &one_core(), 5),
        Err(VineError::NoFreeSlot(_))
    ));

    start_instance(&mut manager, workers[0], 10);
    assert!(matches!(
        manager.dispatch(f, workers[1], &one_core(), 20),
        Err(VineError::FunctionWorkerMismatch { expected, actual, .. })
            if expected == workers[0] && actual == workers[1]
    ));
    manager.dispatch(f, workers[0], &one_core(), 21).unwrap();
    assert_eq!(manager.task(f).unwrap().worker(), Some(workers[0]));
    assert!(matches!(
        manager.dispatch_function(manager.task_ids()[0], 22),
        Err(VineError::NotAFunction(_))
    ));
}

#[test]
fn test_library_worker_lost() {
    let mut config = ManagerConfig::default();
    config.max_library_failures = 1;
    let (mut manager, workers) = manager_with_workers(config, 2);
    let template = install(&mut manager, 2);
    let instance = start_instance(&mut manager, workers[0], 10);
    let running = submit_call(&mut manager, 1);
    let dispatched = submit_call(&mut manager, 2);
    manager.dispatch_function(running, 20).unwrap();
    manager.started(running, 21).unwrap();
    manager.dispatch_function(dispatched, 22).unwrap();

    let lost = manager.worker_disconnected(workers[0], 30).unwrap();
    assert_eq!(lost, vec![instance, running, dispatched]);

    let task = manager.task(running).unwrap();
    assert_eq!(task.state(), TaskState::Ready);
    assert_eq!(task.try_count(), 1);
    assert_eq!(task.library_task(), None);
    drop(task);
    let task = manager.task(dispatched).unwrap();
    assert_eq!(task.state(), TaskState::Ready);
    assert_eq!(task.forsaken_count(), 1);
    drop(task);
    assert_eq!(manager.task(instance).unwrap().result(), TaskResult::LibraryExit);
    assert_eq!(manager.task(template).unwrap().library_failed_count(), 1);
    assert!(manager.libraries().instances("numpy-lib").is_empty());

    // instances are finished silently
    assert_eq!(manager.wait(40).unwrap(), None);
    assert_eq!(manager.task(instance).unwrap().state(), TaskState::Done);

    assert!(!manager.library_viable("numpy-lib").unwrap());
    assert_eq!(manager.instantiate_library("numpy-lib", 50).unwrap(), None);
    assert_eq!(manager.dispatch_function(running, 60).unwrap(), None);
    assert_eq!(manager.effective_exec_mode(running).unwrap(), FuncExecMode::Direct);
}

#[test]
fn test_library_cancel_is_not_a_failure() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let template = install(&mut manager, 1);
    let instance = start_instance(&mut manager, workers[0], 10);
    let f = submit_call(&mut manager, 1);
    manager.dispatch_function(f, 20).unwrap();
    manager.started(f, 21).unwrap();

    assert!(manager.cancel(instance, 30).unwrap());
    assert_eq!(manager.task(f).unwrap().state(), TaskState::Ready);
    assert_eq!(manager.task(instance).unwrap().result(), TaskResult::Cancelled);
    assert_eq!(manager.task(template).unwrap().library_failed_count(), 0);
    assert!(manager.library_viable("numpy-lib").unwrap());
}

#[test]
fn test_library_exit_reported_by_worker() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    let template = install(&mut manager, 1);
    let instance = start_instance(&mut manager, workers[0], 10);
    let f = submit_call(&mut manager, 1);
    manager.dispatch_function(f, 20).unwrap();

    let disposition = manager
        .attempt_result(instance, AttemptReport::new(TaskResult::ResourceExhaustion), 30)
        .unwrap();
    assert_eq!(disposition, ResultDisposition::Finalize);
    assert_eq!(manager.task(instance).unwrap().result(), TaskResult::LibraryExit);
    assert_eq!(manager.task(instance).unwrap().state(), TaskState::WaitingRetrieval);
    assert_eq!(manager.task(f).unwrap().forsaken_count(), 1);
    assert_eq!(manager.task(template).unwrap().library_failed_count(), 1);

    manager.retrieved(instance, 40).unwrap();
    assert_eq!(manager.wait(50).unwrap(), None);
}

#[test]
fn test_exited_instance_counted_once() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 2);
    let template = install(&mut manager, 1);
    let failed = start_instance(&mut manager, workers[0], 10);
    let clean = start_instance(&mut manager, workers[1], 10);

    manager
        .attempt_result(failed, AttemptReport::new(TaskResult::ResourceExhaustion), 20)
        .unwrap();
    manager
        .attempt_result(clean, AttemptReport::new(TaskResult::Success), 20)
        .unwrap();
    assert_eq!(manager.task(template).unwrap().library_failed_count(), 1);

    manager.worker_disconnected(workers[0], 30).unwrap();
    manager.worker_disconnected(workers[1], 30).unwrap();
    assert_eq!(manager.task(template).unwrap().library_failed_count(), 1);
    assert_eq!(manager.task(failed).unwrap().result(), TaskResult::LibraryExit);
    assert_eq!(manager.task(clean).unwrap().result(), TaskResult::Success);

    assert_eq!(manager.wait(40).unwrap(), None);
    assert_eq!(manager.task(failed).unwrap().state(), TaskState::Done);
    assert_eq!(manager.task(clean).unwrap().state(), TaskState::Done);
}

#[test]
fn test_finished_function_not_redispatched() {
    let (mut manager, workers) = manager_with_workers(ManagerConfig::default(), 1);
    install(&mut manager, 1);
    let instance = start_instance(&mut manager, workers[0], 10);

    let done = submit_call(&mut manager, 1);
    manager.dispatch_function(done, 20).unwrap();
    manager.started(done, 21).unwrap();
    manager
        .attempt_result(done, AttemptReport::new(TaskResult::Success), 30)
        .unwrap();
    manager.retrieved(done, 31).unwrap();
    assert_eq!(manager.wait(40).unwrap(), Some(done));
    let cancelled = submit_call(&mut manager, 2);
    assert!(manager.cancel(cancelled, 41).unwrap());

    for id in [done, cancelled] {
        assert!(matches!(
            manager.dispatch(id, workers[0], &one_core(), 50),
            Err(VineError::InvalidTransition { .. })
        ));
        assert!(manager.dispatch_function(id, 51).is_err());
        assert_eq!(manager.task(id).unwrap().library_task(), None);
    }
    assert_eq!(slots(&manager, instance), (0, 1));

    let next = submit_call(&mut manager, 3);
    assert_eq!(manager.dispatch_function(next, 60).unwrap(), Some(workers[0]));
    assert_eq!(slots(&manager, instance), (1, 1));
}
