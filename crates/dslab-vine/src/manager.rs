//! Manager-side task registry and event handling.
//!
//! The manager owns all submitted tasks and advances them in response to events reported by the transport and
//! placement layers: dispatch decisions, worker confirmations, attempt results, transfers and disconnections. It
//! never chooses workers itself.

use std::cell::Ref;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::{Result, VineError};
use crate::library::Libraries;
use crate::lifecycle::ResultDisposition;
use crate::locality::LocalityGroups;
use crate::metrics::Timestamp;
use crate::registry::TaskRegistry;
use crate::resources::ResourceSummary;
use crate::snapshot::TaskSnapshot;
use crate::task::{FuncExecMode, Task, TaskId, TaskResult, TaskState, TaskType};
use crate::worker::{WorkerId, WorkerInfo};

/// What a worker reported at the end of an attempt.
#[derive(Clone, Debug, Default)]
pub struct AttemptReport {
    pub result: TaskResult,
    pub exit_code: i32,
    pub output: Option<String>,
    pub measured: Option<ResourceSummary>,
    /// Peak disk usage of the sandbox.
    pub sandbox_measured: Option<f64>,
}

impl AttemptReport {
    pub fn new(result: TaskResult) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }

    pub fn with_measured(mut self, measured: ResourceSummary, sandbox: Option<f64>) -> Self {
        self.measured = Some(measured);
        self.sandbox_measured = sandbox;
        self
    }
}

struct ReadyEntry {
    priority: f64,
    seq: u64,
    task_id: TaskId,
}

impl Eq for ReadyEntry {}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

// higher priority first, then earlier arrival
impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Manager {
    config: ManagerConfig,
    registry: TaskRegistry,
    libraries: Libraries,
    locality: LocalityGroups,
    workers: IndexMap<WorkerId, WorkerInfo>,
    last_worker_id: WorkerId,
    /// Tasks dispatched to each worker and not detached yet.
    running: IndexMap<WorkerId, IndexSet<TaskId>>,
    ready: BinaryHeap<ReadyEntry>,
    /// Latest queue entry of each ready task, older entries are skipped.
    ready_seq: HashMap<TaskId, u64>,
    next_seq: u64,
    retrieved: VecDeque<TaskId>,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            registry: TaskRegistry::new(),
            libraries: Libraries::new(),
            locality: LocalityGroups::new(),
            workers: IndexMap::new(),
            last_worker_id: 0,
            running: IndexMap::new(),
            ready: BinaryHeap::new(),
            ready_seq: HashMap::new(),
            next_seq: 0,
            retrieved: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn task(&self, id: TaskId) -> Result<Ref<'_, Task>> {
        Ok(self.registry.get(id)?.borrow())
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.registry.iter().map(|(id, _)| id).collect()
    }

    pub fn snapshot(&self, id: TaskId) -> Result<TaskSnapshot> {
        Ok(self.registry.get(id)?.borrow().snapshot())
    }

    pub fn libraries(&self) -> &Libraries {
        &self.libraries
    }

    // SUBMISSION ------------------------------------------------------------------------------------------------------

    /// Submits a task and returns its id.
    ///
    /// Library templates are installed instead, see [`Manager::install_library`]. Structurally invalid tasks are
    /// rejected and dropped.
    pub fn submit(&mut self, task: Task, now: Timestamp) -> Result<TaskId> {
        match task.task_type() {
            TaskType::LibraryTemplate => self.install_library(task),
            TaskType::LibraryInstance => Err(VineError::InvalidLibraryFields {
                task_id: task.id(),
                reason: "library instances are created by the manager",
            }),
            _ => self.enqueue(task, now),
        }
    }

    fn enqueue(&mut self, mut task: Task, now: Timestamp) -> Result<TaskId> {
        if let Some(defaults) = self.config.categories.default_request(task.category()) {
            task.resources_requested.fill_missing(&defaults);
        }
        if task.max_retries == 0 {
            task.max_retries = self.config.max_retries;
        }
        if task.max_forsaken == 0 {
            task.max_forsaken = self.config.max_forsaken;
        }
        let id = self.registry.next_id();
        if let Err(e) = task.submit(id, now) {
            warn!("[task {}] rejected: {}", id, e);
            return Err(e);
        }
        if self.config.group_temp_files {
            for (task_id, group) in self.locality.assign(&task) {
                if task_id == id {
                    task.group_id = group;
                } else if let Ok(producer) = self.registry.get(task_id) {
                    producer.borrow_mut().group_id = group;
                }
            }
        }
        if let Err(e) = task.truncate_watched_outputs() {
            warn!("[task {}] can't truncate watched outputs: {}", id, e);
        }
        let priority = task.priority();
        debug!("[task {}] submitted: {}", id, task.command_line());
        self.registry.insert(task);
        self.push_ready(id, priority);
        Ok(id)
    }

    /// Creates a copy of `producer` that runs again to reproduce its lost temporary outputs.
    pub fn create_recovery_task(&mut self, producer: TaskId, now: Timestamp) -> Result<TaskId> {
        let mut task = self.registry.get(producer)?.borrow().copy();
        task.task_type = TaskType::Recovery;
        let id = self.enqueue(task, now)?;
        info!("[task {}] recovery task for task {}", id, producer);
        Ok(id)
    }

    /// Returns an independent copy of a submitted task, ready to be submitted on its own.
    pub fn copy_task(&self, id: TaskId) -> Result<Task> {
        Ok(self.registry.get(id)?.borrow().copy())
    }

    /// Takes a done task out of the manager after a hard reset, so that it can be submitted again as if new.
    pub fn hard_reset(&mut self, id: TaskId) -> Result<Task> {
        self.registry.get(id)?.borrow_mut().reset()?;
        self.take(id)
    }

    /// Hard resets a done task and submits it again under a new id.
    pub fn resubmit(&mut self, id: TaskId, now: Timestamp) -> Result<TaskId> {
        let task = self.hard_reset(id)?;
        self.submit(task, now)
    }

    /// Takes a done task out of the manager.
    pub fn remove(&mut self, id: TaskId) -> Result<Task> {
        if self.registry.get(id)?.borrow().state() != TaskState::Done {
            return Err(VineError::TaskActive(id));
        }
        self.take(id)
    }

    fn take(&mut self, id: TaskId) -> Result<Task> {
        let task = self.registry.remove(id).ok_or(VineError::UnknownTask(id))?;
        self.locality.forget(id);
        self.ready_seq.remove(&id);
        Ok(match Rc::try_unwrap(task) {
            Ok(cell) => cell.into_inner(),
            Err(shared) => shared.borrow().copy(),
        })
    }

    // READY QUEUE -----------------------------------------------------------------------------------------------------

    fn push_ready(&mut self, id: TaskId, priority: f64) {
        self.next_seq += 1;
        self.ready_seq.insert(id, self.next_seq);
        self.ready.push(ReadyEntry {
            priority,
            seq: self.next_seq,
            task_id: id,
        });
    }

    fn is_current(&self, entry: &ReadyEntry) -> bool {
        self.ready_seq.get(&entry.task_id) == Some(&entry.seq)
    }

    /// Returns the ready task to be placed next without removing it from the queue.
    pub fn next_ready(&mut self) -> Option<TaskId> {
        while let Some(entry) = self.ready.peek() {
            if self.is_current(entry) {
                return Some(entry.task_id);
            }
            self.ready.pop();
        }
        None
    }

    /// Returns all ready tasks in placement order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        let mut entries: Vec<&ReadyEntry> = self.ready.iter().filter(|e| self.is_current(e)).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.task_id).collect()
    }

    // WORKERS ---------------------------------------------------------------------------------------------------------

    pub fn add_worker(&mut self, mut info: WorkerInfo) -> WorkerId {
        self.last_worker_id += 1;
        info.id = self.last_worker_id;
        info!("worker {} connected: {} ({})", info.id, info.hostname, info.addrport);
        self.workers.insert(info.id, info);
        self.last_worker_id
    }

    pub fn worker(&self, id: WorkerId) -> Result<&WorkerInfo> {
        self.workers.get(&id).ok_or(VineError::UnknownWorker(id))
    }

    /// Records that a file is present in the worker cache.
    pub fn worker_cache_file(&mut self, id: WorkerId, cached_name: &str) -> Result<()> {
        let worker = self.workers.get_mut(&id).ok_or(VineError::UnknownWorker(id))?;
        worker.cached_files.insert(cached_name.to_string());
        Ok(())
    }

    pub fn tasks_on_worker(&self, id: WorkerId) -> Vec<TaskId> {
        self.running
            .get(&id)
            .map(|tasks| tasks.iter().copied().collect())
            .unwrap_or_default()
    }

    fn detach(&mut self, worker: WorkerId, id: TaskId) {
        if let Some(tasks) = self.running.get_mut(&worker) {
            tasks.shift_remove(&id);
        }
    }

    /// Handles a lost worker and returns the tasks that were on it.
    ///
    /// Each task gets one outcome for its attempt: forsaken if it had not started, lost otherwise. Tasks that
    /// completed but were not retrieved lose their outputs and are treated as lost as well.
    pub fn worker_disconnected(&mut self, worker: WorkerId, now: Timestamp) -> Result<Vec<TaskId>> {
        let info = self.workers.shift_remove(&worker).ok_or(VineError::UnknownWorker(worker))?;
        let tasks: Vec<TaskId> = self
            .running
            .shift_remove(&worker)
            .map(|tasks| tasks.into_iter().collect())
            .unwrap_or_default();
        warn!("worker {} ({}) disconnected with {} tasks", worker, info.hostname, tasks.len());
        for &id in tasks.iter() {
            // functions may have been handled together with their library instance
            let on_worker = self
                .registry
                .get(id)
                .map_or(false, |task| task.borrow().worker() == Some(worker));
            if on_worker {
                self.lose_attempt(id, now)?;
            }
        }
        Ok(tasks)
    }

    // ATTEMPTS --------------------------------------------------------------------------------------------------------

    /// Records the decision to run a task at `worker` with the given allocation.
    ///
    /// Function tasks are admitted to an instance of their library first and must be sent to the worker hosting it.
    pub fn dispatch(&mut self, id: TaskId, worker: WorkerId, allocated: &ResourceSummary, now: Timestamp) -> Result<()> {
        let (hostname, addrport) = {
            let info = self.worker(worker)?;
            (info.hostname.clone(), info.addrport.clone())
        };
        let task = self.registry.get(id)?.clone();
        self.check_dispatchable(id)?;
        if task.borrow().is_function() {
            let instance = self.libraries.admit(id, &self.registry)?.ok_or(VineError::NoFreeSlot(id))?;
            let host = self.library_host(instance)?;
            if host != worker {
                return Err(VineError::FunctionWorkerMismatch {
                    task_id: id,
                    expected: host,
                    actual: worker,
                });
            }
        }
        {
            let mut task = task.borrow_mut();
            task.begin_commit(worker, allocated, now)?;
            task.hostname = Some(hostname);
            task.addrport = Some(addrport);
        }
        self.ready_seq.remove(&id);
        self.running.entry(worker).or_default().insert(id);
        debug!("[task {}] dispatched to worker {}", id, worker);
        Ok(())
    }

    /// Admits a function task to an instance of its library and dispatches it to the instance's worker.
    ///
    /// Returns `None` if no instance has a free slot, the function then waits for one.
    pub fn dispatch_function(&mut self, id: TaskId, now: Timestamp) -> Result<Option<WorkerId>> {
        self.check_dispatchable(id)?;
        let instance = match self.libraries.admit(id, &self.registry)? {
            Some(instance) => instance,
            None => return Ok(None),
        };
        let worker = self.library_host(instance)?;
        let allocated = self.registry.get(id)?.borrow().resources_requested().clone();
        self.dispatch(id, worker, &allocated, now)?;
        Ok(Some(worker))
    }

    /// A task can be dispatched only while it is ready and not sent to a worker yet.
    fn check_dispatchable(&self, id: TaskId) -> Result<()> {
        let task = self.registry.get(id)?.borrow();
        if task.state() != TaskState::Ready || task.worker().is_some() {
            return Err(VineError::InvalidTransition {
                task_id: id,
                from: task.state(),
                to: TaskState::Running,
            });
        }
        Ok(())
    }

    fn library_host(&self, instance: TaskId) -> Result<WorkerId> {
        self.registry
            .get(instance)?
            .borrow()
            .worker()
            .ok_or(VineError::NoAttempt(instance))
    }

    /// Worker confirmed the start of the task.
    pub fn started(&mut self, id: TaskId, now: Timestamp) -> Result<()> {
        self.registry.get(id)?.borrow_mut().start(now)
    }

    /// Records the end of an attempt reported by the worker.
    pub fn attempt_result(&mut self, id: TaskId, report: AttemptReport, now: Timestamp) -> Result<ResultDisposition> {
        if report.result == TaskResult::Forsaken {
            return self.forsaken(id, now);
        }
        let task = self.registry.get(id)?.clone();
        {
            let mut task = task.borrow_mut();
            if task.worker().is_none() || task.outcome_recorded {
                return Err(VineError::NoAttempt(id));
            }
            task.complete(now)?;
            task.exit_code = report.exit_code;
            if report.output.is_some() {
                task.output = report.output;
            }
            if let Some(measured) = report.measured {
                task.set_measured_resources(measured, report.sandbox_measured);
            }
        }
        if task.borrow().task_type() == TaskType::LibraryInstance {
            let result = match report.result {
                TaskResult::ResourceExhaustion | TaskResult::Unknown => TaskResult::LibraryExit,
                other => other,
            };
            self.detach_library_instance(id, result != TaskResult::Success, now)?;
            task.borrow_mut().set_result(result, now);
            return self.settle(id, ResultDisposition::Finalize);
        }
        let disposition = task.borrow_mut().set_result(report.result, now);
        self.settle(id, disposition)
    }

    /// The task was dispatched but the worker never started it.
    pub fn forsaken(&mut self, id: TaskId, now: Timestamp) -> Result<ResultDisposition> {
        let task = self.registry.get(id)?.clone();
        let task_type = {
            let task = task.borrow();
            if task.worker().is_none() || task.outcome_recorded {
                return Err(VineError::NoAttempt(id));
            }
            if task.state() != TaskState::Ready {
                return Err(VineError::InvalidTransition {
                    task_id: id,
                    from: task.state(),
                    to: TaskState::Ready,
                });
            }
            task.task_type()
        };
        if task_type == TaskType::LibraryInstance {
            self.detach_library_instance(id, true, now)?;
            task.borrow_mut().set_result(TaskResult::LibraryExit, now);
            return self.settle(id, ResultDisposition::Finalize);
        }
        let disposition = task.borrow_mut().set_result(TaskResult::Forsaken, now);
        self.settle(id, disposition)
    }

    /// Terminates a task running longer than expected. The attempt counts as lost.
    pub fn terminate_slow(&mut self, id: TaskId, now: Timestamp) -> Result<ResultDisposition> {
        let task = self.registry.get(id)?.clone();
        let (state, task_type) = {
            let task = task.borrow();
            (task.state(), task.task_type())
        };
        if state != TaskState::Running {
            return Err(VineError::InvalidTransition {
                task_id: id,
                from: state,
                to: TaskState::Ready,
            });
        }
        warn!("[task {}] terminated for running too long", id);
        if task_type == TaskType::LibraryInstance {
            self.detach_library_instance(id, true, now)?;
            task.borrow_mut().set_result(TaskResult::LibraryExit, now);
            return self.settle(id, ResultDisposition::Finalize);
        }
        let disposition = {
            let mut task = task.borrow_mut();
            task.note_slow(now);
            task.set_result(TaskResult::Unknown, now)
        };
        self.settle(id, disposition)
    }

    /// Gives an outcome to an attempt whose worker or library instance went away.
    fn lose_attempt(&mut self, id: TaskId, now: Timestamp) -> Result<()> {
        let task = self.registry.get(id)?.clone();
        let (state, worker, task_type, recorded) = {
            let task = task.borrow();
            let recorded = task.outcome_recorded.then(|| task.result());
            (task.state(), task.worker(), task.task_type(), recorded)
        };
        if task_type == TaskType::LibraryInstance {
            // an instance that already reported its exit has left its library
            if recorded.is_none() {
                self.detach_library_instance(id, true, now)?;
                task.borrow_mut().set_result(TaskResult::LibraryExit, now);
            }
            self.settle(id, ResultDisposition::Finalize)?;
            return Ok(());
        }
        match (state, worker) {
            (TaskState::Ready, Some(_)) => {
                self.forsaken(id, now)?;
            }
            (TaskState::Ready, None) => {
                self.libraries.release(id, &self.registry)?;
            }
            (TaskState::WaitingRetrieval, _) if recorded != Some(TaskResult::Success) => {
                // the final result is kept, only the outputs are gone
                self.settle(id, ResultDisposition::Finalize)?;
            }
            (TaskState::Running, _) | (TaskState::WaitingRetrieval, _) => {
                warn!("[task {}] attempt lost", id);
                let disposition = task.borrow_mut().set_result(TaskResult::Unknown, now);
                self.settle(id, disposition)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Applies the disposition of a recorded outcome: the task goes back to ready or ends.
    ///
    /// A finished task whose outputs are still at a connected worker waits for retrieval, any other one is aborted.
    fn settle(&mut self, id: TaskId, disposition: ResultDisposition) -> Result<ResultDisposition> {
        self.libraries.release(id, &self.registry)?;
        let task = self.registry.get(id)?.clone();
        let worker = task.borrow().worker();
        match disposition {
            ResultDisposition::Retry => {
                if let Some(worker) = worker {
                    self.detach(worker, id);
                }
                let priority = {
                    let mut task = task.borrow_mut();
                    if let Err(e) = task.truncate_watched_outputs() {
                        warn!("[task {}] can't truncate watched outputs: {}", id, e);
                    }
                    task.requeue()?;
                    task.priority()
                };
                self.push_ready(id, priority);
                debug!("[task {}] back to ready", id);
            }
            ResultDisposition::Finalize => {
                let at_worker = worker.map_or(false, |w| self.workers.contains_key(&w));
                if task.borrow().state() == TaskState::WaitingRetrieval && at_worker {
                    debug!("[task {}] waiting for retrieval", id);
                } else {
                    task.borrow_mut().abort()?;
                    if let Some(worker) = worker {
                        self.detach(worker, id);
                    }
                    self.retrieved.push_back(id);
                }
                info!("[task {}] finished with result {}", id, task.borrow().result());
            }
        }
        Ok(disposition)
    }

    /// Outputs of a finished task are at the manager.
    pub fn retrieved(&mut self, id: TaskId, now: Timestamp) -> Result<()> {
        let task = self.registry.get(id)?.clone();
        let worker = {
            let mut task = task.borrow_mut();
            if task.state() != TaskState::WaitingRetrieval {
                return Err(VineError::InvalidTransition {
                    task_id: id,
                    from: task.state(),
                    to: TaskState::Retrieved,
                });
            }
            task.metrics.time_when_retrieval = now;
            let worker = task.worker();
            task.retrieve()?;
            worker
        };
        if let Some(worker) = worker {
            self.detach(worker, id);
        }
        self.retrieved.push_back(id);
        Ok(())
    }

    /// Returns the next finished task, if any.
    ///
    /// Retrieved tasks are moved to done. Tasks created by the manager are finished silently and never returned.
    pub fn wait(&mut self, now: Timestamp) -> Result<Option<TaskId>> {
        while let Some(id) = self.retrieved.pop_front() {
            let task = match self.registry.get(id) {
                Ok(task) => task.clone(),
                Err(_) => continue,
            };
            let mut task = task.borrow_mut();
            if task.state() != TaskState::Retrieved {
                continue;
            }
            task.finish(now)?;
            if task.is_internal() {
                debug!("[task {}] internal task done with result {}", id, task.result());
                continue;
            }
            info!("[task {}] done with result {}", id, task.result());
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Cancels a task. Returns false if the task has already finished.
    pub fn cancel(&mut self, id: TaskId, now: Timestamp) -> Result<bool> {
        let task = self.registry.get(id)?.clone();
        let (state, task_type, library) = {
            let task = task.borrow();
            (task.state(), task.task_type(), task.needs_library().map(str::to_string))
        };
        if matches!(state, TaskState::Initial | TaskState::Retrieved | TaskState::Done) {
            return Ok(false);
        }
        info!("[task {}] cancelled in state {}", id, state);
        self.ready_seq.remove(&id);
        if let Some(library) = library {
            self.libraries.remove_waiting(&library, id);
        }
        if task_type == TaskType::LibraryInstance {
            self.detach_library_instance(id, false, now)?;
        }
        self.libraries.release(id, &self.registry)?;
        let worker = {
            let mut task = task.borrow_mut();
            task.set_result(TaskResult::Cancelled, now);
            let worker = task.worker();
            task.abort()?;
            worker
        };
        if let Some(worker) = worker {
            self.detach(worker, id);
        }
        self.retrieved.push_back(id);
        Ok(true)
    }

    // FIXED LOCATIONS -------------------------------------------------------------------------------------------------

    /// Returns true if some connected worker holds every fixed location input of the task.
    pub fn fixed_location_satisfiable(&self, id: TaskId) -> Result<bool> {
        let task = self.registry.get(id)?.borrow();
        if !task.has_fixed_locations() {
            return Ok(true);
        }
        let names: Vec<&str> = task
            .input_mounts()
            .iter()
            .filter(|m| m.is_fixed_location())
            .map(|m| m.file.cached_name.as_str())
            .collect();
        Ok(self.workers.values().any(|w| names.iter().all(|name| w.has_file(name))))
    }

    /// Ends a ready task whose fixed location inputs can't be found at any worker.
    ///
    /// The task is not retried and no attempt is counted.
    pub fn fail_unplaceable(&mut self, id: TaskId, now: Timestamp) -> Result<()> {
        let task = self.registry.get(id)?.clone();
        let library = {
            let task = task.borrow();
            if task.worker().is_some() {
                return Err(VineError::Dispatched(id));
            }
            if task.state() != TaskState::Ready {
                return Err(VineError::InvalidTransition {
                    task_id: id,
                    from: task.state(),
                    to: TaskState::Retrieved,
                });
            }
            task.needs_library().map(str::to_string)
        };
        warn!("[task {}] no worker holds its fixed location inputs", id);
        self.ready_seq.remove(&id);
        if let Some(library) = library {
            self.libraries.remove_waiting(&library, id);
        }
        self.libraries.release(id, &self.registry)?;
        {
            let mut task = task.borrow_mut();
            task.set_result(TaskResult::FixedLocationMissing, now);
            task.abort()?;
        }
        self.retrieved.push_back(id);
        Ok(())
    }

    /// Fails every ready task whose fixed location inputs can't be satisfied and returns them.
    pub fn fail_unplaceable_tasks(&mut self, now: Timestamp) -> Result<Vec<TaskId>> {
        let mut failed = Vec::new();
        for id in self.ready_tasks() {
            if !self.fixed_location_satisfiable(id)? {
                self.fail_unplaceable(id, now)?;
                failed.push(id);
            }
        }
        Ok(failed)
    }

    // MONITORING ------------------------------------------------------------------------------------------------------

    pub fn record_transfer(&mut self, id: TaskId, sent: u64, received: u64) -> Result<()> {
        self.registry.get(id)?.borrow_mut().metrics.add_transfer(sent, received);
        Ok(())
    }

    /// Installs resource usage reported by the monitor.
    pub fn set_measured(&mut self, id: TaskId, measured: ResourceSummary, sandbox: Option<f64>) -> Result<()> {
        self.registry
            .get(id)?
            .borrow_mut()
            .set_measured_resources(measured, sandbox);
        Ok(())
    }

    // LIBRARIES -------------------------------------------------------------------------------------------------------

    /// Registers a library template under the name of the library it provides.
    pub fn install_library(&mut self, mut template: Task) -> Result<TaskId> {
        let id = self.registry.next_id();
        template.id = id;
        let name = match (template.task_type(), template.provides_library()) {
            (TaskType::LibraryTemplate, Some(name)) => name.to_string(),
            _ => {
                return Err(VineError::InvalidLibraryFields {
                    task_id: id,
                    reason: "only library templates can be installed",
                })
            }
        };
        template.check_consistency()?;
        self.registry.insert(template);
        self.libraries.add_template(&name, id);
        info!("[task {}] library {} installed", id, name);
        Ok(id)
    }

    /// Creates and submits a new instance of a library.
    ///
    /// Returns `None` if the library failed too many times and is no longer instantiated.
    pub fn instantiate_library(&mut self, name: &str, now: Timestamp) -> Result<Option<TaskId>> {
        let template = self
            .libraries
            .template(name)
            .ok_or_else(|| VineError::UnknownLibrary(name.to_string()))?;
        if !self.library_viable(name)? {
            warn!("library {} failed too many times, not instantiating", name);
            return Ok(None);
        }
        let mut instance = self.registry.get(template)?.borrow().copy();
        instance.make_instance();
        let id = self.enqueue(instance, now)?;
        {
            let mut instance = self.registry.get(id)?.borrow_mut();
            let dir = instance
                .monitor_output_directory
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            instance.library_log_path = Some(dir.join(format!("library-{}-{}.log", name, id)));
        }
        self.libraries.add_instance(name, id);
        info!("[task {}] instance of library {} with {} slots", id, name, self.task(id)?.function_slots_total());
        Ok(Some(id))
    }

    /// Returns true while the library has failed less than the configured number of times.
    pub fn library_viable(&self, name: &str) -> Result<bool> {
        let template = self
            .libraries
            .template(name)
            .ok_or_else(|| VineError::UnknownLibrary(name.to_string()))?;
        let failed = self.registry.get(template)?.borrow().library_failed_count();
        let limit = self.config.max_library_failures;
        Ok(limit <= 0 || i64::from(failed) < i64::from(limit))
    }

    /// Counts a failure of a library instance against its template.
    pub fn library_failed(&mut self, instance: TaskId) -> Result<()> {
        let name = match self.registry.get(instance)?.borrow().provides_library() {
            Some(name) => name.to_string(),
            None => return Ok(()),
        };
        if let Some(template) = self.libraries.template(&name) {
            let mut template = self.registry.get(template)?.borrow_mut();
            template.library_failed_count += 1;
            warn!(
                "[task {}] library {} failed {} times",
                template.id(),
                name,
                template.library_failed_count()
            );
        }
        Ok(())
    }

    /// Admits a function task to an instance of its library without dispatching it.
    pub fn match_function(&mut self, id: TaskId) -> Result<Option<TaskId>> {
        self.libraries.admit(id, &self.registry)
    }

    /// Returns the function that should get the next free slot of the library.
    pub fn next_waiting_function(&mut self, name: &str) -> Option<TaskId> {
        self.libraries.next_waiting(name, &self.registry)
    }

    /// Execution mode the worker must use for a function task: the mode of its library instance, or of the library
    /// template while the function is not admitted.
    pub fn effective_exec_mode(&self, id: TaskId) -> Result<FuncExecMode> {
        let task = self.registry.get(id)?.borrow();
        let library = task.needs_library().ok_or(VineError::NotAFunction(id))?;
        if let Some(instance) = task.library_task() {
            return Ok(self.registry.get(instance)?.borrow().exec_mode());
        }
        match self.libraries.template(library) {
            Some(template) => Ok(self.registry.get(template)?.borrow().exec_mode()),
            None => Ok(task.exec_mode()),
        }
    }

    /// Removes an instance from its library, failing the functions bound to it.
    fn detach_library_instance(&mut self, id: TaskId, failed: bool, now: Timestamp) -> Result<()> {
        for function in self.libraries.functions_of(id, &self.registry) {
            self.lose_attempt(function, now)?;
        }
        let name = self.registry.get(id)?.borrow().provides_library().map(str::to_string);
        if let Some(name) = name {
            self.libraries.remove_instance(&name, id);
            if failed {
                self.library_failed(id)?;
            }
        }
        Ok(())
    }
}
