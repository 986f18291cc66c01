//! Task lifecycle and retry policy.
//!
//! The lifecycle only records outcomes of decisions made elsewhere (which worker to use, when output is fetched) and
//! advances the task state accordingly. Every attempt gets exactly one outcome through [`Task::set_result`], which
//! also decides whether the task is finished or should be attempted again.

use log::{debug, info, warn};

use crate::error::{Result, VineError};
use crate::metrics::{TaskMetrics, Timestamp};
use crate::resources::ResourceSummary;
use crate::task::{Task, TaskId, TaskResult, TaskState};
use crate::worker::WorkerId;

/// What to do with a task after recording a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultDisposition {
    /// The result is final, the task goes to the user.
    Finalize,
    /// The attempt failed, but the task may be attempted again.
    Retry,
}

fn is_allowed(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    matches!(
        (from, to),
        (Initial, Ready)
            | (Ready, Running)
            | (Running, WaitingRetrieval)
            | (WaitingRetrieval, Retrieved)
            | (Retrieved, Done)
            // retry after a failed attempt
            | (Running, Ready)
            | (WaitingRetrieval, Ready)
            // abort
            | (Ready, Retrieved)
            | (Running, Retrieved)
    )
}

/// Returns true if `count` is over the limit, limits below one mean no limit.
fn over_budget(limit: i32, count: u32) -> bool {
    limit > 0 && count > limit as u32
}

impl Task {
    pub(crate) fn change_state(&mut self, to: TaskState) -> Result<()> {
        if !is_allowed(self.state, to) {
            return Err(VineError::InvalidTransition {
                task_id: self.id,
                from: self.state,
                to,
            });
        }
        debug!("[task {}] {} -> {}", self.id, self.state, to);
        if self.state == TaskState::Running {
            self.current_resource_box = None;
        }
        self.state = to;
        Ok(())
    }

    /// Queues the task for dispatch under the given id.
    pub(crate) fn submit(&mut self, id: TaskId, now: Timestamp) -> Result<()> {
        self.id = id;
        self.check_consistency()?;
        self.change_state(TaskState::Ready)?;
        self.metrics.time_when_submitted = now;
        Ok(())
    }

    /// Records the decision to send the task to `worker` with the given allocation.
    ///
    /// The task stays ready until the worker confirms the start, so an attempt abandoned at this point is forsaken.
    pub(crate) fn begin_commit(&mut self, worker: WorkerId, allocated: &ResourceSummary, now: Timestamp) -> Result<()> {
        if self.state != TaskState::Ready || self.worker.is_some() {
            return Err(VineError::InvalidTransition {
                task_id: self.id,
                from: self.state,
                to: TaskState::Running,
            });
        }
        self.worker = Some(worker);
        self.outcome_recorded = false;
        self.set_resources(allocated);
        self.metrics.time_when_commit_start = now;
        self.metrics.reset_transfers();
        Ok(())
    }

    /// Worker confirmed the start of the task.
    pub(crate) fn start(&mut self, now: Timestamp) -> Result<()> {
        if self.worker.is_none() {
            return Err(VineError::NoAttempt(self.id));
        }
        self.change_state(TaskState::Running)?;
        self.try_count += 1;
        self.current_resource_box = self.resources_allocated.clone();
        self.metrics.time_when_commit_end = now;
        self.metrics.start_execution(now);
        Ok(())
    }

    /// Worker reported the end of the execution.
    pub(crate) fn complete(&mut self, now: Timestamp) -> Result<()> {
        self.change_state(TaskState::WaitingRetrieval)?;
        self.metrics.end_execution(now);
        Ok(())
    }

    /// Outputs are at the manager.
    pub(crate) fn retrieve(&mut self) -> Result<()> {
        self.change_state(TaskState::Retrieved)?;
        self.worker = None;
        Ok(())
    }

    /// Hands the task to the user.
    pub(crate) fn finish(&mut self, now: Timestamp) -> Result<()> {
        if self.result == TaskResult::Unknown {
            return Err(VineError::MissingResult(self.id));
        }
        self.change_state(TaskState::Done)?;
        self.metrics.time_when_done = now;
        Ok(())
    }

    /// Moves the task back to ready after a failed attempt.
    pub(crate) fn requeue(&mut self) -> Result<()> {
        self.clean()?;
        if self.state != TaskState::Ready {
            self.change_state(TaskState::Ready)?;
        }
        Ok(())
    }

    /// Ends the task with its current result without going through the remaining states.
    pub(crate) fn abort(&mut self) -> Result<()> {
        if self.state != TaskState::WaitingRetrieval {
            self.change_state(TaskState::Retrieved)?;
        } else {
            self.retrieve()?;
        }
        self.worker = None;
        self.current_resource_box = None;
        Ok(())
    }

    /// Counts a termination for running too long, together with the time the attempt ran so far.
    pub(crate) fn note_slow(&mut self, now: Timestamp) {
        self.workers_slow += 1;
        if self.state == TaskState::Running {
            self.metrics.time_workers_execute_slow += now.saturating_sub(self.metrics.time_workers_execute_last_start);
        }
    }

    /// Duration of the current attempt for failure accounting.
    fn attempt_elapsed(&mut self, now: Timestamp) -> Timestamp {
        match self.state {
            TaskState::Running => self.metrics.abandon_execution(now),
            TaskState::WaitingRetrieval => self.metrics.time_workers_execute_last,
            _ => 0,
        }
    }

    /// Records the outcome of the current attempt and returns whether the task is finished.
    ///
    /// `Forsaken` counts an attempt that never started, `ResourceExhaustion` and `Unknown` (lost worker) count
    /// failed attempts that may be retried while the corresponding budget lasts. Any other result is final.
    pub fn set_result(&mut self, result: TaskResult, now: Timestamp) -> ResultDisposition {
        self.outcome_recorded = true;
        match result {
            TaskResult::Forsaken => {
                self.forsaken_count += 1;
                self.forsaken_attempts += 1;
                self.metrics.time_when_last_failure = now;
                if over_budget(self.max_forsaken, self.forsaken_count) {
                    warn!("[task {}] forsaken {} times, giving up", self.id, self.forsaken_count);
                    self.result = TaskResult::Forsaken;
                    return ResultDisposition::Finalize;
                }
                ResultDisposition::Retry
            }
            TaskResult::ResourceExhaustion => {
                let elapsed = self.attempt_elapsed(now);
                self.exhausted_attempts += 1;
                self.metrics.time_workers_execute_exhaustion += elapsed;
                self.metrics.time_when_last_failure = now;
                if over_budget(self.max_retries, self.try_count) {
                    warn!("[task {}] exhausted resources after {} tries", self.id, self.try_count);
                    self.result = TaskResult::ResourceExhaustion;
                    return ResultDisposition::Finalize;
                }
                ResultDisposition::Retry
            }
            TaskResult::Unknown => {
                let elapsed = self.attempt_elapsed(now);
                self.metrics.time_workers_execute_failure += elapsed;
                self.metrics.time_when_last_failure = now;
                if over_budget(self.max_retries, self.try_count) {
                    warn!("[task {}] failed after {} tries", self.id, self.try_count);
                    self.result = TaskResult::MaxRetries;
                    return ResultDisposition::Finalize;
                }
                ResultDisposition::Retry
            }
            missing if missing.is_missing_data() => {
                // missing data only refines a successful or absent result
                if matches!(self.result, TaskResult::Unknown | TaskResult::Success) {
                    self.result = missing;
                }
                ResultDisposition::Finalize
            }
            other => {
                self.result = other;
                ResultDisposition::Finalize
            }
        }
    }

    /// Installs the allocation for the attempt that is beginning. The request is left untouched.
    pub fn set_resources(&mut self, allocated: &ResourceSummary) {
        self.resources_allocated = Some(allocated.clone());
        if self.state == TaskState::Running {
            self.current_resource_box = Some(allocated.clone());
        }
    }

    /// Installs the usage measured during the latest attempt.
    pub fn set_measured_resources(&mut self, measured: ResourceSummary, sandbox: Option<f64>) {
        if let Some(allocated) = self.resources_allocated.as_ref() {
            let exceeded = measured.exceeding(allocated);
            if !exceeded.is_empty() {
                debug!("[task {}] measured usage exceeds allocation: {}", self.id, exceeded.join(", "));
            }
        }
        self.resources_measured = Some(measured);
        if let Some(sandbox) = sandbox {
            self.sandbox_measured = Some(self.sandbox_measured.map_or(sandbox, |peak| peak.max(sandbox)));
        }
    }

    /// Hard reset of a done task, so that it can be submitted again as if new.
    ///
    /// Submission fields are kept, everything else goes back to its initial value.
    pub fn reset(&mut self) -> Result<()> {
        if self.state != TaskState::Done {
            return Err(VineError::InvalidTransition {
                task_id: self.id,
                from: self.state,
                to: TaskState::Initial,
            });
        }
        info!("[task {}] reset", self.id);
        self.id = 0;
        self.state = TaskState::Initial;
        self.worker = None;
        self.library_task = None;
        self.library_log_path = None;
        self.outcome_recorded = false;
        self.try_count = 0;
        self.forsaken_count = 0;
        self.library_failed_count = 0;
        self.exhausted_attempts = 0;
        self.forsaken_attempts = 0;
        self.workers_slow = 0;
        self.function_slots_total = 0;
        self.function_slots_inuse = 0;
        self.result = TaskResult::Unknown;
        self.exit_code = 0;
        self.output = None;
        self.addrport = None;
        self.hostname = None;
        self.metrics = TaskMetrics::default();
        self.resources_allocated = None;
        self.resources_measured = None;
        self.current_resource_box = None;
        self.sandbox_measured = None;
        self.group_id = 0;
        Ok(())
    }

    /// Soft reset of a task whose attempt failed, so that it can be dispatched to another worker.
    ///
    /// Only the state of the failed attempt is dropped, attempt counters are kept.
    pub fn clean(&mut self) -> Result<()> {
        if matches!(self.state, TaskState::Initial | TaskState::Retrieved | TaskState::Done) {
            return Err(VineError::InvalidTransition {
                task_id: self.id,
                from: self.state,
                to: TaskState::Ready,
            });
        }
        self.worker = None;
        self.current_resource_box = None;
        self.result = TaskResult::Unknown;
        self.exit_code = 0;
        self.output = None;
        self.addrport = None;
        self.hostname = None;
        Ok(())
    }
}
