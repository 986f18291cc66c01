//! Task timing and transfer metrics.

use serde::Serialize;

/// Point in time or duration in microseconds.
pub type Timestamp = u64;

/// Metrics of a task, all times in microseconds.
///
/// A `time_when_*` field refers to an instant, zero meaning "never happened". The other times are durations.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TaskMetrics {
    pub time_when_submitted: Timestamp,
    /// Task was marked as done after its outputs were retrieved and processed.
    pub time_when_done: Timestamp,
    /// Task started to be sent to a worker.
    pub time_when_commit_start: Timestamp,
    /// Task was completely sent to a worker and started there.
    pub time_when_commit_end: Timestamp,
    /// Outputs started to be transferred back to the manager.
    pub time_when_retrieval: Timestamp,
    pub time_when_last_failure: Timestamp,

    pub time_workers_execute_last_start: Timestamp,
    pub time_workers_execute_last_end: Timestamp,
    /// Duration of the last complete execution.
    pub time_workers_execute_last: Timestamp,
    /// Execution time accumulated over all attempts, including the ones lost with their workers.
    pub time_workers_execute_all: Timestamp,
    pub time_workers_execute_exhaustion: Timestamp,
    pub time_workers_execute_failure: Timestamp,
    /// Part of the failure time spent in attempts terminated for running too long.
    pub time_workers_execute_slow: Timestamp,

    /// Bytes received since the latest attempt started.
    pub bytes_received: u64,
    /// Bytes sent since the latest attempt started.
    pub bytes_sent: u64,
    pub bytes_transferred: u64,
}

impl TaskMetrics {
    pub(crate) fn reset_transfers(&mut self) {
        self.bytes_received = 0;
        self.bytes_sent = 0;
        self.bytes_transferred = 0;
    }

    pub(crate) fn add_transfer(&mut self, sent: u64, received: u64) {
        self.bytes_sent += sent;
        self.bytes_received += received;
        self.bytes_transferred += sent + received;
    }

    /// Opens an execution window.
    pub(crate) fn start_execution(&mut self, now: Timestamp) {
        self.time_workers_execute_last_start = now;
        self.time_workers_execute_last_end = 0;
    }

    /// Closes the current execution window and returns its duration.
    pub(crate) fn end_execution(&mut self, now: Timestamp) -> Timestamp {
        let elapsed = now.saturating_sub(self.time_workers_execute_last_start);
        self.time_workers_execute_last_end = now;
        self.time_workers_execute_last = elapsed;
        self.time_workers_execute_all += elapsed;
        elapsed
    }

    /// Closes the execution window of an attempt that never completed.
    ///
    /// The duration counts toward the total execution time, but not as the last complete execution.
    pub(crate) fn abandon_execution(&mut self, now: Timestamp) -> Timestamp {
        let elapsed = now.saturating_sub(self.time_workers_execute_last_start);
        self.time_workers_execute_all += elapsed;
        elapsed
    }
}
