//! Serializable view of a task.

use serde::Serialize;

use crate::error::Result;
use crate::metrics::TaskMetrics;
use crate::mount::Mount;
use crate::resources::ResourceSummary;
use crate::task::{FuncExecMode, Schedule, Task, TaskId, TaskResult, TaskState, TaskType};
use crate::worker::WorkerId;

#[derive(Clone, Debug, Serialize)]
pub struct MountSnapshot {
    pub remote_name: String,
    pub cached_name: String,
    pub source: &'static str,
    pub size: Option<u64>,
    pub flags: u32,
}

impl From<&Mount> for MountSnapshot {
    fn from(mount: &Mount) -> Self {
        Self {
            remote_name: mount.remote_name.clone(),
            cached_name: mount.file.cached_name.clone(),
            source: mount.file.source.kind(),
            size: mount.file.size,
            flags: mount.flags.bits(),
        }
    }
}

/// Copy of every field of a task at some point in time.
#[derive(Clone, Debug, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub task_type: TaskType,
    pub state: TaskState,
    pub command_line: String,
    pub tag: Option<String>,
    pub category: String,
    pub priority: f64,
    pub schedule: Schedule,
    pub max_retries: i32,
    pub max_forsaken: i32,
    pub min_running_time: i64,
    pub features: Vec<String>,
    pub env: Vec<(String, Option<String>)>,
    pub inputs: Vec<MountSnapshot>,
    pub outputs: Vec<MountSnapshot>,
    pub input_files_size: i64,
    pub has_fixed_locations: bool,
    pub group_id: u32,

    pub needs_library: Option<String>,
    pub provides_library: Option<String>,
    pub function_slots_requested: i32,
    pub function_slots_total: u32,
    pub function_slots_inuse: u32,
    pub exec_mode: FuncExecMode,
    pub library_task: Option<TaskId>,
    pub library_log_path: Option<String>,

    pub worker: Option<WorkerId>,
    pub hostname: Option<String>,
    pub addrport: Option<String>,
    pub try_count: u32,
    pub forsaken_count: u32,
    pub exhausted_attempts: u32,
    pub forsaken_attempts: u32,
    pub workers_slow: u32,
    pub library_failed_count: u32,

    pub result: TaskResult,
    pub exit_code: i32,
    pub output: Option<String>,

    pub metrics: TaskMetrics,
    pub resources_requested: ResourceSummary,
    pub resources_allocated: Option<ResourceSummary>,
    pub resources_measured: Option<ResourceSummary>,
    pub current_resource_box: Option<ResourceSummary>,
    pub sandbox_measured: Option<f64>,
}

impl Task {
    pub fn snapshot(&self) -> TaskSnapshot {
        debug_assert!(self.state != TaskState::Done || self.result != TaskResult::Unknown);
        TaskSnapshot {
            id: self.id,
            task_type: self.task_type,
            state: self.state,
            command_line: self.command_line.clone(),
            tag: self.tag.clone(),
            category: self.category.clone(),
            priority: self.priority,
            schedule: self.schedule,
            max_retries: self.max_retries,
            max_forsaken: self.max_forsaken,
            min_running_time: self.min_running_time,
            features: self.features.clone(),
            env: self.env.clone(),
            inputs: self.input_mounts.iter().map(MountSnapshot::from).collect(),
            outputs: self.output_mounts.iter().map(MountSnapshot::from).collect(),
            input_files_size: self.input_files_size,
            has_fixed_locations: self.has_fixed_locations,
            group_id: self.group_id,
            needs_library: self.needs_library.clone(),
            provides_library: self.provides_library.clone(),
            function_slots_requested: self.function_slots_requested,
            function_slots_total: self.function_slots_total,
            function_slots_inuse: self.function_slots_inuse,
            exec_mode: self.func_exec_mode,
            library_task: self.library_task,
            library_log_path: self.library_log_path.as_ref().map(|p| p.display().to_string()),
            worker: self.worker,
            hostname: self.hostname.clone(),
            addrport: self.addrport.clone(),
            try_count: self.try_count,
            forsaken_count: self.forsaken_count,
            exhausted_attempts: self.exhausted_attempts,
            forsaken_attempts: self.forsaken_attempts,
            workers_slow: self.workers_slow,
            library_failed_count: self.library_failed_count,
            result: self.result,
            exit_code: self.exit_code,
            output: self.output.clone(),
            metrics: self.metrics.clone(),
            resources_requested: self.resources_requested.clone(),
            resources_allocated: self.resources_allocated.clone(),
            resources_measured: self.resources_measured.clone(),
            current_resource_box: self.current_resource_box.clone(),
            sandbox_measured: self.sandbox_measured,
        }
    }

    /// Renders the snapshot of the task as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}
