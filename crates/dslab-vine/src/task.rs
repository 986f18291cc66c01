//! Task entity.

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VineError;
use crate::metrics::TaskMetrics;
use crate::mount::{Mount, MountFlags, VineFile};
use crate::resources::ResourceSummary;
use crate::worker::WorkerId;

pub type TaskId = u64;

/// Kind of a task. Only standard tasks are returned to the user, the other kinds are created by the manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    Standard,
    /// Reproduces a lost temporary file.
    Recovery,
    /// Definition of a library, never dispatched itself.
    LibraryTemplate,
    /// Library process running at some worker, created from a template.
    LibraryInstance,
}

/// Lifecycle state of a task.
///
/// States are ordered, a task moves forward one state at a time. It may go back to `Ready` to retry an attempt, or
/// jump to `Retrieved` when it is aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Not submitted yet.
    Initial,
    /// Waiting in the manager for dispatch.
    Ready,
    /// Executing at a worker.
    Running,
    /// Finished at the worker, results are not at the manager yet.
    WaitingRetrieval,
    /// Results are at the manager.
    Retrieved,
    /// Returned to the user.
    Done,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Initial => "INITIAL",
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::WaitingRetrieval => "WAITING_RETRIEVAL",
            TaskState::Retrieved => "RETRIEVED",
            TaskState::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// How a library executes function calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuncExecMode {
    /// Calls run inside the library process.
    Direct,
    /// Each call runs in a forked child of the library process.
    #[default]
    Fork,
}

impl FromStr for FuncExecMode {
    type Err = VineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(FuncExecMode::Direct),
            "fork" => Ok(FuncExecMode::Fork),
            _ => Err(VineError::InvalidExecMode(s.to_string())),
        }
    }
}

/// Result of a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResult {
    /// Task ran to completion, its exit code may still be non-zero.
    Success,
    InputMissing,
    OutputMissing,
    StdoutMissing,
    /// Task was killed by a signal.
    Signal,
    ResourceExhaustion,
    MaxEndTime,
    /// No result yet, or the attempt was lost with its worker.
    #[default]
    Unknown,
    Forsaken,
    MaxRetries,
    MaxWallTime,
    MonitorError,
    OutputTransferError,
    /// No worker holds all the fixed location inputs of the task.
    FixedLocationMissing,
    Cancelled,
    LibraryExit,
}

impl TaskResult {
    /// Returns true for the results that only describe missing inputs, outputs or stdout.
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            TaskResult::InputMissing | TaskResult::OutputMissing | TaskResult::StdoutMissing
        )
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskResult::Success => "SUCCESS",
            TaskResult::InputMissing => "INPUT_MISSING",
            TaskResult::OutputMissing => "OUTPUT_MISSING",
            TaskResult::StdoutMissing => "STDOUT_MISSING",
            TaskResult::Signal => "SIGNAL",
            TaskResult::ResourceExhaustion => "RESOURCE_EXHAUSTION",
            TaskResult::MaxEndTime => "MAX_END_TIME",
            TaskResult::Unknown => "UNKNOWN",
            TaskResult::Forsaken => "FORSAKEN",
            TaskResult::MaxRetries => "MAX_RETRIES",
            TaskResult::MaxWallTime => "MAX_WALL_TIME",
            TaskResult::MonitorError => "MONITOR_ERROR",
            TaskResult::OutputTransferError => "OUTPUT_TRANSFER_ERROR",
            TaskResult::FixedLocationMissing => "FIXED_LOCATION_MISSING",
            TaskResult::Cancelled => "CANCELLED",
            TaskResult::LibraryExit => "LIBRARY_EXIT",
        };
        f.write_str(s)
    }
}

/// Policy used by the placement layer to choose a worker for the task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    /// Use the manager-wide policy.
    #[default]
    Unset,
    Fcfs,
    Files,
    Time,
    Rand,
    Worst,
    Disk,
}

/// Unit of work dispatched to workers.
///
/// Submission fields are set through the setters while the caller owns the task. Once submitted, the task is owned by
/// the [`Manager`](crate::manager::Manager) and only read access is given out.
#[derive(Debug)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) task_type: TaskType,
    pub(crate) command_line: String,
    pub(crate) tag: Option<String>,
    pub(crate) category: String,
    pub(crate) monitor_output_directory: Option<PathBuf>,

    pub(crate) needs_library: Option<String>,
    pub(crate) provides_library: Option<String>,
    /// Requested function slots, -1 to match the number of requested cores.
    pub(crate) function_slots_requested: i32,
    pub(crate) func_exec_mode: FuncExecMode,

    pub(crate) input_mounts: Vec<Mount>,
    pub(crate) output_mounts: Vec<Mount>,
    pub(crate) env: Vec<(String, Option<String>)>,
    pub(crate) features: Vec<String>,

    pub(crate) resources_requested: ResourceSummary,
    pub(crate) schedule: Schedule,
    pub(crate) priority: f64,
    pub(crate) max_retries: i32,
    pub(crate) max_forsaken: i32,
    pub(crate) min_running_time: i64,
    /// Total size of inputs in bytes, -1 if the size of some input is unknown.
    pub(crate) input_files_size: i64,

    pub(crate) state: TaskState,
    pub(crate) worker: Option<WorkerId>,
    pub(crate) library_task: Option<TaskId>,
    pub(crate) library_log_path: Option<PathBuf>,
    /// Set when the outcome of the current attempt has been recorded.
    pub(crate) outcome_recorded: bool,
    pub(crate) try_count: u32,
    pub(crate) forsaken_count: u32,
    pub(crate) library_failed_count: u32,
    pub(crate) exhausted_attempts: u32,
    pub(crate) forsaken_attempts: u32,
    pub(crate) workers_slow: u32,
    pub(crate) function_slots_total: u32,
    pub(crate) function_slots_inuse: u32,

    pub(crate) result: TaskResult,
    pub(crate) exit_code: i32,
    /// Standard output, `None` until received.
    pub(crate) output: Option<String>,
    pub(crate) addrport: Option<String>,
    pub(crate) hostname: Option<String>,

    pub(crate) metrics: TaskMetrics,
    pub(crate) resources_allocated: Option<ResourceSummary>,
    pub(crate) resources_measured: Option<ResourceSummary>,
    pub(crate) current_resource_box: Option<ResourceSummary>,
    pub(crate) sandbox_measured: Option<f64>,

    pub(crate) has_fixed_locations: bool,
    pub(crate) group_id: u32,
}

impl Task {
    /// Creates new standard task running the given shell command.
    pub fn new(command_line: &str) -> Self {
        Self {
            id: 0,
            task_type: TaskType::Standard,
            command_line: command_line.to_string(),
            tag: None,
            category: "default".to_string(),
            monitor_output_directory: None,
            needs_library: None,
            provides_library: None,
            function_slots_requested: -1,
            func_exec_mode: FuncExecMode::default(),
            input_mounts: Vec::new(),
            output_mounts: Vec::new(),
            env: Vec::new(),
            features: Vec::new(),
            resources_requested: ResourceSummary::default(),
            schedule: Schedule::default(),
            priority: 0.,
            max_retries: 0,
            max_forsaken: 0,
            min_running_time: 0,
            input_files_size: 0,
            state: TaskState::Initial,
            worker: None,
            library_task: None,
            library_log_path: None,
            outcome_recorded: false,
            try_count: 0,
            forsaken_count: 0,
            library_failed_count: 0,
            exhausted_attempts: 0,
            forsaken_attempts: 0,
            workers_slow: 0,
            function_slots_total: 0,
            function_slots_inuse: 0,
            result: TaskResult::Unknown,
            exit_code: 0,
            output: None,
            addrport: None,
            hostname: None,
            metrics: TaskMetrics::default(),
            resources_allocated: None,
            resources_measured: None,
            current_resource_box: None,
            sandbox_measured: None,
            has_fixed_locations: false,
            group_id: 0,
        }
    }

    /// Creates new library template providing the library `name`.
    pub fn new_library(name: &str, command_line: &str) -> Self {
        let mut task = Self::new(command_line);
        task.task_type = TaskType::LibraryTemplate;
        task.provides_library = Some(name.to_string());
        task
    }

    /// Creates new function task to be executed by the library `library`.
    pub fn new_function_call(library: &str, command_line: &str) -> Self {
        let mut task = Self::new(command_line);
        task.needs_library = Some(library.to_string());
        task
    }

    /// Returns an independent copy of the task with the same submission fields.
    ///
    /// Mount lists, environment, features and resource request are duplicated, files are shared. Attempt state,
    /// counters, results and metrics start from scratch.
    pub fn copy(&self) -> Task {
        let mut task = Task::new(&self.command_line);
        task.task_type = self.task_type;
        task.tag = self.tag.clone();
        task.category = self.category.clone();
        task.monitor_output_directory = self.monitor_output_directory.clone();
        task.needs_library = self.needs_library.clone();
        task.provides_library = self.provides_library.clone();
        task.function_slots_requested = self.function_slots_requested;
        task.func_exec_mode = self.func_exec_mode;
        task.input_mounts = self.input_mounts.clone();
        task.output_mounts = self.output_mounts.clone();
        task.env = self.env.clone();
        task.features = self.features.clone();
        task.resources_requested = self.resources_requested.clone();
        task.schedule = self.schedule;
        task.priority = self.priority;
        task.max_retries = self.max_retries;
        task.max_forsaken = self.max_forsaken;
        task.min_running_time = self.min_running_time;
        task.input_files_size = self.input_files_size;
        task.has_fixed_locations = self.has_fixed_locations;
        task
    }

    // SETTERS ---------------------------------------------------------------------------------------------------------

    pub fn set_tag(&mut self, tag: &str) -> &mut Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn set_category(&mut self, category: &str) -> &mut Self {
        self.category = category.to_string();
        self
    }

    pub fn set_priority(&mut self, priority: f64) -> &mut Self {
        self.priority = priority;
        self
    }

    /// Sets the number of attempts after which the task is returned with the result of the last one.
    /// Values less than one mean unlimited retries.
    pub fn set_max_retries(&mut self, max_retries: i32) -> &mut Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the number of times the task may be dispatched without starting before it is returned as forsaken.
    /// Values less than one mean no limit.
    pub fn set_max_forsaken(&mut self, max_forsaken: i32) -> &mut Self {
        self.max_forsaken = max_forsaken;
        self
    }

    pub fn set_min_running_time(&mut self, seconds: i64) -> &mut Self {
        self.min_running_time = seconds;
        self
    }

    /// Sets the resources requested for the task.
    pub fn request_resources(&mut self, resources: ResourceSummary) -> &mut Self {
        self.resources_requested = resources;
        self
    }

    pub fn set_schedule(&mut self, schedule: Schedule) -> &mut Self {
        self.schedule = schedule;
        self
    }

    /// Sets an environment variable, `None` unsets it in the task environment.
    pub fn set_env_var(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        self.env.push((name.to_string(), value.map(|v| v.to_string())));
        self
    }

    pub fn add_feature(&mut self, feature: &str) -> &mut Self {
        self.features.push(feature.to_string());
        self
    }

    pub fn set_monitor_output_directory(&mut self, dir: &Path) -> &mut Self {
        self.monitor_output_directory = Some(dir.to_path_buf());
        self
    }

    /// Sets the number of functions a library instance runs concurrently, -1 to match the number of cores.
    pub fn set_function_slots(&mut self, slots: i32) -> &mut Self {
        self.function_slots_requested = slots;
        self
    }

    pub fn set_exec_mode(&mut self, mode: FuncExecMode) -> &mut Self {
        self.func_exec_mode = mode;
        self
    }

    /// Sets the execution mode by name, see [`FuncExecMode::from_str`].
    pub fn set_exec_mode_str(&mut self, mode: &str) -> Result<&mut Self, VineError> {
        self.func_exec_mode = mode.parse()?;
        Ok(self)
    }

    // MOUNTS ----------------------------------------------------------------------------------------------------------

    /// Mounts a declared file as input.
    pub fn add_input(&mut self, file: Rc<VineFile>, remote_name: &str, flags: MountFlags) -> &mut Self {
        match file.size {
            Some(size) if self.input_files_size >= 0 => self.input_files_size += size as i64,
            Some(_) => {}
            None => self.input_files_size = -1,
        }
        if flags.contains(MountFlags::FIXED_LOCATION) {
            self.has_fixed_locations = true;
        }
        self.input_mounts.push(Mount::new(file, remote_name, flags));
        self
    }

    /// Mounts a declared file as output.
    pub fn add_output(&mut self, file: Rc<VineFile>, remote_name: &str, flags: MountFlags) -> &mut Self {
        self.output_mounts.push(Mount::new(file, remote_name, flags));
        self
    }

    pub fn add_input_file(&mut self, local_name: &str, remote_name: &str, flags: MountFlags) -> &mut Self {
        self.add_input(VineFile::local(local_name), remote_name, flags)
    }

    pub fn add_output_file(&mut self, local_name: &str, remote_name: &str, flags: MountFlags) -> &mut Self {
        self.add_output(VineFile::local(local_name), remote_name, flags)
    }

    pub fn add_input_url(&mut self, url: &str, remote_name: &str, flags: MountFlags) -> &mut Self {
        self.add_input(VineFile::url(url), remote_name, flags)
    }

    pub fn add_input_mini_task(&mut self, mini_task: Task, remote_name: &str, flags: MountFlags) -> &mut Self {
        self.add_input(VineFile::mini_task(mini_task), remote_name, flags)
    }

    pub fn add_input_buffer(&mut self, data: &[u8], remote_name: &str, flags: MountFlags) -> &mut Self {
        self.add_input(VineFile::buffer(data), remote_name, flags)
    }

    // GETTERS ---------------------------------------------------------------------------------------------------------

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub fn max_forsaken(&self) -> i32 {
        self.max_forsaken
    }

    pub fn input_mounts(&self) -> &[Mount] {
        &self.input_mounts
    }

    /// Mutable access to input mounts, available only while the caller owns the task.
    pub fn input_mounts_mut(&mut self) -> &mut Vec<Mount> {
        &mut self.input_mounts
    }

    pub fn output_mounts(&self) -> &[Mount] {
        &self.output_mounts
    }

    pub fn output_mounts_mut(&mut self) -> &mut Vec<Mount> {
        &mut self.output_mounts
    }

    pub fn env(&self) -> &[(String, Option<String>)] {
        &self.env
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn resources_requested(&self) -> &ResourceSummary {
        &self.resources_requested
    }

    pub fn resources_allocated(&self) -> Option<&ResourceSummary> {
        self.resources_allocated.as_ref()
    }

    pub fn resources_measured(&self) -> Option<&ResourceSummary> {
        self.resources_measured.as_ref()
    }

    pub fn current_resource_box(&self) -> Option<&ResourceSummary> {
        self.current_resource_box.as_ref()
    }

    pub fn sandbox_measured(&self) -> Option<f64> {
        self.sandbox_measured
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn input_files_size(&self) -> i64 {
        self.input_files_size
    }

    pub fn needs_library(&self) -> Option<&str> {
        self.needs_library.as_deref()
    }

    pub fn provides_library(&self) -> Option<&str> {
        self.provides_library.as_deref()
    }

    pub fn exec_mode(&self) -> FuncExecMode {
        self.func_exec_mode
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    pub fn library_task(&self) -> Option<TaskId> {
        self.library_task
    }

    pub fn try_count(&self) -> u32 {
        self.try_count
    }

    pub fn forsaken_count(&self) -> u32 {
        self.forsaken_count
    }

    pub fn library_failed_count(&self) -> u32 {
        self.library_failed_count
    }

    pub fn exhausted_attempts(&self) -> u32 {
        self.exhausted_attempts
    }

    pub fn forsaken_attempts(&self) -> u32 {
        self.forsaken_attempts
    }

    pub fn workers_slow(&self) -> u32 {
        self.workers_slow
    }

    pub fn function_slots_total(&self) -> u32 {
        self.function_slots_total
    }

    pub fn function_slots_inuse(&self) -> u32 {
        self.function_slots_inuse
    }

    pub fn result(&self) -> TaskResult {
        self.result
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn addrport(&self) -> Option<&str> {
        self.addrport.as_deref()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }

    pub fn has_fixed_locations(&self) -> bool {
        self.has_fixed_locations
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    pub fn library_log_path(&self) -> Option<&Path> {
        self.library_log_path.as_deref()
    }

    pub fn is_function(&self) -> bool {
        self.needs_library.is_some()
    }

    pub fn is_library(&self) -> bool {
        matches!(self.task_type, TaskType::LibraryTemplate | TaskType::LibraryInstance)
    }

    /// Returns true for tasks created by the manager that are never returned to the user.
    pub fn is_internal(&self) -> bool {
        self.task_type != TaskType::Standard
    }

    /// Returns names of the temporary files consumed by the task.
    pub fn temp_inputs(&self) -> impl Iterator<Item = &str> {
        self.input_mounts
            .iter()
            .filter(|m| m.file.is_temp())
            .map(|m| m.file.cached_name.as_str())
    }

    /// Returns names of the temporary files produced by the task.
    pub fn temp_outputs(&self) -> impl Iterator<Item = &str> {
        self.output_mounts
            .iter()
            .filter(|m| m.file.is_temp())
            .map(|m| m.file.cached_name.as_str())
    }
}
