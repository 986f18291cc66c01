use std::collections::HashMap;
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use env_logger::Builder;
use serde::{Deserialize, Serialize};

use dslab_vine::config::{ManagerConfig, RawConfig};
use dslab_vine::manager::{AttemptReport, Manager};
use dslab_vine::mount::{MountFlags, VineFile};
use dslab_vine::resources::ResourceSummary;
use dslab_vine::snapshot::TaskSnapshot;
use dslab_vine::task::{FuncExecMode, Task, TaskId, TaskResult};
use dslab_vine::worker::{WorkerId, WorkerInfo};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Replays a recorded sequence of worker events against the task manager
struct Args {
    /// Path to YAML file with the scenario
    #[arg(short, long)]
    scenario: PathBuf,

    /// Path to produced JSON file with task snapshots
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Deserialize)]
struct Scenario {
    #[serde(default)]
    config: Option<RawConfig>,
    #[serde(default)]
    workers: Vec<WorkerSpec>,
    #[serde(default)]
    libraries: Vec<LibrarySpec>,
    #[serde(default)]
    tasks: Vec<TaskSpec>,
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Deserialize)]
struct WorkerSpec {
    hostname: String,
    addrport: String,
    #[serde(default)]
    resources: ResourceSummary,
    #[serde(default)]
    cached_files: Vec<String>,
}

#[derive(Deserialize)]
struct LibrarySpec {
    name: String,
    command: String,
    #[serde(default = "default_slots")]
    slots: i32,
    #[serde(default)]
    exec_mode: FuncExecMode,
    #[serde(default)]
    resources: ResourceSummary,
}

fn default_slots() -> i32 {
    -1
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum SourceSpec {
    File(String),
    Url(String),
    Buffer(String),
    Temp(String),
}

#[derive(Deserialize)]
struct MountSpec {
    source: SourceSpec,
    remote_name: String,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Deserialize)]
struct TaskSpec {
    name: String,
    command: String,
    /// Library serving the call, makes the task a function call.
    #[serde(default)]
    library: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    priority: f64,
    #[serde(default)]
    max_retries: i32,
    #[serde(default)]
    max_forsaken: i32,
    #[serde(default)]
    resources: ResourceSummary,
    #[serde(default)]
    inputs: Vec<MountSpec>,
    #[serde(default)]
    outputs: Vec<MountSpec>,
    #[serde(default)]
    submit_time: u64,
}

#[derive(Deserialize)]
struct Event {
    time: u64,
    #[serde(flatten)]
    action: Action,
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    Dispatch {
        task: String,
        worker: String,
        #[serde(default)]
        resources: ResourceSummary,
    },
    DispatchFunction {
        task: String,
    },
    Start {
        task: String,
    },
    Result {
        task: String,
        result: TaskResult,
        #[serde(default)]
        exit_code: i32,
        #[serde(default)]
        output: Option<String>,
    },
    Forsaken {
        task: String,
    },
    Slow {
        task: String,
    },
    Retrieve {
        task: String,
    },
    Cancel {
        task: String,
    },
    Disconnect {
        worker: String,
    },
    /// Creates an instance of the library and registers it under `name` for later events.
    Instantiate {
        library: String,
        name: String,
    },
    FailUnplaceable,
}

#[derive(Serialize)]
struct ReplayResults {
    completed: Vec<String>,
    tasks: Vec<TaskSnapshot>,
}

fn parse_flags(flags: &[String]) -> Result<MountFlags, Box<dyn Error>> {
    let mut parsed = MountFlags::NONE;
    for flag in flags {
        parsed |= flag.parse::<MountFlags>()?;
    }
    Ok(parsed)
}

fn build_task(spec: &TaskSpec) -> Result<Task, Box<dyn Error>> {
    let mut task = match &spec.library {
        Some(library) => Task::new_function_call(library, &spec.command),
        None => Task::new(&spec.command),
    };
    task.set_tag(&spec.name)
        .set_priority(spec.priority)
        .set_max_retries(spec.max_retries)
        .set_max_forsaken(spec.max_forsaken)
        .request_resources(spec.resources.clone());
    if let Some(category) = &spec.category {
        task.set_category(category);
    }
    for (mounts, is_input) in [(&spec.inputs, true), (&spec.outputs, false)] {
        for mount in mounts {
            let file = match &mount.source {
                SourceSpec::File(path) => VineFile::local(path),
                SourceSpec::Url(url) => VineFile::url(url),
                SourceSpec::Buffer(data) => VineFile::buffer(data.as_bytes()),
                SourceSpec::Temp(name) => VineFile::temp(name),
            };
            let flags = parse_flags(&mount.flags)?;
            if is_input {
                task.add_input(file, &mount.remote_name, flags);
            } else {
                task.add_output(file, &mount.remote_name, flags);
            }
        }
    }
    Ok(task)
}

struct Replay {
    manager: Manager,
    tasks: HashMap<String, TaskId>,
    workers: HashMap<String, WorkerId>,
    completed: Vec<String>,
}

impl Replay {
    fn task(&self, name: &str) -> Result<TaskId, Box<dyn Error>> {
        self.tasks
            .get(name)
            .copied()
            .ok_or_else(|| format!("unknown task {:?} in scenario", name).into())
    }

    fn worker(&self, hostname: &str) -> Result<WorkerId, Box<dyn Error>> {
        self.workers
            .get(hostname)
            .copied()
            .ok_or_else(|| format!("unknown worker {:?} in scenario", hostname).into())
    }

    fn name_of(&self, id: TaskId) -> String {
        self.tasks
            .iter()
            .find(|(_, task_id)| **task_id == id)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn apply(&mut self, event: Event) -> Result<(), Box<dyn Error>> {
        let now = event.time;
        match event.action {
            Action::Dispatch {
                task,
                worker,
                resources,
            } => {
                let (id, worker) = (self.task(&task)?, self.worker(&worker)?);
                self.manager.dispatch(id, worker, &resources, now)?;
            }
            Action::DispatchFunction { task } => {
                let id = self.task(&task)?;
                if self.manager.dispatch_function(id, now)?.is_none() {
                    log::info!("[{}] function {} waits for a free slot", now, task);
                }
            }
            Action::Start { task } => {
                let id = self.task(&task)?;
                self.manager.started(id, now)?;
            }
            Action::Result {
                task,
                result,
                exit_code,
                output,
            } => {
                let mut report = AttemptReport::new(result).with_exit_code(exit_code);
                if let Some(output) = &output {
                    report = report.with_output(output);
                }
                let id = self.task(&task)?;
                let disposition = self.manager.attempt_result(id, report, now)?;
                log::info!("[{}] {} reported {}: {:?}", now, task, result, disposition);
            }
            Action::Forsaken { task } => {
                let id = self.task(&task)?;
                self.manager.forsaken(id, now)?;
            }
            Action::Slow { task } => {
                let id = self.task(&task)?;
                self.manager.terminate_slow(id, now)?;
            }
            Action::Retrieve { task } => {
                let id = self.task(&task)?;
                self.manager.retrieved(id, now)?;
            }
            Action::Cancel { task } => {
                let id = self.task(&task)?;
                self.manager.cancel(id, now)?;
            }
            Action::Disconnect { worker } => {
                let id = self.worker(&worker)?;
                let lost = self.manager.worker_disconnected(id, now)?;
                log::info!("[{}] worker {} left with {} tasks", now, worker, lost.len());
                self.workers.remove(&worker);
            }
            Action::Instantiate { library, name } => match self.manager.instantiate_library(&library, now)? {
                Some(id) => {
                    self.tasks.insert(name, id);
                }
                None => log::warn!("[{}] library {} can not be instantiated", now, library),
            },
            Action::FailUnplaceable => {
                self.manager.fail_unplaceable_tasks(now)?;
            }
        }
        while let Some(id) = self.manager.wait(now)? {
            let name = self.name_of(id);
            log::info!("[{}] task {} is done: {}", now, name, self.manager.task(id)?.result());
            self.completed.push(name);
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let scenario: Scenario = serde_yaml::from_str(&std::fs::read_to_string(&args.scenario)?)?;

    let mut replay = Replay {
        manager: Manager::new(scenario.config.map(ManagerConfig::from_raw).unwrap_or_default()),
        tasks: HashMap::new(),
        workers: HashMap::new(),
        completed: Vec::new(),
    };
    for spec in scenario.workers {
        let mut info = WorkerInfo::new(&spec.hostname, &spec.addrport, spec.resources);
        info.cached_files.extend(spec.cached_files);
        let id = replay.manager.add_worker(info);
        replay.workers.insert(spec.hostname, id);
    }
    for spec in scenario.libraries {
        let mut template = Task::new_library(&spec.name, &spec.command);
        template
            .set_function_slots(spec.slots)
            .set_exec_mode(spec.exec_mode)
            .request_resources(spec.resources);
        replay.manager.submit(template, 0)?;
    }
    for spec in &scenario.tasks {
        let id = replay.manager.submit(build_task(spec)?, spec.submit_time)?;
        replay.tasks.insert(spec.name.clone(), id);
    }
    for event in scenario.events {
        replay.apply(event)?;
    }

    let results = ReplayResults {
        completed: replay.completed,
        tasks: replay
            .manager
            .task_ids()
            .into_iter()
            .map(|id| replay.manager.snapshot(id))
            .collect::<Result<_, _>>()?,
    };
    let output = args.output.unwrap_or_else(|| args.scenario.with_extension("json"));
    std::fs::File::create(output)?.write_all(serde_json::to_string_pretty(&results)?.as_bytes())?;
    Ok(())
}
