//! Files and their mounts into task sandboxes.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;

use serde::Serialize;

use crate::error::VineError;
use crate::task::Task;

/// Flags attached to a mount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct MountFlags(u32);

impl MountFlags {
    pub const NONE: Self = Self(0);
    /// Keep the file in the worker cache after the task is done.
    pub const CACHE: Self = Self(1);
    /// Output is streamed to the manager while the task runs. The local copy restarts empty with every attempt.
    pub const WATCH: Self = Self(1 << 1);
    /// Output is retrieved only if the task fails.
    pub const FAILURE_ONLY: Self = Self(1 << 2);
    /// Output is retrieved only if the task succeeds.
    pub const SUCCESS_ONLY: Self = Self(1 << 3);
    /// Output is removed when the task is reset.
    pub const RETRACT_ON_RESET: Self = Self(1 << 4);
    /// Input must already be present at the worker running the task, it is never transferred.
    pub const FIXED_LOCATION: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl FromStr for MountFlags {
    type Err = VineError;

    /// Parses a single flag name, e.g. `fixed_location`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MountFlags::NONE),
            "cache" => Ok(MountFlags::CACHE),
            "watch" => Ok(MountFlags::WATCH),
            "failure_only" => Ok(MountFlags::FAILURE_ONLY),
            "success_only" => Ok(MountFlags::SUCCESS_ONLY),
            "retract_on_reset" => Ok(MountFlags::RETRACT_ON_RESET),
            "fixed_location" => Ok(MountFlags::FIXED_LOCATION),
            _ => Err(VineError::InvalidMountFlag(s.to_string())),
        }
    }
}

impl BitOr for MountFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MountFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// How long a file is kept in worker caches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    #[default]
    Task,
    Workflow,
    Worker,
    Forever,
}

/// Where the content of a file comes from.
#[derive(Debug)]
pub enum FileSource {
    /// File in the manager's filesystem.
    Local(PathBuf),
    /// File downloaded by the worker.
    Url(String),
    /// Data held in memory by the manager.
    Buffer(Vec<u8>),
    /// File produced at the worker by running a task.
    MiniTask(Box<Task>),
    /// Manager-internal file that lives only in worker caches and is never brought back.
    Temp,
}

impl FileSource {
    pub fn kind(&self) -> &'static str {
        match self {
            FileSource::Local(_) => "local",
            FileSource::Url(_) => "url",
            FileSource::Buffer(_) => "buffer",
            FileSource::MiniTask(_) => "mini_task",
            FileSource::Temp => "temp",
        }
    }
}

/// File declared to the manager.
///
/// Files are shared between the tasks that mount them, the cached name identifies the file in worker caches.
#[derive(Debug)]
pub struct VineFile {
    pub source: FileSource,
    pub cached_name: String,
    /// Size in bytes, if known.
    pub size: Option<u64>,
    pub cache_level: CacheLevel,
}

fn content_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash of what a mini task produces: its command and the files mounted into it.
fn mini_task_hash(task: &Task) -> u64 {
    let mut hasher = DefaultHasher::new();
    task.command_line().hash(&mut hasher);
    for (mounts, direction) in [(task.input_mounts(), 0u8), (task.output_mounts(), 1u8)] {
        for mount in mounts {
            direction.hash(&mut hasher);
            mount.file.cached_name.hash(&mut hasher);
            mount.remote_name.hash(&mut hasher);
            mount.flags.hash(&mut hasher);
        }
    }
    hasher.finish()
}

impl VineFile {
    /// Declares a local file. The size is taken from the filesystem if the file exists.
    pub fn local(path: impl Into<PathBuf>) -> Rc<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path).ok().map(|m| m.len());
        Rc::new(Self {
            cached_name: format!("file-{:016x}", content_hash(&path)),
            source: FileSource::Local(path),
            size,
            cache_level: CacheLevel::default(),
        })
    }

    pub fn url(url: &str) -> Rc<Self> {
        Rc::new(Self {
            cached_name: format!("url-{:016x}", content_hash(url)),
            source: FileSource::Url(url.to_string()),
            size: None,
            cache_level: CacheLevel::default(),
        })
    }

    pub fn buffer(data: &[u8]) -> Rc<Self> {
        Rc::new(Self {
            cached_name: format!("buffer-{:016x}", content_hash(data)),
            source: FileSource::Buffer(data.to_vec()),
            size: Some(data.len() as u64),
            cache_level: CacheLevel::default(),
        })
    }

    /// Declares a file produced by running `task` at the worker.
    pub fn mini_task(task: Task) -> Rc<Self> {
        Rc::new(Self {
            cached_name: format!("task-{:016x}", mini_task_hash(&task)),
            source: FileSource::MiniTask(Box::new(task)),
            size: None,
            cache_level: CacheLevel::default(),
        })
    }

    /// Declares a temporary file with the given unique name.
    pub fn temp(cached_name: &str) -> Rc<Self> {
        Rc::new(Self {
            cached_name: cached_name.to_string(),
            source: FileSource::Temp,
            size: None,
            cache_level: CacheLevel::Workflow,
        })
    }

    pub fn is_temp(&self) -> bool {
        matches!(self.source, FileSource::Temp)
    }
}

/// Binding of a file to a name inside the task sandbox.
#[derive(Clone, Debug)]
pub struct Mount {
    pub file: Rc<VineFile>,
    pub remote_name: String,
    pub flags: MountFlags,
}

impl Mount {
    pub fn new(file: Rc<VineFile>, remote_name: &str, flags: MountFlags) -> Self {
        Self {
            file,
            remote_name: remote_name.to_string(),
            flags,
        }
    }

    pub fn is_fixed_location(&self) -> bool {
        self.flags.contains(MountFlags::FIXED_LOCATION)
    }
}
