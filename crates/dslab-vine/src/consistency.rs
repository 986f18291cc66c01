//! Structural checks run before a task leaves the initial state.

use std::collections::HashSet;
use std::fs::OpenOptions;

use log::debug;

use crate::error::{Result, VineError};
use crate::mount::{Direction, FileSource, Mount, MountFlags};
use crate::task::{Task, TaskType};

fn check_unique(task: &Task, mounts: &[Mount], direction: Direction) -> Result<()> {
    let mut names = HashSet::new();
    for mount in mounts {
        if !names.insert(mount.remote_name.as_str()) {
            return Err(VineError::DuplicateRemoteName {
                task_id: task.id,
                remote_name: mount.remote_name.clone(),
                direction,
            });
        }
    }
    Ok(())
}

impl Task {
    /// Checks mounts and role-specific fields of the task.
    ///
    /// Rejects duplicate remote names within inputs or outputs, remote names used both as input and output, fixed
    /// location inputs of a task not marked as having them, and library fields set on tasks of the wrong kind.
    pub fn check_consistency(&self) -> Result<()> {
        check_unique(self, &self.input_mounts, Direction::Input)?;
        check_unique(self, &self.output_mounts, Direction::Output)?;

        let outputs: HashSet<&str> = self.output_mounts.iter().map(|m| m.remote_name.as_str()).collect();
        for mount in self.input_mounts.iter() {
            if outputs.contains(mount.remote_name.as_str()) {
                return Err(VineError::InputOutputCollision {
                    task_id: self.id,
                    remote_name: mount.remote_name.clone(),
                });
            }
            if mount.is_fixed_location() && !self.has_fixed_locations {
                return Err(VineError::FixedLocationUnflagged {
                    task_id: self.id,
                    remote_name: mount.remote_name.clone(),
                });
            }
        }

        self.check_roles()
    }

    fn check_roles(&self) -> Result<()> {
        let invalid = |reason: &'static str| -> Result<()> {
            Err(VineError::InvalidLibraryFields {
                task_id: self.id,
                reason,
            })
        };
        match self.task_type {
            TaskType::LibraryTemplate | TaskType::LibraryInstance => {
                if self.provides_library.is_none() {
                    return invalid("library task must provide a library");
                }
                if self.needs_library.is_some() {
                    return invalid("library task can't require a library");
                }
                if self.function_slots_requested == 0 || self.function_slots_requested < -1 {
                    return invalid("library task must request a positive number of slots or -1");
                }
            }
            TaskType::Standard | TaskType::Recovery => {
                if self.provides_library.is_some() {
                    return invalid("only library tasks provide a library");
                }
            }
        }
        if self.task_type != TaskType::LibraryInstance && (self.function_slots_total > 0 || self.function_slots_inuse > 0)
        {
            return invalid("function slots are only valid for library instances");
        }
        Ok(())
    }

    /// Truncates local files mounted as watched outputs.
    ///
    /// Watched outputs are streamed into the local file while the task runs. The file is emptied when the task is
    /// submitted and when a failed attempt is abandoned for a retry, so that the next attempt streams from the start.
    pub fn truncate_watched_outputs(&self) -> Result<()> {
        for mount in self.output_mounts.iter() {
            if !mount.flags.contains(MountFlags::WATCH) {
                continue;
            }
            if let FileSource::Local(path) = &mount.file.source {
                debug!("[task {}] truncating watched output {}", self.id, path.display());
                OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
            }
        }
        Ok(())
    }
}
