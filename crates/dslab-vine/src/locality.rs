//! Locality groups of tasks linked by temporary files.
//!
//! Temporary files live only in worker caches, so a task consuming one is cheapest to run where its producer ran.
//! Tasks are grouped following these dependencies and the placement layer may use the group id to co-locate them.

use std::collections::HashMap;

use crate::task::{Task, TaskId};

/// Assigns group ids to tasks in submission order. Group 0 means "no group".
#[derive(Default)]
pub struct LocalityGroups {
    producers: HashMap<String, TaskId>,
    groups: HashMap<TaskId, u32>,
    next_group: u32,
}

impl LocalityGroups {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_group(&mut self) -> u32 {
        self.next_group += 1;
        self.next_group
    }

    /// Registers a submitted task and returns the group ids to apply.
    ///
    /// A task consuming a temporary file of an already registered producer joins the producer's group, which is
    /// created on first use. The returned list may therefore contain the producer as well.
    pub fn assign(&mut self, task: &Task) -> Vec<(TaskId, u32)> {
        let mut updates = Vec::new();
        let mut group = 0;
        for name in task.temp_inputs() {
            if let Some(&producer) = self.producers.get(name) {
                if producer == task.id() {
                    continue;
                }
                group = match self.groups.get(&producer) {
                    Some(&g) => g,
                    None => {
                        let g = self.new_group();
                        self.groups.insert(producer, g);
                        updates.push((producer, g));
                        g
                    }
                };
                break;
            }
        }
        for name in task.temp_outputs() {
            self.producers.insert(name.to_string(), task.id());
        }
        if group > 0 {
            self.groups.insert(task.id(), group);
            updates.push((task.id(), group));
        }
        updates
    }

    pub fn group_of(&self, task_id: TaskId) -> u32 {
        self.groups.get(&task_id).copied().unwrap_or(0)
    }

    /// Forgets a task removed from the manager.
    pub fn forget(&mut self, task_id: TaskId) {
        self.groups.remove(&task_id);
        self.producers.retain(|_, producer| *producer != task_id);
    }
}
