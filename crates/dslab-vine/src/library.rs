//! Libraries and function slots.
//!
//! A library instance is a long running task exposing a fixed number of function slots. Function tasks needing the
//! library are admitted to an instance with a free slot and hold it until their attempt ends, whatever the outcome.
//! Functions that can't be admitted wait in a per-library queue and are served in arrival order.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};

use crate::error::{Result, VineError};
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskId, TaskState, TaskType};

impl Task {
    /// Turns a copy of a library template into an instance and sizes its function slots.
    ///
    /// A request of -1 slots gives one slot per requested core, at least one.
    pub(crate) fn make_instance(&mut self) {
        self.task_type = TaskType::LibraryInstance;
        self.function_slots_total = if self.function_slots_requested > 0 {
            self.function_slots_requested as u32
        } else {
            self.resources_requested
                .cores
                .map(|cores| cores.ceil() as u32)
                .unwrap_or(1)
                .max(1)
        };
        self.function_slots_inuse = 0;
    }

    pub fn has_free_slot(&self) -> bool {
        self.task_type == TaskType::LibraryInstance && self.function_slots_inuse < self.function_slots_total
    }

    fn acquire_slot(&mut self) {
        debug_assert!(self.has_free_slot());
        self.function_slots_inuse += 1;
    }

    fn release_slot(&mut self) {
        if self.function_slots_inuse == 0 {
            warn!("[task {}] releasing a function slot of an idle library", self.id);
            return;
        }
        self.function_slots_inuse -= 1;
    }
}

/// Bookkeeping of library templates, their instances and the functions waiting for a slot.
#[derive(Default)]
pub struct Libraries {
    templates: IndexMap<String, TaskId>,
    instances: IndexMap<String, IndexSet<TaskId>>,
    waiting: IndexMap<String, VecDeque<TaskId>>,
}

impl Libraries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&mut self, name: &str, template_id: TaskId) {
        self.templates.insert(name.to_string(), template_id);
    }

    pub fn template(&self, name: &str) -> Option<TaskId> {
        self.templates.get(name).copied()
    }

    pub fn add_instance(&mut self, name: &str, instance_id: TaskId) {
        self.instances.entry(name.to_string()).or_default().insert(instance_id);
    }

    pub fn remove_instance(&mut self, name: &str, instance_id: TaskId) {
        if let Some(instances) = self.instances.get_mut(name) {
            instances.shift_remove(&instance_id);
        }
    }

    /// Returns the instances of a library in creation order.
    pub fn instances(&self, name: &str) -> Vec<TaskId> {
        self.instances
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the functions waiting for a slot of the library, in arrival order.
    pub fn waiting(&self, name: &str) -> Vec<TaskId> {
        self.waiting
            .get(name)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes a function from the waiting queue, e.g. when it is cancelled.
    pub fn remove_waiting(&mut self, name: &str, function_id: TaskId) {
        if let Some(queue) = self.waiting.get_mut(name) {
            queue.retain(|id| *id != function_id);
        }
    }

    fn enqueue(&mut self, name: &str, function_id: TaskId) {
        let queue = self.waiting.entry(name.to_string()).or_default();
        if !queue.contains(&function_id) {
            queue.push_back(function_id);
        }
    }

    /// Returns the first running instance of the library with a free slot.
    pub fn find_instance(&self, name: &str, registry: &TaskRegistry) -> Option<TaskId> {
        self.instances.get(name)?.iter().copied().find(|id| {
            registry.get(*id).map_or(false, |instance| {
                let instance = instance.borrow();
                instance.state() == TaskState::Running && instance.has_free_slot()
            })
        })
    }

    /// Returns the function that gets the next free slot of the library.
    ///
    /// Functions no longer waiting for dispatch are dropped from the queue.
    pub fn next_waiting(&mut self, name: &str, registry: &TaskRegistry) -> Option<TaskId> {
        let queue = self.waiting.get_mut(name)?;
        while let Some(&id) = queue.front() {
            let pending = registry.get(id).map_or(false, |task| {
                let task = task.borrow();
                task.state() == TaskState::Ready && task.worker().is_none()
            });
            if pending {
                return Some(id);
            }
            queue.pop_front();
        }
        None
    }

    /// Tries to admit a function task to an instance of its library.
    ///
    /// Returns the instance on success. Otherwise the function joins the waiting queue of the library and `None` is
    /// returned. A function can't overtake functions that arrived before it.
    pub fn admit(&mut self, function_id: TaskId, registry: &TaskRegistry) -> Result<Option<TaskId>> {
        let function = registry.get(function_id)?;
        let name = match function.borrow().needs_library() {
            Some(name) => name.to_string(),
            None => return Err(VineError::NotAFunction(function_id)),
        };
        if let Some(instance) = function.borrow().library_task() {
            return Ok(Some(instance));
        }
        if !self.templates.contains_key(&name) && !self.instances.contains_key(&name) {
            return Err(VineError::UnknownLibrary(name));
        }
        if let Some(head) = self.next_waiting(&name, registry) {
            if head != function_id {
                self.enqueue(&name, function_id);
                return Ok(None);
            }
        }
        match self.find_instance(&name, registry) {
            Some(instance_id) => {
                self.remove_waiting(&name, function_id);
                registry.get(instance_id)?.borrow_mut().acquire_slot();
                function.borrow_mut().library_task = Some(instance_id);
                debug!("[task {}] admitted to library instance {}", function_id, instance_id);
                Ok(Some(instance_id))
            }
            None => {
                self.enqueue(&name, function_id);
                Ok(None)
            }
        }
    }

    /// Gives back the slot held by a function task, if any, and returns the instance owning it.
    ///
    /// The back reference of the function is taken, so the slot is released once per admission.
    pub fn release(&mut self, function_id: TaskId, registry: &TaskRegistry) -> Result<Option<TaskId>> {
        let instance_id = registry.get(function_id)?.borrow_mut().library_task.take();
        if let Some(instance_id) = instance_id {
            if let Ok(instance) = registry.get(instance_id) {
                instance.borrow_mut().release_slot();
            }
            debug!("[task {}] released slot of library instance {}", function_id, instance_id);
        }
        Ok(instance_id)
    }

    /// Returns the functions currently holding a slot of the instance.
    pub fn functions_of(&self, instance_id: TaskId, registry: &TaskRegistry) -> Vec<TaskId> {
        registry
            .iter()
            .filter(|(_, task)| task.borrow().library_task() == Some(instance_id))
            .map(|(id, _)| id)
            .collect()
    }
}
