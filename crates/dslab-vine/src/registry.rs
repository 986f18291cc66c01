//! Task registry.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use sugars::{rc, refcell};

use crate::error::{Result, VineError};
use crate::task::{Task, TaskId};

/// Owns the tasks known to the manager.
///
/// Cross references between tasks (function to library instance) and from tasks to workers are stored as ids and
/// resolved here, so a task is dropped only when the registry and every other holder of its `Rc` let it go.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: IndexMap<TaskId, Rc<RefCell<Task>>>,
    last_id: TaskId,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh task id, ids start from 1.
    pub fn next_id(&mut self) -> TaskId {
        self.last_id += 1;
        self.last_id
    }

    /// Adds a task under its id.
    pub fn insert(&mut self, task: Task) -> Rc<RefCell<Task>> {
        let id = task.id;
        let task = rc!(refcell!(task));
        self.tasks.insert(id, task.clone());
        task
    }

    pub fn get(&self, id: TaskId) -> Result<&Rc<RefCell<Task>>> {
        self.tasks.get(&id).ok_or(VineError::UnknownTask(id))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Rc<RefCell<Task>>> {
        self.tasks.shift_remove(&id)
    }

    /// Iterates over tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Rc<RefCell<Task>>)> {
        self.tasks.iter().map(|(id, task)| (*id, task))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
