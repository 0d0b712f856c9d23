//! In-memory task store. Contents are lost when the process exits.

use std::sync::Mutex;

use super::store::{StorageError, Task, TaskDraft, TaskStore};

struct Inner {
    tasks: Vec<Task>,
    next_id: i64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { tasks: Vec::new(), next_id: 1 }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for MemoryStore {
    fn create(&self, draft: &TaskDraft) -> Result<Task, StorageError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let task = Task {
            id: inner.next_id,
            due_at: draft.due_at,
            text: draft.text.clone(),
            fired: false,
        };
        inner.next_id += 1;
        inner.tasks.push(task.clone());
        Ok(task)
    }

    fn list_all(&self) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let mut tasks = inner.tasks.clone();
        tasks.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    fn delete(&self, id: i64) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.tasks.retain(|t| t.id != id);
        Ok(())
    }

    fn mark_fired(&self, id: i64) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if let Some(task) = inner.tasks.iter_mut().find(|t| t.id == id) {
            task.fired = true;
        }
        Ok(())
    }
}
