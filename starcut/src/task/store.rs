//! Task state store abstraction.

use std::collections::HashMap;
use std::sync::Mutex;

use super::Task;

/// Storage interface for task state.
///
/// Orchestration code reads and mutates tasks only through this trait,
/// so the in-memory registry can later be swapped for a persistent or
/// distributed store without touching batch logic.
pub trait StateStore: Send + Sync {
    /// Fetch a task by id.
    fn get(&self, id: &str) -> Option<Task>;

    /// Insert or replace a task.
    fn put(&self, task: Task);

    /// Apply a mutation to a task by id. Returns `false` when the id is
    /// unknown.
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Task)) -> bool;

    /// All tasks, in unspecified order.
    fn list(&self) -> Vec<Task>;
}

/// In-process state store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    fn put(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Task)) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    fn list(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    #[test]
    fn test_put_and_get() {
        let store = MemoryStateStore::new();
        let task = Task::create();
        let id = task.id.clone();

        store.put(task);
        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_update_by_id() {
        let store = MemoryStateStore::new();
        let task = Task::create();
        let id = task.id.clone();
        store.put(task);

        let updated = store.update(&id, &mut |task| {
            task.set_status(TaskStatus::Processing, "running");
        });
        assert!(updated);
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Processing);

        assert!(!store.update("missing", &mut |_| {}));
    }

    #[test]
    fn test_list() {
        let store = MemoryStateStore::new();
        store.put(Task::create());
        store.put(Task::create());
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MemoryStateStore>();
    }
}
