//! Per-task execution slots.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Mutual-exclusion tokens keyed by task ID. Holding a [`SlotGuard`] means
/// the task is running; nobody else can acquire the same ID until it drops.
#[derive(Debug, Default)]
pub struct ExecutionSlots {
    held: Mutex<HashSet<String>>,
}

impl ExecutionSlots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the slot for `task_id`, or `None` if it is already held.
    pub fn try_acquire(self: &Arc<Self>, task_id: &str) -> Option<SlotGuard> {
        let mut held = self.held.lock();
        if !held.insert(task_id.to_string()) {
            return None;
        }
        Some(SlotGuard {
            slots: self.clone(),
            task_id: task_id.to_string(),
        })
    }

    pub fn is_held(&self, task_id: &str) -> bool {
        self.held.lock().contains(task_id)
    }

    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.held.lock().iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// Releases its slot on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<ExecutionSlots>,
    task_id: String,
}

impl SlotGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.held.lock().remove(&self.task_id);
    }
}
