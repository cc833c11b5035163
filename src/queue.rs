//! Pending-task queue
//!
//! Plain FIFO admission queue. Retried tasks re-enter at the tail, so
//! callers get eventual termination but not strict completion order.
//! Owned by the engine worker alone; no internal locking.

use crate::task::TaskId;
use std::collections::VecDeque;

/// FIFO queue of tasks waiting for a free slot
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    pending: VecDeque<TaskId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task at the tail. O(1).
    pub fn push_back(&mut self, id: TaskId) {
        self.pending.push_back(id);
    }

    /// Take the next task to promote, head first
    pub fn pop_front(&mut self) -> Option<TaskId> {
        self.pending.pop_front()
    }

    /// Remove a not-yet-started task for cancellation. O(n).
    ///
    /// Returns true if the task was queued.
    pub fn remove(&mut self, id: TaskId) -> bool {
        if let Some(pos) = self.pending.iter().position(|&q| q == id) {
            self.pending.remove(pos);
            true
        } else {
            false
        }
    }

    /// Drain everything (used by `stop()` to purge pending work)
    pub fn drain(&mut self) -> Vec<TaskId> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
