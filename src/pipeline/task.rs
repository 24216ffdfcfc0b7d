//! Per-item unit of work tracked during a stage run.

use super::progress::item_weights;
use crate::model::{Item, ItemId};

/// Lifecycle of an item within one run.
///
/// `Pending -> Running -> Done`, or `Pending | Running -> Errored`.
/// `Done` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Errored,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Errored)
    }
}

/// Progress bookkeeping for one item.
#[derive(Debug, Clone)]
pub struct ItemTask {
    pub item: Item,

    /// Vertex count relative to the run's mean
    pub weight: f64,

    progress: f64,
    status: TaskStatus,
}

impl ItemTask {
    pub fn new(item: Item, weight: f64) -> Self {
        Self {
            item,
            weight,
            progress: 0.0,
            status: TaskStatus::Pending,
        }
    }

    pub fn id(&self) -> &ItemId {
        &self.item.id
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Hand the item to the worker.
    pub fn start(&mut self) -> bool {
        self.transition(TaskStatus::Running)
    }

    /// Record a progress message. Values are passed through as reported,
    /// clamped to `[0, 1]`; ignored unless the task is running.
    pub fn update_progress(&mut self, fraction: f64) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.progress = fraction.clamp(0.0, 1.0);
        true
    }

    /// The worker finished this item.
    pub fn complete(&mut self) -> bool {
        let ok = self.transition(TaskStatus::Done);
        if ok {
            self.progress = 1.0;
        }
        ok
    }

    /// The worker reported a failure for this item.
    pub fn fail(&mut self) -> bool {
        self.transition(TaskStatus::Errored)
    }

    fn transition(&mut self, to: TaskStatus) -> bool {
        let allowed = matches!(
            (self.status, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Pending, TaskStatus::Errored)
                | (TaskStatus::Running, TaskStatus::Errored)
        );
        if allowed {
            self.status = to;
        } else {
            tracing::debug!(
                "Ignoring {:?} -> {:?} for item {}",
                self.status,
                to,
                self.item.id
            );
        }
        allowed
    }
}

/// Build weighted tasks for a run, preserving item order.
pub fn build_tasks(items: &[Item]) -> Vec<ItemTask> {
    let counts: Vec<usize> = items.iter().map(|i| i.vertex_count).collect();
    items
        .iter()
        .cloned()
        .zip(item_weights(&counts))
        .map(|(item, weight)| ItemTask::new(item, weight))
        .collect()
}
