//! Two-lane backlog with refusal rotation.

use meridian_tasks::TxnTask;
use std::collections::VecDeque;

/// Which lane a drain pass is inspecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    /// Tasks refused admission at least once; drained first.
    Priority,
    /// Freshly offered tasks.
    Normal,
}

impl Lane {
    fn other(self) -> Lane {
        match self {
            Lane::Priority => Lane::Normal,
            Lane::Normal => Lane::Priority,
        }
    }
}

/// Ordered pair of FIFO lanes holding not-yet-admitted tasks.
///
/// Every task enters through the normal lane. A task refused admission
/// rotates to the tail of the other lane, so a previously refused task
/// is retried ahead of newer work without ever livelocking against the
/// opposite lane.
#[derive(Debug, Default)]
pub(crate) struct Backlog {
    normal: VecDeque<TxnTask>,
    priority: VecDeque<TxnTask>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly offered task.
    pub fn push_normal(&mut self, task: TxnTask) {
        self.normal.push_back(task);
    }

    fn lane(&self, lane: Lane) -> &VecDeque<TxnTask> {
        match lane {
            Lane::Priority => &self.priority,
            Lane::Normal => &self.normal,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut VecDeque<TxnTask> {
        match lane {
            Lane::Priority => &mut self.priority,
            Lane::Normal => &mut self.normal,
        }
    }

    /// Head of the given lane.
    pub fn peek(&self, lane: Lane) -> Option<&TxnTask> {
        self.lane(lane).front()
    }

    /// Pop the head of the given lane.
    pub fn pop(&mut self, lane: Lane) -> Option<TxnTask> {
        self.lane_mut(lane).pop_front()
    }

    /// Move the head of `lane` to the tail of the other lane.
    pub fn rotate(&mut self, lane: Lane) {
        if let Some(task) = self.lane_mut(lane).pop_front() {
            self.lane_mut(lane.other()).push_back(task);
        }
    }

    pub fn len(&self, lane: Lane) -> usize {
        self.lane(lane).len()
    }

    pub fn is_empty(&self) -> bool {
        self.normal.is_empty() && self.priority.is_empty()
    }

    /// Iterate the normal lane in FIFO order without consuming it.
    pub fn iter_normal(&self) -> impl Iterator<Item = &TxnTask> {
        self.normal.iter()
    }
}
