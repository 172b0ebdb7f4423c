// src/editing/undo.rs
//! Bounded per-unit undo history

use std::collections::VecDeque;

use crate::model::{MotorUnit, UnitId};

/// Saved state of one motor unit before an edit
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: UnitId,
    pub unit: MotorUnit,
}

/// Undo stack holding at most `depth` snapshots; the oldest is dropped first
#[derive(Debug, Clone)]
pub struct UndoStack {
    entries: VecDeque<Snapshot>,
    depth: usize,
}

impl UndoStack {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            entries: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, id: UnitId, unit: MotorUnit) {
        if self.entries.len() == self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(Snapshot { id, unit });
    }

    /// Newest snapshot, taken only if it belongs to `id`
    pub fn pop_for(&mut self, id: UnitId) -> Option<MotorUnit> {
        match self.entries.back() {
            Some(snapshot) if snapshot.id == id => self.entries.pop_back().map(|s| s.unit),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
