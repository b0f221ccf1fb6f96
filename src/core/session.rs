use std::collections::HashMap;

/// Which field of a schedule the operator is editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Time,
    Message,
}

/// Transient per-operator editing state. Never persisted: an in-progress
/// edit does not survive a restart, only completed edits do.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditState {
    #[default]
    Idle,
    Listing,
    AwaitingFieldChoice {
        id: String,
    },
    AwaitingNewValue {
        id: String,
        field: EditField,
    },
}

/// Edit sessions keyed by operator chat id. A single-operator deployment
/// still keys by identity so two rapid button presses (or a future second
/// operator) can never bleed state into each other.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<i64, EditState>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, operator: i64) -> EditState {
        self.sessions.get(&operator).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, operator: i64, state: EditState) {
        if state == EditState::Idle {
            self.sessions.remove(&operator);
        } else {
            self.sessions.insert(operator, state);
        }
    }

    /// A fresh top-level command always preempts a dangling edit.
    pub fn reset(&mut self, operator: i64) {
        self.sessions.remove(&operator);
    }
}
