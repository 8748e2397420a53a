//! Bounded undo/redo log of applied queue mutations.
//!
//! Every [`Action`] carries what is needed to reverse it: a full flight
//! snapshot for create and cancel, the old and new value for field updates,
//! and the positions a flight moved between.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flight::{Flight, FlightStatus};

/// Default number of commands kept on each stack.
pub const DEFAULT_CAPACITY: usize = 20;

/// Kind of a recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// A flight was created and queued.
    Create,
    /// A flight moved between positions.
    Move,
    /// A flight was extracted and deleted.
    Cancel,
    /// A status change.
    UpdateStatus,
    /// An emergency flag change.
    UpdateEmergency,
    /// A priority change.
    UpdatePriority,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Move => "move",
            Self::Cancel => "cancel",
            Self::UpdateStatus => "update_status",
            Self::UpdateEmergency => "update_emergency",
            Self::UpdatePriority => "update_priority",
        };
        f.write_str(name)
    }
}

/// A mutation together with its inverse data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// `flight` was created at `position`.
    Create {
        /// Snapshot as created.
        flight: Flight,
        /// Landing index.
        position: usize,
    },
    /// `flight` was removed from `position` and deleted.
    Cancel {
        /// Snapshot before removal.
        flight: Flight,
        /// Index it was removed from.
        position: usize,
    },
    /// A flight moved from `from` to `to`.
    Move {
        /// The moved flight.
        flight_id: i64,
        /// Original index.
        from: usize,
        /// Landing index.
        to: usize,
    },
    /// Status changed from `old` to `new`.
    UpdateStatus {
        /// The updated flight.
        flight_id: i64,
        /// Value before.
        old: FlightStatus,
        /// Value after.
        new: FlightStatus,
    },
    /// Emergency flag changed; the flight was repositioned from `from` to `to`.
    UpdateEmergency {
        /// The updated flight.
        flight_id: i64,
        /// Value before.
        old: bool,
        /// Value after.
        new: bool,
        /// Index before, if queued.
        from: Option<usize>,
        /// Index after, if queued.
        to: Option<usize>,
    },
    /// Priority changed; the flight was repositioned from `from` to `to`.
    UpdatePriority {
        /// The updated flight.
        flight_id: i64,
        /// Value before.
        old: u8,
        /// Value after.
        new: u8,
        /// Index before, if queued.
        from: Option<usize>,
        /// Index after, if queued.
        to: Option<usize>,
    },
}

impl Action {
    /// The kind of this action.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Create { .. } => CommandKind::Create,
            Self::Cancel { .. } => CommandKind::Cancel,
            Self::Move { .. } => CommandKind::Move,
            Self::UpdateStatus { .. } => CommandKind::UpdateStatus,
            Self::UpdateEmergency { .. } => CommandKind::UpdateEmergency,
            Self::UpdatePriority { .. } => CommandKind::UpdatePriority,
        }
    }

    /// Id of the flight the action touched.
    #[must_use]
    pub fn flight_id(&self) -> i64 {
        match self {
            Self::Create { flight, .. } | Self::Cancel { flight, .. } => flight.id,
            Self::Move { flight_id, .. }
            | Self::UpdateStatus { flight_id, .. }
            | Self::UpdateEmergency { flight_id, .. }
            | Self::UpdatePriority { flight_id, .. } => *flight_id,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { flight, position } => {
                write!(f, "create {} at {position}", flight.flight_number)
            }
            Self::Cancel { flight, position } => {
                write!(f, "cancel {} from {position}", flight.flight_number)
            }
            Self::Move { flight_id, from, to } => {
                write!(f, "move flight {flight_id} from {from} to {to}")
            }
            Self::UpdateStatus { flight_id, old, new } => {
                write!(f, "status of flight {flight_id}: {old} -> {new}")
            }
            Self::UpdateEmergency { flight_id, old, new, .. } => {
                write!(f, "emergency of flight {flight_id}: {old} -> {new}")
            }
            Self::UpdatePriority { flight_id, old, new, .. } => {
                write!(f, "priority of flight {flight_id}: {old} -> {new}")
            }
        }
    }
}

/// A recorded action with the time it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// When the action was first applied.
    pub timestamp: DateTime<Utc>,
    /// What was done.
    pub action: Action,
}

impl Command {
    /// Record `action` as applied now.
    #[must_use]
    pub fn now(action: Action) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
        }
    }

    /// The kind of the recorded action.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.action.kind()
    }
}

/// Undo and redo stacks, each holding at most `capacity` commands.
///
/// When a stack is full the oldest command is evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLog {
    capacity: usize,
    undo: VecDeque<Command>,
    redo: VecDeque<Command>,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CommandLog {
    /// Create an empty log. A capacity of 0 is treated as 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            undo: VecDeque::with_capacity(capacity),
            redo: VecDeque::with_capacity(capacity),
        }
    }

    /// Rebuild a log from stored stacks, oldest first. Excess entries are
    /// dropped from the old end.
    #[must_use]
    pub fn from_parts(capacity: usize, undo: Vec<Command>, redo: Vec<Command>) -> Self {
        let mut log = Self::new(capacity);
        for command in undo {
            log.push_undo(command);
        }
        for command in redo {
            log.push_redo(command);
        }
        log
    }

    /// Maximum entries per stack.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a freshly applied mutation. Clears the redo stack.
    pub fn record(&mut self, command: Command) {
        self.push_undo(command);
        self.redo.clear();
    }

    /// Pop the most recent command to undo.
    pub fn take_undo(&mut self) -> Option<Command> {
        self.undo.pop_back()
    }

    /// Pop the most recently undone command.
    pub fn take_redo(&mut self) -> Option<Command> {
        self.redo.pop_back()
    }

    /// Push onto the undo stack without touching redo.
    ///
    /// Used after a redo, and to put a command back when replaying it failed.
    pub fn push_undo(&mut self, command: Command) {
        push_bounded(&mut self.undo, self.capacity, command);
    }

    /// Push onto the redo stack.
    pub fn push_redo(&mut self, command: Command) {
        push_bounded(&mut self.redo, self.capacity, command);
    }

    /// Drop every redoable command.
    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    /// Number of undoable commands.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Number of redoable commands.
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Undo stack, oldest first.
    pub fn undo_entries(&self) -> impl Iterator<Item = &Command> {
        self.undo.iter()
    }

    /// Redo stack, oldest first.
    pub fn redo_entries(&self) -> impl Iterator<Item = &Command> {
        self.redo.iter()
    }

    /// Up to `limit` undoable commands, most recent first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Command> {
        self.undo.iter().rev().take(limit).cloned().collect()
    }
}

fn push_bounded(stack: &mut VecDeque<Command>, capacity: usize, command: Command) {
    if stack.len() == capacity {
        stack.pop_front();
    }
    stack.push_back(command);
}
