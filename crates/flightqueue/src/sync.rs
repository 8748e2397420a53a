//! Synchronization between the in-memory list and the persisted node chain.
//!
//! Loading (store to memory) walks the chain from its head and rebuilds a
//! fresh [`FlightList`]. Pushing (memory to store) translates one structural
//! operation into the matching node-store call inside a savepoint, and falls
//! back to a full rebuild from memory when that fails or the two orders drift
//! apart.

use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::list::FlightList;
use crate::storage::flights;
use crate::storage::nodes::{self, ListState, WalkEnd};

/// How structural writes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Translate each operation, rebuilding only on failure or drift.
    #[default]
    Incremental,
    /// Always rebuild the whole chain from memory.
    Rebuild,
}

/// A structural change already applied to the in-memory list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralOp {
    /// `flight_id` was inserted at `position`.
    Insert {
        /// The queued flight.
        flight_id: i64,
        /// Landing index.
        position: usize,
    },
    /// The flight at `position` was removed.
    Extract {
        /// Index removed from.
        position: usize,
    },
    /// The flight at `from` now sits at `to`.
    Move {
        /// Original index.
        from: usize,
        /// Landing index.
        to: usize,
    },
    /// The whole list was re-sorted by policy.
    Reorder,
    /// Replace the stored chain with the memory order.
    Rebuild,
}

/// How a push reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The operation was translated row by row.
    Incremental,
    /// The chain was rebuilt under a new version.
    Rebuilt {
        /// Version of the new rows.
        version: i64,
    },
}

/// Build a fresh in-memory list from the stored chain of `list`.
///
/// Inactive rows and rows whose flight no longer exists are skipped. A chain
/// that does not reach the tail yields the prefix that could be read.
///
/// # Errors
///
/// Returns an error if the list does not exist or a query fails.
pub fn load(conn: &Connection, list: &str) -> Result<FlightList> {
    let state = nodes::require_list(conn, list)?;
    let walk = nodes::walk(conn, &state)?;
    if !walk.is_complete() {
        warn!(list, end = ?walk.end, "stored chain is damaged, loading reachable prefix");
    }

    let mut memory = FlightList::new();
    for node in walk.nodes.into_iter().filter(|n| n.active) {
        let Some(flight_id) = node.flight_id else {
            warn!(node_id = node.id, "regular node without flight, skipped");
            continue;
        };
        match flights::get(conn, flight_id)? {
            Some(flight) => memory.insert_back(flight),
            None => warn!(node_id = node.id, flight_id, "node references missing flight, skipped"),
        }
    }
    debug!(list, len = memory.len(), "loaded list from store");
    Ok(memory)
}

/// Pushes in-memory changes to the store using a [`SyncStrategy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Synchronizer {
    strategy: SyncStrategy,
}

impl Synchronizer {
    /// Create a synchronizer using `strategy`.
    #[must_use]
    pub fn new(strategy: SyncStrategy) -> Self {
        Self { strategy }
    }

    /// The configured strategy.
    #[must_use]
    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    /// Make the stored chain match `memory` after `op` was applied to it.
    ///
    /// `state` is refreshed to the stored list state afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncFailure`] if the rebuild fallback also fails. The
    /// caller's transaction should then be rolled back.
    pub fn push(
        &self,
        tx: &mut Transaction<'_>,
        state: &mut ListState,
        op: StructuralOp,
        memory: &FlightList,
    ) -> Result<SyncOutcome> {
        if self.strategy == SyncStrategy::Rebuild || op == StructuralOp::Rebuild {
            return rebuild(tx, state, memory);
        }

        match incremental(tx, state, op, memory) {
            Ok(()) => Ok(SyncOutcome::Incremental),
            Err(err) => {
                let failure = Error::sync_failure(format!("incremental {op:?} failed: {err}"));
                warn!(error = %failure, "falling back to full rebuild");
                *state = nodes::require_list(tx, &state.name)?;
                rebuild(tx, state, memory)
            }
        }
    }
}

fn incremental(
    tx: &mut Transaction<'_>,
    state: &mut ListState,
    op: StructuralOp,
    memory: &FlightList,
) -> Result<()> {
    let sp = tx.savepoint()?;
    match op {
        StructuralOp::Insert {
            flight_id,
            position,
        } => {
            nodes::insert_at(&sp, state, flight_id, position)?;
        }
        StructuralOp::Extract { position } => {
            nodes::extract_at(&sp, state, position)?;
        }
        StructuralOp::Move { from, to } => nodes::move_node(&sp, state, from, to)?,
        StructuralOp::Reorder => {
            nodes::reorder(&sp, state)?;
        }
        StructuralOp::Rebuild => return Err(Error::internal("rebuild is not incremental")),
    }

    let stored = nodes::flight_order(&sp, state)?;
    let expected = memory.ids();
    if stored != expected {
        return Err(Error::sync_failure(format!(
            "store order {stored:?} drifted from memory order {expected:?}"
        )));
    }
    sp.commit()?;
    debug!(?op, "incremental sync applied");
    Ok(())
}

fn rebuild(tx: &mut Transaction<'_>, state: &mut ListState, memory: &FlightList) -> Result<SyncOutcome> {
    let sp = tx.savepoint()?;
    let version = nodes::rebuild(&sp, state, &memory.ids())
        .and_then(|version| verify_rebuilt(&sp, state, memory).map(|()| version))
        .map_err(|e| Error::sync_failure(format!("full rebuild failed: {e}")))?;
    sp.commit()?;
    info!(list = %state.name, version, "list rebuilt from memory");
    Ok(SyncOutcome::Rebuilt { version })
}

fn verify_rebuilt(conn: &Connection, state: &ListState, memory: &FlightList) -> Result<()> {
    let walk = nodes::walk(conn, state)?;
    if walk.end != WalkEnd::Tail || walk.nodes.len() != memory.len() {
        return Err(Error::integrity("rebuilt chain does not match memory"));
    }
    Ok(())
}
