//! The flight queue service.
//!
//! [`FlightQueue`] is the single entry point for callers. Every operation
//! refreshes the in-memory list from the store, applies the change to memory,
//! pushes it to the store through the [`Synchronizer`] and records it in the
//! [`CommandLog`], all inside one transaction. The in-memory list and log are
//! only replaced once that transaction has committed.

use rusqlite::Transaction;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::flight::{Flight, FlightStatus, NewFlight};
use crate::history::{Action, Command, CommandKind, CommandLog};
use crate::list::FlightList;
use crate::storage::integrity::{self, IntegrityReport};
use crate::storage::nodes::{self, ListState, NodeRecord};
use crate::storage::{commands, flights, Storage};
use crate::sync::{self, StructuralOp, SyncOutcome, Synchronizer};

/// Where [`FlightQueue::create`] queues a new flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// By the ordering policy.
    #[default]
    Ordered,
    /// At the front.
    Front,
    /// At the back.
    Back,
    /// At an explicit index in `[0, len]`.
    At(usize),
}

/// Result of an undo or redo request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Replay {
    /// A command was replayed.
    Applied {
        /// Kind of the replayed command.
        kind: CommandKind,
        /// What was done.
        summary: String,
    },
    /// Nothing to replay.
    Nothing {
        /// Why nothing happened.
        reason: String,
    },
}

/// Which way a command is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

/// A priority queue of flights persisted as a sentinel-bounded linked list.
#[derive(Debug)]
pub struct FlightQueue {
    storage: Storage,
    list_name: String,
    sync: Synchronizer,
    verify_after_write: bool,
    log: CommandLog,
    cache: FlightList,
}

/// Mutable view handed to a unit of work.
struct Work<'a, 'tx> {
    tx: &'a mut Transaction<'tx>,
    state: ListState,
    memory: FlightList,
    log: CommandLog,
    sync: Synchronizer,
    verify: bool,
}

impl Work<'_, '_> {
    fn push(&mut self, op: StructuralOp) -> Result<SyncOutcome> {
        let outcome = self.sync.push(self.tx, &mut self.state, op, &self.memory)?;
        if self.verify {
            let report = integrity::check_and_repair(self.tx, &self.state.name)?;
            if report.cycle_detected {
                return Err(Error::integrity(format!(
                    "cycle in list {} after write",
                    self.state.name
                )));
            }
            if !report.is_clean() {
                warn!(repairs = report.repairs.len(), "write left the list inconsistent, repaired");
                self.state = nodes::require_list(self.tx, &self.state.name)?;
            }
        }
        Ok(outcome)
    }

    fn position_of(&self, flight_id: i64) -> Result<usize> {
        self.memory
            .position_of(flight_id)
            .ok_or_else(|| Error::flight_not_found(flight_id))
    }

    /// Queue `flight` at `position`, clamped to the current length.
    fn queue_at(&mut self, flight: Flight, position: usize) -> Result<usize> {
        let position = position.min(self.memory.len());
        let flight_id = flight.id;
        self.memory.insert_at(position, flight)?;
        self.push(StructuralOp::Insert {
            flight_id,
            position,
        })?;
        Ok(position)
    }

    /// Unqueue `flight_id` and delete its record.
    fn remove(&mut self, flight_id: i64) -> Result<(Flight, usize)> {
        let position = self.position_of(flight_id)?;
        let flight = self.memory.extract_at(position)?;
        self.push(StructuralOp::Extract { position })?;
        flights::delete(self.tx, flight_id)?;
        Ok((flight, position))
    }

    /// Move `flight_id` to `target`, clamped to the last index.
    fn relocate(&mut self, flight_id: i64, target: usize) -> Result<()> {
        let from = self.position_of(flight_id)?;
        let to = target.min(self.memory.len().saturating_sub(1));
        if from != to && self.memory.move_item(from, to) {
            self.push(StructuralOp::Move { from, to })?;
        }
        Ok(())
    }

    /// Re-read `flight_id` and put the fresh copy into memory in place.
    fn refresh_flight(&mut self, flight_id: i64) -> Result<Flight> {
        let flight = flights::require(self.tx, flight_id)?;
        self.memory.replace(&flight);
        Ok(flight)
    }

    /// Re-place a queued flight after its ordering key changed.
    fn reposition(&mut self, flight: &Flight) -> Result<(Option<usize>, Option<usize>)> {
        match self.memory.reposition(flight) {
            Some((from, to)) => {
                if from != to {
                    self.push(StructuralOp::Move { from, to })?;
                }
                Ok((Some(from), Some(to)))
            }
            None => Ok((None, None)),
        }
    }

    fn record(&mut self, action: Action) -> Result<()> {
        self.log.record(Command::now(action));
        self.save_log()
    }

    fn save_log(&self) -> Result<()> {
        commands::save(self.tx, &self.state.name, &self.log)
    }
}

impl FlightQueue {
    /// Open the queue configured by `config` on top of `storage`.
    ///
    /// Creates the list on first use, runs one integrity pass, loads the
    /// persisted history and fills the in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or repaired.
    pub fn open(mut storage: Storage, config: &QueueConfig) -> Result<Self> {
        let list_name = config.list_name.clone();
        let (log, cache) = storage.unit_of_work(|tx| {
            nodes::ensure_list(tx, &list_name)?;
            let report = integrity::check_and_repair(tx, &list_name)?;
            if report.cycle_detected {
                warn!(list = %list_name, "list contains a cycle, opening what is reachable");
            } else if !report.is_clean() {
                info!(list = %list_name, repairs = report.repairs.len(), "repaired list on open");
            }
            let log = commands::load(tx, &list_name, config.history_capacity)?;
            let cache = sync::load(tx, &list_name)?;
            Ok((log, cache))
        })?;

        let sync = Synchronizer::new(config.sync_strategy);
        info!(
            list = %list_name,
            len = cache.len(),
            history = log.undo_len(),
            capacity = log.capacity(),
            strategy = ?sync.strategy(),
            "flight queue opened"
        );
        Ok(Self {
            storage,
            list_name,
            sync,
            verify_after_write: config.verify_after_write,
            log,
            cache,
        })
    }

    /// Name of the list this queue operates on.
    #[must_use]
    pub fn list_name(&self) -> &str {
        &self.list_name
    }

    /// The underlying storage.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Create a flight and queue it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFlight`] for a bad draft or a duplicate flight
    /// number, and [`Error::InvalidRange`] for [`Placement::At`] beyond `len`.
    pub fn create(&mut self, draft: NewFlight, placement: Placement) -> Result<Flight> {
        let result = self.transact(|work| {
            let flight = flights::insert(work.tx, &draft)?;
            let position = match placement {
                Placement::Ordered => work.memory.insert_ordered(flight.clone()),
                Placement::Front => {
                    work.memory.insert_front(flight.clone());
                    0
                }
                Placement::Back => {
                    work.memory.insert_back(flight.clone());
                    work.memory.len() - 1
                }
                Placement::At(position) => {
                    work.memory.insert_at(position, flight.clone())?;
                    position
                }
            };
            work.push(StructuralOp::Insert {
                flight_id: flight.id,
                position,
            })?;
            work.record(Action::Create {
                flight: flight.clone(),
                position,
            })?;
            Ok(flight)
        });
        self.report("create", result)
    }

    /// All queued flights, front to back.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn flights(&mut self) -> Result<Vec<Flight>> {
        let result = self.refresh().map(|()| self.cache.iter().cloned().collect());
        self.report("list", result)
    }

    /// The first queued flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn peek_front(&mut self) -> Result<Option<Flight>> {
        let result = self.refresh().map(|()| self.cache.peek_front().cloned());
        self.report("peek_front", result)
    }

    /// The last queued flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn peek_back(&mut self) -> Result<Option<Flight>> {
        let result = self.refresh().map(|()| self.cache.peek_back().cloned());
        self.report("peek_back", result)
    }

    /// Number of queued flights.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn len(&mut self) -> Result<usize> {
        let result = self.refresh().map(|()| self.cache.len());
        self.report("len", result)
    }

    /// Whether no flight is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_empty(&mut self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Remove the flight at `position` and delete its record (cancel).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `position >= len`.
    pub fn extract_at(&mut self, position: usize) -> Result<Flight> {
        let result = self.transact(|work| {
            let flight = work.memory.extract_at(position)?;
            work.push(StructuralOp::Extract { position })?;
            flights::delete(work.tx, flight.id)?;
            work.record(Action::Cancel {
                flight: flight.clone(),
                position,
            })?;
            Ok(flight)
        });
        self.report("cancel", result)
    }

    /// Move the flight at `from` so that it lands at `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMove`] when either index is out of range or
    /// they are equal.
    pub fn move_flight(&mut self, from: usize, to: usize) -> Result<()> {
        let result = self.transact(|work| {
            if !work.memory.move_item(from, to) {
                return Err(Error::InvalidMove {
                    from,
                    to,
                    len: work.memory.len(),
                });
            }
            let flight_id = work
                .memory
                .get(to)
                .map(|f| f.id)
                .ok_or_else(|| Error::internal("moved flight vanished"))?;
            work.push(StructuralOp::Move { from, to })?;
            work.record(Action::Move {
                flight_id,
                from,
                to,
            })
        });
        self.report("move", result)
    }

    /// Re-sort every queued flight by the ordering policy, relinking in place.
    ///
    /// Not undoable; clears the redo stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    pub fn reorder(&mut self) -> Result<SyncOutcome> {
        let result = self.transact(|work| {
            work.memory.sort_by_policy();
            let outcome = work.push(StructuralOp::Reorder)?;
            work.log.clear_redo();
            work.save_log()?;
            Ok(outcome)
        });
        self.report("reorder", result)
    }

    /// Set or clear the emergency flag and re-place the flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flight does not exist.
    pub fn mark_emergency(&mut self, flight_id: i64, emergency: bool) -> Result<Flight> {
        let result = self.transact(|work| {
            let current = flights::require(work.tx, flight_id)?;
            if current.emergency == emergency {
                return Ok(current);
            }
            flights::update_emergency(work.tx, flight_id, emergency)?;
            let updated = flights::require(work.tx, flight_id)?;
            let (from, to) = work.reposition(&updated)?;
            work.record(Action::UpdateEmergency {
                flight_id,
                old: current.emergency,
                new: emergency,
                from,
                to,
            })?;
            Ok(updated)
        });
        self.report("mark_emergency", result)
    }

    /// Change the priority and re-place the flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFlight`] for a priority above 100 and
    /// [`Error::NotFound`] if the flight does not exist.
    pub fn set_priority(&mut self, flight_id: i64, priority: u8) -> Result<Flight> {
        let result = self.transact(|work| {
            let current = flights::require(work.tx, flight_id)?;
            if current.priority == priority {
                return Ok(current);
            }
            flights::update_priority(work.tx, flight_id, priority)?;
            let updated = flights::require(work.tx, flight_id)?;
            let (from, to) = work.reposition(&updated)?;
            work.record(Action::UpdatePriority {
                flight_id,
                old: current.priority,
                new: priority,
                from,
                to,
            })?;
            Ok(updated)
        });
        self.report("set_priority", result)
    }

    /// Change the status. Does not move the flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flight does not exist.
    pub fn set_status(&mut self, flight_id: i64, status: FlightStatus) -> Result<Flight> {
        let result = self.transact(|work| {
            let current = flights::require(work.tx, flight_id)?;
            if current.status == status {
                return Ok(current);
            }
            flights::update_status(work.tx, flight_id, status)?;
            let updated = work.refresh_flight(flight_id)?;
            work.record(Action::UpdateStatus {
                flight_id,
                old: current.status,
                new: status,
            })?;
            Ok(updated)
        });
        self.report("set_status", result)
    }

    /// Reverse the most recent command.
    ///
    /// # Errors
    ///
    /// Returns an error if the inverse cannot be applied; the command then
    /// stays on the undo stack.
    pub fn undo(&mut self) -> Result<Replay> {
        let result = self.replay(Direction::Undo);
        self.report("undo", result)
    }

    /// Re-apply the most recently undone command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be applied; it then stays on
    /// the redo stack.
    pub fn redo(&mut self) -> Result<Replay> {
        let result = self.replay(Direction::Redo);
        self.report("redo", result)
    }

    /// Up to `limit` undoable commands, most recent first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Command> {
        self.log.recent(limit)
    }

    /// Number of commands that can be redone.
    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.log.redo_len()
    }

    /// Look a flight up by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no flight has this id.
    pub fn flight(&self, flight_id: i64) -> Result<Flight> {
        let result = flights::require(self.storage.conn(), flight_id);
        self.report("flight", result)
    }

    /// Look a flight up by flight number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no flight has this number.
    pub fn flight_by_number(&self, flight_number: &str) -> Result<Flight> {
        let result = flights::get_by_number(self.storage.conn(), flight_number).and_then(|f| {
            f.ok_or_else(|| Error::NotFound {
                entity: "flight",
                id: flight_number.to_string(),
            })
        });
        self.report("flight_by_number", result)
    }

    /// Every stored flight by id, queued in any list or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn all_flights(&self) -> Result<Vec<Flight>> {
        let result = flights::all(self.storage.conn());
        self.report("all_flights", result)
    }

    /// Delete a flight record that is not queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConflictingDelete`] while an active node references
    /// the flight, and [`Error::NotFound`] if it does not exist.
    pub fn delete_flight(&mut self, flight_id: i64) -> Result<()> {
        let result = self.storage.unit_of_work(|tx| {
            if flights::is_referenced(tx, flight_id)? {
                return Err(Error::ConflictingDelete { flight_id });
            }
            if !flights::delete(tx, flight_id)? {
                return Err(Error::flight_not_found(flight_id));
            }
            debug!(flight_id, "deleted detached flight");
            Ok(())
        });
        self.report("delete_flight", result)
    }

    /// The active node chain with ids and links, front to back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityViolation`] if the chain is broken.
    pub fn nodes(&self) -> Result<Vec<NodeRecord>> {
        let conn = self.storage.conn();
        let result = nodes::require_list(conn, &self.list_name)
            .and_then(|state| nodes::active_chain(conn, &state));
        self.report("nodes", result)
    }

    /// Active and historical node rows, optionally for one flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn node_history(&self, flight_id: Option<i64>) -> Result<Vec<NodeRecord>> {
        let result = nodes::history(self.storage.conn(), &self.list_name, flight_id);
        self.report("node_history", result)
    }

    /// Stored bookkeeping of the list.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_state(&self) -> Result<ListState> {
        let result = nodes::require_list(self.storage.conn(), &self.list_name);
        self.report("list_state", result)
    }

    /// Run the integrity check and repair, then reload the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn check_integrity(&mut self) -> Result<IntegrityReport> {
        let list_name = self.list_name.clone();
        let result = self
            .storage
            .unit_of_work(|tx| integrity::check_and_repair(tx, &list_name))
            .and_then(|report| self.refresh().map(|()| report));
        self.report("check_integrity", result)
    }

    /// Rebuild the in-memory list from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn reload(&mut self) -> Result<()> {
        let result = self.refresh();
        self.report("reload", result)
    }

    /// The cached list as of the last operation.
    #[must_use]
    pub fn cached(&self) -> &FlightList {
        &self.cache
    }

    fn refresh(&mut self) -> Result<()> {
        self.cache = sync::load(self.storage.conn(), &self.list_name)?;
        Ok(())
    }

    /// Run `op` in one transaction on copies of the cache and log, keeping
    /// the copies only when the transaction commits.
    fn transact<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Work<'_, '_>) -> Result<T>,
    {
        self.refresh()?;
        let Self {
            storage,
            list_name,
            sync,
            verify_after_write,
            log,
            cache,
        } = self;

        let (value, memory, new_log) = storage.unit_of_work(|tx| {
            let state = nodes::require_list(tx, list_name)?;
            let mut work = Work {
                tx,
                state,
                memory: cache.clone(),
                log: log.clone(),
                sync: *sync,
                verify: *verify_after_write,
            };
            let value = op(&mut work)?;
            Ok((value, work.memory, work.log))
        })?;

        *cache = memory;
        *log = new_log;
        Ok(value)
    }

    fn replay(&mut self, direction: Direction) -> Result<Replay> {
        let pending = match direction {
            Direction::Undo => self.log.undo_len(),
            Direction::Redo => self.log.redo_len(),
        };
        if pending == 0 {
            let reason = match direction {
                Direction::Undo => "nothing to undo",
                Direction::Redo => "nothing to redo",
            };
            return Ok(Replay::Nothing {
                reason: reason.to_string(),
            });
        }

        self.transact(|work| {
            let command = match direction {
                Direction::Undo => work.log.take_undo(),
                Direction::Redo => work.log.take_redo(),
            }
            .ok_or_else(|| Error::internal("command stack emptied during replay"))?;

            match direction {
                Direction::Undo => apply_inverse(work, &command.action)?,
                Direction::Redo => apply_forward(work, &command.action)?,
            }

            let replay = Replay::Applied {
                kind: command.kind(),
                summary: command.action.to_string(),
            };
            match direction {
                Direction::Undo => work.log.push_redo(command),
                Direction::Redo => work.log.push_undo(command),
            }
            work.save_log()?;
            Ok(replay)
        })
    }

    fn report<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            warn!(list = %self.list_name, operation, error = %err, "queue operation failed");
        }
        result
    }
}

fn apply_inverse(work: &mut Work<'_, '_>, action: &Action) -> Result<()> {
    match action {
        Action::Create { flight, .. } => {
            work.remove(flight.id)?;
        }
        Action::Cancel { flight, position } => {
            flights::restore(work.tx, flight)?;
            work.queue_at(flight.clone(), *position)?;
        }
        Action::Move { flight_id, from, .. } => work.relocate(*flight_id, *from)?,
        Action::UpdateStatus { flight_id, old, .. } => {
            flights::update_status(work.tx, *flight_id, *old)?;
            work.refresh_flight(*flight_id)?;
        }
        Action::UpdateEmergency {
            flight_id, old, from, ..
        } => {
            flights::update_emergency(work.tx, *flight_id, *old)?;
            restore_position(work, *flight_id, *from)?;
        }
        Action::UpdatePriority {
            flight_id, old, from, ..
        } => {
            flights::update_priority(work.tx, *flight_id, *old)?;
            restore_position(work, *flight_id, *from)?;
        }
    }
    Ok(())
}

fn apply_forward(work: &mut Work<'_, '_>, action: &Action) -> Result<()> {
    match action {
        Action::Create { flight, position } => {
            flights::restore(work.tx, flight)?;
            work.queue_at(flight.clone(), *position)?;
        }
        Action::Cancel { flight, .. } => {
            work.remove(flight.id)?;
        }
        Action::Move { flight_id, to, .. } => work.relocate(*flight_id, *to)?,
        Action::UpdateStatus { flight_id, new, .. } => {
            flights::update_status(work.tx, *flight_id, *new)?;
            work.refresh_flight(*flight_id)?;
        }
        Action::UpdateEmergency {
            flight_id, new, to, ..
        } => {
            flights::update_emergency(work.tx, *flight_id, *new)?;
            restore_position(work, *flight_id, *to)?;
        }
        Action::UpdatePriority {
            flight_id, new, to, ..
        } => {
            flights::update_priority(work.tx, *flight_id, *new)?;
            restore_position(work, *flight_id, *to)?;
        }
    }
    Ok(())
}

/// Refresh a flight after a field replay and move it back where it was.
fn restore_position(work: &mut Work<'_, '_>, flight_id: i64, position: Option<usize>) -> Result<()> {
    work.refresh_flight(flight_id)?;
    if let Some(position) = position {
        if work.memory.position_of(flight_id).is_some() {
            work.relocate(flight_id, position)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering;
    use crate::sync::{self, SyncStrategy};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn config() -> QueueConfig {
        QueueConfig::default()
    }

    fn queue() -> FlightQueue {
        crate::logging::init_test_logging();
        FlightQueue::open(Storage::open_in_memory().unwrap(), &config()).unwrap()
    }

    fn dep(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 14, hour, 0, 0).unwrap()
    }

    fn draft(number: &str, priority: u8, hour: u32) -> NewFlight {
        NewFlight::new(number, "MAD", "BCN", dep(hour), dep(hour) + Duration::hours(1))
            .with_priority(priority)
    }

    fn numbers(q: &mut FlightQueue) -> Vec<String> {
        q.flights()
            .unwrap()
            .into_iter()
            .map(|f| f.flight_number)
            .collect()
    }

    fn stored_numbers(q: &FlightQueue) -> Vec<String> {
        let conn = q.storage().conn();
        let state = nodes::require_list(conn, q.list_name()).unwrap();
        nodes::flight_order(conn, &state)
            .unwrap()
            .into_iter()
            .map(|id| flights::require(conn, id).unwrap().flight_number)
            .collect()
    }

    fn assert_store_consistent(q: &mut FlightQueue) {
        let report = q.check_integrity().unwrap();
        assert!(report.is_clean(), "unexpected repairs: {report:?}");
        let chain = q.nodes().unwrap();
        for (rank, node) in chain.iter().enumerate() {
            assert_eq!(node.position, Some(i64::try_from(rank).unwrap()));
        }
        assert_eq!(q.list_state().unwrap().size, chain.len());
    }

    #[test]
    fn test_open_creates_empty_list() {
        let mut q = queue();
        assert_eq!(q.len().unwrap(), 0);
        assert!(q.is_empty().unwrap());
        assert!(q.peek_front().unwrap().is_none());
        assert!(q.peek_back().unwrap().is_none());
        assert_eq!(q.list_state().unwrap().size, 0);
    }

    #[test]
    fn test_priority_ordering() {
        let mut q = queue();
        q.create(draft("A", 50, 10), Placement::Ordered).unwrap();
        q.create(draft("B", 80, 10), Placement::Ordered).unwrap();
        assert_eq!(numbers(&mut q), vec!["B", "A"]);
        assert_eq!(stored_numbers(&q), vec!["B", "A"]);
    }

    #[test]
    fn test_emergency_goes_first() {
        let mut q = queue();
        q.create(draft("A", 10, 10), Placement::Ordered).unwrap();
        q.create(draft("B", 90, 10), Placement::Ordered).unwrap();
        q.create(draft("C", 0, 10).with_emergency(true), Placement::Ordered)
            .unwrap();
        assert_eq!(q.peek_front().unwrap().unwrap().flight_number, "C");
        assert_eq!(numbers(&mut q), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_tie_break_on_departure() {
        let mut q = queue();
        q.create(draft("LATE", 50, 12), Placement::Ordered).unwrap();
        q.create(draft("EARLY", 50, 8), Placement::Ordered).unwrap();
        assert_eq!(numbers(&mut q), vec!["EARLY", "LATE"]);
    }

    #[test]
    fn test_move_and_cancel_scenario() {
        let mut q = queue();
        for n in ["X", "Y", "Z"] {
            q.create(draft(n, 0, 10), Placement::Back).unwrap();
        }
        q.move_flight(0, 2).unwrap();
        assert_eq!(numbers(&mut q), vec!["Y", "Z", "X"]);
        assert_eq!(stored_numbers(&q), vec!["Y", "Z", "X"]);

        let cancelled = q.extract_at(1).unwrap();
        assert_eq!(cancelled.flight_number, "Z");
        assert_eq!(numbers(&mut q), vec!["Y", "X"]);
        assert_eq!(q.len().unwrap(), 2);
        assert!(q.flight(cancelled.id).unwrap_err().is_not_found());
        assert_store_consistent(&mut q);
    }

    #[test]
    fn test_undo_cancel_restores_snapshot() {
        let mut q = queue();
        for n in ["X", "Y", "Z"] {
            q.create(draft(n, 0, 10), Placement::Back).unwrap();
        }
        let cancelled = q.extract_at(1).unwrap();

        let replay = q.undo().unwrap();
        assert!(matches!(
            replay,
            Replay::Applied {
                kind: CommandKind::Cancel,
                ..
            }
        ));
        assert_eq!(numbers(&mut q), vec!["X", "Y", "Z"]);
        assert_eq!(q.flight(cancelled.id).unwrap(), cancelled);
        assert_store_consistent(&mut q);
    }

    #[test]
    fn test_redo_reproduces_forward_state() {
        let mut q = queue();
        for n in ["X", "Y", "Z"] {
            q.create(draft(n, 0, 10), Placement::Back).unwrap();
        }
        q.move_flight(2, 0).unwrap();
        let forward = numbers(&mut q);

        q.undo().unwrap();
        assert_eq!(numbers(&mut q), vec!["X", "Y", "Z"]);
        q.redo().unwrap();
        assert_eq!(numbers(&mut q), forward);
        assert_store_consistent(&mut q);
    }

    #[test]
    fn test_undo_create_deletes_flight() {
        let mut q = queue();
        let created = q.create(draft("A", 10, 10), Placement::Ordered).unwrap();
        q.undo().unwrap();
        assert_eq!(q.len().unwrap(), 0);
        assert!(q.flight(created.id).is_err());

        q.redo().unwrap();
        assert_eq!(q.flight(created.id).unwrap(), created);
        assert_eq!(numbers(&mut q), vec!["A"]);
    }

    #[test]
    fn test_undo_on_empty_stack() {
        let mut q = queue();
        assert_eq!(
            q.undo().unwrap(),
            Replay::Nothing {
                reason: "nothing to undo".to_string()
            }
        );
        assert!(matches!(q.redo().unwrap(), Replay::Nothing { .. }));
    }

    #[test]
    fn test_new_mutation_clears_redo() {
        let mut q = queue();
        q.create(draft("A", 10, 10), Placement::Ordered).unwrap();
        q.undo().unwrap();
        assert_eq!(q.redo_depth(), 1);
        q.create(draft("B", 10, 10), Placement::Ordered).unwrap();
        assert_eq!(q.redo_depth(), 0);
        assert!(matches!(q.redo().unwrap(), Replay::Nothing { .. }));
    }

    #[test]
    fn test_priority_change_repositions_and_undoes() {
        let mut q = queue();
        q.create(draft("HIGH", 90, 10), Placement::Ordered).unwrap();
        q.create(draft("MID", 50, 10), Placement::Ordered).unwrap();
        let low = q.create(draft("LOW", 10, 10), Placement::Ordered).unwrap();

        q.set_priority(low.id, 95).unwrap();
        assert_eq!(numbers(&mut q), vec!["LOW", "HIGH", "MID"]);

        q.undo().unwrap();
        assert_eq!(numbers(&mut q), vec!["HIGH", "MID", "LOW"]);
        assert_eq!(q.flight(low.id).unwrap().priority, 10);
        assert_store_consistent(&mut q);
    }

    #[test]
    fn test_mark_emergency_moves_to_front() {
        let mut q = queue();
        q.create(draft("A", 90, 10), Placement::Ordered).unwrap();
        let b = q.create(draft("B", 10, 10), Placement::Ordered).unwrap();

        let updated = q.mark_emergency(b.id, true).unwrap();
        assert!(updated.emergency);
        assert_eq!(numbers(&mut q), vec!["B", "A"]);

        q.undo().unwrap();
        assert_eq!(numbers(&mut q), vec!["A", "B"]);
        assert!(!q.flight(b.id).unwrap().emergency);
    }

    #[test]
    fn test_set_status_keeps_position() {
        let mut q = queue();
        q.create(draft("A", 90, 10), Placement::Ordered).unwrap();
        let b = q.create(draft("B", 10, 10), Placement::Ordered).unwrap();

        q.set_status(b.id, FlightStatus::Delayed).unwrap();
        let listed = q.flights().unwrap();
        assert_eq!(listed[1].status, FlightStatus::Delayed);

        q.undo().unwrap();
        assert_eq!(q.flight(b.id).unwrap().status, FlightStatus::Scheduled);
    }

    #[test]
    fn test_unchanged_field_is_not_recorded() {
        let mut q = queue();
        let a = q.create(draft("A", 40, 10), Placement::Ordered).unwrap();
        q.set_priority(a.id, 40).unwrap();
        assert_eq!(q.history(10).len(), 1);
    }

    #[test]
    fn test_reorder_sorts_without_new_rows() {
        let mut q = queue();
        q.create(draft("LOW", 10, 10), Placement::Back).unwrap();
        q.create(draft("HIGH", 90, 10), Placement::Back).unwrap();
        q.create(draft("EM", 0, 10).with_emergency(true), Placement::Back)
            .unwrap();
        let rows_before = q.node_history(None).unwrap().len();

        let outcome = q.reorder().unwrap();
        assert_eq!(outcome, SyncOutcome::Incremental);
        assert_eq!(numbers(&mut q), vec!["EM", "HIGH", "LOW"]);
        assert_eq!(q.node_history(None).unwrap().len(), rows_before);
        assert!(ordering::is_queue_ordered(q.cached().iter()));
    }

    #[test]
    fn test_invalid_positions() {
        let mut q = queue();
        q.create(draft("A", 10, 10), Placement::Back).unwrap();
        assert!(q.extract_at(5).unwrap_err().is_invalid_range());
        assert!(q.move_flight(0, 0).unwrap_err().is_invalid_range());
        assert!(q
            .create(draft("B", 10, 10), Placement::At(3))
            .unwrap_err()
            .is_invalid_range());
        // the failed create left nothing behind
        assert!(q.flight_by_number("B").unwrap_err().is_not_found());
        assert_eq!(q.len().unwrap(), 1);
    }

    #[test]
    fn test_create_at_position() {
        let mut q = queue();
        q.create(draft("A", 0, 10), Placement::Back).unwrap();
        q.create(draft("B", 0, 10), Placement::Back).unwrap();
        q.create(draft("C", 0, 10), Placement::At(1)).unwrap();
        q.create(draft("D", 0, 10), Placement::Front).unwrap();
        assert_eq!(numbers(&mut q), vec!["D", "A", "C", "B"]);
        assert_store_consistent(&mut q);
    }

    #[test]
    fn test_duplicate_flight_number_rejected() {
        let mut q = queue();
        q.create(draft("A", 0, 10), Placement::Back).unwrap();
        let err = q.create(draft("A", 0, 10), Placement::Back).unwrap_err();
        assert!(matches!(err, Error::InvalidFlight { .. }));
        assert_eq!(q.len().unwrap(), 1);
    }

    #[test]
    fn test_delete_queued_flight_conflicts() {
        let mut q = queue();
        let a = q.create(draft("A", 0, 10), Placement::Back).unwrap();
        assert!(matches!(
            q.delete_flight(a.id),
            Err(Error::ConflictingDelete { .. })
        ));
        assert!(q.delete_flight(999).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_detached_flight() {
        let mut q = queue();
        let draft = draft("LOOSE", 0, 10);
        let loose = q
            .storage
            .unit_of_work(|tx| flights::insert(tx, &draft))
            .unwrap();
        q.delete_flight(loose.id).unwrap();
        assert!(q.flight(loose.id).is_err());
    }

    #[test]
    fn test_all_flights_includes_detached_records() {
        let mut q = queue();
        q.create(draft("A", 0, 11), Placement::Back).unwrap();
        let detached = draft("LOOSE", 0, 10);
        let loose = q
            .storage
            .unit_of_work(|tx| flights::insert(tx, &detached))
            .unwrap();
        q.create(draft("B", 0, 12), Placement::Back).unwrap();

        let all: Vec<_> = q
            .all_flights()
            .unwrap()
            .into_iter()
            .map(|f| f.flight_number)
            .collect();
        assert_eq!(all, vec!["A", "LOOSE", "B"]);
        assert_eq!(numbers(&mut q), vec!["A", "B"]);
        assert!(q.all_flights().unwrap().iter().any(|f| f.id == loose.id));
    }

    #[test]
    fn test_history_is_bounded_and_recent_first() {
        let mut cfg = config();
        cfg.history_capacity = 2;
        let mut q = FlightQueue::open(Storage::open_in_memory().unwrap(), &cfg).unwrap();
        for n in ["A", "B", "C"] {
            q.create(draft(n, 0, 10), Placement::Back).unwrap();
        }
        let history = q.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action.to_string(), "create C at 2");

        q.undo().unwrap();
        q.undo().unwrap();
        assert!(matches!(q.undo().unwrap(), Replay::Nothing { .. }));
        assert_eq!(numbers(&mut q), vec!["A"]);
    }

    #[test]
    fn test_history_survives_reopen() {
        let path = std::env::temp_dir().join(format!("flightqueue_service_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let mut q = FlightQueue::open(Storage::open(&path).unwrap(), &config()).unwrap();
            q.create(draft("A", 0, 10), Placement::Back).unwrap();
            q.create(draft("B", 0, 10), Placement::Back).unwrap();
            q.move_flight(0, 1).unwrap();
        }

        let mut q = FlightQueue::open(Storage::open(&path).unwrap(), &config()).unwrap();
        assert_eq!(numbers(&mut q), vec!["B", "A"]);
        assert_eq!(q.history(10).len(), 3);
        q.undo().unwrap();
        assert_eq!(numbers(&mut q), vec!["A", "B"]);

        drop(q);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[test]
    fn test_rebuild_strategy_keeps_order() {
        let mut cfg = config();
        cfg.sync_strategy = SyncStrategy::Rebuild;
        let mut q = FlightQueue::open(Storage::open_in_memory().unwrap(), &cfg).unwrap();
        for (n, p) in [("A", 10), ("B", 90), ("C", 50)] {
            q.create(draft(n, p, 10), Placement::Ordered).unwrap();
        }
        q.move_flight(0, 2).unwrap();
        assert_eq!(numbers(&mut q), vec!["C", "A", "B"]);
        assert_eq!(stored_numbers(&q), vec!["C", "A", "B"]);
        assert!(q.node_history(None).unwrap().iter().any(|n| !n.active));
        assert_store_consistent(&mut q);
    }

    #[test]
    fn test_external_change_is_observed() {
        let mut q = queue();
        q.create(draft("A", 0, 10), Placement::Back).unwrap();
        q.create(draft("B", 0, 10), Placement::Back).unwrap();

        let list = q.list_name().to_string();
        q.storage
            .unit_of_work(|tx| {
                let state = nodes::require_list(tx, &list)?;
                nodes::move_node(tx, &state, 0, 1)
            })
            .unwrap();

        assert_eq!(numbers(&mut q), vec!["B", "A"]);
    }

    #[test]
    fn test_open_repairs_damaged_store() {
        let path = std::env::temp_dir().join(format!("flightqueue_repair_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let mut q = FlightQueue::open(Storage::open(&path).unwrap(), &config()).unwrap();
            q.create(draft("A", 0, 10), Placement::Back).unwrap();
            q.create(draft("B", 0, 10), Placement::Back).unwrap();
            q.storage()
                .conn()
                .execute("UPDATE list_state SET size = 7", [])
                .unwrap();
        }

        let mut q = FlightQueue::open(Storage::open(&path).unwrap(), &config()).unwrap();
        assert_eq!(q.list_state().unwrap().size, 2);
        assert_eq!(numbers(&mut q), vec!["A", "B"]);

        drop(q);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Create(u8, bool, u32, Option<usize>),
        Extract(usize),
        Move(usize, usize),
        Priority(usize, u8),
        Emergency(usize, bool),
        Undo,
        Redo,
        Reorder,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => (0u8..=100, any::<bool>(), 0u32..24, proptest::option::of(0usize..8))
                .prop_map(|(p, e, h, at)| Step::Create(p, e, h, at)),
            1 => (0usize..8).prop_map(Step::Extract),
            1 => (0usize..8, 0usize..8).prop_map(|(a, b)| Step::Move(a, b)),
            1 => (0usize..8, 0u8..=100).prop_map(|(i, p)| Step::Priority(i, p)),
            1 => (0usize..8, any::<bool>()).prop_map(|(i, e)| Step::Emergency(i, e)),
            1 => Just(Step::Undo),
            1 => Just(Step::Redo),
            1 => Just(Step::Reorder),
        ]
    }

    fn sync_strategy() -> impl Strategy<Value = SyncStrategy> {
        prop_oneof![Just(SyncStrategy::Incremental), Just(SyncStrategy::Rebuild)]
    }

    fn queue_with(strategy: SyncStrategy) -> FlightQueue {
        crate::logging::init_test_logging();
        let mut cfg = config();
        cfg.sync_strategy = strategy;
        FlightQueue::open(Storage::open_in_memory().unwrap(), &cfg).unwrap()
    }

    fn nth_flight(q: &FlightQueue, index: usize) -> Option<i64> {
        let ids = q.cached().ids();
        if ids.is_empty() {
            None
        } else {
            Some(ids[index % ids.len()])
        }
    }

    fn apply(q: &mut FlightQueue, step: &Step, serial: &mut u32) -> bool {
        match *step {
            Step::Create(priority, emergency, hour, at) => {
                *serial += 1;
                let draft = draft(&format!("P{serial}"), priority, hour).with_emergency(emergency);
                let placement = at.map_or(Placement::Ordered, Placement::At);
                q.create(draft, placement).is_ok()
            }
            Step::Extract(position) => q.extract_at(position).is_ok(),
            Step::Move(from, to) => q.move_flight(from, to).is_ok(),
            Step::Priority(index, priority) => {
                nth_flight(q, index).is_some_and(|id| q.set_priority(id, priority).is_ok())
            }
            Step::Emergency(index, emergency) => {
                nth_flight(q, index).is_some_and(|id| q.mark_emergency(id, emergency).is_ok())
            }
            Step::Undo => matches!(q.undo(), Ok(Replay::Applied { .. })),
            Step::Redo => matches!(q.redo(), Ok(Replay::Applied { .. })),
            Step::Reorder => q.reorder().is_ok(),
        }
    }

    fn check_persisted(q: &FlightQueue) -> std::result::Result<(), TestCaseError> {
        let conn = q.storage().conn();
        let state = nodes::require_list(conn, q.list_name()).unwrap();
        let walk = nodes::walk(conn, &state).unwrap();
        prop_assert!(walk.is_complete(), "walk ended at {:?}", walk.end);

        let mut prev = state.head_id;
        let mut seen = std::collections::HashSet::new();
        for (rank, node) in walk.nodes.iter().enumerate() {
            prop_assert!(node.active);
            prop_assert_eq!(node.prev_id, Some(prev));
            prop_assert_eq!(node.position, Some(i64::try_from(rank).unwrap()));
            let flight_id = node.flight_id.unwrap();
            prop_assert!(seen.insert(flight_id), "flight {} queued twice", flight_id);
            prev = node.id;
        }
        let head = nodes::get_node(conn, state.head_id).unwrap().unwrap();
        let tail = nodes::get_node(conn, state.tail_id).unwrap().unwrap();
        prop_assert_eq!(head.prev_id, None);
        prop_assert_eq!(tail.next_id, None);
        prop_assert_eq!(tail.prev_id, Some(prev));
        prop_assert_eq!(state.size, walk.nodes.len());
        prop_assert_eq!(nodes::count_active(conn, q.list_name()).unwrap(), state.size);
        prop_assert_eq!(q.cached().ids(), nodes::flight_order(conn, &state).unwrap());
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn stored_chain_stays_consistent(
            strategy in sync_strategy(),
            steps in proptest::collection::vec(step_strategy(), 0..30),
        ) {
            let mut q = queue_with(strategy);
            let mut serial = 0;
            for step in &steps {
                apply(&mut q, step, &mut serial);
                check_persisted(&q)?;
            }

            let reloaded = sync::load(q.storage().conn(), q.list_name()).unwrap();
            prop_assert_eq!(reloaded.ids(), q.cached().ids());
        }

        #[test]
        fn undo_walks_back_through_each_state(
            strategy in sync_strategy(),
            steps in proptest::collection::vec(step_strategy(), 0..15),
        ) {
            let mut q = queue_with(strategy);
            let mut serial = 0;
            let mut snapshots = Vec::new();
            for step in steps.iter().filter(|s| !matches!(s, Step::Undo | Step::Redo | Step::Reorder)) {
                let before = q.cached().ids();
                let depth = q.history(usize::MAX).len();
                apply(&mut q, step, &mut serial);
                if q.history(usize::MAX).len() > depth {
                    snapshots.push(before);
                }
            }

            while let Some(expected) = snapshots.pop() {
                let replay = q.undo().unwrap();
                let applied = matches!(replay, Replay::Applied { .. });
                prop_assert!(applied);
                prop_assert_eq!(q.cached().ids(), expected);
                check_persisted(&q)?;
            }
            let nothing = matches!(q.undo().unwrap(), Replay::Nothing { .. });
            prop_assert!(nothing);
        }
    }
}
