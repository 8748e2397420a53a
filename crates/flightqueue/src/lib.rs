//! `flightqueue` - a priority queue of flights over a persisted linked list
//!
//! Flights are ordered emergencies first, then by priority, then by departure.
//! The queue lives twice: as an arena-backed doubly-linked list in memory
//! ([`FlightList`]) and as sentinel-bounded node rows in `SQLite`
//! ([`storage::nodes`]). [`FlightQueue`] keeps the two in step and records
//! every mutation for undo and redo.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod flight;
pub mod history;
pub mod list;
pub mod logging;
pub mod ordering;
pub mod service;
pub mod storage;
pub mod sync;

pub use config::{Config, QueueConfig};
pub use error::{Error, Result};
pub use flight::{Flight, FlightStatus, NewFlight};
pub use history::{Action, Command, CommandKind, CommandLog};
pub use list::FlightList;
pub use logging::init_logging;
pub use service::{FlightQueue, Placement, Replay};
pub use storage::{Storage, StorageStats};
pub use sync::{SyncOutcome, SyncStrategy, Synchronizer};
