//! Command-line interface for flightqueue.
//!
//! This module provides the CLI structure for the `flightq` binary. Each
//! subcommand maps to one operation of [`FlightQueue`](crate::FlightQueue).

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AddCommand, ConfigCommand, EmergencyCommand, HistoryCommand, NodesCommand, PeekCommand,
    PlacementArgs, StatusArg,
};

/// flightq - A persistent priority queue of flights
///
/// Flights are kept in a linked list stored row by row in `SQLite`.
/// Emergencies go first, then higher priority, then earlier departure.
/// Every change can be undone.
#[derive(Debug, Parser)]
#[command(name = "flightq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Operate on this list instead of the configured one
    #[arg(short, long, global = true, value_name = "NAME")]
    pub list: Option<String>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a flight and queue it
    Add(AddCommand),

    /// List queued flights in order
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List every stored flight, queued or not
    Flights {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the stored node chain
    Nodes(NodesCommand),

    /// Show the first (or last) queued flight
    Peek(PeekCommand),

    /// Remove the flight at a position and delete it
    Cancel {
        /// Zero-based position
        position: usize,
    },

    /// Move a flight between positions
    Move {
        /// Current position
        from: usize,
        /// Position it should land at
        to: usize,
    },

    /// Re-sort the whole queue by priority
    Reorder,

    /// Set or clear the emergency flag of a flight
    Emergency(EmergencyCommand),

    /// Change the priority of a flight
    Priority {
        /// Flight id
        flight_id: i64,
        /// New priority between 0 and 100
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        priority: u8,
    },

    /// Change the status of a flight
    Status {
        /// Flight id
        flight_id: i64,
        /// New status
        #[arg(value_enum)]
        status: StatusArg,
    },

    /// Undo the last change
    Undo,

    /// Redo the last undone change
    Redo,

    /// Print the number of queued flights
    Len,

    /// Show recent undoable changes
    History(HistoryCommand),

    /// Show one flight by id or flight number
    Show {
        /// Flight id or flight number
        flight: String,
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete a flight that is not queued
    Delete {
        /// Flight id
        flight_id: i64,
    },

    /// Check the stored list and repair what can be repaired
    Check {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show database statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
