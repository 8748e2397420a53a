//! CLI command definitions.
//!
//! This module defines the arguments of the queue subcommands.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand, ValueEnum};

use crate::flight::{FlightStatus, NewFlight};
use crate::service::Placement;

/// Arguments of `add`.
#[derive(Debug, Args)]
pub struct AddCommand {
    /// Flight number, unique across the database (e.g. IB3170)
    pub flight_number: String,

    /// Origin airport code
    pub origin: String,

    /// Destination airport code
    pub destination: String,

    /// Departure time, RFC 3339 (e.g. 2026-09-14T10:00:00Z)
    #[arg(short, long)]
    pub departure: DateTime<Utc>,

    /// Arrival time, RFC 3339
    #[arg(short, long)]
    pub arrival: DateTime<Utc>,

    /// Priority between 0 and 100
    #[arg(short, long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub priority: u8,

    /// Mark as an emergency
    #[arg(short, long)]
    pub emergency: bool,

    /// Initial status
    #[arg(short, long, value_enum, default_value = "scheduled")]
    pub status: StatusArg,

    /// Where to queue the flight
    #[command(flatten)]
    pub placement: PlacementArgs,
}

impl AddCommand {
    /// The flight draft described by these arguments.
    #[must_use]
    pub fn draft(&self) -> NewFlight {
        NewFlight::new(
            &self.flight_number,
            &self.origin,
            &self.destination,
            self.departure,
            self.arrival,
        )
        .with_priority(self.priority)
        .with_emergency(self.emergency)
        .with_status(self.status.into())
    }
}

/// Where `add` queues the new flight. Defaults to priority order.
#[derive(Debug, Args)]
#[group(multiple = false)]
pub struct PlacementArgs {
    /// Queue at the front, ignoring priority
    #[arg(long)]
    pub front: bool,

    /// Queue at the back, ignoring priority
    #[arg(long)]
    pub back: bool,

    /// Queue at this index
    #[arg(long, value_name = "INDEX")]
    pub at: Option<usize>,
}

impl From<&PlacementArgs> for Placement {
    fn from(args: &PlacementArgs) -> Self {
        match (args.front, args.back, args.at) {
            (true, _, _) => Self::Front,
            (_, true, _) => Self::Back,
            (_, _, Some(index)) => Self::At(index),
            _ => Self::Ordered,
        }
    }
}

/// Arguments of `nodes`.
#[derive(Debug, Args)]
pub struct NodesCommand {
    /// Include retired rows from earlier versions
    #[arg(long)]
    pub history: bool,

    /// Only rows of this flight (implies --history)
    #[arg(short, long, value_name = "FLIGHT_ID")]
    pub flight: Option<i64>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments of `peek`.
#[derive(Debug, Args)]
pub struct PeekCommand {
    /// Peek at the back instead of the front
    #[arg(short, long)]
    pub back: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments of `emergency`.
#[derive(Debug, Args)]
pub struct EmergencyCommand {
    /// Flight id
    pub flight_id: i64,

    /// Clear the flag instead of setting it
    #[arg(long)]
    pub clear: bool,
}

/// Arguments of `history`.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Maximum number of commands to show
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Flight status argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// On schedule
    Scheduled,
    /// Running late
    Delayed,
    /// Will not fly
    Cancelled,
}

impl From<StatusArg> for FlightStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Scheduled => Self::Scheduled,
            StatusArg::Delayed => Self::Delayed,
            StatusArg::Cancelled => Self::Cancelled,
        }
    }
}
