//! `flightq` - CLI for flightqueue
//!
//! This binary opens the configured database and runs one queue operation
//! per invocation.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use flightqueue::cli::{Cli, Command, ConfigCommand, NodesCommand};
use flightqueue::storage::nodes::NodeRecord;
use flightqueue::{init_logging, Config, Flight, FlightQueue, Placement, Replay, Storage};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let mut config = Config::load_from(cli.config.clone()).context("loading configuration")?;
    if let Some(list) = cli.list.clone() {
        config.queue.list_name = list;
        config.validate()?;
    }

    if let Command::Config(cmd) = cli.command {
        return handle_config(&config, cmd);
    }

    let database = config.database_path();
    let storage = Storage::open(&database)
        .with_context(|| format!("opening database {}", database.display()))?;
    let mut queue = FlightQueue::open(storage, &config.queue)?;

    run(&mut queue, cli.command)
}

fn run(queue: &mut FlightQueue, command: Command) -> Result<()> {
    match command {
        Command::Add(cmd) => {
            let flight = queue.create(cmd.draft(), Placement::from(&cmd.placement))?;
            println!("Queued flight {}: {flight}", flight.id);
        }
        Command::List { json } => {
            let flights = queue.flights()?;
            if json {
                print_json(&flights)?;
            } else {
                print_flights(&flights);
            }
        }
        Command::Flights { json } => {
            let flights = queue.all_flights()?;
            if json {
                print_json(&flights)?;
            } else if flights.is_empty() {
                println!("No flights stored.");
            } else {
                for flight in &flights {
                    println!("#{:<5} {flight}", flight.id);
                }
            }
        }
        Command::Nodes(cmd) => handle_nodes(queue, &cmd)?,
        Command::Peek(cmd) => {
            let flight = if cmd.back {
                queue.peek_back()?
            } else {
                queue.peek_front()?
            };
            match (flight, cmd.json) {
                (flight, true) => print_json(&flight)?,
                (Some(flight), false) => println!("{}: {flight}", flight.id),
                (None, false) => println!("Queue is empty."),
            }
        }
        Command::Cancel { position } => {
            let flight = queue.extract_at(position)?;
            println!("Cancelled {} (was at {position})", flight.flight_number);
        }
        Command::Move { from, to } => {
            queue.move_flight(from, to)?;
            println!("Moved {from} -> {to}");
        }
        Command::Reorder => {
            let outcome = queue.reorder()?;
            println!("Reordered {} flights ({outcome:?})", queue.len()?);
        }
        Command::Emergency(cmd) => {
            let flight = queue.mark_emergency(cmd.flight_id, !cmd.clear)?;
            println!("{flight}");
        }
        Command::Priority {
            flight_id,
            priority,
        } => {
            let flight = queue.set_priority(flight_id, priority)?;
            println!("{flight}");
        }
        Command::Status { flight_id, status } => {
            let flight = queue.set_status(flight_id, status.into())?;
            println!("{flight}");
        }
        Command::Undo => print_replay(&queue.undo()?),
        Command::Redo => print_replay(&queue.redo()?),
        Command::Len => println!("{}", queue.len()?),
        Command::History(cmd) => {
            let history = queue.history(cmd.limit);
            if cmd.json {
                print_json(&history)?;
            } else if history.is_empty() {
                println!("No history.");
            } else {
                for command in &history {
                    println!("{}  {}", command.timestamp.to_rfc3339(), command.action);
                }
            }
        }
        Command::Show { flight, json } => {
            let flight = match flight.parse::<i64>() {
                Ok(id) => queue.flight(id)?,
                Err(_) => queue.flight_by_number(&flight)?,
            };
            if json {
                print_json(&flight)?;
            } else {
                print_flight_details(&flight);
            }
        }
        Command::Delete { flight_id } => {
            queue.delete_flight(flight_id)?;
            println!("Deleted flight {flight_id}");
        }
        Command::Check { json } => {
            let report = queue.check_integrity()?;
            if json {
                print_json(&report)?;
            } else if report.is_clean() {
                println!("List {} is consistent ({} flights).", queue.list_name(), report.counted);
            } else {
                for repair in &report.repairs {
                    println!("repaired: {repair}");
                }
                if report.cycle_detected {
                    println!("cycle detected; the list was left as is");
                }
            }
        }
        Command::Stats { json } => {
            let stats = queue.storage().stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Database:      {}", queue.storage().path().display());
                println!("Flights:       {}", stats.total_flights);
                println!("Lists:         {}", stats.lists);
                println!("Active nodes:  {}", stats.active_nodes);
                println!("Retired nodes: {}", stats.history_nodes);
                println!("Size:          {} bytes", stats.db_size_bytes);
            }
        }
        Command::Config(_) => anyhow::bail!("config commands do not operate on the queue"),
    }
    Ok(())
}

fn handle_nodes(queue: &FlightQueue, cmd: &NodesCommand) -> Result<()> {
    let nodes: Vec<NodeRecord> = if cmd.history || cmd.flight.is_some() {
        queue.node_history(cmd.flight)?
    } else {
        queue.nodes()?
    };
    if cmd.json {
        return print_json(&nodes);
    }
    println!(
        "{:>6} {:>4} {:>8} {:>6} {:>6} {:>6} {:>7}",
        "node", "pos", "flight", "prev", "next", "ver", "active"
    );
    for node in &nodes {
        println!(
            "{:>6} {:>4} {:>8} {:>6} {:>6} {:>6} {:>7}",
            node.id,
            opt(node.position),
            opt(node.flight_id),
            opt(node.prev_id),
            opt(node.next_id),
            node.version,
            node.active
        );
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                print_json(config)?;
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Queue]");
                println!("  List name:          {}", config.queue.list_name);
                println!("  History capacity:   {}", config.queue.history_capacity);
                println!("  Sync strategy:      {:?}", config.queue.sync_strategy);
                println!("  Verify after write: {}", config.queue.verify_after_write);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_flights(flights: &[Flight]) {
    if flights.is_empty() {
        println!("Queue is empty.");
        return;
    }
    for (position, flight) in flights.iter().enumerate() {
        println!("{position:>3}  #{:<5} {flight}", flight.id);
    }
}

fn print_flight_details(flight: &Flight) {
    println!("Flight {} (id {})", flight.flight_number, flight.id);
    println!("  Route:      {} -> {}", flight.origin, flight.destination);
    println!("  Departure:  {}", flight.departure_time.to_rfc3339());
    println!("  Arrival:    {}", flight.arrival_time.to_rfc3339());
    println!("  Priority:   {}", flight.priority);
    println!("  Status:     {}", flight.status);
    println!("  Emergency:  {}", flight.emergency);
}

fn print_replay(replay: &Replay) {
    match replay {
        Replay::Applied { kind, summary } => println!("{kind}: {summary}"),
        Replay::Nothing { reason } => println!("{reason}"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn opt(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
