//! `SQLite` schema definitions for flightqueue.
//!
//! Statements are grouped by the schema version that introduced them; the
//! migration runner applies each group in order.

/// SQL statement to create the flights table.
pub const CREATE_FLIGHTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS flights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    flight_number TEXT NOT NULL UNIQUE,
    origin TEXT NOT NULL,
    destination TEXT NOT NULL,
    departure_time TEXT NOT NULL,
    arrival_time TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0 CHECK (priority BETWEEN 0 AND 100),
    status TEXT NOT NULL DEFAULT 'scheduled',
    emergency INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the nodes table.
///
/// Sentinels have `kind` `head` or `tail` and no flight or position.
/// Removed regular nodes stay behind with `active = 0`.
pub const CREATE_NODES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    list_name TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('head', 'tail', 'regular')),
    flight_id INTEGER,
    position INTEGER,
    prev_id INTEGER,
    next_id INTEGER,
    active INTEGER NOT NULL DEFAULT 1,
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
)
";

/// SQL statement to create the list state table.
pub const CREATE_LIST_STATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS list_state (
    name TEXT PRIMARY KEY,
    head_id INTEGER NOT NULL,
    tail_id INTEGER NOT NULL,
    size INTEGER NOT NULL DEFAULT 0
)
";

/// Index for position lookups among active regular nodes.
pub const CREATE_NODES_POSITION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_nodes_position ON nodes(list_name, active, position)
";

/// Index for the is-referenced check.
pub const CREATE_NODES_FLIGHT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_nodes_flight ON nodes(flight_id, active)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// SQL statement to create the persisted undo/redo log.
pub const CREATE_COMMAND_LOG_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS command_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    list_name TEXT NOT NULL,
    stack TEXT NOT NULL CHECK (stack IN ('undo', 'redo')),
    seq INTEGER NOT NULL,
    kind TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    payload TEXT NOT NULL
)
";

/// Index for loading one list's log in stack order.
pub const CREATE_COMMAND_LOG_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_command_log_list ON command_log(list_name, stack, seq)
";

/// Version 1: flights, the linked list and its bookkeeping.
pub const V1_STATEMENTS: &[&str] = &[
    CREATE_METADATA_TABLE,
    CREATE_FLIGHTS_TABLE,
    CREATE_NODES_TABLE,
    CREATE_LIST_STATE_TABLE,
    CREATE_NODES_POSITION_INDEX,
    CREATE_NODES_FLIGHT_INDEX,
];

/// Version 2: persisted command history.
pub const V2_STATEMENTS: &[&str] = &[CREATE_COMMAND_LOG_TABLE, CREATE_COMMAND_LOG_INDEX];
