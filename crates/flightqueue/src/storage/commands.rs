//! Persistence of the undo/redo log.
//!
//! The whole log of a list is rewritten on every save. Saves run inside the
//! same transaction as the mutation they record, so the stored history never
//! disagrees with the stored list.

use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::Result;
use crate::history::{Command, CommandLog};

const UNDO: &str = "undo";
const REDO: &str = "redo";

/// Replace the stored log of `list` with `log`.
///
/// # Errors
///
/// Returns an error if serialization or a database operation fails.
pub fn save(conn: &Connection, list: &str, log: &CommandLog) -> Result<()> {
    conn.execute("DELETE FROM command_log WHERE list_name = ?1", [list])?;

    let mut stmt = conn.prepare(
        r"
        INSERT INTO command_log (list_name, stack, seq, kind, recorded_at, payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
    )?;
    for (stack, entries) in [
        (UNDO, log.undo_entries().collect::<Vec<_>>()),
        (REDO, log.redo_entries().collect::<Vec<_>>()),
    ] {
        for (seq, command) in entries.into_iter().enumerate() {
            stmt.execute(params![
                list,
                stack,
                i64::try_from(seq).unwrap_or(i64::MAX),
                command.kind().to_string(),
                command.timestamp.to_rfc3339(),
                serde_json::to_string(&command.action)?,
            ])?;
        }
    }
    Ok(())
}

/// Load the stored log of `list`, bounded by `capacity`.
///
/// Rows that no longer deserialize are skipped with a warning.
///
/// # Errors
///
/// Returns an error if a database operation fails.
pub fn load(conn: &Connection, list: &str, capacity: usize) -> Result<CommandLog> {
    Ok(CommandLog::from_parts(
        capacity,
        load_stack(conn, list, UNDO)?,
        load_stack(conn, list, REDO)?,
    ))
}

fn load_stack(conn: &Connection, list: &str, stack: &str) -> Result<Vec<Command>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, recorded_at, payload FROM command_log
        WHERE list_name = ?1 AND stack = ?2
        ORDER BY seq
        ",
    )?;
    let rows = stmt
        .query_map(params![list, stack], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut commands = Vec::with_capacity(rows.len());
    for (id, recorded_at, payload) in rows {
        let timestamp = match super::flights::parse_timestamp(1, &recorded_at) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(row = id, error = %e, "skipping command log row with bad timestamp");
                continue;
            }
        };
        match serde_json::from_str(&payload) {
            Ok(action) => commands.push(Command { timestamp, action }),
            Err(e) => warn!(row = id, error = %e, "skipping unreadable command log row"),
        }
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::FlightStatus;
    use crate::history::Action;
    use crate::storage::migrations;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::initialize_schema(&conn).unwrap();
        conn
    }

    fn status_change(flight_id: i64) -> Command {
        Command::now(Action::UpdateStatus {
            flight_id,
            old: FlightStatus::Scheduled,
            new: FlightStatus::Delayed,
        })
    }

    #[test]
    fn test_save_and_load() {
        let conn = create_test_db();
        let mut log = CommandLog::new(10);
        log.record(status_change(1));
        log.record(status_change(2));
        log.push_redo(status_change(3));

        save(&conn, "primary", &log).unwrap();
        let loaded = load(&conn, "primary", 10).unwrap();
        assert_eq!(loaded.undo_len(), 2);
        assert_eq!(loaded.redo_len(), 1);
        assert_eq!(
            loaded.recent(1)[0].action.flight_id(),
            2,
            "most recent command comes first"
        );
    }

    #[test]
    fn test_save_replaces_previous_log() {
        let conn = create_test_db();
        let mut log = CommandLog::new(10);
        log.record(status_change(1));
        save(&conn, "primary", &log).unwrap();

        log.take_undo();
        save(&conn, "primary", &log).unwrap();
        assert_eq!(load(&conn, "primary", 10).unwrap().undo_len(), 0);
    }

    #[test]
    fn test_lists_do_not_share_history() {
        let conn = create_test_db();
        let mut log = CommandLog::new(10);
        log.record(status_change(1));
        save(&conn, "primary", &log).unwrap();
        assert_eq!(load(&conn, "standby", 10).unwrap().undo_len(), 0);
    }

    #[test]
    fn test_load_respects_capacity() {
        let conn = create_test_db();
        let mut log = CommandLog::new(10);
        for id in 1..=6 {
            log.record(status_change(id));
        }
        save(&conn, "primary", &log).unwrap();
        let loaded = load(&conn, "primary", 4).unwrap();
        assert_eq!(loaded.undo_len(), 4);
        assert_eq!(loaded.recent(1)[0].action.flight_id(), 6);
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let conn = create_test_db();
        let mut log = CommandLog::new(10);
        log.record(status_change(1));
        save(&conn, "primary", &log).unwrap();
        conn.execute(
            "INSERT INTO command_log (list_name, stack, seq, kind, recorded_at, payload) \
             VALUES ('primary', 'undo', 1, 'move', '2026-01-01T00:00:00+00:00', 'not json')",
            [],
        )
        .unwrap();
        assert_eq!(load(&conn, "primary", 10).unwrap().undo_len(), 1);
    }
}
