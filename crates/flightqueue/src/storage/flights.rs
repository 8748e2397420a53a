//! Flight entity store.
//!
//! Plain CRUD over the `flights` table. All functions take a `&Connection` so
//! they run equally well on the bare connection, inside a transaction or
//! inside a savepoint.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{Error, Result};
use crate::flight::{Flight, FlightStatus, NewFlight};

const COLUMNS: &str = "id, flight_number, origin, destination, departure_time, arrival_time, \
                       priority, status, emergency";

impl ToSql for FlightStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for FlightStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|_| FromSqlError::Other(format!("unknown flight status: {text}").into()))
    }
}

/// Insert a validated draft and return the stored flight.
///
/// # Errors
///
/// Returns [`Error::InvalidFlight`] if the draft fails validation or its
/// flight number is already taken.
pub fn insert(conn: &Connection, draft: &NewFlight) -> Result<Flight> {
    draft.validate()?;
    if get_by_number(conn, &draft.flight_number)?.is_some() {
        return Err(Error::invalid_flight(format!(
            "flight number {} already exists",
            draft.flight_number
        )));
    }

    conn.execute(
        r"
        INSERT INTO flights (flight_number, origin, destination, departure_time,
                             arrival_time, priority, status, emergency)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
        params![
            draft.flight_number,
            draft.origin,
            draft.destination,
            draft.departure_time.to_rfc3339(),
            draft.arrival_time.to_rfc3339(),
            draft.priority,
            draft.status,
            draft.emergency,
        ],
    )?;

    let id = conn.last_insert_rowid();
    debug!(flight_id = id, number = %draft.flight_number, "inserted flight");
    Ok(draft.clone().into_flight(id))
}

/// Re-insert a snapshot under its original id.
///
/// # Errors
///
/// Returns an error if the id or flight number is taken again.
pub fn restore(conn: &Connection, flight: &Flight) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO flights (id, flight_number, origin, destination, departure_time,
                             arrival_time, priority, status, emergency)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        params![
            flight.id,
            flight.flight_number,
            flight.origin,
            flight.destination,
            flight.departure_time.to_rfc3339(),
            flight.arrival_time.to_rfc3339(),
            flight.priority,
            flight.status,
            flight.emergency,
        ],
    )?;
    debug!(flight_id = flight.id, "restored flight snapshot");
    Ok(())
}

/// Get a flight by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: i64) -> Result<Option<Flight>> {
    let flight = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM flights WHERE id = ?1"),
            [id],
            row_to_flight,
        )
        .optional()?;
    Ok(flight)
}

/// Get a flight by id or fail with [`Error::NotFound`].
///
/// # Errors
///
/// Returns [`Error::NotFound`] if no flight has this id.
pub fn require(conn: &Connection, id: i64) -> Result<Flight> {
    get(conn, id)?.ok_or_else(|| Error::flight_not_found(id))
}

/// Get a flight by its flight number.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_by_number(conn: &Connection, flight_number: &str) -> Result<Option<Flight>> {
    let flight = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM flights WHERE flight_number = ?1"),
            [flight_number],
            row_to_flight,
        )
        .optional()?;
    Ok(flight)
}

/// All flights by id, queued or not.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn all(conn: &Connection) -> Result<Vec<Flight>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM flights ORDER BY id"))?;
    let flights = stmt
        .query_map([], row_to_flight)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(flights)
}

/// Count stored flights.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM flights", [], |row| row.get(0))?;
    Ok(count)
}

/// Set the status of a flight.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if no flight has this id.
pub fn update_status(conn: &Connection, id: i64, status: FlightStatus) -> Result<()> {
    let affected = conn.execute(
        "UPDATE flights SET status = ?1 WHERE id = ?2",
        params![status, id],
    )?;
    ensure_updated(affected, id)
}

/// Set the priority of a flight.
///
/// # Errors
///
/// Returns [`Error::InvalidFlight`] for a priority above 100 and
/// [`Error::NotFound`] if no flight has this id.
pub fn update_priority(conn: &Connection, id: i64, priority: u8) -> Result<()> {
    crate::flight::validate_priority(priority)?;
    let affected = conn.execute(
        "UPDATE flights SET priority = ?1 WHERE id = ?2",
        params![priority, id],
    )?;
    ensure_updated(affected, id)
}

/// Set the emergency flag of a flight.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if no flight has this id.
pub fn update_emergency(conn: &Connection, id: i64, emergency: bool) -> Result<()> {
    let affected = conn.execute(
        "UPDATE flights SET emergency = ?1 WHERE id = ?2",
        params![emergency, id],
    )?;
    ensure_updated(affected, id)
}

/// Delete a flight row.
///
/// Returns `true` if a row was deleted. Callers that must not orphan an
/// active node check [`is_referenced`] first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM flights WHERE id = ?1", [id])?;
    Ok(affected > 0)
}

/// Whether an active regular node references this flight.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn is_referenced(conn: &Connection, id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE flight_id = ?1 AND kind = 'regular' AND active = 1",
        [id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn ensure_updated(affected: usize, id: i64) -> Result<()> {
    if affected == 0 {
        return Err(Error::flight_not_found(id));
    }
    Ok(())
}

pub(crate) fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_flight(row: &Row<'_>) -> rusqlite::Result<Flight> {
    let departure: String = row.get(4)?;
    let arrival: String = row.get(5)?;
    Ok(Flight {
        id: row.get(0)?,
        flight_number: row.get(1)?,
        origin: row.get(2)?,
        destination: row.get(3)?,
        departure_time: parse_timestamp(4, &departure)?,
        arrival_time: parse_timestamp(5, &arrival)?,
        priority: row.get(6)?,
        status: row.get(7)?,
        emergency: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;
    use chrono::{Duration, TimeZone};

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::initialize_schema(&conn).unwrap();
        conn
    }

    fn draft(number: &str) -> NewFlight {
        let dep = Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap();
        NewFlight::new(number, "MAD", "BCN", dep, dep + Duration::minutes(75))
    }

    #[test]
    fn test_insert_and_get() {
        let conn = create_test_db();
        let stored = insert(&conn, &draft("IB100").with_priority(40)).unwrap();
        let loaded = get(&conn, stored.id).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.priority, 40);
        assert_eq!(loaded.status, FlightStatus::Scheduled);
    }

    #[test]
    fn test_insert_duplicate_number() {
        let conn = create_test_db();
        insert(&conn, &draft("IB100")).unwrap();
        let err = insert(&conn, &draft("IB100")).unwrap_err();
        assert!(matches!(err, Error::InvalidFlight { .. }));
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_insert_rejects_invalid_draft() {
        let conn = create_test_db();
        assert!(insert(&conn, &draft("IB100").with_priority(150)).is_err());
        assert_eq!(count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_get_nonexistent() {
        let conn = create_test_db();
        assert!(get(&conn, 999).unwrap().is_none());
        assert!(require(&conn, 999).unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_by_number() {
        let conn = create_test_db();
        let stored = insert(&conn, &draft("VY22")).unwrap();
        assert_eq!(get_by_number(&conn, "VY22").unwrap().unwrap().id, stored.id);
        assert!(get_by_number(&conn, "VY23").unwrap().is_none());
    }

    #[test]
    fn test_updates() {
        let conn = create_test_db();
        let id = insert(&conn, &draft("IB100")).unwrap().id;

        update_status(&conn, id, FlightStatus::Delayed).unwrap();
        update_priority(&conn, id, 77).unwrap();
        update_emergency(&conn, id, true).unwrap();

        let loaded = require(&conn, id).unwrap();
        assert_eq!(loaded.status, FlightStatus::Delayed);
        assert_eq!(loaded.priority, 77);
        assert!(loaded.emergency);
    }

    #[test]
    fn test_update_missing_flight() {
        let conn = create_test_db();
        assert!(update_status(&conn, 5, FlightStatus::Cancelled)
            .unwrap_err()
            .is_not_found());
        assert!(update_priority(&conn, 5, 101).is_err());
    }

    #[test]
    fn test_delete_and_restore_keeps_id() {
        let conn = create_test_db();
        let stored = insert(&conn, &draft("IB100")).unwrap();
        assert!(delete(&conn, stored.id).unwrap());
        assert!(!delete(&conn, stored.id).unwrap());

        restore(&conn, &stored).unwrap();
        assert_eq!(require(&conn, stored.id).unwrap(), stored);
    }

    #[test]
    fn test_all_orders_by_id() {
        let conn = create_test_db();
        let a = insert(&conn, &draft("A1")).unwrap();
        let b = insert(&conn, &draft("B2")).unwrap();
        let ids: Vec<i64> = all(&conn).unwrap().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_is_referenced_without_nodes() {
        let conn = create_test_db();
        let stored = insert(&conn, &draft("IB100")).unwrap();
        assert!(!is_referenced(&conn, stored.id).unwrap());
    }

    #[test]
    fn test_bad_status_in_row() {
        let conn = create_test_db();
        let id = insert(&conn, &draft("IB100")).unwrap().id;
        conn.execute("UPDATE flights SET status = 'boarding' WHERE id = ?1", [id])
            .unwrap();
        assert!(get(&conn, id).is_err());
    }
}
