//! Flight records, the entities the queue orders.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest allowed priority (most urgent).
pub const MAX_PRIORITY: u8 = 100;

/// Operational status of a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    /// Flight is on schedule.
    #[default]
    Scheduled,
    /// Flight is delayed.
    Delayed,
    /// Flight has been cancelled by the operator.
    Cancelled,
}

impl std::fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Delayed => write!(f, "delayed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for FlightStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "delayed" => Ok(Self::Delayed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::invalid_flight(format!("unknown status: {other}"))),
        }
    }
}

/// A persisted flight.
///
/// The `id` is assigned by storage and never changes; a cancelled flight that
/// is later restored by undo gets the same id back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    /// Storage identifier.
    pub id: i64,
    /// Unique flight number, e.g. `IB3456`.
    pub flight_number: String,
    /// Origin airport.
    pub origin: String,
    /// Destination airport.
    pub destination: String,
    /// Scheduled departure.
    pub departure_time: DateTime<Utc>,
    /// Scheduled arrival, always after departure.
    pub arrival_time: DateTime<Utc>,
    /// 0-100, 100 being the most urgent.
    pub priority: u8,
    /// Operational status.
    pub status: FlightStatus,
    /// Emergency flights always lead the queue.
    pub emergency: bool,
}

impl Flight {
    /// The draft this flight would be created from.
    #[must_use]
    pub fn to_draft(&self) -> NewFlight {
        NewFlight {
            flight_number: self.flight_number.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            departure_time: self.departure_time,
            arrival_time: self.arrival_time,
            priority: self.priority,
            status: self.status,
            emergency: self.emergency,
        }
    }
}

impl std::fmt::Display for Flight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}->{} prio={} {}",
            self.flight_number, self.origin, self.destination, self.priority, self.status
        )?;
        if self.emergency {
            write!(f, " EMERGENCY")?;
        }
        Ok(())
    }
}

/// A flight that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlight {
    /// Unique flight number.
    pub flight_number: String,
    /// Origin airport.
    pub origin: String,
    /// Destination airport.
    pub destination: String,
    /// Scheduled departure.
    pub departure_time: DateTime<Utc>,
    /// Scheduled arrival.
    pub arrival_time: DateTime<Utc>,
    /// 0-100.
    #[serde(default)]
    pub priority: u8,
    /// Initial status.
    #[serde(default)]
    pub status: FlightStatus,
    /// Initial emergency flag.
    #[serde(default)]
    pub emergency: bool,
}

impl NewFlight {
    /// Create a scheduled, non-emergency draft with priority 0.
    #[must_use]
    pub fn new(
        flight_number: impl Into<String>,
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_time: DateTime<Utc>,
        arrival_time: DateTime<Utc>,
    ) -> Self {
        Self {
            flight_number: flight_number.into(),
            origin: origin.into(),
            destination: destination.into(),
            departure_time,
            arrival_time,
            priority: 0,
            status: FlightStatus::Scheduled,
            emergency: false,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the emergency flag.
    #[must_use]
    pub fn with_emergency(mut self, emergency: bool) -> Self {
        self.emergency = emergency;
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: FlightStatus) -> Self {
        self.status = status;
        self
    }

    /// Check the draft before it reaches storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFlight`] for empty identifiers, a priority
    /// above [`MAX_PRIORITY`], or an arrival that is not after departure.
    pub fn validate(&self) -> Result<()> {
        if self.flight_number.trim().is_empty() {
            return Err(Error::invalid_flight("flight_number must not be empty"));
        }
        if self.origin.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(Error::invalid_flight(
                "origin and destination must not be empty",
            ));
        }
        validate_priority(self.priority)?;
        if self.arrival_time <= self.departure_time {
            return Err(Error::invalid_flight(format!(
                "arrival {} must be after departure {}",
                self.arrival_time.to_rfc3339(),
                self.departure_time.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Attach a storage id.
    #[must_use]
    pub fn into_flight(self, id: i64) -> Flight {
        Flight {
            id,
            flight_number: self.flight_number,
            origin: self.origin,
            destination: self.destination,
            departure_time: self.departure_time,
            arrival_time: self.arrival_time,
            priority: self.priority,
            status: self.status,
            emergency: self.emergency,
        }
    }
}

/// Reject priorities above [`MAX_PRIORITY`].
///
/// # Errors
///
/// Returns [`Error::InvalidFlight`] when `priority > 100`.
pub fn validate_priority(priority: u8) -> Result<()> {
    if priority > MAX_PRIORITY {
        return Err(Error::invalid_flight(format!(
            "priority {priority} is outside 0..={MAX_PRIORITY}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn draft() -> NewFlight {
        let dep = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        NewFlight::new("IB100", "MAD", "BCN", dep, dep + Duration::hours(1))
    }

    #[test]
    fn test_status_display_and_parse() {
        for status in [
            FlightStatus::Scheduled,
            FlightStatus::Delayed,
            FlightStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<FlightStatus>().unwrap(), status);
        }
        assert!("boarding".parse::<FlightStatus>().is_err());
    }

    #[test]
    fn test_status_default() {
        assert_eq!(FlightStatus::default(), FlightStatus::Scheduled);
    }

    #[test]
    fn test_validate_ok() {
        assert!(draft().with_priority(100).validate().is_ok());
    }

    #[test]
    fn test_validate_priority_out_of_range() {
        let err = draft().with_priority(101).validate().unwrap_err();
        assert!(err.to_string().contains("priority 101"));
    }

    #[test]
    fn test_validate_arrival_before_departure() {
        let mut flight = draft();
        flight.arrival_time = flight.departure_time;
        assert!(matches!(
            flight.validate(),
            Err(Error::InvalidFlight { .. })
        ));
    }

    #[test]
    fn test_validate_empty_number() {
        let mut flight = draft();
        flight.flight_number = "  ".to_string();
        assert!(flight.validate().is_err());
    }

    #[test]
    fn test_into_flight_and_back() {
        let flight = draft().with_emergency(true).into_flight(7);
        assert_eq!(flight.id, 7);
        assert!(flight.emergency);
        assert_eq!(flight.to_draft(), draft().with_emergency(true));
    }

    #[test]
    fn test_flight_display() {
        let flight = draft().with_priority(80).with_emergency(true).into_flight(1);
        let shown = flight.to_string();
        assert!(shown.contains("IB100 MAD->BCN"));
        assert!(shown.contains("prio=80"));
        assert!(shown.contains("EMERGENCY"));
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&FlightStatus::Delayed).unwrap();
        assert_eq!(json, "\"delayed\"");
    }
}
