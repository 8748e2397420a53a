//! Error types for flightqueue.
//!
//! This module defines all error types used throughout the flightqueue crate.
//! Domain failures (`NotFound`, `InvalidRange`, ...) are what callers of the
//! queue service match on; the rest wrap storage, configuration and I/O
//! problems with enough context to debug them.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for flightqueue operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Queue Errors ===
    /// A flight, node or list could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What kind of thing was looked up (`flight`, `node`, `list`).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A position is outside the current bounds of the queue.
    #[error("position {position} is out of range for a queue of {len} flights")]
    InvalidRange {
        /// The requested position.
        position: usize,
        /// Number of flights in the queue at the time of the request.
        len: usize,
    },

    /// A move request with out-of-range or identical positions.
    #[error("cannot move from {from} to {to} in a queue of {len} flights")]
    InvalidMove {
        /// Source position.
        from: usize,
        /// Destination position.
        to: usize,
        /// Number of flights in the queue.
        len: usize,
    },

    /// The persisted list structure is inconsistent and could not be repaired.
    #[error("list integrity violation: {message}")]
    IntegrityViolation {
        /// Description of the inconsistency.
        message: String,
    },

    /// A store write did not complete.
    #[error("synchronization failed: {message}")]
    SyncFailure {
        /// Description of what went wrong.
        message: String,
    },

    /// Attempt to delete a flight that an active node still references.
    #[error("flight {flight_id} is still queued and cannot be deleted")]
    ConflictingDelete {
        /// The referenced flight.
        flight_id: i64,
    },

    /// Attempt to queue a flight that already has an active node.
    #[error("flight {flight_id} is already queued")]
    AlreadyQueued {
        /// The flight that is already referenced.
        flight_id: i64,
    },

    /// Flight data failed validation.
    #[error("invalid flight: {message}")]
    InvalidFlight {
        /// Description of the validation failure.
        message: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flightqueue operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a not-found error for a flight id.
    #[must_use]
    pub fn flight_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "flight",
            id: id.to_string(),
        }
    }

    /// Create a not-found error for a node id.
    #[must_use]
    pub fn node_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "node",
            id: id.to_string(),
        }
    }

    /// Create a not-found error for a named list.
    #[must_use]
    pub fn list_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "list",
            id: name.into(),
        }
    }

    /// Create an integrity violation error.
    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            message: message.into(),
        }
    }

    /// Create a synchronization failure error.
    #[must_use]
    pub fn sync_failure(message: impl Into<String>) -> Self {
        Self::SyncFailure {
            message: message.into(),
        }
    }

    /// Create a flight validation error.
    #[must_use]
    pub fn invalid_flight(message: impl Into<String>) -> Self {
        Self::InvalidFlight {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the requested entity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a position or move range failure.
    #[must_use]
    pub fn is_invalid_range(&self) -> bool {
        matches!(self, Self::InvalidRange { .. } | Self::InvalidMove { .. })
    }

    /// Check if the synchronizer may retry the failed write with a full rebuild.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SyncFailure { .. } | Self::IntegrityViolation { .. } | Self::DatabaseQuery(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::flight_not_found(42);
        assert_eq!(err.to_string(), "flight not found: 42");
        assert!(err.is_not_found());

        let err = Error::list_not_found("primary");
        assert_eq!(err.to_string(), "list not found: primary");
    }

    #[test]
    fn test_invalid_range_display() {
        let err = Error::InvalidRange {
            position: 7,
            len: 3,
        };
        assert_eq!(
            err.to_string(),
            "position 7 is out of range for a queue of 3 flights"
        );
        assert!(err.is_invalid_range());
    }

    #[test]
    fn test_invalid_move_is_range_error() {
        let err = Error::InvalidMove {
            from: 1,
            to: 1,
            len: 3,
        };
        assert!(err.is_invalid_range());
        assert!(err.to_string().contains("from 1 to 1"));
    }

    #[test]
    fn test_conflicting_delete_display() {
        let err = Error::ConflictingDelete { flight_id: 9 };
        assert!(err.to_string().contains("still queued"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::sync_failure("write failed").is_recoverable());
        assert!(Error::integrity("cycle").is_recoverable());
        assert!(!Error::flight_not_found(1).is_recoverable());
        assert!(!Error::invalid_flight("bad").is_recoverable());
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "history_capacity must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("history_capacity"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
