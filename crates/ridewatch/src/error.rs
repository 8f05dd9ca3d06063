//! Error types for ridewatch.
//!
//! This module defines all error types used throughout the ridewatch crate.
//! Lifecycle misuse is reported as a value, never as a panic, and sync
//! failures are kept distinct so the transport can treat them as recoverable.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::Channel;

/// The main error type for ridewatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Lifecycle Errors ===
    /// The location source could not be subscribed (e.g. permission denied).
    #[error("location sensor unavailable ({source_name}): {message}")]
    SensorUnavailable {
        /// Name of the location source.
        source_name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// `start` was called on a trip that is already active.
    #[error("trip is already active")]
    AlreadyActive,

    /// `stop` was called on a trip that was never started.
    #[error("trip was never started")]
    NotStarted,

    /// `start` was called on a trip that has already ended.
    #[error("trip has already ended; a new trip needs a new controller")]
    TripEnded,

    /// An operation that requires an active trip was called outside one.
    #[error("trip is not active")]
    NotActive,

    // === Sync Errors ===
    /// A sync attempt on a channel failed.
    #[error("sync over {channel} failed: {message}")]
    Sync {
        /// The channel the attempt used.
        channel: Channel,
        /// Description of what went wrong.
        message: String,
    },

    /// The sync endpoint answered with a non-success status.
    #[error("sync endpoint returned HTTP {status}")]
    SyncStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Storage Errors ===
    /// The snapshot database could not be opened.
    #[error("cannot open trip store {path}: {source}")]
    DatabaseOpen {
        /// Database file.
        path: PathBuf,
        /// Cause.
        #[source]
        source: rusqlite::Error,
    },

    /// A statement against the snapshot database failed.
    #[error("trip store query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// The stored schema cannot be brought to the current version.
    #[error("trip store schema error: {message}")]
    DatabaseMigration {
        /// What is wrong with the schema.
        message: String,
    },

    // === Configuration Errors ===
    /// The application config could not be read or parsed.
    #[error("cannot load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// A config value is out of range.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Which setting and why.
        message: String,
    },

    // === I/O Errors ===
    /// Reading or writing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A data directory could not be created.
    #[error("cannot create directory {path}: {source}")]
    DirectoryCreate {
        /// Directory that was being created.
        path: PathBuf,
        /// Cause.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// A payload, snapshot column or config document is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// A bounded operation ran out of time.
    #[error("timed out: {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
    },

    /// Broken internal assumption.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for ridewatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a sensor unavailable error.
    #[must_use]
    pub fn sensor_unavailable(source_name: &'static str, message: impl Into<String>) -> Self {
        Self::SensorUnavailable {
            source_name,
            message: message.into(),
        }
    }

    /// Create a sync failure for the given channel.
    #[must_use]
    pub fn sync(channel: Channel, message: impl Into<String>) -> Self {
        Self::Sync {
            channel,
            message: message.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the location sensor could not be used.
    #[must_use]
    pub fn is_sensor_unavailable(&self) -> bool {
        matches!(self, Self::SensorUnavailable { .. })
    }

    /// Check if this error is a misuse of the trip lifecycle API.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyActive | Self::NotStarted | Self::TripEnded | Self::NotActive
        )
    }

    /// Check if this error is a recoverable sync failure.
    #[must_use]
    pub fn is_sync_failure(&self) -> bool {
        matches!(
            self,
            Self::Sync { .. } | Self::SyncStatus { .. } | Self::Http(_) | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyActive;
        assert_eq!(err.to_string(), "trip is already active");

        let err = Error::internal("test error");
        assert_eq!(err.to_string(), "internal error: test error");
    }

    #[test]
    fn test_sensor_unavailable_display() {
        let err = Error::sensor_unavailable("gps", "location permission denied");
        let msg = err.to_string();
        assert!(msg.contains("gps"));
        assert!(msg.contains("location permission denied"));
        assert!(err.is_sensor_unavailable());
        assert!(!err.is_usage_error());
    }

    #[test]
    fn test_usage_errors() {
        assert!(Error::AlreadyActive.is_usage_error());
        assert!(Error::NotStarted.is_usage_error());
        assert!(Error::TripEnded.is_usage_error());
        assert!(Error::NotActive.is_usage_error());
        assert!(!Error::internal("x").is_usage_error());
    }

    #[test]
    fn test_sync_failures() {
        assert!(Error::sync(Channel::P2p, "no peer").is_sync_failure());
        assert!(Error::SyncStatus { status: 500 }.is_sync_failure());
        assert!(Error::timeout("sync over internet").is_sync_failure());
        assert!(!Error::AlreadyActive.is_sync_failure());
    }

    #[test]
    fn test_sync_error_display() {
        let err = Error::sync(Channel::Internet, "connection refused");
        assert_eq!(
            err.to_string(),
            "sync over internet failed: connection refused"
        );

        let err = Error::SyncStatus { status: 503 };
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_conversions_from_library_errors() {
        let io: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "track.json").into();
        assert!(matches!(io, Error::Io(_)));

        let json: Error = serde_json::from_str::<u8>("{").unwrap_err().into();
        assert!(matches!(json, Error::Json(_)));

        let sqlite: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(sqlite, Error::DatabaseQuery(_)));

        // None of these are recoverable sync failures
        assert!(!io.is_sync_failure());
        assert!(!json.is_sync_failure());
        assert!(!sqlite.is_sync_failure());
    }

    #[test]
    fn test_storage_error_names_path() {
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/var/lib/ridewatch"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/var/lib/ridewatch"));

        let err = Error::DatabaseMigration {
            message: "schema version 7 is newer than supported version 1".to_string(),
        };
        assert!(err.to_string().starts_with("trip store schema error"));
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(
            Error::timeout("peer exchange").to_string(),
            "timed out: peer exchange"
        );
    }
}
