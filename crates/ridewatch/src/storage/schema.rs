//! `SQLite` schema definitions for ridewatch.

/// One row per trip: configuration, stage and roster as JSON.
pub const CREATE_TRIP_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS trip_snapshots (
    trip_id TEXT PRIMARY KEY,
    config TEXT NOT NULL,
    escalation TEXT NOT NULL,
    members TEXT NOT NULL,
    connectivity TEXT NOT NULL,
    saved_at TEXT NOT NULL
)
";

/// The speed log, one row per sample, ordered by `seq`.
pub const CREATE_SPEED_SAMPLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS speed_samples (
    trip_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    accuracy_meters REAL NOT NULL,
    position_timestamp TEXT NOT NULL,
    speed_kmh REAL NOT NULL,
    aggregated INTEGER NOT NULL,
    PRIMARY KEY (trip_id, seq)
)
";

/// Feedback reports in submission order.
pub const CREATE_FEEDBACK_REPORTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS feedback_reports (
    trip_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    id TEXT NOT NULL,
    reason TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (trip_id, seq)
)
";

/// Lookup of a report by id within a trip.
pub const CREATE_FEEDBACK_ID_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_feedback_reports_id ON feedback_reports(trip_id, id)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_TRIP_SNAPSHOTS_TABLE,
    CREATE_SPEED_SAMPLES_TABLE,
    CREATE_FEEDBACK_REPORTS_TABLE,
    CREATE_FEEDBACK_ID_INDEX,
    CREATE_METADATA_TABLE,
];
