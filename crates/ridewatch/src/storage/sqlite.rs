//! `SQLite`-backed snapshot store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{FeedbackReport, Position, SpeedSample};

use super::{migrations, PersistenceStore, TripSnapshot};

/// Snapshot store on a single `SQLite` database.
///
/// The connection sits behind a mutex so the store can be shared between
/// tasks. A save replaces everything stored for the trip in one transaction.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    ///
    /// Creates the parent directories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids of every stored trip, most recently saved first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn trip_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT trip_id FROM trip_snapshots ORDER BY saved_at DESC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::internal(format!("invalid timestamp {value:?}: {e}")))
}

impl PersistenceStore for SqliteStore {
    fn load(&self, trip_id: &str) -> Result<Option<TripSnapshot>> {
        let conn = self.conn();

        let row = conn
            .query_row(
                r"
                SELECT config, escalation, members, connectivity, saved_at
                FROM trip_snapshots WHERE trip_id = ?1
                ",
                [trip_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((config, escalation, members, connectivity, saved_at)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            r"
            SELECT timestamp, lat, lng, accuracy_meters, position_timestamp, speed_kmh, aggregated
            FROM speed_samples WHERE trip_id = ?1 ORDER BY seq ASC
            ",
        )?;
        let raw_samples = stmt
            .query_map([trip_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut speed_log = Vec::with_capacity(raw_samples.len());
        for (timestamp, lat, lng, accuracy, position_timestamp, speed_kmh, aggregated) in raw_samples
        {
            speed_log.push(SpeedSample {
                timestamp: parse_time(&timestamp)?,
                position: Position::new(lat, lng, accuracy, parse_time(&position_timestamp)?),
                speed_kmh,
                aggregated,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, reason, timestamp FROM feedback_reports WHERE trip_id = ?1 ORDER BY seq ASC",
        )?;
        let raw_reports = stmt
            .query_map([trip_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut feedback_reports = Vec::with_capacity(raw_reports.len());
        for (id, reason, timestamp) in raw_reports {
            feedback_reports.push(FeedbackReport {
                id,
                reason,
                timestamp: parse_time(&timestamp)?,
            });
        }

        Ok(Some(TripSnapshot {
            trip_id: trip_id.to_string(),
            config: serde_json::from_str(&config)?,
            escalation: serde_json::from_str(&escalation)?,
            members: serde_json::from_str(&members)?,
            speed_log,
            feedback_reports,
            connectivity: serde_json::from_str(&connectivity)?,
            saved_at: parse_time(&saved_at)?,
        }))
    }

    fn save(&self, trip_id: &str, snapshot: &TripSnapshot) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            r"
            INSERT OR REPLACE INTO trip_snapshots
                (trip_id, config, escalation, members, connectivity, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                trip_id,
                serde_json::to_string(&snapshot.config)?,
                serde_json::to_string(&snapshot.escalation)?,
                serde_json::to_string(&snapshot.members)?,
                serde_json::to_string(&snapshot.connectivity)?,
                snapshot.saved_at.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM speed_samples WHERE trip_id = ?1", [trip_id])?;
        {
            let mut insert = tx.prepare(
                r"
                INSERT INTO speed_samples
                    (trip_id, seq, timestamp, lat, lng, accuracy_meters, position_timestamp, speed_kmh, aggregated)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )?;
            for (seq, sample) in snapshot.speed_log.iter().enumerate() {
                insert.execute(params![
                    trip_id,
                    i64::try_from(seq).unwrap_or(i64::MAX),
                    sample.timestamp.to_rfc3339(),
                    sample.position.lat,
                    sample.position.lng,
                    sample.position.accuracy_meters,
                    sample.position.timestamp.to_rfc3339(),
                    sample.speed_kmh,
                    sample.aggregated,
                ])?;
            }
        }

        tx.execute("DELETE FROM feedback_reports WHERE trip_id = ?1", [trip_id])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO feedback_reports (trip_id, seq, id, reason, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (seq, report) in snapshot.feedback_reports.iter().enumerate() {
                insert.execute(params![
                    trip_id,
                    i64::try_from(seq).unwrap_or(i64::MAX),
                    report.id,
                    report.reason,
                    report.timestamp.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            trip_id,
            samples = snapshot.speed_log.len(),
            reports = snapshot.feedback_reports.len(),
            "Saved trip snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::Stage;
    use crate::storage::tests::sample_snapshot;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("failed to create test store")
    }

    #[test]
    fn test_open_in_memory() {
        let store = create_test_store();
        assert_eq!(store.path(), Path::new(":memory:"));
    }

    #[test]
    fn test_load_missing_trip() {
        let store = create_test_store();
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trips_every_field() {
        let store = create_test_store();
        let snapshot = sample_snapshot("t1");

        store.save("t1", &snapshot).unwrap();
        let loaded = store.load("t1").unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let store = create_test_store();
        let mut snapshot = sample_snapshot("t1");
        store.save("t1", &snapshot).unwrap();

        snapshot.speed_log.truncate(1);
        snapshot.feedback_reports.clear();
        snapshot.escalation.stage = Stage::Completed;
        store.save("t1", &snapshot).unwrap();

        let loaded = store.load("t1").unwrap().unwrap();
        assert_eq!(loaded.speed_log.len(), 1);
        assert!(loaded.feedback_reports.is_empty());
        assert_eq!(loaded.escalation.stage, Stage::Completed);
        assert_eq!(store.trip_ids().unwrap(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_trips_are_isolated() {
        let store = create_test_store();
        store.save("a", &sample_snapshot("a")).unwrap();
        let mut other = sample_snapshot("b");
        other.feedback_reports.clear();
        store.save("b", &other).unwrap();

        assert_eq!(store.load("a").unwrap().unwrap().feedback_reports.len(), 1);
        assert!(store.load("b").unwrap().unwrap().feedback_reports.is_empty());
        assert_eq!(store.trip_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_open_file_based_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("trips.db");

        {
            let store = SqliteStore::open(&db_path).unwrap();
            assert_eq!(store.path(), db_path);
            store.save("t1", &sample_snapshot("t1")).unwrap();
        }
        assert!(db_path.exists());

        let reopened = SqliteStore::open(&db_path).unwrap();
        assert_eq!(
            reopened.load("t1").unwrap(),
            Some(sample_snapshot("t1"))
        );
    }
}
